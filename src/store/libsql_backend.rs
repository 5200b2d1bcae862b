//! libSQL backend — async `EmailStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! RFC 3339 text; recipient lists, labels, and applied-action lists are
//! stored as JSON text columns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::engine::actions::{Action, ApplicationRecord};
use crate::engine::types::EmailRecord;
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::EmailStore;

/// libSQL database backend.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Row mapping helpers ─────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into `DateTime<Utc>`.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Parse a JSON text column holding a string list.
fn parse_string_list(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Map a row to an `EmailRecord`.
///
/// Column order: 0:id, 1:thread_id, 2:from_address, 3:to_addresses,
/// 4:subject, 5:body, 6:received_at, 7:is_read, 8:labels
fn row_to_email(row: &libsql::Row) -> Result<EmailRecord, libsql::Error> {
    let received_str: String = row.get(6)?;
    Ok(EmailRecord {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        from: row.get(2)?,
        to: parse_string_list(&row.get::<String>(3)?),
        subject: row.get(4)?,
        body: row.get(5)?,
        received_at: parse_datetime(&received_str),
        is_read: row.get::<i64>(7)? != 0,
        labels: parse_string_list(&row.get::<String>(8)?),
    })
}

const EMAIL_COLUMNS: &str =
    "id, thread_id, from_address, to_addresses, subject, body, received_at, is_read, labels";

/// Map a row to an `ApplicationRecord`.
///
/// Column order: 0:id, 1:email_id, 2:rule_set_id, 3:rule_set_name,
/// 4:actions, 5:applied_at
fn row_to_application(row: &libsql::Row) -> Result<ApplicationRecord, DatabaseError> {
    let id_str: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let actions_str: String = row.get(4).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let applied_str: String = row.get(5).map_err(|e| DatabaseError::Query(e.to_string()))?;

    let tokens: Vec<String> = serde_json::from_str(&actions_str)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    let actions = tokens
        .iter()
        .map(|t| Action::parse(t))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

    Ok(ApplicationRecord {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        email_id: row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?,
        rule_set_id: row.get(2).map_err(|e| DatabaseError::Query(e.to_string()))?,
        rule_set_name: row.get(3).map_err(|e| DatabaseError::Query(e.to_string()))?,
        actions,
        applied_at: parse_datetime(&applied_str),
    })
}

// ── EmailStore implementation ───────────────────────────────────────

#[async_trait]
impl EmailStore for LibSqlBackend {
    async fn save_email(&self, email: &EmailRecord) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT 1 FROM emails WHERE id = ?1", params![email.id.clone()])
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        if rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
            .is_some()
        {
            return Ok(false);
        }

        let to = serde_json::to_string(&email.to)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let labels = serde_json::to_string(&email.labels)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO emails
                    (id, thread_id, from_address, to_addresses, subject, body,
                     received_at, is_read, labels, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    email.id.clone(),
                    email.thread_id.clone(),
                    email.from.clone(),
                    to,
                    email.subject.clone(),
                    email.body.clone(),
                    email.received_at.to_rfc3339(),
                    email.is_read as i64,
                    labels,
                    now.clone(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(true)
    }

    async fn get_emails(
        &self,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<EmailRecord>, DatabaseError> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM emails
                     ORDER BY received_at DESC LIMIT ?1 OFFSET ?2"
                ),
                params![limit, offset as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut emails = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            emails.push(row_to_email(&row).map_err(|e| DatabaseError::Query(e.to_string()))?);
        }
        Ok(emails)
    }

    async fn get_email(&self, id: &str) -> Result<Option<EmailRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(
                row_to_email(&row).map_err(|e| DatabaseError::Query(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn set_read_flag(&self, id: &str, is_read: bool) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE emails SET is_read = ?1, updated_at = ?2 WHERE id = ?3",
                params![is_read as i64, Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "email".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn log_application(&self, record: &ApplicationRecord) -> Result<(), DatabaseError> {
        let tokens: Vec<String> = record.actions.iter().map(ToString::to_string).collect();
        let actions = serde_json::to_string(&tokens)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO rule_applications
                    (id, email_id, rule_set_id, rule_set_name, actions, applied_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id.to_string(),
                    record.email_id.clone(),
                    record.rule_set_id.clone(),
                    record.rule_set_name.clone(),
                    actions,
                    record.applied_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|_| DatabaseError::RecordWrite(record.id))?;
        Ok(())
    }

    async fn applications_for_email(
        &self,
        email_id: &str,
    ) -> Result<Vec<ApplicationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, email_id, rule_set_id, rule_set_name, actions, applied_at
                 FROM rule_applications WHERE email_id = ?1 ORDER BY applied_at ASC",
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            records.push(row_to_application(&row)?);
        }
        Ok(records)
    }

    async fn email_count(&self) -> Result<u64, DatabaseError> {
        count(self.conn(), "SELECT COUNT(*) FROM emails").await
    }

    async fn unread_count(&self) -> Result<u64, DatabaseError> {
        count(self.conn(), "SELECT COUNT(*) FROM emails WHERE is_read = 0").await
    }

    async fn clear(&self) -> Result<u64, DatabaseError> {
        self.conn()
            .execute("DELETE FROM rule_applications", ())
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        self.conn()
            .execute("DELETE FROM emails", ())
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))
    }
}

async fn count(conn: &Connection, sql: &str) -> Result<u64, DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(e.to_string()))?
    {
        Some(row) => Ok(row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Query(e.to_string()))? as u64),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_email(id: &str, received_at: DateTime<Utc>) -> EmailRecord {
        EmailRecord {
            id: id.into(),
            thread_id: format!("thr-{id}"),
            from: "alice@example.com".into(),
            to: vec!["me@example.com".into(), "team@example.com".into()],
            subject: "Hello".into(),
            body: "Body text".into(),
            received_at,
            is_read: false,
            labels: vec!["INBOX".into(), "IMPORTANT".into()],
        }
    }

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn save_and_fetch_round_trip() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let email = make_email("m1", ts(1, 12));

        assert!(store.save_email(&email).await.unwrap());
        let fetched = store.get_email("m1").await.unwrap().unwrap();
        assert_eq!(fetched.id, email.id);
        assert_eq!(fetched.thread_id, email.thread_id);
        assert_eq!(fetched.from, email.from);
        assert_eq!(fetched.to, email.to);
        assert_eq!(fetched.subject, email.subject);
        assert_eq!(fetched.body, email.body);
        assert_eq!(fetched.received_at, email.received_at);
        assert_eq!(fetched.labels, email.labels);
        assert!(!fetched.is_read);
    }

    #[tokio::test]
    async fn duplicate_save_is_ignored() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let email = make_email("m1", ts(1, 12));
        assert!(store.save_email(&email).await.unwrap());

        let mut changed = email.clone();
        changed.subject = "Changed".into();
        assert!(!store.save_email(&changed).await.unwrap());

        // Original row left untouched.
        let fetched = store.get_email("m1").await.unwrap().unwrap();
        assert_eq!(fetched.subject, "Hello");
        assert_eq!(store.email_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_emails_newest_first_with_window() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        store.save_email(&make_email("old", ts(1, 9))).await.unwrap();
        store.save_email(&make_email("mid", ts(2, 9))).await.unwrap();
        store.save_email(&make_email("new", ts(3, 9))).await.unwrap();

        let all = store.get_emails(None, 0).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let windowed = store.get_emails(Some(1), 1).await.unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].id, "mid");
    }

    #[tokio::test]
    async fn read_flag_updates() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        store.save_email(&make_email("m1", ts(1, 12))).await.unwrap();

        store.set_read_flag("m1", true).await.unwrap();
        assert!(store.get_email("m1").await.unwrap().unwrap().is_read);
        assert_eq!(store.unread_count().await.unwrap(), 0);

        store.set_read_flag("m1", false).await.unwrap();
        assert_eq!(store.unread_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn read_flag_on_missing_email_is_not_found() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let err = store.set_read_flag("ghost", true).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn application_records_round_trip() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        store.save_email(&make_email("m1", ts(1, 12))).await.unwrap();

        let record = ApplicationRecord {
            id: Uuid::new_v4(),
            email_id: "m1".into(),
            rule_set_id: "newsletter-sweep".into(),
            rule_set_name: "File newsletters".into(),
            actions: vec![Action::MarkRead, Action::Move("Newsletters".into())],
            applied_at: ts(2, 8),
        };
        store.log_application(&record).await.unwrap();

        let fetched = store.applications_for_email("m1").await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, record.id);
        assert_eq!(fetched[0].rule_set_id, "newsletter-sweep");
        assert_eq!(fetched[0].rule_set_name, "File newsletters");
        assert_eq!(fetched[0].actions, record.actions);
        assert_eq!(fetched[0].applied_at, record.applied_at);

        assert!(store.applications_for_email("m2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        store.save_email(&make_email("m1", ts(1, 12))).await.unwrap();
        store.save_email(&make_email("m2", ts(2, 12))).await.unwrap();
        store
            .log_application(&ApplicationRecord {
                id: Uuid::new_v4(),
                email_id: "m1".into(),
                rule_set_id: "s".into(),
                rule_set_name: "S".into(),
                actions: vec![Action::Archive],
                applied_at: ts(3, 8),
            })
            .await
            .unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.email_count().await.unwrap(), 0);
        assert!(store.applications_for_email("m1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_file_backend_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailrules.db");

        {
            let store = LibSqlBackend::new_local(&path).await.unwrap();
            store.save_email(&make_email("m1", ts(1, 12))).await.unwrap();
        }

        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(reopened.email_count().await.unwrap(), 1);
        assert!(reopened.get_email("m1").await.unwrap().is_some());
    }
}
