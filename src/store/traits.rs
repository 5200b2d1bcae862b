//! Backend-agnostic `EmailStore` trait — single async interface for all
//! persistence: fetched emails and rule-application records.

use async_trait::async_trait;

use crate::engine::actions::ApplicationRecord;
use crate::engine::types::EmailRecord;
use crate::error::DatabaseError;

/// Storage interface consumed by the engine and the CLI.
#[async_trait]
pub trait EmailStore: Send + Sync {
    /// Insert a fetched email. Returns `true` if it was new, `false` if a
    /// record with the same provider id already existed (left untouched).
    async fn save_email(&self, email: &EmailRecord) -> Result<bool, DatabaseError>;

    /// Fetch stored emails, newest first.
    async fn get_emails(
        &self,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<EmailRecord>, DatabaseError>;

    /// Look up one email by provider id.
    async fn get_email(&self, id: &str) -> Result<Option<EmailRecord>, DatabaseError>;

    /// Update the stored read/unread flag after a successful provider call.
    async fn set_read_flag(&self, id: &str, is_read: bool) -> Result<(), DatabaseError>;

    /// Append an application record.
    async fn log_application(&self, record: &ApplicationRecord) -> Result<(), DatabaseError>;

    /// All application records for one email, oldest first.
    async fn applications_for_email(
        &self,
        email_id: &str,
    ) -> Result<Vec<ApplicationRecord>, DatabaseError>;

    /// Total number of stored emails.
    async fn email_count(&self) -> Result<u64, DatabaseError>;

    /// Number of stored emails flagged unread.
    async fn unread_count(&self) -> Result<u64, DatabaseError>;

    /// Delete all emails and application records. Returns the number of
    /// emails removed.
    async fn clear(&self) -> Result<u64, DatabaseError>;
}
