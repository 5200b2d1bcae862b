//! Gmail REST v1 client.
//!
//! Thin wrapper over the `users.messages` and `users.labels` endpoints:
//! message list/fetch for ingest, modify/trash for actions, and label
//! get-or-create for `move`. Authentication is a ready bearer token from
//! configuration — acquiring or refreshing it is someone else's job.
//!
//! Messages are fetched in `raw` format (urlsafe-base64 RFC 2822) and parsed
//! with mail-parser; read state and folders come from Gmail's `UNREAD` and
//! `INBOX` system labels.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{TimeZone, Utc};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::engine::types::EmailRecord;
use crate::error::ProviderError;
use crate::provider::MailProvider;

/// Default API base.
const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Gmail client configuration.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// API base URL (overridable for tests against a stub server).
    pub api_base: String,
    /// OAuth2 bearer token.
    pub access_token: SecretString,
    /// Gmail user id; `me` is the authenticated account.
    pub user: String,
}

impl GmailConfig {
    pub fn new(access_token: SecretString) -> Self {
        Self {
            api_base: GMAIL_API_BASE.to_string(),
            access_token,
            user: "me".to_string(),
        }
    }
}

/// Gmail REST client. Caches label name → id lookups per client.
pub struct GmailClient {
    http: reqwest::Client,
    config: GmailConfig,
    labels: tokio::sync::Mutex<HashMap<String, String>>,
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    /// Milliseconds since epoch, as a string.
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    raw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct Label {
    id: String,
    name: String,
}

impl GmailClient {
    pub fn new(config: GmailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            labels: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/users/{}/{}",
            self.config.api_base, self.config.user, path
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Self::decode_response(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Self::decode_response(response).await
    }

    async fn decode_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    // ── Ingest ──────────────────────────────────────────────────────

    /// Fetch up to `max_results` messages matching a Gmail search query
    /// (empty query for everything). Messages that fail to fetch or decode
    /// are skipped, not fatal.
    pub async fn fetch_messages(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<EmailRecord>, ProviderError> {
        let mut params = vec![("maxResults", max_results.to_string())];
        if !query.is_empty() {
            params.push(("q", query.to_string()));
        }
        let list: MessageList = self.get_json("messages", &params).await?;
        info!(found = list.messages.len(), "Listed messages");

        let mut emails = Vec::with_capacity(list.messages.len());
        for message in &list.messages {
            match self.fetch_message(&message.id).await {
                Ok(email) => emails.push(email),
                Err(e) => {
                    warn!(id = %message.id, error = %e, "Skipping unfetchable message");
                }
            }
        }
        info!(fetched = emails.len(), "Fetched messages");
        Ok(emails)
    }

    /// Fetch one message in raw format and convert it to an `EmailRecord`.
    pub async fn fetch_message(&self, id: &str) -> Result<EmailRecord, ProviderError> {
        let message: RawMessage = self
            .get_json(
                &format!("messages/{id}"),
                &[("format", "raw".to_string())],
            )
            .await?;

        let raw = message
            .raw
            .as_deref()
            .ok_or_else(|| ProviderError::Decode(format!("message {id} has no raw payload")))?;
        let raw = decode_raw(raw)?;

        let label_names = self.label_names(&message.label_ids).await;
        Ok(raw_to_record(
            &message.id,
            &message.thread_id,
            &message.label_ids,
            label_names,
            message
                .internal_date
                .as_deref()
                .and_then(|s| s.parse::<i64>().ok()),
            &raw,
        ))
    }

    /// Resolve label ids to display names, falling back to the raw id for
    /// anything unknown.
    async fn label_names(&self, ids: &[String]) -> Vec<String> {
        if ids.is_empty() {
            return Vec::new();
        }
        if let Err(e) = self.refresh_label_cache_if_needed(ids).await {
            warn!(error = %e, "Could not list labels, keeping raw ids");
        }
        let by_name = self.labels.lock().await;
        // Cache maps name → id; invert for lookup.
        let by_id: HashMap<&String, &String> = by_name.iter().map(|(n, i)| (i, n)).collect();
        ids.iter()
            .map(|id| by_id.get(id).map(|n| (*n).clone()).unwrap_or_else(|| id.clone()))
            .collect()
    }

    async fn refresh_label_cache_if_needed(&self, ids: &[String]) -> Result<(), ProviderError> {
        {
            let cache = self.labels.lock().await;
            if !cache.is_empty() && ids.iter().all(|id| cache.values().any(|v| v == id)) {
                return Ok(());
            }
        }
        let list: LabelList = self.get_json("labels", &[]).await?;
        let mut cache = self.labels.lock().await;
        cache.clear();
        for label in list.labels {
            cache.insert(label.name, label.id);
        }
        Ok(())
    }

    // ── Labels ──────────────────────────────────────────────────────

    /// Get a label id by name, creating the label if it does not exist.
    async fn ensure_label(&self, name: &str) -> Result<String, ProviderError> {
        {
            let cache = self.labels.lock().await;
            if let Some(id) = cache.get(name) {
                return Ok(id.clone());
            }
        }

        let list: LabelList = self
            .get_json("labels", &[])
            .await
            .map_err(|e| ProviderError::Label {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        if let Some(label) = list.labels.iter().find(|l| l.name == name) {
            self.labels
                .lock()
                .await
                .insert(label.name.clone(), label.id.clone());
            return Ok(label.id.clone());
        }

        let created: Label = self
            .post_json(
                "labels",
                &serde_json::json!({
                    "name": name,
                    "messageListVisibility": "show",
                    "labelListVisibility": "labelShow",
                }),
            )
            .await
            .map_err(|e| ProviderError::Label {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        info!(label = name, id = %created.id, "Created label");
        self.labels
            .lock()
            .await
            .insert(created.name.clone(), created.id.clone());
        Ok(created.id)
    }

    async fn modify(
        &self,
        id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), ProviderError> {
        let body = serde_json::json!({
            "addLabelIds": add,
            "removeLabelIds": remove,
        });
        let _: serde_json::Value = self
            .post_json(&format!("messages/{id}/modify"), &body)
            .await?;
        debug!(id, ?add, ?remove, "Modified message labels");
        Ok(())
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn mark_read(&self, id: &str) -> Result<(), ProviderError> {
        self.modify(id, &[], &["UNREAD"]).await
    }

    async fn mark_unread(&self, id: &str) -> Result<(), ProviderError> {
        self.modify(id, &["UNREAD"], &[]).await
    }

    async fn move_to_label(&self, id: &str, label: &str) -> Result<(), ProviderError> {
        let label_id = self.ensure_label(label).await?;
        self.modify(id, &[&label_id], &["INBOX"]).await
    }

    async fn archive(&self, id: &str) -> Result<(), ProviderError> {
        self.modify(id, &[], &["INBOX"]).await
    }

    async fn delete(&self, id: &str) -> Result<(), ProviderError> {
        let _: serde_json::Value = self
            .post_json(&format!("messages/{id}/trash"), &serde_json::json!({}))
            .await?;
        Ok(())
    }
}

// ── Message conversion (public for testing) ─────────────────────────

/// Decode Gmail's urlsafe-base64 raw payload (padded or not).
pub fn decode_raw(raw: &str) -> Result<Vec<u8>, ProviderError> {
    URL_SAFE_NO_PAD
        .decode(raw)
        .or_else(|_| URL_SAFE.decode(raw))
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

/// Build an `EmailRecord` from a raw RFC 2822 message plus Gmail metadata.
///
/// `internal_date_ms` (Gmail's receive time) wins over the Date header; if
/// both are missing the current time is used rather than dropping the
/// message.
pub fn raw_to_record(
    id: &str,
    thread_id: &str,
    label_ids: &[String],
    label_names: Vec<String>,
    internal_date_ms: Option<i64>,
    raw: &[u8],
) -> EmailRecord {
    let parsed = MessageParser::default().parse(raw);

    let (from, to, subject, body, header_date) = match &parsed {
        Some(message) => {
            let from = message
                .from()
                .and_then(|addr| addr.first())
                .and_then(|a| a.address())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".into());
            let to: Vec<String> = message
                .to()
                .map(|addr| {
                    addr.iter()
                        .filter_map(|a| a.address())
                        .map(|s| s.to_string())
                        .collect()
                })
                .unwrap_or_default();
            let subject = message.subject().unwrap_or_default().to_string();
            let body = extract_text(message);
            let header_date = message.date().map(|d| d.to_timestamp());
            (from, to, subject, body, header_date)
        }
        None => ("unknown".into(), Vec::new(), String::new(), String::new(), None),
    };

    let received_at = internal_date_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or_else(|| header_date.and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
        .unwrap_or_else(Utc::now);

    EmailRecord {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        from,
        to,
        subject,
        body,
        received_at,
        is_read: !label_ids.iter().any(|l| l == "UNREAD"),
        labels: label_names,
    }
}

/// Extract readable text from a parsed message: plain text part first,
/// stripped HTML as fallback, empty string when neither exists.
fn extract_text(message: &mail_parser::Message<'_>) -> String {
    if let Some(text) = message.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = message.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags from content (basic).
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "From: Alice <alice@example.com>\r\n\
        To: me@example.com, team@example.com\r\n\
        Subject: Quarterly report\r\n\
        Date: Sat, 1 Jun 2024 12:00:00 +0000\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Numbers attached.\r\n";

    #[test]
    fn decode_raw_handles_padding_variants() {
        let encoded_no_pad = URL_SAFE_NO_PAD.encode(SAMPLE);
        let encoded_padded = URL_SAFE.encode(SAMPLE);
        assert_eq!(decode_raw(&encoded_no_pad).unwrap(), SAMPLE.as_bytes());
        assert_eq!(decode_raw(&encoded_padded).unwrap(), SAMPLE.as_bytes());
        assert!(decode_raw("not base64 at all!!!").is_err());
    }

    #[test]
    fn raw_message_converts_to_record() {
        let labels = vec!["UNREAD".to_string(), "INBOX".to_string()];
        let record = raw_to_record(
            "m1",
            "thr-1",
            &labels,
            vec!["UNREAD".into(), "INBOX".into()],
            Some(1_717_243_200_000), // 2024-06-01T12:00:00Z
            SAMPLE.as_bytes(),
        );

        assert_eq!(record.id, "m1");
        assert_eq!(record.thread_id, "thr-1");
        assert_eq!(record.from, "alice@example.com");
        assert_eq!(record.to, vec!["me@example.com", "team@example.com"]);
        assert_eq!(record.subject, "Quarterly report");
        assert_eq!(record.body.trim(), "Numbers attached.");
        assert_eq!(record.received_at.to_rfc3339(), "2024-06-01T12:00:00+00:00");
        assert!(!record.is_read);
    }

    #[test]
    fn missing_unread_label_means_read() {
        let labels = vec!["INBOX".to_string()];
        let record = raw_to_record("m1", "t", &labels, vec![], None, SAMPLE.as_bytes());
        assert!(record.is_read);
    }

    #[test]
    fn header_date_used_when_internal_date_missing() {
        let record = raw_to_record("m1", "t", &[], vec![], None, SAMPLE.as_bytes());
        assert_eq!(record.received_at.to_rfc3339(), "2024-06-01T12:00:00+00:00");
    }

    #[test]
    fn unparseable_payload_degrades_to_empty_fields() {
        let record = raw_to_record("m1", "t", &[], vec![], Some(0), b"");
        assert_eq!(record.from, "unknown");
        assert_eq!(record.subject, "");
        assert_eq!(record.body, "");
    }

    #[test]
    fn html_only_body_is_stripped() {
        let html_mail = "From: a@b.c\r\n\
            To: me@example.com\r\n\
            Subject: x\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <html><body><p>Hello <b>world</b></p></body></html>\r\n";
        let record = raw_to_record("m1", "t", &[], vec![], Some(0), html_mail.as_bytes());
        assert!(record.body.contains("Hello"));
        assert!(record.body.contains("world"));
        assert!(!record.body.contains('<'));
    }

    #[test]
    fn strip_html_collapses_whitespace() {
        assert_eq!(
            strip_html("<div>one\n  <span>two</span>\t three</div>"),
            "one two three"
        );
    }
}
