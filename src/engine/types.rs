//! Shared types for the rule engine.
//!
//! An [`EmailRecord`] is a read-only snapshot of a stored message. The engine
//! never mutates one during evaluation — read-flag and label changes happen
//! only as a side effect of a successfully dispatched action and are reflected
//! back by the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RuleError;

// ── Email record ────────────────────────────────────────────────────

/// A stored email, as fetched from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Stable provider-assigned message id.
    pub id: String,
    /// Provider thread id.
    pub thread_id: String,
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Body text. Empty string when the message has no readable body,
    /// never absent.
    pub body: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Read/unread flag.
    pub is_read: bool,
    /// Current labels/folders on the provider.
    pub labels: Vec<String>,
}

impl EmailRecord {
    /// Look up the value of a semantic field.
    ///
    /// No normalization happens here — case-folding is the predicate's
    /// responsibility.
    pub fn field(&self, name: FieldName) -> FieldValue<'_> {
        match name {
            FieldName::Sender => FieldValue::Text(&self.from),
            FieldName::Subject => FieldValue::Text(&self.subject),
            FieldName::Body => FieldValue::Text(&self.body),
            FieldName::ReceivedAt => FieldValue::Timestamp(self.received_at),
        }
    }
}

// ── Field names ─────────────────────────────────────────────────────

/// The semantic email fields eligible for rule matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    Sender,
    Subject,
    Body,
    ReceivedAt,
}

impl FieldName {
    /// Whether this field carries a timestamp rather than text.
    pub fn is_date(self) -> bool {
        matches!(self, FieldName::ReceivedAt)
    }
}

impl FromStr for FieldName {
    type Err = RuleError;

    /// Parse a wire-level field name. Accepts the aliases rule documents
    /// use (`from`, `message`, `received_date`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "from" | "sender" => Ok(FieldName::Sender),
            "subject" => Ok(FieldName::Subject),
            "body" | "message" => Ok(FieldName::Body),
            "received_at" | "received_date" => Ok(FieldName::ReceivedAt),
            other => Err(RuleError::UnknownField(other.to_string())),
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldName::Sender => "sender",
            FieldName::Subject => "subject",
            FieldName::Body => "body",
            FieldName::ReceivedAt => "received_at",
        };
        f.write_str(s)
    }
}

// ── Field values ────────────────────────────────────────────────────

/// A field value handed to a predicate: text or a timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Timestamp(DateTime<Utc>),
}

impl FieldValue<'_> {
    /// Short kind label for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Timestamp(_) => "timestamp",
        }
    }
}
