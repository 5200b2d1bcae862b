//! Mail provider access — pure I/O, no rule logic.
//!
//! The engine only ever sees the narrow [`MailProvider`] trait; every call
//! reports success or failure and nothing else. Authentication, transport,
//! and retry concerns live behind it.

pub mod gmail;

use async_trait::async_trait;

use crate::error::ProviderError;

pub use gmail::{GmailClient, GmailConfig};

/// Trait for mail provider clients.
///
/// Each operation targets one message by its provider-assigned id.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Provider name (e.g. "gmail"), for logging.
    fn name(&self) -> &str;

    /// Mark a message as read.
    async fn mark_read(&self, id: &str) -> Result<(), ProviderError>;

    /// Mark a message as unread.
    async fn mark_unread(&self, id: &str) -> Result<(), ProviderError>;

    /// Move a message to a label/folder, creating the label if the provider
    /// allows it. A label that cannot be resolved or created fails the call.
    async fn move_to_label(&self, id: &str, label: &str) -> Result<(), ProviderError>;

    /// Archive a message (remove it from the inbox).
    async fn archive(&self, id: &str) -> Result<(), ProviderError>;

    /// Delete a message (move it to trash).
    async fn delete(&self, id: &str) -> Result<(), ProviderError>;
}
