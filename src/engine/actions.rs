//! Actions — what happens to an email once a rule set matches.
//!
//! Actions are closed tagged variants parsed from the document's literal
//! tokens (`mark_as_read`, `mark_as_unread`, `archive`, `delete`,
//! `move:<label>`). The dispatcher applies a matched set's actions in order,
//! cumulatively: one action failing does not stop the ones after it, and
//! nothing is rolled back — provider-side actions are not transactional.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::rules::RuleSet;
use crate::engine::types::EmailRecord;
use crate::error::{DatabaseError, LoadError, ProviderError};
use crate::provider::MailProvider;
use crate::store::EmailStore;

// ── Actions ─────────────────────────────────────────────────────────

/// A state-changing operation applied to an email on a rule-set match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MarkRead,
    MarkUnread,
    /// Move to a label/folder. The label is validated non-empty at load time.
    Move(String),
    Archive,
    Delete,
}

impl Action {
    /// Parse a document action token.
    pub fn parse(token: &str) -> Result<Self, LoadError> {
        let token = token.trim();
        let (kind, param) = match token.split_once(':') {
            Some((kind, param)) => (kind, Some(param)),
            None => (token, None),
        };

        match kind.to_lowercase().as_str() {
            "mark_as_read" | "mark_read" => Ok(Action::MarkRead),
            "mark_as_unread" | "mark_unread" => Ok(Action::MarkUnread),
            "archive" => Ok(Action::Archive),
            "delete" => Ok(Action::Delete),
            "move" => {
                let label = param.map(str::trim).unwrap_or_default();
                if label.is_empty() {
                    Err(LoadError::EmptyMoveLabel)
                } else {
                    Ok(Action::Move(label.to_string()))
                }
            }
            _ => Err(LoadError::UnknownAction(token.to_string())),
        }
    }
}

impl fmt::Display for Action {
    /// The wire token; `Action::parse` round-trips it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MarkRead => f.write_str("mark_as_read"),
            Action::MarkUnread => f.write_str("mark_as_unread"),
            Action::Move(label) => write!(f, "move:{label}"),
            Action::Archive => f.write_str("archive"),
            Action::Delete => f.write_str("delete"),
        }
    }
}

// ── Outcomes and records ────────────────────────────────────────────

/// Result of attempting one action.
#[derive(Debug)]
pub struct ActionResult {
    pub action: Action,
    pub error: Option<ProviderError>,
}

impl ActionResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Cumulative result of dispatching a rule set's action list to one email.
#[derive(Debug)]
pub struct ActionOutcome {
    pub email_id: String,
    pub rule_set_id: String,
    pub results: Vec<ActionResult>,
    /// Written when at least one action succeeded.
    pub record: Option<ApplicationRecord>,
}

impl ActionOutcome {
    /// Number of actions that succeeded.
    pub fn applied(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    /// Number of actions that failed.
    pub fn failed(&self) -> usize {
        self.results.len() - self.applied()
    }

    /// Whether every action in the list succeeded.
    pub fn fully_applied(&self) -> bool {
        self.failed() == 0
    }
}

/// Durable note that a rule set's actions were applied to an email.
#[derive(Debug, Clone)]
pub struct ApplicationRecord {
    pub id: Uuid,
    pub email_id: String,
    pub rule_set_id: String,
    pub rule_set_name: String,
    /// The actions that succeeded, in dispatch order.
    pub actions: Vec<Action>,
    pub applied_at: DateTime<Utc>,
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Applies a matched rule set's actions through the provider and records
/// what was done.
pub struct ActionDispatcher {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn EmailStore>,
}

impl ActionDispatcher {
    pub fn new(provider: Arc<dyn MailProvider>, store: Arc<dyn EmailStore>) -> Self {
        Self { provider, store }
    }

    /// Apply every action of `set` to `email`, in order.
    ///
    /// Provider failures are captured per action and do not stop subsequent
    /// actions. On at least one success an [`ApplicationRecord`] is written
    /// to the store; a failure writing that record is the only error that
    /// propagates from here.
    pub async fn apply(
        &self,
        set: &RuleSet,
        email: &EmailRecord,
    ) -> Result<ActionOutcome, DatabaseError> {
        let mut results = Vec::with_capacity(set.actions.len());

        for action in &set.actions {
            match self.execute(action, email).await {
                Ok(()) => {
                    debug!(
                        email_id = %email.id,
                        action = %action,
                        provider = self.provider.name(),
                        "Action applied"
                    );
                    results.push(ActionResult {
                        action: action.clone(),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(
                        email_id = %email.id,
                        action = %action,
                        error = %e,
                        "Action failed, continuing with remaining actions"
                    );
                    results.push(ActionResult {
                        action: action.clone(),
                        error: Some(e),
                    });
                }
            }
        }

        let succeeded: Vec<Action> = results
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| r.action.clone())
            .collect();

        let record = if succeeded.is_empty() {
            None
        } else {
            let record = ApplicationRecord {
                id: Uuid::new_v4(),
                email_id: email.id.clone(),
                rule_set_id: set.id.clone(),
                rule_set_name: set.name.clone(),
                actions: succeeded,
                applied_at: Utc::now(),
            };
            self.store.log_application(&record).await?;
            info!(
                email_id = %email.id,
                rule_set = %set.name,
                applied = record.actions.len(),
                "Applied rule set"
            );
            Some(record)
        };

        Ok(ActionOutcome {
            email_id: email.id.clone(),
            rule_set_id: set.id.clone(),
            results,
            record,
        })
    }

    /// Execute one action through the provider, reflecting read-flag changes
    /// back into the store on success.
    async fn execute(&self, action: &Action, email: &EmailRecord) -> Result<(), ProviderError> {
        match action {
            Action::MarkRead => {
                self.provider.mark_read(&email.id).await?;
                if let Err(e) = self.store.set_read_flag(&email.id, true).await {
                    warn!(email_id = %email.id, error = %e, "Failed to update stored read flag");
                }
                Ok(())
            }
            Action::MarkUnread => {
                self.provider.mark_unread(&email.id).await?;
                if let Err(e) = self.store.set_read_flag(&email.id, false).await {
                    warn!(email_id = %email.id, error = %e, "Failed to update stored read flag");
                }
                Ok(())
            }
            Action::Move(label) => self.provider.move_to_label(&email.id, label).await,
            Action::Archive => self.provider.archive(&email.id).await,
            Action::Delete => self.provider.delete(&email.id).await,
        }
    }
}
