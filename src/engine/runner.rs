//! Engine orchestrator — drives rule-set evaluation and action dispatch
//! over a batch of stored emails.
//!
//! Each email is processed independently: an evaluation or dispatch failure
//! is counted and logged, and the run continues with the next email. "Now"
//! is captured once per run so every date predicate in a batch sees the same
//! cutoff, making a run deterministic for a fixed input.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::engine::actions::{ActionDispatcher, ApplicationRecord};
use crate::engine::rules::RuleSet;
use crate::engine::types::EmailRecord;
use crate::error::{Error, EvalError};
use crate::provider::MailProvider;
use crate::store::EmailStore;

/// Aggregated statistics for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Emails seen.
    pub processed: u64,
    /// Emails whose rule set matched.
    pub matched: u64,
    /// Individual actions applied successfully.
    pub actions_applied: u64,
    /// Emails with an evaluation failure, a bookkeeping failure, or at
    /// least one failed action.
    pub failed: u64,
}

/// Everything a run produced: statistics, the application records written,
/// and the per-email failures that were isolated along the way.
#[derive(Debug)]
pub struct RunReport {
    pub stats: RunStats,
    pub records: Vec<ApplicationRecord>,
    /// (email id, failure) pairs. Failures are isolated, never silent.
    pub failures: Vec<(String, Error)>,
}

/// Result of a dry run: which emails would match, with nothing dispatched.
#[derive(Debug)]
pub struct PreviewReport {
    pub stats: RunStats,
    pub matched_ids: Vec<String>,
}

/// The rule engine: evaluation plus dispatch over a batch.
pub struct Engine {
    dispatcher: ActionDispatcher,
}

impl Engine {
    pub fn new(provider: Arc<dyn MailProvider>, store: Arc<dyn EmailStore>) -> Self {
        Self {
            dispatcher: ActionDispatcher::new(provider, store),
        }
    }

    /// Run one rule set over a batch, capturing "now" at the start.
    pub async fn run(&self, set: &RuleSet, emails: &[EmailRecord]) -> RunReport {
        self.run_at(set, emails, Utc::now()).await
    }

    /// Run one rule set over a batch against an explicit "now".
    pub async fn run_at(
        &self,
        set: &RuleSet,
        emails: &[EmailRecord],
        now: DateTime<Utc>,
    ) -> RunReport {
        info!(
            rule_set = %set.name,
            combinator = %set.combinator,
            emails = emails.len(),
            "Starting rule application run"
        );

        let mut stats = RunStats::default();
        let mut records = Vec::new();
        let mut failures = Vec::new();
        // Run-scoped accumulator: (email, rule set) pairs already applied.
        let mut applied: HashSet<(String, String)> = HashSet::new();

        for email in emails {
            stats.processed += 1;

            let key = (email.id.clone(), set.id.clone());
            if applied.contains(&key) {
                debug!(
                    email_id = %email.id,
                    rule_set = %set.id,
                    "Already applied in this run, skipping"
                );
                continue;
            }

            match set.matches(email, now) {
                Ok(false) => {
                    debug!(email_id = %email.id, rule_set = %set.id, "No match");
                }
                Ok(true) => {
                    stats.matched += 1;
                    match self.dispatcher.apply(set, email).await {
                        Ok(outcome) => {
                            stats.actions_applied += outcome.applied() as u64;
                            if !outcome.fully_applied() {
                                stats.failed += 1;
                            }
                            if let Some(record) = outcome.record {
                                applied.insert(key);
                                records.push(record);
                            }
                        }
                        Err(e) => {
                            stats.failed += 1;
                            error!(
                                email_id = %email.id,
                                error = %e,
                                "Failed to record rule application"
                            );
                            failures.push((email.id.clone(), Error::Database(e)));
                        }
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    let e = EvalError {
                        email_id: email.id.clone(),
                        source: e,
                    };
                    error!(error = %e, "Rule evaluation failed, continuing with next email");
                    failures.push((e.email_id.clone(), Error::Eval(e)));
                }
            }
        }

        info!(
            processed = stats.processed,
            matched = stats.matched,
            actions_applied = stats.actions_applied,
            failed = stats.failed,
            "Run complete"
        );

        RunReport {
            stats,
            records,
            failures,
        }
    }

    /// Apply several rule sets over one batch, sequentially and
    /// independently, under a single "now". Returns one report per set,
    /// keyed by the set's id.
    pub async fn run_all(
        &self,
        sets: &[RuleSet],
        emails: &[EmailRecord],
    ) -> Vec<(String, RunReport)> {
        let now = Utc::now();
        let mut reports = Vec::with_capacity(sets.len());
        for set in sets {
            let report = self.run_at(set, emails, now).await;
            reports.push((set.id.clone(), report));
        }
        reports
    }
}

/// Evaluate a rule set over a batch without dispatching anything.
///
/// Needs no provider or store — this is what `--dry-run` uses.
pub fn preview(set: &RuleSet, emails: &[EmailRecord]) -> PreviewReport {
    preview_at(set, emails, Utc::now())
}

/// Dry-run evaluation against an explicit "now".
pub fn preview_at(set: &RuleSet, emails: &[EmailRecord], now: DateTime<Utc>) -> PreviewReport {
    let mut stats = RunStats::default();
    let mut matched_ids = Vec::new();

    for email in emails {
        stats.processed += 1;
        match set.matches(email, now) {
            Ok(true) => {
                stats.matched += 1;
                matched_ids.push(email.id.clone());
            }
            Ok(false) => {}
            Err(e) => {
                stats.failed += 1;
                let e = EvalError {
                    email_id: email.id.clone(),
                    source: e,
                };
                error!(error = %e, "Rule evaluation failed during preview");
            }
        }
    }

    PreviewReport { stats, matched_ids }
}
