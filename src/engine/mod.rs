//! The rule engine.
//!
//! A batch of stored emails flows through:
//! 1. [`rules::RuleSet`] evaluation — per-field predicates folded ALL/ANY
//! 2. [`actions::ActionDispatcher`] — provider calls for each matched set
//! 3. [`runner::Engine`] — per-email isolation, stats, application records
//!
//! Rule documents are fully validated at load time; nothing about a rule can
//! fail mid-run except the provider itself.

pub mod actions;
pub mod predicate;
pub mod rules;
pub mod runner;
pub mod types;

pub use actions::{Action, ActionDispatcher, ActionOutcome, ApplicationRecord};
pub use predicate::Predicate;
pub use rules::{load_rule_sets, parse_rule_sets, Combinator, Rule, RuleSet};
pub use runner::{preview, preview_at, Engine, PreviewReport, RunReport, RunStats};
pub use types::{EmailRecord, FieldName, FieldValue};
