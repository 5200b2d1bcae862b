//! Rule sets — parsing, validation, and ALL/ANY evaluation.
//!
//! A rule document is JSON:
//!
//! ```json
//! {
//!   "id": "newsletter-sweep",
//!   "name": "File newsletters",
//!   "predicate": "ANY",
//!   "rules": [
//!     {"field": "from", "predicate": "contains", "value": "newsletter"},
//!     {"field": "subject", "predicate": "contains", "value": "unsubscribe"}
//!   ],
//!   "actions": ["mark_as_read", "move:Newsletters"]
//! }
//! ```
//!
//! A document may carry one rule set or a list of them. Everything is
//! validated when the document is loaded — unknown fields, predicates,
//! combinators, or actions and malformed comparison values reject the whole
//! document before any email is evaluated.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::engine::actions::Action;
use crate::engine::predicate::Predicate;
use crate::engine::types::{EmailRecord, FieldName};
use crate::error::{LoadError, RuleError};

// ── Rules ───────────────────────────────────────────────────────────

/// One field/predicate pair, validated at load time.
#[derive(Debug, Clone)]
pub struct Rule {
    pub field: FieldName,
    pub predicate: Predicate,
}

impl Rule {
    /// Evaluate this rule against one email.
    ///
    /// Failures propagate — a rule that cannot be evaluated is never a
    /// silent `false`.
    pub fn matches(&self, email: &EmailRecord, now: DateTime<Utc>) -> Result<bool, RuleError> {
        self.predicate.matches(&email.field(self.field), now)
    }
}

/// How multiple rule results fold into one verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Logical AND over all rules.
    All,
    /// Logical OR over all rules.
    Any,
}

impl FromStr for Combinator {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ALL" | "AND" => Ok(Combinator::All),
            "ANY" | "OR" => Ok(Combinator::Any),
            other => Err(LoadError::UnknownCombinator(other.to_string())),
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Combinator::All => "ALL",
            Combinator::Any => "ANY",
        })
    }
}

/// A named, validated rule set: rules folded by a combinator, plus the
/// actions to dispatch on a match. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub id: String,
    pub name: String,
    pub combinator: Combinator,
    pub rules: Vec<Rule>,
    pub actions: Vec<Action>,
}

impl RuleSet {
    /// Evaluate every rule and fold with the combinator.
    ///
    /// `All` short-circuits on the first false, `Any` on the first true, so
    /// rule order affects only how much work is done, never the verdict.
    /// A rule failure aborts the whole evaluation for this email.
    pub fn matches(&self, email: &EmailRecord, now: DateTime<Utc>) -> Result<bool, RuleError> {
        // Explicit vacuous-truth policy, not an accident of the fold.
        if self.rules.is_empty() {
            return Ok(self.combinator == Combinator::All);
        }

        match self.combinator {
            Combinator::All => {
                for rule in &self.rules {
                    if !rule.matches(email, now)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Combinator::Any => {
                for rule in &self.rules {
                    if rule.matches(email, now)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

// ── Document loading ────────────────────────────────────────────────

/// Raw rule as it appears in the JSON document.
#[derive(Debug, Deserialize)]
struct RuleSpec {
    field: String,
    predicate: String,
    value: String,
}

/// Raw rule set as it appears in the JSON document.
#[derive(Debug, Deserialize)]
struct RuleSetSpec {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    /// The combinator. Rule documents call this key `predicate`.
    #[serde(default)]
    predicate: Option<String>,
    #[serde(default)]
    rules: Vec<RuleSpec>,
    #[serde(default)]
    actions: Vec<String>,
}

/// A document holds one rule set or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Document {
    One(RuleSetSpec),
    Many(Vec<RuleSetSpec>),
}

impl RuleSet {
    fn from_spec(spec: RuleSetSpec) -> Result<Self, LoadError> {
        let id = spec
            .id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "unnamed_rule".to_string());
        let name = spec
            .name
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("Rule {id}"));

        let combinator = spec.predicate.as_deref().unwrap_or("ALL").parse()?;

        let rules = spec
            .rules
            .into_iter()
            .map(|r| {
                let field: FieldName = r.field.parse().map_err(LoadError::Rule)?;
                let predicate =
                    Predicate::parse(field, &r.predicate, &r.value).map_err(LoadError::Rule)?;
                Ok(Rule { field, predicate })
            })
            .collect::<Result<Vec<_>, LoadError>>()?;

        let actions = spec
            .actions
            .iter()
            .map(|a| Action::parse(a))
            .collect::<Result<Vec<_>, LoadError>>()?;

        Ok(RuleSet {
            id,
            name,
            combinator,
            rules,
            actions,
        })
    }
}

/// Parse rule sets out of a JSON document.
pub fn parse_rule_sets(json: &str) -> Result<Vec<RuleSet>, LoadError> {
    let document: Document = serde_json::from_str(json)?;
    let specs = match document {
        Document::One(spec) => vec![spec],
        Document::Many(specs) => specs,
    };
    specs.into_iter().map(RuleSet::from_spec).collect()
}

/// Load and validate rule sets from a file.
pub fn load_rule_sets(path: &Path) -> Result<Vec<RuleSet>, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound(path.display().to_string()));
    }
    let json = std::fs::read_to_string(path)?;
    parse_rule_sets(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::predicate::Predicate;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn make_email(from: &str, subject: &str) -> EmailRecord {
        EmailRecord {
            id: "msg-1".into(),
            thread_id: "thr-1".into(),
            from: from.into(),
            to: vec!["me@example.com".into()],
            subject: subject.into(),
            body: "hello".into(),
            received_at: now() - chrono::Duration::days(1),
            is_read: false,
            labels: vec!["INBOX".into()],
        }
    }

    fn rule(field: FieldName, token: &str, value: &str) -> Rule {
        Rule {
            field,
            predicate: Predicate::parse(field, token, value).unwrap(),
        }
    }

    /// A rule that errors if (and only if) it is evaluated: a date predicate
    /// paired with a text field, constructible only through the direct API.
    fn poison_rule() -> Rule {
        Rule {
            field: FieldName::Sender,
            predicate: Predicate::LessThanDaysAgo(7),
        }
    }

    fn set(combinator: Combinator, rules: Vec<Rule>) -> RuleSet {
        RuleSet {
            id: "test".into(),
            name: "Test set".into(),
            combinator,
            rules,
            actions: vec![],
        }
    }

    // ── Combinator folding ──────────────────────────────────────────

    #[test]
    fn empty_rules_all_is_vacuously_true() {
        let s = set(Combinator::All, vec![]);
        assert!(s.matches(&make_email("a@b.c", "x"), now()).unwrap());
    }

    #[test]
    fn empty_rules_any_is_vacuously_false() {
        let s = set(Combinator::Any, vec![]);
        assert!(!s.matches(&make_email("a@b.c", "x"), now()).unwrap());
    }

    #[test]
    fn all_requires_every_rule() {
        let s = set(
            Combinator::All,
            vec![
                rule(FieldName::Sender, "contains", "newsletter"),
                rule(FieldName::Subject, "contains", "sale"),
            ],
        );
        assert!(s
            .matches(&make_email("deals@newsletter.biz", "Big SALE today"), now())
            .unwrap());
        assert!(!s
            .matches(&make_email("deals@newsletter.biz", "Project update"), now())
            .unwrap());
    }

    #[test]
    fn any_requires_one_rule() {
        let s = set(
            Combinator::Any,
            vec![
                rule(FieldName::Sender, "contains", "newsletter"),
                rule(FieldName::Subject, "contains", "unsubscribe"),
            ],
        );
        assert!(s
            .matches(&make_email("deals@newsletter.biz", "Sale today"), now())
            .unwrap());
        assert!(!s
            .matches(&make_email("boss@company.com", "Project update"), now())
            .unwrap());
    }

    #[test]
    fn all_short_circuits_before_failing_rule() {
        // First rule is false; the poison rule after it must never run.
        let s = set(
            Combinator::All,
            vec![
                rule(FieldName::Sender, "contains", "no-such-sender"),
                poison_rule(),
            ],
        );
        let verdict = s.matches(&make_email("alice@example.com", "hi"), now());
        assert_eq!(verdict.unwrap(), false);
    }

    #[test]
    fn any_short_circuits_before_failing_rule() {
        let s = set(
            Combinator::Any,
            vec![
                rule(FieldName::Sender, "contains", "alice"),
                poison_rule(),
            ],
        );
        let verdict = s.matches(&make_email("alice@example.com", "hi"), now());
        assert_eq!(verdict.unwrap(), true);
    }

    #[test]
    fn rule_failure_aborts_the_set_not_a_false() {
        // Poison first: the set's evaluation must propagate the failure,
        // regardless of what later rules would say.
        let s = set(
            Combinator::Any,
            vec![
                poison_rule(),
                rule(FieldName::Sender, "contains", "alice"),
            ],
        );
        let err = s
            .matches(&make_email("alice@example.com", "hi"), now())
            .unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));
    }

    #[test]
    fn rule_order_does_not_change_verdict() {
        let forward = set(
            Combinator::All,
            vec![
                rule(FieldName::Sender, "contains", "newsletter"),
                rule(FieldName::Subject, "starts_with", "sale"),
            ],
        );
        let reversed = set(
            Combinator::All,
            vec![
                rule(FieldName::Subject, "starts_with", "sale"),
                rule(FieldName::Sender, "contains", "newsletter"),
            ],
        );
        for email in [
            make_email("deals@newsletter.biz", "Sale today"),
            make_email("deals@newsletter.biz", "Tuesday"),
            make_email("boss@company.com", "Sale today"),
        ] {
            assert_eq!(
                forward.matches(&email, now()).unwrap(),
                reversed.matches(&email, now()).unwrap()
            );
        }
    }

    // ── Document parsing ────────────────────────────────────────────

    const DOC: &str = r#"{
        "id": "newsletter-sweep",
        "name": "File newsletters",
        "predicate": "ANY",
        "rules": [
            {"field": "from", "predicate": "contains", "value": "newsletter"},
            {"field": "subject", "predicate": "contains", "value": "unsubscribe"}
        ],
        "actions": ["mark_as_read", "move:Newsletters"]
    }"#;

    #[test]
    fn parse_single_document() {
        let sets = parse_rule_sets(DOC).unwrap();
        assert_eq!(sets.len(), 1);
        let s = &sets[0];
        assert_eq!(s.id, "newsletter-sweep");
        assert_eq!(s.name, "File newsletters");
        assert_eq!(s.combinator, Combinator::Any);
        assert_eq!(s.rules.len(), 2);
        assert_eq!(s.rules[0].field, FieldName::Sender);
        assert_eq!(
            s.actions,
            vec![Action::MarkRead, Action::Move("Newsletters".into())]
        );
    }

    #[test]
    fn parse_document_list() {
        let json = format!("[{DOC}, {DOC}]");
        let sets = parse_rule_sets(&json).unwrap();
        assert_eq!(sets.len(), 2);
    }

    #[test]
    fn combinator_aliases_and_default() {
        for (token, expected) in [
            ("ALL", Combinator::All),
            ("and", Combinator::All),
            ("ANY", Combinator::Any),
            ("or", Combinator::Any),
        ] {
            let json = format!(r#"{{"predicate": "{token}", "rules": [], "actions": []}}"#);
            assert_eq!(parse_rule_sets(&json).unwrap()[0].combinator, expected);
        }
        // Missing combinator key defaults to ALL.
        let sets = parse_rule_sets(r#"{"rules": [], "actions": []}"#).unwrap();
        assert_eq!(sets[0].combinator, Combinator::All);
    }

    #[test]
    fn unknown_combinator_rejected() {
        let json = r#"{"predicate": "MOST", "rules": [], "actions": []}"#;
        assert!(matches!(
            parse_rule_sets(json).unwrap_err(),
            LoadError::UnknownCombinator(_)
        ));
    }

    #[test]
    fn missing_id_and_name_get_defaults() {
        let sets = parse_rule_sets(r#"{"predicate": "ALL", "rules": [], "actions": []}"#).unwrap();
        assert_eq!(sets[0].id, "unnamed_rule");
        assert_eq!(sets[0].name, "Rule unnamed_rule");
    }

    #[test]
    fn malformed_rule_value_rejects_document() {
        let json = r#"{
            "predicate": "ALL",
            "rules": [{"field": "received_at", "predicate": "less_than_days_ago", "value": "soon"}],
            "actions": ["archive"]
        }"#;
        assert!(matches!(
            parse_rule_sets(json).unwrap_err(),
            LoadError::Rule(RuleError::InvalidValue { .. })
        ));
    }

    #[test]
    fn unknown_field_rejects_document() {
        let json = r#"{
            "predicate": "ALL",
            "rules": [{"field": "cc", "predicate": "contains", "value": "x"}],
            "actions": []
        }"#;
        assert!(matches!(
            parse_rule_sets(json).unwrap_err(),
            LoadError::Rule(RuleError::UnknownField(_))
        ));
    }

    #[test]
    fn unknown_action_rejects_document() {
        let json = r#"{"predicate": "ALL", "rules": [], "actions": ["shred"]}"#;
        assert!(matches!(
            parse_rule_sets(json).unwrap_err(),
            LoadError::UnknownAction(_)
        ));
    }

    #[test]
    fn invalid_json_rejects_document() {
        assert!(matches!(
            parse_rule_sets("not json").unwrap_err(),
            LoadError::Json(_)
        ));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = load_rule_sets(Path::new("/nonexistent/rules.json")).unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound(_)));
    }
}
