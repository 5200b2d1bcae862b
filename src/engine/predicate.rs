//! Predicate evaluation for email field matching.
//!
//! Predicates are closed tagged variants, one per comparison kind. Wire tokens
//! and comparison values are validated when a rule document is loaded —
//! an unparseable day count, calendar date, or regex pattern rejects the rule
//! up front, never mid-run. Matching itself is infallible apart from the
//! text/timestamp class check.
//!
//! All string comparisons are case-insensitive. Date predicates compare
//! against a `now` captured once per run and threaded in explicitly, so a
//! batch sees one consistent cutoff and tests stay deterministic.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::{Regex, RegexBuilder};

use crate::engine::types::{FieldName, FieldValue};
use crate::error::RuleError;

/// A compiled comparison between a field value and the rule's value.
#[derive(Debug, Clone)]
pub enum Predicate {
    // String family — case-insensitive.
    Contains(String),
    DoesNotContain(String),
    Equals(String),
    DoesNotEqual(String),
    StartsWith(String),
    EndsWith(String),
    /// Unanchored, case-insensitive pattern, compiled at load time.
    Matches(Regex),

    // Date family — evaluated against the run's `now`.
    /// received_at is strictly after now − N days.
    LessThanDaysAgo(i64),
    /// received_at is strictly before now − N days.
    GreaterThanDaysAgo(i64),
    /// Calendar-date equality; time of day is ignored.
    EqualsDate(NaiveDate),
    /// Full instant comparison.
    BeforeDate(DateTime<Utc>),
    /// Full instant comparison.
    AfterDate(DateTime<Utc>),
}

/// Wire token, before field-class resolution. `equals` is ambiguous between
/// the string and date families; the rule's field decides.
enum Token {
    Contains,
    DoesNotContain,
    Equals,
    DoesNotEqual,
    StartsWith,
    EndsWith,
    Regex,
    LessThanDays,
    GreaterThanDays,
    EqualsDate,
    BeforeDate,
    AfterDate,
}

impl Token {
    fn parse(raw: &str) -> Result<Self, RuleError> {
        // Multi-word tokens may be spelled with spaces in rule documents.
        let norm = raw.trim().to_lowercase().replace(' ', "_");
        match norm.as_str() {
            "contains" => Ok(Token::Contains),
            "does_not_contain" => Ok(Token::DoesNotContain),
            "equals" => Ok(Token::Equals),
            "does_not_equal" => Ok(Token::DoesNotEqual),
            "starts_with" => Ok(Token::StartsWith),
            "ends_with" => Ok(Token::EndsWith),
            "regex_match" | "matches" => Ok(Token::Regex),
            "less_than" | "less_than_days_ago" => Ok(Token::LessThanDays),
            "greater_than" | "greater_than_days_ago" => Ok(Token::GreaterThanDays),
            "equals_date" => Ok(Token::EqualsDate),
            "before" | "before_date" => Ok(Token::BeforeDate),
            "after" | "after_date" => Ok(Token::AfterDate),
            _ => Err(RuleError::UnknownPredicate(raw.trim().to_string())),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Token::Contains => "contains",
            Token::DoesNotContain => "does_not_contain",
            Token::Equals => "equals",
            Token::DoesNotEqual => "does_not_equal",
            Token::StartsWith => "starts_with",
            Token::EndsWith => "ends_with",
            Token::Regex => "regex_match",
            Token::LessThanDays => "less_than_days_ago",
            Token::GreaterThanDays => "greater_than_days_ago",
            Token::EqualsDate => "equals_date",
            Token::BeforeDate => "before_date",
            Token::AfterDate => "after_date",
        }
    }

    fn is_date(&self) -> bool {
        matches!(
            self,
            Token::LessThanDays
                | Token::GreaterThanDays
                | Token::EqualsDate
                | Token::BeforeDate
                | Token::AfterDate
        )
    }
}

impl Predicate {
    /// Parse and validate a wire-level predicate in the context of its field.
    ///
    /// Everything that can go wrong with a rule surfaces here, at load time:
    /// unknown tokens, a predicate family that doesn't fit the field, and
    /// comparison values that don't parse for their predicate.
    pub fn parse(field: FieldName, token: &str, value: &str) -> Result<Self, RuleError> {
        let token = Token::parse(token)?;

        // `equals` on the received timestamp is the calendar-date comparison.
        let token = match (token, field.is_date()) {
            (Token::Equals, true) => Token::EqualsDate,
            (t, true) if !t.is_date() => {
                return Err(RuleError::TypeMismatch {
                    predicate: t.name(),
                    value_kind: "timestamp",
                });
            }
            (t, false) if t.is_date() => {
                return Err(RuleError::TypeMismatch {
                    predicate: t.name(),
                    value_kind: "text",
                });
            }
            (t, _) => t,
        };

        match token {
            Token::Contains => Ok(Predicate::Contains(value.to_string())),
            Token::DoesNotContain => Ok(Predicate::DoesNotContain(value.to_string())),
            Token::Equals => Ok(Predicate::Equals(value.to_string())),
            Token::DoesNotEqual => Ok(Predicate::DoesNotEqual(value.to_string())),
            Token::StartsWith => Ok(Predicate::StartsWith(value.to_string())),
            Token::EndsWith => Ok(Predicate::EndsWith(value.to_string())),
            Token::Regex => RegexBuilder::new(value)
                .case_insensitive(true)
                .build()
                .map(Predicate::Matches)
                .map_err(|e| RuleError::InvalidValue {
                    predicate: "regex_match",
                    value: value.to_string(),
                    reason: e.to_string(),
                }),
            Token::LessThanDays => parse_days(token.name(), value).map(Predicate::LessThanDaysAgo),
            Token::GreaterThanDays => {
                parse_days(token.name(), value).map(Predicate::GreaterThanDaysAgo)
            }
            Token::EqualsDate => parse_calendar_date(value)
                .map(Predicate::EqualsDate)
                .ok_or_else(|| invalid_date("equals_date", value)),
            Token::BeforeDate => parse_instant(value)
                .map(Predicate::BeforeDate)
                .ok_or_else(|| invalid_date("before_date", value)),
            Token::AfterDate => parse_instant(value)
                .map(Predicate::AfterDate)
                .ok_or_else(|| invalid_date("after_date", value)),
        }
    }

    /// Canonical predicate name, for logging and error context.
    pub fn name(&self) -> &'static str {
        match self {
            Predicate::Contains(_) => "contains",
            Predicate::DoesNotContain(_) => "does_not_contain",
            Predicate::Equals(_) => "equals",
            Predicate::DoesNotEqual(_) => "does_not_equal",
            Predicate::StartsWith(_) => "starts_with",
            Predicate::EndsWith(_) => "ends_with",
            Predicate::Matches(_) => "regex_match",
            Predicate::LessThanDaysAgo(_) => "less_than_days_ago",
            Predicate::GreaterThanDaysAgo(_) => "greater_than_days_ago",
            Predicate::EqualsDate(_) => "equals_date",
            Predicate::BeforeDate(_) => "before_date",
            Predicate::AfterDate(_) => "after_date",
        }
    }

    /// Evaluate this predicate against a field value.
    ///
    /// A date predicate handed text (or a string predicate handed a
    /// timestamp) fails with a type mismatch — never a silent coercion.
    pub fn matches(&self, value: &FieldValue<'_>, now: DateTime<Utc>) -> Result<bool, RuleError> {
        match self {
            Predicate::Contains(needle) => {
                self.text(value).map(|s| fold(s).contains(&fold(needle)))
            }
            Predicate::DoesNotContain(needle) => {
                self.text(value).map(|s| !fold(s).contains(&fold(needle)))
            }
            Predicate::Equals(expected) => self.text(value).map(|s| fold(s) == fold(expected)),
            Predicate::DoesNotEqual(expected) => {
                self.text(value).map(|s| fold(s) != fold(expected))
            }
            Predicate::StartsWith(prefix) => {
                self.text(value).map(|s| fold(s).starts_with(&fold(prefix)))
            }
            Predicate::EndsWith(suffix) => {
                self.text(value).map(|s| fold(s).ends_with(&fold(suffix)))
            }
            Predicate::Matches(regex) => self.text(value).map(|s| regex.is_match(s)),
            Predicate::LessThanDaysAgo(days) => self
                .timestamp(value)
                .map(|ts| ts > now - Duration::days(*days)),
            Predicate::GreaterThanDaysAgo(days) => self
                .timestamp(value)
                .map(|ts| ts < now - Duration::days(*days)),
            Predicate::EqualsDate(date) => self.timestamp(value).map(|ts| ts.date_naive() == *date),
            Predicate::BeforeDate(cutoff) => self.timestamp(value).map(|ts| ts < *cutoff),
            Predicate::AfterDate(cutoff) => self.timestamp(value).map(|ts| ts > *cutoff),
        }
    }

    fn text<'a>(&self, value: &FieldValue<'a>) -> Result<&'a str, RuleError> {
        match value {
            FieldValue::Text(s) => Ok(s),
            other => Err(RuleError::TypeMismatch {
                predicate: self.name(),
                value_kind: other.kind(),
            }),
        }
    }

    fn timestamp(&self, value: &FieldValue<'_>) -> Result<DateTime<Utc>, RuleError> {
        match value {
            FieldValue::Timestamp(ts) => Ok(*ts),
            other => Err(RuleError::TypeMismatch {
                predicate: self.name(),
                value_kind: other.kind(),
            }),
        }
    }
}

/// Case-fold for comparison.
fn fold(s: &str) -> String {
    s.to_lowercase()
}

fn parse_days(predicate: &'static str, value: &str) -> Result<i64, RuleError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|e| RuleError::InvalidValue {
            predicate,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn invalid_date(predicate: &'static str, value: &str) -> RuleError {
    RuleError::InvalidValue {
        predicate,
        value: value.to_string(),
        reason: "unrecognized date format".into(),
    }
}

/// Parse an absolute instant. Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`,
/// and bare dates (taken as midnight UTC).
fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    parse_calendar_date(value)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

/// Parse a calendar date. Accepts `YYYY-MM-DD`, `MM/DD/YYYY`, or any full
/// instant format (the time of day is dropped).
fn parse_calendar_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%m/%d/%Y") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.date());
    }
    None
}
