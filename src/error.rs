//! Error types for mailrules.

use uuid::Uuid;

/// Top-level error type for the application.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule document rejected: {0}")]
    Load(#[from] LoadError),

    #[error("Rule evaluation failed: {0}")]
    Eval(#[from] EvalError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in the construction or evaluation of a single rule.
///
/// All variants are detected eagerly when a rule document is loaded;
/// `TypeMismatch` can additionally surface at evaluation time if a predicate
/// is handed a field value of the wrong kind through the direct API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleError {
    #[error("Unknown field: {0:?}")]
    UnknownField(String),

    #[error("Unknown predicate: {0:?}")]
    UnknownPredicate(String),

    #[error("Predicate `{predicate}` cannot apply to {value_kind} value")]
    TypeMismatch {
        predicate: &'static str,
        value_kind: &'static str,
    },

    #[error("Invalid comparison value for `{predicate}`: {value:?} ({reason})")]
    InvalidValue {
        predicate: &'static str,
        value: String,
        reason: String,
    },
}

/// Fatal errors loading a rule document. Nothing is evaluated after one of
/// these — the whole run is aborted.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Rules file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in rules document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid rule: {0}")]
    Rule(#[from] RuleError),

    #[error("Unknown combinator: {0:?} (expected ALL or ANY)")]
    UnknownCombinator(String),

    #[error("Unknown action: {0:?}")]
    UnknownAction(String),

    #[error("Action `move` requires a non-empty label")]
    EmptyMoveLabel,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A rule failure during a run, carrying the email it occurred against.
/// Isolated per email: the orchestrator records it and moves on.
#[derive(Debug, thiserror::Error)]
#[error("email {email_id}: {source}")]
pub struct EvalError {
    pub email_id: String,
    #[source]
    pub source: RuleError,
}

/// Mail provider client errors. Authentication and transport failures both
/// land here — the dispatcher only distinguishes success from failure.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provider API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode message payload: {0}")]
    Decode(String),

    #[error("Label {name:?} unavailable: {reason}")]
    Label { name: String, reason: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Application record {0} could not be written")]
    RecordWrite(Uuid),
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, Error>;
