//! Configuration, built from environment variables.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::provider::GmailConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the local database file.
    pub db_path: PathBuf,
    /// Default rules document, used when `apply` is not given one.
    pub rules_file: PathBuf,
    /// Cap on messages fetched per `fetch` invocation.
    pub max_fetch: usize,
    /// Optional log file; stderr-only when unset.
    pub log_file: Option<PathBuf>,
    /// Port for the status API.
    pub web_port: u16,
    /// Gmail bearer token. Only commands that talk to the provider need it.
    pub gmail_token: Option<SecretString>,
    /// Gmail API base URL override (for testing against a stub).
    pub gmail_api_base: Option<String>,
}

impl Config {
    /// Build config from environment variables, with defaults for anything
    /// unset.
    pub fn from_env() -> Self {
        let db_path = std::env::var("MAILRULES_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/mailrules.db"));

        let rules_file = std::env::var("MAILRULES_RULES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("rules.json"));

        let max_fetch: usize = std::env::var("MAILRULES_MAX_FETCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let log_file = std::env::var("MAILRULES_LOG_FILE").ok().map(PathBuf::from);

        let web_port: u16 = std::env::var("MAILRULES_WEB_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);

        let gmail_token = std::env::var("GMAIL_ACCESS_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let gmail_api_base = std::env::var("GMAIL_API_BASE").ok();

        Self {
            db_path,
            rules_file,
            max_fetch,
            log_file,
            web_port,
            gmail_token,
            gmail_api_base,
        }
    }

    /// Validate settings that every command depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_fetch == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILRULES_MAX_FETCH".into(),
                message: "must be greater than 0".into(),
            });
        }
        if let Some(parent) = self.log_file.as_ref().and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Build the Gmail client config. Fails when no token is configured —
    /// only the commands that reach the provider call this.
    pub fn gmail_config(&self) -> Result<GmailConfig, ConfigError> {
        let token = self
            .gmail_token
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("GMAIL_ACCESS_TOKEN".into()))?;
        let mut config = GmailConfig::new(token);
        if let Some(base) = &self.gmail_api_base {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/mailrules.db"),
            rules_file: PathBuf::from("rules.json"),
            max_fetch: 100,
            log_file: None,
            web_port: 5000,
            gmail_token: None,
            gmail_api_base: None,
        }
    }
}
