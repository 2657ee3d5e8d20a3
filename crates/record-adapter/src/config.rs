//! Adapter configuration
//!
//! Passed to [`crate::RecordAdapter::new`] at construction time; nothing is
//! read from global state afterwards.

use std::time::Duration;

use crate::error::{AdapterError, AdapterResult};
use crate::id::{DEFAULT_ID_LENGTH, MAX_ID_LENGTH};

/// Database opened when no name is configured
pub const DEFAULT_DATABASE_NAME: &str = "IDBAdapter";

/// How transaction-level error/abort events affect an operation's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionPolicy {
    /// Log the event and settle from the request outcome alone.
    ///
    /// A write can report success while its transaction later aborts and the
    /// data never persists.
    #[default]
    LogOnly,
    /// Reject write operations whose transaction errors or aborts.
    Strict,
}

/// Configuration for a [`crate::RecordAdapter`]
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Name of the database every operation opens
    pub database_name: String,
    /// Length of generated record ids
    pub id_length: usize,
    /// Records whose relationships may load at the same time in a batch
    pub relationship_concurrency: usize,
    /// Treatment of transaction error/abort events
    pub transaction_policy: TransactionPolicy,
    /// Optional deadline for a whole operation (none by default)
    pub request_timeout: Option<Duration>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            id_length: DEFAULT_ID_LENGTH,
            relationship_concurrency: 1,
            transaction_policy: TransactionPolicy::LogOnly,
            request_timeout: None,
        }
    }
}

impl AdapterConfig {
    /// Create a configuration for the named database
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            ..Self::default()
        }
    }

    /// Set the generated id length
    pub fn with_id_length(mut self, len: usize) -> Self {
        self.id_length = len;
        self
    }

    /// Set how many records of a batch may resolve relationships at once
    pub fn with_relationship_concurrency(mut self, limit: usize) -> Self {
        self.relationship_concurrency = limit;
        self
    }

    /// Set the transaction policy
    pub fn with_transaction_policy(mut self, policy: TransactionPolicy) -> Self {
        self.transaction_policy = policy;
        self
    }

    /// Set a per-operation timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - RECORD_ADAPTER_DATABASE (optional, default: "IDBAdapter")
    /// - RECORD_ADAPTER_ID_LENGTH (optional, default: 5)
    /// - RECORD_ADAPTER_STRICT_TX (optional, default: "false"; also 1/0, yes/no, on/off)
    /// - RECORD_ADAPTER_TIMEOUT_MS (optional, no timeout when unset)
    pub fn from_env() -> AdapterResult<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("RECORD_ADAPTER_DATABASE") {
            config.database_name = name;
        }
        if let Ok(len) = std::env::var("RECORD_ADAPTER_ID_LENGTH") {
            config.id_length = len.parse().map_err(|_| {
                AdapterError::Config(format!("RECORD_ADAPTER_ID_LENGTH is not a number: {}", len))
            })?;
        }
        if let Ok(strict) = std::env::var("RECORD_ADAPTER_STRICT_TX") {
            if parse_flag("RECORD_ADAPTER_STRICT_TX", &strict)? {
                config.transaction_policy = TransactionPolicy::Strict;
            }
        }
        if let Ok(ms) = std::env::var("RECORD_ADAPTER_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                AdapterError::Config(format!("RECORD_ADAPTER_TIMEOUT_MS is not a number: {}", ms))
            })?;
            config.request_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> AdapterResult<()> {
        if self.database_name.is_empty() {
            return Err(AdapterError::Config("database name is empty".to_string()));
        }
        if self.id_length == 0 || self.id_length > MAX_ID_LENGTH {
            return Err(AdapterError::Config(format!(
                "id length must be between 1 and {}, got {}",
                MAX_ID_LENGTH, self.id_length
            )));
        }
        if self.relationship_concurrency == 0 {
            return Err(AdapterError::Config(
                "relationship concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read a boolean environment value (`true/1/yes/on`, `false/0/no/off`).
fn parse_flag(name: &str, value: &str) -> AdapterResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(AdapterError::Config(format!(
            "{} must be true or false, got '{}'",
            name, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_preserve_serial_log_only_behaviour() {
        let config = AdapterConfig::default();
        assert_eq!(config.database_name, "IDBAdapter");
        assert_eq!(config.id_length, 5);
        assert_eq!(config.relationship_concurrency, 1);
        assert_eq!(config.transaction_policy, TransactionPolicy::LogOnly);
        assert!(config.request_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        assert!(AdapterConfig::new("").validate().is_err());
        assert!(AdapterConfig::default().with_id_length(0).validate().is_err());
        assert!(AdapterConfig::default()
            .with_id_length(MAX_ID_LENGTH + 1)
            .validate()
            .is_err());
        assert!(AdapterConfig::default()
            .with_relationship_concurrency(0)
            .validate()
            .is_err());
    }

    #[test]
    fn builder_setters_apply() {
        let config = AdapterConfig::new("library")
            .with_id_length(8)
            .with_transaction_policy(TransactionPolicy::Strict)
            .with_request_timeout(Duration::from_millis(250));
        assert_eq!(config.database_name, "library");
        assert_eq!(config.id_length, 8);
        assert_eq!(config.transaction_policy, TransactionPolicy::Strict);
        assert_eq!(config.request_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn flags_accept_common_spellings() {
        for yes in ["true", "TRUE", "1", "yes", "on"] {
            assert!(parse_flag("FLAG", yes).unwrap(), "{yes}");
        }
        for no in ["false", "0", "no", "off", ""] {
            assert!(!parse_flag("FLAG", no).unwrap(), "{no}");
        }
        let err = parse_flag("FLAG", "sometimes").unwrap_err();
        assert!(matches!(err, AdapterError::Config(_)));
    }
}
