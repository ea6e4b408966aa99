//! Runtime configuration for the relationship core.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tunables shared by the service, the paginator and the context tracker.
///
/// Every field has a default, so a partial JSON document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Idle timeout handed to the edit-context store.
    pub edit_context_ttl_secs: u64,
    /// Page size when the caller passes no `first`.
    pub default_page_size: usize,
    /// Upper bound on `first`.
    pub max_page_size: usize,
    /// Per-subscriber buffer of the notification bus. Slower subscribers
    /// drop the oldest events.
    pub bus_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            edit_context_ttl_secs: 30 * 60,
            default_page_size: 25,
            max_page_size: 500,
            bus_capacity: 1024,
        }
    }
}

impl CoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.edit_context_ttl_secs == 0 {
            return Err(Error::Config("edit_context_ttl_secs must be positive".into()));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(Error::Config("page sizes must be positive".into()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(Error::Config(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.bus_capacity == 0 {
            return Err(Error::Config("bus_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn edit_context_ttl(&self) -> Duration {
        Duration::from_secs(self.edit_context_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CoreConfig::from_json_str(r#"{"default_page_size": 10}"#).unwrap();
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.max_page_size, 500);
        assert_eq!(config.edit_context_ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn test_inconsistent_page_sizes_rejected() {
        let err = CoreConfig::from_json_str(r#"{"default_page_size": 50, "max_page_size": 10}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = CoreConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
