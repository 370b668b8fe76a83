//! Engine configuration.

use std::time::Duration;

/// Configuration for the block-production engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded wait applied to every backend call. A backend that does not
    /// answer within this window is marked unreachable.
    /// Default: 10 seconds.
    pub call_timeout: Duration,

    /// When true, broadcast calls require byte-for-byte equal responses
    /// from every backend and abort the round on any discrepancy. A
    /// diagnostic for catching non-deterministic applications, not a
    /// protocol requirement. Default: false.
    pub cross_check_responses: bool,

    /// Maximum total size of a block's transactions in bytes; -1 means
    /// unlimited. There is no mempool to pick transactions from, so the
    /// default is unlimited. Default: -1.
    pub max_block_bytes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            cross_check_responses: false,
            max_block_bytes: -1,
        }
    }
}

impl EngineConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout.is_zero() {
            return Err(ConfigError::ZeroCallTimeout);
        }
        if self.max_block_bytes < -1 {
            return Err(ConfigError::InvalidMaxBlockBytes(self.max_block_bytes));
        }
        Ok(())
    }
}

/// Errors in engine configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("call_timeout must be > 0")]
    ZeroCallTimeout,
    #[error("max_block_bytes must be -1 (unlimited) or non-negative, got {0}")]
    InvalidMaxBlockBytes(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_block_bytes, -1);
        assert!(!config.cross_check_responses);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig {
            call_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroCallTimeout)
        ));
    }

    #[test]
    fn test_invalid_max_block_bytes_rejected() {
        let config = EngineConfig {
            max_block_bytes: -2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMaxBlockBytes(-2))
        ));
    }
}
