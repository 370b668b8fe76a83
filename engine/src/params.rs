//! Consensus parameters and their delayed-update rules.
//!
//! Parameter changes returned by FinalizeBlock at height H take effect at
//! height H+1; the state-transition function records the change height.
//! Updates are partial: absent fields leave the current value untouched.

use {
    crate::error::{EngineError, Result},
    chainmock_abci::types::ConsensusParamUpdates,
};

/// The public-key algorithm every validator in this emulator uses.
pub const ED25519: &str = "ed25519";

/// Limits on block contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockParams {
    /// Maximum total block size in bytes; -1 = unlimited.
    pub max_bytes: i64,
}

/// Restrictions on validator updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorParams {
    /// Public-key algorithms accepted in validator updates.
    pub pub_key_types: Vec<String>,
}

/// Parameters governing the application-consensus interface itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbciParams {
    /// First height at which precommits must carry vote extensions;
    /// 0 disables extensions entirely.
    pub vote_extensions_enable_height: u64,
}

/// The full consensus parameter set carried in the chain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusParams {
    pub block: BlockParams,
    pub validator: ValidatorParams,
    pub abci: AbciParams,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            block: BlockParams { max_bytes: -1 },
            validator: ValidatorParams {
                pub_key_types: vec![ED25519.to_string()],
            },
            abci: AbciParams {
                vote_extensions_enable_height: 0,
            },
        }
    }
}

impl ConsensusParams {
    /// Whether vote extensions are active at the given height.
    pub fn vote_extensions_enabled(&self, height: u64) -> bool {
        let enable = self.abci.vote_extensions_enable_height;
        enable != 0 && height >= enable
    }

    /// Whether the given public-key algorithm is accepted for validators.
    pub fn is_valid_pub_key_type(&self, key_type: &str) -> bool {
        self.validator
            .pub_key_types
            .iter()
            .any(|t| t == key_type)
    }

    /// Apply a partial update, returning the new parameter set.
    /// The receiver is never mutated.
    pub fn update(&self, updates: &ConsensusParamUpdates) -> ConsensusParams {
        let mut next = self.clone();
        if let Some(block) = &updates.block {
            next.block.max_bytes = block.max_bytes;
        }
        if let Some(validator) = &updates.validator {
            next.validator.pub_key_types = validator.pub_key_types.clone();
        }
        if let Some(abci) = &updates.abci {
            next.abci.vote_extensions_enable_height = abci.vote_extensions_enable_height;
        }
        next
    }

    /// Express the full parameter set as an update, for InitChain requests.
    pub fn as_updates(&self) -> ConsensusParamUpdates {
        ConsensusParamUpdates {
            block: Some(chainmock_abci::types::BlockParamUpdates {
                max_bytes: self.block.max_bytes,
            }),
            validator: Some(chainmock_abci::types::ValidatorParamUpdates {
                pub_key_types: self.validator.pub_key_types.clone(),
            }),
            abci: Some(chainmock_abci::types::AbciParamUpdates {
                vote_extensions_enable_height: self.abci.vote_extensions_enable_height,
            }),
        }
    }

    /// Basic sanity checks after an update has been applied.
    pub fn validate_basic(&self) -> Result<()> {
        if self.block.max_bytes < -1 {
            return Err(EngineError::InvalidConsensusParams(format!(
                "block.max_bytes must be -1 or non-negative, got {}",
                self.block.max_bytes
            )));
        }
        if self.validator.pub_key_types.is_empty() {
            return Err(EngineError::InvalidConsensusParams(
                "validator.pub_key_types must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chainmock_abci::types::{AbciParamUpdates, BlockParamUpdates},
    };

    #[test]
    fn test_extensions_disabled_by_default() {
        let params = ConsensusParams::default();
        assert!(!params.vote_extensions_enabled(1));
        assert!(!params.vote_extensions_enabled(1000));
    }

    #[test]
    fn test_extensions_enabled_from_height() {
        let mut params = ConsensusParams::default();
        params.abci.vote_extensions_enable_height = 5;
        assert!(!params.vote_extensions_enabled(4));
        assert!(params.vote_extensions_enabled(5));
        assert!(params.vote_extensions_enabled(6));
    }

    #[test]
    fn test_update_is_partial() {
        let params = ConsensusParams::default();
        let updated = params.update(&ConsensusParamUpdates {
            block: Some(BlockParamUpdates { max_bytes: 1024 }),
            validator: None,
            abci: None,
        });
        assert_eq!(updated.block.max_bytes, 1024);
        assert_eq!(updated.validator, params.validator);
        assert_eq!(updated.abci, params.abci);
        // Original untouched.
        assert_eq!(params.block.max_bytes, -1);
    }

    #[test]
    fn test_update_abci_params() {
        let params = ConsensusParams::default();
        let updated = params.update(&ConsensusParamUpdates {
            block: None,
            validator: None,
            abci: Some(AbciParamUpdates {
                vote_extensions_enable_height: 3,
            }),
        });
        assert!(updated.vote_extensions_enabled(3));
    }

    #[test]
    fn test_validate_rejects_empty_key_types() {
        let mut params = ConsensusParams::default();
        params.validator.pub_key_types.clear();
        assert!(params.validate_basic().is_err());
    }

    #[test]
    fn test_pub_key_type_check() {
        let params = ConsensusParams::default();
        assert!(params.is_valid_pub_key_type(ED25519));
        assert!(!params.is_valid_pub_key_type("secp256k1"));
    }
}
