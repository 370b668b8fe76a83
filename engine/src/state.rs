//! Chain state and the state-transition function.
//!
//! Exactly one live [`ChainState`] exists per engine; it is only replaced
//! inside the engine's critical section by the output of [`next_state`].
//! Validator-set changes take effect two heights after the block that
//! returned them, consensus-param changes one height after; proposer
//! priority advances every height regardless.

use {
    crate::{
        error::{EngineError, Result},
        evidence::{evidence_hash, Evidence},
        params::ConsensusParams,
        types::{txs_hash, Block, BlockId, Header, Tx},
        validator_set::ValidatorSet,
        vote::Commit,
    },
    chainmock_abci::types::{ExecTxResult, ResponseFinalizeBlock, ResponseInitChain, ValidatorUpdate},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
};

/// The genesis document the engine is constructed from.
#[derive(Debug, Clone)]
pub struct Genesis {
    pub chain_id: String,
    pub initial_height: u64,
    pub genesis_time_ms: i64,
    pub validators: Vec<(Pubkey, u64)>,
    pub consensus_params: ConsensusParams,
    /// Raw application genesis state, forwarded in InitChain.
    pub app_state: Vec<u8>,
}

/// The latest committed chain state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainState {
    pub chain_id: String,
    pub initial_height: u64,
    pub last_block_height: u64,
    pub last_block_id: BlockId,
    pub last_block_time_ms: i64,
    /// Validators voting at the next height.
    pub validators: ValidatorSet,
    /// Validators two heights out (validator updates land here).
    pub next_validators: ValidatorSet,
    /// Validators that committed the last block; its proposer proposes next.
    pub last_validators: ValidatorSet,
    pub last_height_validators_changed: u64,
    pub consensus_params: ConsensusParams,
    pub last_height_consensus_params_changed: u64,
    pub last_results_hash: Hash,
    /// Application digest after the last committed block; stamped by the
    /// engine once the Commit broadcast has completed.
    pub app_hash: Vec<u8>,
}

impl ChainState {
    /// Build the pre-InitChain state from a genesis document.
    pub fn from_genesis(genesis: &Genesis) -> Result<Self> {
        let validators = ValidatorSet::new(genesis.validators.clone());
        if validators.is_empty() {
            return Err(EngineError::EmptyValidatorSet);
        }
        genesis
            .consensus_params
            .validate_basic()?;
        Ok(Self {
            chain_id: genesis.chain_id.clone(),
            initial_height: genesis.initial_height,
            last_block_height: genesis.initial_height.saturating_sub(1),
            last_block_id: BlockId::zero(),
            last_block_time_ms: genesis.genesis_time_ms,
            next_validators: validators.copy_increment_proposer_priority(1),
            last_validators: validators.clone(),
            validators,
            last_height_validators_changed: genesis.initial_height,
            consensus_params: genesis.consensus_params.clone(),
            last_height_consensus_params_changed: genesis.initial_height,
            last_results_hash: tx_results_hash(&[]),
            app_hash: Vec::new(),
        })
    }

    /// Fold an InitChain response into the state. Each field only
    /// overrides the genesis value when the application set it.
    pub fn absorb_init_chain(&mut self, res: &ResponseInitChain) -> Result<()> {
        if !res.app_hash.is_empty() {
            self.app_hash = res.app_hash.clone();
        }

        if !res.validators.is_empty() {
            let entries = validate_validator_updates(&res.validators, &self.consensus_params)?;
            let validators = ValidatorSet::new(entries);
            if validators.is_empty() {
                return Err(EngineError::EmptyValidatorSet);
            }
            self.last_validators = validators.clone();
            self.next_validators = validators.copy_increment_proposer_priority(1);
            self.validators = validators;
        }

        if let Some(updates) = &res.consensus_params {
            self.consensus_params = self.consensus_params.update(updates);
            self.consensus_params.validate_basic()?;
        }

        self.last_results_hash = tx_results_hash(&[]);
        Ok(())
    }

    /// Assemble a block at `height` from this state.
    pub fn make_block(
        &self,
        height: u64,
        time_ms: i64,
        txs: Vec<Tx>,
        last_commit: Commit,
        evidence: Vec<Evidence>,
        proposer_address: Pubkey,
    ) -> Block {
        let header = Header {
            chain_id: self.chain_id.clone(),
            height,
            time_ms,
            last_block_id: self.last_block_id,
            last_commit_hash: last_commit.hash(),
            data_hash: txs_hash(&txs),
            validators_hash: self.validators.hash(),
            next_validators_hash: self.next_validators.hash(),
            app_hash: self.app_hash.clone(),
            last_results_hash: self.last_results_hash,
            evidence_hash: evidence_hash(&evidence),
            proposer_address,
        };
        Block {
            header,
            txs,
            evidence,
            last_commit,
        }
    }
}

/// Digest over the ordered per-transaction execution results.
pub fn tx_results_hash(results: &[ExecTxResult]) -> Hash {
    let entries: Vec<Vec<u8>> = results
        .iter()
        .map(|r| {
            let mut bytes = r.code.to_le_bytes().to_vec();
            bytes.extend_from_slice(&r.data);
            bytes.extend_from_slice(r.log.as_bytes());
            bytes.extend_from_slice(&r.gas_wanted.to_le_bytes());
            bytes.extend_from_slice(&r.gas_used.to_le_bytes());
            bytes
        })
        .collect();
    let refs: Vec<&[u8]> = entries.iter().map(|e| e.as_slice()).collect();
    solana_sha256_hasher::hashv(&refs)
}

/// Check validator updates returned by the application and convert them to
/// (address, power) pairs.
///
/// Negative power is rejected. Zero power denotes removal and skips the
/// key-type check. Non-zero power requires a key algorithm allowed by the
/// active consensus params and a well-formed 32-byte key.
pub fn validate_validator_updates(
    updates: &[ValidatorUpdate],
    params: &ConsensusParams,
) -> Result<Vec<(Pubkey, u64)>> {
    let mut entries = Vec::with_capacity(updates.len());
    for update in updates {
        if update.power < 0 {
            return Err(EngineError::InvalidValidatorUpdate(format!(
                "voting power can't be negative, got {}",
                update.power
            )));
        }
        if update.power > 0 && !params.is_valid_pub_key_type(&update.pub_key_type) {
            return Err(EngineError::InvalidValidatorUpdate(format!(
                "pubkey type {:?} is unsupported for consensus",
                update.pub_key_type
            )));
        }
        let address = Pubkey::try_from(update.pub_key_bytes.as_slice()).map_err(|_| {
            EngineError::InvalidValidatorUpdate(format!(
                "pubkey must be 32 bytes, got {}",
                update.pub_key_bytes.len()
            ))
        })?;
        entries.push((address, update.power as u64));
    }
    Ok(entries)
}

/// Compute the next chain state from the previous one and a block's
/// execution results. Pure: neither input is mutated.
///
/// The returned state's app hash is empty; it is only known after the
/// external Commit call completes and is stamped on by the caller.
pub fn next_state(
    cur: &ChainState,
    block_id: BlockId,
    header: &Header,
    res: &ResponseFinalizeBlock,
    validator_updates: &[(Pubkey, u64)],
) -> Result<ChainState> {
    let mut next_validators = cur.next_validators.clone();
    let mut last_height_validators_changed = cur.last_height_validators_changed;
    if !validator_updates.is_empty() {
        next_validators.update_with_change_set(validator_updates)?;
        // Changes from this height only apply two heights later.
        last_height_validators_changed = header.height + 2;
    }
    next_validators.increment_proposer_priority(1);

    let mut consensus_params = cur.consensus_params.clone();
    let mut last_height_consensus_params_changed = cur.last_height_consensus_params_changed;
    if let Some(updates) = &res.consensus_param_updates {
        consensus_params = cur.consensus_params.update(updates);
        consensus_params.validate_basic()?;
        last_height_consensus_params_changed = header.height + 1;
    }

    Ok(ChainState {
        chain_id: cur.chain_id.clone(),
        initial_height: cur.initial_height,
        last_block_height: header.height,
        last_block_id: block_id,
        last_block_time_ms: header.time_ms,
        validators: cur.next_validators.clone(),
        next_validators,
        last_validators: cur.validators.clone(),
        last_height_validators_changed,
        consensus_params,
        last_height_consensus_params_changed,
        last_results_hash: tx_results_hash(&res.tx_results),
        app_hash: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chainmock_abci::types::{AbciParamUpdates, ConsensusParamUpdates},
        solana_keypair::Keypair,
        solana_signer::Signer,
    };

    fn make_genesis(n: usize) -> (Vec<Keypair>, Genesis) {
        let keypairs: Vec<Keypair> = (0..n).map(|_| Keypair::new()).collect();
        let genesis = Genesis {
            chain_id: "test-chain".to_string(),
            initial_height: 1,
            genesis_time_ms: 1_700_000_000_000,
            validators: keypairs.iter().map(|kp| (kp.pubkey(), 100)).collect(),
            consensus_params: ConsensusParams::default(),
            app_state: Vec::new(),
        };
        (keypairs, genesis)
    }

    fn make_finalize_res() -> ResponseFinalizeBlock {
        ResponseFinalizeBlock {
            app_hash: b"app-hash".to_vec(),
            ..Default::default()
        }
    }

    fn header_at(state: &ChainState, height: u64) -> Header {
        state
            .make_block(
                height,
                state.last_block_time_ms + 1000,
                Vec::new(),
                Commit::empty(),
                Vec::new(),
                state.last_validators.proposer().unwrap().address,
            )
            .header
    }

    #[test]
    fn test_from_genesis_has_proposer() {
        let (_, genesis) = make_genesis(4);
        let state = ChainState::from_genesis(&genesis).unwrap();
        assert_eq!(state.last_block_height, 0);
        assert!(state.last_validators.proposer().is_some());
        assert_eq!(state.validators.len(), 4);
    }

    #[test]
    fn test_from_genesis_rejects_empty_set() {
        let (_, mut genesis) = make_genesis(0);
        genesis.validators.clear();
        assert!(matches!(
            ChainState::from_genesis(&genesis),
            Err(EngineError::EmptyValidatorSet)
        ));
    }

    #[test]
    fn test_next_state_advances_height_and_rotates_sets() {
        let (_, genesis) = make_genesis(4);
        let state = ChainState::from_genesis(&genesis).unwrap();
        let header = header_at(&state, 1);
        let block_id = BlockId::new(header.hash());

        let next = next_state(&state, block_id, &header, &make_finalize_res(), &[]).unwrap();

        assert_eq!(next.last_block_height, 1);
        assert_eq!(next.last_block_id, block_id);
        assert_eq!(next.last_validators, state.validators);
        assert_eq!(next.validators, state.next_validators);
        assert!(next.app_hash.is_empty(), "app hash is stamped later");
    }

    #[test]
    fn test_validator_updates_take_effect_two_heights_later() {
        let (_, genesis) = make_genesis(4);
        let state = ChainState::from_genesis(&genesis).unwrap();
        let newcomer = Pubkey::new_unique();

        let header1 = header_at(&state, 1);
        let next1 = next_state(
            &state,
            BlockId::new(header1.hash()),
            &header1,
            &make_finalize_res(),
            &[(newcomer, 500)],
        )
        .unwrap();

        assert_eq!(next1.last_height_validators_changed, 3);
        // Height 2 still votes with the old set.
        assert!(!next1.validators.contains(&newcomer));
        assert!(next1.next_validators.contains(&newcomer));

        let header2 = header_at(&next1, 2);
        let next2 = next_state(
            &next1,
            BlockId::new(header2.hash()),
            &header2,
            &make_finalize_res(),
            &[],
        )
        .unwrap();

        // Height 3 votes with the updated set.
        assert!(next2.validators.contains(&newcomer));
    }

    #[test]
    fn test_param_updates_take_effect_one_height_later() {
        let (_, genesis) = make_genesis(4);
        let state = ChainState::from_genesis(&genesis).unwrap();
        let header = header_at(&state, 1);

        let res = ResponseFinalizeBlock {
            consensus_param_updates: Some(ConsensusParamUpdates {
                abci: Some(AbciParamUpdates {
                    vote_extensions_enable_height: 5,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let next = next_state(&state, BlockId::new(header.hash()), &header, &res, &[]).unwrap();

        assert_eq!(next.last_height_consensus_params_changed, 2);
        assert_eq!(next.consensus_params.abci.vote_extensions_enable_height, 5);
        // The previous state is untouched.
        assert_eq!(state.consensus_params.abci.vote_extensions_enable_height, 0);
    }

    #[test]
    fn test_proposer_priority_advances_without_updates() {
        let (_, genesis) = make_genesis(4);
        let state = ChainState::from_genesis(&genesis).unwrap();
        let header = header_at(&state, 1);
        let next = next_state(
            &state,
            BlockId::new(header.hash()),
            &header,
            &make_finalize_res(),
            &[],
        )
        .unwrap();
        assert_ne!(next.next_validators, state.next_validators);
    }

    #[test]
    fn test_validate_updates_rejects_negative_power() {
        let params = ConsensusParams::default();
        let updates = vec![ValidatorUpdate {
            pub_key_type: "ed25519".to_string(),
            pub_key_bytes: vec![1; 32],
            power: -5,
        }];
        assert!(matches!(
            validate_validator_updates(&updates, &params),
            Err(EngineError::InvalidValidatorUpdate(_))
        ));
    }

    #[test]
    fn test_validate_updates_zero_power_skips_key_type_check() {
        let params = ConsensusParams::default();
        let updates = vec![ValidatorUpdate {
            pub_key_type: "secp256k1".to_string(),
            pub_key_bytes: vec![1; 32],
            power: 0,
        }];
        let entries = validate_validator_updates(&updates, &params).unwrap();
        assert_eq!(entries[0].1, 0);
    }

    #[test]
    fn test_validate_updates_rejects_unsupported_key_type() {
        let params = ConsensusParams::default();
        let updates = vec![ValidatorUpdate {
            pub_key_type: "secp256k1".to_string(),
            pub_key_bytes: vec![1; 32],
            power: 10,
        }];
        assert!(validate_validator_updates(&updates, &params).is_err());
    }

    #[test]
    fn test_validate_updates_rejects_malformed_key() {
        let params = ConsensusParams::default();
        let updates = vec![ValidatorUpdate {
            pub_key_type: "ed25519".to_string(),
            pub_key_bytes: vec![1; 16],
            power: 10,
        }];
        assert!(validate_validator_updates(&updates, &params).is_err());
    }

    #[test]
    fn test_absorb_init_chain_overrides_only_present_fields() {
        let (_, genesis) = make_genesis(4);
        let mut state = ChainState::from_genesis(&genesis).unwrap();
        let old_validators = state.validators.clone();

        state
            .absorb_init_chain(&ResponseInitChain {
                consensus_params: None,
                validators: Vec::new(),
                app_hash: b"genesis-app-hash".to_vec(),
            })
            .unwrap();

        assert_eq!(state.app_hash, b"genesis-app-hash".to_vec());
        assert_eq!(state.validators, old_validators);
    }

    #[test]
    fn test_absorb_init_chain_replaces_validators() {
        let (_, genesis) = make_genesis(4);
        let mut state = ChainState::from_genesis(&genesis).unwrap();
        let replacement = Keypair::new();

        state
            .absorb_init_chain(&ResponseInitChain {
                consensus_params: None,
                validators: vec![ValidatorUpdate {
                    pub_key_type: "ed25519".to_string(),
                    pub_key_bytes: replacement.pubkey().to_bytes().to_vec(),
                    power: 1,
                }],
                app_hash: Vec::new(),
            })
            .unwrap();

        assert_eq!(state.validators.len(), 1);
        assert!(state.validators.contains(&replacement.pubkey()));
        assert!(state.last_validators.contains(&replacement.pubkey()));
    }

    #[test]
    fn test_tx_results_hash_sensitive_to_order() {
        let a = ExecTxResult {
            code: 0,
            log: "a".to_string(),
            ..Default::default()
        };
        let b = ExecTxResult {
            code: 0,
            log: "b".to_string(),
            ..Default::default()
        };
        assert_ne!(
            tx_results_hash(&[a.clone(), b.clone()]),
            tx_results_hash(&[b, a])
        );
    }
}
