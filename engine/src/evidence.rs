//! Evidence construction for simulated Byzantine behaviour.
//!
//! Evidence objects are built on demand from the last committed block and
//! the state that was current at its height, embedded into exactly one
//! block, and never mutated afterwards. Unknown misbehaviour kinds are
//! rejected before any block is touched.

use {
    crate::{
        error::{EngineError, Result},
        state::ChainState,
        types::{Block, BlockOverrides, LightBlock, SignedHeader},
        validator_set::{Validator, ValidatorSet},
        vote::{Commit, Vote},
    },
    chainmock_abci::types as abci,
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signer::Signer,
    std::str::FromStr,
};

/// The kinds of misbehaviour the emulator can stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisbehaviourKind {
    /// Two valid precommits from the same validator differing only in round.
    DuplicateVote,
    /// Light-client attack with an invalid app hash.
    Lunatic,
    /// Light-client attack leaving the block unmodified.
    ///
    /// The conflicting block is intentionally identical to the committed
    /// one; a faithful amnesia simulation is an acknowledged limitation.
    Amnesia,
    /// Light-client attack with a shifted block timestamp.
    Equivocation,
}

impl MisbehaviourKind {
    pub fn is_light_client_attack(&self) -> bool {
        !matches!(self, MisbehaviourKind::DuplicateVote)
    }
}

impl FromStr for MisbehaviourKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DuplicateVote" => Ok(MisbehaviourKind::DuplicateVote),
            "Lunatic" => Ok(MisbehaviourKind::Lunatic),
            "Amnesia" => Ok(MisbehaviourKind::Amnesia),
            "Equivocation" => Ok(MisbehaviourKind::Equivocation),
            other => Err(EngineError::UnknownMisbehaviour(other.to_string())),
        }
    }
}

impl std::fmt::Display for MisbehaviourKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MisbehaviourKind::DuplicateVote => write!(f, "DuplicateVote"),
            MisbehaviourKind::Lunatic => write!(f, "Lunatic"),
            MisbehaviourKind::Amnesia => write!(f, "Amnesia"),
            MisbehaviourKind::Equivocation => write!(f, "Equivocation"),
        }
    }
}

/// Two conflicting precommits from one validator for the last committed
/// block, distinguished only by their round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateVoteEvidence {
    pub vote_a: Vote,
    pub vote_b: Vote,
    pub total_voting_power: u64,
    pub validator_power: u64,
    /// Time of the block the votes refer to.
    pub timestamp_ms: i64,
}

/// A conflicting variant of the last committed block, packaged so a light
/// client would have to choose between two validly signed headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightClientAttackEvidence {
    pub conflicting_block: LightBlock,
    /// Last height the attacker and the honest chain agree on.
    pub common_height: u64,
    pub byzantine_validators: Vec<Validator>,
    pub total_voting_power: u64,
    pub timestamp_ms: i64,
}

/// Evidence of validator misbehaviour, embedded into a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    DuplicateVote(DuplicateVoteEvidence),
    LightClientAttack(LightClientAttackEvidence),
}

impl Evidence {
    /// Height the misbehaviour occurred at.
    pub fn height(&self) -> u64 {
        match self {
            Evidence::DuplicateVote(ev) => ev.vote_a.height,
            Evidence::LightClientAttack(ev) => {
                ev.conflicting_block.signed_header.header.height
            }
        }
    }

    /// Structural digest, folded into the block's evidence hash.
    pub fn hash(&self) -> Hash {
        match self {
            Evidence::DuplicateVote(ev) => solana_sha256_hasher::hashv(&[
                b"duplicate-vote",
                ev.vote_a.validator_address.as_ref(),
                &ev.vote_a.height.to_le_bytes(),
                &ev.vote_a.round.to_le_bytes(),
                &ev.vote_b.round.to_le_bytes(),
            ]),
            Evidence::LightClientAttack(ev) => {
                let header_hash = ev.conflicting_block.signed_header.header.hash();
                solana_sha256_hasher::hashv(&[
                    b"light-client-attack",
                    header_hash.as_ref(),
                    &ev.common_height.to_le_bytes(),
                ])
            }
        }
    }

    /// Convert to the interface representation delivered to applications:
    /// one entry per misbehaving validator.
    pub fn to_abci(&self) -> Vec<abci::Misbehavior> {
        match self {
            Evidence::DuplicateVote(ev) => vec![abci::Misbehavior {
                kind: abci::MisbehaviorKind::DuplicateVote,
                validator: abci::Validator {
                    address: ev.vote_a.validator_address.to_bytes().to_vec(),
                    power: ev.validator_power as i64,
                },
                height: ev.vote_a.height,
                time_ms: ev.timestamp_ms,
                total_voting_power: ev.total_voting_power as i64,
            }],
            Evidence::LightClientAttack(ev) => ev
                .byzantine_validators
                .iter()
                .map(|validator| abci::Misbehavior {
                    kind: abci::MisbehaviorKind::LightClientAttack,
                    validator: abci::Validator {
                        address: validator.address.to_bytes().to_vec(),
                        power: validator.power as i64,
                    },
                    height: ev.conflicting_block.signed_header.header.height,
                    time_ms: ev.timestamp_ms,
                    total_voting_power: ev.total_voting_power as i64,
                })
                .collect(),
        }
    }
}

/// Digest over a block's embedded evidence list.
pub fn evidence_hash(evidence: &[Evidence]) -> Hash {
    let hashes: Vec<Hash> = evidence.iter().map(|e| e.hash()).collect();
    let refs: Vec<&[u8]> = hashes.iter().map(|h| h.as_ref()).collect();
    solana_sha256_hasher::hashv(&refs)
}

/// Construct duplicate-vote evidence for the validator behind `signer`.
///
/// Both votes target the last committed block and differ only in round;
/// both are independently signed and must pass basic validation before
/// being embedded.
pub fn duplicate_vote_evidence(
    signer: &Keypair,
    chain_id: &str,
    last_block: &Block,
    last_state: &ChainState,
    now_ms: i64,
) -> Result<DuplicateVoteEvidence> {
    let address = signer.pubkey();
    let Some((index, validator)) = last_state.validators.get_by_address(&address) else {
        return Err(EngineError::UnknownValidator(address.to_string()));
    };

    let block_id = last_block.block_id();
    let make_vote = |round: u32| -> Result<Vote> {
        let mut vote = Vote {
            validator_address: address,
            validator_index: index as u32,
            height: last_block.header.height,
            round,
            timestamp_ms: now_ms,
            block_id,
            extension: Vec::new(),
            signature: None,
        };
        vote.signature = Some(signer.sign_message(&vote.sign_bytes(chain_id)));
        vote.validate_basic()?;
        vote.verify(chain_id)?;
        Ok(vote)
    };

    Ok(DuplicateVoteEvidence {
        vote_a: make_vote(1)?,
        vote_b: make_vote(2)?,
        total_voting_power: last_state.validators.total_power(),
        validator_power: validator.power,
        timestamp_ms: last_block.header.time_ms,
    })
}

/// Construct light-client-attack evidence of the given kind against the
/// last committed block.
pub fn light_client_attack_evidence(
    kind: MisbehaviourKind,
    target: Pubkey,
    last_block: &Block,
    last_commit: &Commit,
    current_validators: &ValidatorSet,
    last_state: &ChainState,
) -> Result<LightClientAttackEvidence> {
    let overrides = match kind {
        MisbehaviourKind::Lunatic => BlockOverrides {
            app_hash: Some(b"some other app hash".to_vec()),
            time_ms: None,
        },
        MisbehaviourKind::Equivocation => BlockOverrides {
            app_hash: None,
            time_ms: Some(last_block.header.time_ms + 1000),
        },
        // Documented no-op: the conflicting block stays identical.
        MisbehaviourKind::Amnesia => BlockOverrides::default(),
        MisbehaviourKind::DuplicateVote => {
            return Err(EngineError::UnknownMisbehaviour(format!(
                "{kind} is not a light-client attack"
            )))
        }
    };

    let Some((_, validator)) = last_state.validators.get_by_address(&target) else {
        return Err(EngineError::UnknownValidator(target.to_string()));
    };

    let conflicting = last_block.clone_with(overrides);
    let signed_header = SignedHeader {
        header: conflicting.header,
        commit: last_commit.clone(),
    };

    Ok(LightClientAttackEvidence {
        conflicting_block: LightBlock {
            signed_header,
            validator_set: current_validators.clone(),
        },
        common_height: last_block.header.height.saturating_sub(1),
        byzantine_validators: vec![validator.clone()],
        total_voting_power: last_state.validators.total_power(),
        timestamp_ms: last_block.header.time_ms,
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{params::ConsensusParams, state::Genesis},
    };

    fn make_fixture(n: usize) -> (Vec<Keypair>, ChainState, Block) {
        let keypairs: Vec<Keypair> = (0..n).map(|_| Keypair::new()).collect();
        let genesis = Genesis {
            chain_id: "test-chain".to_string(),
            initial_height: 1,
            genesis_time_ms: 1_700_000_000_000,
            validators: keypairs.iter().map(|kp| (kp.pubkey(), 100)).collect(),
            consensus_params: ConsensusParams::default(),
            app_state: Vec::new(),
        };
        let state = ChainState::from_genesis(&genesis).unwrap();
        let block = state.make_block(
            1,
            genesis.genesis_time_ms + 1000,
            Vec::new(),
            Commit::empty(),
            Vec::new(),
            state.last_validators.proposer().unwrap().address,
        );
        (keypairs, state, block)
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "Lunatic".parse::<MisbehaviourKind>().unwrap(),
            MisbehaviourKind::Lunatic
        );
        assert_eq!(
            "DuplicateVote".parse::<MisbehaviourKind>().unwrap(),
            MisbehaviourKind::DuplicateVote
        );
        assert!(matches!(
            "Sleepy".parse::<MisbehaviourKind>(),
            Err(EngineError::UnknownMisbehaviour(_))
        ));
    }

    #[test]
    fn test_duplicate_vote_evidence_differs_only_in_round() {
        let (keypairs, state, block) = make_fixture(4);
        let ev = duplicate_vote_evidence(
            &keypairs[0],
            "test-chain",
            &block,
            &state,
            block.header.time_ms,
        )
        .unwrap();

        assert_eq!(ev.vote_a.validator_address, ev.vote_b.validator_address);
        assert_eq!(ev.vote_a.height, ev.vote_b.height);
        assert_eq!(ev.vote_a.block_id, ev.vote_b.block_id);
        assert_ne!(ev.vote_a.round, ev.vote_b.round);
        ev.vote_a.verify("test-chain").unwrap();
        ev.vote_b.verify("test-chain").unwrap();
        assert_eq!(ev.validator_power, 100);
        assert_eq!(ev.total_voting_power, 400);
    }

    #[test]
    fn test_duplicate_vote_evidence_unknown_validator() {
        let (_, state, block) = make_fixture(4);
        let outsider = Keypair::new();
        assert!(matches!(
            duplicate_vote_evidence(&outsider, "test-chain", &block, &state, 0),
            Err(EngineError::UnknownValidator(_))
        ));
    }

    #[test]
    fn test_lunatic_attack_mutates_app_hash() {
        let (keypairs, state, block) = make_fixture(4);
        let ev = light_client_attack_evidence(
            MisbehaviourKind::Lunatic,
            keypairs[0].pubkey(),
            &block,
            &Commit::empty(),
            &state.validators,
            &state,
        )
        .unwrap();
        let header = &ev.conflicting_block.signed_header.header;
        assert_eq!(header.app_hash, b"some other app hash".to_vec());
        assert_ne!(header.hash(), block.hash());
        assert_eq!(ev.common_height, 0);
    }

    #[test]
    fn test_equivocation_attack_shifts_time() {
        let (keypairs, state, block) = make_fixture(4);
        let ev = light_client_attack_evidence(
            MisbehaviourKind::Equivocation,
            keypairs[0].pubkey(),
            &block,
            &Commit::empty(),
            &state.validators,
            &state,
        )
        .unwrap();
        let header = &ev.conflicting_block.signed_header.header;
        assert_eq!(header.time_ms, block.header.time_ms + 1000);
        assert_ne!(header.hash(), block.hash());
    }

    #[test]
    fn test_amnesia_attack_leaves_block_intact() {
        let (keypairs, state, block) = make_fixture(4);
        let ev = light_client_attack_evidence(
            MisbehaviourKind::Amnesia,
            keypairs[0].pubkey(),
            &block,
            &Commit::empty(),
            &state.validators,
            &state,
        )
        .unwrap();
        assert_eq!(
            ev.conflicting_block.signed_header.header.hash(),
            block.hash()
        );
    }

    #[test]
    fn test_duplicate_vote_is_not_a_light_client_attack() {
        let (keypairs, state, block) = make_fixture(4);
        assert!(matches!(
            light_client_attack_evidence(
                MisbehaviourKind::DuplicateVote,
                keypairs[0].pubkey(),
                &block,
                &Commit::empty(),
                &state.validators,
                &state,
            ),
            Err(EngineError::UnknownMisbehaviour(_))
        ));
    }

    #[test]
    fn test_to_abci_duplicate_vote() {
        let (keypairs, state, block) = make_fixture(4);
        let ev = duplicate_vote_evidence(
            &keypairs[0],
            "test-chain",
            &block,
            &state,
            block.header.time_ms,
        )
        .unwrap();
        let abci_ev = Evidence::DuplicateVote(ev).to_abci();
        assert_eq!(abci_ev.len(), 1);
        assert_eq!(abci_ev[0].kind, abci::MisbehaviorKind::DuplicateVote);
        assert_eq!(abci_ev[0].total_voting_power, 400);
    }

    #[test]
    fn test_evidence_hash_distinguishes_lists() {
        let (keypairs, state, block) = make_fixture(4);
        let ev = Evidence::DuplicateVote(
            duplicate_vote_evidence(
                &keypairs[0],
                "test-chain",
                &block,
                &state,
                block.header.time_ms,
            )
            .unwrap(),
        );
        assert_ne!(evidence_hash(&[]), evidence_hash(&[ev]));
    }
}
