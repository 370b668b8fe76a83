//! Precommit votes, vote aggregation, and commits.
//!
//! The emulator only ever produces precommits for a single round per
//! height, but the vote set still enforces the full aggregation rules:
//! signature verification, one vote per validator, conflicting votes
//! rejected, and commit extraction gated on strictly more than 2/3 of the
//! voting power landing on one block id.

use {
    crate::{
        error::{EngineError, Result},
        types::BlockId,
        validator_set::ValidatorSet,
    },
    chainmock_abci::types::BlockIdFlag,
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    std::collections::HashMap,
};

/// Canonical byte encoding of a precommit, shared by vote signing and
/// commit re-verification. The vote extension is deliberately not part of
/// the signed payload.
pub fn vote_sign_bytes(
    chain_id: &str,
    height: u64,
    round: u32,
    block_id: &BlockId,
    timestamp_ms: i64,
    validator_address: &Pubkey,
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(chain_id.len() + 85);
    bytes.extend_from_slice(b"precommit/");
    bytes.extend_from_slice(chain_id.as_bytes());
    bytes.extend_from_slice(&height.to_le_bytes());
    bytes.extend_from_slice(&round.to_le_bytes());
    bytes.extend_from_slice(block_id.hash.as_ref());
    bytes.extend_from_slice(&timestamp_ms.to_le_bytes());
    bytes.extend_from_slice(validator_address.as_ref());
    bytes
}

/// A precommit vote from one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub validator_address: Pubkey,
    /// Index of the validator in the set the vote belongs to.
    pub validator_index: u32,
    pub height: u64,
    pub round: u32,
    pub timestamp_ms: i64,
    pub block_id: BlockId,
    /// Application-defined payload; empty when extensions are disabled.
    pub extension: Vec<u8>,
    pub signature: Option<Signature>,
}

impl Vote {
    /// The canonical payload this vote's signature covers.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        vote_sign_bytes(
            chain_id,
            self.height,
            self.round,
            &self.block_id,
            self.timestamp_ms,
            &self.validator_address,
        )
    }

    /// Basic well-formedness: a signed vote for a real block.
    pub fn validate_basic(&self) -> Result<()> {
        if self.height == 0 {
            return Err(EngineError::InvalidVote(
                "vote height must be positive".to_string(),
            ));
        }
        if self.block_id.is_zero() {
            return Err(EngineError::InvalidVote(
                "vote references the zero block id".to_string(),
            ));
        }
        if self.signature.is_none() {
            return Err(EngineError::InvalidVote("vote is unsigned".to_string()));
        }
        Ok(())
    }

    /// Verify the signature against the voter's public key.
    pub fn verify(&self, chain_id: &str) -> Result<()> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| EngineError::InvalidVote("vote is unsigned".to_string()))?;
        if !signature.verify(self.validator_address.as_ref(), &self.sign_bytes(chain_id)) {
            return Err(EngineError::InvalidVote(format!(
                "bad signature from validator {}",
                self.validator_address
            )));
        }
        Ok(())
    }
}

/// One validator's entry in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSig {
    pub block_id_flag: BlockIdFlag,
    pub validator_address: Pubkey,
    pub timestamp_ms: i64,
    pub signature: Option<Signature>,
    /// Vote extension carried through from the precommit.
    pub extension: Vec<u8>,
}

impl CommitSig {
    /// Placeholder for a validator that did not vote.
    pub fn absent(validator_address: Pubkey) -> Self {
        Self {
            block_id_flag: BlockIdFlag::Absent,
            validator_address,
            timestamp_ms: 0,
            signature: None,
            extension: Vec::new(),
        }
    }
}

/// An aggregated commit: one entry per validator, in validator-set order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub height: u64,
    pub round: u32,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    /// The commit that precedes the first block.
    pub fn empty() -> Self {
        Self {
            height: 0,
            round: 0,
            block_id: BlockId::zero(),
            signatures: Vec::new(),
        }
    }

    /// Reconstruct the sign bytes of the precommit behind signature `idx`.
    pub fn vote_sign_bytes(&self, chain_id: &str, idx: usize) -> Vec<u8> {
        let sig = &self.signatures[idx];
        vote_sign_bytes(
            chain_id,
            self.height,
            self.round,
            &self.block_id,
            sig.timestamp_ms,
            &sig.validator_address,
        )
    }

    /// Digest over the commit contents, used in the next block's header.
    pub fn hash(&self) -> Hash {
        let entries: Vec<Vec<u8>> = self
            .signatures
            .iter()
            .map(|sig| {
                let mut bytes = sig.validator_address.to_bytes().to_vec();
                bytes.push(match sig.block_id_flag {
                    BlockIdFlag::Absent => 1,
                    BlockIdFlag::Commit => 2,
                    BlockIdFlag::Nil => 3,
                });
                bytes.extend_from_slice(&sig.timestamp_ms.to_le_bytes());
                if let Some(signature) = &sig.signature {
                    bytes.extend_from_slice(signature.as_ref());
                }
                bytes
            })
            .collect();
        let mut refs: Vec<&[u8]> = vec![
            self.block_id.hash.as_ref(),
        ];
        refs.extend(entries.iter().map(|e| e.as_slice()));
        solana_sha256_hasher::hashv(&refs)
    }
}

/// Express a commit as the interface-level commit info fed into
/// ProcessProposal, ExtendVote, and FinalizeBlock requests. Powers are
/// looked up in the validator set that produced the commit.
pub fn build_commit_info(
    commit: &Commit,
    validators: &ValidatorSet,
) -> chainmock_abci::types::CommitInfo {
    chainmock_abci::types::CommitInfo {
        round: commit.round,
        votes: commit
            .signatures
            .iter()
            .map(|sig| chainmock_abci::types::VoteInfo {
                validator: chainmock_abci::types::Validator {
                    address: sig.validator_address.to_bytes().to_vec(),
                    power: validators.power_of(&sig.validator_address) as i64,
                },
                block_id_flag: sig.block_id_flag,
            })
            .collect(),
    }
}

/// Like [`build_commit_info`], with each vote's extension payload attached.
/// Fed into PrepareProposal as the previous block's aggregated commit.
pub fn build_extended_commit_info(
    commit: &Commit,
    validators: &ValidatorSet,
) -> chainmock_abci::types::ExtendedCommitInfo {
    chainmock_abci::types::ExtendedCommitInfo {
        round: commit.round,
        votes: commit
            .signatures
            .iter()
            .map(|sig| chainmock_abci::types::ExtendedVoteInfo {
                validator: chainmock_abci::types::Validator {
                    address: sig.validator_address.to_bytes().to_vec(),
                    power: validators.power_of(&sig.validator_address) as i64,
                },
                vote_extension: sig.extension.clone(),
                block_id_flag: sig.block_id_flag,
            })
            .collect(),
    }
}

/// Collects precommits for one (chain, height, round) and turns them into
/// a commit once a quorum lands on a single block id.
#[derive(Debug)]
pub struct VoteSet {
    chain_id: String,
    height: u64,
    round: u32,
    validators: ValidatorSet,
    /// One slot per validator, in validator-set order.
    votes: Vec<Option<Vote>>,
    tallied_power: u64,
}

impl VoteSet {
    pub fn new(chain_id: &str, height: u64, round: u32, validators: ValidatorSet) -> Self {
        let slots = validators.len();
        Self {
            chain_id: chain_id.to_string(),
            height,
            round,
            validators,
            votes: vec![None; slots],
            tallied_power: 0,
        }
    }

    /// Total voting power of the votes accepted so far.
    pub fn tallied_power(&self) -> u64 {
        self.tallied_power
    }

    /// Add a verified vote.
    ///
    /// Returns `Ok(true)` when the vote was added and increased the tallied
    /// power, `Ok(false)` for an exact duplicate, and an error for votes
    /// that are malformed, from unknown validators, or conflict with a
    /// previously accepted vote.
    pub fn add_vote(&mut self, vote: Vote) -> Result<bool> {
        if vote.height != self.height
            || vote.round != self.round
        {
            return Err(EngineError::InvalidVote(format!(
                "vote is for height {}/round {}, expected {}/{}",
                vote.height, vote.round, self.height, self.round
            )));
        }
        let Some((index, validator)) = self.validators.get_by_address(&vote.validator_address)
        else {
            return Err(EngineError::InvalidVote(format!(
                "validator {} is not in the set",
                vote.validator_address
            )));
        };
        if vote.validator_index as usize != index {
            return Err(EngineError::InvalidVote(format!(
                "vote carries validator index {}, expected {}",
                vote.validator_index, index
            )));
        }
        vote.verify(&self.chain_id)?;

        if let Some(existing) = &self.votes[index] {
            if existing.block_id == vote.block_id {
                return Ok(false);
            }
            return Err(EngineError::ConflictingVote(vote.validator_address));
        }

        let power = validator.power;
        self.votes[index] = Some(vote);
        self.tallied_power = self.tallied_power.saturating_add(power);
        Ok(true)
    }

    /// The block id holding strictly more than 2/3 of the power, if any.
    pub fn two_thirds_majority(&self) -> Option<BlockId> {
        let mut power_by_block: HashMap<Hash, u64> = HashMap::new();
        for (i, vote) in self.votes.iter().enumerate() {
            if let Some(vote) = vote {
                let power = self.validators.get(i).map(|v| v.power).unwrap_or(0);
                *power_by_block.entry(vote.block_id.hash).or_default() += power;
            }
        }
        power_by_block
            .into_iter()
            .find(|(_, power)| self.validators.has_quorum(*power))
            .map(|(hash, _)| BlockId::new(hash))
    }

    /// Assemble the commit, in validator-set order with Absent placeholders.
    /// Fails when no block id reached a quorum.
    pub fn make_commit(&self) -> Result<Commit> {
        let Some(block_id) = self.two_thirds_majority() else {
            return Err(EngineError::QuorumNotReached {
                have: self.tallied_power,
                total: self.validators.total_power(),
            });
        };

        let signatures = self
            .validators
            .iter()
            .enumerate()
            .map(|(i, validator)| match &self.votes[i] {
                Some(vote) if vote.block_id == block_id => CommitSig {
                    block_id_flag: BlockIdFlag::Commit,
                    validator_address: vote.validator_address,
                    timestamp_ms: vote.timestamp_ms,
                    signature: vote.signature,
                    extension: vote.extension.clone(),
                },
                Some(vote) => CommitSig {
                    block_id_flag: BlockIdFlag::Nil,
                    validator_address: vote.validator_address,
                    timestamp_ms: vote.timestamp_ms,
                    signature: vote.signature,
                    extension: Vec::new(),
                },
                None => CommitSig::absent(validator.address),
            })
            .collect();

        Ok(Commit {
            height: self.height,
            round: self.round,
            block_id,
            signatures,
        })
    }
}
