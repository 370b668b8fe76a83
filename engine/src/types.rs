//! Block, header, and light-client types.
//!
//! Headers are hashed with the composite sha256 idiom: every deterministic
//! field contributes its canonical byte encoding to one `hashv` call. A
//! block's identity is its header hash.

use {
    crate::{
        error::{EngineError, Result},
        evidence::Evidence,
        validator_set::ValidatorSet,
        vote::Commit,
    },
    solana_hash::Hash,
    solana_pubkey::Pubkey,
};

/// A transaction is opaque bytes.
pub type Tx = Vec<u8>;

/// Identifies a block by its header hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockId {
    pub hash: Hash,
}

impl BlockId {
    pub fn new(hash: Hash) -> Self {
        Self { hash }
    }

    /// The zero block id used before the first block is committed.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.hash == Hash::default()
    }
}

/// A block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub chain_id: String,
    pub height: u64,
    /// Unix timestamp in milliseconds: wall clock plus the engine's offset.
    pub time_ms: i64,
    pub last_block_id: BlockId,
    pub last_commit_hash: Hash,
    pub data_hash: Hash,
    pub validators_hash: Hash,
    pub next_validators_hash: Hash,
    /// Application state digest after the previous block.
    pub app_hash: Vec<u8>,
    pub last_results_hash: Hash,
    pub evidence_hash: Hash,
    pub proposer_address: Pubkey,
}

impl Header {
    /// Compute the deterministic header hash.
    pub fn hash(&self) -> Hash {
        solana_sha256_hasher::hashv(&[
            self.chain_id.as_bytes(),
            &self.height.to_le_bytes(),
            &self.time_ms.to_le_bytes(),
            self.last_block_id.hash.as_ref(),
            self.last_commit_hash.as_ref(),
            self.data_hash.as_ref(),
            self.validators_hash.as_ref(),
            self.next_validators_hash.as_ref(),
            &self.app_hash,
            self.last_results_hash.as_ref(),
            self.evidence_hash.as_ref(),
            self.proposer_address.as_ref(),
        ])
    }
}

/// Field overrides for [`Block::clone_with`].
///
/// Used to construct conflicting block variants without generic deep-copy
/// machinery: only the named fields change, everything else is cloned.
#[derive(Debug, Clone, Default)]
pub struct BlockOverrides {
    pub app_hash: Option<Vec<u8>>,
    pub time_ms: Option<i64>,
}

/// A complete block: header, transactions, embedded evidence, and the
/// commit for the previous block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub txs: Vec<Tx>,
    pub evidence: Vec<Evidence>,
    pub last_commit: Commit,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn block_id(&self) -> BlockId {
        BlockId::new(self.hash())
    }

    /// Clone the block, applying the given field overrides to the header.
    pub fn clone_with(&self, overrides: BlockOverrides) -> Block {
        let mut block = self.clone();
        if let Some(app_hash) = overrides.app_hash {
            block.header.app_hash = app_hash;
        }
        if let Some(time_ms) = overrides.time_ms {
            block.header.time_ms = time_ms;
        }
        block
    }
}

/// Digest over an ordered transaction list.
pub fn txs_hash(txs: &[Tx]) -> Hash {
    let refs: Vec<&[u8]> = txs.iter().map(|tx| tx.as_slice()).collect();
    solana_sha256_hasher::hashv(&refs)
}

/// Check a transaction list against the block size limit.
/// `max_bytes` of -1 means unlimited.
pub fn validate_txs(txs: &[Tx], max_bytes: i64) -> Result<()> {
    if max_bytes < 0 {
        return Ok(());
    }
    let total: usize = txs.iter().map(|tx| tx.len()).sum();
    if total as i64 > max_bytes {
        return Err(EngineError::InvalidTxs(format!(
            "total transaction size {total} exceeds the limit of {max_bytes} bytes"
        )));
    }
    Ok(())
}

/// A header together with the commit that finalized it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeader {
    pub header: Header,
    pub commit: Commit,
}

impl SignedHeader {
    /// Structural checks: the commit must actually belong to this header.
    pub fn validate_basic(&self, chain_id: &str) -> Result<()> {
        if self.header.chain_id != chain_id {
            return Err(EngineError::InvalidLightBlock(format!(
                "header chain id {:?} does not match {:?}",
                self.header.chain_id, chain_id
            )));
        }
        if self.commit.height != self.header.height {
            return Err(EngineError::InvalidLightBlock(format!(
                "commit height {} does not match header height {}",
                self.commit.height, self.header.height
            )));
        }
        if self.commit.block_id.hash != self.header.hash() {
            return Err(EngineError::InvalidLightBlock(
                "commit block id does not match header hash".to_string(),
            ));
        }
        Ok(())
    }
}

/// A signed header plus the validator set that produced it, enough to
/// independently verify the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightBlock {
    pub signed_header: SignedHeader,
    pub validator_set: ValidatorSet,
}

impl LightBlock {
    pub fn validate_basic(&self, chain_id: &str) -> Result<()> {
        self.signed_header.validate_basic(chain_id)?;
        if self.validator_set.hash() != self.signed_header.header.validators_hash {
            return Err(EngineError::InvalidLightBlock(
                "validator set does not match the header's validators hash".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(height: u64) -> Header {
        Header {
            chain_id: "test-chain".to_string(),
            height,
            time_ms: 1_700_000_000_000,
            last_block_id: BlockId::zero(),
            last_commit_hash: Hash::default(),
            data_hash: Hash::default(),
            validators_hash: Hash::default(),
            next_validators_hash: Hash::default(),
            app_hash: Vec::new(),
            last_results_hash: Hash::default(),
            evidence_hash: Hash::default(),
            proposer_address: Pubkey::default(),
        }
    }

    fn make_block(height: u64) -> Block {
        Block {
            header: make_header(height),
            txs: Vec::new(),
            evidence: Vec::new(),
            last_commit: Commit::empty(),
        }
    }

    #[test]
    fn test_header_hash_deterministic() {
        let header = make_header(3);
        assert_eq!(header.hash(), header.hash());
    }

    #[test]
    fn test_header_hash_changes_with_height() {
        assert_ne!(make_header(1).hash(), make_header(2).hash());
    }

    #[test]
    fn test_clone_with_overrides_app_hash() {
        let block = make_block(5);
        let conflicting = block.clone_with(BlockOverrides {
            app_hash: Some(b"some other app hash".to_vec()),
            time_ms: None,
        });
        assert_ne!(block.hash(), conflicting.hash());
        assert_eq!(block.header.time_ms, conflicting.header.time_ms);
    }

    #[test]
    fn test_clone_with_no_overrides_is_identical() {
        let block = make_block(5);
        let copy = block.clone_with(BlockOverrides::default());
        assert_eq!(block.hash(), copy.hash());
    }

    #[test]
    fn test_validate_txs_unlimited() {
        let txs = vec![vec![0u8; 1024]];
        assert!(validate_txs(&txs, -1).is_ok());
    }

    #[test]
    fn test_validate_txs_over_limit() {
        let txs = vec![vec![0u8; 100], vec![0u8; 100]];
        assert!(validate_txs(&txs, 199).is_err());
        assert!(validate_txs(&txs, 200).is_ok());
    }

    #[test]
    fn test_signed_header_rejects_wrong_commit_height() {
        let header = make_header(4);
        let mut commit = Commit::empty();
        commit.height = 3;
        commit.block_id = BlockId::new(header.hash());
        let sh = SignedHeader { header, commit };
        assert!(sh.validate_basic("test-chain").is_err());
    }

    #[test]
    fn test_signed_header_rejects_mismatched_block_id() {
        let header = make_header(4);
        let mut commit = Commit::empty();
        commit.height = 4;
        let sh = SignedHeader { header, commit };
        assert!(sh.validate_basic("test-chain").is_err());
    }

    #[test]
    fn test_signed_header_accepts_matching_pair() {
        let header = make_header(4);
        let mut commit = Commit::empty();
        commit.height = 4;
        commit.block_id = BlockId::new(header.hash());
        let sh = SignedHeader { header, commit };
        assert!(sh.validate_basic("test-chain").is_ok());
    }
}
