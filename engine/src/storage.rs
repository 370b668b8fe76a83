//! The persistence collaborator.
//!
//! Historical state, blocks, commits, and execution results live outside
//! the engine behind the [`Storage`] trait. The engine calls
//! `update_stores` while holding its state write lock, so an implementation
//! never observes a stored block whose in-memory state has not advanced.
//! The in-memory implementation here is enough for tests and single-process
//! harnesses.

use {
    crate::{state::ChainState, types::Block, vote::Commit},
    chainmock_abci::types::ResponseFinalizeBlock,
    parking_lot::Mutex,
    std::collections::HashMap,
    thiserror::Error,
};

/// Errors from the persistence collaborator.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("nothing stored at height {0}")]
    NotFound(u64),

    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Persistence interface consumed by the engine.
///
/// `update_stores` must record everything for `height` atomically; the
/// engine invokes it strictly before advancing the in-memory state.
pub trait Storage: Send + Sync {
    fn update_stores(
        &self,
        height: u64,
        block: &Block,
        commit: &Commit,
        state: &ChainState,
        result: &ResponseFinalizeBlock,
    ) -> Result<(), StorageError>;

    /// The chain state as of the given height.
    fn state_at(&self, height: u64) -> Result<ChainState, StorageError>;

    /// The block committed at the given height.
    fn block_at(&self, height: u64) -> Result<Block, StorageError>;

    /// The commit for the given height.
    fn commit_at(&self, height: u64) -> Result<Commit, StorageError>;
}

#[derive(Default)]
struct Stores {
    states: HashMap<u64, ChainState>,
    blocks: HashMap<u64, Block>,
    commits: HashMap<u64, Commit>,
    results: HashMap<u64, ResponseFinalizeBlock>,
}

/// Map-backed storage; retains every height it is given.
#[derive(Default)]
pub struct InMemoryStorage {
    stores: Mutex<Stores>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The finalize result recorded at the given height.
    pub fn result_at(&self, height: u64) -> Result<ResponseFinalizeBlock, StorageError> {
        self.stores
            .lock()
            .results
            .get(&height)
            .cloned()
            .ok_or(StorageError::NotFound(height))
    }
}

impl Storage for InMemoryStorage {
    fn update_stores(
        &self,
        height: u64,
        block: &Block,
        commit: &Commit,
        state: &ChainState,
        result: &ResponseFinalizeBlock,
    ) -> Result<(), StorageError> {
        let mut stores = self.stores.lock();
        stores.states.insert(height, state.clone());
        stores.blocks.insert(height, block.clone());
        stores.commits.insert(height, commit.clone());
        stores.results.insert(height, result.clone());
        Ok(())
    }

    fn state_at(&self, height: u64) -> Result<ChainState, StorageError> {
        self.stores
            .lock()
            .states
            .get(&height)
            .cloned()
            .ok_or(StorageError::NotFound(height))
    }

    fn block_at(&self, height: u64) -> Result<Block, StorageError> {
        self.stores
            .lock()
            .blocks
            .get(&height)
            .cloned()
            .ok_or(StorageError::NotFound(height))
    }

    fn commit_at(&self, height: u64) -> Result<Commit, StorageError> {
        self.stores
            .lock()
            .commits
            .get(&height)
            .cloned()
            .ok_or(StorageError::NotFound(height))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{params::ConsensusParams, state::Genesis},
        solana_keypair::Keypair,
        solana_signer::Signer,
    };

    fn make_state() -> ChainState {
        let keypair = Keypair::new();
        ChainState::from_genesis(&Genesis {
            chain_id: "test-chain".to_string(),
            initial_height: 1,
            genesis_time_ms: 0,
            validators: vec![(keypair.pubkey(), 1)],
            consensus_params: ConsensusParams::default(),
            app_state: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let storage = InMemoryStorage::new();
        let state = make_state();
        let block = state.make_block(
            1,
            1000,
            Vec::new(),
            Commit::empty(),
            Vec::new(),
            state.last_validators.proposer().unwrap().address,
        );

        storage
            .update_stores(
                1,
                &block,
                &Commit::empty(),
                &state,
                &ResponseFinalizeBlock::default(),
            )
            .unwrap();

        assert_eq!(storage.state_at(1).unwrap(), state);
        assert_eq!(storage.block_at(1).unwrap().hash(), block.hash());
        assert!(storage.commit_at(1).is_ok());
        assert!(storage.result_at(1).is_ok());
    }

    #[test]
    fn test_missing_height() {
        let storage = InMemoryStorage::new();
        assert!(matches!(
            storage.state_at(7),
            Err(StorageError::NotFound(7))
        ));
    }
}
