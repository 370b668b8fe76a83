//! Request and response types for the application-consensus interface.
//!
//! One request/response pair per protocol call (Info, InitChain, CheckTx,
//! PrepareProposal, ProcessProposal, ExtendVote, VerifyVoteExtension,
//! FinalizeBlock, Commit, Query), plus the auxiliary commit-info and
//! validator-update types those calls carry.
//!
//! Hashes, addresses, and public keys are raw byte vectors on this
//! boundary; the engine owns the typed representations. Everything here is
//! serde-serializable so the same structs double as wire types when a
//! transport is layered on top.

use serde::{Deserialize, Serialize};

/// Transactions cross the interface as opaque bytes.
pub type TxBytes = Vec<u8>;

// ---------------------------------------------------------------------------
// Info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInfo {
    /// Arbitrary application identifier.
    pub data: String,
    /// Application software version.
    pub version: String,
    /// Application protocol version.
    pub app_version: u64,
    /// Height of the last block the application committed.
    pub last_block_height: u64,
    /// App hash produced by that commit.
    pub last_block_app_hash: Vec<u8>,
}

// ---------------------------------------------------------------------------
// InitChain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInitChain {
    /// Genesis time in unix milliseconds.
    pub time_ms: i64,
    pub chain_id: String,
    pub consensus_params: Option<ConsensusParamUpdates>,
    /// The initial validator set.
    pub validators: Vec<ValidatorUpdate>,
    /// Raw application genesis state.
    pub app_state_bytes: Vec<u8>,
    pub initial_height: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInitChain {
    /// If set, overrides the consensus params from genesis.
    pub consensus_params: Option<ConsensusParamUpdates>,
    /// If non-empty, overrides the validator set from genesis.
    pub validators: Vec<ValidatorUpdate>,
    /// If non-empty, overrides the app hash from genesis.
    pub app_hash: Vec<u8>,
}

// ---------------------------------------------------------------------------
// CheckTx
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCheckTx {
    pub tx: TxBytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCheckTx {
    /// 0 = valid; anything else rejects the transaction.
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
}

impl ResponseCheckTx {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

// ---------------------------------------------------------------------------
// PrepareProposal / ProcessProposal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPrepareProposal {
    /// Maximum total size of the returned tx list; -1 means unlimited.
    pub max_tx_bytes: i64,
    pub txs: Vec<TxBytes>,
    pub local_last_commit: ExtendedCommitInfo,
    pub misbehavior: Vec<Misbehavior>,
    pub height: u64,
    pub time_ms: i64,
    pub next_validators_hash: Vec<u8>,
    pub proposer_address: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePrepareProposal {
    /// The (possibly reordered or pruned) transaction list to seal.
    pub txs: Vec<TxBytes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestProcessProposal {
    pub txs: Vec<TxBytes>,
    pub proposed_last_commit: CommitInfo,
    pub misbehavior: Vec<Misbehavior>,
    /// Hash of the proposed block.
    pub hash: Vec<u8>,
    pub height: u64,
    pub time_ms: i64,
    pub next_validators_hash: Vec<u8>,
    pub proposer_address: Vec<u8>,
}

/// Verdict on a proposed block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    #[default]
    Unknown,
    Accept,
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseProcessProposal {
    pub status: ProposalStatus,
}

impl ResponseProcessProposal {
    pub fn is_accepted(&self) -> bool {
        self.status == ProposalStatus::Accept
    }

    pub fn is_status_unknown(&self) -> bool {
        self.status == ProposalStatus::Unknown
    }
}

// ---------------------------------------------------------------------------
// ExtendVote / VerifyVoteExtension
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestExtendVote {
    /// Hash of the block being voted on.
    pub hash: Vec<u8>,
    pub height: u64,
    pub time_ms: i64,
    pub txs: Vec<TxBytes>,
    pub proposed_last_commit: CommitInfo,
    pub misbehavior: Vec<Misbehavior>,
    pub next_validators_hash: Vec<u8>,
    pub proposer_address: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseExtendVote {
    pub vote_extension: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVerifyVoteExtension {
    pub hash: Vec<u8>,
    /// Address of the validator that produced the extension.
    pub validator_address: Vec<u8>,
    pub height: u64,
    pub vote_extension: Vec<u8>,
}

/// Verdict on another validator's vote extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyStatus {
    #[default]
    Unknown,
    Accept,
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseVerifyVoteExtension {
    pub status: VerifyStatus,
}

impl ResponseVerifyVoteExtension {
    pub fn is_accepted(&self) -> bool {
        self.status == VerifyStatus::Accept
    }

    pub fn is_status_unknown(&self) -> bool {
        self.status == VerifyStatus::Unknown
    }
}

// ---------------------------------------------------------------------------
// FinalizeBlock / Commit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFinalizeBlock {
    pub txs: Vec<TxBytes>,
    pub decided_last_commit: CommitInfo,
    pub misbehavior: Vec<Misbehavior>,
    /// Hash of the decided block.
    pub hash: Vec<u8>,
    pub height: u64,
    pub time_ms: i64,
    pub proposer_address: Vec<u8>,
    pub next_validators_hash: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFinalizeBlock {
    /// Block-level events.
    pub events: Vec<Event>,
    /// One result per transaction, in block order.
    pub tx_results: Vec<ExecTxResult>,
    /// Changes to the validator set, effective with a two-height delay.
    pub validator_updates: Vec<ValidatorUpdate>,
    /// Changes to the consensus params, effective with a one-height delay.
    pub consensus_param_updates: Option<ConsensusParamUpdates>,
    /// Digest of the application state after this block.
    pub app_hash: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCommit {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCommit {
    /// Lowest height the application still needs; 0 = retain everything.
    pub retain_height: u64,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestQuery {
    pub data: Vec<u8>,
    pub path: String,
    /// 0 = latest. The emulator only ever forwards 0.
    pub height: u64,
    pub prove: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseQuery {
    pub code: u32,
    pub log: String,
    pub index: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub height: u64,
}

// ---------------------------------------------------------------------------
// Commit info carried inside proposal/finalize requests
// ---------------------------------------------------------------------------

/// How a validator's vote appears in a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockIdFlag {
    /// The validator did not vote.
    #[default]
    Absent,
    /// The validator voted for the committed block.
    Commit,
    /// The validator voted nil.
    Nil,
}

/// A validator as seen across the interface: raw address bytes plus power.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Vec<u8>,
    pub power: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    pub validator: Validator,
    pub block_id_flag: BlockIdFlag,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedVoteInfo {
    pub validator: Validator,
    /// Application-defined payload attached to the precommit.
    pub vote_extension: Vec<u8>,
    pub block_id_flag: BlockIdFlag,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub round: u32,
    pub votes: Vec<VoteInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedCommitInfo {
    pub round: u32,
    pub votes: Vec<ExtendedVoteInfo>,
}

// ---------------------------------------------------------------------------
// Validator updates and consensus param updates
// ---------------------------------------------------------------------------

/// A change to a single validator's power, as returned by FinalizeBlock.
///
/// Power 0 removes the validator; the power is signed so that invalid
/// negative updates can be represented and rejected by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    /// Public-key algorithm, e.g. "ed25519".
    pub pub_key_type: String,
    pub pub_key_bytes: Vec<u8>,
    pub power: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParamUpdates {
    /// Maximum total block size in bytes; -1 = unlimited.
    pub max_bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorParamUpdates {
    /// Allowed public-key algorithms for validator updates.
    pub pub_key_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciParamUpdates {
    /// First height at which vote extensions are required; 0 disables them.
    pub vote_extensions_enable_height: u64,
}

/// Partial update to the consensus parameters; `None` fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParamUpdates {
    pub block: Option<BlockParamUpdates>,
    pub validator: Option<ValidatorParamUpdates>,
    pub abci: Option<AbciParamUpdates>,
}

// ---------------------------------------------------------------------------
// Misbehavior and execution results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisbehaviorKind {
    #[default]
    Unknown,
    DuplicateVote,
    LightClientAttack,
}

/// Evidence of validator misbehaviour as delivered to applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Misbehavior {
    pub kind: MisbehaviorKind,
    pub validator: Validator,
    pub height: u64,
    pub time_ms: i64,
    pub total_voting_power: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
    pub index: bool,
}

/// A typed event emitted during block execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

/// Result of executing a single transaction inside FinalizeBlock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecTxResult {
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub events: Vec<Event>,
}

impl ExecTxResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}
