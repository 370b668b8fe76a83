//! Error taxonomy for the block-production engine.
//!
//! Every round-aborting failure maps onto one of these variants; the chain
//! state is only advanced after the whole round has succeeded, so a caller
//! seeing any of them can assume the state is exactly what it was before
//! the call. Unrecoverable protocol violations (see `engine::run_block`)
//! terminate the process instead of surfacing here.

use {
    crate::storage::StorageError, chainmock_abci::AppError, solana_pubkey::Pubkey,
    thiserror::Error,
};

/// Errors that can abort a production round or reject a query.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A backend did not answer within the configured timeout. It is
    /// marked unreachable and excluded from all future calls.
    #[error("backend at address {0} is unreachable")]
    Unreachable(String),

    /// Every backend is marked unreachable.
    #[error("no connected backends")]
    NoConnectedBackends,

    /// A backend failed while handling a request.
    #[error(transparent)]
    App(#[from] AppError),

    /// No validator with the given address exists in the current set.
    #[error("validator with address {0} not found")]
    UnknownValidator(String),

    /// A validator has no registered backend.
    #[error("no backend registered for validator {0}")]
    MissingCounterparty(Pubkey),

    /// CheckTx rejected the transaction before the round started.
    #[error("transaction rejected by backend at {address}: code {code}: {log}")]
    TxRejected {
        address: String,
        code: u32,
        log: String,
    },

    /// The sealed transaction list failed size or shape checks.
    #[error("invalid transactions: {0}")]
    InvalidTxs(String),

    /// A non-proposer backend rejected a proposal the proposer built.
    #[error("non-proposer {0} did not accept the proposal")]
    ProposalRejected(Pubkey),

    /// A vote failed basic well-formedness or signature checks.
    #[error("invalid vote: {0}")]
    InvalidVote(String),

    /// A validator produced two different votes for the same round.
    #[error("conflicting vote from validator {0}")]
    ConflictingVote(Pubkey),

    /// A vote was accepted before but did not increase the tallied power.
    #[error("vote from validator {0} was not added to the vote set")]
    VoteNotAdded(Pubkey),

    /// The vote set never accumulated more than 2/3 of the voting power.
    #[error("quorum not reached: have {have} of {total} voting power")]
    QuorumNotReached { have: u64, total: u64 },

    /// The assembled commit failed re-verification against the validator set.
    #[error("commit verification failed: {0}")]
    CommitVerification(String),

    /// The header+commit pair is not a well-formed signed light block.
    #[error("invalid light block: {0}")]
    InvalidLightBlock(String),

    /// FinalizeBlock returned an unusable validator update.
    #[error("invalid validator update: {0}")]
    InvalidValidatorUpdate(String),

    /// FinalizeBlock returned unusable consensus params.
    #[error("invalid consensus params: {0}")]
    InvalidConsensusParams(String),

    /// Cross-check mode found backends disagreeing on a response.
    #[error("responses to {call} are not all equal: {details}")]
    NonDeterminism {
        call: &'static str,
        details: String,
    },

    /// Only the latest height is retained; explicit heights are rejected.
    #[error("height parameter is not supported, only the latest height is available")]
    HeightNotSupported,

    /// Page number outside the valid pagination range.
    #[error("page should be within [1, {max}] range, given {page}")]
    PageOutOfRange { page: usize, max: usize },

    /// The time offset only ever grows.
    #[error("time offset cannot be decremented, please provide a non-negative offset")]
    NegativeTimeOffset,

    /// Misbehaviour kind string did not parse.
    #[error(
        "unknown misbehaviour type {0}, possible types are: \
         DuplicateVote, Equivocation, Lunatic, Amnesia"
    )]
    UnknownMisbehaviour(String),

    /// Evidence was requested before any block was committed.
    #[error("no block has been committed yet")]
    NoCommittedBlock,

    /// The persistence collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The engine was constructed with an invalid configuration.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// A validator set ended up empty where one is required.
    #[error("validator set is empty")]
    EmptyValidatorSet,
}

/// Convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
