//! The `Application` trait: one async method per protocol call.
//!
//! A backend is anything that can answer the ten protocol calls — an
//! in-process application (see [`crate::kvstore`]) or a proxy to a remote
//! process. Connection establishment is the caller's concern; by the time
//! an implementation is handed to the emulator it must be ready to serve
//! requests.

use {crate::types::*, async_trait::async_trait, thiserror::Error};

/// Errors surfaced by an application backend.
///
/// These are infrastructure failures. Application-level rejections travel
/// inside the responses (status enums, non-zero codes) and are never mapped
/// onto this type.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// The backend exists but cannot currently serve requests.
    #[error("application unavailable: {0}")]
    Unavailable(String),

    /// The backend failed while handling the request.
    #[error("application error: {0}")]
    Internal(String),
}

/// Convenience result type for application calls.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// The application side of the consensus interface.
///
/// Implementations must be safe to call from multiple tasks; the emulator
/// fans some calls out to all backends concurrently.
#[async_trait]
pub trait Application: Send + Sync {
    async fn info(&self, req: RequestInfo) -> AppResult<ResponseInfo>;

    async fn init_chain(&self, req: RequestInitChain) -> AppResult<ResponseInitChain>;

    async fn check_tx(&self, req: RequestCheckTx) -> AppResult<ResponseCheckTx>;

    async fn prepare_proposal(
        &self,
        req: RequestPrepareProposal,
    ) -> AppResult<ResponsePrepareProposal>;

    async fn process_proposal(
        &self,
        req: RequestProcessProposal,
    ) -> AppResult<ResponseProcessProposal>;

    async fn extend_vote(&self, req: RequestExtendVote) -> AppResult<ResponseExtendVote>;

    async fn verify_vote_extension(
        &self,
        req: RequestVerifyVoteExtension,
    ) -> AppResult<ResponseVerifyVoteExtension>;

    async fn finalize_block(&self, req: RequestFinalizeBlock)
        -> AppResult<ResponseFinalizeBlock>;

    async fn commit(&self, req: RequestCommit) -> AppResult<ResponseCommit>;

    async fn query(&self, req: RequestQuery) -> AppResult<ResponseQuery>;
}
