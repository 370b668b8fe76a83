//! A minimal in-process key-value application.
//!
//! Transactions are UTF-8 `key=value` pairs. The app hash is a digest over
//! the sorted store contents, so every honest instance converges on the
//! same hash after the same block sequence. Used by the engine's tests and
//! as a template for wiring real applications into the emulator.
//!
//! A few knobs make failure paths reachable from tests: rejecting
//! transactions or proposals, delaying every call (to trip dispatch
//! timeouts), scripting validator or consensus-param updates into the next
//! FinalizeBlock response, and setting the vote extension payload.

use {
    crate::{
        app::{AppError, AppResult, Application},
        types::*,
    },
    async_trait::async_trait,
    parking_lot::Mutex,
    std::{
        collections::BTreeMap,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    },
};

#[derive(Debug, Default)]
struct KvState {
    entries: BTreeMap<String, String>,
    last_height: u64,
    last_app_hash: Vec<u8>,
}

impl KvState {
    fn app_hash(&self) -> Vec<u8> {
        let lines: Vec<Vec<u8>> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{k}={v}").into_bytes())
            .collect();
        let refs: Vec<&[u8]> = lines.iter().map(|l| l.as_slice()).collect();
        solana_sha256_hasher::hashv(&refs).to_bytes().to_vec()
    }
}

/// The reference key-value application.
#[derive(Default)]
pub struct KvStore {
    state: Mutex<KvState>,
    reject_txs: AtomicBool,
    reject_proposals: AtomicBool,
    vote_extension: Mutex<Vec<u8>>,
    response_delay: Mutex<Option<Duration>>,
    queued_validator_updates: Mutex<Vec<ValidatorUpdate>>,
    queued_param_updates: Mutex<Option<ConsensusParamUpdates>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make CheckTx reject every transaction with a non-zero code.
    pub fn set_reject_txs(&self, reject: bool) {
        self.reject_txs.store(reject, Ordering::SeqCst);
    }

    /// Make ProcessProposal reject every proposed block.
    pub fn set_reject_proposals(&self, reject: bool) {
        self.reject_proposals.store(reject, Ordering::SeqCst);
    }

    /// Set the payload ExtendVote will attach to precommits.
    pub fn set_vote_extension(&self, extension: Vec<u8>) {
        *self.vote_extension.lock() = extension;
    }

    /// Delay every call by `delay`; `None` restores immediate responses.
    pub fn set_response_delay(&self, delay: Option<Duration>) {
        *self.response_delay.lock() = delay;
    }

    /// Queue validator updates to be returned by the next FinalizeBlock.
    pub fn queue_validator_updates(&self, updates: Vec<ValidatorUpdate>) {
        *self.queued_validator_updates.lock() = updates;
    }

    /// Queue consensus-param updates to be returned by the next FinalizeBlock.
    pub fn queue_param_updates(&self, updates: ConsensusParamUpdates) {
        *self.queued_param_updates.lock() = Some(updates);
    }

    /// Read a value from the store.
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().entries.get(key).cloned()
    }

    async fn maybe_delay(&self) {
        let delay = *self.response_delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

fn parse_tx(tx: &[u8]) -> Result<(String, String), String> {
    let text = std::str::from_utf8(tx).map_err(|_| "transaction is not utf-8".to_string())?;
    match text.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {text:?}")),
    }
}

#[async_trait]
impl Application for KvStore {
    async fn info(&self, _req: RequestInfo) -> AppResult<ResponseInfo> {
        self.maybe_delay().await;
        let state = self.state.lock();
        Ok(ResponseInfo {
            data: "kvstore".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            app_version: 1,
            last_block_height: state.last_height,
            last_block_app_hash: state.last_app_hash.clone(),
        })
    }

    async fn init_chain(&self, req: RequestInitChain) -> AppResult<ResponseInitChain> {
        self.maybe_delay().await;
        let mut state = self.state.lock();
        if !req.app_state_bytes.is_empty() {
            let text = std::str::from_utf8(&req.app_state_bytes)
                .map_err(|_| AppError::Internal("genesis app state is not utf-8".to_string()))?;
            for line in text.lines().filter(|l| !l.is_empty()) {
                let (k, v) = parse_tx(line.as_bytes()).map_err(AppError::Internal)?;
                state.entries.insert(k, v);
            }
        }
        state.last_app_hash = state.app_hash();
        Ok(ResponseInitChain {
            consensus_params: None,
            validators: Vec::new(),
            app_hash: state.last_app_hash.clone(),
        })
    }

    async fn check_tx(&self, req: RequestCheckTx) -> AppResult<ResponseCheckTx> {
        self.maybe_delay().await;
        if self.reject_txs.load(Ordering::SeqCst) {
            return Ok(ResponseCheckTx {
                code: 1,
                log: "transactions are currently rejected".to_string(),
                ..Default::default()
            });
        }
        match parse_tx(&req.tx) {
            Ok(_) => Ok(ResponseCheckTx::default()),
            Err(log) => Ok(ResponseCheckTx {
                code: 1,
                log,
                ..Default::default()
            }),
        }
    }

    async fn prepare_proposal(
        &self,
        req: RequestPrepareProposal,
    ) -> AppResult<ResponsePrepareProposal> {
        self.maybe_delay().await;
        // No reordering: seal the transactions exactly as offered.
        Ok(ResponsePrepareProposal { txs: req.txs })
    }

    async fn process_proposal(
        &self,
        req: RequestProcessProposal,
    ) -> AppResult<ResponseProcessProposal> {
        self.maybe_delay().await;
        if self.reject_proposals.load(Ordering::SeqCst) {
            return Ok(ResponseProcessProposal {
                status: ProposalStatus::Reject,
            });
        }
        let all_valid = req.txs.iter().all(|tx| parse_tx(tx).is_ok());
        Ok(ResponseProcessProposal {
            status: if all_valid {
                ProposalStatus::Accept
            } else {
                ProposalStatus::Reject
            },
        })
    }

    async fn extend_vote(&self, _req: RequestExtendVote) -> AppResult<ResponseExtendVote> {
        self.maybe_delay().await;
        Ok(ResponseExtendVote {
            vote_extension: self.vote_extension.lock().clone(),
        })
    }

    async fn verify_vote_extension(
        &self,
        _req: RequestVerifyVoteExtension,
    ) -> AppResult<ResponseVerifyVoteExtension> {
        self.maybe_delay().await;
        Ok(ResponseVerifyVoteExtension {
            status: VerifyStatus::Accept,
        })
    }

    async fn finalize_block(
        &self,
        req: RequestFinalizeBlock,
    ) -> AppResult<ResponseFinalizeBlock> {
        self.maybe_delay().await;
        let mut state = self.state.lock();
        let mut tx_results = Vec::with_capacity(req.txs.len());
        for tx in &req.txs {
            match parse_tx(tx) {
                Ok((k, v)) => {
                    state.entries.insert(k.clone(), v.clone());
                    tx_results.push(ExecTxResult {
                        events: vec![Event {
                            kind: "store".to_string(),
                            attributes: vec![EventAttribute {
                                key: k,
                                value: v,
                                index: true,
                            }],
                        }],
                        ..Default::default()
                    });
                }
                Err(log) => tx_results.push(ExecTxResult {
                    code: 1,
                    log,
                    ..Default::default()
                }),
            }
        }
        state.last_height = req.height;
        state.last_app_hash = state.app_hash();
        Ok(ResponseFinalizeBlock {
            events: Vec::new(),
            tx_results,
            validator_updates: std::mem::take(&mut *self.queued_validator_updates.lock()),
            consensus_param_updates: self.queued_param_updates.lock().take(),
            app_hash: state.last_app_hash.clone(),
        })
    }

    async fn commit(&self, _req: RequestCommit) -> AppResult<ResponseCommit> {
        self.maybe_delay().await;
        Ok(ResponseCommit { retain_height: 0 })
    }

    async fn query(&self, req: RequestQuery) -> AppResult<ResponseQuery> {
        self.maybe_delay().await;
        if req.path != "/store" {
            return Ok(ResponseQuery {
                code: 1,
                log: format!("unknown query path {:?}", req.path),
                ..Default::default()
            });
        }
        let key = String::from_utf8_lossy(&req.data).to_string();
        let state = self.state.lock();
        match state.entries.get(&key) {
            Some(value) => Ok(ResponseQuery {
                key: req.data,
                value: value.clone().into_bytes(),
                height: state.last_height,
                ..Default::default()
            }),
            None => Ok(ResponseQuery {
                code: 1,
                log: format!("key {key:?} not found"),
                key: req.data,
                height: state.last_height,
                ..Default::default()
            }),
        }
    }
}
