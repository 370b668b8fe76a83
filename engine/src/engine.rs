//! The block-production engine.
//!
//! One [`Engine`] drives N application backends through the full protocol
//! sequence a real consensus engine would issue — CheckTx, proposal
//! preparation and processing, vote extension exchange, vote aggregation,
//! finalization, and commit — producing a deterministic chain of blocks.
//!
//! Rounds are serialized behind a single lock: the protocol sequence is
//! not safe to interleave across rounds. A narrower lock guards the
//! transition from "finalize executed" to "state advanced and persisted",
//! so a concurrent reader never observes a block in storage whose
//! in-memory state has not advanced.
//!
//! Some failures have no safe recovery — a proposal that cannot be built,
//! an unrecognized protocol status, a rejected vote extension — and
//! terminate the process rather than return an error, since continuing
//! would leave protocol invariants violated.

use {
    crate::{
        config::EngineConfig,
        dispatch::{Counterparty, PeerDispatch},
        error::{EngineError, Result},
        evidence::{
            duplicate_vote_evidence, light_client_attack_evidence, Evidence, MisbehaviourKind,
        },
        event::{BlockEvent, EventSink},
        query::{self, ValidatorsPage},
        state::{next_state, validate_validator_updates, ChainState, Genesis},
        storage::Storage,
        types::{validate_txs, Block, BlockId, LightBlock, SignedHeader, Tx},
        vote::{build_commit_info, build_extended_commit_info, Commit, Vote, VoteSet},
    },
    chainmock_abci::{
        types::{
            Misbehavior, RequestCheckTx, RequestCommit, RequestExtendVote, RequestFinalizeBlock,
            RequestInfo, RequestInitChain, RequestPrepareProposal, RequestProcessProposal,
            RequestQuery, RequestVerifyVoteExtension, ResponseCheckTx, ResponseCommit,
            ResponseFinalizeBlock, ResponseInfo, ResponseQuery, ValidatorUpdate,
        },
        Application,
    },
    log::{debug, info, warn},
    parking_lot::{Mutex, RwLock},
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signer::Signer,
    std::{
        collections::HashMap,
        str::FromStr,
        sync::Arc,
        time::{SystemTime, UNIX_EPOCH},
    },
};

/// Everything a successful round returns to the caller.
#[derive(Debug)]
pub struct BlockResult {
    /// Present when the round carried a transaction.
    pub check_tx: Option<ResponseCheckTx>,
    pub finalize: ResponseFinalizeBlock,
    pub commit: ResponseCommit,
}

/// State shared between rounds and readers, guarded by one lock.
#[derive(Debug)]
struct SharedState {
    state: ChainState,
    last_block: Option<Block>,
    last_commit: Option<Commit>,
}

/// The consensus emulator.
pub struct Engine {
    dispatch: PeerDispatch,
    /// Signing capability per validator address. Parallel to the dispatch
    /// collection, joined by address lookup.
    signers: HashMap<Pubkey, Arc<Keypair>>,
    storage: Arc<dyn Storage>,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
    /// Exactly one production round may run at a time.
    round_lock: tokio::sync::Mutex<()>,
    shared: RwLock<SharedState>,
    /// Validator address -> should it sign votes. Independent of liveness.
    signing_status: RwLock<HashMap<Pubkey, bool>>,
    /// Added to every produced timestamp; only ever grows.
    time_offset_ms: Mutex<i64>,
}

impl Engine {
    /// Build an engine over the given backends and signers.
    ///
    /// The two collections are joined by validator address; every signer's
    /// validator starts with signing enabled.
    pub fn new(
        clients: Vec<Counterparty>,
        signers: Vec<Arc<Keypair>>,
        genesis: &Genesis,
        storage: Arc<dyn Storage>,
        events: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let state = ChainState::from_genesis(genesis)?;
        let signers: HashMap<Pubkey, Arc<Keypair>> = signers
            .into_iter()
            .map(|kp| (kp.pubkey(), kp))
            .collect();
        let signing_status = signers.keys().map(|addr| (*addr, true)).collect();
        let call_timeout = config.call_timeout;
        Ok(Self {
            dispatch: PeerDispatch::new(clients, call_timeout),
            signers,
            storage,
            events,
            config,
            round_lock: tokio::sync::Mutex::new(()),
            shared: RwLock::new(SharedState {
                state,
                last_block: None,
                last_commit: None,
            }),
            signing_status: RwLock::new(signing_status),
            time_offset_ms: Mutex::new(0),
        })
    }

    // -- Read access --

    /// Snapshot of the latest chain state. Reads without the round lock.
    pub fn chain_state(&self) -> ChainState {
        self.shared.read().state.clone()
    }

    pub fn latest_height(&self) -> u64 {
        self.shared.read().state.last_block_height
    }

    pub fn last_block(&self) -> Option<Block> {
        self.shared.read().last_block.clone()
    }

    pub fn last_commit(&self) -> Option<Commit> {
        self.shared.read().last_commit.clone()
    }

    pub fn dispatch(&self) -> &PeerDispatch {
        &self.dispatch
    }

    // -- Time offset --

    pub fn time_offset_ms(&self) -> i64 {
        *self.time_offset_ms.lock()
    }

    /// Advance the global time offset. Negative increments are rejected
    /// and leave the offset unchanged.
    pub fn increment_time_offset(&self, additional_ms: i64) -> Result<()> {
        if additional_ms < 0 {
            warn!("time offset cannot be decremented");
            return Err(EngineError::NegativeTimeOffset);
        }
        let mut offset = self.time_offset_ms.lock();
        *offset += additional_ms;
        debug!("time offset incremented by {additional_ms}ms to {}ms", *offset);
        Ok(())
    }

    /// Wall-clock time plus the configured offset, in unix milliseconds.
    fn now_ms(&self) -> i64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        wall + self.time_offset_ms()
    }

    // -- Signing status --

    /// Whether the given validator currently signs votes.
    pub fn signing_status(&self, address: &Pubkey) -> Result<bool> {
        self.signing_status
            .read()
            .get(address)
            .copied()
            .ok_or_else(|| EngineError::UnknownValidator(address.to_string()))
    }

    /// A read-only copy of the whole signing-status map.
    pub fn signing_status_map(&self) -> HashMap<Pubkey, bool> {
        self.signing_status.read().clone()
    }

    /// Toggle whether a validator signs votes. The backend stays reachable;
    /// only its vote is withheld.
    pub fn set_signing_status(&self, address: &Pubkey, status: bool) -> Result<()> {
        let mut map = self.signing_status.write();
        let entry = map
            .get_mut(address)
            .ok_or_else(|| EngineError::UnknownValidator(address.to_string()))?;
        *entry = status;
        info!("signing status for {address} set to {status}");
        Ok(())
    }

    // -- Startup protocol calls --

    /// Broadcast Info and return the first response.
    pub async fn send_info(&self) -> Result<ResponseInfo> {
        debug!("sending Info to backends");
        let responses = self
            .dispatch
            .call_all("Info", self.config.cross_check_responses, |app| async move {
                app.info(RequestInfo {}).await
            })
            .await?;
        responses
            .into_iter()
            .next()
            .map(|(_, r)| r)
            .ok_or(EngineError::NoConnectedBackends)
    }

    /// Broadcast InitChain built from the genesis document and fold the
    /// response overrides into the chain state.
    pub async fn send_init_chain(&self, genesis: &Genesis) -> Result<()> {
        info!("sending InitChain to backends");
        let request = RequestInitChain {
            time_ms: genesis.genesis_time_ms,
            chain_id: genesis.chain_id.clone(),
            consensus_params: Some(genesis.consensus_params.as_updates()),
            validators: genesis
                .validators
                .iter()
                .map(|(address, power)| ValidatorUpdate {
                    pub_key_type: crate::params::ED25519.to_string(),
                    pub_key_bytes: address.to_bytes().to_vec(),
                    power: *power as i64,
                })
                .collect(),
            app_state_bytes: genesis.app_state.clone(),
            initial_height: genesis.initial_height,
        };

        let responses = self
            .dispatch
            .call_all(
                "InitChain",
                self.config.cross_check_responses,
                move |app| {
                    let request = request.clone();
                    async move { app.init_chain(request).await }
                },
            )
            .await?;
        let first = responses
            .into_iter()
            .next()
            .map(|(_, r)| r)
            .ok_or(EngineError::NoConnectedBackends)?;
        self.shared.write().state.absorb_init_chain(&first)
    }

    // -- Block production --

    /// Run one production round carrying at most the given transaction.
    pub async fn run_block(&self, tx: Option<Tx>) -> Result<BlockResult> {
        self.run_block_with_evidence(tx, Vec::new()).await
    }

    /// Run `count` empty rounds.
    pub async fn run_blocks(&self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.run_block(None).await?;
        }
        Ok(())
    }

    /// Validate and commit a transaction in its own block, returning once
    /// it is committed.
    pub async fn submit_tx(&self, tx: Tx) -> Result<BlockResult> {
        self.run_block(Some(tx)).await
    }

    /// Run one round, injecting the requested misbehaviour evidence into
    /// the produced block.
    pub async fn run_block_with_evidence(
        &self,
        tx: Option<Tx>,
        misbehaviour: Vec<(Pubkey, MisbehaviourKind)>,
    ) -> Result<BlockResult> {
        debug!("waiting for the round lock");
        let _round = self.round_lock.lock().await;
        info!("running block");

        let (cur, last_block, last_commit) = {
            let shared = self.shared.read();
            (
                shared.state.clone(),
                shared.last_block.clone(),
                shared.last_commit.clone(),
            )
        };
        let new_height = cur.last_block_height + 1;
        let block_time_ms = self.now_ms();

        // 1. Pre-validate the transaction against every reachable backend.
        let check_tx = match &tx {
            Some(tx) => Some(self.broadcast_check_tx(tx).await?),
            None => None,
        };
        let txs: Vec<Tx> = tx.into_iter().collect();

        // 2. Resolve misbehaviour requests into concrete evidence before
        //    any block is built, so it travels inside the proposal.
        let evidence = self
            .synthesize_evidence(&cur, last_block.as_ref(), last_commit.as_ref(), &misbehaviour)
            .await?;

        // 3. The proposer is whoever the last validator set recorded.
        let proposer_address = cur
            .last_validators
            .proposer()
            .map(|v| v.address)
            .ok_or(EngineError::EmptyValidatorSet)?;
        let proposer_client = self
            .dispatch
            .get(&proposer_address)
            .ok_or(EngineError::MissingCounterparty(proposer_address))?;

        let last_commit_for_block = last_commit.clone().unwrap_or_else(Commit::empty);

        // 4. The proposer prepares the proposal; the returned transaction
        //    list must re-pass validity checks before being sealed.
        let block = self
            .create_proposal_block(
                &cur,
                proposer_client,
                new_height,
                block_time_ms,
                txs,
                &last_commit_for_block,
                &evidence,
            )
            .await?;

        // 5. Every other current validator processes the proposal.
        self.process_proposal_on_non_proposers(&cur, &block, proposer_address)
            .await?;

        // 6. Currently-signing validators extend and sign precommits; when
        //    extensions are active, every other signing backend verifies
        //    each extension.
        let extensions_enabled = cur
            .consensus_params
            .vote_extensions_enabled(new_height);
        let votes = self
            .collect_votes(&cur, &block, extensions_enabled)
            .await?;
        if extensions_enabled {
            self.verify_vote_extensions(&block, &votes).await;
        }

        // 7. Fold votes into a vote set and extract the commit.
        let mut vote_set = VoteSet::new(&cur.chain_id, new_height, 0, cur.validators.clone());
        for vote in votes.iter().flatten() {
            let added = vote_set.add_vote(vote.clone())?;
            if !added {
                return Err(EngineError::VoteNotAdded(vote.validator_address));
            }
        }
        let commit = vote_set.make_commit()?;

        // 8. Re-verify the commit before trusting it, and check the
        //    header+commit pair as a signed light block.
        cur.validators
            .verify_commit_light_trusting(&cur.chain_id, &commit, 1, 3)?;
        let light_block = LightBlock {
            signed_header: SignedHeader {
                header: block.header.clone(),
                commit: commit.clone(),
            },
            validator_set: cur.validators.clone(),
        };
        light_block.validate_basic(&cur.chain_id)?;

        // 9. Disseminate the finalized block.
        let finalize = self.broadcast_finalize_block(&cur, &block).await?;

        // 10. Persist, then advance the in-memory state, atomically from
        //     the perspective of any reader.
        let validator_updates =
            validate_validator_updates(&finalize.validator_updates, &cur.consensus_params)?;
        let block_id = block.block_id();
        let new_state = next_state(&cur, block_id, &block.header, &finalize, &validator_updates)?;
        {
            let mut shared = self.shared.write();
            self.storage
                .update_stores(new_height, &block, &commit, &cur, &finalize)?;
            shared.last_block = Some(block.clone());
            shared.last_commit = Some(commit);
            shared.state = new_state;
            self.fire_events(&block, &finalize, &validator_updates);
        }

        // 11. Commit on every backend; the app hash from execution becomes
        //     part of the next chain state.
        info!("sending Commit to backends");
        let commit_responses = self
            .dispatch
            .call_all(
                "Commit",
                self.config.cross_check_responses,
                |app| async move { app.commit(RequestCommit {}).await },
            )
            .await?;
        let commit_response = commit_responses
            .into_iter()
            .next()
            .map(|(_, r)| r)
            .ok_or(EngineError::NoConnectedBackends)?;
        self.shared.write().state.app_hash = finalize.app_hash.clone();

        info!("block {new_height} committed");
        Ok(BlockResult {
            check_tx,
            finalize,
            commit: commit_response,
        })
    }

    async fn broadcast_check_tx(&self, tx: &Tx) -> Result<ResponseCheckTx> {
        let responses = self
            .dispatch
            .call_all("CheckTx", self.config.cross_check_responses, |app| {
                let request = RequestCheckTx { tx: tx.clone() };
                async move { app.check_tx(request).await }
            })
            .await?;
        // Any rejection aborts the round before a block is built.
        for (address, response) in &responses {
            if !response.is_ok() {
                return Err(EngineError::TxRejected {
                    address: address.clone(),
                    code: response.code,
                    log: response.log.clone(),
                });
            }
        }
        responses
            .into_iter()
            .next()
            .map(|(_, r)| r)
            .ok_or(EngineError::NoConnectedBackends)
    }

    async fn synthesize_evidence(
        &self,
        cur: &ChainState,
        last_block: Option<&Block>,
        last_commit: Option<&Commit>,
        misbehaviour: &[(Pubkey, MisbehaviourKind)],
    ) -> Result<Vec<Evidence>> {
        if misbehaviour.is_empty() {
            return Ok(Vec::new());
        }
        let last_block = last_block.ok_or(EngineError::NoCommittedBlock)?;
        let last_commit = last_commit.ok_or(EngineError::NoCommittedBlock)?;
        let last_state = self.storage.state_at(last_block.header.height)?;

        let mut evidence = Vec::with_capacity(misbehaviour.len());
        for (address, kind) in misbehaviour {
            let item = match kind {
                MisbehaviourKind::DuplicateVote => {
                    let signer = self
                        .signers
                        .get(address)
                        .ok_or_else(|| EngineError::UnknownValidator(address.to_string()))?;
                    Evidence::DuplicateVote(duplicate_vote_evidence(
                        signer,
                        &cur.chain_id,
                        last_block,
                        &last_state,
                        self.now_ms(),
                    )?)
                }
                _ => Evidence::LightClientAttack(light_client_attack_evidence(
                    *kind,
                    *address,
                    last_block,
                    last_commit,
                    &cur.validators,
                    &last_state,
                )?),
            };
            evidence.push(item);
        }
        Ok(evidence)
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_proposal_block(
        &self,
        cur: &ChainState,
        proposer_client: &Counterparty,
        height: u64,
        time_ms: i64,
        txs: Vec<Tx>,
        last_commit: &Commit,
        evidence: &[Evidence],
    ) -> Result<Block> {
        let misbehavior: Vec<Misbehavior> =
            evidence.iter().flat_map(|e| e.to_abci()).collect();
        let candidate = cur.make_block(
            height,
            time_ms,
            txs,
            last_commit.clone(),
            evidence.to_vec(),
            proposer_client.validator_address,
        );

        let request = RequestPrepareProposal {
            max_tx_bytes: self.config.max_block_bytes,
            txs: candidate.txs.clone(),
            local_last_commit: build_extended_commit_info(last_commit, &cur.last_validators),
            misbehavior,
            height,
            time_ms,
            next_validators_hash: candidate.header.next_validators_hash.as_ref().to_vec(),
            proposer_address: proposer_client.validator_address.to_bytes().to_vec(),
        };

        let response = match self
            .dispatch
            .call_one(proposer_client, |app| async move {
                app.prepare_proposal(request).await
            })
            .await
        {
            Ok(response) => response,
            // There is no meaningful recovery if the proposer cannot
            // build a proposal.
            Err(err) => panic!("building the proposal failed: {err}"),
        };

        let sealed_txs = response.txs;
        validate_txs(&sealed_txs, self.config.max_block_bytes)?;
        debug!(
            "proposal prepared at height {height} with {} txs",
            sealed_txs.len()
        );

        Ok(cur.make_block(
            height,
            time_ms,
            sealed_txs,
            last_commit.clone(),
            evidence.to_vec(),
            proposer_client.validator_address,
        ))
    }

    async fn process_proposal_on_non_proposers(
        &self,
        cur: &ChainState,
        block: &Block,
        proposer_address: Pubkey,
    ) -> Result<()> {
        let misbehavior: Vec<Misbehavior> =
            block.evidence.iter().flat_map(|e| e.to_abci()).collect();
        let proposed_last_commit = build_commit_info(&block.last_commit, &cur.validators);

        for validator in cur.validators.iter() {
            if validator.address == proposer_address {
                continue;
            }
            let client = self
                .dispatch
                .get(&validator.address)
                .ok_or(EngineError::MissingCounterparty(validator.address))?;

            let request = RequestProcessProposal {
                txs: block.txs.clone(),
                proposed_last_commit: proposed_last_commit.clone(),
                misbehavior: misbehavior.clone(),
                hash: block.hash().as_ref().to_vec(),
                height: block.header.height,
                time_ms: block.header.time_ms,
                next_validators_hash: block.header.next_validators_hash.as_ref().to_vec(),
                proposer_address: proposer_address.to_bytes().to_vec(),
            };
            let response = self
                .dispatch
                .call_one(client, |app| async move {
                    app.process_proposal(request).await
                })
                .await?;
            if response.is_status_unknown() {
                panic!("ProcessProposal responded with an unknown status");
            }
            if !response.is_accepted() {
                return Err(EngineError::ProposalRejected(validator.address));
            }
        }
        Ok(())
    }

    /// One optional vote per current validator, in validator-set order.
    /// `None` means the validator's signing status is disabled.
    async fn collect_votes(
        &self,
        cur: &ChainState,
        block: &Block,
        extensions_enabled: bool,
    ) -> Result<Vec<Option<Vote>>> {
        let mut votes = Vec::with_capacity(cur.validators.len());
        for (index, validator) in cur.validators.iter().enumerate() {
            if !self.signing_status(&validator.address)? {
                // A nil vote: the validator abstains but stays reachable.
                votes.push(None);
                continue;
            }
            let client = self
                .dispatch
                .get(&validator.address)
                .ok_or(EngineError::MissingCounterparty(validator.address))?;
            let vote = self
                .extend_and_sign_vote(cur, block, client, index as u32, extensions_enabled)
                .await?;
            votes.push(Some(vote));
        }
        Ok(votes)
    }

    async fn extend_and_sign_vote(
        &self,
        cur: &ChainState,
        block: &Block,
        client: &Counterparty,
        validator_index: u32,
        extensions_enabled: bool,
    ) -> Result<Vote> {
        let mut vote = Vote {
            validator_address: client.validator_address,
            validator_index,
            height: block.header.height,
            round: block.last_commit.round,
            timestamp_ms: block.header.time_ms,
            block_id: block.block_id(),
            extension: Vec::new(),
            signature: None,
        };

        if extensions_enabled {
            let request = RequestExtendVote {
                hash: block.hash().as_ref().to_vec(),
                height: block.header.height,
                time_ms: block.header.time_ms,
                txs: block.txs.clone(),
                proposed_last_commit: build_commit_info(&block.last_commit, &cur.validators),
                misbehavior: block.evidence.iter().flat_map(|e| e.to_abci()).collect(),
                next_validators_hash: block.header.next_validators_hash.as_ref().to_vec(),
                proposer_address: block.header.proposer_address.to_bytes().to_vec(),
            };
            let response = self
                .dispatch
                .call_one(client, |app| async move { app.extend_vote(request).await })
                .await?;
            vote.extension = response.vote_extension;
        }

        let signer = self
            .signers
            .get(&client.validator_address)
            .ok_or_else(|| EngineError::UnknownValidator(client.validator_address.to_string()))?;
        vote.signature = Some(signer.sign_message(&vote.sign_bytes(&cur.chain_id)));
        Ok(vote)
    }

    /// Every signing validator's backend verifies every other validator's
    /// extension, in deterministic (network address) order. Applications
    /// must never reject extensions their peers produced via ExtendVote;
    /// there is no recovery path, so failure terminates the process.
    async fn verify_vote_extensions(&self, block: &Block, votes: &[Option<Vote>]) {
        let mut verifiers: Vec<&Counterparty> = votes
            .iter()
            .flatten()
            .filter_map(|vote| self.dispatch.get(&vote.validator_address))
            .collect();
        verifiers.sort_by(|a, b| a.network_address.cmp(&b.network_address));

        for client in verifiers {
            for vote in votes.iter().flatten() {
                if vote.validator_address == client.validator_address {
                    continue;
                }
                debug!(
                    "verifying vote extension from {} on {}",
                    vote.validator_address, client.network_address
                );
                let request = RequestVerifyVoteExtension {
                    hash: block.hash().as_ref().to_vec(),
                    validator_address: vote.validator_address.to_bytes().to_vec(),
                    height: block.header.height,
                    vote_extension: vote.extension.clone(),
                };
                let response = match self
                    .dispatch
                    .call_one(client, |app| async move {
                        app.verify_vote_extension(request).await
                    })
                    .await
                {
                    Ok(response) => response,
                    Err(err) => panic!("vote extension verification failed: {err}"),
                };
                if response.is_status_unknown() {
                    panic!("VerifyVoteExtension responded with an unknown status");
                }
                if !response.is_accepted() {
                    panic!("a backend rejected a vote extension produced by ExtendVote");
                }
            }
        }
    }

    async fn broadcast_finalize_block(
        &self,
        cur: &ChainState,
        block: &Block,
    ) -> Result<ResponseFinalizeBlock> {
        info!("sending FinalizeBlock to backends");
        let request = RequestFinalizeBlock {
            txs: block.txs.clone(),
            decided_last_commit: build_commit_info(&block.last_commit, &cur.validators),
            misbehavior: block.evidence.iter().flat_map(|e| e.to_abci()).collect(),
            hash: block.hash().as_ref().to_vec(),
            height: block.header.height,
            time_ms: block.header.time_ms,
            proposer_address: block.header.proposer_address.to_bytes().to_vec(),
            next_validators_hash: block.header.next_validators_hash.as_ref().to_vec(),
        };
        let responses = self
            .dispatch
            .call_all(
                "FinalizeBlock",
                self.config.cross_check_responses,
                move |app| {
                    let request = request.clone();
                    async move { app.finalize_block(request).await }
                },
            )
            .await?;
        responses
            .into_iter()
            .next()
            .map(|(_, r)| r)
            .ok_or(EngineError::NoConnectedBackends)
    }

    /// Publish round events to the sink. Failures are logged, never
    /// escalated.
    fn fire_events(
        &self,
        block: &Block,
        finalize: &ResponseFinalizeBlock,
        validator_updates: &[(Pubkey, u64)],
    ) {
        let mut publish = |event: BlockEvent| {
            if let Err(err) = self.events.publish(event) {
                warn!("failed publishing block event: {err}");
            }
        };

        publish(BlockEvent::NewBlock {
            block: block.clone(),
            result: finalize.clone(),
        });
        publish(BlockEvent::NewBlockHeader {
            header: block.header.clone(),
        });
        for evidence in &block.evidence {
            publish(BlockEvent::NewEvidence {
                evidence: evidence.clone(),
                height: block.header.height,
            });
        }
        for (index, (tx, result)) in block
            .txs
            .iter()
            .zip(finalize.tx_results.iter())
            .enumerate()
        {
            publish(BlockEvent::Tx {
                height: block.header.height,
                index: index as u32,
                tx: tx.clone(),
                result: result.clone(),
            });
        }
        if !validator_updates.is_empty() {
            publish(BlockEvent::ValidatorSetUpdates {
                updates: validator_updates.to_vec(),
            });
        }
    }

    // -- Misbehaviour triggers --

    /// Produce a block carrying duplicate-vote evidence for the named
    /// validator.
    pub async fn cause_double_sign(&self, address: &str) -> Result<()> {
        info!("causing double sign for {address}");
        let validator = self.parse_current_validator(address)?;
        self.run_block_with_evidence(None, vec![(validator, MisbehaviourKind::DuplicateVote)])
            .await
            .map(|_| ())
    }

    /// Produce a block carrying light-client-attack evidence of the given
    /// kind ("Lunatic", "Amnesia", or "Equivocation") for the named
    /// validator.
    pub async fn cause_light_client_attack(&self, address: &str, kind: &str) -> Result<()> {
        info!("causing light client attack for {address}");
        let misbehaviour = kind.parse::<MisbehaviourKind>()?;
        if !misbehaviour.is_light_client_attack() {
            return Err(EngineError::UnknownMisbehaviour(format!(
                "{kind} is not a light-client attack, possible types are: \
                 Equivocation, Lunatic, Amnesia"
            )));
        }
        let validator = self.parse_current_validator(address)?;
        self.run_block_with_evidence(None, vec![(validator, misbehaviour)])
            .await
            .map(|_| ())
    }

    fn parse_current_validator(&self, address: &str) -> Result<Pubkey> {
        let parsed = Pubkey::from_str(address)
            .map_err(|_| EngineError::UnknownValidator(address.to_string()))?;
        if !self.shared.read().state.validators.contains(&parsed) {
            return Err(EngineError::UnknownValidator(address.to_string()));
        }
        Ok(parsed)
    }

    // -- Query surface --

    /// Forward a query to the first reachable backend. Only the latest
    /// height is retained, so an explicit height is rejected.
    pub async fn abci_query(
        &self,
        path: String,
        data: Vec<u8>,
        height: Option<u64>,
        prove: bool,
    ) -> Result<ResponseQuery> {
        if height.is_some() {
            return Err(EngineError::HeightNotSupported);
        }
        let client = self
            .dispatch
            .first_connected()
            .ok_or(EngineError::NoConnectedBackends)?;
        let request = RequestQuery {
            data,
            path,
            height: 0,
            prove,
        };
        self.dispatch
            .call_one(client, |app| async move { app.query(request).await })
            .await
    }

    /// Paginate the validator set at the latest height. An explicit height
    /// is rejected; only the latest is retained.
    pub fn validators(
        &self,
        height: Option<u64>,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> Result<ValidatorsPage> {
        if height.is_some() {
            return Err(EngineError::HeightNotSupported);
        }
        let shared = self.shared.read();
        let block_height = shared.state.last_block_height;
        let validators: Vec<_> = shared.state.last_validators.iter().cloned().collect();
        drop(shared);

        let total = validators.len();
        let per_page = query::validate_per_page(per_page);
        let page = query::validate_page(page, per_page, total)?;
        let skip = query::skip_count(page, per_page);
        let page_validators: Vec<_> = validators
            .into_iter()
            .skip(skip)
            .take(per_page)
            .collect();

        Ok(ValidatorsPage {
            block_height,
            count: page_validators.len(),
            total,
            validators: page_validators,
        })
    }

    /// The latest committed block and its id. An explicit height is
    /// rejected; only the latest is retained.
    pub fn block(&self, height: Option<u64>) -> Result<(BlockId, Option<Block>)> {
        if height.is_some() {
            return Err(EngineError::HeightNotSupported);
        }
        let shared = self.shared.read();
        Ok((shared.state.last_block_id, shared.last_block.clone()))
    }
}
