//! chainmock: a consensus-protocol emulator.
//!
//! Drives N application backends through the exact request/response
//! sequence a real consensus engine would issue — proposal preparation,
//! proposal processing, vote-extension exchange, vote aggregation,
//! finalization, and commit — without running a peer-to-peer validator
//! network. Every round produces one block; the chain it builds is
//! deterministic and suitable for integration testing, including
//! deliberate injection of Byzantine evidence (double signing,
//! light-client attacks) to test how applications react to misbehaviour.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                     Engine                        │
//! │  ┌──────────┐ ┌──────────────┐ ┌──────────────┐   │
//! │  │ChainState│ │SigningStatus │ │ TimeOffset   │   │
//! │  └──────────┘ └──────────────┘ └──────────────┘   │
//! │  ┌─────────────────┐  ┌────────────────────────┐  │
//! │  │ state transition│  │ evidence synthesizer   │  │
//! │  └─────────────────┘  └────────────────────────┘  │
//! └───────────┬───────────────────────────────────────┘
//!             │  PeerDispatch (bounded waits, liveness)
//!   ┌─────────┼─────────┬─────────────┐
//!   ▼         ▼         ▼             ▼
//! backend   backend   backend  ...  backend    (one per validator)
//! ```
//!
//! Collaborators that stay outside this crate: persistence behind
//! [`storage::Storage`], event delivery behind [`event::EventSink`], and
//! the request-routing layer that maps client-facing RPCs onto the
//! [`engine::Engine`] methods.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`]        | Block-production rounds, admin controls, queries |
//! | [`dispatch`]      | Per-backend calls with timeouts and liveness |
//! | [`state`]         | Chain state and the pure state-transition function |
//! | [`evidence`]      | Misbehaviour evidence synthesis |
//! | [`validator_set`] | Weighted validators, quorum, proposer rotation |
//! | [`vote`]          | Votes, vote sets, commits |
//! | [`types`]         | Blocks, headers, light blocks |
//! | [`params`]        | Consensus parameters |
//! | [`query`]         | Pagination for the latest-only query surface |
//! | [`storage`]       | Persistence collaborator interface |
//! | [`event`]         | Fire-and-forget event publication |
//! | [`config`]        | Engine configuration |
//! | [`error`]         | Error taxonomy |

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod evidence;
pub mod params;
pub mod query;
pub mod state;
pub mod storage;
pub mod types;
pub mod validator_set;
pub mod vote;

pub use {
    config::EngineConfig,
    dispatch::{Counterparty, PeerDispatch},
    engine::{BlockResult, Engine},
    error::{EngineError, Result},
    event::{BlockEvent, ChannelEventSink, EventSink, NullEventSink},
    evidence::{Evidence, MisbehaviourKind},
    params::ConsensusParams,
    state::{ChainState, Genesis},
    storage::{InMemoryStorage, Storage},
    types::{Block, BlockId, Header},
    validator_set::{Validator, ValidatorSet},
    vote::{Commit, Vote, VoteSet},
};
