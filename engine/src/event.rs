//! Fire-and-forget event publication.
//!
//! Events fire after everything else in a successful round. Publication
//! failures are logged by the engine and never escalate the round's
//! success.

use {
    crate::{evidence::Evidence, types::{Block, Header, Tx}},
    chainmock_abci::types::{ExecTxResult, ResponseFinalizeBlock},
    solana_pubkey::Pubkey,
    thiserror::Error,
};

/// Events emitted at the end of a successful round.
#[derive(Debug, Clone)]
pub enum BlockEvent {
    NewBlock {
        block: Block,
        result: ResponseFinalizeBlock,
    },
    NewBlockHeader {
        header: Header,
    },
    NewEvidence {
        evidence: Evidence,
        height: u64,
    },
    Tx {
        height: u64,
        index: u32,
        tx: Tx,
        result: ExecTxResult,
    },
    ValidatorSetUpdates {
        updates: Vec<(Pubkey, u64)>,
    },
}

/// The receiving side is gone.
#[derive(Debug, Clone, Error)]
#[error("event sink closed")]
pub struct SinkClosed;

/// External event-sink collaborator.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: BlockEvent) -> Result<(), SinkClosed>;
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event: BlockEvent) -> Result<(), SinkClosed> {
        Ok(())
    }
}

/// Forwards events over a channel to an out-of-process consumer.
pub struct ChannelEventSink {
    sender: crossbeam_channel::Sender<BlockEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: crossbeam_channel::Sender<BlockEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: BlockEvent) -> Result<(), SinkClosed> {
        self.sender.send(event).map_err(|_| SinkClosed)
    }
}
