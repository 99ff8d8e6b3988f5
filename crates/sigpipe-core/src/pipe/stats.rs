use serde::{Deserialize, Serialize};

use super::state::PipeState;

/// Point-in-time counters of one pipe.
///
/// `inbound_depth` / `outbound_depth` are the unbounded queues' current lengths;
/// a growing depth means the transform or the consumers are falling behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeStats {
    pub state: PipeState,
    pub inbound_depth: usize,
    pub outbound_depth: usize,
    /// Envelopes accepted by `write`.
    pub accepted: u64,
    /// Envelopes refused by `write` because the pipe was closed.
    pub rejected: u64,
    /// Envelopes the transform handled successfully.
    pub processed: u64,
    /// Output envelopes pushed to the outbound queue.
    pub emitted: u64,
    /// Envelopes the transform failed on.
    pub failed: u64,
    /// Input left unprocessed or output dropped because the pipe closed.
    pub discarded: u64,
}
