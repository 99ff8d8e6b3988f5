//! Pipe lifecycle state.

use serde::{Deserialize, Serialize};

/// Pipe state.
///
/// State transitions:
/// - Open -> Closed (by `close()`, by drop, or when the worker halts on a failure)
///
/// There is no way back: Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeState {
    /// Worker is waiting for or processing input.
    Open,

    /// Worker has been told to stop; nothing moves from inbound to outbound anymore.
    Closed,
}

impl PipeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipeState::Closed)
    }
}
