//! Touch Error Types

use thiserror::Error;

use super::{SlotId, SlotOwner};

/// Result type for touch operations
pub type Result<T> = std::result::Result<T, TouchError>;

/// Touch module error types
#[derive(Error, Debug)]
pub enum TouchError {
    /// Every slot is held
    #[error("No free touch slot ({capacity} in use)")]
    NoFreeSlot {
        /// Number of slots the sink supports
        capacity: usize,
    },

    /// The slot is not held by the caller
    #[error("Touch slot {0} is not held")]
    SlotNotHeld(SlotId),

    /// The slot is held by another component
    #[error("Touch slot {slot} is held by {owner}")]
    SlotNotOwned {
        /// Slot id
        slot: SlotId,
        /// Current holder
        owner: SlotOwner,
    },

    /// Appending the action would break the Down/Move/Up ordering
    #[error("Invalid touch sequence: {0}")]
    InvalidSequence(String),

    /// Builder parameter out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The executor no longer accepts work
    #[error("Touch executor is stopped")]
    ExecutorStopped,

    /// Thread spawn failed
    #[error("Failed to spawn touch executor thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The touch backend reported a failure
    #[error("Touch sink error: {0}")]
    Sink(String),
}
