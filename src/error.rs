//! Error taxonomy for the replay core.
//!
//! Grounded on `grimoire-core`'s error enum shape (one `thiserror`
//! variant per failure class, plus a crate-wide `Result` alias):
//! most of these terminate the session (spec section 7); the two
//! explicitly recoverable conditions (`checkpoint` mismatch,
//! `QueueOverflow` on the play side) are never represented here —
//! they are plain `bool`/`u8` return values on the call sites that
//! can recover from them.

use std::io;

use thiserror::Error;

/// Errors fatal to a replay session.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// A read came up short of the requested size, or hit EOF mid-event.
    #[error("replay log truncated at step {step} (wanted {wanted} bytes, got {got})")]
    TruncatedLog {
        step: u64,
        wanted: usize,
        got: usize,
    },

    /// The log header's version field didn't match `REPLAY_VERSION`.
    #[error("replay log version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// `skip_async_events_until` could not reach the expected tag.
    #[error("expected event tag {expected} at step {step}, found {found}")]
    UnexpectedKind { expected: u8, found: u8, step: u64 },

    /// An async event kind byte was outside the known range.
    #[error("unknown async event kind {kind} at step {step}")]
    UnknownAsync { kind: u8, step: u64 },

    /// A network packet referenced a client id with no registered peer.
    #[error(
        "network packet references unregistered client {client_id}; pass a matching -net replay peer"
    )]
    MissingAsyncClient { client_id: i32 },

    /// RECORD was requested on a session already configured for PLAY (or vice versa).
    #[error("mode conflict: session is already configured for {current:?}, cannot switch to {requested:?}")]
    ModeConflict {
        current: crate::mode::Mode,
        requested: crate::mode::Mode,
    },

    /// Growing the snapshot index failed.
    #[error("out of memory growing the snapshot index ({attempted} entries)")]
    SnapshotAllocFailure { attempted: usize },

    /// A sound back-end's queue overflowed in record mode (producer
    /// outpaced consumer). The sound device itself is an external
    /// collaborator (out of scope here); this variant exists so such a
    /// back-end can report into the same taxonomy the core uses.
    #[error("sound queue overflow at step {step}")]
    QueueOverflow { step: u64 },

    /// A sound back-end's queue underflowed in play mode (consumer
    /// requested a buffer not yet delivered).
    #[error("sound queue underflow at step {step}")]
    QueueUnderflow { step: u64 },

    /// Underlying I/O failure from the log file itself.
    #[error("replay log I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type used throughout the replay core.
pub type Result<T> = std::result::Result<T, ReplayError>;

impl ReplayError {
    /// All variants here are fatal by construction (spec section 7);
    /// kept for symmetry with the grounding source's `is_recoverable`
    /// and for callers that want to branch on it generically.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}
