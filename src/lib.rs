//! Deterministic record/replay core for a full-system machine emulator.
//!
//! The CPU execution loop, VM lifecycle, and every device back-end
//! (input, network, char, USB, sound) are external collaborators
//! (`hooks`); this crate owns the wire format (`wire`, `codec`,
//! `framer`), the async event queue (`queue`), the clock cache
//! (`clock`), the RECORD/PLAY state machine (`controller`), the
//! snapshot index and reverse execution driver (`snapshot`), session
//! configuration (`config`), and the value that wires all of the above
//! together for a caller (`session`).

pub mod clock;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod framer;
pub mod hooks;
pub mod mode;
pub mod queue;
pub mod session;
pub mod snapshot;
pub mod wire;

pub use error::{ReplayError, Result};
pub use mode::{Mode, Submode};
pub use session::ReplaySession;
