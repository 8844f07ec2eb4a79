//! Replay mode and play submode (spec section 3).

/// Top-level session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    None,
    Record,
    Play,
}

/// Submode while in `Mode::Play`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submode {
    Normal,
    Reverse,
}
