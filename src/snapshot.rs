//! Snapshot index, periodic `savevm`, and reverse execution (spec
//! section 4.6).
//!
//! Grounded on `replay-internal.h`'s `SavedStateInfo` (the on-disk
//! `{offset, step}` pair) and `replay-debug.c`'s two-pass
//! reverse-continue algorithm: pass 1 walks snapshots backward from
//! the current position looking for a breakpoint hit strictly before
//! the starting step; pass 2 replays forward from the snapshot that
//! produced the latest such hit and stops there.

use std::io::{Read, Seek, Write};

use crate::controller::ReplayController;
use crate::error::{ReplayError, Result};
use crate::framer::Framer;
use crate::hooks::Collaborators;
use crate::mode::Mode;
use crate::wire::{self, tag};

/// One entry in the snapshot index: a clean event-stream boundary
/// (always the offset of a `SAVE_VM_BEGIN` tag) paired with the
/// instruction step it was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub offset: u64,
    pub step: u64,
}

/// The in-memory table of all snapshots taken this session, sorted by
/// step by construction (each `push` is a strictly later step than
/// the previous one — spec invariant I5).
#[derive(Debug, Clone, Default)]
pub struct SnapshotIndex {
    entries: Vec<SnapshotEntry>,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, offset: u64, step: u64) -> Result<()> {
        if let Some(last) = self.entries.last() {
            if step <= last.step {
                return Err(ReplayError::SnapshotAllocFailure {
                    attempted: self.entries.len() + 1,
                });
            }
        }
        self.entries.push(SnapshotEntry { offset, step });
        Ok(())
    }

    /// The latest entry whose step is `<= step`, if any.
    pub fn nearest_at_or_before(&self, step: u64) -> Option<usize> {
        let idx = self.entries.partition_point(|e| e.step <= step);
        if idx == 0 {
            None
        } else {
            Some(idx - 1)
        }
    }

    /// Writes the tail table: `[u64 count][count x {u64 offset, u64 step}]`.
    pub fn write<S: Write>(&self, codec: &mut crate::codec::Codec<S>) -> Result<()> {
        codec.put_qword(self.entries.len() as i64)?;
        for e in &self.entries {
            codec.put_qword(e.offset as i64)?;
            codec.put_qword(e.step as i64)?;
        }
        Ok(())
    }

    /// Reads a tail table written by [`SnapshotIndex::write`].
    pub fn read<S: Read>(codec: &mut crate::codec::Codec<S>) -> Result<Self> {
        let count = codec.get_qword()? as u64;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = codec.get_qword()? as u64;
            let step = codec.get_qword()? as u64;
            entries.push(SnapshotEntry { offset, step });
        }
        Ok(Self { entries })
    }
}

/// Fixed-size log header: version followed by the tail table's file
/// offset, back-patched once the tail table itself is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub version: u32,
    pub tail_offset: u64,
}

/// Byte length of [`LogHeader`] on disk (`u32` version + `u64` offset).
pub const HEADER_LEN: u64 = 4 + 8;

impl LogHeader {
    /// Writes a placeholder header (`tail_offset = 0`) at the start of
    /// a fresh RECORD stream. Call [`LogHeader::backpatch_tail_offset`]
    /// once the tail table has actually been written.
    pub fn write_placeholder<S: Write>(codec: &mut crate::codec::Codec<S>) -> Result<()> {
        codec.put_dword(wire::REPLAY_VERSION)?;
        codec.put_qword(0)?;
        Ok(())
    }

    pub fn read<S: Read>(codec: &mut crate::codec::Codec<S>) -> Result<Self> {
        let version = codec.get_dword()?;
        if version != wire::REPLAY_VERSION {
            return Err(ReplayError::VersionMismatch {
                expected: wire::REPLAY_VERSION,
                found: version,
            });
        }
        let tail_offset = codec.get_qword()? as u64;
        Ok(Self {
            version,
            tail_offset,
        })
    }

    /// Overwrites the `tail_offset` field in place, restoring the
    /// stream position afterward. Requires `Seek`.
    pub fn backpatch_tail_offset<S: Write + Seek>(
        codec: &mut crate::codec::Codec<S>,
        tail_offset: u64,
    ) -> Result<()> {
        let current = codec.position()?;
        codec.seek(4)?;
        codec.put_qword(tail_offset as i64)?;
        codec.seek(current)?;
        Ok(())
    }
}

/// Drives the periodic `savevm` that runs in RECORD mode (spec
/// section 4.6) and owns the resulting [`SnapshotIndex`].
pub struct SnapshotManager {
    index: SnapshotIndex,
    period_ms: u64,
    elapsed_ms: u64,
    name_counter: u64,
}

impl SnapshotManager {
    pub fn new(period_ms: u64) -> Self {
        Self {
            index: SnapshotIndex::new(),
            period_ms,
            elapsed_ms: 0,
            name_counter: 0,
        }
    }

    pub fn from_index(period_ms: u64, index: SnapshotIndex) -> Self {
        Self {
            index,
            period_ms,
            elapsed_ms: 0,
            name_counter: 0,
        }
    }

    pub fn index(&self) -> &SnapshotIndex {
        &self.index
    }

    /// Advances the periodic timer by `elapsed_ms`; takes a snapshot
    /// and resets the timer once `period_ms` has been reached. A
    /// `period_ms` of 0 disables periodic snapshots (the caller is
    /// expected to have taken the one startup snapshot separately).
    /// Returns whether a snapshot was taken.
    pub fn tick<S: Read + Write + Seek>(
        &mut self,
        elapsed_ms: u64,
        controller: &mut ReplayController,
        framer: &mut Framer<S>,
        collab: &mut Collaborators,
    ) -> Result<bool> {
        if self.period_ms == 0 {
            return Ok(false);
        }
        self.elapsed_ms += elapsed_ms;
        if self.elapsed_ms < self.period_ms {
            return Ok(false);
        }
        self.elapsed_ms = 0;
        self.savevm(controller, framer, collab)?;
        Ok(true)
    }

    /// Takes a snapshot right now: flush pending instructions, bracket
    /// the VM state dump between `SAVE_VM_BEGIN`/`SAVE_VM_END`, and
    /// record the resulting `(offset, step)` in the index.
    pub fn savevm<S: Read + Write + Seek>(
        &mut self,
        controller: &mut ReplayController,
        framer: &mut Framer<S>,
        collab: &mut Collaborators,
    ) -> Result<()> {
        controller.flush_instructions(framer)?;
        let offset_before_begin = framer.codec().position()?;
        framer.put_event(tag::SAVE_VM_BEGIN)?;

        collab.vm.vm_stop("save-vm");
        let name = format!("replay-{}", self.name_counter);
        self.name_counter += 1;
        collab.vm.save_vmstate(&name)?;
        self.index.push(offset_before_begin, controller.current_step())?;
        framer.put_event(tag::SAVE_VM_END)?;
        collab.vm.vm_start();
        Ok(())
    }
}

/// What the host's breakpoint/watchpoint handler should do in response
/// to a [`ReverseDriver`] decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseAction {
    /// No decision yet; keep replaying forward.
    KeepRunning,
    /// Reload the snapshot at `snapshot_step` and resume forward replay,
    /// re-arming a breakpoint at `retry_to_step` (pass 1's retry loop).
    Reseek { snapshot_step: u64, retry_to_step: u64 },
    /// Reload the snapshot at `snapshot_step` and replay forward to
    /// `target_step`; this is the final pass (pass 2).
    EnterPass2 { snapshot_step: u64, target_step: u64 },
    /// `target_step` has been reached; stop and invoke the original
    /// breakpoint/debug handler. Submode returns to `Normal`.
    Stop { target_step: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Idle,
    Pass1,
    Pass2,
}

/// The two-pass reverse-continue/reverse-step driver (spec section
/// 4.6), grounded on `replay-debug.c`'s
/// `reverse_continue_pass1_breakpoint_handler`/`pass2_breakpoint_handler`.
///
/// This struct only computes *decisions*; the caller's CPU loop owns
/// actually reloading VM state (`VmHooks::load_vmstate`) and seeking
/// the replay log, driven by the [`ReverseAction`] each call returns.
pub struct ReverseDriver {
    pass: Pass,
    start_reverse_step: u64,
    last_reverse_step: u64,
    last_breakpoint_step: u64,
    reverse_index: usize,
}

impl ReverseDriver {
    pub fn new() -> Self {
        Self {
            pass: Pass::Idle,
            start_reverse_step: 0,
            last_reverse_step: 0,
            last_breakpoint_step: 0,
            reverse_index: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.pass != Pass::Idle
    }

    /// Begins a reverse-continue request from `current_step`: find the
    /// nearest snapshot at or before it and re-run forward from there,
    /// looking for the latest breakpoint hit strictly before
    /// `current_step`. Returns `None` if there is no snapshot to seek
    /// to (nothing recorded before this point).
    pub fn start_reverse_continue(
        &mut self,
        current_step: u64,
        index: &SnapshotIndex,
    ) -> Option<ReverseAction> {
        if current_step == 0 {
            return None;
        }
        let idx = index.nearest_at_or_before(current_step.saturating_sub(1))?;
        self.reverse_index = idx;
        self.start_reverse_step = current_step;
        self.last_reverse_step = current_step;
        self.last_breakpoint_step = index.entries()[idx].step;
        self.pass = Pass::Pass1;
        Some(ReverseAction::Reseek {
            snapshot_step: index.entries()[idx].step,
            retry_to_step: self.last_reverse_step,
        })
    }

    /// A single reverse step: seek to the nearest snapshot at or
    /// before `current_step - 1` and replay forward to exactly that
    /// target step. This is a direct seek, not the pass1/pass2 search
    /// `start_reverse_continue` performs — there is no breakpoint to
    /// look for, only the immediately preceding step.
    pub fn start_reverse_step(
        &mut self,
        current_step: u64,
        index: &SnapshotIndex,
    ) -> Option<ReverseAction> {
        if current_step == 0 {
            return None;
        }
        let target = current_step - 1;
        let idx = index.nearest_at_or_before(target)?;
        self.pass = Pass::Pass2;
        self.last_breakpoint_step = target;
        Some(ReverseAction::EnterPass2 {
            snapshot_step: index.entries()[idx].step,
            target_step: target,
        })
    }

    /// Called by the CPU loop every time a breakpoint or watchpoint
    /// fires during the forward replay passes `start_reverse_continue`
    /// or `start_reverse_step` set up.
    pub fn on_breakpoint(&mut self, current_step: u64, index: &SnapshotIndex) -> ReverseAction {
        match self.pass {
            Pass::Idle => ReverseAction::KeepRunning,
            Pass::Pass1 => self.on_breakpoint_pass1(current_step, index),
            Pass::Pass2 => {
                if current_step >= self.last_breakpoint_step {
                    self.pass = Pass::Idle;
                    ReverseAction::Stop {
                        target_step: self.last_breakpoint_step,
                    }
                } else {
                    ReverseAction::KeepRunning
                }
            }
        }
    }

    fn on_breakpoint_pass1(&mut self, current_step: u64, index: &SnapshotIndex) -> ReverseAction {
        // Tie-break: a hit exactly at the pass's own starting step is
        // the boundary we searched from, not a genuine earlier hit.
        if current_step != self.start_reverse_step {
            self.last_breakpoint_step = current_step;
        }

        if current_step != self.last_reverse_step {
            return ReverseAction::KeepRunning;
        }

        // Reached the end of this forward run with no breakpoint found
        // strictly before it: walk one snapshot further back, unless
        // we are already at the oldest one.
        let snap_step = index.entries()[self.reverse_index].step;
        if self.last_breakpoint_step == snap_step && self.reverse_index > 0 {
            self.last_reverse_step = snap_step;
            self.reverse_index -= 1;
            let prior_step = index.entries()[self.reverse_index].step;
            ReverseAction::Reseek {
                snapshot_step: prior_step,
                retry_to_step: self.last_reverse_step,
            }
        } else {
            self.pass = Pass::Pass2;
            ReverseAction::EnterPass2 {
                snapshot_step: snap_step,
                target_step: self.last_breakpoint_step,
            }
        }
    }
}

impl Default for ReverseDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the session's debug-facing state, mirroring the
/// grounding source's `qmp_replay_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayInfo {
    pub mode: Mode,
    pub submode: crate::mode::Submode,
    pub step: u64,
    pub break_step: Option<u64>,
}

/// Holds the requested stop-at step for PLAY mode, mirroring the
/// grounding source's `qmp_replay_break`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakRequest {
    step: Option<u64>,
}

impl BreakRequest {
    pub fn new() -> Self {
        Self { step: None }
    }

    pub fn get(&self) -> Option<u64> {
        self.step
    }

    /// Accepts a new break step, only in PLAY mode and only at or
    /// after the current step.
    pub fn set(&mut self, step: u64, current_step: u64, mode: Mode) -> std::result::Result<(), &'static str> {
        if mode != Mode::Play {
            return Err("replay_break can be used only in PLAY mode");
        }
        if step < current_step {
            return Err("cannot stop on the preceding step");
        }
        self.step = Some(step);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.step = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn index_at(steps: &[u64]) -> SnapshotIndex {
        let mut idx = SnapshotIndex::new();
        for (i, &step) in steps.iter().enumerate() {
            idx.push(i as u64 * 1000, step).unwrap();
        }
        idx
    }

    #[test]
    fn push_rejects_non_increasing_step() {
        let mut idx = SnapshotIndex::new();
        idx.push(0, 100).unwrap();
        assert!(idx.push(10, 100).is_err());
        assert!(idx.push(20, 50).is_err());
    }

    #[test]
    fn nearest_at_or_before_finds_exact_and_floor() {
        let idx = index_at(&[0, 100, 200]);
        assert_eq!(idx.nearest_at_or_before(0).map(|i| idx.entries()[i].step), Some(0));
        assert_eq!(
            idx.nearest_at_or_before(150).map(|i| idx.entries()[i].step),
            Some(100)
        );
        assert_eq!(
            idx.nearest_at_or_before(200).map(|i| idx.entries()[i].step),
            Some(200)
        );
        assert_eq!(idx.nearest_at_or_before(250).map(|i| idx.entries()[i].step), Some(200));
    }

    #[test]
    fn snapshot_index_roundtrips_through_the_codec() {
        let idx = index_at(&[0, 100, 200]);
        let mut codec = crate::codec::Codec::new(Cursor::new(Vec::new()));
        idx.write(&mut codec).unwrap();
        codec.seek(0).unwrap();
        let back = SnapshotIndex::read(&mut codec).unwrap();
        assert_eq!(back.entries(), idx.entries());
    }

    #[test]
    fn header_roundtrips_with_backpatched_tail_offset() {
        let mut codec = crate::codec::Codec::new(Cursor::new(Vec::new()));
        LogHeader::write_placeholder(&mut codec).unwrap();
        codec.seek_end().unwrap();
        // pretend some events were written here
        codec.put_byte(0xFF).unwrap();
        let tail_offset = codec.position().unwrap();
        LogHeader::backpatch_tail_offset(&mut codec, tail_offset).unwrap();

        codec.seek(0).unwrap();
        let header = LogHeader::read(&mut codec).unwrap();
        assert_eq!(header.version, wire::REPLAY_VERSION);
        assert_eq!(header.tail_offset, tail_offset);
    }

    #[test]
    fn header_rejects_version_mismatch() {
        let mut codec = crate::codec::Codec::new(Cursor::new(Vec::new()));
        codec.put_dword(999).unwrap();
        codec.put_qword(0).unwrap();
        codec.seek(0).unwrap();
        assert!(matches!(
            LogHeader::read(&mut codec),
            Err(ReplayError::VersionMismatch { .. })
        ));
    }

    // S6: snapshots at steps {0, 100, 200}; seeking to 150 should land
    // exactly on step 150, reached by replaying forward from 100.
    #[test]
    fn reverse_step_targets_seek_from_nearest_preceding_snapshot() {
        let idx = index_at(&[0, 100, 200]);
        let mut driver = ReverseDriver::new();
        let action = driver.start_reverse_step(151, &idx).unwrap();
        match action {
            ReverseAction::EnterPass2 {
                snapshot_step,
                target_step,
            } => {
                assert_eq!(snapshot_step, 100);
                assert_eq!(target_step, 150);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn reverse_step_at_step_zero_has_nothing_to_seek_to() {
        let idx = index_at(&[0]);
        let mut driver = ReverseDriver::new();
        assert!(driver.start_reverse_step(0, &idx).is_none());
    }

    #[test]
    fn reverse_continue_finds_nearest_earlier_breakpoint_via_pass2() {
        let idx = index_at(&[0, 100, 200]);
        let mut driver = ReverseDriver::new();

        // Starting at step 250, searching backward from the snapshot at 200.
        let first = driver.start_reverse_continue(250, &idx).unwrap();
        assert_eq!(
            first,
            ReverseAction::Reseek {
                snapshot_step: 200,
                retry_to_step: 250,
            }
        );

        // Forward replay from 200 hits a breakpoint at step 230, then
        // reaches the end of the run (step 250) with nothing closer.
        assert_eq!(driver.on_breakpoint(230, &idx), ReverseAction::KeepRunning);
        let second = driver.on_breakpoint(250, &idx);
        match second {
            ReverseAction::EnterPass2 {
                snapshot_step,
                target_step,
            } => {
                assert_eq!(snapshot_step, 200);
                assert_eq!(target_step, 230);
            }
            other => panic!("unexpected action: {other:?}"),
        }

        // Pass 2 replays forward again and stops exactly at step 230.
        assert_eq!(driver.on_breakpoint(210, &idx), ReverseAction::KeepRunning);
        assert_eq!(
            driver.on_breakpoint(230, &idx),
            ReverseAction::Stop { target_step: 230 }
        );
        assert!(!driver.is_active());
    }

    #[test]
    fn reverse_continue_walks_back_a_snapshot_when_nothing_found() {
        let idx = index_at(&[0, 100, 200]);
        let mut driver = ReverseDriver::new();

        let first = driver.start_reverse_continue(210, &idx).unwrap();
        assert_eq!(
            first,
            ReverseAction::Reseek {
                snapshot_step: 200,
                retry_to_step: 210,
            }
        );

        // No breakpoint in [200, 210): reached the end with only the
        // tie-broken starting boundary recorded, so walk back to 100.
        let second = driver.on_breakpoint(210, &idx);
        assert_eq!(
            second,
            ReverseAction::Reseek {
                snapshot_step: 100,
                retry_to_step: 200,
            }
        );
    }

    #[test]
    fn break_request_rejects_record_mode_and_past_steps() {
        let mut req = BreakRequest::new();
        assert!(req.set(500, 10, Mode::Record).is_err());
        assert!(req.set(5, 10, Mode::Play).is_err());
        assert!(req.set(50, 10, Mode::Play).is_ok());
        assert_eq!(req.get(), Some(50));
    }
}
