//! Owns the wiring between the codec, queue, controller, and snapshot
//! manager for one RECORD or PLAY run (spec section 9, "single owning
//! session" design note).

use std::io::{Read, Seek, Write};

use crate::codec::Codec;
use crate::config::ReplayConfig;
use crate::controller::{ReplayController, ReplayState};
use crate::error::{ReplayError, Result};
use crate::framer::Framer;
use crate::hooks::Collaborators;
use crate::mode::Mode;
use crate::queue::AsyncQueue;
use crate::snapshot::{
    BreakRequest, HEADER_LEN, LogHeader, ReplayInfo, ReverseAction, ReverseDriver, SnapshotIndex,
    SnapshotManager,
};

/// What happened after a reverse-execution decision point. The driver
/// may need several rounds of forward replay before it actually stops;
/// the caller's CPU loop keeps stepping while this is `Seeking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseOutcome {
    Seeking,
    Stopped { target_step: u64 },
}

/// Owns everything needed to drive one RECORD or PLAY run over a
/// seekable log stream: the event framer, async queue, replay
/// controller, and snapshot index/reverse driver.
pub struct ReplaySession<S> {
    framer: Framer<S>,
    queue: AsyncQueue,
    controller: ReplayController,
    snapshots: SnapshotManager,
    reverse: ReverseDriver,
    break_request: BreakRequest,
    config: ReplayConfig,
    finished: bool,
}

impl<S: Read + Write + Seek> ReplaySession<S> {
    /// Opens a session against `stream`. For `Mode::Record` a fresh
    /// placeholder header is written; for `Mode::Play` the existing
    /// header and snapshot tail table are read back, leaving the
    /// stream positioned right after the header, ready to replay the
    /// first event.
    pub fn configure(config: ReplayConfig, mode: Mode, stream: S) -> Result<Self> {
        let mut codec = Codec::new(stream);
        let snapshots = match mode {
            Mode::Record => {
                LogHeader::write_placeholder(&mut codec)?;
                SnapshotManager::new(config.period)
            }
            Mode::Play => {
                let header = LogHeader::read(&mut codec)?;
                codec.seek(header.tail_offset)?;
                let index = SnapshotIndex::read(&mut codec)?;
                codec.seek(HEADER_LEN)?;
                SnapshotManager::from_index(config.period, index)
            }
            Mode::None => {
                return Err(ReplayError::ModeConflict {
                    current: Mode::None,
                    requested: Mode::None,
                });
            }
        };

        let mut queue = AsyncQueue::new();
        if mode == Mode::Record {
            queue.enable();
        }

        Ok(Self {
            framer: Framer::new(codec.into_inner()),
            queue,
            controller: ReplayController::new(mode),
            snapshots,
            reverse: ReverseDriver::new(),
            break_request: BreakRequest::new(),
            config,
            finished: false,
        })
    }

    pub fn mode(&self) -> Mode {
        self.controller.mode()
    }

    pub fn controller(&self) -> &ReplayController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ReplayController {
        &mut self.controller
    }

    pub fn framer(&mut self) -> &mut Framer<S> {
        &mut self.framer
    }

    /// Runs one instruction run boundary (spec section 4.4). Threads
    /// the session's own framer and async queue through to the
    /// controller so callers don't need simultaneous `&mut` access to
    /// both (which the borrow checker would otherwise refuse).
    pub fn instruction(&mut self, process_events: bool, collab: &mut Collaborators) -> Result<()> {
        self.controller
            .instruction(process_events, &mut self.framer, &mut self.queue, collab)
    }

    pub fn undo_last_instruction(&mut self) {
        self.controller.undo_last_instruction();
    }

    pub fn has_async_request(&mut self, collab: &mut Collaborators) -> Result<bool> {
        self.controller
            .has_async_request(&mut self.framer, &self.queue, collab)
    }

    pub fn exception(&mut self, collab: &mut Collaborators) -> Result<bool> {
        self.controller.exception(&mut self.framer, collab)
    }

    pub fn interrupt(&mut self, collab: &mut Collaborators) -> Result<bool> {
        self.controller.interrupt(&mut self.framer, collab)
    }

    pub fn checkpoint(&mut self, kind: u8, collab: &mut Collaborators) -> Result<u8> {
        self.controller
            .checkpoint(kind, &mut self.framer, &mut self.queue, collab)
    }

    pub fn shutdown_request(&mut self) -> Result<()> {
        self.controller.shutdown_request(&mut self.framer)
    }

    pub fn save_clock(&mut self, kind: crate::wire::ClockKind, value: i64) -> Result<()> {
        self.controller.save_clock(kind, value, &mut self.framer)
    }

    pub fn read_clock(
        &mut self,
        kind: crate::wire::ClockKind,
        collab: &mut Collaborators,
    ) -> Result<i64> {
        self.controller.read_clock(kind, &mut self.framer, collab)
    }

    pub fn save_time(&mut self, value: i64) -> Result<()> {
        self.controller.save_time(value, &mut self.framer)
    }

    pub fn read_time(&mut self) -> Result<i64> {
        self.controller.read_time(&mut self.framer)
    }

    pub fn save_tm(&mut self, fields: [i32; 9]) -> Result<()> {
        self.controller.save_tm(fields, &mut self.framer)
    }

    pub fn read_tm(&mut self) -> Result<[i32; 9]> {
        self.controller.read_tm(&mut self.framer)
    }

    pub fn queue(&self) -> &AsyncQueue {
        &self.queue
    }

    pub fn snapshots(&self) -> &SnapshotIndex {
        self.snapshots.index()
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn info(&self) -> ReplayInfo {
        ReplayInfo {
            mode: self.controller.mode(),
            submode: self.controller.submode(),
            step: self.controller.current_step(),
            break_step: self.break_request.get(),
        }
    }

    /// Requests PLAY to stop once `step` is reached. Rejected outside
    /// PLAY mode or for a step already behind the current one.
    pub fn set_break(&mut self, step: u64) -> std::result::Result<(), &'static str> {
        self.break_request
            .set(step, self.controller.current_step(), self.controller.mode())
    }

    /// Advances the periodic snapshot timer; a no-op outside RECORD.
    /// Returns whether a snapshot was actually taken.
    pub fn init_timer(&mut self, elapsed_ms: u64, collab: &mut Collaborators) -> Result<bool> {
        if self.controller.mode() != Mode::Record {
            return Ok(false);
        }
        self.snapshots
            .tick(elapsed_ms, &mut self.controller, &mut self.framer, collab)
    }

    /// Takes an out-of-band snapshot right now (used for the startup
    /// snapshot, independent of the periodic timer).
    pub fn snapshot_now(&mut self, collab: &mut Collaborators) -> Result<()> {
        self.snapshots
            .savevm(&mut self.controller, &mut self.framer, collab)
    }

    /// Starts a reverse-continue search from the current step. `Ok(None)`
    /// means there is nothing recorded earlier to search.
    pub fn begin_reverse_continue(
        &mut self,
        collab: &mut Collaborators,
    ) -> Result<Option<ReverseOutcome>> {
        let step = self.controller.current_step();
        match self
            .reverse
            .start_reverse_continue(step, self.snapshots.index())
        {
            None => Ok(None),
            Some(action) => Ok(Some(self.apply_reverse_action(action, collab)?)),
        }
    }

    /// Steps back exactly one instruction.
    pub fn begin_reverse_step(
        &mut self,
        collab: &mut Collaborators,
    ) -> Result<Option<ReverseOutcome>> {
        let step = self.controller.current_step();
        match self
            .reverse
            .start_reverse_step(step, self.snapshots.index())
        {
            None => Ok(None),
            Some(action) => Ok(Some(self.apply_reverse_action(action, collab)?)),
        }
    }

    /// Called by the CPU loop whenever a breakpoint/watchpoint fires
    /// while a reverse search set up by `begin_reverse_continue` or
    /// `begin_reverse_step` is in progress.
    pub fn on_breakpoint(&mut self, collab: &mut Collaborators) -> Result<ReverseOutcome> {
        let step = self.controller.current_step();
        let action = self.reverse.on_breakpoint(step, self.snapshots.index());
        self.apply_reverse_action(action, collab)
    }

    fn apply_reverse_action(
        &mut self,
        action: ReverseAction,
        collab: &mut Collaborators,
    ) -> Result<ReverseOutcome> {
        match action {
            ReverseAction::KeepRunning => Ok(ReverseOutcome::Seeking),
            ReverseAction::Reseek { snapshot_step, .. }
            | ReverseAction::EnterPass2 { snapshot_step, .. } => {
                self.load_snapshot_at_step(snapshot_step, collab)?;
                Ok(ReverseOutcome::Seeking)
            }
            ReverseAction::Stop { target_step } => Ok(ReverseOutcome::Stopped { target_step }),
        }
    }

    fn load_snapshot_at_step(&mut self, step: u64, collab: &mut Collaborators) -> Result<()> {
        let entries = self.snapshots.index().entries();
        let pos = entries
            .iter()
            .position(|e| e.step == step)
            .expect("reverse driver only names steps already in the snapshot index");
        let entry = entries[pos];

        collab.vm.vm_stop("reverse-seek");
        collab.vm.load_vmstate(&format!("replay-{pos}"))?;
        self.framer.codec().seek(entry.offset)?;
        self.controller.restore_state(ReplayState {
            current_step: entry.step,
            skipping_instruction: false,
            file_offset: entry.offset,
        });
        collab.cpu.tb_flush_all();
        collab.vm.vm_start();
        Ok(())
    }

    /// Closes out the session: in RECORD, writes the terminal `END`
    /// tag, appends the snapshot tail table, and back-patches the
    /// header's `tail_offset`. A no-op in PLAY, and idempotent (safe
    /// to call more than once, or on a session that never recorded
    /// anything beyond its header).
    pub fn finish(&mut self, collab: &mut Collaborators) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.controller.mode() != Mode::Record {
            return Ok(());
        }
        self.queue.disable(collab.dispatch);
        self.controller.write_end(&mut self.framer)?;
        let tail_offset = self.framer.codec().position()?;
        self.snapshots.index().write(self.framer.codec())?;
        LogHeader::backpatch_tail_offset(self.framer.codec(), tail_offset)?;
        self.framer.codec().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{NullCpu, NullDispatch, NullVm};
    use std::io::Cursor;

    fn collab<'a>(
        cpu: &'a mut NullCpu,
        vm: &'a mut NullVm,
        dispatch: &'a mut NullDispatch,
    ) -> Collaborators<'a> {
        Collaborators { cpu, vm, dispatch }
    }

    #[test]
    fn record_then_play_round_trips_header_and_snapshot_index() {
        let mut cpu = NullCpu::default();
        let mut vm = NullVm::default();
        let mut dispatch = NullDispatch::default();

        let cfg = ReplayConfig::new("session.rr");
        let mut rec: ReplaySession<Cursor<Vec<u8>>> =
            ReplaySession::configure(cfg.clone(), Mode::Record, Cursor::new(Vec::new())).unwrap();

        rec.snapshot_now(&mut collab(&mut cpu, &mut vm, &mut dispatch))
            .unwrap();
        for _ in 0..3 {
            rec.instruction(true, &mut collab(&mut cpu, &mut vm, &mut dispatch))
                .unwrap();
        }
        rec.finish(&mut collab(&mut cpu, &mut vm, &mut dispatch))
            .unwrap();
        assert_eq!(vm.saved, vec!["replay-0".to_string()]);

        let bytes = rec.framer.into_inner().into_inner();

        let play: ReplaySession<Cursor<Vec<u8>>> =
            ReplaySession::configure(cfg, Mode::Play, Cursor::new(bytes)).unwrap();
        assert_eq!(play.snapshots().entries().len(), 1);
        assert_eq!(play.snapshots().entries()[0].step, 0);
    }

    #[test]
    fn finish_is_idempotent_and_a_no_op_in_play() {
        let mut cpu = NullCpu::default();
        let mut vm = NullVm::default();
        let mut dispatch = NullDispatch::default();

        let cfg = ReplayConfig::new("session.rr");
        let mut rec: ReplaySession<Cursor<Vec<u8>>> =
            ReplaySession::configure(cfg, Mode::Record, Cursor::new(Vec::new())).unwrap();
        rec.finish(&mut collab(&mut cpu, &mut vm, &mut dispatch))
            .unwrap();
        rec.finish(&mut collab(&mut cpu, &mut vm, &mut dispatch))
            .unwrap();
    }

    #[test]
    fn init_timer_takes_a_snapshot_once_the_period_elapses() {
        let mut cpu = NullCpu::default();
        let mut vm = NullVm::default();
        let mut dispatch = NullDispatch::default();

        let mut cfg = ReplayConfig::new("session.rr");
        cfg.period = 100;
        let mut rec: ReplaySession<Cursor<Vec<u8>>> =
            ReplaySession::configure(cfg, Mode::Record, Cursor::new(Vec::new())).unwrap();

        let took = rec
            .init_timer(40, &mut collab(&mut cpu, &mut vm, &mut dispatch))
            .unwrap();
        assert!(!took);
        let took = rec
            .init_timer(65, &mut collab(&mut cpu, &mut vm, &mut dispatch))
            .unwrap();
        assert!(took);
        assert_eq!(vm.saved.len(), 1);
    }
}
