//! Replay controller: the state machine tying instruction counting,
//! synchronous CPU events, async draining, checkpoints, and shutdown
//! together (spec section 4.4).
//!
//! Grounded on `replay-time.c`'s use of `skip_async_events`/
//! `skip_async_events_until` to gate clock reads against the
//! instruction stream — the same peek/consume/self-handle loop backs
//! every synchronous primitive here.

use std::io::{Read, Seek, Write};

use crate::clock::ClockCache;
use crate::error::{ReplayError, Result};
use crate::framer::{self, Framer};
use crate::hooks::Collaborators;
use crate::mode::{Mode, Submode};
use crate::queue::AsyncQueue;
use crate::wire::{self, ClockKind};

/// Replay state serialized alongside the guest snapshot (spec section 3).
#[derive(Debug, Clone, Copy)]
pub struct ReplayState {
    pub current_step: u64,
    pub skipping_instruction: bool,
    pub file_offset: u64,
}

pub struct ReplayController {
    mode: Mode,
    submode: Submode,
    current_step: u64,
    skipping_instruction: bool,
    /// RECORD: instructions run since the last flush to the log.
    /// PLAY: instructions remaining in the currently peeked run.
    pending_instructions: u32,
    clocks: ClockCache,
}

impl Default for ReplayController {
    fn default() -> Self {
        Self::new(Mode::None)
    }
}

impl ReplayController {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            submode: Submode::Normal,
            current_step: 0,
            skipping_instruction: false,
            pending_instructions: 0,
            clocks: ClockCache::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn submode(&self) -> Submode {
        self.submode
    }

    pub fn set_submode(&mut self, submode: Submode) {
        self.submode = submode;
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// Snapshot of the fields that travel with the guest state (I5).
    pub fn state(&self, file_offset: u64) -> ReplayState {
        ReplayState {
            current_step: self.current_step,
            skipping_instruction: self.skipping_instruction,
            file_offset,
        }
    }

    /// Restores state after a snapshot load (post_load).
    pub fn restore_state(&mut self, state: ReplayState) {
        self.current_step = state.current_step;
        self.skipping_instruction = state.skipping_instruction;
        self.pending_instructions = 0;
        self.clocks.invalidate_all();
    }

    /// Writes any accumulated instruction run to the log now, rather
    /// than waiting for the next synchronous event. Used by the
    /// snapshot timer, which needs a clean event boundary before
    /// bracketing a `SAVE_VM_BEGIN`/`SAVE_VM_END` region.
    pub(crate) fn flush_instructions<S: Write>(&mut self, framer: &mut Framer<S>) -> Result<()> {
        if self.pending_instructions > 0 {
            framer.put_event(wire::tag::INSTRUCTION)?;
            framer.codec().put_dword(self.pending_instructions)?;
            self.pending_instructions = 0;
        }
        Ok(())
    }

    /// Reads tags that are handled in-band without surfacing to the
    /// caller (SHUTDOWN, SAVE_VM_BEGIN), returning the first tag that
    /// isn't one of those. Grounded on the `skip_async_events` peek
    /// loop (spec section 4.4).
    fn skip_in_band<S: Read + Seek>(
        &mut self,
        framer: &mut Framer<S>,
        collab: &mut Collaborators,
    ) -> Result<u8> {
        loop {
            let tag = framer.fetch_data_kind(self.current_step)?;
            match tag {
                wire::tag::SHUTDOWN => {
                    framer.consume();
                    collab.vm.shutdown_request();
                }
                wire::tag::SAVE_VM_BEGIN => {
                    framer.consume();
                    // No payload travels on the replay log side of a
                    // snapshot bracket; the actual state lives in the
                    // collaborator's own save/load mechanism.
                    framer.validate_kind(self.current_step, wire::tag::SAVE_VM_END)?;
                }
                _ => return Ok(tag),
            }
        }
    }

    /// Peeks past in-band tags until `stop_tag` is reached or some
    /// other tag is found; an `INSTRUCTION` tag is always consumed
    /// (its count feeds `pending_instructions`) and ends the peek.
    /// Returns whether `stop_tag` was the tag that ended the peek.
    fn skip_async_events<S: Read + Seek>(
        &mut self,
        stop_tag: u8,
        framer: &mut Framer<S>,
        collab: &mut Collaborators,
    ) -> Result<bool> {
        let tag = self.skip_in_band(framer, collab)?;
        let saw_stop = tag == stop_tag;
        if tag == wire::tag::INSTRUCTION {
            framer.consume();
            let count = framer
                .codec()
                .get_dword()
                .map_err(|e| framer::truncated(e, self.current_step, 4))?;
            self.pending_instructions = count;
        }
        Ok(saw_stop)
    }

    /// Like `skip_async_events`, but fatal if `kind` is never reached —
    /// except that an `ASYNC`/`ASYNC_OPT` tag ahead of an `INSTRUCTION`
    /// expectation is allowed (the caller drains it next).
    fn skip_async_events_until<S: Read + Seek>(
        &mut self,
        kind: u8,
        framer: &mut Framer<S>,
        collab: &mut Collaborators,
    ) -> Result<()> {
        if self.skip_async_events(kind, framer, collab)? {
            return Ok(());
        }
        if kind == wire::tag::INSTRUCTION {
            if let Some(peeked) = framer.peeked_kind() {
                if peeked == wire::tag::ASYNC || peeked == wire::tag::ASYNC_OPT {
                    return Ok(());
                }
            }
        }
        Err(ReplayError::UnexpectedKind {
            expected: kind,
            found: framer.peeked_kind().unwrap_or(0),
            step: self.current_step,
        })
    }

    /// The hot path called before each guest instruction.
    pub fn instruction<S: Read + Write + Seek>(
        &mut self,
        process_events: bool,
        framer: &mut Framer<S>,
        queue: &mut AsyncQueue,
        collab: &mut Collaborators,
    ) -> Result<()> {
        match self.mode {
            Mode::Record => {
                if process_events && queue.has_events() {
                    self.flush_instructions(framer)?;
                    queue.save(None, Mode::Record, framer, collab.dispatch)?;
                } else {
                    self.pending_instructions += 1;
                }
                self.current_step += 1;
                Ok(())
            }
            Mode::Play => {
                if self.skipping_instruction {
                    self.skipping_instruction = false;
                    return Ok(());
                }
                if self.pending_instructions == 0 {
                    self.skip_async_events_until(wire::tag::INSTRUCTION, framer, collab)?;
                }
                if self.pending_instructions > 0 {
                    self.pending_instructions -= 1;
                    self.current_step += 1;
                } else if process_events {
                    queue.read(None, framer, collab.dispatch, self.current_step)?;
                }
                Ok(())
            }
            Mode::None => Ok(()),
        }
    }

    /// Cancels the effect of an instruction aborted mid-flight by an
    /// exception (spec section 4.4).
    pub fn undo_last_instruction(&mut self) {
        match self.mode {
            Mode::Record => {
                self.pending_instructions = self.pending_instructions.saturating_sub(1);
            }
            Mode::Play => {
                self.skipping_instruction = true;
            }
            Mode::None => {}
        }
    }

    pub fn has_async_request<S: Read + Seek>(
        &mut self,
        framer: &mut Framer<S>,
        queue: &AsyncQueue,
        collab: &mut Collaborators,
    ) -> Result<bool> {
        match self.mode {
            Mode::Record => Ok(queue.has_events()),
            Mode::Play => {
                let tag = self.skip_in_band(framer, collab)?;
                Ok(tag == wire::tag::ASYNC || tag == wire::tag::ASYNC_OPT)
            }
            Mode::None => Ok(false),
        }
    }

    pub fn exception<S: Read + Write + Seek>(
        &mut self,
        framer: &mut Framer<S>,
        collab: &mut Collaborators,
    ) -> Result<bool> {
        self.synchronous_event(wire::tag::EXCEPTION, framer, collab)
    }

    pub fn interrupt<S: Read + Write + Seek>(
        &mut self,
        framer: &mut Framer<S>,
        collab: &mut Collaborators,
    ) -> Result<bool> {
        self.synchronous_event(wire::tag::INTERRUPT, framer, collab)
    }

    fn synchronous_event<S: Read + Write + Seek>(
        &mut self,
        tag: u8,
        framer: &mut Framer<S>,
        collab: &mut Collaborators,
    ) -> Result<bool> {
        match self.mode {
            Mode::Record => {
                self.flush_instructions(framer)?;
                framer.put_event(tag)?;
                Ok(true)
            }
            Mode::Play => {
                let saw = self.skip_async_events(tag, framer, collab)?;
                if saw {
                    framer.consume();
                }
                Ok(saw)
            }
            Mode::None => Ok(false),
        }
    }

    /// RECORD: writes `CHECKPOINT+k` then flushes queued events tagged
    /// for this checkpoint. PLAY: consumes the matching checkpoint tag,
    /// first draining any `ASYNC_OPT` events tagged for it. Returns 1
    /// if the checkpoint was reached, 0 if the caller should skip its
    /// checkpointed work (it wasn't recorded at this point).
    pub fn checkpoint<S: Read + Write + Seek>(
        &mut self,
        k: u8,
        framer: &mut Framer<S>,
        queue: &mut AsyncQueue,
        collab: &mut Collaborators,
    ) -> Result<u8> {
        match self.mode {
            Mode::Record => {
                framer.put_event(wire::tag::CHECKPOINT + k)?;
                queue.save(Some(k), Mode::Record, framer, collab.dispatch)?;
                Ok(1)
            }
            Mode::Play => {
                let tag = framer.fetch_data_kind(self.current_step)?;
                if tag == wire::tag::ASYNC_OPT {
                    queue.read(Some(k), framer, collab.dispatch, self.current_step)?;
                }
                let tag = framer.fetch_data_kind(self.current_step)?;
                if tag == wire::tag::CHECKPOINT + k {
                    framer.consume();
                    Ok(1)
                } else {
                    Ok(0)
                }
            }
            Mode::None => Ok(1),
        }
    }

    pub fn shutdown_request<S: Write>(&mut self, framer: &mut Framer<S>) -> Result<()> {
        if self.mode == Mode::Record {
            self.flush_instructions(framer)?;
            framer.put_event(wire::tag::SHUTDOWN)?;
        }
        Ok(())
    }

    /// Flushes any pending instruction run and writes the terminal
    /// `END` tag, closing out the event stream (spec section 6.1).
    pub fn write_end<S: Write>(&mut self, framer: &mut Framer<S>) -> Result<()> {
        if self.mode == Mode::Record {
            self.flush_instructions(framer)?;
            framer.put_event(wire::tag::END)?;
        }
        Ok(())
    }

    /// RECORD: flushes instructions and writes `CLOCK+k, value`.
    pub fn save_clock<S: Write>(
        &mut self,
        kind: ClockKind,
        value: i64,
        framer: &mut Framer<S>,
    ) -> Result<()> {
        if self.mode == Mode::Record {
            self.flush_instructions(framer)?;
            framer.put_event(wire::tag::CLOCK + kind.index())?;
            framer.codec().put_qword(value)?;
        }
        self.clocks.set(kind, value);
        Ok(())
    }

    /// PLAY: returns the cached value for `kind`, refreshing it from
    /// the log first if the next synchronous event is that clock's tag.
    pub fn read_clock<S: Read + Seek>(
        &mut self,
        kind: ClockKind,
        framer: &mut Framer<S>,
        collab: &mut Collaborators,
    ) -> Result<i64> {
        if self.mode == Mode::Play {
            let tag = wire::tag::CLOCK + kind.index();
            if self.skip_async_events(tag, framer, collab)? {
                self.read_next_clock(Some(kind), framer)?;
            }
        }
        Ok(self.clocks.get(kind).unwrap_or(0))
    }

    /// Consumes a peeked `CLOCK+k` tag if its kind matches `kind`
    /// (`None` meaning "any"); otherwise leaves the peek intact so a
    /// later call for a different kind can still see it.
    fn read_next_clock<S: Read + Seek>(
        &mut self,
        kind: Option<ClockKind>,
        framer: &mut Framer<S>,
    ) -> Result<()> {
        let tag = framer.fetch_data_kind(self.current_step)?;
        if tag < wire::tag::CLOCK || tag >= wire::tag::CLOCK + ClockKind::COUNT as u8 {
            return Ok(());
        }
        let peeked = ClockKind::from_index(tag - wire::tag::CLOCK);
        if let (Some(peeked_kind), Some(want)) = (peeked, kind) {
            if peeked_kind != want {
                return Ok(());
            }
        }
        framer.consume();
        let value = framer
            .codec()
            .get_qword()
            .map_err(|e| framer::truncated(e, self.current_step, 8))?;
        if let Some(k) = peeked {
            self.clocks.set(k, value);
        }
        Ok(())
    }

    /// RECORD: writes `TIME_T, value`.
    pub fn save_time<S: Write>(&mut self, value: i64, framer: &mut Framer<S>) -> Result<()> {
        if self.mode == Mode::Record {
            framer.put_event(wire::tag::TIME_T)?;
            framer.codec().put_qword(value)?;
        }
        Ok(())
    }

    /// PLAY: reads back a `TIME_T` value previously written by `save_time`.
    pub fn read_time<S: Read + Seek>(&mut self, framer: &mut Framer<S>) -> Result<i64> {
        framer.validate_kind(self.current_step, wire::tag::TIME_T)?;
        framer
            .codec()
            .get_qword()
            .map_err(|e| framer::truncated(e, self.current_step, 8))
    }

    /// RECORD: writes `TM, <9 x i32>` (broken-down calendar time).
    pub fn save_tm<S: Write>(&mut self, fields: [i32; 9], framer: &mut Framer<S>) -> Result<()> {
        if self.mode == Mode::Record {
            framer.put_event(wire::tag::TM)?;
            for field in fields {
                framer.codec().put_i32(field)?;
            }
        }
        Ok(())
    }

    pub fn read_tm<S: Read + Seek>(&mut self, framer: &mut Framer<S>) -> Result<[i32; 9]> {
        framer.validate_kind(self.current_step, wire::tag::TM)?;
        let mut fields = [0i32; 9];
        for field in fields.iter_mut() {
            *field = framer
                .codec()
                .get_i32()
                .map_err(|e| framer::truncated(e, self.current_step, 4))?;
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{NullDispatch, NullVm};
    use std::io::Cursor;

    struct Fixture {
        cpu: crate::hooks::NullCpu,
        vm: NullVm,
        dispatch: NullDispatch,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                cpu: Default::default(),
                vm: Default::default(),
                dispatch: Default::default(),
            }
        }

        fn collab(&mut self) -> Collaborators<'_> {
            Collaborators {
                cpu: &mut self.cpu,
                vm: &mut self.vm,
                dispatch: &mut self.dispatch,
            }
        }
    }

    fn framer() -> Framer<Cursor<Vec<u8>>> {
        Framer::new(Cursor::new(Vec::new()))
    }

    fn replay_framer(bytes: Vec<u8>) -> Framer<Cursor<Vec<u8>>> {
        Framer::new(Cursor::new(bytes))
    }

    // S1: pure instruction run, 10 groups summing to 55.
    #[test]
    fn s1_pure_instruction_run() {
        let mut f = framer();
        let mut ctrl = ReplayController::new(Mode::Record);
        let mut q = AsyncQueue::new();
        let mut fx = Fixture::new();

        for count in 1u32..=10 {
            for _ in 0..count {
                ctrl.instruction(true, &mut f, &mut q, &mut fx.collab()).unwrap();
            }
        }
        // force the last pending run onto the log
        ctrl.write_end(&mut f).unwrap();

        let bytes = f.into_inner().into_inner();
        let mut rf = replay_framer(bytes);
        let mut rctrl = ReplayController::new(Mode::Play);
        let mut rq = AsyncQueue::new();
        let mut rfx = Fixture::new();

        for _ in 0..55 {
            rctrl.instruction(true, &mut rf, &mut rq, &mut rfx.collab()).unwrap();
        }
        assert_eq!(rctrl.current_step(), 55);
    }

    // S2: interleaved interrupt.
    #[test]
    fn s2_interleaved_interrupt() {
        let mut f = framer();
        let mut ctrl = ReplayController::new(Mode::Record);
        let mut q = AsyncQueue::new();
        let mut fx = Fixture::new();

        for _ in 0..5 {
            ctrl.instruction(true, &mut f, &mut q, &mut fx.collab()).unwrap();
        }
        ctrl.interrupt(&mut f, &mut fx.collab()).unwrap();
        for _ in 0..5 {
            ctrl.instruction(true, &mut f, &mut q, &mut fx.collab()).unwrap();
        }

        let bytes = f.into_inner().into_inner();
        let mut rf = replay_framer(bytes);
        let mut rctrl = ReplayController::new(Mode::Play);
        let mut rq = AsyncQueue::new();
        let mut rfx = Fixture::new();

        for _ in 0..5 {
            rctrl.instruction(true, &mut rf, &mut rq, &mut rfx.collab()).unwrap();
        }
        assert!(rctrl.interrupt(&mut rf, &mut rfx.collab()).unwrap());
        for _ in 0..5 {
            rctrl.instruction(true, &mut rf, &mut rq, &mut rfx.collab()).unwrap();
        }
        assert!(!rctrl.interrupt(&mut rf, &mut rfx.collab()).unwrap());
        assert_eq!(rctrl.current_step(), 10);
    }

    // S4: checkpoint without events.
    #[test]
    fn s4_checkpoint_without_events() {
        let mut f = framer();
        let mut ctrl = ReplayController::new(Mode::Record);
        let mut q = AsyncQueue::new();
        let mut fx = Fixture::new();
        assert_eq!(ctrl.checkpoint(5, &mut f, &mut q, &mut fx.collab()).unwrap(), 1);

        let bytes = f.into_inner().into_inner();
        let mut rf = replay_framer(bytes);
        let mut rctrl = ReplayController::new(Mode::Play);
        let mut rq = AsyncQueue::new();
        let mut rfx = Fixture::new();

        assert_eq!(rctrl.checkpoint(5, &mut rf, &mut rq, &mut rfx.collab()).unwrap(), 1);
    }

    #[test]
    fn checkpoint_not_recorded_returns_zero() {
        let mut f = framer();
        let mut ctrl = ReplayController::new(Mode::Record);
        let mut q = AsyncQueue::new();
        let mut fx = Fixture::new();
        ctrl.checkpoint(5, &mut f, &mut q, &mut fx.collab()).unwrap();

        let bytes = f.into_inner().into_inner();
        let mut rf = replay_framer(bytes);
        let mut rctrl = ReplayController::new(Mode::Play);
        let mut rq = AsyncQueue::new();
        let mut rfx = Fixture::new();

        // Asking for checkpoint 6 when only 5 was recorded must not match.
        assert_eq!(rctrl.checkpoint(6, &mut rf, &mut rq, &mut rfx.collab()).unwrap(), 0);
    }

    // S5: clock caching.
    #[test]
    fn s5_clock_caching() {
        let mut f = framer();
        let mut ctrl = ReplayController::new(Mode::Record);
        let mut q = AsyncQueue::new();
        let mut fx = Fixture::new();

        ctrl.save_clock(ClockKind::Virtual, 1_000, &mut f).unwrap();
        ctrl.instruction(true, &mut f, &mut q, &mut fx.collab()).unwrap();
        ctrl.save_clock(ClockKind::Virtual, 1_050, &mut f).unwrap();
        ctrl.write_end(&mut f).unwrap();

        let bytes = f.into_inner().into_inner();
        let mut rf = replay_framer(bytes);
        let mut rctrl = ReplayController::new(Mode::Play);
        let mut rq = AsyncQueue::new();
        let mut rfx = Fixture::new();

        assert_eq!(
            rctrl.read_clock(ClockKind::Virtual, &mut rf, &mut rfx.collab()).unwrap(),
            1_000
        );
        rctrl.instruction(true, &mut rf, &mut rq, &mut rfx.collab()).unwrap();
        assert_eq!(
            rctrl.read_clock(ClockKind::Virtual, &mut rf, &mut rfx.collab()).unwrap(),
            1_050
        );
    }

    #[test]
    fn undo_last_instruction_is_a_noop_on_play() {
        let mut f = framer();
        let mut ctrl = ReplayController::new(Mode::Record);
        let mut q = AsyncQueue::new();
        let mut fx = Fixture::new();
        ctrl.instruction(true, &mut f, &mut q, &mut fx.collab()).unwrap();
        ctrl.write_end(&mut f).unwrap();

        let bytes = f.into_inner().into_inner();
        let mut rf = replay_framer(bytes);
        let mut rctrl = ReplayController::new(Mode::Play);
        let mut rq = AsyncQueue::new();
        let mut rfx = Fixture::new();

        rctrl.undo_last_instruction();
        let before = rctrl.current_step();
        rctrl.instruction(true, &mut rf, &mut rq, &mut rfx.collab()).unwrap();
        assert_eq!(rctrl.current_step(), before);
    }
}
