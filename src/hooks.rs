//! Collaborator hooks consumed by the replay core (spec section 6.2).
//!
//! The original couples to process-wide globals and functions
//! (`first_cpu`, `vm_stop`, `qemu_system_shutdown_request_impl`, ...).
//! Grounded on the teacher's pluggable-backend pattern — a small trait
//! plus a factory function (`SidDevice` / `create_device()` in
//! `src/sid_device.rs`) — this port expresses each disjoint
//! collaborator concern (CPU bookkeeping, VM lifecycle, per-kind
//! async dispatch) as its own trait, since unlike the teacher's single
//! hardware backend the replay core's collaborators really are
//! separate subsystems that a host wires up independently.

use crate::error::Result;
use crate::queue::{CharEvent, InputEvent, NetworkPacket, UsbIsoXfer, UsbXfer};

/// CPU-side action the replay core needs from the host during reverse
/// execution. The controller tracks its own instruction count and step
/// counter rather than reaching into the CPU for them (spec.md §4.4's
/// "pointer to the first CPU's `instructions_count`" is this crate's own
/// `ReplayController::pending_instructions`/`current_step`, not a hook
/// call), so this trait only covers what no internal state can stand in
/// for: flushing translated code before a snapshot reload changes the
/// guest's memory out from under it.
pub trait CpuHooks {
    /// Invalidate all cached translations (needed before reverse execution).
    fn tb_flush_all(&mut self);
}

/// VM run-state control and snapshotting, used by the snapshot timer
/// and by `skip_async_events`'s `SAVE_VM_BEGIN`/`SHUTDOWN` handling.
pub trait VmHooks {
    fn runstate_is_running(&self) -> bool;
    fn vm_stop(&mut self, reason: &str);
    fn vm_start(&mut self);
    fn in_vcpu_thread(&self) -> bool;
    fn save_vmstate(&mut self, name: &str) -> Result<()>;
    fn load_vmstate(&mut self, name: &str) -> Result<()>;
    fn shutdown_request(&mut self);
}

/// Per-async-kind dispatch: handing a decoded event back to the
/// subsystem that owns it (input, network, char, USB, bottom-halves,
/// the thread pool).
pub trait AsyncDispatch {
    fn dispatch_bh(&mut self, id: i64);
    fn dispatch_thread(&mut self, id: i64);
    fn dispatch_input(&mut self, evt: &InputEvent);
    fn dispatch_input_sync(&mut self);
    fn dispatch_network(&mut self, pkt: &NetworkPacket);
    fn dispatch_char(&mut self, evt: &CharEvent);
    fn dispatch_usb_ctrl(&mut self, id: i64, xfer: &UsbXfer);
    fn dispatch_usb_data(&mut self, id: i64, xfer: &UsbXfer);
    fn dispatch_usb_iso(&mut self, id: i64, xfer: &UsbIsoXfer);
}

/// Bundles the three collaborator traits for a single controller call.
/// Passed by reference rather than stored, since the host owns the
/// real CPU/VM/device state and the controller never outlives one call.
pub struct Collaborators<'a> {
    pub cpu: &'a mut dyn CpuHooks,
    pub vm: &'a mut dyn VmHooks,
    pub dispatch: &'a mut dyn AsyncDispatch,
}

/// Minimal `CpuHooks` test double.
#[derive(Debug, Default)]
pub struct NullCpu {
    pub flushes: u32,
}

impl CpuHooks for NullCpu {
    fn tb_flush_all(&mut self) {
        self.flushes += 1;
    }
}

/// Minimal `VmHooks` test double.
#[derive(Debug, Default)]
pub struct NullVm {
    pub running: bool,
    pub in_vcpu_thread: bool,
    pub saved: Vec<String>,
    pub loaded: Vec<String>,
    pub shutdown_requested: bool,
}

impl VmHooks for NullVm {
    fn runstate_is_running(&self) -> bool {
        self.running
    }
    fn vm_stop(&mut self, _reason: &str) {
        self.running = false;
    }
    fn vm_start(&mut self) {
        self.running = true;
    }
    fn in_vcpu_thread(&self) -> bool {
        self.in_vcpu_thread
    }
    fn save_vmstate(&mut self, name: &str) -> Result<()> {
        self.saved.push(name.to_string());
        Ok(())
    }
    fn load_vmstate(&mut self, name: &str) -> Result<()> {
        self.loaded.push(name.to_string());
        Ok(())
    }
    fn shutdown_request(&mut self) {
        self.shutdown_requested = true;
    }
}

/// Records every dispatched event, in dispatch order, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchedEvent {
    Bh(i64),
    Thread(i64),
    Input,
    InputSync,
    Network(u64),
    Char(u8),
    UsbCtrl(i64),
    UsbData(i64),
    UsbIso(i64),
}

/// Minimal `AsyncDispatch` test double.
#[derive(Debug, Default)]
pub struct NullDispatch {
    pub events: Vec<DispatchedEvent>,
}

impl AsyncDispatch for NullDispatch {
    fn dispatch_bh(&mut self, id: i64) {
        self.events.push(DispatchedEvent::Bh(id));
    }
    fn dispatch_thread(&mut self, id: i64) {
        self.events.push(DispatchedEvent::Thread(id));
    }
    fn dispatch_input(&mut self, _evt: &InputEvent) {
        self.events.push(DispatchedEvent::Input);
    }
    fn dispatch_input_sync(&mut self) {
        self.events.push(DispatchedEvent::InputSync);
    }
    fn dispatch_network(&mut self, pkt: &NetworkPacket) {
        self.events.push(DispatchedEvent::Network(pkt.packet_id));
    }
    fn dispatch_char(&mut self, evt: &CharEvent) {
        self.events.push(DispatchedEvent::Char(evt.driver_id));
    }
    fn dispatch_usb_ctrl(&mut self, id: i64, _xfer: &UsbXfer) {
        self.events.push(DispatchedEvent::UsbCtrl(id));
    }
    fn dispatch_usb_data(&mut self, id: i64, _xfer: &UsbXfer) {
        self.events.push(DispatchedEvent::UsbData(id));
    }
    fn dispatch_usb_iso(&mut self, id: i64, _xfer: &UsbIsoXfer) {
        self.events.push(DispatchedEvent::UsbIso(id));
    }
}
