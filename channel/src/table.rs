//! The channel table owns every configured channel, the units
//! attached to them, the interrupt levels and the completion
//! scheduler.  It is the entry point for XIO instructions, for the
//! interrupt scan and for the passage of simulated time.
use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{event, span, Level};

use base::prelude::*;

use crate::context::Context;
use crate::error::{ConfigurationError, LookupFailure, QueueOverflow};
use crate::fifo::StatusFifo;
use crate::inch::{post_status, StatusBuffer};
use crate::interrupt::{InterruptContext, InterruptLevelTable, LevelOwner, LevelState};
use crate::io::{AttachedUnit, Completion, CompletionQueue, Device, ProgramOutcome, Subchannel};
use crate::memory::MemoryUnit;
use crate::pending::PendingStartQueue;
use crate::program::{ChannelProgram, TransferState};
use crate::xio::{XioAddress, XioOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfiguration {
    pub fifo_capacity: usize,
    /// The interrupt level which reports this channel's status, and
    /// the address of its interrupt context block.
    pub interrupt: Option<(InterruptLevel, Address)>,
    /// A status buffer to use before any INCH is run: base and length
    /// in bytes.
    pub status_buffer: Option<(Address, u16)>,
}

impl Default for ChannelConfiguration {
    fn default() -> ChannelConfiguration {
        ChannelConfiguration {
            fifo_capacity: 16,
            interrupt: None,
            status_buffer: None,
        }
    }
}

#[derive(Debug)]
struct Channel {
    fifo: StatusFifo,
    status_buffer: StatusBuffer,
    level: Option<InterruptLevel>,
    units: BTreeMap<SubAddress, AttachedUnit>,
}

#[derive(Debug, Default)]
pub struct ChannelTable {
    channels: BTreeMap<ChannelNumber, Channel>,
    routes: BTreeMap<LogicalChannel, ChannelNumber>,
    levels: InterruptLevelTable,
    completions: CompletionQueue,
}

impl ChannelTable {
    #[must_use]
    pub fn new() -> ChannelTable {
        ChannelTable::default()
    }

    /// Configure a channel.  It is routed from the logical channel of
    /// the same number unless [`ChannelTable::route`] says otherwise.
    ///
    /// # Errors
    ///
    /// When the channel or its interrupt level is already configured,
    /// or the configuration is unusable.
    pub fn add_channel(
        &mut self,
        number: ChannelNumber,
        config: &ChannelConfiguration,
    ) -> Result<(), ConfigurationError> {
        if self.channels.contains_key(&number) {
            return Err(ConfigurationError::DuplicateChannel(number));
        }
        if config.fifo_capacity == 0 {
            return Err(ConfigurationError::ZeroCapacity(format!(
                "status FIFO of channel {number}"
            )));
        }
        let mut status_buffer = StatusBuffer::default();
        if let Some((base, length)) = config.status_buffer {
            status_buffer
                .configure(base, length)
                .map_err(|_| ConfigurationError::BadStatusBuffer { base, length })?;
        }
        let level = match config.interrupt {
            Some((level, icb)) => {
                self.levels
                    .configure(level, LevelOwner::Channel(number), icb)?;
                Some(level)
            }
            None => None,
        };
        event!(
            Level::INFO,
            "configured channel {} with a {}-entry status FIFO",
            number,
            config.fifo_capacity
        );
        self.channels.insert(
            number,
            Channel {
                fifo: StatusFifo::new(number, config.fifo_capacity),
                status_buffer,
                level,
                units: BTreeMap::new(),
            },
        );
        self.routes
            .entry(LogicalChannel(number.0))
            .or_insert(number);
        Ok(())
    }

    /// Map the logical channel used by XIO instructions onto a real
    /// channel.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` if `real` is not configured.
    pub fn route(
        &mut self,
        logical: LogicalChannel,
        real: ChannelNumber,
    ) -> Result<(), ConfigurationError> {
        if !self.channels.contains_key(&real) {
            return Err(ConfigurationError::UnknownChannel(real));
        }
        event!(Level::INFO, "logical channel {} routed to {}", logical, real);
        self.routes.insert(logical, real);
        Ok(())
    }

    /// Attach a device at `unit`.  The unit starts out enabled.
    ///
    /// # Errors
    ///
    /// When the channel is not configured, the sub-address is taken,
    /// or the device asks for a zero-length pending-start queue.
    pub fn attach(&mut self, unit: UnitAddress, device: Box<dyn Device>) -> Result<(), ConfigurationError> {
        let channel = self
            .channels
            .get_mut(&unit.channel)
            .ok_or(ConfigurationError::UnknownChannel(unit.channel))?;
        if channel.units.contains_key(&unit.sub) {
            return Err(ConfigurationError::DuplicateUnit(unit));
        }
        let pending = match device.start_queue_capacity() {
            Some(0) => {
                return Err(ConfigurationError::ZeroCapacity(format!(
                    "pending-start queue of unit {unit}"
                )));
            }
            Some(capacity) => Some(PendingStartQueue::new(unit, capacity)),
            None => None,
        };
        event!(Level::INFO, "attached {} at {}", device.name(), unit);
        channel.units.insert(
            unit.sub,
            AttachedUnit {
                device,
                program: ChannelProgram::default(),
                pending,
                enabled: true,
            },
        );
        Ok(())
    }

    fn unit_mut(&mut self, unit: UnitAddress) -> Result<&mut AttachedUnit, LookupFailure> {
        self.channels
            .get_mut(&unit.channel)
            .ok_or(LookupFailure::NoChannel(unit.channel))?
            .units
            .get_mut(&unit.sub)
            .ok_or(LookupFailure::NoUnit(unit))
    }

    fn unit_ref(&self, unit: UnitAddress) -> Option<&AttachedUnit> {
        self.channels
            .get(&unit.channel)
            .and_then(|channel| channel.units.get(&unit.sub))
    }

    /// # Errors
    ///
    /// When there is no such unit.
    pub fn set_unit_enabled(&mut self, unit: UnitAddress, enabled: bool) -> Result<(), LookupFailure> {
        let attached = self.unit_mut(unit)?;
        event!(
            Level::INFO,
            "unit {} {}",
            unit,
            if enabled { "enabled" } else { "disabled" }
        );
        attached.enabled = enabled;
        Ok(())
    }

    /// Find the unit an XIO instruction addresses.
    ///
    /// # Errors
    ///
    /// The reason the unit is absent.
    pub fn resolve(&self, addr: XioAddress) -> Result<UnitAddress, LookupFailure> {
        let channel = *self
            .routes
            .get(&addr.channel)
            .ok_or(LookupFailure::NoRoute(addr.channel))?;
        let unit = UnitAddress {
            channel,
            sub: addr.sub,
        };
        let attached = self
            .channels
            .get(&channel)
            .ok_or(LookupFailure::NoChannel(channel))?
            .units
            .get(&addr.sub)
            .ok_or(LookupFailure::NoUnit(unit))?;
        if attached.enabled {
            Ok(unit)
        } else {
            Err(LookupFailure::Disabled(unit))
        }
    }

    /// Run `f` with the unit's device and a [`Subchannel`] for it.
    fn with_subchannel<R, F>(
        &mut self,
        ctx: &Context,
        mem: &mut MemoryUnit,
        unit: UnitAddress,
        f: F,
    ) -> Result<R, LookupFailure>
    where
        F: FnOnce(&mut dyn Device, &mut Subchannel<'_>) -> R,
    {
        let ChannelTable {
            channels,
            levels,
            completions,
            ..
        } = self;
        let Channel {
            fifo,
            status_buffer,
            level,
            units,
        } = channels
            .get_mut(&unit.channel)
            .ok_or(LookupFailure::NoChannel(unit.channel))?;
        let AttachedUnit {
            device,
            program,
            pending,
            ..
        } = units.get_mut(&unit.sub).ok_or(LookupFailure::NoUnit(unit))?;
        let mut io = Subchannel {
            ctx,
            mem,
            unit,
            program,
            pending: pending.as_mut(),
            fifo,
            status_buffer,
            levels,
            completions,
            level: *level,
        };
        Ok(f(device.as_mut(), &mut io))
    }

    /// Perform an XIO instruction.  `list` is the descriptor list
    /// address for Start and is otherwise ignored.
    pub fn execute_xio(
        &mut self,
        ctx: &Context,
        mem: &mut MemoryUnit,
        op: XioOp,
        addr: XioAddress,
        list: Address,
    ) -> XioOutcome {
        let span = span!(Level::ERROR, "xio", op=%op, addr=%addr);
        let _enter = span.enter();
        let unit = match self.resolve(addr) {
            Ok(unit) => unit,
            Err(e) => {
                event!(Level::DEBUG, "device absent: {}", e);
                return XioOutcome::DeviceAbsent;
            }
        };
        let supported = self
            .unit_ref(unit)
            .is_some_and(|attached| attached.device.supports(op));
        if !supported {
            event!(Level::DEBUG, "unit {} does not support {}", unit, op);
            return XioOutcome::Unsupported;
        }
        let outcome = match op {
            XioOp::ResetChannel => {
                self.reset_channel(unit.channel);
                Ok(XioOutcome::AcceptedNoStatus)
            }
            XioOp::ResetController => {
                self.reset_controller(unit);
                Ok(XioOutcome::AcceptedNoStatus)
            }
            XioOp::StartIo => {
                self.with_subchannel(ctx, mem, unit, |device, io| io.start_io(device, list))
            }
            XioOp::TestIo => self.with_subchannel(ctx, mem, unit, |_, io| io.test_io()),
            XioOp::HaltIo => self.with_subchannel(ctx, mem, unit, |device, io| io.halt_io(device)),
            XioOp::StopIo => self.with_subchannel(ctx, mem, unit, |device, io| io.stop_io(device)),
            XioOp::GrabIo => self.with_subchannel(ctx, mem, unit, |_, io| io.grab_io()),
        };
        let outcome = outcome.unwrap_or(XioOutcome::DeviceAbsent);
        event!(
            Level::DEBUG,
            "outcome {:?} (condition code {:04b})",
            outcome,
            outcome.condition_code().bits()
        );
        outcome
    }

    pub fn start_io(
        &mut self,
        ctx: &Context,
        mem: &mut MemoryUnit,
        addr: XioAddress,
        list: Address,
    ) -> XioOutcome {
        self.execute_xio(ctx, mem, XioOp::StartIo, addr, list)
    }

    pub fn test_io(&mut self, ctx: &Context, mem: &mut MemoryUnit, addr: XioAddress) -> XioOutcome {
        self.execute_xio(ctx, mem, XioOp::TestIo, addr, Address::ZERO)
    }

    pub fn halt_io(&mut self, ctx: &Context, mem: &mut MemoryUnit, addr: XioAddress) -> XioOutcome {
        self.execute_xio(ctx, mem, XioOp::HaltIo, addr, Address::ZERO)
    }

    pub fn stop_io(&mut self, ctx: &Context, mem: &mut MemoryUnit, addr: XioAddress) -> XioOutcome {
        self.execute_xio(ctx, mem, XioOp::StopIo, addr, Address::ZERO)
    }

    pub fn grab_io(&mut self, ctx: &Context, mem: &mut MemoryUnit, addr: XioAddress) -> XioOutcome {
        self.execute_xio(ctx, mem, XioOp::GrabIo, addr, Address::ZERO)
    }

    /// Reset every unit on the channel, discard its queued status and
    /// return its interrupt level to Idle.
    fn reset_channel(&mut self, number: ChannelNumber) {
        let ChannelTable {
            channels,
            levels,
            completions,
            ..
        } = self;
        let Some(channel) = channels.get_mut(&number) else {
            return;
        };
        event!(Level::INFO, "resetting channel {}", number);
        for (sub, attached) in &mut channel.units {
            completions.cancel(&UnitAddress {
                channel: number,
                sub: *sub,
            });
            attached.device.reset_channel(*sub);
            reset_unit(attached);
        }
        channel.fifo.clear();
        if let Some(level) = channel.level {
            levels.reset(level);
        }
    }

    /// Reset one unit and discard its queued status.
    fn reset_controller(&mut self, unit: UnitAddress) {
        let ChannelTable {
            channels,
            levels,
            completions,
            ..
        } = self;
        let Some(channel) = channels.get_mut(&unit.channel) else {
            return;
        };
        event!(Level::INFO, "resetting controller {}", unit);
        if let Some(attached) = channel.units.get_mut(&unit.sub) {
            completions.cancel(&unit);
            attached.device.reset_controller(unit.sub);
            reset_unit(attached);
        }
        channel.fifo.purge_unit(unit.sub);
        if let Some(level) = channel.level {
            levels.reset(level);
            if !channel.fifo.is_empty() {
                levels.request(level);
            }
        }
    }

    /// Fire every deferred completion which is due at
    /// `ctx.simulated_time`, in due order.  Returns the time of the
    /// next completion, if any.
    pub fn tick(&mut self, ctx: &Context, mem: &mut MemoryUnit) -> Option<Duration> {
        while let Some((unit, due)) = self.completions.pop_due(ctx.simulated_time) {
            let span = span!(Level::ERROR, "completion", unit=%unit);
            let _enter = span.enter();
            event!(Level::TRACE, "completion due at {:?} fires", due);
            let result = self.with_subchannel(ctx, mem, unit, |device, io| {
                if !io.program.is_in_flight() {
                    event!(Level::WARN, "completion for idle unit ignored");
                    return None;
                }
                if io.program.resume_pending {
                    return Some(io.resume_chain(device));
                }
                let sub = io.unit.sub;
                match device.fire(sub, io) {
                    Completion::End(flags) => Some(io.signal_channel_end(device, flags)),
                    Completion::Continue => None,
                }
            });
            match result {
                Ok(Some(outcome)) => event!(Level::DEBUG, "program is {:?}", outcome),
                Ok(None) => (),
                Err(e) => event!(Level::WARN, "completion for missing unit: {}", e),
            }
        }
        self.completions.next_due()
    }

    #[must_use]
    pub fn next_completion(&self) -> Option<Duration> {
        self.completions.next_due()
    }

    /// A device presents ending status outside a deferred completion
    /// (for example device end after an earlier channel end).
    ///
    /// # Errors
    ///
    /// When there is no such unit.
    pub fn signal_channel_end(
        &mut self,
        ctx: &Context,
        mem: &mut MemoryUnit,
        unit: UnitAddress,
        flags: StatusFlags,
    ) -> Result<ProgramOutcome, LookupFailure> {
        self.with_subchannel(ctx, mem, unit, |device, io| io.signal_channel_end(device, flags))
    }

    /// A device which answered [`crate::PreCheck::BusyQueueable`] can
    /// now accept work.  If the unit is idle, its oldest queued Start
    /// is run and the outcome of that program returned.
    ///
    /// # Errors
    ///
    /// When there is no such unit.
    pub fn device_ready(
        &mut self,
        ctx: &Context,
        mem: &mut MemoryUnit,
        unit: UnitAddress,
    ) -> Result<Option<ProgramOutcome>, LookupFailure> {
        self.with_subchannel(ctx, mem, unit, |device, io| io.start_queued(device))
    }

    /// Post the oldest queued status record of `channel` into its
    /// status buffer.
    pub fn post_status(
        &mut self,
        number: ChannelNumber,
        suppress: StatusFlags,
        mem: &mut MemoryUnit,
    ) -> Option<StatusRecord> {
        let channel = self.channels.get_mut(&number)?;
        post_status(&mut channel.fifo, &mut channel.status_buffer, mem, suppress)
    }

    /// # Errors
    ///
    /// When there is no such channel, or its FIFO is full.
    pub fn push_status_front(
        &mut self,
        number: ChannelNumber,
        record: StatusRecord,
    ) -> Result<(), QueueOverflow> {
        match self.channels.get_mut(&number) {
            Some(channel) => channel.fifo.push_front(record),
            None => Err(QueueOverflow::StatusFifo(number)),
        }
    }

    /// Configure a level for a source with no status FIFO.
    ///
    /// # Errors
    ///
    /// When the level is already configured.
    pub fn add_simple_level(&mut self, level: InterruptLevel, icb: Address) -> Result<(), ConfigurationError> {
        self.levels.configure(level, LevelOwner::Simple, icb)
    }

    /// # Errors
    ///
    /// When the level is not configured.
    pub fn enable_level(&mut self, level: InterruptLevel) -> Result<(), LookupFailure> {
        self.levels.set_enabled(level, true)
    }

    /// # Errors
    ///
    /// When the level is not configured.
    pub fn disable_level(&mut self, level: InterruptLevel) -> Result<(), LookupFailure> {
        self.levels.set_enabled(level, false)
    }

    pub fn set_interrupts_blocked(&mut self, blocked: bool) {
        event!(Level::DEBUG, "interrupts {}", if blocked { "blocked" } else { "unblocked" });
        self.levels.set_blocked(blocked);
    }

    #[must_use]
    pub fn interrupts_blocked(&self) -> bool {
        self.levels.is_blocked()
    }

    /// # Errors
    ///
    /// When the level is not configured.
    pub fn request_level(&mut self, level: InterruptLevel) -> Result<(), LookupFailure> {
        match self.levels.state(level) {
            Some(_) => {
                self.levels.request(level);
                Ok(())
            }
            None => Err(LookupFailure::NoLevel(level)),
        }
    }

    #[must_use]
    pub fn level_state(&self, level: InterruptLevel) -> Option<LevelState> {
        self.levels.state(level)
    }

    /// Grant the highest-priority pending interrupt.  For a channel
    /// level, one status record is posted first.
    pub fn scan_levels(&mut self, mem: &mut MemoryUnit) -> Option<InterruptContext> {
        let (level, owner, icb) = self.levels.claim_highest_requested()?;
        let posted = match owner {
            LevelOwner::Simple => None,
            LevelOwner::Channel(number) => self.post_status(number, StatusFlags::empty(), mem),
        };
        Some(InterruptContext {
            level,
            icb,
            owner,
            posted,
        })
    }

    /// The return from an interrupt.  If the owning channel still has
    /// status queued, the level is requested again.
    ///
    /// # Errors
    ///
    /// When the level is not configured.
    pub fn deactivate_level(&mut self, level: InterruptLevel) -> Result<(), LookupFailure> {
        let owner = self.levels.deactivate(level)?;
        if let LevelOwner::Channel(number) = owner {
            if self.channels.get(&number).is_some_and(|ch| !ch.fifo.is_empty()) {
                self.levels.request(level);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn transfer_state(&self, unit: UnitAddress) -> Option<TransferState> {
        self.unit_ref(unit).map(|attached| attached.program.state())
    }

    #[must_use]
    pub fn queued_status_count(&self, number: ChannelNumber) -> usize {
        self.channels.get(&number).map_or(0, |ch| ch.fifo.len())
    }

    #[must_use]
    pub fn pending_start_count(&self, unit: UnitAddress) -> usize {
        self.unit_ref(unit)
            .and_then(|attached| attached.pending.as_ref())
            .map_or(0, PendingStartQueue::len)
    }

    #[must_use]
    pub fn has_completion(&self, unit: UnitAddress) -> bool {
        self.completions.is_scheduled(&unit)
    }

    #[must_use]
    pub fn status_buffer_next(&self, number: ChannelNumber) -> Option<Address> {
        self.channels
            .get(&number)
            .and_then(|ch| ch.status_buffer.next_slot())
    }
}

fn reset_unit(attached: &mut AttachedUnit) {
    attached.program.clear();
    if let Some(queue) = attached.pending.as_mut() {
        queue.clear();
    }
}
