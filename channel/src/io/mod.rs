//! The contract between the channel and the device models attached
//! to it.
//!
//! ## Life of a command
//!
//! The engine fetches a descriptor and calls
//! [`Device::start_command`].  The device either finishes the command
//! at once (returning channel end and device end), fails it (unit
//! check and friends) or starts working on it, in which case it asks
//! for a deferred completion with [`Subchannel::complete_after`].
//! When that time arrives the channel table calls
//! [`DeferredCompletion::fire`] and the device reports its ending
//! status.
//!
//! During a command the device moves data with
//! [`Subchannel::read_byte`] (memory to device) and
//! [`Subchannel::write_byte`] (device to memory).  When the count of
//! one descriptor runs out and it is data chained, these continue
//! with the next descriptor, so the device sees a single stream of
//! bytes.
use std::fmt::{self, Debug, Display, Formatter};
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use crate::context::Context;
use crate::error::ProgramCheck;
use crate::fifo::StatusFifo;
use crate::inch::StatusBuffer;
use crate::interrupt::InterruptLevelTable;
use crate::memory::MemoryUnit;
use crate::pending::PendingStartQueue;
use crate::program::ChannelProgram;
use crate::xio::XioOp;

mod dev_loopback;
mod schedq;

pub use dev_loopback::{Loopback, LoopbackConfiguration, SENSE_COMMAND_REJECT};
pub(crate) use schedq::CompletionQueue;

/// What a device says about itself before a Start is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreCheck {
    Ready,
    Busy,
    /// Busy, but a Start may wait in the unit's pending-start queue.
    /// It runs when the device reports it is ready (see
    /// [`crate::ChannelTable::device_ready`]).
    BusyQueueable,
    /// The next program must begin with INCH.
    AwaitingInit,
}

/// The result of a deferred completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The command has ended; these are its ending status bits.
    End(StatusFlags),
    /// The command is still running (the device has scheduled
    /// another completion, or will signal the channel later).
    Continue,
}

/// How far a descriptor list got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramOutcome {
    /// A command is running asynchronously.
    Running,
    /// The program ended normally.
    Completed,
    /// The program ended with an error condition.
    Failed,
}

/// Why a byte transfer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEnd {
    /// The count ran out and the descriptor is not data chained.
    CountExhausted,
    /// Fetching the next data-chained descriptor failed.
    ProgramCheck,
    /// The data address is outside guest memory.
    MemoryFault,
}

impl Display for TransferEnd {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            TransferEnd::CountExhausted => "byte count exhausted",
            TransferEnd::ProgramCheck => "program check in data chain",
            TransferEnd::MemoryFault => "data address is not mapped",
        })
    }
}

impl std::error::Error for TransferEnd {}

/// The deferred part of a command; called by the channel table when
/// the time requested with [`Subchannel::complete_after`] arrives.
pub trait DeferredCompletion {
    fn fire(&mut self, sub: SubAddress, io: &mut Subchannel<'_>) -> Completion;
}

/// A device model.  One device object may serve several
/// sub-addresses; each call says which one it concerns.
pub trait Device: DeferredCompletion {
    fn name(&self) -> String;

    fn pre_check(&mut self, sub: SubAddress) -> PreCheck;

    /// Begin `command`.  The returned bits are merged into the
    /// program's status.
    fn start_command(
        &mut self,
        sub: SubAddress,
        command: Command,
        io: &mut Subchannel<'_>,
    ) -> StatusFlags;

    /// The number of Starts this device can hold while busy, or None
    /// if it cannot queue them.
    fn start_queue_capacity(&self) -> Option<usize> {
        None
    }

    fn supports(&self, _op: XioOp) -> bool {
        true
    }

    /// Custom Halt handling.  `None` means the device has no halt
    /// hook; otherwise the returned bits are added to the halt status
    /// and the record is left for the interrupt.
    fn halt(&mut self, _sub: SubAddress, _io: &mut Subchannel<'_>) -> Option<StatusFlags> {
        None
    }

    /// Custom Stop handling.  Returning ending status ends the current
    /// command at once.
    fn stop(&mut self, _sub: SubAddress, _io: &mut Subchannel<'_>) -> Option<StatusFlags> {
        None
    }

    fn reset_channel(&mut self, _sub: SubAddress) {}

    fn reset_controller(&mut self, _sub: SubAddress) {}

    /// Devices which walk their own descriptor lists return
    /// `Some(outcome)` here; the engine's loop is then not used.
    fn iocl_override(
        &mut self,
        _sub: SubAddress,
        _io: &mut Subchannel<'_>,
    ) -> Option<ProgramOutcome> {
        None
    }
}

pub(crate) struct AttachedUnit {
    pub(crate) device: Box<dyn Device>,
    pub(crate) program: ChannelProgram,
    pub(crate) pending: Option<PendingStartQueue>,
    pub(crate) enabled: bool,
}

impl Debug for AttachedUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("AttachedUnit")
            .field("device", &format_args!("<device: {}>", self.device.name()))
            .field("program", &self.program)
            .field("pending", &self.pending)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Everything the engine (and a device) may touch while working on
/// one unit's channel program.
pub struct Subchannel<'a> {
    pub(crate) ctx: &'a Context,
    pub(crate) mem: &'a mut MemoryUnit,
    pub(crate) unit: UnitAddress,
    pub(crate) program: &'a mut ChannelProgram,
    pub(crate) pending: Option<&'a mut PendingStartQueue>,
    pub(crate) fifo: &'a mut StatusFifo,
    pub(crate) status_buffer: &'a mut StatusBuffer,
    pub(crate) levels: &'a mut InterruptLevelTable,
    pub(crate) completions: &'a mut CompletionQueue,
    pub(crate) level: Option<InterruptLevel>,
}

impl Subchannel<'_> {
    pub fn unit(&self) -> UnitAddress {
        self.unit
    }

    pub fn now(&self) -> Duration {
        self.ctx.simulated_time
    }

    pub fn command(&self) -> Option<Command> {
        self.program.command
    }

    pub fn flags(&self) -> CommandFlags {
        self.program.flags
    }

    /// Bytes remaining in the current descriptor.
    pub fn residual_count(&self) -> u16 {
        self.program.count
    }

    pub fn data_address(&self) -> Address {
        self.program.data_address
    }

    pub fn merge_status(&mut self, flags: StatusFlags) {
        self.program.status |= flags;
    }

    /// Ask for [`DeferredCompletion::fire`] to be called `delay`
    /// from now.  Replaces any completion already scheduled.
    pub fn complete_after(&mut self, delay: Duration) {
        let due = self.ctx.simulated_time + delay;
        self.completions.schedule(self.unit, due);
    }

    pub fn cancel_completion(&mut self) {
        self.completions.cancel(&self.unit);
    }

    /// Load the next descriptor of the list into the program, for
    /// devices which walk the list themselves.
    ///
    /// # Errors
    ///
    /// The program check which the descriptor caused; the program's
    /// status already includes Program Check.
    pub fn fetch_next(&mut self, allow_tic: bool) -> Result<Iocd, ProgramCheck> {
        match self.fetch_descriptor(allow_tic) {
            Ok(_) => Ok(Iocd::new(
                self.program.command.unwrap_or(Command::NOP),
                self.program.data_address,
                self.program.flags,
                self.program.count,
            )),
            Err(check) => {
                self.program_check(check);
                Err(check)
            }
        }
    }

    fn ensure_data(&mut self) -> Result<(), TransferEnd> {
        while self.program.count == 0 {
            if !self.program.is_data_chaining() {
                return Err(TransferEnd::CountExhausted);
            }
            if let Err(check) = self.fetch_descriptor(true) {
                self.program_check(check);
                return Err(TransferEnd::ProgramCheck);
            }
        }
        Ok(())
    }

    fn advance_data(&mut self) {
        self.program.count -= 1;
        self.program.data_address = match self.program.command.map(Command::kind) {
            Some(CommandKind::ReadBackward) => self.program.data_address.wrapping_sub(1),
            _ => self.program.data_address.wrapping_add(1),
        };
    }

    fn data_check(&mut self, e: &dyn std::error::Error) -> TransferEnd {
        event!(Level::WARN, "unit {}: channel data check: {e}", self.unit);
        self.program.status |= StatusFlags::CHANNEL_DATA_CHECK;
        self.program
            .flags
            .remove(CommandFlags::DATA_CHAIN | CommandFlags::COMMAND_CHAIN);
        TransferEnd::MemoryFault
    }

    /// Take the next byte from memory for an output command.
    ///
    /// # Errors
    ///
    /// See [`TransferEnd`].
    pub fn read_byte(&mut self) -> Result<u8, TransferEnd> {
        self.ensure_data()?;
        let addr = self.program.data_address;
        match self.mem.fetch_byte(addr) {
            Ok(byte) => {
                self.advance_data();
                Ok(byte)
            }
            Err(e) => Err(self.data_check(&e)),
        }
    }

    /// Give the next byte from the device to memory, for an input
    /// command.  With skip set the byte is counted but not stored.
    ///
    /// # Errors
    ///
    /// See [`TransferEnd`].
    pub fn write_byte(&mut self, byte: u8) -> Result<(), TransferEnd> {
        self.ensure_data()?;
        if !self.program.flags.contains(CommandFlags::SKIP) {
            let addr = self.program.data_address;
            if let Err(e) = self.mem.store_byte(addr, byte) {
                return Err(self.data_check(&e));
            }
        }
        self.advance_data();
        Ok(())
    }
}
