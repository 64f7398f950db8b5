//! The XIO instructions, as they act on a single unit.
//!
//! Routing, the absent-device checks and the channel-wide resets
//! are done by the channel table (see `table.rs`); the code here runs
//! once the addressed unit has been found.
use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use crate::io::{Device, PreCheck, Subchannel};
use crate::program::TransferState;

/// The seven XIO operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum XioOp {
    StartIo,
    TestIo,
    HaltIo,
    StopIo,
    ResetChannel,
    ResetController,
    GrabIo,
}

impl Display for XioOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            XioOp::StartIo => "SIO",
            XioOp::TestIo => "TIO",
            XioOp::HaltIo => "HIO",
            XioOp::StopIo => "STPIO",
            XioOp::ResetChannel => "RSCHNL",
            XioOp::ResetController => "RSCTL",
            XioOp::GrabIo => "GRIO",
        })
    }
}

/// The operand of an XIO instruction: a logical channel and a
/// sub-address on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct XioAddress {
    pub channel: LogicalChannel,
    pub sub: SubAddress,
}

impl XioAddress {
    #[must_use]
    pub const fn new(channel: u8, sub: u8) -> XioAddress {
        XioAddress {
            channel: LogicalChannel(channel),
            sub: SubAddress(sub),
        }
    }
}

impl Display for XioAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}{}", self.channel, self.sub)
    }
}

impl Subchannel<'_> {
    pub(crate) fn start_io(&mut self, device: &mut dyn Device, list: Address) -> XioOutcome {
        let pre_check = device.pre_check(self.unit.sub);
        if self.program.is_in_flight() || pre_check == PreCheck::BusyQueueable {
            return self.queue_start(list);
        }
        if pre_check == PreCheck::Busy {
            return XioOutcome::Busy;
        }
        if let Some(outcome) = self.deliver_queued_status() {
            return outcome;
        }
        self.program
            .begin(list, pre_check == PreCheck::AwaitingInit);
        let outcome = self.execute_descriptor_list(device, false);
        event!(Level::DEBUG, "program at {} is {:?}", list, outcome);
        XioOutcome::AcceptedNoStatus
    }

    /// Hold a Start in the unit's pending-start queue.  Devices
    /// without a queue answer Busy.
    fn queue_start(&mut self, list: Address) -> XioOutcome {
        match self.pending.as_mut() {
            Some(queue) => match queue.enqueue(list) {
                Ok(()) => {
                    event!(Level::DEBUG, "start of list {} queued", list);
                    XioOutcome::AcceptedQueued
                }
                Err(e) => {
                    event!(Level::DEBUG, "{}", e);
                    XioOutcome::Busy
                }
            },
            None => XioOutcome::Busy,
        }
    }

    pub(crate) fn test_io(&mut self) -> XioOutcome {
        self.deliver_queued_status()
            .unwrap_or(XioOutcome::AcceptedNoStatus)
    }

    /// Without a device hook, the halt record is stored and then the
    /// head of the channel's FIFO is posted.  That is the oldest queued
    /// record, which may belong to another unit; the halt record then
    /// waits its turn.
    pub(crate) fn halt_io(&mut self, device: &mut dyn Device) -> XioOutcome {
        if !self.program.is_in_flight() {
            return XioOutcome::AcceptedNoStatus;
        }
        self.cancel_completion();
        let hook = device.halt(self.unit.sub, self);
        // The halt ends the current command wherever it had got to;
        // that is not a length error.
        self.program.flags = CommandFlags::SUPPRESS_LENGTH;
        let flags = StatusFlags::ENDS | StatusFlags::UNIT_EXCEPTION | hook.unwrap_or(StatusFlags::empty());
        event!(Level::DEBUG, "halting unit {} with {:?}", self.unit, flags);
        self.signal_channel_end(device, flags);
        match hook {
            Some(_) => XioOutcome::AcceptedNoStatus,
            None => self
                .deliver_queued_status()
                .unwrap_or(XioOutcome::AcceptedNoStatus),
        }
    }

    pub(crate) fn stop_io(&mut self, device: &mut dyn Device) -> XioOutcome {
        if self.program.is_in_flight() {
            self.program
                .flags
                .remove(CommandFlags::DATA_CHAIN | CommandFlags::COMMAND_CHAIN);
            if let Some(flags) = device.stop(self.unit.sub, self) {
                event!(Level::DEBUG, "device ended stopped command with {:?}", flags);
                self.cancel_completion();
                self.signal_channel_end(device, flags);
            }
        }
        XioOutcome::AcceptedNoStatus
    }

    pub(crate) fn grab_io(&mut self) -> XioOutcome {
        match self.program.state {
            TransferState::Busy | TransferState::ChannelEndPending => XioOutcome::Busy,
            TransferState::AwaitingNext => XioOutcome::BusySubchannel,
            TransferState::Empty | TransferState::Done | TransferState::Posted => self.test_io(),
        }
    }
}
