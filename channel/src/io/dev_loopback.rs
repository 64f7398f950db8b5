//! A loopback unit.  Bytes written to it are kept in a buffer and
//! returned (oldest first) by later reads.
//!
//! The unit can finish each command at once, or after a simulated
//! latency.  In the latter case the data moves when the completion
//! fires, as it would for a real device which buffers nothing.
//!
//! Commands:
//!
//! | Command    | Effect                                           |
//! | ---------- | ------------------------------------------------ |
//! | INCH       | Marks the unit initialized                       |
//! | WRITE      | Appends bytes to the buffer until the count ends |
//! | READ       | Returns buffered bytes until the count ends      |
//! | RDBWD      | As READ, but storing downwards in memory         |
//! | SENSE      | Returns one sense byte                           |
//! | NOP (0x03) | Nothing                                          |
//! | 0x07       | Discards the buffer                              |
//! | other      | Unit check, sense "command reject"               |
use std::collections::VecDeque;
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::{Completion, DeferredCompletion, Device, PreCheck, Subchannel};

/// Sense bit set when the unit rejects a command.
pub const SENSE_COMMAND_REJECT: u8 = 0x80;

/// Control command which empties the buffer.
const CLEAR_BUFFER: Command = Command(0x07);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackConfiguration {
    /// Zero means each command ends as soon as it starts.
    pub latency: Duration,
    /// Capacity of the unit's pending-start queue, if it has one.
    pub queue_capacity: Option<usize>,
    /// Programs must begin with INCH after attach or reset.
    pub require_inch: bool,
}

impl Default for LoopbackConfiguration {
    fn default() -> LoopbackConfiguration {
        LoopbackConfiguration {
            latency: Duration::ZERO,
            queue_capacity: None,
            require_inch: false,
        }
    }
}

#[derive(Debug)]
pub struct Loopback {
    config: LoopbackConfiguration,
    buffer: VecDeque<u8>,
    initialised: bool,
    sense: u8,
    /// The command waiting for its completion to fire.
    active: Option<Command>,
}

impl Loopback {
    #[must_use]
    pub fn new(config: LoopbackConfiguration) -> Loopback {
        Loopback {
            config,
            buffer: VecDeque::new(),
            initialised: false,
            sense: 0,
            active: None,
        }
    }

    /// The bytes written and not yet read back.
    pub fn buffered(&self) -> impl Iterator<Item = &u8> {
        self.buffer.iter()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.initialised = false;
        self.sense = 0;
        self.active = None;
    }

    /// Move the data for `command`.
    fn transfer(&mut self, command: Command, io: &mut Subchannel<'_>) -> StatusFlags {
        match command.kind() {
            CommandKind::Write => {
                let mut moved = 0_usize;
                let end = loop {
                    match io.read_byte() {
                        Ok(byte) => {
                            self.buffer.push_back(byte);
                            moved += 1;
                        }
                        Err(end) => break end,
                    }
                };
                event!(Level::TRACE, "loopback took {} bytes ({})", moved, end);
            }
            CommandKind::Read | CommandKind::ReadBackward => {
                while let Some(byte) = self.buffer.front().copied() {
                    match io.write_byte(byte) {
                        Ok(()) => {
                            self.buffer.pop_front();
                        }
                        Err(end) => {
                            event!(Level::TRACE, "loopback read stopped: {}", end);
                            break;
                        }
                    }
                }
            }
            CommandKind::Sense => {
                if io.write_byte(self.sense).is_ok() {
                    self.sense = 0;
                }
            }
            _ => (),
        }
        StatusFlags::ENDS
    }
}

impl DeferredCompletion for Loopback {
    fn fire(&mut self, sub: SubAddress, io: &mut Subchannel<'_>) -> Completion {
        match self.active.take() {
            Some(command) => Completion::End(self.transfer(command, io)),
            None => {
                event!(Level::WARN, "loopback {} completion with no command", sub);
                Completion::End(StatusFlags::ENDS)
            }
        }
    }
}

impl Device for Loopback {
    fn name(&self) -> String {
        "loopback".to_string()
    }

    fn pre_check(&mut self, _sub: SubAddress) -> PreCheck {
        if self.config.require_inch && !self.initialised {
            PreCheck::AwaitingInit
        } else {
            PreCheck::Ready
        }
    }

    fn start_command(
        &mut self,
        _sub: SubAddress,
        command: Command,
        io: &mut Subchannel<'_>,
    ) -> StatusFlags {
        match command.kind() {
            CommandKind::InitializeChannel => {
                self.initialised = true;
                StatusFlags::ENDS
            }
            CommandKind::Write | CommandKind::Read | CommandKind::ReadBackward | CommandKind::Sense => {
                if self.config.latency.is_zero() {
                    self.transfer(command, io)
                } else {
                    self.active = Some(command);
                    io.complete_after(self.config.latency);
                    StatusFlags::empty()
                }
            }
            CommandKind::Control if command == Command::NOP => StatusFlags::ENDS,
            CommandKind::Control if command == CLEAR_BUFFER => {
                self.buffer.clear();
                StatusFlags::ENDS
            }
            _ => {
                self.sense |= SENSE_COMMAND_REJECT;
                StatusFlags::ENDS | StatusFlags::UNIT_CHECK
            }
        }
    }

    fn start_queue_capacity(&self) -> Option<usize> {
        self.config.queue_capacity
    }

    fn reset_channel(&mut self, _sub: SubAddress) {
        self.reset();
    }

    fn reset_controller(&mut self, _sub: SubAddress) {
        self.reset();
    }
}
