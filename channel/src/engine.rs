//! The channel program engine.
//!
//! The engine walks a unit's descriptor list, hands each command to
//! the device, and when a command ends decides whether to chain to
//! the next descriptor or to finish the program and store its status.
use std::time::Duration;

use tracing::{event, span, Level};

use base::prelude::*;

use crate::error::ProgramCheck;
use crate::inch::post_status;
use crate::io::{Device, PreCheck, ProgramOutcome, Subchannel};
use crate::program::TransferState;

/// Commands chained without a device delay in one call of
/// [`Subchannel::execute_descriptor_list`].  After this many the
/// engine lets simulated time pass before fetching the next one, so a
/// list which loops on itself cannot hold up the caller.
pub(crate) const INLINE_CHAIN_LIMIT: u32 = 64;

/// How long the engine waits before resuming such a list.
pub(crate) const CHAIN_RESUME_DELAY: Duration = Duration::from_micros(1);

/// What the channel-end procedure decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndStep {
    /// Command chaining: go on to the next descriptor.
    Resume,
    /// Nothing more to do until the device signals us.
    Waiting,
    /// The program finished and a queued Start is ready to run.
    Restart(ProgramOutcome),
    /// The program finished and the unit is idle.
    Idle(ProgramOutcome),
}

impl EndStep {
    fn failed(self) -> EndStep {
        match self {
            EndStep::Restart(_) => EndStep::Restart(ProgramOutcome::Failed),
            EndStep::Idle(_) => EndStep::Idle(ProgramOutcome::Failed),
            other => other,
        }
    }
}

impl Subchannel<'_> {
    /// Fetch the next descriptor into the program, following TICs.
    /// Returns the command the descriptor carries (which for a data
    /// chained descriptor is the command being continued).
    pub(crate) fn fetch_descriptor(&mut self, allow_tic: bool) -> Result<Command, ProgramCheck> {
        let continuing = self.program.is_data_chaining();
        loop {
            let at = self.program.list_address;
            if !at.is_aligned(IOCD_ALIGNMENT) {
                return Err(ProgramCheck::MisalignedList(at));
            }
            let w1 = self.mem.fetch_word(at).map_err(ProgramCheck::ListFetch)?;
            let w2 = self
                .mem
                .fetch_word(at.wrapping_add(4))
                .map_err(ProgramCheck::ListFetch)?;
            self.program.list_address = at.wrapping_add(IOCD_SIZE);
            let iocd = Iocd::from_words(w1, w2);
            event!(Level::TRACE, "fetched {:?} from {}", iocd, at);

            if iocd.command.kind() == CommandKind::TransferInChannel {
                if !allow_tic || self.program.fetched == 0 || self.program.previous_was_tic {
                    return Err(ProgramCheck::IllegalTransferInList(at));
                }
                self.program.fetched = self.program.fetched.saturating_add(1);
                self.program.previous_was_tic = true;
                self.program.list_address = iocd.address;
                continue;
            }
            self.program.fetched = self.program.fetched.saturating_add(1);
            self.program.previous_was_tic = false;

            if iocd.reserved != 0 {
                return Err(ProgramCheck::ReservedBits {
                    at,
                    bits: iocd.reserved,
                });
            }
            let command = match (continuing, self.program.command) {
                (true, Some(previous)) => previous,
                _ => iocd.command,
            };
            if command.kind() == CommandKind::Invalid {
                return Err(ProgramCheck::InvalidCommand(command));
            }
            if iocd.flags.contains(CommandFlags::DATA_CHAIN) && !command.is_data_transfer() {
                return Err(ProgramCheck::IllegalDataChain(command));
            }
            self.program.command = Some(command);
            self.program.flags = iocd.flags;
            self.program.count = iocd.count;
            self.program.data_address = iocd.address;
            if iocd.flags.contains(CommandFlags::PCI) {
                self.store_status(StatusRecord {
                    sub: self.unit.sub,
                    ending_address: self.program.list_address,
                    flags: StatusFlags::PCI,
                    residual: iocd.count,
                });
            }
            return Ok(command);
        }
    }

    pub(crate) fn program_check(&mut self, check: ProgramCheck) {
        event!(Level::WARN, "unit {}: program check: {}", self.unit, check);
        self.program.status |= StatusFlags::PROGRAM_CHECK;
        self.program
            .flags
            .remove(CommandFlags::DATA_CHAIN | CommandFlags::COMMAND_CHAIN);
    }

    /// Run the unit's descriptor list until a command is left running
    /// on the device, or the program (and any queued programs which
    /// follow it) has finished.  The outcome is that of the program
    /// which was running when we were called.
    pub(crate) fn execute_descriptor_list(
        &mut self,
        device: &mut dyn Device,
        allow_tic: bool,
    ) -> ProgramOutcome {
        let span = span!(Level::ERROR, "iocl", unit=%self.unit);
        let _enter = span.enter();
        let mut allow_tic = allow_tic;
        let mut verdict: Option<ProgramOutcome> = None;
        let mut chained: u32 = 0;
        loop {
            match self.execute_step(device, allow_tic) {
                EndStep::Resume => {
                    allow_tic = true;
                    chained += 1;
                    if chained >= INLINE_CHAIN_LIMIT {
                        event!(
                            Level::DEBUG,
                            "{} commands chained inline; resuming at {} later",
                            chained,
                            self.program.list_address
                        );
                        self.program.resume_pending = true;
                        self.complete_after(CHAIN_RESUME_DELAY);
                        return verdict.unwrap_or(ProgramOutcome::Running);
                    }
                }
                EndStep::Waiting => {
                    return verdict.unwrap_or(ProgramOutcome::Running);
                }
                EndStep::Restart(outcome) => {
                    verdict.get_or_insert(outcome);
                    self.prepare_queued_program(device);
                    allow_tic = false;
                }
                EndStep::Idle(outcome) => {
                    return *verdict.get_or_insert(outcome);
                }
            }
        }
    }

    /// Continue a list which [`Subchannel::execute_descriptor_list`]
    /// left between chained commands.
    pub(crate) fn resume_chain(&mut self, device: &mut dyn Device) -> ProgramOutcome {
        self.program.resume_pending = false;
        if !self.program.flags.contains(CommandFlags::COMMAND_CHAIN) {
            // Stopped while the chain was yielding.
            return self.signal_channel_end(device, StatusFlags::ENDS);
        }
        self.execute_descriptor_list(device, true)
    }

    /// The device has become free.  If the unit is idle and a Start
    /// is queued, run it.
    pub(crate) fn start_queued(&mut self, device: &mut dyn Device) -> Option<ProgramOutcome> {
        if self.program.is_in_flight() {
            return None;
        }
        let pre_check = device.pre_check(self.unit.sub);
        if matches!(pre_check, PreCheck::Busy | PreCheck::BusyQueueable) {
            event!(Level::DEBUG, "unit {}: device still busy", self.unit);
            return None;
        }
        let next = self.pending.as_mut().and_then(|q| q.dequeue())?;
        event!(
            Level::DEBUG,
            "unit {}: device ready, starting queued program at {}",
            self.unit,
            next
        );
        self.program.begin(next, pre_check == PreCheck::AwaitingInit);
        Some(self.execute_descriptor_list(device, false))
    }

    fn prepare_queued_program(&mut self, device: &mut dyn Device) {
        self.program.awaiting_init = device.pre_check(self.unit.sub) == PreCheck::AwaitingInit;
    }

    /// Fetch and start one command.
    fn execute_step(&mut self, device: &mut dyn Device, allow_tic: bool) -> EndStep {
        if let Some(outcome) = device.iocl_override(self.unit.sub, self) {
            event!(Level::TRACE, "device list walker returned {:?}", outcome);
            return match outcome {
                ProgramOutcome::Running => EndStep::Waiting,
                ProgramOutcome::Completed => self.end_program_now(),
                ProgramOutcome::Failed => self.end_program_now().failed(),
            };
        }

        let command = match self.fetch_descriptor(allow_tic) {
            Ok(command) => command,
            Err(check) => {
                self.program_check(check);
                return self.end_program_now();
            }
        };

        if self.program.awaiting_init {
            if command.kind() != CommandKind::InitializeChannel {
                self.program_check(ProgramCheck::InitializationRequired(command));
                return self.end_program_now();
            }
            self.program.awaiting_init = false;
        }
        if command.kind() == CommandKind::InitializeChannel {
            if let Err(check) = self
                .status_buffer
                .configure(self.program.data_address, self.program.count)
            {
                self.program_check(check);
                return self.end_program_now();
            }
        }

        self.program.state = TransferState::Busy;
        event!(
            Level::DEBUG,
            "starting {} with data address {} count {}",
            command,
            self.program.data_address,
            self.program.count
        );
        let status = device.start_command(self.unit.sub, command, self);
        if status.intersects(StatusFlags::IMMEDIATE_END) {
            event!(Level::DEBUG, "{} ended at once with {:?}", command, status);
            self.completions.cancel(&self.unit);
            self.program.status |= status;
            self.program
                .flags
                .remove(CommandFlags::DATA_CHAIN | CommandFlags::COMMAND_CHAIN);
            return self.end_program_now();
        }
        if status.contains(StatusFlags::CHANNEL_END) {
            return self.channel_end_step(status);
        }
        self.program.status |= status;
        if !self.completions.is_scheduled(&self.unit) {
            event!(
                Level::WARN,
                "device {} did not end {} and has no completion scheduled",
                device.name(),
                command
            );
        }
        EndStep::Waiting
    }

    fn is_short_transfer(&self) -> bool {
        match self.program.command {
            Some(command) if command.is_data_transfer() => {
                (self.program.count != 0 || self.program.flags.contains(CommandFlags::DATA_CHAIN))
                    && !self.program.flags.contains(CommandFlags::SUPPRESS_LENGTH)
            }
            _ => false,
        }
    }

    /// The channel-end procedure.
    pub(crate) fn channel_end_step(&mut self, extra: StatusFlags) -> EndStep {
        let first_channel_end = self.program.state != TransferState::ChannelEndPending;
        self.program.status |= extra | StatusFlags::CHANNEL_END;
        if first_channel_end && self.is_short_transfer() {
            if !self.program.status.contains(StatusFlags::PROGRAM_CHECK) {
                self.program.status |= StatusFlags::INCORRECT_LENGTH;
            }
            self.program
                .flags
                .remove(CommandFlags::DATA_CHAIN | CommandFlags::COMMAND_CHAIN);
        }
        if !self.program.status.contains(StatusFlags::DEVICE_END) {
            event!(Level::DEBUG, "unit {}: channel end without device end", self.unit);
            self.program.state = TransferState::ChannelEndPending;
            return EndStep::Waiting;
        }
        if self.program.flags.contains(CommandFlags::COMMAND_CHAIN)
            && !self.program.status.intersects(StatusFlags::CHAIN_ABORT)
        {
            event!(
                Level::TRACE,
                "unit {}: command chaining to {}",
                self.unit,
                self.program.list_address
            );
            self.program.status.remove(StatusFlags::ENDS);
            self.program.flags.remove(CommandFlags::DATA_CHAIN);
            self.program.state = TransferState::AwaitingNext;
            return EndStep::Resume;
        }
        self.finish_program()
    }

    /// End the program without the incorrect length check.
    fn end_program_now(&mut self) -> EndStep {
        self.program
            .flags
            .remove(CommandFlags::DATA_CHAIN | CommandFlags::COMMAND_CHAIN);
        self.program.status |= StatusFlags::ENDS;
        self.finish_program()
    }

    fn finish_program(&mut self) -> EndStep {
        self.program.state = TransferState::Done;
        let record = StatusRecord {
            sub: self.unit.sub,
            ending_address: self.program.list_address,
            flags: self.program.status,
            residual: self.program.count,
        };
        let outcome = if record.flags.intersects(StatusFlags::CHAIN_ABORT) {
            ProgramOutcome::Failed
        } else {
            ProgramOutcome::Completed
        };
        event!(
            Level::DEBUG,
            "unit {}: program ended with {:?} residual {}",
            self.unit,
            record.flags,
            record.residual
        );
        self.store_status(record);
        self.program.state = TransferState::Posted;
        match self.pending.as_mut().and_then(|q| q.dequeue()) {
            Some(next) => {
                event!(
                    Level::DEBUG,
                    "unit {}: starting queued program at {}",
                    self.unit,
                    next
                );
                self.program.begin(next, false);
                EndStep::Restart(outcome)
            }
            None => {
                self.program.clear();
                EndStep::Idle(outcome)
            }
        }
    }

    /// Queue a status record on the channel and raise its interrupt
    /// level.
    pub(crate) fn store_status(&mut self, record: StatusRecord) {
        match self.fifo.store(record) {
            Ok(()) => {
                if let Some(level) = self.level {
                    self.levels.request(level);
                }
            }
            Err(e) => {
                event!(
                    Level::ERROR,
                    "{}: status {:?} of unit {} dropped",
                    e,
                    record.flags,
                    self.unit
                );
            }
        }
    }

    /// A device (or a deferred completion) presents ending status.
    pub(crate) fn signal_channel_end(
        &mut self,
        device: &mut dyn Device,
        flags: StatusFlags,
    ) -> ProgramOutcome {
        if !self.program.is_in_flight() {
            event!(
                Level::WARN,
                "unit {}: ending status {:?} with no program running",
                self.unit,
                flags
            );
            return ProgramOutcome::Completed;
        }
        match self.channel_end_step(flags) {
            EndStep::Waiting => ProgramOutcome::Running,
            EndStep::Resume => self.execute_descriptor_list(device, true),
            EndStep::Restart(outcome) => {
                self.prepare_queued_program(device);
                self.execute_descriptor_list(device, false);
                outcome
            }
            EndStep::Idle(outcome) => outcome,
        }
    }

    /// If the channel has status queued, try to post it.  This is the
    /// one test every XIO handler uses to decide whether to report
    /// queued status instead of doing what it was asked.
    pub(crate) fn deliver_queued_status(&mut self) -> Option<XioOutcome> {
        if self.fifo.is_empty() {
            return None;
        }
        match post_status(self.fifo, self.status_buffer, self.mem, StatusFlags::empty()) {
            Some(record) => {
                event!(
                    Level::DEBUG,
                    "posted queued status of unit {} for channel {}",
                    record.sub,
                    self.unit.channel
                );
                Some(XioOutcome::StatusStored)
            }
            None => Some(XioOutcome::Busy),
        }
    }
}
