//! The state of the channel program running on one unit.
use serde::Serialize;

use base::prelude::*;

/// Where a unit's channel program is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransferState {
    /// No program.
    Empty,
    /// A command has been given to the device and has not ended.
    Busy,
    /// Between chained commands.
    AwaitingNext,
    /// The device has presented channel end but not device end.
    ChannelEndPending,
    /// The program has ended and its status is being stored.
    Done,
    /// The status record is in the FIFO.
    Posted,
}

/// A channel program context.  There is one per unit, allocated when
/// the unit is attached.
#[derive(Debug)]
pub(crate) struct ChannelProgram {
    pub(crate) state: TransferState,
    /// Address of the next descriptor to fetch.
    pub(crate) list_address: Address,
    pub(crate) command: Option<Command>,
    pub(crate) flags: CommandFlags,
    pub(crate) count: u16,
    pub(crate) data_address: Address,
    pub(crate) status: StatusFlags,
    /// Descriptors fetched since the program started.
    pub(crate) fetched: u32,
    pub(crate) previous_was_tic: bool,
    /// The device insists that the first command is INCH.
    pub(crate) awaiting_init: bool,
    /// The engine gave up the processor between chained commands and
    /// its scheduled completion resumes the list.
    pub(crate) resume_pending: bool,
}

impl Default for ChannelProgram {
    fn default() -> ChannelProgram {
        ChannelProgram {
            state: TransferState::Empty,
            list_address: Address::ZERO,
            command: None,
            flags: CommandFlags::empty(),
            count: 0,
            data_address: Address::ZERO,
            status: StatusFlags::empty(),
            fetched: 0,
            previous_was_tic: false,
            awaiting_init: false,
            resume_pending: false,
        }
    }
}

impl ChannelProgram {
    /// Prepare to run the descriptor list at `list_address`.
    pub(crate) fn begin(&mut self, list_address: Address, awaiting_init: bool) {
        *self = ChannelProgram {
            state: TransferState::AwaitingNext,
            list_address,
            awaiting_init,
            ..ChannelProgram::default()
        };
    }

    pub(crate) fn clear(&mut self) {
        *self = ChannelProgram::default();
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.state != TransferState::Empty
    }

    pub(crate) fn state(&self) -> TransferState {
        self.state
    }

    /// True when the command (if any) continues into the next
    /// descriptor.
    pub(crate) fn is_data_chaining(&self) -> bool {
        self.command.is_some() && self.flags.contains(CommandFlags::DATA_CHAIN)
    }
}

#[test]
fn test_begin_resets_everything_but_the_list() {
    let mut program = ChannelProgram {
        state: TransferState::Posted,
        command: Some(Command::READ),
        flags: CommandFlags::DATA_CHAIN,
        count: 17,
        status: StatusFlags::UNIT_CHECK,
        fetched: 3,
        resume_pending: true,
        ..ChannelProgram::default()
    };
    assert!(program.is_data_chaining());
    program.begin(Address::from_low_bits(0x400), true);
    assert_eq!(program.state(), TransferState::AwaitingNext);
    assert_eq!(program.list_address, Address::from_low_bits(0x400));
    assert!(program.awaiting_init);
    assert!(program.is_in_flight());
    assert!(!program.is_data_chaining());
    assert_eq!(program.count, 0);
    assert!(program.status.is_empty());
    assert!(!program.resume_pending);
    program.clear();
    assert!(!program.is_in_flight());
}
