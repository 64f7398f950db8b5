//! Input/Output Command Descriptors (IOCDs).
//!
//! A channel program is a list of IOCDs in guest memory.  Each IOCD
//! occupies two consecutive big-endian 32-bit words:
//!
//! | Word | Bits 31-24   | Bits 23-16 | Bits 15-0       |
//! | ---- | ------------ | ---------- | --------------- |
//! | 1    | Command code | Data address (24 bits)       ||
//! | 2    | Flags (16 bits)          || Byte count      |
//!
//! The low 11 bits of the flags field are reserved and must be zero.
use std::fmt::{self, Debug, Display, Formatter};

use bitflags::bitflags;
use serde::Serialize;

#[cfg(test)]
use test_strategy::{proptest, Arbitrary};

use super::types::Address;

/// The size in bytes of one descriptor.
pub const IOCD_SIZE: u32 = 8;

/// Descriptor lists (and the targets of TIC commands) must be
/// doubleword aligned.
pub const IOCD_ALIGNMENT: u32 = 8;

bitflags! {
    /// Chaining and control flags from word 2 of a descriptor.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
    pub struct CommandFlags: u16 {
        /// The next descriptor continues this command's data.
        const DATA_CHAIN = 0x8000;
        /// The next descriptor holds a new command which is started
        /// when this one ends.
        const COMMAND_CHAIN = 0x4000;
        /// Don't report a byte count mismatch as incorrect length.
        const SUPPRESS_LENGTH = 0x2000;
        /// Move data through the channel but don't store it.
        const SKIP = 0x1000;
        /// Store an intermediate status when this descriptor is fetched.
        const PCI = 0x0800;
    }
}

/// Bits of the flags field which must be zero.
pub const RESERVED_FLAG_BITS: u16 = 0x07FF;

/// The broad class of a command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommandKind {
    /// INCH: set up the channel's status buffer.
    InitializeChannel,
    Write,
    Read,
    ReadBackward,
    Control,
    Sense,
    /// TIC: continue the list at another address.
    TransferInChannel,
    Invalid,
}

/// An 8-bit command code.  The low-order bits select the kind of
/// command; the high-order bits are modifiers interpreted by the
/// device.
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Command(pub u8);

impl Command {
    pub const INCH: Command = Command(0x00);
    pub const WRITE: Command = Command(0x01);
    pub const READ: Command = Command(0x02);
    pub const NOP: Command = Command(0x03);
    pub const SENSE: Command = Command(0x04);
    pub const TIC: Command = Command(0x08);
    pub const READ_BACKWARD: Command = Command(0x0C);

    #[must_use]
    pub fn kind(self) -> CommandKind {
        match self.0 {
            0x00 => CommandKind::InitializeChannel,
            code => match code & 0x0F {
                0x08 => CommandKind::TransferInChannel,
                0x0C => CommandKind::ReadBackward,
                0x04 => CommandKind::Sense,
                0x00 => CommandKind::Invalid,
                _ => match code & 0x03 {
                    0x01 => CommandKind::Write,
                    0x02 => CommandKind::Read,
                    _ => CommandKind::Control,
                },
            },
        }
    }

    /// Data-transfer commands move bytes between memory and the
    /// device, and so are the only ones which may be data chained.
    #[must_use]
    pub fn is_data_transfer(self) -> bool {
        matches!(
            self.kind(),
            CommandKind::Write | CommandKind::Read | CommandKind::ReadBackward | CommandKind::Sense
        )
    }

    /// Input commands store into guest memory.
    #[must_use]
    pub fn is_input(self) -> bool {
        matches!(
            self.kind(),
            CommandKind::Read | CommandKind::ReadBackward | CommandKind::Sense
        )
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let name = match self.kind() {
            CommandKind::InitializeChannel => "INCH",
            CommandKind::Write => "WRITE",
            CommandKind::Read => "READ",
            CommandKind::ReadBackward => "RDBWD",
            CommandKind::Control => "CNTL",
            CommandKind::Sense => "SENSE",
            CommandKind::TransferInChannel => "TIC",
            CommandKind::Invalid => "INVALID",
        };
        write!(f, "{name}({:02X})", self.0)
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        Display::fmt(self, f)
    }
}

/// A decoded descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iocd {
    pub command: Command,
    pub address: Address,
    pub flags: CommandFlags,
    /// Whatever was in the reserved bits of the flags field.
    pub reserved: u16,
    pub count: u16,
}

impl Iocd {
    #[must_use]
    pub fn new(command: Command, address: Address, flags: CommandFlags, count: u16) -> Iocd {
        Iocd {
            command,
            address,
            flags,
            reserved: 0,
            count,
        }
    }

    #[must_use]
    pub fn from_words(word1: u32, word2: u32) -> Iocd {
        let flag_bits = (word2 >> 16) as u16;
        Iocd {
            command: Command((word1 >> 24) as u8),
            address: Address::from_low_bits(word1),
            flags: CommandFlags::from_bits_truncate(flag_bits),
            reserved: flag_bits & RESERVED_FLAG_BITS,
            count: (word2 & 0xFFFF) as u16,
        }
    }

    #[must_use]
    pub fn to_words(&self) -> [u32; 2] {
        let flag_bits = self.flags.bits() | (self.reserved & RESERVED_FLAG_BITS);
        [
            (u32::from(self.command.0) << 24) | self.address.value(),
            (u32::from(flag_bits) << 16) | u32::from(self.count),
        ]
    }

    /// Big-endian byte image, as the descriptor appears in memory.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        let [w1, w2] = self.to_words();
        let mut result = [0_u8; 8];
        result[0..4].copy_from_slice(&w1.to_be_bytes());
        result[4..8].copy_from_slice(&w2.to_be_bytes());
        result
    }
}

#[test]
fn test_command_kinds() {
    assert_eq!(Command::INCH.kind(), CommandKind::InitializeChannel);
    assert_eq!(Command::WRITE.kind(), CommandKind::Write);
    assert_eq!(Command(0x81).kind(), CommandKind::Write);
    assert_eq!(Command::READ.kind(), CommandKind::Read);
    assert_eq!(Command::NOP.kind(), CommandKind::Control);
    assert_eq!(Command(0x07).kind(), CommandKind::Control);
    assert_eq!(Command::SENSE.kind(), CommandKind::Sense);
    assert_eq!(Command::TIC.kind(), CommandKind::TransferInChannel);
    assert_eq!(Command(0x18).kind(), CommandKind::TransferInChannel);
    assert_eq!(Command::READ_BACKWARD.kind(), CommandKind::ReadBackward);
    assert_eq!(Command(0x10).kind(), CommandKind::Invalid);

    assert!(Command::READ.is_input());
    assert!(!Command::WRITE.is_input());
    assert!(Command::WRITE.is_data_transfer());
    assert!(!Command::NOP.is_data_transfer());
    assert!(!Command::TIC.is_data_transfer());
}

#[test]
fn test_decode_descriptor_words() {
    let iocd = Iocd::from_words(0x0200_1000, 0xC000_0100);
    assert_eq!(iocd.command, Command::READ);
    assert_eq!(iocd.address, Address::from_low_bits(0x1000));
    assert_eq!(
        iocd.flags,
        CommandFlags::DATA_CHAIN | CommandFlags::COMMAND_CHAIN
    );
    assert_eq!(iocd.reserved, 0);
    assert_eq!(iocd.count, 0x100);

    // Reserved bits survive decoding so that the channel can reject them.
    let bad = Iocd::from_words(0x0300_0000, 0x0001_0001);
    assert_eq!(bad.reserved, 0x0001);
    assert!(bad.flags.is_empty());
}

#[cfg(test)]
#[proptest]
fn descriptor_words_are_reversible(
    command: Command,
    address: Address,
    #[strategy(0..=0xF800_u16)] flag_bits: u16,
    count: u16,
) {
    let iocd = Iocd::new(
        command,
        address,
        CommandFlags::from_bits_truncate(flag_bits),
        count,
    );
    let [w1, w2] = iocd.to_words();
    assert_eq!(Iocd::from_words(w1, w2), iocd);
}
