//! Status records, which is how the channel tells the program that
//! a channel program has finished (or has reached a point the program
//! asked to hear about).
//!
//! In guest memory a status record occupies a doubleword in the
//! channel's status buffer:
//!
//! | Word | Bits 31-24  | Bits 23-16 | Bits 15-0       |
//! | ---- | ----------- | ---------- | --------------- |
//! | 1    | Sub-address | Ending descriptor address    ||
//! | 2    | Status flags (16 bits)   || Residual count  |
use bitflags::bitflags;
use serde::Serialize;

use super::types::{Address, SubAddress};

bitflags! {
    /// Status bits accumulated by a channel program and reported in
    /// its status record.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
    pub struct StatusFlags: u16 {
        /// Acknowledges a Halt or Stop.
        const ECHO = 0x8000;
        /// Program-controlled interrupt.
        const PCI = 0x4000;
        const INCORRECT_LENGTH = 0x2000;
        const PROGRAM_CHECK = 0x1000;
        const CHANNEL_DATA_CHECK = 0x0800;
        const CHANNEL_CONTROL_CHECK = 0x0400;
        const INTERFACE_CHECK = 0x0200;
        const CHAINING_CHECK = 0x0100;
        const BUSY = 0x0080;
        const STATUS_MODIFIER = 0x0040;
        const CONTROL_UNIT_END = 0x0020;
        const ATTENTION = 0x0010;
        const CHANNEL_END = 0x0008;
        const DEVICE_END = 0x0004;
        const UNIT_CHECK = 0x0002;
        const UNIT_EXCEPTION = 0x0001;
    }
}

impl StatusFlags {
    /// Both ends of a command.
    pub const ENDS: StatusFlags = StatusFlags::CHANNEL_END.union(StatusFlags::DEVICE_END);

    /// Conditions which end the program at once when a device reports
    /// them in response to a command being started.
    pub const IMMEDIATE_END: StatusFlags = StatusFlags::ATTENTION
        .union(StatusFlags::UNIT_CHECK)
        .union(StatusFlags::UNIT_EXCEPTION)
        .union(StatusFlags::PROGRAM_CHECK);

    /// Conditions which prevent command chaining.
    pub const CHAIN_ABORT: StatusFlags = StatusFlags::IMMEDIATE_END
        .union(StatusFlags::INCORRECT_LENGTH)
        .union(StatusFlags::CHANNEL_DATA_CHECK)
        .union(StatusFlags::CHANNEL_CONTROL_CHECK)
        .union(StatusFlags::INTERFACE_CHECK)
        .union(StatusFlags::CHAINING_CHECK);
}

/// The size in bytes of a status record in the status buffer.
pub const STATUS_RECORD_SIZE: u32 = 8;

/// One completed (or PCI) status, as queued in a channel's status
/// FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    pub sub: SubAddress,
    /// The list address following the last descriptor the channel
    /// fetched.
    pub ending_address: Address,
    pub flags: StatusFlags,
    /// Bytes not transferred by the last command.
    pub residual: u16,
}

impl StatusRecord {
    /// Encode the record as it is stored in the status buffer, with
    /// the flags in `suppress` masked out.
    #[must_use]
    pub fn to_words(&self, suppress: StatusFlags) -> [u32; 2] {
        let flags = self.flags.difference(suppress);
        [
            (u32::from(self.sub.0) << 24) | self.ending_address.value(),
            (u32::from(flags.bits()) << 16) | u32::from(self.residual),
        ]
    }

    #[must_use]
    pub fn from_words(words: [u32; 2]) -> StatusRecord {
        let [w1, w2] = words;
        StatusRecord {
            sub: SubAddress((w1 >> 24) as u8),
            ending_address: Address::from_low_bits(w1),
            flags: StatusFlags::from_bits_retain((w2 >> 16) as u16),
            residual: (w2 & 0xFFFF) as u16,
        }
    }
}

#[test]
fn test_status_record_encoding() {
    let record = StatusRecord {
        sub: SubAddress(0x04),
        ending_address: Address::from_low_bits(0x00_2010),
        flags: StatusFlags::ENDS | StatusFlags::INCORRECT_LENGTH,
        residual: 0x38,
    };
    assert_eq!(record.to_words(StatusFlags::empty()), [0x0400_2010, 0x200C_0038]);
    assert_eq!(
        StatusRecord::from_words([0x0400_2010, 0x200C_0038]),
        record
    );
}

#[test]
fn test_status_suppression() {
    let record = StatusRecord {
        sub: SubAddress(0),
        ending_address: Address::ZERO,
        flags: StatusFlags::ENDS | StatusFlags::PCI,
        residual: 0,
    };
    let [_, w2] = record.to_words(StatusFlags::PCI);
    assert_eq!(w2 >> 16, u32::from(StatusFlags::ENDS.bits()));
}

#[test]
fn test_chain_abort_covers_immediate_end() {
    assert!(StatusFlags::CHAIN_ABORT.contains(StatusFlags::IMMEDIATE_END));
    assert!(!StatusFlags::CHAIN_ABORT.intersects(StatusFlags::ENDS));
}

#[test]
fn test_default_status_is_empty() {
    assert!(StatusFlags::default().is_empty());
    assert_eq!(StatusFlags::default(), StatusFlags::empty());
}
