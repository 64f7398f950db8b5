//! Addresses and the identifiers used to name channels, units and
//! interrupt levels.
//!
//! Guest memory is byte-addressed with 24-bit addresses.  A channel
//! multiplexes up to 256 sub-addresses (units); a unit is identified
//! by the pair of its channel and sub-address, which is conventionally
//! written as four hex digits (e.g. `2001` for sub-address 01 on
//! channel 20).
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};

use serde::Serialize;

#[cfg(test)]
use test_strategy::Arbitrary;

/// The significant bits of a guest memory address.
pub const ADDRESS_MASK: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressOutOfRange(pub u32);

impl Display for AddressOutOfRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "value {:#X} is too large to be a 24-bit address", self.0)
    }
}

impl Error for AddressOutOfRange {}

/// A 24-bit guest memory address.
///
/// Address arithmetic wraps within the 24-bit address space, which
/// is what the channel does when a data address is incremented past
/// the top of memory (the memory unit will then refuse the access,
/// so the wrap itself is never observable as a successful transfer).
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Address(#[cfg_attr(test, strategy(0..=ADDRESS_MASK))] u32);

impl Address {
    pub const ZERO: Address = Address(0);
    pub const MAX: Address = Address(ADDRESS_MASK);

    /// Compile-time checked constructor; see the `addr!` macro.
    #[must_use]
    pub const fn new<const N: u32>() -> Address {
        assert!(N <= ADDRESS_MASK);
        Address(N)
    }

    /// Build an address from the low 24 bits of `value`, ignoring
    /// the rest.  This is how the address field of a descriptor word
    /// is extracted.
    #[must_use]
    pub const fn from_low_bits(value: u32) -> Address {
        Address(value & ADDRESS_MASK)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn wrapping_add(self, delta: u32) -> Address {
        Address(self.0.wrapping_add(delta) & ADDRESS_MASK)
    }

    #[must_use]
    pub const fn wrapping_sub(self, delta: u32) -> Address {
        Address(self.0.wrapping_sub(delta) & ADDRESS_MASK)
    }

    /// Returns true if the address is a multiple of `alignment`
    /// (which must be a power of two).
    #[must_use]
    pub const fn is_aligned(self, alignment: u32) -> bool {
        self.0 & (alignment - 1) == 0
    }
}

impl TryFrom<u32> for Address {
    type Error = AddressOutOfRange;
    fn try_from(value: u32) -> Result<Address, AddressOutOfRange> {
        if value > ADDRESS_MASK {
            Err(AddressOutOfRange(value))
        } else {
            Ok(Address(value))
        }
    }
}

impl From<Address> for u32 {
    fn from(a: Address) -> u32 {
        a.0
    }
}

impl From<Address> for usize {
    fn from(a: Address) -> usize {
        // Addresses are 24 bits, so this cannot truncate on any
        // platform with at least 32-bit pointers.
        a.0 as usize
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:06X}", self.0)
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "Address({:06X})", self.0)
    }
}

macro_rules! byte_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        pub struct $name(pub u8);

        impl From<u8> for $name {
            fn from(n: u8) -> $name {
                $name(n)
            }
        }

        impl From<$name> for u8 {
            fn from(n: $name) -> u8 {
                n.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
                write!(f, "{:02X}", self.0)
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
                write!(f, "{}({:02X})", stringify!($name), self.0)
            }
        }
    };
}

byte_identifier!(
    /// Identifies a real (physical) channel.
    ChannelNumber
);
byte_identifier!(
    /// Identifies a unit within a channel.
    SubAddress
);
byte_identifier!(
    /// The channel number used by a program in an XIO instruction.
    /// This is mapped to a [`ChannelNumber`] by the routing table.
    LogicalChannel
);
byte_identifier!(
    /// An interrupt priority level.  Lower numbers have higher
    /// priority.
    InterruptLevel
);

/// The full address of a unit: a channel and a sub-address on it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UnitAddress {
    pub channel: ChannelNumber,
    pub sub: SubAddress,
}

impl UnitAddress {
    #[must_use]
    pub const fn new(channel: u8, sub: u8) -> UnitAddress {
        UnitAddress {
            channel: ChannelNumber(channel),
            sub: SubAddress(sub),
        }
    }
}

impl Display for UnitAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}{}", self.channel, self.sub)
    }
}

impl Debug for UnitAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "UnitAddress({self})")
    }
}

#[test]
fn test_address_range() {
    assert!(Address::try_from(ADDRESS_MASK).is_ok());
    assert_eq!(
        Address::try_from(ADDRESS_MASK + 1),
        Err(AddressOutOfRange(0x0100_0000))
    );
    assert_eq!(Address::from_low_bits(0xAB12_3456).value(), 0x12_3456);
}

#[test]
fn test_address_arithmetic_wraps() {
    assert_eq!(Address::MAX.wrapping_add(1), Address::ZERO);
    assert_eq!(Address::ZERO.wrapping_sub(1), Address::MAX);
    assert!(Address::from_low_bits(0x1008).is_aligned(8));
    assert!(!Address::from_low_bits(0x1004).is_aligned(8));
}

#[test]
fn test_unit_address_display() {
    assert_eq!(UnitAddress::new(0x20, 0x01).to_string(), "2001");
    assert_eq!(
        format!("{:?}", UnitAddress::new(0x7f, 0x0a)),
        "UnitAddress(7F0A)"
    );
}
