//! Guest main memory, as seen by the channels.
//!
//! Memory is byte addressed with 24-bit addresses and stores words in
//! big-endian order.  Only the first `size_bytes` bytes exist; any
//! access beyond them fails with [`MemoryOpFailure::NotMapped`].
//! Word accesses must be 4-byte aligned.
use std::error;
use std::fmt::{self, Debug, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

use super::error::ConfigurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOpFailure {
    NotMapped(Address),
    Misaligned(Address),
}

impl Display for MemoryOpFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            MemoryOpFailure::NotMapped(addr) => {
                write!(f, "address {addr} is not mapped to functioning memory")
            }
            MemoryOpFailure::Misaligned(addr) => {
                write!(f, "address {addr} is not word aligned")
            }
        }
    }
}

impl error::Error for MemoryOpFailure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfiguration {
    pub size_bytes: usize,
}

impl Default for MemoryConfiguration {
    fn default() -> MemoryConfiguration {
        MemoryConfiguration {
            size_bytes: 64 * 1024,
        }
    }
}

pub struct MemoryUnit {
    bytes: Vec<u8>,
}

impl Debug for MemoryUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("MemoryUnit")
            .field("size", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl MemoryUnit {
    /// Create a zero-filled memory.
    ///
    /// # Errors
    ///
    /// `ConfigurationError::MemoryTooLarge` when the configured size
    /// cannot be addressed with 24 bits.
    pub fn new(config: &MemoryConfiguration) -> Result<MemoryUnit, ConfigurationError> {
        let limit = usize::from(Address::MAX) + 1;
        if config.size_bytes > limit {
            return Err(ConfigurationError::MemoryTooLarge(config.size_bytes));
        }
        event!(
            Level::INFO,
            "configuring {} bytes of guest memory",
            config.size_bytes
        );
        Ok(MemoryUnit {
            bytes: vec![0; config.size_bytes],
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn range(&self, addr: Address, len: usize) -> Result<std::ops::Range<usize>, MemoryOpFailure> {
        let start = usize::from(addr);
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(MemoryOpFailure::NotMapped(addr)),
        }
    }

    /// # Errors
    ///
    /// `NotMapped` when `addr` is beyond the end of memory.
    pub fn fetch_byte(&self, addr: Address) -> Result<u8, MemoryOpFailure> {
        self.bytes
            .get(usize::from(addr))
            .copied()
            .ok_or(MemoryOpFailure::NotMapped(addr))
    }

    /// # Errors
    ///
    /// `NotMapped` when `addr` is beyond the end of memory.
    pub fn store_byte(&mut self, addr: Address, value: u8) -> Result<(), MemoryOpFailure> {
        match self.bytes.get_mut(usize::from(addr)) {
            Some(b) => {
                *b = value;
                Ok(())
            }
            None => Err(MemoryOpFailure::NotMapped(addr)),
        }
    }

    /// # Errors
    ///
    /// `Misaligned` when `addr` is not a multiple of 4, `NotMapped`
    /// when any byte of the word is beyond the end of memory.
    pub fn fetch_word(&self, addr: Address) -> Result<u32, MemoryOpFailure> {
        if !addr.is_aligned(4) {
            return Err(MemoryOpFailure::Misaligned(addr));
        }
        let r = self.range(addr, 4)?;
        let mut word = [0_u8; 4];
        word.copy_from_slice(&self.bytes[r]);
        Ok(u32::from_be_bytes(word))
    }

    /// # Errors
    ///
    /// As for [`MemoryUnit::fetch_word`].
    pub fn store_word(&mut self, addr: Address, value: u32) -> Result<(), MemoryOpFailure> {
        if !addr.is_aligned(4) {
            return Err(MemoryOpFailure::Misaligned(addr));
        }
        let r = self.range(addr, 4)?;
        self.bytes[r].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Copy `data` into memory starting at `addr`.
    ///
    /// # Errors
    ///
    /// `NotMapped` if the data would not fit; memory is unchanged.
    pub fn load(&mut self, addr: Address, data: &[u8]) -> Result<(), MemoryOpFailure> {
        let r = self.range(addr, data.len())?;
        self.bytes[r].copy_from_slice(data);
        Ok(())
    }

    /// Store a descriptor list starting at `addr`.
    ///
    /// # Errors
    ///
    /// `NotMapped` if the list would not fit.
    pub fn load_descriptors(&mut self, addr: Address, list: &[Iocd]) -> Result<(), MemoryOpFailure> {
        let image: Vec<u8> = list.iter().flat_map(Iocd::to_bytes).collect();
        self.load(addr, &image)
    }

    /// Borrow `len` bytes of memory starting at `addr`.
    ///
    /// # Errors
    ///
    /// `NotMapped` if the range extends beyond the end of memory.
    pub fn dump(&self, addr: Address, len: usize) -> Result<&[u8], MemoryOpFailure> {
        let r = self.range(addr, len)?;
        Ok(&self.bytes[r])
    }
}

#[cfg(test)]
fn small_memory() -> MemoryUnit {
    MemoryUnit::new(&MemoryConfiguration { size_bytes: 64 }).expect("small memory should be valid")
}

#[test]
fn test_words_are_big_endian() {
    let mut mem = small_memory();
    let a = Address::from_low_bits(8);
    assert_eq!(mem.store_word(a, 0x0102_0304), Ok(()));
    assert_eq!(mem.fetch_byte(a), Ok(0x01));
    assert_eq!(mem.fetch_byte(a.wrapping_add(3)), Ok(0x04));
    assert_eq!(mem.fetch_word(a), Ok(0x0102_0304));
}

#[test]
fn test_word_alignment() {
    let mut mem = small_memory();
    let a = Address::from_low_bits(6);
    assert_eq!(mem.fetch_word(a), Err(MemoryOpFailure::Misaligned(a)));
    assert_eq!(mem.store_word(a, 0), Err(MemoryOpFailure::Misaligned(a)));
}

#[test]
fn test_bounds() {
    let mut mem = small_memory();
    let last = Address::from_low_bits(63);
    let beyond = Address::from_low_bits(64);
    assert_eq!(mem.store_byte(last, 9), Ok(()));
    assert_eq!(mem.fetch_byte(beyond), Err(MemoryOpFailure::NotMapped(beyond)));
    assert_eq!(
        mem.fetch_word(Address::from_low_bits(64)),
        Err(MemoryOpFailure::NotMapped(beyond))
    );
    assert!(mem.load(Address::from_low_bits(60), &[0; 5]).is_err());
    assert_eq!(mem.dump(last, 1), Ok(&[9_u8][..]));
}

#[test]
fn test_too_large() {
    let config = MemoryConfiguration {
        size_bytes: 1 << 25,
    };
    assert!(matches!(
        MemoryUnit::new(&config),
        Err(ConfigurationError::MemoryTooLarge(_))
    ));
}

#[test]
fn test_load_descriptors() {
    let mut mem = small_memory();
    let list = [Iocd::new(
        Command::WRITE,
        Address::from_low_bits(0x20),
        CommandFlags::COMMAND_CHAIN,
        16,
    )];
    assert_eq!(mem.load_descriptors(Address::ZERO, &list), Ok(()));
    assert_eq!(mem.fetch_word(Address::ZERO), Ok(0x0100_0020));
    assert_eq!(mem.fetch_word(Address::from_low_bits(4)), Ok(0x4000_0010));
}
