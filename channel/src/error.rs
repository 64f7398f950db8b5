//! Errors reported by the channel table and the engine.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use base::prelude::*;

use super::memory::MemoryOpFailure;

/// Why an XIO (or a configuration call) could not find the unit it
/// names.  XIO instructions report all of these to the program as
/// `DeviceAbsent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    NoRoute(LogicalChannel),
    NoChannel(ChannelNumber),
    NoUnit(UnitAddress),
    Disabled(UnitAddress),
    NoLevel(InterruptLevel),
}

impl Display for LookupFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            LookupFailure::NoRoute(logical) => {
                write!(f, "logical channel {logical} is not routed to a channel")
            }
            LookupFailure::NoChannel(ch) => write!(f, "channel {ch} is not configured"),
            LookupFailure::NoUnit(unit) => write!(f, "no unit is attached at {unit}"),
            LookupFailure::Disabled(unit) => write!(f, "unit {unit} is disabled"),
            LookupFailure::NoLevel(level) => {
                write!(f, "interrupt level {level} is not configured")
            }
        }
    }
}

impl Error for LookupFailure {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    DuplicateChannel(ChannelNumber),
    DuplicateUnit(UnitAddress),
    DuplicateLevel(InterruptLevel),
    UnknownChannel(ChannelNumber),
    UnknownLevel(InterruptLevel),
    ZeroCapacity(String),
    BadStatusBuffer { base: Address, length: u16 },
    MemoryTooLarge(usize),
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ConfigurationError::DuplicateChannel(ch) => {
                write!(f, "channel {ch} is already configured")
            }
            ConfigurationError::DuplicateUnit(unit) => {
                write!(f, "a unit is already attached at {unit}")
            }
            ConfigurationError::DuplicateLevel(level) => {
                write!(f, "interrupt level {level} is already assigned")
            }
            ConfigurationError::UnknownChannel(ch) => {
                write!(f, "channel {ch} is not configured")
            }
            ConfigurationError::UnknownLevel(level) => {
                write!(f, "interrupt level {level} is not configured")
            }
            ConfigurationError::ZeroCapacity(what) => {
                write!(f, "{what} must have a capacity of at least one entry")
            }
            ConfigurationError::BadStatusBuffer { base, length } => write!(
                f,
                "status buffer at {base} of length {length} is not a doubleword-aligned run of whole slots"
            ),
            ConfigurationError::MemoryTooLarge(size) => {
                write!(f, "{size} bytes of memory cannot be addressed with 24 bits")
            }
        }
    }
}

impl Error for ConfigurationError {}

/// The reasons the engine stops a channel program with Program Check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramCheck {
    MisalignedList(Address),
    ListFetch(MemoryOpFailure),
    /// TIC not permitted here (first descriptor, TIC after TIC, or
    /// TIC while the caller disallows it).
    IllegalTransferInList(Address),
    ReservedBits { at: Address, bits: u16 },
    /// Data chaining requested on a command which does not move data.
    IllegalDataChain(Command),
    InvalidCommand(Command),
    /// The device needs an INCH before anything else.
    InitializationRequired(Command),
    BadStatusBuffer { base: Address, length: u16 },
}

impl Display for ProgramCheck {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ProgramCheck::MisalignedList(addr) => {
                write!(f, "descriptor list address {addr} is not doubleword aligned")
            }
            ProgramCheck::ListFetch(e) => write!(f, "failed to fetch descriptor: {e}"),
            ProgramCheck::IllegalTransferInList(addr) => {
                write!(f, "transfer in channel at {addr} is not permitted")
            }
            ProgramCheck::ReservedBits { at, bits } => {
                write!(f, "descriptor at {at} has reserved flag bits {bits:04X} set")
            }
            ProgramCheck::IllegalDataChain(cmd) => {
                write!(f, "command {cmd} cannot be data chained")
            }
            ProgramCheck::InvalidCommand(cmd) => write!(f, "command {cmd} is invalid"),
            ProgramCheck::InitializationRequired(cmd) => {
                write!(f, "command {cmd} was issued before the channel was initialized")
            }
            ProgramCheck::BadStatusBuffer { base, length } => {
                write!(f, "INCH buffer at {base} of length {length} is unusable")
            }
        }
    }
}

impl Error for ProgramCheck {}

/// A bounded queue rejected an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOverflow {
    StatusFifo(ChannelNumber),
    PendingStart(UnitAddress),
}

impl Display for QueueOverflow {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            QueueOverflow::StatusFifo(ch) => write!(f, "status FIFO of channel {ch} is full"),
            QueueOverflow::PendingStart(unit) => {
                write!(f, "pending-start queue of unit {unit} is full")
            }
        }
    }
}

impl Error for QueueOverflow {}
