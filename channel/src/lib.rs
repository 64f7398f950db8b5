//! This crate emulates a channel I/O subsystem: channel programs in
//! guest memory are interpreted against device models, and their
//! completion status is delivered to the program through per-channel
//! status FIFOs and prioritised interrupt levels.
#![crate_name = "channel"]

mod context;
mod engine;
mod error;
mod fifo;
mod inch;
mod interrupt;
mod io;
mod memory;
mod pending;
mod program;
mod table;
mod xio;

#[cfg(test)]
mod tests;

pub use context::Context;
pub use error::{ConfigurationError, LookupFailure, ProgramCheck, QueueOverflow};
pub use interrupt::{InterruptContext, LevelOwner, LevelState};
pub use io::{
    Completion, DeferredCompletion, Device, Loopback, LoopbackConfiguration, PreCheck,
    ProgramOutcome, Subchannel, TransferEnd, SENSE_COMMAND_REJECT,
};
pub use memory::{MemoryConfiguration, MemoryOpFailure, MemoryUnit};
pub use program::TransferState;
pub use table::{ChannelConfiguration, ChannelTable};
pub use xio::{XioAddress, XioOp};
