//! The prelude exports the structs which describe the channel's view
//! of guest memory: addresses, descriptors, status records and
//! condition codes.  Providing this prelude is the main purpose of
//! the base crate.
pub use super::condition::*;
pub use super::iocd::*;
pub use super::status::*;
pub use super::types::*;
