//! Container types used by the channel emulation.
pub mod pq;
pub mod ring;
