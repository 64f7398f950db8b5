//! This module manages the context in which the emulator is performing
//! a single operation.
//!
//! The emulator is most concerned with keeping track of how much time
//! would have elapsed for the machine it is emulating.  This allows us
//! to know, for example, when a device would have finished the command
//! it was given.  The caller decides how simulated time relates to
//! real time.
use core::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub simulated_time: Duration,
}

impl Context {
    #[must_use]
    pub fn new(simulated_time: Duration) -> Context {
        Context { simulated_time }
    }

    /// The context for a later point in simulated time.
    #[must_use]
    pub fn advanced_by(&self, interval: Duration) -> Context {
        Context {
            simulated_time: self.simulated_time + interval,
        }
    }
}
