//! Interrupt levels.
//!
//! Each level is owned either by a channel (whose status FIFO it
//! reports) or by a simple source which has no status to post.  A
//! level is Idle, Requested or Active; only an enabled, Requested
//! level can be granted, and lower-numbered levels are granted first.
//! A granted level stays Active until the program returns from the
//! interrupt.
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use super::error::{ConfigurationError, LookupFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LevelState {
    Idle,
    Requested,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LevelOwner {
    Channel(ChannelNumber),
    Simple,
}

/// What the CPU receives when an interrupt is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterruptContext {
    pub level: InterruptLevel,
    /// Address of the level's interrupt context block.
    pub icb: Address,
    pub owner: LevelOwner,
    /// The status record posted for a channel level, if there was one.
    pub posted: Option<StatusRecord>,
}

#[derive(Debug)]
struct LevelEntry {
    owner: LevelOwner,
    icb: Address,
    enabled: bool,
    state: LevelState,
}

#[derive(Debug, Default)]
pub(crate) struct InterruptLevelTable {
    levels: BTreeMap<InterruptLevel, LevelEntry>,
    blocked: bool,
}

impl InterruptLevelTable {
    /// Levels start out disabled and idle.
    pub(crate) fn configure(
        &mut self,
        level: InterruptLevel,
        owner: LevelOwner,
        icb: Address,
    ) -> Result<(), ConfigurationError> {
        if self.levels.contains_key(&level) {
            return Err(ConfigurationError::DuplicateLevel(level));
        }
        event!(
            Level::INFO,
            "interrupt level {} owned by {:?} with context block at {}",
            level,
            owner,
            icb
        );
        self.levels.insert(
            level,
            LevelEntry {
                owner,
                icb,
                enabled: false,
                state: LevelState::Idle,
            },
        );
        Ok(())
    }

    fn entry_mut(&mut self, level: InterruptLevel) -> Result<&mut LevelEntry, LookupFailure> {
        self.levels
            .get_mut(&level)
            .ok_or(LookupFailure::NoLevel(level))
    }

    pub(crate) fn set_enabled(
        &mut self,
        level: InterruptLevel,
        enabled: bool,
    ) -> Result<(), LookupFailure> {
        let entry = self.entry_mut(level)?;
        event!(
            Level::DEBUG,
            "level {} {}",
            level,
            if enabled { "enabled" } else { "disabled" }
        );
        entry.enabled = enabled;
        Ok(())
    }

    pub(crate) fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Raise a request.  A request on an Active level is absorbed;
    /// the level is re-requested (if need be) when it is deactivated.
    pub(crate) fn request(&mut self, level: InterruptLevel) {
        match self.levels.get_mut(&level) {
            Some(entry) => {
                if entry.state == LevelState::Idle {
                    event!(Level::TRACE, "level {} requested", level);
                    entry.state = LevelState::Requested;
                }
            }
            None => {
                event!(Level::WARN, "request for unconfigured interrupt level {}", level);
            }
        }
    }

    /// Return an Active level to Idle.  Returns the level's owner.
    pub(crate) fn deactivate(&mut self, level: InterruptLevel) -> Result<LevelOwner, LookupFailure> {
        let entry = self.entry_mut(level)?;
        if entry.state == LevelState::Active {
            entry.state = LevelState::Idle;
        }
        Ok(entry.owner)
    }

    /// Force a level back to Idle, dropping any request.
    pub(crate) fn reset(&mut self, level: InterruptLevel) {
        if let Some(entry) = self.levels.get_mut(&level) {
            entry.state = LevelState::Idle;
        }
    }

    pub(crate) fn state(&self, level: InterruptLevel) -> Option<LevelState> {
        self.levels.get(&level).map(|entry| entry.state)
    }

    /// Find the highest-priority enabled level with a request, make
    /// it Active, and return it.
    pub(crate) fn claim_highest_requested(&mut self) -> Option<(InterruptLevel, LevelOwner, Address)> {
        if self.blocked {
            return None;
        }
        // BTreeMap iterates in ascending order, which is descending
        // priority.
        self.levels
            .iter_mut()
            .find(|(_, entry)| entry.enabled && entry.state == LevelState::Requested)
            .map(|(level, entry)| {
                event!(Level::DEBUG, "granting interrupt level {}", level);
                entry.state = LevelState::Active;
                (*level, entry.owner, entry.icb)
            })
    }
}

#[cfg(test)]
fn table_with(levels: &[(u8, bool)]) -> InterruptLevelTable {
    let mut table = InterruptLevelTable::default();
    for (level, enabled) in levels {
        let level = InterruptLevel(*level);
        assert!(table
            .configure(level, LevelOwner::Simple, Address::from_low_bits(0x100))
            .is_ok());
        assert!(table.set_enabled(level, *enabled).is_ok());
    }
    table
}

#[test]
fn test_lowest_number_wins() {
    let mut table = table_with(&[(3, true), (5, true), (7, true)]);
    table.request(InterruptLevel(7));
    table.request(InterruptLevel(5));
    assert_eq!(
        table.claim_highest_requested().map(|(level, _, _)| level),
        Some(InterruptLevel(5))
    );
    assert_eq!(table.state(InterruptLevel(5)), Some(LevelState::Active));
    assert_eq!(
        table.claim_highest_requested().map(|(level, _, _)| level),
        Some(InterruptLevel(7))
    );
    assert_eq!(table.claim_highest_requested(), None);
}

#[test]
fn test_disabled_and_blocked_levels_are_not_granted() {
    let mut table = table_with(&[(3, false), (5, true)]);
    table.request(InterruptLevel(3));
    table.set_blocked(true);
    table.request(InterruptLevel(5));
    assert_eq!(table.claim_highest_requested(), None);
    table.set_blocked(false);
    assert_eq!(
        table.claim_highest_requested().map(|(level, _, _)| level),
        Some(InterruptLevel(5))
    );
    assert_eq!(table.claim_highest_requested(), None);
    assert_eq!(table.state(InterruptLevel(3)), Some(LevelState::Requested));
}

#[test]
fn test_request_while_active_is_absorbed() {
    let mut table = table_with(&[(4, true)]);
    table.request(InterruptLevel(4));
    assert!(table.claim_highest_requested().is_some());
    table.request(InterruptLevel(4));
    assert_eq!(table.state(InterruptLevel(4)), Some(LevelState::Active));
    assert_eq!(table.deactivate(InterruptLevel(4)), Ok(LevelOwner::Simple));
    assert_eq!(table.state(InterruptLevel(4)), Some(LevelState::Idle));
    assert_eq!(
        table.deactivate(InterruptLevel(9)),
        Err(LookupFailure::NoLevel(InterruptLevel(9)))
    );
}

#[test]
fn test_duplicate_level() {
    let mut table = table_with(&[(1, true)]);
    assert_eq!(
        table.configure(InterruptLevel(1), LevelOwner::Simple, Address::ZERO),
        Err(ConfigurationError::DuplicateLevel(InterruptLevel(1)))
    );
}
