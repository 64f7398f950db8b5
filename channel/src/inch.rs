//! The status buffer which an INCH command assigns to a channel, and
//! the posting of status records into it.
//!
//! The buffer is a run of doubleword slots in guest memory.  Records
//! are written into successive slots; after the last slot, posting
//! continues at the first.
use tracing::{event, Level};

use base::prelude::*;

use super::error::ProgramCheck;
use super::fifo::StatusFifo;
use super::memory::MemoryUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferRange {
    base: Address,
    /// Start of the last slot.
    high_water: Address,
    next: Address,
}

#[derive(Debug, Default)]
pub(crate) struct StatusBuffer {
    range: Option<BufferRange>,
}

impl StatusBuffer {
    /// Assign the buffer, which starts at `base` and is `length`
    /// bytes long.  A trailing partial slot is ignored.
    pub(crate) fn configure(&mut self, base: Address, length: u16) -> Result<(), ProgramCheck> {
        let slots = u32::from(length) / STATUS_RECORD_SIZE;
        if slots == 0 || !base.is_aligned(STATUS_RECORD_SIZE) {
            return Err(ProgramCheck::BadStatusBuffer { base, length });
        }
        let high_water = base.wrapping_add((slots - 1) * STATUS_RECORD_SIZE);
        event!(
            Level::DEBUG,
            "status buffer is {slots} slots from {base} to {high_water}"
        );
        self.range = Some(BufferRange {
            base,
            high_water,
            next: base,
        });
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_configured(&self) -> bool {
        self.range.is_some()
    }

    /// The address the next record will be written to.
    pub(crate) fn next_slot(&self) -> Option<Address> {
        self.range.map(|r| r.next)
    }

    fn advance(&mut self) {
        if let Some(r) = self.range.as_mut() {
            r.next = if r.next >= r.high_water {
                r.base
            } else {
                r.next.wrapping_add(STATUS_RECORD_SIZE)
            };
        }
    }
}

/// Move the record at the head of `fifo` into the next slot of
/// `buffer`, masking `suppress` out of its flags.  When the record
/// cannot be written it goes back to the head of the FIFO and `None`
/// is returned.
pub(crate) fn post_status(
    fifo: &mut StatusFifo,
    buffer: &mut StatusBuffer,
    mem: &mut MemoryUnit,
    suppress: StatusFlags,
) -> Option<StatusRecord> {
    let record = fifo.pop()?;
    let written = match buffer.next_slot() {
        None => {
            event!(
                Level::WARN,
                "cannot post status for unit {}: channel has no status buffer",
                record.sub
            );
            false
        }
        Some(slot) => {
            let [w1, w2] = record.to_words(suppress);
            match mem
                .store_word(slot, w1)
                .and_then(|()| mem.store_word(slot.wrapping_add(4), w2))
            {
                Ok(()) => {
                    event!(
                        Level::TRACE,
                        "posted status {:08X} {:08X} at {}",
                        w1,
                        w2,
                        slot
                    );
                    true
                }
                Err(e) => {
                    event!(Level::WARN, "cannot post status at {slot}: {e}");
                    false
                }
            }
        }
    };
    if written {
        buffer.advance();
        Some(record)
    } else {
        if let Err(e) = fifo.push_front(record) {
            event!(Level::ERROR, "status record {record:?} lost: {e}");
        }
        None
    }
}
