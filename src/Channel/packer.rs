//! Producer-side channel worker.
//!
//! Drains the shared intake queue and packs records into its channel's slot
//! in arrival order (next-fit, single pass). A cycle is handed to the
//! consumer as soon as free space drops below the reservation threshold, or
//! before placing a record that no longer fits. When the queue is finished
//! and empty the last cycle is released tagged terminal.

use tracing::{debug, trace, warn};

use super::codec::{serialize, serialized_size};
use super::partition::{ChannelPartition, OwnershipGuard};
use crate::config::PipelineConfig;
use crate::Core::token::Side;
use crate::Intake::queue::{IntakeQueue, Record};
use crate::errors::{Result, ValidationError};

/// Limits a packer enforces, taken from the pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingLimits {
    pub slot_capacity: usize,
    pub reservation: usize,
    pub max_record_len: usize,
}

impl From<&PipelineConfig> for PackingLimits {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            slot_capacity: cfg.slot_capacity,
            reservation: cfg.reservation,
            max_record_len: cfg.max_record_len,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackerStats {
    /// Records written into the slot.
    pub placed: u64,
    /// Records dropped by the packer's own checks.
    pub dropped: u64,
    /// Cycles handed to the consumer carrying at least one record.
    pub handoffs: u64,
    /// Serialized bytes written.
    pub bytes: u64,
}

/// A slot this packer currently owns.
struct Cycle<'a> {
    guard: OwnershipGuard<'a>,
    cursor: usize,
    free: usize,
    records: usize,
}

impl<'a> Cycle<'a> {
    fn begin(mut guard: OwnershipGuard<'a>, capacity: usize) -> Self {
        guard.slot().zero_fill();
        Self { guard, cursor: 0, free: capacity, records: 0 }
    }

    fn place(&mut self, bytes: &[u8]) -> Result<()> {
        self.cursor = self.guard.slot().write_at(self.cursor, bytes)?;
        self.free -= bytes.len();
        self.records += 1;
        Ok(())
    }
}

pub struct ChannelPacker<'a> {
    channel: &'a ChannelPartition,
    queue: &'a IntakeQueue,
    limits: PackingLimits,
    stats: PackerStats,
}

impl<'a> ChannelPacker<'a> {
    pub fn new(channel: &'a ChannelPartition, queue: &'a IntakeQueue, limits: PackingLimits) -> Self {
        Self { channel, queue, limits, stats: PackerStats::default() }
    }

    /// Pack until the queue is finished and drained, then flush.
    ///
    /// Any held ownership is released on every return path, errors included.
    pub fn run(mut self) -> Result<PackerStats> {
        let mut cycle: Option<Cycle<'a>> = None;

        while let Some(record) = self.queue.dequeue_blocking() {
            let size = match self.check(&record) {
                Ok(size) => size,
                Err(e) => {
                    warn!(channel = self.channel.index(), error = %e, "dropping record");
                    self.stats.dropped += 1;
                    continue;
                }
            };

            // Does not fit in what is left: this cycle is done.
            if cycle.as_ref().is_some_and(|c| c.free < size) {
                self.hand_off(cycle.take());
            }

            let mut current = match cycle.take() {
                Some(current) => current,
                None => Cycle::begin(self.channel.acquire(Side::Producer)?, self.limits.slot_capacity),
            };

            current.place(&serialize(record.as_str()))?;
            self.stats.placed += 1;
            self.stats.bytes += size as u64;
            trace!(channel = self.channel.index(), size, free = current.free, "record placed");

            if current.free < self.limits.reservation {
                self.hand_off(Some(current));
            } else {
                cycle = Some(current);
            }
        }

        self.finish(cycle.take())?;
        Ok(self.stats)
    }

    fn check(&self, record: &Record) -> std::result::Result<usize, ValidationError> {
        if record.len() > self.limits.max_record_len {
            return Err(ValidationError::TooLong { len: record.len(), max: self.limits.max_record_len });
        }
        let size = serialized_size(record.len());
        if size > self.limits.slot_capacity {
            return Err(ValidationError::ExceedsSlot { size, capacity: self.limits.slot_capacity });
        }
        Ok(size)
    }

    fn hand_off(&mut self, cycle: Option<Cycle<'a>>) {
        if let Some(cycle) = cycle {
            debug!(channel = self.channel.index(), records = cycle.records, used = cycle.cursor, "hand-off");
            if cycle.records > 0 {
                self.stats.handoffs += 1;
            }
            cycle.guard.release();
        }
    }

    /// Release the final cycle tagged terminal. With nothing held, wait for
    /// the consumer to return the slot and send an empty terminal cycle.
    fn finish(&mut self, cycle: Option<Cycle<'a>>) -> Result<()> {
        let cycle = match cycle {
            Some(cycle) => cycle,
            None => Cycle::begin(self.channel.acquire(Side::Producer)?, self.limits.slot_capacity),
        };
        cycle.guard.mark_terminal();
        debug!(channel = self.channel.index(), records = cycle.records, "terminal hand-off");
        self.hand_off(Some(cycle));
        Ok(())
    }
}
