//! Consumer-side channel worker.
//!
//! Each cycle the unpacker copies the slot into a private scratch buffer,
//! zero-fills the slot and hands it straight back, then decodes the copy
//! outside the critical section. A corrupt record discards the rest of that
//! cycle only.

use tracing::{debug, trace, warn};

use super::codec::records;
use super::partition::ChannelPartition;
use crate::Core::token::Side;
use crate::errors::Result;
use crate::pipeline::{RecordPredicate, ResultSink};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackerStats {
    /// Cycles taken from the producer, the terminal one included.
    pub cycles: u64,
    /// Records decoded.
    pub records: u64,
    /// Records the predicate matched.
    pub matched: u64,
    /// Cycles cut short by a decode error.
    pub format_errors: u64,
}

pub struct ChannelUnpacker<'a, P: ?Sized, S: ?Sized> {
    channel: &'a ChannelPartition,
    predicate: &'a P,
    sink: &'a S,
    scratch: Vec<u8>,
    stats: UnpackerStats,
}

impl<'a, P, S> ChannelUnpacker<'a, P, S>
where
    P: RecordPredicate + ?Sized,
    S: ResultSink + ?Sized,
{
    pub fn new(channel: &'a ChannelPartition, predicate: &'a P, sink: &'a S) -> Self {
        Self { channel, predicate, sink, scratch: vec![0u8; channel.capacity()], stats: UnpackerStats::default() }
    }

    /// Consume cycles until the producer's terminal cycle has been decoded.
    pub fn run(mut self) -> Result<UnpackerStats> {
        loop {
            let terminal = {
                let mut guard = self.channel.acquire(Side::Consumer)?;
                let mut slot = guard.slot();
                slot.copy_to(&mut self.scratch);
                slot.zero_fill();
                guard.is_terminal()
            };
            self.stats.cycles += 1;

            self.decode_cycle();

            if terminal {
                debug!(channel = self.channel.index(), cycles = self.stats.cycles, "terminal cycle consumed");
                return Ok(self.stats);
            }
        }
    }

    fn decode_cycle(&mut self) {
        let channel = self.channel.index();
        let mut decoded = 0usize;
        for item in records(&self.scratch) {
            match item {
                Ok(text) => {
                    let matched = self.predicate.test(text);
                    trace!(channel, matched, len = text.len(), "record decoded");
                    self.sink.accept(channel, text, matched);
                    decoded += 1;
                    self.stats.records += 1;
                    if matched {
                        self.stats.matched += 1;
                    }
                }
                Err(e) => {
                    warn!(channel, error = %e, decoded, "corrupt slot, discarding rest of cycle");
                    self.stats.format_errors += 1;
                }
            }
        }
        if decoded > 0 {
            self.sink.cycle_complete(channel, decoded);
        }
    }
}
