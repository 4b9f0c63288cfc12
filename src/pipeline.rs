//! Predicates, result sinks and the single-process runner.

use std::thread;

use parking_lot::Mutex;
use tracing::info;

use crate::Channel::set::{ChannelSet, ConsumerReport, ProducerReport};
use crate::Intake::queue::IntakeQueue;
use crate::Intake::source::{feed_lines, FeedReport};
use crate::config::PipelineConfig;
use crate::errors::{PipelineError, Result};

/// Test applied by an unpacker to every decoded record.
pub trait RecordPredicate {
    fn test(&self, text: &str) -> bool;
}

impl<F> RecordPredicate for F
where
    F: Fn(&str) -> bool,
{
    fn test(&self, text: &str) -> bool {
        self(text)
    }
}

/// Substring containment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contains(pub String);

impl Contains {
    pub fn new(needle: impl Into<String>) -> Self {
        Self(needle.into())
    }
}

impl RecordPredicate for Contains {
    fn test(&self, text: &str) -> bool {
        text.contains(self.0.as_str())
    }
}

/// Receives decoded records in within-cycle order.
///
/// Records from different channels arrive concurrently and in no particular
/// order relative to each other.
pub trait ResultSink {
    fn accept(&self, channel: usize, text: &str, matched: bool);

    /// Called after the last record of a non-empty cycle.
    fn cycle_complete(&self, _channel: usize, _records: usize) {}
}

impl<F> ResultSink for F
where
    F: Fn(usize, &str, bool),
{
    fn accept(&self, channel: usize, text: &str, matched: bool) {
        self(channel, text, matched)
    }
}

/// Sink that keeps every result, and the size of every cycle, in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    results: Mutex<Vec<(usize, String, bool)>>,
    cycles: Mutex<Vec<(usize, usize)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything collected so far as `(channel, text, matched)`.
    pub fn take(&self) -> Vec<(usize, String, bool)> {
        std::mem::take(&mut *self.results.lock())
    }

    /// Records per completed cycle as `(channel, records)`.
    pub fn cycles(&self) -> Vec<(usize, usize)> {
        self.cycles.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for CollectingSink {
    fn accept(&self, channel: usize, text: &str, matched: bool) {
        self.results.lock().push((channel, text.to_string(), matched));
    }

    fn cycle_complete(&self, channel: usize, records: usize) {
        self.cycles.lock().push((channel, records));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub feed: FeedReport,
    pub producer: ProducerReport,
    pub consumer: ConsumerReport,
}

/// Run source, producer side and consumer side concurrently in this process.
///
/// Both configurations must agree on the channel count and slot capacity;
/// the check happens before any region is allocated.
pub fn run_local<I, S, P, K>(
    producer: &PipelineConfig,
    consumer: &PipelineConfig,
    lines: I,
    predicate: &P,
    sink: &K,
) -> Result<PipelineReport>
where
    I: IntoIterator<Item = S> + Send,
    S: AsRef<str>,
    P: RecordPredicate + Sync + ?Sized,
    K: ResultSink + Sync + ?Sized,
{
    if producer.channel_count != consumer.channel_count {
        return Err(PipelineError::ChannelCountMismatch {
            producer: producer.channel_count,
            consumer: consumer.channel_count,
        });
    }
    if producer.slot_capacity != consumer.slot_capacity {
        return Err(PipelineError::LayoutMismatch {
            field: "slot_capacity",
            producer: producer.slot_capacity as u64,
            consumer: consumer.slot_capacity as u64,
        });
    }
    consumer.validate()?;

    let set = ChannelSet::in_process(producer.clone())?;
    let queue = IntakeQueue::new(producer.max_record_len);

    let (feed, produced, consumed) = thread::scope(|s| {
        let source = s.spawn(|| feed_lines(&queue, lines));
        let consumer_side = s.spawn(|| set.run_consumer(predicate, sink));
        let produced = set.run_producer(&queue);
        // a failed producer leaves the consumers parked on their tokens
        if produced.is_err() {
            set.close();
        }
        // unpacker panics are mapped per channel inside run_consumer
        let consumed = consumer_side
            .join()
            .unwrap_or(Err(PipelineError::ThreadPanicked { role: "consumer" }));
        // the source's finish guard has already let the packers drain
        let feed = source.join().map_err(|_| PipelineError::ThreadPanicked { role: "source" });
        (feed, produced, consumed)
    });

    let report = PipelineReport { feed: feed?, producer: produced?, consumer: consumed? };
    info!(
        accepted = report.feed.accepted,
        dropped = report.feed.dropped + report.producer.dropped(),
        delivered = report.consumer.records(),
        "pipeline finished"
    );
    Ok(report)
}
