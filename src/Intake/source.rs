//! Feeding lines into an [`IntakeQueue`].

use std::io::{self, BufRead};

use tracing::{debug, warn};

use super::queue::IntakeQueue;

/// Outcome of feeding one input to completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedReport {
    pub accepted: u64,
    pub dropped: u64,
}

/// Marks the queue finished when dropped, including on early return or
/// unwinding, so packers never wait on a source that has gone away.
pub struct FinishGuard<'q> {
    queue: &'q IntakeQueue,
}

impl<'q> FinishGuard<'q> {
    pub fn new(queue: &'q IntakeQueue) -> Self {
        Self { queue }
    }
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.queue.mark_finished();
    }
}

fn offer(queue: &IntakeQueue, line_no: u64, line: &str, report: &mut FeedReport) {
    match queue.enqueue(line) {
        Ok(()) => report.accepted += 1,
        Err(e) => {
            warn!(line = line_no, error = %e, "dropping record");
            report.dropped += 1;
        }
    }
}

/// Enqueue every line, then mark the queue finished.
pub fn feed_lines<I, S>(queue: &IntakeQueue, lines: I) -> FeedReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let _finish = FinishGuard::new(queue);
    let mut report = FeedReport::default();
    for (idx, line) in lines.into_iter().enumerate() {
        offer(queue, idx as u64 + 1, line.as_ref(), &mut report);
    }
    debug!(accepted = report.accepted, dropped = report.dropped, "source finished");
    report
}

/// Enqueue every line read from `reader`, then mark the queue finished.
///
/// Lines that are not valid UTF-8 are dropped like any other invalid record.
/// The queue is marked finished even when reading fails.
pub fn feed_reader<R: BufRead>(queue: &IntakeQueue, mut reader: R) -> io::Result<FeedReport> {
    let _finish = FinishGuard::new(queue);
    let mut report = FeedReport::default();
    let mut buf = Vec::new();
    let mut line_no = 0u64;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        match std::str::from_utf8(&buf) {
            Ok(line) => offer(queue, line_no, line, &mut report),
            Err(_) => {
                warn!(line = line_no, "dropping record that is not valid UTF-8");
                report.dropped += 1;
            }
        }
    }
    debug!(accepted = report.accepted, dropped = report.dropped, "source finished");
    Ok(report)
}
