pub mod queue;
pub mod source;

pub use queue::{IntakeQueue, Record};
pub use source::{feed_lines, feed_reader, FeedReport, FinishGuard};
