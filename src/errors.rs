//! Error taxonomy for the slot pipeline.
//!
//! Per-record problems ([`ValidationError`]) are recovered where they occur:
//! the record is dropped, logged and counted. Decode problems
//! ([`FormatError`]) abort only the cycle being decoded. Everything else is a
//! [`PipelineError`] that propagates to the coordinator.

use std::io;

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A record that cannot be carried by the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Record has no text once its line terminator is trimmed
    #[error("record is empty")]
    Empty,

    /// Record text exceeds the configured maximum record length
    #[error("record of {len} bytes exceeds maximum record length {max}")]
    TooLong {
        /// Length of the offending record in bytes
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Serialized record cannot fit in an empty slot
    #[error("serialized record of {size} bytes exceeds slot capacity {capacity}")]
    ExceedsSlot {
        /// Serialized size, header included
        size: usize,
        /// Slot capacity in bytes
        capacity: usize,
    },

    /// The queue was already marked finished when the record arrived
    #[error("intake queue already marked finished")]
    QueueFinished,
}

/// Corrupt slot contents found while decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The record at `offset` would run past the end of the slot
    #[error("record at offset {offset} needs {needed} bytes but slot capacity is {capacity}")]
    Truncated {
        /// Offset of the length field
        offset: usize,
        /// Bytes the record claims to need
        needed: usize,
        /// Slot capacity
        capacity: usize,
    },

    /// The length field does not fit in the address space
    #[error("length field {len} at offset {offset} overflows")]
    LengthOverflow {
        /// Offset of the length field
        offset: usize,
        /// Raw length field value
        len: u64,
    },

    /// The byte after the record text is not the terminator
    #[error("record at offset {offset} is missing its terminator")]
    MissingTerminator {
        /// Offset of the length field
        offset: usize,
    },

    /// Record text is not valid UTF-8
    #[error("record at offset {offset} is not valid UTF-8")]
    InvalidUtf8 {
        /// Offset of the length field
        offset: usize,
    },
}

/// Error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A record failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Slot contents could not be decoded
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Invalid configuration value
    #[error("Invalid parameter '{parameter}': {reason}")]
    Config {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A shared-memory region could not be created or opened
    #[error("shared memory resource '{name}': {source}")]
    Resource {
        /// Name of the region
        name: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// An ownership acquire failed
    #[error("channel {channel} synchronization failed: {reason}")]
    Synchronization {
        /// Channel index
        channel: usize,
        /// What went wrong
        reason: String,
    },

    /// Producer and consumer were started with different channel counts
    #[error("producer and consumer disagree on channel count (producer: {producer}, consumer: {consumer})")]
    ChannelCountMismatch {
        /// Channel count published by the producer
        producer: usize,
        /// Channel count the consumer was given
        consumer: usize,
    },

    /// Producer and consumer disagree on a layout constant
    #[error("producer and consumer disagree on {field} (producer: {producer}, consumer: {consumer})")]
    LayoutMismatch {
        /// Name of the layout field
        field: &'static str,
        /// Producer's value
        producer: u64,
        /// Consumer's value
        consumer: u64,
    },

    /// A worker thread panicked
    #[error("{role} worker for channel {channel} panicked")]
    WorkerPanicked {
        /// "packer" or "unpacker"
        role: &'static str,
        /// Channel index
        channel: usize,
    },

    /// A thread outside the per-channel workers panicked
    #[error("{role} thread panicked")]
    ThreadPanicked {
        /// "source" or "consumer"
        role: &'static str,
    },
}

impl PipelineError {
    pub(crate) fn resource(name: impl Into<String>, source: io::Error) -> Self {
        PipelineError::Resource { name: name.into(), source }
    }

    pub(crate) fn config(parameter: &str, reason: impl Into<String>) -> Self {
        PipelineError::Config { parameter: parameter.to_string(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        let msg = format!("{}", ValidationError::TooLong { len: 300, max: 247 });
        assert!(msg.contains("300"));
        assert!(msg.contains("247"));
        assert_eq!(format!("{}", ValidationError::Empty), "record is empty");
    }

    #[test]
    fn test_validation_converts_transparently() {
        let err: PipelineError = ValidationError::ExceedsSlot { size: 2000, capacity: 1024 }.into();
        assert!(matches!(err, PipelineError::Validation(ValidationError::ExceedsSlot { .. })));
        assert!(format!("{err}").contains("slot capacity 1024"));
    }

    #[test]
    fn test_channel_count_mismatch() {
        let err = PipelineError::ChannelCountMismatch { producer: 2, consumer: 3 };
        let msg = format!("{err}");
        assert!(msg.contains("producer: 2"));
        assert!(msg.contains("consumer: 3"));
    }

    #[test]
    fn test_resource_keeps_source() {
        use std::error::Error;

        let err = PipelineError::resource(
            "slotpipe-ctl",
            io::Error::new(io::ErrorKind::AlreadyExists, "exists"),
        );
        assert!(format!("{err}").contains("slotpipe-ctl"));
        assert!(err.source().is_some());
    }
}
