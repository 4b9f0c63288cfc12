use std::sync::atomic::{AtomicU32, AtomicU64};

/// "SLOTPCTL": identifies an initialised control region.
pub const CONTROL_MAGIC: u64 = 0x534C_4F54_5043_544C;

/// Bumped whenever `ControlHeader` or `TokenWord` change shape.
pub const LAYOUT_VERSION: u32 = 2;

/// Ownership token states. Zero is the state of a freshly created region.
pub const STATE_PRODUCER_OWNED: u32 = 0;
pub const STATE_CONSUMER_OWNED: u32 = 1;
pub const STATE_CLOSED: u32 = 2;

/// Consumer verdicts written to `ControlHeader::consumer_ack`.
pub const ACK_PENDING: u32 = 0;
pub const ACK_ACCEPTED: u32 = 1;
pub const ACK_REJECTED: u32 = 2;
/// Written by the producer itself when it gives up waiting.
pub const ACK_ABANDONED: u32 = 3;

/// Handshake record published by the producing side in `{prefix}-ctl`.
///
/// Every field except `ready` is written before `ready` is stored with
/// release ordering; readers must observe `ready == 1` before trusting the
/// rest.
#[repr(C, align(128))]
pub struct ControlHeader {
    /// Must equal [`CONTROL_MAGIC`].
    pub magic: u64,

    /// Must equal [`LAYOUT_VERSION`].
    pub version: u32,

    /// Number of channels the producer created.
    pub channel_count: u32,

    /// Slot capacity C in bytes.
    pub slot_capacity: u64,

    /// Hand-off threshold R in bytes.
    pub reservation: u64,

    /// Maximum record length L in bytes.
    pub max_record_len: u64,

    /// 1 once every channel exists.
    pub ready: AtomicU32,

    /// One of the `ACK_*` constants. The producer parks on this word until a
    /// consumer has attached or refused the layout.
    pub consumer_ack: AtomicU32,

    /// Channel count the consumer was started with, valid once
    /// `consumer_ack` is no longer pending.
    pub consumer_channel_count: AtomicU32,

    /// Slot capacity the consumer was started with, valid once
    /// `consumer_ack` is no longer pending.
    pub consumer_slot_capacity: AtomicU64,
}

/// One channel's binary ownership token, stored alone in `{prefix}-tok-{i}`.
#[repr(C, align(128))]
pub struct TokenWord {
    /// One of the `STATE_*` constants. Futex waiters park on this word.
    pub state: AtomicU32,

    /// Non-zero once the producer has released its final cycle.
    pub terminal: AtomicU32,

    /// Hand-offs from producer to consumer so far.
    pub handoffs: AtomicU64,

    /// Cycles the consumer has taken back so far.
    pub returns: AtomicU64,
}
