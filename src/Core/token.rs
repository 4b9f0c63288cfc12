//! Binary ownership token shared by one packer and one unpacker.
//!
//! The token is a single state word in its own region. It alternates strictly
//! between [`Side::Producer`] and [`Side::Consumer`]; only the side named by
//! the word may touch the slot, and only that side may hand it over. Waiting
//! spins briefly, then parks on a futex, so the same code works whether the
//! peer is another thread or another process mapping the same region.

use std::io;
use std::mem::size_of;
use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use super::futex::{futex_wait, futex_wake_all};
use super::layout::{TokenWord, STATE_CLOSED, STATE_CONSUMER_OWNED, STATE_PRODUCER_OWNED};
use super::SharedMemory::SharedMemoryBackend;
use crate::errors::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Producer,
    Consumer,
}

impl Side {
    fn owned_state(self) -> u32 {
        match self {
            Side::Producer => STATE_PRODUCER_OWNED,
            Side::Consumer => STATE_CONSUMER_OWNED,
        }
    }

    fn peer_state(self) -> u32 {
        match self {
            Side::Producer => STATE_CONSUMER_OWNED,
            Side::Consumer => STATE_PRODUCER_OWNED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    ProducerOwned,
    ConsumerOwned,
    Closed,
}

pub struct OwnershipToken {
    region: Box<dyn SharedMemoryBackend>,
    channel: usize,
}

impl OwnershipToken {
    /// Bytes a token region must provide.
    pub const REGION_SIZE: usize = size_of::<TokenWord>();

    /// Wrap a region holding a `TokenWord`. A zero-filled region starts
    /// producer-owned.
    pub fn new(region: Box<dyn SharedMemoryBackend>, channel: usize) -> io::Result<Self> {
        if region.size() < Self::REGION_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("token region too small: {} < {}", region.size(), Self::REGION_SIZE),
            ));
        }
        if region.as_ptr() as usize % std::mem::align_of::<TokenWord>() != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "token region not properly aligned"));
        }
        Ok(Self { region, channel })
    }

    #[inline]
    fn word(&self) -> &TokenWord {
        // SAFETY: size and alignment checked in `new`; every field is atomic so
        // shared references from several threads or processes are sound.
        unsafe { &*(self.region.as_ptr() as *const TokenWord) }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn state(&self) -> Ownership {
        match self.word().state.load(Ordering::Acquire) {
            STATE_PRODUCER_OWNED => Ownership::ProducerOwned,
            STATE_CONSUMER_OWNED => Ownership::ConsumerOwned,
            _ => Ownership::Closed,
        }
    }

    /// Block until `side` owns the token. No timeout.
    pub fn acquire(&self, side: Side) -> Result<()> {
        self.wait_for(side)
    }

    /// Wait until the word names `side`.
    ///
    /// Used directly (without a following release) to observe that the peer
    /// has handed back the final cycle.
    pub fn wait_for(&self, side: Side) -> Result<()> {
        let word = self.word();
        let want = side.owned_state();
        let backoff = Backoff::new();
        loop {
            let state = word.state.load(Ordering::Acquire);
            if state == want {
                return Ok(());
            }
            if state == STATE_CLOSED {
                return Err(PipelineError::Synchronization {
                    channel: self.channel,
                    reason: "ownership token closed".to_string(),
                });
            }
            if backoff.is_completed() {
                futex_wait(&word.state, state);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Hand the token from `side` to its peer.
    ///
    /// Returns false if `side` did not own the token (including when it was
    /// closed underneath the holder).
    pub fn release(&self, side: Side) -> bool {
        let word = self.word();
        let handed = word
            .state
            .compare_exchange(side.owned_state(), side.peer_state(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if handed {
            match side {
                Side::Producer => word.handoffs.fetch_add(1, Ordering::Relaxed),
                Side::Consumer => word.returns.fetch_add(1, Ordering::Relaxed),
            };
            futex_wake_all(&word.state);
        }
        handed
    }

    /// Poison the token: every pending and future acquire fails.
    pub fn close(&self) {
        let word = self.word();
        word.state.store(STATE_CLOSED, Ordering::Release);
        futex_wake_all(&word.state);
    }

    /// Tag the cycle about to be released as the last one.
    pub fn mark_terminal(&self) {
        self.word().terminal.store(1, Ordering::Release);
    }

    pub fn is_terminal(&self) -> bool {
        self.word().terminal.load(Ordering::Acquire) != 0
    }

    /// Producer-to-consumer transfers so far.
    pub fn handoffs(&self) -> u64 {
        self.word().handoffs.load(Ordering::Relaxed)
    }

    /// Consumer-to-producer transfers so far.
    pub fn returns(&self) -> u64 {
        self.word().returns.load(Ordering::Relaxed)
    }

    pub(crate) fn region(&self) -> &dyn SharedMemoryBackend {
        &*self.region
    }
}
