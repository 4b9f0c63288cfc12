//! Thread-safe FIFO feeding records to every channel packer.
//!
//! One source thread enqueues and finally marks the queue finished; any
//! number of packers dequeue. The mutex covers only the list splice:
//! validation and copying happen outside it, and blocked dequeuers wait on a
//! condition variable signalled by `enqueue` and `mark_finished`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::errors::ValidationError;

/// One validated text record, 0 < len <= max record length.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    text: Box<str>,
}

impl Record {
    /// Validate `text` after trimming one trailing `\n` or `\r\n`.
    pub fn new(text: &str, max_len: usize) -> Result<Self, ValidationError> {
        let text = trim_line_terminator(text);
        if text.is_empty() {
            return Err(ValidationError::Empty);
        }
        if text.len() > max_len {
            return Err(ValidationError::TooLong { len: text.len(), max: max_len });
        }
        Ok(Self { text: text.into() })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Record").field(&&*self.text).finish()
    }
}

fn trim_line_terminator(text: &str) -> &str {
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.strip_suffix('\r').unwrap_or(text)
}

struct QueueState {
    records: VecDeque<Record>,
    finished: bool,
}

pub struct IntakeQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    max_record_len: usize,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl IntakeQueue {
    pub fn new(max_record_len: usize) -> Self {
        Self {
            state: Mutex::new(QueueState { records: VecDeque::new(), finished: false }),
            available: Condvar::new(),
            max_record_len,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn max_record_len(&self) -> usize {
        self.max_record_len
    }

    /// Validate and append a record at the back.
    pub fn enqueue(&self, text: &str) -> Result<(), ValidationError> {
        let record = match Record::new(text, self.max_record_len) {
            Ok(record) => record,
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        {
            let mut state = self.state.lock();
            if state.finished {
                drop(state);
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(ValidationError::QueueFinished);
            }
            state.records.push_back(record);
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
        Ok(())
    }

    /// Remove the front record without waiting. `None` means the queue is
    /// currently empty, which is not an error.
    pub fn try_dequeue(&self) -> Option<Record> {
        self.state.lock().records.pop_front()
    }

    /// Remove the front record, waiting while the queue is empty and not
    /// finished. `None` means finished and drained.
    pub fn dequeue_blocking(&self) -> Option<Record> {
        let mut state = self.state.lock();
        loop {
            if let Some(record) = state.records.pop_front() {
                return Some(record);
            }
            if state.finished {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Signal that nothing more will be enqueued. Idempotent.
    pub fn mark_finished(&self) {
        let mut state = self.state.lock();
        if !state.finished {
            state.finished = true;
            drop(state);
            self.available.notify_all();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn count(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// True once finished and every record has been taken.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.finished && state.records.is_empty()
    }

    /// Records accepted by `enqueue` so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Records rejected by `enqueue` so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for IntakeQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("IntakeQueue")
            .field("count", &state.records.len())
            .field("finished", &state.finished)
            .field("max_record_len", &self.max_record_len)
            .finish()
    }
}
