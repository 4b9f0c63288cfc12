use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use slotpipe::config::DEFAULT_MAX_RECORD_LEN;
use slotpipe::{IntakeQueue, ValidationError};

#[test]
fn test_record_length_boundary() {
    let q = IntakeQueue::new(DEFAULT_MAX_RECORD_LEN);
    q.enqueue(&"a".repeat(DEFAULT_MAX_RECORD_LEN)).unwrap();
    assert_eq!(
        q.enqueue(&"a".repeat(DEFAULT_MAX_RECORD_LEN + 1)),
        Err(ValidationError::TooLong { len: DEFAULT_MAX_RECORD_LEN + 1, max: DEFAULT_MAX_RECORD_LEN })
    );
    // the trimmed terminator does not count towards the limit
    q.enqueue(&format!("{}\n", "b".repeat(DEFAULT_MAX_RECORD_LEN))).unwrap();
    assert_eq!(q.enqueue("\r\n"), Err(ValidationError::Empty));
    assert_eq!(q.count(), 2);
    assert_eq!(q.accepted(), 2);
    assert_eq!(q.rejected(), 2);
}

#[test]
fn test_enqueue_after_finish_is_rejected() {
    let q = IntakeQueue::new(16);
    q.enqueue("first").unwrap();
    q.mark_finished();
    q.mark_finished();
    assert!(q.is_finished());
    assert_eq!(q.enqueue("late"), Err(ValidationError::QueueFinished));
    assert_eq!(q.dequeue_blocking().unwrap().as_str(), "first");
    assert!(q.dequeue_blocking().is_none());
    assert!(q.is_drained());
}

#[test]
fn test_fifo_single_consumer() {
    let q = IntakeQueue::new(16);
    for i in 0..100 {
        q.enqueue(&format!("rec-{i}")).unwrap();
    }
    for i in 0..100 {
        assert_eq!(q.try_dequeue().unwrap().as_str(), format!("rec-{i}"));
    }
    assert!(q.try_dequeue().is_none());
    assert!(q.is_empty());
}

#[test]
fn test_concurrent_dequeue_exactly_once() {
    const RECORDS: usize = 20_000;
    const WORKERS: usize = 8;

    let q = Arc::new(IntakeQueue::new(32));
    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let q = q.clone();
            thread::spawn(move || {
                let mut got = Vec::new();
                while let Some(record) = q.dequeue_blocking() {
                    got.push(record.as_str().to_string());
                }
                got
            })
        })
        .collect();

    for i in 0..RECORDS {
        q.enqueue(&format!("record-{i}")).unwrap();
        if i % 1000 == 0 {
            thread::yield_now();
        }
    }
    q.mark_finished();

    let mut seen = HashSet::new();
    let mut total = 0;
    for w in workers {
        let got = w.join().unwrap();
        // each worker sees its share in enqueue order
        let indices: Vec<usize> =
            got.iter().map(|s| s.trim_start_matches("record-").parse().unwrap()).collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
        total += got.len();
        seen.extend(got);
    }
    assert_eq!(total, RECORDS);
    assert_eq!(seen.len(), RECORDS);
    assert_eq!(q.count(), 0);
}

#[test]
fn test_blocked_dequeuers_wake_on_finish() {
    let q = Arc::new(IntakeQueue::new(8));
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let q = q.clone();
            thread::spawn(move || q.dequeue_blocking())
        })
        .collect();
    thread::sleep(std::time::Duration::from_millis(20));
    q.mark_finished();
    for w in waiters {
        assert!(w.join().unwrap().is_none());
    }
}
