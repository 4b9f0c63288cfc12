// Named shared memory and the cross-process handshake, exercised from one
// process with a producer-side and a consumer-side ChannelSet.
// Run with: cargo test --test shared_memory -- --nocapture

#[cfg(target_os = "linux")]
mod linux_tests {
    use std::fs;
    use std::thread;

    use serial_test::serial;
    use slotpipe::Core::SharedMemory::shm_path;
    use slotpipe::Core::{
        attach_shared_memory, create_or_recover_shared_memory, create_shared_memory, unlink_shared_memory,
        RawHandle, SharedMemoryBackend,
    };
    use slotpipe::{ChannelSet, CollectingSink, Contains, IntakeQueue, PipelineConfig, PipelineError};

    // Test lock to prevent parallel use of /dev/shm names
    static TEST_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    fn unique_prefix(tag: &str) -> String {
        format!("slotpipe-test-{tag}-{}", std::process::id())
    }

    /// Names under /dev/shm starting with `prefix`.
    fn leftovers(prefix: &str) -> Vec<String> {
        fs::read_dir("/dev/shm")
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(prefix))
            .collect()
    }

    #[test]
    #[serial]
    fn test_create_attach_share_bytes() {
        let _guard = TEST_LOCK.lock();
        let name = unique_prefix("rw");
        let created = create_shared_memory(4096, &name).unwrap();
        assert_eq!(created.size(), 4096);
        assert!(matches!(created.raw_handle(), RawHandle::Fd(fd) if fd >= 0));

        let attached = attach_shared_memory(&name, 4096).unwrap();
        unsafe {
            *created.as_ptr().add(100) = 0x42;
            assert_eq!(*attached.as_ptr().add(100), 0x42);
        }

        assert_eq!(
            create_shared_memory(4096, &name).unwrap_err().kind(),
            std::io::ErrorKind::AlreadyExists
        );
        unlink_shared_memory(&name).unwrap();
        assert!(attach_shared_memory(&name, 4096).is_err());
    }

    #[test]
    #[serial]
    fn test_attach_rejects_short_region() {
        let _guard = TEST_LOCK.lock();
        let name = unique_prefix("short");
        let _created = create_shared_memory(1024, &name).unwrap();
        let err = attach_shared_memory(&name, 4096).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    #[serial]
    fn test_create_or_recover_replaces_stale_region() {
        let _guard = TEST_LOCK.lock();
        let name = unique_prefix("stale");
        fs::write(shm_path(&name), b"left over by a crashed producer").unwrap();

        let region = create_or_recover_shared_memory(2048, &name).unwrap();
        assert_eq!(region.size(), 2048);
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.size()) };
        assert!(bytes.iter().all(|&b| b == 0));
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    #[serial]
    fn test_consumer_needs_a_producer() {
        let _guard = TEST_LOCK.lock();
        let prefix = unique_prefix("absent");
        let err = ChannelSet::open(PipelineConfig::new().with_name_prefix(&prefix)).unwrap_err();
        assert!(matches!(err, PipelineError::Resource { .. }));
        assert!(leftovers(&prefix).is_empty());
    }

    #[test]
    #[serial]
    fn test_channel_count_mismatch_leaves_nothing_behind() {
        let _guard = TEST_LOCK.lock();
        let prefix = unique_prefix("mismatch");
        {
            let producer = ChannelSet::create(PipelineConfig::new().with_channel_count(2).with_name_prefix(&prefix))
                .unwrap();
            assert_eq!(leftovers(&prefix).len(), 1 + 2 * 2);

            let err = ChannelSet::open(PipelineConfig::new().with_channel_count(3).with_name_prefix(&prefix))
                .unwrap_err();
            assert!(matches!(err, PipelineError::ChannelCountMismatch { producer: 2, consumer: 3 }));
            drop(producer);
        }
        assert!(leftovers(&prefix).is_empty(), "left behind: {:?}", leftovers(&prefix));
    }

    #[test]
    #[serial]
    fn test_slot_capacity_mismatch() {
        let _guard = TEST_LOCK.lock();
        let prefix = unique_prefix("layout");
        let producer = ChannelSet::create(PipelineConfig::new().with_name_prefix(&prefix)).unwrap();
        let err = ChannelSet::open(PipelineConfig::new().with_slot_capacity(2048).with_name_prefix(&prefix))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::LayoutMismatch { field: "slot_capacity", producer: 1024, consumer: 2048 }
        ));

        // the producer hears the same verdict
        assert!(matches!(
            producer.await_consumer(),
            Err(PipelineError::LayoutMismatch { field: "slot_capacity", producer: 1024, consumer: 2048 })
        ));
    }

    #[test]
    #[serial]
    fn test_producer_fails_on_channel_count_mismatch() {
        let _guard = TEST_LOCK.lock();
        let prefix = unique_prefix("refused");
        {
            let producer = ChannelSet::create(PipelineConfig::new().with_channel_count(2).with_name_prefix(&prefix))
                .unwrap();
            let queue = IntakeQueue::new(producer.config().max_record_len);
            for i in 0..20 {
                queue.enqueue(&format!("record {i}")).unwrap();
            }
            queue.mark_finished();

            thread::scope(|s| {
                // parks on the control header until the consumer answers
                let packers = s.spawn(|| producer.run_producer(&queue));
                thread::sleep(std::time::Duration::from_millis(20));

                let err = ChannelSet::open(PipelineConfig::new().with_channel_count(3).with_name_prefix(&prefix))
                    .unwrap_err();
                assert!(matches!(err, PipelineError::ChannelCountMismatch { producer: 2, consumer: 3 }));

                let err = packers.join().unwrap().unwrap_err();
                assert!(matches!(err, PipelineError::ChannelCountMismatch { producer: 2, consumer: 3 }));
            });
            // no packer ran
            assert_eq!(queue.count(), 20);
        }
        assert!(leftovers(&prefix).is_empty(), "left behind: {:?}", leftovers(&prefix));
    }

    #[test]
    #[serial]
    fn test_close_abandons_wait_for_consumer() {
        let _guard = TEST_LOCK.lock();
        let prefix = unique_prefix("abandon");
        let producer = ChannelSet::create(PipelineConfig::new().with_name_prefix(&prefix)).unwrap();
        thread::scope(|s| {
            let waiting = s.spawn(|| producer.await_consumer());
            thread::sleep(std::time::Duration::from_millis(20));
            producer.close();
            assert!(matches!(waiting.join().unwrap(), Err(PipelineError::Resource { .. })));
        });
        drop(producer);
        assert!(leftovers(&prefix).is_empty());
    }

    #[test]
    #[serial]
    fn test_failed_create_unlinks_built_channels() {
        let _guard = TEST_LOCK.lock();
        let prefix = unique_prefix("partial");
        let blocker = format!("{prefix}-slot-2");
        fs::create_dir(shm_path(&blocker)).unwrap();

        let err = ChannelSet::create(PipelineConfig::new().with_channel_count(4).with_name_prefix(&prefix))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Resource { ref name, .. } if *name == blocker));
        // channels 0 and 1, their tokens and the control region are gone
        assert_eq!(leftovers(&prefix), vec![blocker.clone()]);

        fs::remove_dir(shm_path(&blocker)).unwrap();
        assert!(leftovers(&prefix).is_empty());
    }

    #[test]
    #[serial]
    fn test_named_pipeline_end_to_end() {
        let _guard = TEST_LOCK.lock();
        let prefix = unique_prefix("e2e");
        let cfg = PipelineConfig::new().with_channel_count(3).with_name_prefix(&prefix);

        let producer = ChannelSet::create(cfg.clone()).unwrap();
        let consumer = ChannelSet::open(cfg.clone()).unwrap();
        let queue = IntakeQueue::new(cfg.max_record_len);
        let sink = CollectingSink::new();

        let mut rng = fastrand::Rng::with_seed(7);
        let lines: Vec<String> = (0..1_500)
            .map(|i| format!("line {i} {}", "n".repeat(rng.usize(0..180))))
            .collect();

        thread::scope(|s| {
            let unpackers = s.spawn(|| consumer.run_consumer(&Contains::new("line 1"), &sink));
            let source = s.spawn(|| slotpipe::Intake::feed_lines(&queue, &lines));
            let produced = producer.run_producer(&queue).unwrap();
            producer.wait_until_drained().unwrap();

            let consumed = unpackers.join().unwrap().unwrap();
            let fed = source.join().unwrap();
            assert_eq!(fed.accepted, lines.len() as u64);
            assert_eq!(produced.placed(), lines.len() as u64);
            assert_eq!(consumed.records(), lines.len() as u64);
        });

        let mut got: Vec<String> = sink.take().into_iter().map(|(_, t, _)| t).collect();
        let mut want = lines.clone();
        got.sort();
        want.sort();
        assert_eq!(got, want);

        drop(consumer);
        drop(producer);
        assert!(leftovers(&prefix).is_empty());
    }
}
