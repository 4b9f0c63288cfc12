//! The N-channel coordinator.
//!
//! A `ChannelSet` owns every channel of one pipeline. The producing side
//! creates the named regions (or heap regions, in-process), the consuming
//! side opens them after checking the control header, and each side runs one
//! scoped worker thread per channel and joins them all before returning.

use std::io;
use std::mem::{align_of, size_of};
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;

use tracing::{debug, error, info, warn};

use super::packer::{ChannelPacker, PackerStats, PackingLimits};
use super::partition::ChannelPartition;
use super::unpacker::{ChannelUnpacker, UnpackerStats};
use crate::config::PipelineConfig;
use crate::Core::futex::{futex_wait, futex_wake_all};
use crate::Core::layout::{
    ControlHeader, ACK_ABANDONED, ACK_ACCEPTED, ACK_PENDING, ACK_REJECTED, CONTROL_MAGIC, LAYOUT_VERSION,
};
use crate::Core::token::Side;
use crate::Core::SharedMemory::{
    attach_shared_memory, create_or_recover_shared_memory, unlink_shared_memory, SharedMemoryBackend,
};
use crate::Intake::queue::IntakeQueue;
use crate::errors::{PipelineError, Result};
use crate::pipeline::{RecordPredicate, ResultSink};

/// The `{prefix}-ctl` region carrying the startup handshake.
pub(crate) struct ControlRegion {
    pub(crate) region: Box<dyn SharedMemoryBackend>,
    pub(crate) name: String,
    owned: bool,
}

impl ControlRegion {
    const SIZE: usize = size_of::<ControlHeader>();

    fn new(region: Box<dyn SharedMemoryBackend>, name: String, owned: bool) -> Result<Self> {
        let control = Self { region, name, owned };
        if control.region.size() < Self::SIZE
            || control.region.as_ptr() as usize % align_of::<ControlHeader>() != 0
        {
            // dropping `control` unlinks an owned name
            return Err(PipelineError::resource(
                control.name.clone(),
                io::Error::new(io::ErrorKind::InvalidData, "control region too small or misaligned"),
            ));
        }
        Ok(control)
    }

    /// Write every layout field with `ready` still clear.
    fn publish_layout(&self, config: &PipelineConfig) {
        let header = ControlHeader {
            magic: CONTROL_MAGIC,
            version: LAYOUT_VERSION,
            channel_count: config.channel_count as u32,
            slot_capacity: config.slot_capacity as u64,
            reservation: config.reservation as u64,
            max_record_len: config.max_record_len as u64,
            ready: AtomicU32::new(0),
            consumer_ack: AtomicU32::new(ACK_PENDING),
            consumer_channel_count: AtomicU32::new(0),
            consumer_slot_capacity: AtomicU64::new(0),
        };
        // SAFETY: size and alignment checked in `new`, and no consumer reads
        // the header before `ready` is set.
        unsafe { ptr::write(self.region.as_ptr() as *mut ControlHeader, header) };
    }

    pub(crate) fn header(&self) -> &ControlHeader {
        // SAFETY: size and alignment checked in `new`.
        unsafe { &*(self.region.as_ptr() as *const ControlHeader) }
    }

    /// Consumer side: record what this side was started with and wake the
    /// producer with `verdict`.
    fn answer(&self, config: &PipelineConfig, verdict: u32) {
        let header = self.header();
        header.consumer_channel_count.store(config.channel_count as u32, Ordering::Relaxed);
        header.consumer_slot_capacity.store(config.slot_capacity as u64, Ordering::Relaxed);
        header.consumer_ack.store(verdict, Ordering::Release);
        futex_wake_all(&header.consumer_ack);
    }
}

impl Drop for ControlRegion {
    fn drop(&mut self) {
        if self.owned {
            match unlink_shared_memory(&self.name) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(name = %self.name, error = %e, "failed to unlink control region"),
            }
        }
    }
}

/// Per-channel packer statistics, indexed by channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub channels: Vec<PackerStats>,
}

impl ProducerReport {
    pub fn placed(&self) -> u64 {
        self.channels.iter().map(|s| s.placed).sum()
    }

    pub fn dropped(&self) -> u64 {
        self.channels.iter().map(|s| s.dropped).sum()
    }

    pub fn handoffs(&self) -> u64 {
        self.channels.iter().map(|s| s.handoffs).sum()
    }
}

/// Per-channel unpacker statistics, indexed by channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub channels: Vec<UnpackerStats>,
}

impl ConsumerReport {
    pub fn records(&self) -> u64 {
        self.channels.iter().map(|s| s.records).sum()
    }

    pub fn matched(&self) -> u64 {
        self.channels.iter().map(|s| s.matched).sum()
    }

    pub fn format_errors(&self) -> u64 {
        self.channels.iter().map(|s| s.format_errors).sum()
    }
}

pub struct ChannelSet {
    pub(crate) config: PipelineConfig,
    pub(crate) channels: Vec<ChannelPartition>,
    pub(crate) control: Option<ControlRegion>,
}

impl ChannelSet {
    /// Create every named region for the producing side and publish the
    /// control header. On failure everything created so far is unlinked.
    pub fn create(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let name = config.control_name();
        let region = create_or_recover_shared_memory(ControlRegion::SIZE, &name)
            .map_err(|e| PipelineError::resource(&name, e))?;
        let control = ControlRegion::new(region, name, true)?;
        control.publish_layout(&config);

        let mut channels = Vec::with_capacity(config.channel_count);
        for index in 0..config.channel_count {
            channels.push(ChannelPartition::create(&config, index)?);
        }

        control.header().ready.store(1, Ordering::Release);
        info!(
            prefix = %config.name_prefix,
            channels = config.channel_count,
            slot_capacity = config.slot_capacity,
            "channel set created"
        );
        Ok(Self { config, channels, control: Some(control) })
    }

    /// Open the regions a producer created. The channel count and slot layout
    /// are compared before any channel is attached.
    pub fn open(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let name = config.control_name();
        let region =
            attach_shared_memory(&name, ControlRegion::SIZE).map_err(|e| PipelineError::resource(&name, e))?;
        let control = ControlRegion::new(region, name, false)?;
        if let Err(e) = check_handshake(&control, &config) {
            // the producer can only be told once the header is known to be ours
            if matches!(
                e,
                PipelineError::ChannelCountMismatch { .. }
                    | PipelineError::LayoutMismatch { field: "slot_capacity", .. }
            ) {
                control.answer(&config, ACK_REJECTED);
            }
            return Err(e);
        }

        let mut channels = Vec::with_capacity(config.channel_count);
        for index in 0..config.channel_count {
            match ChannelPartition::attach(&config, index) {
                Ok(channel) => channels.push(channel),
                Err(e) => {
                    control.answer(&config, ACK_REJECTED);
                    return Err(e);
                }
            }
        }
        control.answer(&config, ACK_ACCEPTED);

        info!(prefix = %config.name_prefix, channels = config.channel_count, "channel set attached");
        Ok(Self { config, channels, control: Some(control) })
    }

    /// Heap-backed set shared by both sides of one process.
    pub fn in_process(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let channels = (0..config.channel_count)
            .map(|index| ChannelPartition::in_process(index, config.slot_capacity))
            .collect::<Result<Vec<_>>>()?;
        info!(channels = config.channel_count, slot_capacity = config.slot_capacity, "in-process channel set created");
        Ok(Self { config, channels, control: None })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn channels(&self) -> &[ChannelPartition] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Producer side of a named set: block until a consumer has attached
    /// every channel, or fail with the mismatch it reported. Returns at once
    /// for an in-process set or on the consuming side.
    pub fn await_consumer(&self) -> Result<()> {
        let Some(control) = self.control.as_ref().filter(|c| c.owned) else {
            return Ok(());
        };
        let header = control.header();
        loop {
            match header.consumer_ack.load(Ordering::Acquire) {
                ACK_PENDING => {
                    debug!(prefix = %self.config.name_prefix, "waiting for a consumer");
                    futex_wait(&header.consumer_ack, ACK_PENDING);
                }
                ACK_ACCEPTED => return Ok(()),
                ACK_REJECTED => {
                    let err = self.rejection(header);
                    error!(error = %err, "consumer rejected the channel set");
                    return Err(err);
                }
                _ => {
                    return Err(PipelineError::resource(
                        control.name.clone(),
                        io::Error::new(io::ErrorKind::Interrupted, "closed while waiting for a consumer"),
                    ))
                }
            }
        }
    }

    fn rejection(&self, header: &ControlHeader) -> PipelineError {
        let consumer_count = header.consumer_channel_count.load(Ordering::Relaxed) as usize;
        let consumer_capacity = header.consumer_slot_capacity.load(Ordering::Relaxed);
        if consumer_count != self.config.channel_count {
            PipelineError::ChannelCountMismatch { producer: self.config.channel_count, consumer: consumer_count }
        } else if consumer_capacity != self.config.slot_capacity as u64 {
            PipelineError::LayoutMismatch {
                field: "slot_capacity",
                producer: self.config.slot_capacity as u64,
                consumer: consumer_capacity,
            }
        } else {
            PipelineError::resource(
                self.config.control_name(),
                io::Error::new(io::ErrorKind::Other, "consumer failed to attach every channel"),
            )
        }
    }

    /// Run one packer per channel against `queue` until it is finished and
    /// drained and every channel has released its terminal cycle. A named
    /// set first waits for the consumer's verdict; no packer starts unless it
    /// accepted.
    pub fn run_producer(&self, queue: &IntakeQueue) -> Result<ProducerReport> {
        self.await_consumer()?;
        let limits = PackingLimits::from(&self.config);
        let channels = self.run_workers("packer", |channel| ChannelPacker::new(channel, queue, limits).run())?;
        let report = ProducerReport { channels };
        info!(placed = report.placed(), dropped = report.dropped(), handoffs = report.handoffs(), "producer finished");
        Ok(report)
    }

    /// Run one unpacker per channel until each has consumed its channel's
    /// terminal cycle.
    pub fn run_consumer<P, S>(&self, predicate: &P, sink: &S) -> Result<ConsumerReport>
    where
        P: RecordPredicate + Sync + ?Sized,
        S: ResultSink + Sync + ?Sized,
    {
        let channels =
            self.run_workers("unpacker", |channel| ChannelUnpacker::new(channel, predicate, sink).run())?;
        let report = ConsumerReport { channels };
        info!(records = report.records(), matched = report.matched(), "consumer finished");
        Ok(report)
    }

    /// Block until the consumer has handed every slot back, which after
    /// `run_producer` means every terminal cycle was taken.
    pub fn wait_until_drained(&self) -> Result<()> {
        for channel in &self.channels {
            channel.token().wait_for(Side::Producer)?;
        }
        Ok(())
    }

    /// Fail every pending and future acquire on every channel, and a
    /// producer still waiting in [`ChannelSet::await_consumer`].
    pub fn close(&self) {
        if let Some(control) = self.control.as_ref().filter(|c| c.owned) {
            let ack = &control.header().consumer_ack;
            if ack.compare_exchange(ACK_PENDING, ACK_ABANDONED, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                futex_wake_all(ack);
            }
        }
        for channel in &self.channels {
            channel.close();
        }
    }

    fn run_workers<T, F>(&self, role: &'static str, work: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&ChannelPartition) -> Result<T> + Sync,
    {
        let work = &work;
        thread::scope(|s| {
            let spawned: Vec<_> = self
                .channels
                .iter()
                .map(|channel| {
                    let handle = thread::Builder::new()
                        .name(format!("{role}-{}", channel.index()))
                        .spawn_scoped(s, move || {
                            let res = work(channel);
                            if let Err(e) = &res {
                                error!(role, channel = channel.index(), error = %e, "worker failed");
                                // the peer may be parked on this token
                                channel.close();
                            }
                            res
                        });
                    (channel, handle)
                })
                .collect();

            let mut outcomes = Vec::with_capacity(spawned.len());
            let mut first_err = None;
            for (channel, handle) in spawned {
                let res = match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|_| {
                        error!(role, channel = channel.index(), "worker panicked");
                        channel.close();
                        Err(PipelineError::WorkerPanicked { role, channel: channel.index() })
                    }),
                    Err(e) => {
                        channel.close();
                        Err(PipelineError::resource(format!("{role}-{}", channel.index()), e))
                    }
                };
                match res {
                    Ok(stats) => outcomes.push(stats),
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(outcomes),
            }
        })
    }
}

fn check_handshake(control: &ControlRegion, config: &PipelineConfig) -> Result<()> {
    let header = control.header();
    if header.ready.load(Ordering::Acquire) != 1 {
        return Err(PipelineError::resource(
            control.name.clone(),
            io::Error::new(io::ErrorKind::WouldBlock, "producer has not finished creating channels"),
        ));
    }
    if header.magic != CONTROL_MAGIC {
        return Err(PipelineError::LayoutMismatch { field: "magic", producer: header.magic, consumer: CONTROL_MAGIC });
    }
    if header.version != LAYOUT_VERSION {
        return Err(PipelineError::LayoutMismatch {
            field: "version",
            producer: header.version as u64,
            consumer: LAYOUT_VERSION as u64,
        });
    }
    if header.channel_count as usize != config.channel_count {
        return Err(PipelineError::ChannelCountMismatch {
            producer: header.channel_count as usize,
            consumer: config.channel_count,
        });
    }
    if header.slot_capacity != config.slot_capacity as u64 {
        return Err(PipelineError::LayoutMismatch {
            field: "slot_capacity",
            producer: header.slot_capacity,
            consumer: config.slot_capacity as u64,
        });
    }
    Ok(())
}
