// Producer side of a named pipeline. Start this first, then `consumer`
// with the same channel count and prefix.
//
//   cargo run --example producer -- --channels 4 --generate 10000
//   cargo run --example producer -- --channels 4 --input words.txt
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use sha2::{Digest, Sha256};
use slotpipe::Intake::{feed_lines, feed_reader};
use slotpipe::{ChannelSet, IntakeQueue, PipelineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Pack text records into shared memory slots")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of channels (overrides the configuration file)
    #[arg(long)]
    channels: Option<usize>,

    /// Shared memory name prefix (overrides the configuration file)
    #[arg(long)]
    prefix: Option<String>,

    /// Read records from this file, one per line
    #[arg(long)]
    input: Option<PathBuf>,

    /// Generate this many hash records instead of reading a file
    #[arg(long, default_value_t = 1000)]
    generate: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::new(),
    };
    if let Some(n) = args.channels {
        cfg = cfg.with_channel_count(n);
    }
    if let Some(prefix) = args.prefix {
        cfg = cfg.with_name_prefix(prefix);
    }

    let set = Arc::new(ChannelSet::create(cfg.clone())?);
    let queue = Arc::new(IntakeQueue::new(cfg.max_record_len));
    println!("Producer: created {} channels under /dev/shm/{}-*", set.channel_count(), cfg.name_prefix);

    // First Ctrl+C stops the input; a second one abandons the consumer. The
    // handler holds a weak reference so an early return still unlinks.
    {
        let set = Arc::downgrade(&set);
        let queue = Arc::clone(&queue);
        ctrlc::set_handler(move || {
            if !queue.is_finished() {
                queue.mark_finished();
            } else if let Some(set) = set.upgrade() {
                set.close();
            }
        })
        .expect("Error setting Ctrl+C handler");
    }

    let input = args.input.as_ref().map(File::open).transpose()?.map(BufReader::new);

    println!("Producer: waiting for a consumer to attach...");
    let start = std::time::Instant::now();
    let (fed, report) = thread::scope(|s| {
        let source = s.spawn(|| match input {
            Some(reader) => feed_reader(&queue, reader),
            None => Ok(feed_lines(&queue, (0..args.generate).map(hashed_record))),
        });
        let report = set.run_producer(&queue);
        (source.join().expect("source thread panicked"), report)
    });
    let fed = fed?;
    let report = report?;

    println!(
        "Producer: {} accepted, {} dropped, {} hand-offs in {:.2?}",
        fed.accepted,
        fed.dropped + report.dropped(),
        report.handoffs(),
        start.elapsed()
    );
    println!("Producer: waiting for consumers to drain (Ctrl+C to give up)...");
    set.wait_until_drained()?;
    println!("Producer: done");
    Ok(())
}

/// "message_number:sha256(message_i)"
fn hashed_record(i: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("message_{}", i).as_bytes());
    format!("{}:{:x}", i, hasher.finalize())
}
