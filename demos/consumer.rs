// Consumer side of a named pipeline: prints every record containing the
// pattern.
//
//   cargo run --example consumer -- --channels 4 --pattern ab12
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use slotpipe::{ChannelSet, Contains, PipelineConfig, PipelineError};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Unpack text records from shared memory slots and filter them")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of channels; must match the producer
    #[arg(long)]
    channels: Option<usize>,

    /// Shared memory name prefix (overrides the configuration file)
    #[arg(long)]
    prefix: Option<String>,

    /// Substring a record must contain to be printed
    #[arg(long, default_value = "")]
    pattern: String,

    /// Seconds to wait for the producer to appear
    #[arg(long, default_value_t = 5)]
    wait: u64,
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

    println!("Consumer: waiting for {}-ctl...", cfg.name_prefix);
    let deadline = Instant::now() + Duration::from_secs(args.wait);
    let set = loop {
        match ChannelSet::open(cfg.clone()) {
            Ok(set) => break set,
            // producer not there yet, or still creating channels
            Err(PipelineError::Resource { .. }) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(e.into()),
        }
    };
    println!("Consumer: attached {} channels", set.channel_count());

    let print_matches = |channel: usize, text: &str, matched: bool| {
        if matched {
            println!("[{channel}] {text}");
        }
    };

    let start = Instant::now();
    let report = set.run_consumer(&Contains::new(args.pattern), &print_matches)?;
    let elapsed = start.elapsed();

    println!("{}", "=".repeat(80));
    println!(
        "Consumer: {} records, {} matched, {} corrupt cycles in {:.2?}",
        report.records(),
        report.matched(),
        report.format_errors(),
        elapsed
    );
    println!("Average: {:.2} records/second", report.records() as f64 / elapsed.as_secs_f64());
    Ok(())
}
