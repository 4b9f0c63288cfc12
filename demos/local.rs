// Whole pipeline in one process, with heap slots in place of /dev/shm.
//
//   cargo run --example local -- --channels 4 --pattern the < input.txt
use std::io::{self, BufRead};

use clap::Parser;
use slotpipe::{run_local, Contains, PipelineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Filter stdin through an in-process slot pipeline")]
struct Args {
    #[arg(long, default_value_t = 1)]
    channels: usize,

    #[arg(long)]
    pattern: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let cfg = PipelineConfig::new().with_channel_count(args.channels);

    let lines = io::stdin().lock().lines().map_while(Result::ok).collect::<Vec<_>>();
    let print = |channel: usize, text: &str, matched: bool| {
        if matched {
            println!("[{channel}] {text}");
        }
    };
    let report = run_local(&cfg, &cfg, lines, &Contains::new(args.pattern), &print)?;

    eprintln!(
        "{} accepted, {} dropped, {} delivered, {} matched",
        report.feed.accepted,
        report.feed.dropped + report.producer.dropped(),
        report.consumer.records(),
        report.consumer.matched()
    );
    Ok(())
}
