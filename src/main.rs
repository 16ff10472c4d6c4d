use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fanout_pipeline::{
    CipherKey, Collaborators, LetterTally, PipelineBuilder, PipelineConfig, ReaderSource,
    ResetScheduler, ShiftCipher, Tally, WriterSink, MIN_CAPACITY,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fanout-pipeline")]
#[command(about = "Shift-cipher a file through a five-stage counting pipeline")]
struct Cli {
    /// File to read units from
    input: PathBuf,

    /// File the transformed units are written to
    output: PathBuf,

    /// File letter counts are logged to
    log: PathBuf,

    /// Input buffer capacity (prompted for when omitted)
    #[arg(long)]
    input_buffer: Option<usize>,

    /// Output buffer capacity (prompted for when omitted)
    #[arg(long)]
    output_buffer: Option<usize>,

    /// Initial cipher shift
    #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
    key: i32,

    /// Pause, log counts, reset them and rotate the key this often
    #[arg(long)]
    reset_interval_ms: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let source = ReaderSource::open(&cli.input)
        .with_context(|| format!("open input file {}", cli.input.display()))?;
    let sink = WriterSink::create(&cli.output)
        .with_context(|| format!("create output file {}", cli.output.display()))?;
    let log = File::create(&cli.log)
        .with_context(|| format!("create log file {}", cli.log.display()))?;

    let config = PipelineConfig::new(
        capacity_or_prompt(cli.input_buffer, "Enter input buffer size (N > 1): ")?,
        capacity_or_prompt(cli.output_buffer, "Enter output buffer size (M > 1): ")?,
    );
    config.validate()?;
    info!(
        input_capacity = config.input_capacity,
        output_capacity = config.output_capacity,
        "buffer sizes"
    );

    let key = Arc::new(CipherKey::new(cli.key));
    let tally = Arc::new(LetterTally::new(log));

    let pipeline = PipelineBuilder::from_config(config).build::<u8>()?;
    let running = pipeline.start(Collaborators::new(
        source,
        ShiftCipher::new(Arc::clone(&key)),
        Arc::clone(&tally),
        sink,
    ))?;

    let scheduler = match cli.reset_interval_ms {
        Some(ms) => {
            let tally = Arc::clone(&tally);
            let key = Arc::clone(&key);
            Some(ResetScheduler::spawn(
                running.control(),
                Duration::from_millis(ms),
                move || {
                    tally.reset();
                    let next = key.rotate();
                    info!(key = next, "counts reset, key rotated");
                },
            )?)
        }
        None => None,
    };

    let outcome = running.wait();
    if let Some(scheduler) = scheduler {
        match scheduler.stop() {
            Ok(resets) => info!(resets, "reset scheduler stopped"),
            Err(err) => warn!(error = %err, "reset scheduler failed"),
        }
    }
    let report = outcome.context("pipeline failed")?;

    println!("End of file reached.");
    tally.snapshot_counts()?;
    info!("{}", report.summary());
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn capacity_or_prompt(flag: Option<usize>, prompt: &str) -> Result<usize> {
    if let Some(capacity) = flag {
        return Ok(capacity);
    }

    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    let capacity: usize = line
        .trim()
        .parse()
        .with_context(|| format!("invalid buffer size {:?}", line.trim()))?;
    if capacity < MIN_CAPACITY {
        bail!("buffer size must be greater than 1, got {capacity}");
    }
    Ok(capacity)
}
