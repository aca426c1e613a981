//! KVM Audio Capture - serial sample stream to stereo PCM
//!
//! Reads the raw capture stream produced by the KVM audio firmware,
//! locks onto its `0xFF 0xFF` packet delimiters, de-interleaves the left and
//! right 16-bit words and writes them as a WAV file or a raw PCM pipe.

mod config;
mod pcm;
mod pipeline;
mod sink;
mod source;
mod stream;

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use pcm::Packer;
use pipeline::{Pipeline, RunSummary, StopReason};

/// Exit status after an abandoned capture (128 + SIGINT)
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// How the capture worker ended
enum Supervision {
    Finished(RunSummary),
    /// Second interrupt while the worker was still blocked
    Abandoned,
}

/// Wait for the capture worker. The first interrupt asks it to stop at the
/// next frame; a second one gives up on it.
async fn supervise(
    mut worker: JoinHandle<Result<RunSummary>>,
    running: Arc<AtomicBool>,
    mut interrupts: mpsc::UnboundedReceiver<()>,
) -> Result<Supervision> {
    tokio::select! {
        result = &mut worker => {
            return Ok(Supervision::Finished(result.context("Capture thread panicked")??));
        }
        Some(()) = interrupts.recv() => {
            info!("Ctrl+C received, finishing current frame (press again to abort)...");
            running.store(false, Ordering::SeqCst);
        }
    }

    tokio::select! {
        result = &mut worker => {
            Ok(Supervision::Finished(result.context("Capture thread panicked")??))
        }
        Some(()) = interrupts.recv() => {
            warn!("Second Ctrl+C, abandoning blocked capture read");
            Ok(Supervision::Abandoned)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so raw output can own stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("===========================================");
    info!("   KVM Audio Capture");
    info!("   serial stream -> stereo PCM");
    info!("===========================================");

    let config = Config::from_env().context("Invalid configuration")?;

    info!("Configuration:");
    info!("  Input: {:?}", config.input);
    if let Some(baud) = config.serial_baud {
        info!("  Serial baud: {}", baud);
    }
    info!("  Output: {:?} ({:?})", config.output_path, config.output_format);
    info!("  Scaling: {:?} (overflow: {:?})", config.scaling, config.overflow);
    info!("  Sample rate: {} Hz", config.sample_rate);
    if let Some(max) = config.max_frames {
        info!("  Frame limit: {}", max);
    }

    let input = config.input.open(config.serial_baud)?;
    let mut sink = sink::open_sink(config.output_format, &config.output_path, config.sample_rate)?;

    let pipeline = Pipeline::new(Packer::new(config.scaling, config.overflow))
        .with_max_frames(config.max_frames)
        .with_stats_interval(config.stats_interval);
    let running = pipeline.running_flag();

    info!("===========================================");
    info!("  Starting capture...");
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    // Decoding is strictly sequential; it runs on one blocking thread while
    // this task watches for Ctrl+C
    let worker = tokio::task::spawn_blocking(move || pipeline.run(input, sink.as_mut()));

    let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });

    let summary = match supervise(worker, running, interrupt_rx).await? {
        Supervision::Finished(summary) => summary,
        Supervision::Abandoned => {
            // The blocked worker still owns the sink, so the output is not finalized
            error!("Capture aborted, output may be incomplete");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    };

    match summary.reason {
        StopReason::NoSentinel => warn!("No packet sentinel found, output is empty"),
        StopReason::EndOfStream => info!("Capture stream ended"),
        StopReason::FrameLimit => info!("Capture duration reached"),
        StopReason::Stopped => info!("Capture stopped"),
    }
    if summary.truncated {
        info!("Trailing partial frame dropped");
    }

    info!("Shutdown complete. {}", summary.stats);
    Ok(())
}
