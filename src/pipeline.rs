//! Sequential capture pipeline: synchronize, de-interleave, pack, write
//!
//! Per-frame anomalies are logged and counted without stopping the stream;
//! read and write failures abort the run.

use anyhow::{Context, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::pcm::Packer;
use crate::sink::FrameSink;
use crate::stream::{synchronize, Decoder};

/// Statistics for a capture run (atomic for reading from other threads)
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub bytes_discarded: AtomicU64,
    pub sentinels_skipped: AtomicU64,
    pub words_decoded: AtomicU64,
    pub pairs_decoded: AtomicU64,
    pub frames_written: AtomicU64,
    pub out_of_range: AtomicU64,
    pub pack_failures: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            sentinels_skipped: self.sentinels_skipped.load(Ordering::Relaxed),
            words_decoded: self.words_decoded.load(Ordering::Relaxed),
            pairs_decoded: self.pairs_decoded.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
            pack_failures: self.pack_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_discarded: u64,
    pub sentinels_skipped: u64,
    pub words_decoded: u64,
    pub pairs_decoded: u64,
    pub frames_written: u64,
    pub out_of_range: u64,
    pub pack_failures: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frames: {} written / {} decoded | Words: {} | Sentinels: {}",
            self.frames_written, self.pairs_decoded, self.words_decoded, self.sentinels_skipped
        )?;
        write!(
            f,
            " | Out of range: {} | Pack failures: {} | Discarded before sync: {}",
            self.out_of_range, self.pack_failures, self.bytes_discarded
        )
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stream ended before any sentinel was seen
    NoSentinel,
    /// Stream ended after synchronization
    EndOfStream,
    /// Configured frame limit reached
    FrameLimit,
    /// Stop requested through the running flag
    Stopped,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub reason: StopReason,
    /// Stream ended inside a word or between the halves of a pair
    pub truncated: bool,
    pub stats: StatsSnapshot,
}

/// Capture pipeline controller
pub struct Pipeline {
    packer: Packer,
    max_frames: Option<u64>,
    stats_interval: Duration,
    running: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl Pipeline {
    pub fn new(packer: Packer) -> Self {
        Self {
            packer,
            max_frames: None,
            stats_interval: Duration::from_secs(5),
            running: Arc::new(AtomicBool::new(true)),
            stats: CaptureStats::new(),
        }
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Flag checked between frames; clearing it ends the run cleanly
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Decode `reader` into `sink` until the stream ends, the frame limit is
    /// reached or a stop is requested. The sink is finalized on every
    /// non-error exit.
    pub fn run<R, S>(&self, mut reader: R, sink: &mut S) -> Result<RunSummary>
    where
        R: Read,
        S: FrameSink + ?Sized,
    {
        let synced = synchronize(&mut reader).context("Failed to read capture stream")?;

        let Some(synced) = synced else {
            warn!("Capture stream ended before the first sentinel, nothing decoded");
            sink.finalize().context("Failed to finalize output")?;
            return Ok(RunSummary {
                reason: StopReason::NoSentinel,
                truncated: false,
                stats: self.stats.snapshot(),
            });
        };

        self.stats
            .bytes_discarded
            .store(synced.discarded(), Ordering::Relaxed);
        info!(
            "Synchronized on capture stream ({} bytes discarded)",
            synced.discarded()
        );

        let mut decoder = Decoder::new(reader);
        let mut reason = StopReason::EndOfStream;
        let mut frames_written = 0u64;
        let mut first_pair = true;
        let mut last_stats_time = Instant::now();
        let mut last_frame_count = 0u64;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                info!("Stop requested, closing capture");
                reason = StopReason::Stopped;
                break;
            }

            if self.max_frames.is_some_and(|max| frames_written >= max) {
                info!("Frame limit reached ({} frames)", frames_written);
                reason = StopReason::FrameLimit;
                break;
            }

            let pair = match decoder.next() {
                Some(Ok(pair)) => pair,
                Some(Err(e)) => return Err(e).context("Failed to read capture stream"),
                None => break,
            };

            self.stats.pairs_decoded.fetch_add(1, Ordering::Relaxed);
            if first_pair {
                info!("First sample pair decoded: L={} R={}", pair.left, pair.right);
                first_pair = false;
            }

            match self.packer.pack(pair) {
                Ok(frame) => {
                    if frame.out_of_range() {
                        self.stats.out_of_range.fetch_add(1, Ordering::Relaxed);
                    }
                    trace!("Frame {}", frame.to_hex());
                    sink.write_frame(&frame).context("Failed to write frame")?;
                    frames_written += 1;
                    self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    if e.out_of_range() {
                        self.stats.out_of_range.fetch_add(1, Ordering::Relaxed);
                    }
                    self.stats.pack_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(left = pair.left, right = pair.right, "Dropping frame: {}", e);
                }
            }

            self.record_decoder(&decoder);

            if last_stats_time.elapsed() >= self.stats_interval {
                let snapshot = self.stats.snapshot();
                let elapsed = last_stats_time.elapsed().as_secs_f32();
                let rate = (snapshot.frames_written - last_frame_count) as f32 / elapsed;
                info!("[Capture Stats] Rate: {:.0} frames/s | {}", rate, snapshot);
                last_stats_time = Instant::now();
                last_frame_count = snapshot.frames_written;
            }
        }

        self.record_decoder(&decoder);
        let truncated = decoder.truncated();
        if truncated {
            debug!("Capture stream ended mid-frame, partial frame dropped");
        }

        sink.finalize().context("Failed to finalize output")?;

        Ok(RunSummary {
            reason,
            truncated,
            stats: self.stats.snapshot(),
        })
    }

    fn record_decoder<R: Read>(&self, decoder: &Decoder<R>) {
        let state = decoder.state();
        self.stats
            .sentinels_skipped
            .store(state.sentinels(), Ordering::Relaxed);
        self.stats
            .words_decoded
            .store(state.words(), Ordering::Relaxed);
    }
}
