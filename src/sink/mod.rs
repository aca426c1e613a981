//! Output sinks for packed stereo frames

mod raw;
mod wav;

pub use raw::RawSink;
pub use wav::WavSink;

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::pcm::PackedFrame;

/// Output channel count
pub const CHANNELS: u16 = 2;

/// Output sample width in bits
pub const BITS_PER_SAMPLE: u16 = 16;

/// Destination container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// RIFF/WAVE file with header
    Wav,
    /// Headerless interleaved frames, for piping
    Raw,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" | "wave" => Ok(Self::Wav),
            "raw" | "pcm" => Ok(Self::Raw),
            other => Err(format!(
                "unknown output format '{}' (expected wav or raw)",
                other
            )),
        }
    }
}

/// Sink failures; always fatal to the pipeline
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("WAV writer error: {0}")]
    Wav(#[from] hound::Error),

    #[error("output write failed: {0}")]
    Io(#[from] io::Error),

    #[error("sink already finalized")]
    Finalized,
}

/// Destination for packed frames
pub trait FrameSink {
    /// Append one stereo frame
    fn write_frame(&mut self, frame: &PackedFrame) -> Result<(), SinkError>;

    /// Flush and close; further writes fail with [`SinkError::Finalized`]
    fn finalize(&mut self) -> Result<(), SinkError>;
}

/// Open the configured output. `-` selects standard output (raw only).
pub fn open_sink(
    format: OutputFormat,
    path: &Path,
    sample_rate: u32,
) -> Result<Box<dyn FrameSink + Send>> {
    let to_stdout = path.as_os_str() == "-";

    match format {
        OutputFormat::Wav => {
            if to_stdout {
                bail!("WAV output needs a seekable file, set CAPTURE_OUTPUT to a path");
            }
            info!(
                "Writing WAV to {:?} ({} Hz, {} ch, {} bit)",
                path, sample_rate, CHANNELS, BITS_PER_SAMPLE
            );
            let sink = WavSink::create(path, sample_rate)
                .with_context(|| format!("Failed to create WAV file {:?}", path))?;
            Ok(Box::new(sink))
        }
        OutputFormat::Raw if to_stdout => {
            info!("Writing raw frames to stdout");
            Ok(Box::new(RawSink::new(io::stdout())))
        }
        OutputFormat::Raw => {
            info!("Writing raw frames to {:?}", path);
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file {:?}", path))?;
            Ok(Box::new(RawSink::new(file)))
        }
    }
}
