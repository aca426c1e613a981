//! WAV container sink using hound

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use super::{FrameSink, SinkError, BITS_PER_SAMPLE, CHANNELS};
use crate::pcm::PackedFrame;

fn stereo_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    }
}

/// 16-bit stereo WAV writer. Dropping without `finalize` still patches the
/// header, but errors are then lost.
pub struct WavSink<W: Write + Seek> {
    writer: Option<WavWriter<W>>,
}

impl WavSink<BufWriter<File>> {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, SinkError> {
        let file = BufWriter::new(File::create(path)?);
        Self::new(file, sample_rate)
    }
}

impl<W: Write + Seek> WavSink<W> {
    pub fn new(inner: W, sample_rate: u32) -> Result<Self, SinkError> {
        let writer = WavWriter::new(inner, stereo_spec(sample_rate))?;
        Ok(Self {
            writer: Some(writer),
        })
    }
}

impl<W: Write + Seek> FrameSink for WavSink<W> {
    fn write_frame(&mut self, frame: &PackedFrame) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Finalized)?;
        let [left, right] = frame.samples();
        writer.write_sample(left)?;
        writer.write_sample(right)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        match self.writer.take() {
            Some(writer) => Ok(writer.finalize()?),
            None => Ok(()),
        }
    }
}
