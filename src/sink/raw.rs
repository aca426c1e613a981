//! Headerless sink for piping frames to another process

use std::io::{BufWriter, Write};

use super::{FrameSink, SinkError};
use crate::pcm::PackedFrame;

pub struct RawSink<W: Write> {
    writer: BufWriter<W>,
    finalized: bool,
}

impl<W: Write> RawSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::new(inner),
            finalized: false,
        }
    }
}

impl<W: Write> FrameSink for RawSink<W> {
    fn write_frame(&mut self, frame: &PackedFrame) -> Result<(), SinkError> {
        if self.finalized {
            return Err(SinkError::Finalized);
        }
        self.writer.write_all(frame.as_bytes())?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        self.finalized = true;
        self.writer.flush()?;
        Ok(())
    }
}
