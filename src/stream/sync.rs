//! Initial alignment on the capture stream
//!
//! The capture may start anywhere inside a packet, so everything before the
//! first `0xFF 0xFF` pair is thrown away. A lone `0xFF` is ordinary sample
//! data and only resets the search.

use std::io::{self, Read};
use tracing::debug;

use super::SENTINEL_BYTE;

/// Number of discarded bytes kept for the debug dump
const PREVIEW_LEN: usize = 16;

/// Result of a successful synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Synchronized {
    /// Bytes consumed before the cursor, sentinel included
    pub consumed: u64,
}

impl Synchronized {
    /// Bytes thrown away ahead of the sentinel
    pub fn discarded(&self) -> u64 {
        self.consumed - 2
    }
}

/// Consume bytes until the first sentinel pair.
///
/// Returns `Ok(None)` if the stream ends first; that is a normal empty
/// capture, not an error. On success the reader sits on the first byte after
/// the sentinel.
pub fn synchronize<R: Read>(reader: &mut R) -> io::Result<Option<Synchronized>> {
    let mut consumed = 0u64;
    let mut previous_was_marker = false;
    let mut preview = Vec::with_capacity(PREVIEW_LEN);
    let mut byte = [0u8; 1];

    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                debug!("Stream ended after {} bytes without a sentinel", consumed);
                return Ok(None);
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        consumed += 1;
        if preview.len() < PREVIEW_LEN {
            preview.push(byte[0]);
        }

        if byte[0] != SENTINEL_BYTE {
            previous_was_marker = false;
            continue;
        }

        if previous_was_marker {
            let synced = Synchronized { consumed };
            debug!(
                "Synchronized after discarding {} bytes (head: {})",
                synced.discarded(),
                hex::encode(&preview)
            );
            return Ok(Some(synced));
        }

        // Isolated 0xFF so far, may still open the real sentinel
        previous_was_marker = true;
    }
}
