//! Capture stream de-framing
//!
//! The capture firmware emits little-endian 16-bit sample words, left and
//! right interleaved, with `0xFF 0xFF` written between packets:
//! 1. Discard bytes until the first sentinel pair (synchronization)
//! 2. Read two-byte units, dropping any unit equal to the sentinel
//! 3. Alternate remaining words between the left and right channel
//! 4. Emit a stereo pair every time the right channel is filled

mod deinterleave;
mod sync;

pub use deinterleave::{Decoder, SamplePair};
pub use sync::synchronize;

/// Packet delimiter written by the capture firmware
pub const SENTINEL: [u8; 2] = [0xFF, 0xFF];

/// Marker byte that makes up the sentinel
pub const SENTINEL_BYTE: u8 = 0xFF;
