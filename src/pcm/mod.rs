//! PCM output packing

mod pack;

pub use pack::{Overflow, PackedFrame, Packer, Scaling};
