//! Amplitude rescaling and little-endian frame packing
//!
//! The capture ADC is 12-bit with its zero level at mid-scale, so rescale
//! mode maps `raw` to `(raw - 2048) * 16` as signed 16-bit PCM. Passthrough
//! mode writes the raw words unchanged.

use thiserror::Error;
use tracing::warn;

use crate::stream::SamplePair;

/// Nominal zero of the 12-bit capture domain
const MID_SCALE: i32 = 2048;

/// 12-bit to 16-bit gain
const RESCALE_GAIN: i32 = 16;

/// Values at or above this are outside the expected capture domain
pub const CAPTURE_CEILING: u16 = 4095;

/// Amplitude handling of decoded words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    /// `(raw - 2048) * 16` as signed 16-bit
    Rescale,
    /// Raw words as unsigned 16-bit
    Passthrough,
}

/// What to do when a rescaled value does not fit in `i16`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Two's-complement wraparound
    Wrap,
    /// Reject the frame with a [`PackError`]
    Strict,
}

/// Per-frame packing failure; the frame is dropped, the stream continues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PackError {
    #[error("rescaled frame ({left}, {right}) does not fit in signed 16-bit")]
    DoesNotFit {
        left: i32,
        right: i32,
        /// Source pair was also at or above the capture ceiling
        out_of_range: bool,
    },
}

impl PackError {
    /// Whether the rejected pair was also an out-of-range anomaly
    pub fn out_of_range(&self) -> bool {
        match self {
            PackError::DoesNotFit { out_of_range, .. } => *out_of_range,
        }
    }
}

/// One stereo frame ready for a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedFrame {
    bytes: [u8; 4],
    out_of_range: bool,
}

impl PackedFrame {
    /// Interleaved little-endian bytes: left low, left high, right low, right high
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.bytes
    }

    /// Both channels as signed samples (bit-for-bit in passthrough mode)
    pub fn samples(&self) -> [i16; 2] {
        [
            i16::from_le_bytes([self.bytes[0], self.bytes[1]]),
            i16::from_le_bytes([self.bytes[2], self.bytes[3]]),
        ]
    }

    /// Whether the source pair exceeded the capture ceiling
    pub fn out_of_range(&self) -> bool {
        self.out_of_range
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.bytes)
    }
}

/// Packs sample pairs according to the configured scaling
#[derive(Debug, Clone, Copy)]
pub struct Packer {
    scaling: Scaling,
    overflow: Overflow,
}

impl Packer {
    pub fn new(scaling: Scaling, overflow: Overflow) -> Self {
        Self { scaling, overflow }
    }

    /// Pack one pair.
    ///
    /// In rescale mode a pair at or above the capture ceiling is reported on
    /// the log and still packed.
    pub fn pack(&self, pair: SamplePair) -> Result<PackedFrame, PackError> {
        match self.scaling {
            Scaling::Passthrough => {
                let [l0, l1] = pair.left.to_le_bytes();
                let [r0, r1] = pair.right.to_le_bytes();
                Ok(PackedFrame {
                    bytes: [l0, l1, r0, r1],
                    out_of_range: false,
                })
            }
            Scaling::Rescale => {
                let out_of_range =
                    pair.left >= CAPTURE_CEILING || pair.right >= CAPTURE_CEILING;
                if out_of_range {
                    warn!(
                        left = pair.left,
                        right = pair.right,
                        "Sample outside capture range"
                    );
                }

                let left = rescale(pair.left);
                let right = rescale(pair.right);
                let (left, right) = match self.overflow {
                    Overflow::Wrap => (left as i16, right as i16),
                    Overflow::Strict => match (i16::try_from(left), i16::try_from(right)) {
                        (Ok(l), Ok(r)) => (l, r),
                        _ => {
                            return Err(PackError::DoesNotFit {
                                left,
                                right,
                                out_of_range,
                            })
                        }
                    },
                };

                let [l0, l1] = left.to_le_bytes();
                let [r0, r1] = right.to_le_bytes();
                Ok(PackedFrame {
                    bytes: [l0, l1, r0, r1],
                    out_of_range,
                })
            }
        }
    }
}

fn rescale(raw: u16) -> i32 {
    (raw as i32 - MID_SCALE) * RESCALE_GAIN
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Collects the channel values of WARN events
    #[derive(Clone, Default)]
    struct WarnRecorder(Arc<Mutex<Vec<(u64, u64)>>>);

    #[derive(Default)]
    struct ChannelFields {
        left: Option<u64>,
        right: Option<u64>,
    }

    impl Visit for ChannelFields {
        fn record_u64(&mut self, field: &Field, value: u64) {
            match field.name() {
                "left" => self.left = Some(value),
                "right" => self.right = Some(value),
                _ => {}
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
    }

    impl<S: Subscriber> Layer<S> for WarnRecorder {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() != Level::WARN {
                return;
            }
            let mut fields = ChannelFields::default();
            event.record(&mut fields);
            if let (Some(left), Some(right)) = (fields.left, fields.right) {
                self.0.lock().unwrap().push((left, right));
            }
        }
    }

    fn warnings_during<F: FnOnce()>(f: F) -> Vec<(u64, u64)> {
        let recorder = WarnRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        tracing::subscriber::with_default(subscriber, f);
        let warnings = recorder.0.lock().unwrap().clone();
        warnings
    }

    fn rescaled(left: u16, right: u16) -> PackedFrame {
        Packer::new(Scaling::Rescale, Overflow::Wrap)
            .pack(SamplePair::new(left, right))
            .unwrap()
    }

    #[test]
    fn test_rescale_mid_scale_and_floor() {
        let frame = rescaled(2048, 0);
        assert_eq!(frame.samples(), [0, -32768]);
        assert_eq!(frame.as_bytes(), &[0x00, 0x00, 0x00, 0x80]);
        assert!(!frame.out_of_range());
    }

    #[test]
    fn test_rescale_ceiling_flags_anomaly() {
        let frame = rescaled(4095, 2048);
        assert_eq!(frame.samples(), [((4095 - 2048) * 16) as i16, 0]);
        assert_eq!(frame.samples()[0], 32752);
        assert!(frame.out_of_range());

        assert!(!rescaled(4094, 4094).out_of_range());
        assert!(rescaled(100, 4095).out_of_range());
    }

    #[test]
    fn test_ceiling_logs_channel_values() {
        let warnings = warnings_during(|| {
            rescaled(4095, 2048);
        });
        assert_eq!(warnings, vec![(4095, 2048)]);

        let warnings = warnings_during(|| {
            rescaled(2048, 0);
            rescaled(4094, 4094);
        });
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_strict_rejection_still_logs_anomaly() {
        let packer = Packer::new(Scaling::Rescale, Overflow::Strict);
        let warnings = warnings_during(|| {
            assert!(packer.pack(SamplePair::new(0x1000, 0x0800)).is_err());
        });
        assert_eq!(warnings, vec![(0x1000, 0x0800)]);
    }

    #[test]
    fn test_passthrough_logs_nothing() {
        let packer = Packer::new(Scaling::Passthrough, Overflow::Wrap);
        let warnings = warnings_during(|| {
            packer.pack(SamplePair::new(0xFFFE, 5000)).unwrap();
        });
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_rescale_wraps_beyond_domain() {
        // (4096 - 2048) * 16 = 32768 wraps to -32768
        let frame = rescaled(4096, 0xFFFE);
        assert_eq!(frame.samples()[0], i16::MIN);
        assert_eq!(frame.samples()[1], ((0xFFFE_i32 - 2048) * 16) as i16);
        assert!(frame.out_of_range());
    }

    #[test]
    fn test_strict_rejects_overflow() {
        let packer = Packer::new(Scaling::Rescale, Overflow::Strict);
        assert_eq!(
            packer.pack(SamplePair::new(4096, 2048)),
            Err(PackError::DoesNotFit {
                left: 32768,
                right: 0,
                out_of_range: true,
            })
        );
        // 4095 still fits
        assert!(packer.pack(SamplePair::new(4095, 0)).is_ok());
    }

    #[test]
    fn test_passthrough_bytes() {
        let packer = Packer::new(Scaling::Passthrough, Overflow::Strict);
        let frame = packer.pack(SamplePair::new(0x1234, 0x5678)).unwrap();
        assert_eq!(frame.as_bytes(), &[0x34, 0x12, 0x78, 0x56]);
        assert_eq!(frame.to_hex(), "34127856");
        assert!(!frame.out_of_range());
    }

    #[test]
    fn test_passthrough_ignores_ceiling() {
        let packer = Packer::new(Scaling::Passthrough, Overflow::Wrap);
        let frame = packer.pack(SamplePair::new(0xFFFE, 5000)).unwrap();
        assert_eq!(frame.as_bytes(), &[0xFE, 0xFF, 0x88, 0x13]);
        assert!(!frame.out_of_range());
    }
}
