//! Configuration loaded from environment variables

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::pcm::{Overflow, Scaling};
use crate::sink::OutputFormat;
use crate::source::InputSource;

/// Frame rate of the capture firmware
const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw capture stream source
    pub input: InputSource,

    /// Baud rate applied to a tty input before reading
    pub serial_baud: Option<u32>,

    /// Container or raw pipe output
    pub output_format: OutputFormat,

    /// Output path, `-` for stdout
    pub output_path: PathBuf,

    /// Rescale 12-bit capture values or pass raw words through
    pub scaling: Scaling,

    /// Handling of rescaled values that do not fit in 16 bits
    pub overflow: Overflow,

    /// WAV frame rate in Hz
    pub sample_rate: u32,

    /// Stop after this many frames
    pub max_frames: Option<u64>,

    /// Statistics logging interval
    pub stats_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let input = match lookup("CAPTURE_COMMAND").filter(|s| !s.trim().is_empty()) {
            Some(line) => InputSource::command_line(&line)
                .ok_or_else(|| anyhow!("CAPTURE_COMMAND is empty"))?,
            None => match lookup("CAPTURE_INPUT").as_deref() {
                None | Some("-") => InputSource::Stdin,
                Some(path) => InputSource::Path(PathBuf::from(path)),
            },
        };

        let serial_baud = parse_var(&lookup, "SERIAL_BAUD")?;

        let output_format = match lookup("OUTPUT_FORMAT") {
            Some(s) => s
                .parse::<OutputFormat>()
                .map_err(|e| anyhow!("OUTPUT_FORMAT: {}", e))?,
            None => OutputFormat::Wav,
        };

        let output_path = match lookup("CAPTURE_OUTPUT") {
            Some(path) => PathBuf::from(path),
            None => match output_format {
                OutputFormat::Wav => PathBuf::from(format!(
                    "capture-{}.wav",
                    chrono::Utc::now().format("%Y%m%d-%H%M%S")
                )),
                OutputFormat::Raw => PathBuf::from("-"),
            },
        };

        if output_format == OutputFormat::Wav && output_path.as_os_str() == "-" {
            bail!("CAPTURE_OUTPUT=- is only supported with OUTPUT_FORMAT=raw");
        }

        let scaling = match lookup("RESCALE") {
            Some(s) => {
                if parse_flag(&s).context("RESCALE")? {
                    Scaling::Rescale
                } else {
                    Scaling::Passthrough
                }
            }
            None => Scaling::Rescale,
        };

        let overflow = match lookup("OVERFLOW").map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("wrap") => Overflow::Wrap,
            Some("strict") => Overflow::Strict,
            Some(other) => {
                bail!("OVERFLOW: unknown policy '{}' (expected wrap or strict)", other)
            }
        };

        let sample_rate = parse_var(&lookup, "SAMPLE_RATE")?.unwrap_or(DEFAULT_SAMPLE_RATE);
        if sample_rate == 0 {
            bail!("SAMPLE_RATE must be positive");
        }

        let max_frames = parse_var::<_, u64>(&lookup, "CAPTURE_SECONDS")?
            .map(|secs| {
                secs.checked_mul(sample_rate as u64)
                    .ok_or_else(|| anyhow!("CAPTURE_SECONDS: {} is too large", secs))
            })
            .transpose()?;

        let stats_interval = Duration::from_millis(
            parse_var(&lookup, "STATS_INTERVAL_MS")?.unwrap_or(5000),
        );

        Ok(Self {
            input,
            serial_baud,
            output_format,
            output_path,
            scaling,
            overflow,
            sample_rate,
            max_frames,
            stats_interval,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{}: invalid value '{}': {}", key, s, e)),
        None => Ok(None),
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.input, InputSource::Stdin);
        assert_eq!(config.output_format, OutputFormat::Wav);
        assert!(config.output_path.to_string_lossy().starts_with("capture-"));
        assert_eq!(config.scaling, Scaling::Rescale);
        assert_eq!(config.overflow, Overflow::Wrap);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.serial_baud, None);
        assert_eq!(config.max_frames, None);
        assert_eq!(config.stats_interval, Duration::from_millis(5000));
    }

    #[test]
    fn test_raw_pipe_passthrough() {
        let config = load(&[
            ("OUTPUT_FORMAT", "raw"),
            ("RESCALE", "false"),
            ("CAPTURE_INPUT", "/dev/ttyS3"),
            ("SERIAL_BAUD", "3000000"),
        ])
        .unwrap();
        assert_eq!(config.output_format, OutputFormat::Raw);
        assert_eq!(config.output_path, PathBuf::from("-"));
        assert_eq!(config.scaling, Scaling::Passthrough);
        assert_eq!(config.input, InputSource::Path(PathBuf::from("/dev/ttyS3")));
        assert_eq!(config.serial_baud, Some(3_000_000));
    }

    #[test]
    fn test_command_overrides_input() {
        let config = load(&[
            ("CAPTURE_INPUT", "capture.bin"),
            ("CAPTURE_COMMAND", "cat capture.bin"),
        ])
        .unwrap();
        assert!(matches!(
            config.input,
            InputSource::Command { ref program, .. } if program == "cat"
        ));
    }

    #[test]
    fn test_capture_seconds_to_frames() {
        let config = load(&[("CAPTURE_SECONDS", "3"), ("SAMPLE_RATE", "44100")]).unwrap();
        assert_eq!(config.max_frames, Some(3 * 44_100));
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("OUTPUT_FORMAT", "mp3")]).is_err());
        assert!(load(&[("RESCALE", "maybe")]).is_err());
        assert!(load(&[("OVERFLOW", "saturate")]).is_err());
        assert!(load(&[("SAMPLE_RATE", "fast")]).is_err());
        assert!(load(&[("SAMPLE_RATE", "0")]).is_err());
        assert!(load(&[("CAPTURE_OUTPUT", "-")]).is_err());
        // Seconds to frames must not overflow
        assert!(load(&[("CAPTURE_SECONDS", "18446744073709551615")]).is_err());
        assert!(load(&[("CAPTURE_SECONDS", "-1")]).is_err());
    }

    #[test]
    fn test_strict_overflow() {
        let config = load(&[("OVERFLOW", "Strict")]).unwrap();
        assert_eq!(config.overflow, Overflow::Strict);
    }
}
