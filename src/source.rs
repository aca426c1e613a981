//! Capture input: standard input, a file or tty device, or a spawned
//! capture command whose stdout carries the raw stream.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use tracing::{info, warn};

/// Read buffer for the capture stream
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Where the raw capture stream comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    Path(PathBuf),
    Command { program: String, args: Vec<String> },
}

impl InputSource {
    /// Build a command source from a whitespace-separated command line
    pub fn command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::Command {
            program,
            args: parts.collect(),
        })
    }

    /// Open the source for sequential reading. `serial_baud` configures a
    /// path source as a raw tty first.
    pub fn open(&self, serial_baud: Option<u32>) -> Result<CaptureInput> {
        match self {
            InputSource::Stdin => {
                info!("Reading capture stream from stdin");
                Ok(CaptureInput::new(Box::new(io::stdin()), None))
            }
            InputSource::Path(path) => {
                if let Some(baud) = serial_baud {
                    configure_serial(path, baud)?;
                }
                info!("Reading capture stream from {:?}", path);
                let file = File::open(path)
                    .with_context(|| format!("Failed to open capture input {:?}", path))?;
                Ok(CaptureInput::new(Box::new(file), None))
            }
            InputSource::Command { program, args } => spawn_capture(program, args),
        }
    }
}

/// Put a serial device into raw mode at the given rate
fn configure_serial(path: &Path, baud: u32) -> Result<()> {
    let mut cmd = Command::new("stty");
    cmd.arg("-F")
        .arg(path)
        .arg(baud.to_string())
        .arg("raw")
        .arg("-echo");

    info!("Configuring serial port: {:?}", cmd);

    let output = cmd
        .output()
        .context("Failed to run stty. Make sure coreutils is installed")?;
    if !output.status.success() {
        bail!(
            "stty failed for {:?} ({}): {}",
            path,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

fn spawn_capture(program: &str, args: &[String]) -> Result<CaptureInput> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

    info!("Executing: {:?}", cmd);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn capture command {}", program))?;

    let stdout = child
        .stdout
        .take()
        .context("Failed to capture command stdout")?;

    // Forward the capture tool's diagnostics to our log
    if let Some(stderr) = child.stderr.take() {
        let name = program.to_string();
        thread::Builder::new()
            .name("capture-stderr".to_string())
            .spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    if !line.trim().is_empty() {
                        info!("[{}] {}", name, line.trim());
                    }
                }
            })
            .context("Failed to spawn stderr reader thread")?;
    }

    Ok(CaptureInput::new(Box::new(stdout), Some(child)))
}

/// Buffered capture stream; owns the child process, if any, and stops it on drop
pub struct CaptureInput {
    reader: BufReader<Box<dyn Read + Send>>,
    child: Option<Child>,
}

impl CaptureInput {
    fn new(inner: Box<dyn Read + Send>, child: Option<Child>) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, inner),
            child,
        }
    }
}

impl Read for CaptureInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Drop for CaptureInput {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) if !status.success() => {
                    warn!("Capture command exited with {}", status);
                }
                Ok(Some(_)) => {}
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}
