//! External flashing tool invocation.
//!
//! The bootloader protocol itself lives in the external `mcumgr` client;
//! this module owns spawning it, capturing its output and turning the exit
//! status into something the orchestrator can interpret. The seam is the
//! [`ToolRunner`] trait so orchestration logic can be tested against a
//! mock without a device or an installed tool.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use log::{debug, trace, warn};
use regex::Regex;

use crate::error::{Error, Result};

/// Default baud rate for the mcumgr serial connection.
pub const DEFAULT_TOOL_BAUD: u32 = 115200;

/// Default MTU for the mcumgr serial connection.
pub const DEFAULT_TOOL_MTU: u16 = 128;

/// Default inactivity window before an invocation is considered stuck.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of one external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Process exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr text.
    pub output: String,
}

impl ToolOutput {
    /// Whether the tool reported success.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// A short tail of the output, suitable for diagnostics in messages.
    pub fn excerpt(&self) -> String {
        const MAX_CHARS: usize = 240;

        let trimmed = self.output.trim();
        let chars: Vec<char> = trimmed.chars().collect();
        if chars.len() <= MAX_CHARS {
            trimmed.to_string()
        } else {
            let tail: String = chars[chars.len() - MAX_CHARS..].iter().collect();
            format!("...{tail}")
        }
    }
}

/// Progress report parsed from one upload output line.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    /// Percentage complete, 0.0 to 100.0.
    pub percent: f32,
    /// Transfer speed as reported by the tool (e.g. "10.67 KiB/s").
    pub speed: Option<String>,
}

/// Capability interface over the external flashing tool.
pub trait ToolRunner {
    /// Upload a firmware image to the bootloader on `port`.
    ///
    /// `progress` is called for every output line the tool's progress
    /// format could be parsed from.
    fn upload(
        &self,
        firmware: &Path,
        port: &str,
        progress: &mut dyn FnMut(UploadProgress),
    ) -> Result<ToolOutput>;

    /// Reset the device attached to `port`.
    fn reset(&self, port: &str) -> Result<ToolOutput>;
}

/// Runner invoking the external `mcumgr` executable.
///
/// The command line is constructed deterministically from the firmware
/// path and port; nothing about the invocation depends on ambient state.
#[derive(Debug, Clone)]
pub struct McumgrRunner {
    program: PathBuf,
    baud: u32,
    mtu: u16,
    inactivity_timeout: Duration,
}

impl Default for McumgrRunner {
    fn default() -> Self {
        let program = if cfg!(windows) { "mcumgr.exe" } else { "mcumgr" };
        Self {
            program: PathBuf::from(program),
            baud: DEFAULT_TOOL_BAUD,
            mtu: DEFAULT_TOOL_MTU,
            inactivity_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl McumgrRunner {
    /// Create a runner with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific mcumgr executable instead of the one on `PATH`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the serial connection baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Set the serial connection MTU.
    #[must_use]
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the inactivity window after which a silent tool is killed.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    fn connstring(&self, port: &str) -> String {
        format!("dev={port},baud={},mtu={}", self.baud, self.mtu)
    }

    /// Arguments for an `image upload` invocation.
    #[must_use]
    pub fn upload_args(&self, firmware: &Path, port: &str) -> Vec<OsString> {
        let mut args = self.common_args(port);
        args.push("image".into());
        args.push("upload".into());
        args.push("-e".into());
        args.push(firmware.as_os_str().to_os_string());
        args
    }

    /// Arguments for a `reset` invocation.
    #[must_use]
    pub fn reset_args(&self, port: &str) -> Vec<OsString> {
        let mut args = self.common_args(port);
        args.push("reset".into());
        args
    }

    fn common_args(&self, port: &str) -> Vec<OsString> {
        vec![
            "--conntype=serial".into(),
            format!("--connstring={}", self.connstring(port)).into(),
        ]
    }

    /// Spawn the tool and capture its output line by line.
    ///
    /// The inactivity window restarts whenever a new output line arrives,
    /// so a slow-but-alive upload is not killed while a wedged one is.
    fn run(
        &self,
        args: &[OsString],
        mut progress: Option<&mut dyn FnMut(UploadProgress)>,
    ) -> Result<ToolOutput> {
        debug!("Running {} {args:?}", self.program.display());

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::ToolUnavailable {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take().expect("stdout is piped");
        let mut stderr = child.stderr.take().expect("stderr is piped");

        let (tx, rx) = mpsc::channel::<String>();
        let stdout_reader = std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    },
                    Err(_) => break,
                }
            }
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });

        let mut output = String::new();
        loop {
            match rx.recv_timeout(self.inactivity_timeout) {
                Ok(line) => {
                    trace!("tool> {line}");
                    if let Some(cb) = progress.as_deref_mut() {
                        if let Some(p) = parse_upload_progress(&line) {
                            cb(p);
                        }
                    }
                    output.push_str(&line);
                    output.push('\n');
                },
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "{} silent for {:?}, killing it",
                        self.program.display(),
                        self.inactivity_timeout
                    );
                    child.kill().ok();
                    child.wait().ok();
                    return Err(Error::ToolTimeout(self.inactivity_timeout));
                },
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = child.wait()?;
        stdout_reader.join().ok();
        let stderr_text = stderr_reader.join().unwrap_or_default();
        if !stderr_text.is_empty() {
            output.push_str(&stderr_text);
        }

        debug!("Tool exited with {status}");
        Ok(ToolOutput {
            exit_code: status.code(),
            output,
        })
    }
}

impl ToolRunner for McumgrRunner {
    fn upload(
        &self,
        firmware: &Path,
        port: &str,
        progress: &mut dyn FnMut(UploadProgress),
    ) -> Result<ToolOutput> {
        self.run(&self.upload_args(firmware, port), Some(progress))
    }

    fn reset(&self, port: &str) -> Result<ToolOutput> {
        self.run(&self.reset_args(port), None)
    }
}

/// Parse one upload progress line.
///
/// mcumgr renders progress as, e.g.,
/// `7.35 KiB / 36.97 KiB [====>---] 19.88% 10.67 KiB/s`; the speed field
/// is absent until the first rate sample exists.
pub fn parse_upload_progress(line: &str) -> Option<UploadProgress> {
    static PROGRESS_RE: OnceLock<Regex> = OnceLock::new();
    let re = PROGRESS_RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            \d+(?:\.\d+)?\s*(?:B|KiB|MiB|GiB)      # transferred
            \s*/\s*
            \d+(?:\.\d+)?\s*(?:B|KiB|MiB|GiB)      # total
            .*?
            (?P<pct>\d+(?:\.\d+)?)%                # percentage
            (?:\s+(?P<speed>\d+(?:\.\d+)?\s*(?:B|KiB|MiB|GiB)/s))?
            ",
        )
        .expect("static progress pattern")
    });

    let caps = re.captures(line)?;
    let percent: f32 = caps.name("pct")?.as_str().parse().ok()?;

    Some(UploadProgress {
        percent,
        speed: caps.name("speed").map(|m| m.as_str().to_string()),
    })
}
