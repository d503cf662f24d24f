//! Flash orchestration.
//!
//! Drives one firmware-programming attempt to completion and reports a
//! normalized outcome. Every invocation is synchronous and retry-free: a
//! failed attempt is reported as-is, because re-flashing a partially
//! written device is a caller decision, not something to do implicitly.
//!
//! Killing the calling process while the external tool is mid-upload can
//! leave the target's firmware inconsistent; there is no cancellation
//! support for the same reason there are no retries.

use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use crate::device::{DeviceLocator, REBOOT_TIMEOUT};
use crate::error::{Error, Result};
use crate::hash;
use crate::port::{self, NativePortEnumerator, PortEnumerator, TOUCH_BAUD};
use crate::runner::{McumgrRunner, ToolRunner, UploadProgress};

/// Outcome categories of one flash attempt.
///
/// The numeric codes are part of the public contract (scripts branch on
/// them) and never overlap across categories:
///
/// | code | meaning                                                    |
/// |------|------------------------------------------------------------|
/// | 0    | flashed successfully                                       |
/// | 1    | tool ran and reported failure (upload or reset)            |
/// | 2    | firmware hash mismatch; the tool was never invoked         |
/// | 3    | tool could not be started                                  |
/// | 4    | tool went silent and was killed                            |
/// | 5    | board did not re-enumerate after the bootloader touch      |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStatus {
    /// Firmware was written and the tool reported success.
    Ok,
    /// The tool ran and reported a device-level failure.
    FlashFailed,
    /// The firmware's SHA-256 did not match the expectation.
    HashMismatch,
    /// The external tool could not be started.
    ToolUnavailable,
    /// The external tool produced no output within the window.
    Timeout,
    /// The board never came back after the bootloader touch.
    DeviceNotFound,
}

impl FlashStatus {
    /// Numeric status code for this category.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::FlashFailed => 1,
            Self::HashMismatch => 2,
            Self::ToolUnavailable => 3,
            Self::Timeout => 4,
            Self::DeviceNotFound => 5,
        }
    }
}

/// Normalized result of one flash attempt.
#[derive(Debug, Clone)]
pub struct FlashOutcome {
    /// Outcome category.
    pub status: FlashStatus,
    /// Human-readable description, including tool output for failures.
    pub message: String,
    /// Whether the firmware was written successfully.
    pub success: bool,
}

impl FlashOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: FlashStatus::Ok,
            message: message.into(),
            success: true,
        }
    }

    fn failed(status: FlashStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            success: false,
        }
    }

    /// Numeric status code of this outcome.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.status.code()
    }
}

/// Options controlling the flash procedure.
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Baud rate for the bootloader-entry touch; `None` skips the touch
    /// and flashes the port as given.
    pub touch_baud: Option<u32>,
    /// How long to wait for the board to re-enumerate after the touch.
    pub reboot_timeout: Duration,
    /// Settle time once the board has re-enumerated.
    pub reboot_settle: Duration,
    /// Settle time between the upload and the reset.
    pub post_upload_settle: Duration,
    /// Reset the board after a successful upload.
    pub reset_after: bool,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            touch_baud: Some(TOUCH_BAUD),
            reboot_timeout: REBOOT_TIMEOUT,
            reboot_settle: Duration::from_secs(1),
            post_upload_settle: Duration::from_secs(5),
            reset_after: true,
        }
    }
}

impl FlashOptions {
    /// Options with the touch sequence disabled.
    #[must_use]
    pub fn without_touch(mut self) -> Self {
        self.touch_baud = None;
        self
    }

    /// Options with the post-upload reset disabled.
    #[must_use]
    pub fn without_reset(mut self) -> Self {
        self.reset_after = false;
        self
    }
}

/// One-shot flash procedure over injectable tool and enumerator backends.
///
/// Per invocation the procedure moves through: hash pre-check (if an
/// expected digest was supplied), bootloader touch and re-discovery (if
/// enabled), exactly one upload attempt, settle, reset (if enabled). A
/// hash mismatch short-circuits before anything touches the device.
#[derive(Debug, Clone)]
pub struct FlashProcedure<R: ToolRunner, E: PortEnumerator = NativePortEnumerator> {
    runner: R,
    locator: DeviceLocator<E>,
    options: FlashOptions,
}

impl FlashProcedure<McumgrRunner, NativePortEnumerator> {
    /// Procedure over the native enumerator and a default mcumgr runner.
    #[must_use]
    pub fn native() -> Self {
        Self::new(
            McumgrRunner::new(),
            DeviceLocator::native(),
            FlashOptions::default(),
        )
    }
}

impl<R: ToolRunner, E: PortEnumerator> FlashProcedure<R, E> {
    /// Create a procedure from its parts.
    pub fn new(runner: R, locator: DeviceLocator<E>, options: FlashOptions) -> Self {
        Self {
            runner,
            locator,
            options,
        }
    }

    /// Flash `firm_bin` onto the device behind `port`.
    ///
    /// When `expected_hash` is supplied, the firmware's SHA-256 is
    /// verified first and a mismatch aborts before the tool is invoked.
    /// Failures of the attempt itself are reported through the returned
    /// [`FlashOutcome`]; `Err` is reserved for environment failures
    /// (unreadable firmware, broken port enumeration).
    pub fn run(
        &self,
        firm_bin: &Path,
        port: &str,
        expected_hash: Option<&str>,
        progress: &mut dyn FnMut(UploadProgress),
    ) -> Result<FlashOutcome> {
        let firmware_len = std::fs::metadata(firm_bin)?.len();

        if let Some(expected) = expected_hash {
            let actual = hash::sha256_file(firm_bin)?;
            if !hash::digests_match(expected, &actual) {
                return Ok(FlashOutcome::failed(
                    FlashStatus::HashMismatch,
                    format!("hash mismatch: expected {expected}, got {actual}"),
                ));
            }
            debug!("Firmware hash verified ({actual})");
        }

        let target = match self.enter_bootloader(port)? {
            Ok(target) => target,
            Err(outcome) => return Ok(outcome),
        };

        info!(
            "Uploading {} ({firmware_len} bytes) via {target}",
            firm_bin.display()
        );
        let upload = match self.runner.upload(firm_bin, &target, progress) {
            Ok(output) => output,
            Err(e) => return Ok(Self::tool_error_outcome(e)?),
        };
        if !upload.success() {
            return Ok(FlashOutcome::failed(
                FlashStatus::FlashFailed,
                format!(
                    "flashing tool exited with status {:?}: {}",
                    upload.exit_code,
                    upload.excerpt()
                ),
            ));
        }

        std::thread::sleep(self.options.post_upload_settle);

        if self.options.reset_after {
            let reset = match self.runner.reset(&target) {
                Ok(output) => output,
                Err(e) => return Ok(Self::tool_error_outcome(e)?),
            };
            if !reset.success() {
                return Ok(FlashOutcome::failed(
                    FlashStatus::FlashFailed,
                    format!("reset after flashing failed: {}", reset.excerpt()),
                ));
            }
            debug!("Reset target");
        }

        Ok(FlashOutcome::ok(format!(
            "flashed {} ({firmware_len} bytes) to {target}",
            firm_bin.display()
        )))
    }

    /// Reboot the device into its bootloader and rediscover the port.
    ///
    /// Returns the port to flash on, or the outcome to report when the
    /// board is gone. Ports without a USB identity cannot be rediscovered
    /// after a reboot, so they skip the touch and are flashed as-is.
    fn enter_bootloader(&self, current: &str) -> Result<std::result::Result<String, FlashOutcome>> {
        let Some(touch_baud) = self.options.touch_baud else {
            return Ok(Ok(current.to_string()));
        };

        let (vid, pid) = self.locator.get_pid_vid(current)?;
        let (Some(vid), Some(pid)) = (vid, pid) else {
            warn!("{current} exposes no USB identity, skipping bootloader touch");
            return Ok(Ok(current.to_string()));
        };

        info!("Rebooting board on {current} into bootloader mode...");
        port::touch_port(current, touch_baud);

        match self
            .locator
            .wait_for_reboot(vid, pid, self.options.reboot_timeout)?
        {
            Some(target) => {
                if target != current {
                    debug!("Board re-enumerated on {target}");
                }
                std::thread::sleep(self.options.reboot_settle);
                Ok(Ok(target))
            },
            None => Ok(Err(FlashOutcome::failed(
                FlashStatus::DeviceNotFound,
                format!("device {vid:04x}:{pid:04x} did not come back after reboot"),
            ))),
        }
    }

    /// Map tool invocation errors onto outcomes; anything else propagates.
    fn tool_error_outcome(error: Error) -> Result<FlashOutcome> {
        match error {
            e @ Error::ToolUnavailable { .. } => Ok(FlashOutcome::failed(
                FlashStatus::ToolUnavailable,
                e.to_string(),
            )),
            e @ Error::ToolTimeout(_) => {
                Ok(FlashOutcome::failed(FlashStatus::Timeout, e.to_string()))
            },
            e => Err(e),
        }
    }
}
