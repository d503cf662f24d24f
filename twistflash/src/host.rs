//! Host-side convenience API.
//!
//! Thin wrappers over the native backends for callers that do not need
//! injectable enumerators or runners.

use std::path::Path;

use crate::device::{DetectedPort, DeviceLocator};
use crate::error::Result;
use crate::flash::{FlashOutcome, FlashProcedure};

/// Discover all attached serial ports with board classification.
pub fn discover_ports() -> Result<Vec<DetectedPort>> {
    DeviceLocator::native().detect_ports()
}

/// Find the port of a connected device by USB identity.
///
/// Returns `Ok(None)` when no attached device matches; see
/// [`DeviceLocator::find_device`].
pub fn find_device(target_vid: u16, target_pid: u16, name: Option<&str>) -> Result<Option<String>> {
    DeviceLocator::native().find_device(target_vid, target_pid, name)
}

/// Get the VID and PID of whatever is attached to the given port.
///
/// Returns `(None, None)` for unknown ports and non-USB adapters; see
/// [`DeviceLocator::get_pid_vid`].
pub fn get_pid_vid(port_name: &str) -> Result<(Option<u16>, Option<u16>)> {
    DeviceLocator::native().get_pid_vid(port_name)
}

/// Flash a firmware binary onto the device behind `port`.
///
/// Runs the full default procedure (hash pre-check when `hash` is given,
/// bootloader touch, upload via mcumgr, reset) and returns the normalized
/// outcome; see [`FlashProcedure::run`].
pub fn flash_prog_procedure(
    firm_bin: &Path,
    port: &str,
    hash: Option<&str>,
) -> Result<FlashOutcome> {
    FlashProcedure::native().run(firm_bin, port, hash, &mut |_| {})
}
