//! Device discovery and board classification.
//!
//! Discovery maps a caller-supplied USB identity (VID/PID, optional
//! description filter) to a connected serial port. Enumeration is a
//! point-in-time snapshot with no caching; two calls against unchanged
//! hardware return the same port, but nothing is retained in between.

use std::time::Duration;

use log::{debug, info, trace};

use crate::error::Result;
use crate::port::{NativePortEnumerator, PortEnumerator, PortInfo};

/// Poll interval while waiting for a board to re-enumerate.
pub const REBOOT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default time to wait for a board to come back in bootloader mode.
pub const REBOOT_TIMEOUT: Duration = Duration::from_secs(15);

/// Known board kinds, classified from the USB identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardKind {
    /// OwnTech Twist power-electronics board.
    Twist,
    /// Other Zephyr CDC-ACM device (shared vendor ID).
    Zephyr,
    /// ST-LINK virtual COM port (on-board debugger).
    StLink,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product under
/// that vendor.
const KNOWN_BOARDS: &[(u16, &[u16], BoardKind)] = &[
    (0x2FE3, &[0x0100], BoardKind::Twist),
    (0x2FE3, &[], BoardKind::Zephyr),
    (
        0x0483,
        &[0x374B, 0x374E, 0x3752, 0x3753],
        BoardKind::StLink,
    ),
];

impl BoardKind {
    /// Classify a USB identity into a board kind.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, board) in KNOWN_BOARDS {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *board;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the board kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Twist => "Twist",
            Self::Zephyr => "Zephyr CDC-ACM",
            Self::StLink => "ST-LINK VCP",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected board kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Check if this board kind should be preferred during auto-selection.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Self::Twist)
    }
}

/// Discovered serial port with board classification.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified board kind.
    pub board: BoardKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Classify an enumerated port.
    #[must_use]
    pub fn from_port_info(info: PortInfo) -> Self {
        let board = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => BoardKind::from_vid_pid(vid, pid),
            _ => BoardKind::Unknown,
        };

        Self {
            name: info.name,
            board,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }

    /// Check if this port is likely an OwnTech board.
    pub fn is_likely_board(&self) -> bool {
        self.board.is_known()
    }
}

/// Device locator over an injectable port enumerator.
///
/// All lookups are stateless snapshots; absence is reported as `None`,
/// while a failing enumeration backend surfaces as `Err`.
#[derive(Debug, Clone, Default)]
pub struct DeviceLocator<E: PortEnumerator = NativePortEnumerator> {
    enumerator: E,
}

impl DeviceLocator<NativePortEnumerator> {
    /// Create a locator over the native serial port backend.
    #[must_use]
    pub fn native() -> Self {
        Self::new(NativePortEnumerator)
    }
}

impl<E: PortEnumerator> DeviceLocator<E> {
    /// Create a locator over the given enumerator.
    pub fn new(enumerator: E) -> Self {
        Self { enumerator }
    }

    /// Detect all attached ports with board classification.
    pub fn detect_ports(&self) -> Result<Vec<DetectedPort>> {
        let ports = self.enumerator.list_ports()?;

        let detected: Vec<DetectedPort> = ports
            .into_iter()
            .map(DetectedPort::from_port_info)
            .collect();

        for port in &detected {
            if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                trace!(
                    "Found USB port: {} (VID: {vid:04X}, PID: {pid:04X}, Board: {:?})",
                    port.name, port.board
                );
            }
        }

        Ok(detected)
    }

    /// Find the port of a device with the given VID and PID.
    ///
    /// When `name` is supplied, the port's product description must also
    /// contain it as a substring. Returns the first match in enumeration
    /// order (enumeration order is OS-defined), or `Ok(None)` when no
    /// attached device matches.
    pub fn find_device(
        &self,
        target_vid: u16,
        target_pid: u16,
        name: Option<&str>,
    ) -> Result<Option<String>> {
        let ports = self.enumerator.list_ports()?;

        for port in ports {
            if !port.matches_vid_pid(target_vid, target_pid) {
                continue;
            }

            if let Some(name) = name {
                let description = port.product.as_deref().unwrap_or_default();
                if !description.contains(name) {
                    debug!(
                        "Port {} matches {target_vid:04x}:{target_pid:04x} but its \
                         description {description:?} does not contain {name:?}",
                        port.name
                    );
                    continue;
                }
            }

            debug!(
                "Found device {target_vid:04x}:{target_pid:04x} on {}",
                port.name
            );
            return Ok(Some(port.name));
        }

        Ok(None)
    }

    /// Get the VID and PID of whatever is attached to the given port.
    ///
    /// Returns `(None, None)` when the port is not found or exposes no
    /// USB identity (e.g. legacy UARTs). This is graceful degradation,
    /// not a failure; only a broken enumeration backend returns `Err`.
    pub fn get_pid_vid(&self, port_name: &str) -> Result<(Option<u16>, Option<u16>)> {
        let ports = self.enumerator.list_ports()?;

        for port in ports {
            if port.name == port_name {
                return Ok((port.vid, port.pid));
            }
        }

        Ok((None, None))
    }

    /// Wait for a board to re-enumerate after a reboot into bootloader mode.
    ///
    /// Polls [`find_device`](Self::find_device) every
    /// [`REBOOT_POLL_INTERVAL`] until the identity re-appears or `timeout`
    /// elapses. Returns `Ok(None)` when the board never came back.
    pub fn wait_for_reboot(&self, vid: u16, pid: u16, timeout: Duration) -> Result<Option<String>> {
        info!("Waiting for {vid:04x}:{pid:04x} to re-enumerate...");

        let start = std::time::Instant::now();
        loop {
            if let Some(port) = self.find_device(vid, pid, None)? {
                info!("Board ready on {port}");
                return Ok(Some(port));
            }

            if start.elapsed() >= timeout {
                debug!("Board {vid:04x}:{pid:04x} did not re-enumerate within {timeout:?}");
                return Ok(None);
            }

            std::thread::sleep(REBOOT_POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct FixedEnumerator(Vec<PortInfo>);

    impl PortEnumerator for FixedEnumerator {
        fn list_ports(&self) -> Result<Vec<PortInfo>> {
            Ok(self.0.clone())
        }
    }

    struct FailingEnumerator;

    impl PortEnumerator for FailingEnumerator {
        fn list_ports(&self) -> Result<Vec<PortInfo>> {
            Err(Error::Serial(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "enumeration backend unavailable",
            )))
        }
    }

    fn port(name: &str, vid: u16, pid: u16, product: Option<&str>) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: Some(vid),
            pid: Some(pid),
            manufacturer: None,
            product: product.map(str::to_string),
            serial_number: None,
        }
    }

    fn bare_port(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    #[test]
    fn test_board_kind_from_vid_pid() {
        assert_eq!(BoardKind::from_vid_pid(0x2FE3, 0x0100), BoardKind::Twist);
        assert_eq!(BoardKind::from_vid_pid(0x2FE3, 0x0005), BoardKind::Zephyr);
        assert_eq!(BoardKind::from_vid_pid(0x0483, 0x374B), BoardKind::StLink);
        assert_eq!(BoardKind::from_vid_pid(0x1234, 0x5678), BoardKind::Unknown);
    }

    #[test]
    fn test_board_kind_is_known() {
        assert!(BoardKind::Twist.is_known());
        assert!(BoardKind::Zephyr.is_known());
        assert!(BoardKind::StLink.is_known());
        assert!(!BoardKind::Unknown.is_known());
    }

    #[test]
    fn test_board_kind_priority() {
        assert!(BoardKind::Twist.is_high_priority());
        assert!(!BoardKind::StLink.is_high_priority());
        assert!(!BoardKind::Unknown.is_high_priority());
    }

    #[test]
    fn test_find_device_returns_first_match() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![
            port("/dev/ttyUSB0", 0x1A86, 0x7523, None),
            port("/dev/ttyACM0", 0x2FE3, 0x0100, Some("Twist")),
            port("/dev/ttyACM1", 0x2FE3, 0x0100, Some("Twist")),
        ]));

        let found = locator.find_device(0x2FE3, 0x0100, None).unwrap();
        assert_eq!(found.as_deref(), Some("/dev/ttyACM0"));

        // Idempotent against an unchanged snapshot
        let again = locator.find_device(0x2FE3, 0x0100, None).unwrap();
        assert_eq!(found, again);
    }

    #[test]
    fn test_find_device_absent_identity_is_none_not_error() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![port(
            "/dev/ttyUSB0",
            0x1A86,
            0x7523,
            None,
        )]));

        let found = locator.find_device(0x2FE3, 0x0100, None).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_find_device_no_ports_at_all() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![]));
        assert!(locator.find_device(0x2FE3, 0x0100, None).unwrap().is_none());
    }

    #[test]
    fn test_find_device_name_filter_substring() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![port(
            "/dev/ttyACM0",
            0x2E8A,
            0x0005,
            Some("PicoBoot"),
        )]));

        // Substring of the description matches
        let found = locator.find_device(0x2E8A, 0x0005, Some("Pico")).unwrap();
        assert_eq!(found.as_deref(), Some("/dev/ttyACM0"));

        // Non-substring does not
        let found = locator.find_device(0x2E8A, 0x0005, Some("Other")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_find_device_name_filter_skips_to_later_match() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![
            port("/dev/ttyACM0", 0x2FE3, 0x0100, Some("Bootloader")),
            port("/dev/ttyACM1", 0x2FE3, 0x0100, Some("Twist console")),
        ]));

        let found = locator.find_device(0x2FE3, 0x0100, Some("Twist")).unwrap();
        assert_eq!(found.as_deref(), Some("/dev/ttyACM1"));
    }

    #[test]
    fn test_find_device_name_filter_against_missing_description() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![port(
            "/dev/ttyACM0",
            0x2FE3,
            0x0100,
            None,
        )]));

        let found = locator.find_device(0x2FE3, 0x0100, Some("Twist")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_find_device_propagates_enumeration_failure() {
        let locator = DeviceLocator::new(FailingEnumerator);
        let result = locator.find_device(0x2FE3, 0x0100, None);
        assert!(matches!(result, Err(Error::Serial(_))));
    }

    #[test]
    fn test_get_pid_vid_known_port() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![port(
            "/dev/ttyACM0",
            0x2FE3,
            0x0100,
            None,
        )]));

        let (vid, pid) = locator.get_pid_vid("/dev/ttyACM0").unwrap();
        assert_eq!(vid, Some(0x2FE3));
        assert_eq!(pid, Some(0x0100));
    }

    #[test]
    fn test_get_pid_vid_unknown_port_is_none_none() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![port(
            "/dev/ttyACM0",
            0x2FE3,
            0x0100,
            None,
        )]));

        let (vid, pid) = locator.get_pid_vid("/dev/ttyACM9").unwrap();
        assert_eq!(vid, None);
        assert_eq!(pid, None);
    }

    #[test]
    fn test_get_pid_vid_non_usb_port_is_none_none() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![bare_port("/dev/ttyS0")]));

        let (vid, pid) = locator.get_pid_vid("/dev/ttyS0").unwrap();
        assert_eq!(vid, None);
        assert_eq!(pid, None);
    }

    #[test]
    fn test_wait_for_reboot_immediate_hit() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![port(
            "/dev/ttyACM0",
            0x2FE3,
            0x0100,
            None,
        )]));

        let found = locator
            .wait_for_reboot(0x2FE3, 0x0100, Duration::ZERO)
            .unwrap();
        assert_eq!(found.as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_wait_for_reboot_times_out_to_none() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![]));

        let found = locator
            .wait_for_reboot(0x2FE3, 0x0100, Duration::ZERO)
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_detect_ports_classifies() {
        let locator = DeviceLocator::new(FixedEnumerator(vec![
            port("/dev/ttyACM0", 0x2FE3, 0x0100, Some("Twist")),
            bare_port("/dev/ttyS0"),
        ]));

        let detected = locator.detect_ports().unwrap();
        assert_eq!(detected.len(), 2);
        assert_eq!(detected[0].board, BoardKind::Twist);
        assert!(detected[0].is_likely_board());
        assert_eq!(detected[1].board, BoardKind::Unknown);
        assert!(!detected[1].is_likely_board());
    }
}
