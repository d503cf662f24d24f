//! # twistflash
//!
//! A library for programming OwnTech Twist boards over their serial
//! bootloader.
//!
//! The board side of the protocol is MCUboot serial recovery, driven
//! through the external `mcumgr` client; this crate provides what sits
//! around that tool:
//!
//! - Serial device discovery by USB VID/PID, with an optional description
//!   filter
//! - The 1200-baud touch that reboots a board into bootloader mode, and
//!   re-discovery once it re-enumerates
//! - SHA-256 verification of the firmware image before anything touches
//!   the device
//! - Invocation of `mcumgr`, with output capture, progress parsing, an
//!   inactivity timeout and a normalized outcome
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! fn main() -> twistflash::Result<()> {
//!     // Locate a Twist board
//!     let port = twistflash::find_device(0x2FE3, 0x0100, None)?
//!         .expect("no Twist board attached");
//!
//!     // Flash it, verifying the image hash first
//!     let outcome = twistflash::flash_prog_procedure(
//!         Path::new("firmware.bin"),
//!         &port,
//!         Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"),
//!     )?;
//!
//!     println!("[{}] {}", outcome.code(), outcome.message);
//!     Ok(())
//! }
//! ```
//!
//! Discovery and orchestration are built over the [`PortEnumerator`] and
//! [`ToolRunner`] capability traits, so both are testable without
//! hardware or an installed tool.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod flash;
pub mod hash;
pub mod host;
pub mod port;
pub mod runner;

// Re-exports for convenience
pub use {
    device::{BoardKind, DetectedPort, DeviceLocator},
    error::{Error, Result},
    flash::{FlashOptions, FlashOutcome, FlashProcedure, FlashStatus},
    hash::{digests_match, sha256_file, sha256_hex},
    host::{discover_ports, find_device, flash_prog_procedure, get_pid_vid},
    port::{NativePortEnumerator, PortEnumerator, PortInfo, touch_port},
    runner::{McumgrRunner, ToolOutput, ToolRunner, UploadProgress, parse_upload_progress},
};
