//! Find command implementation.

use anyhow::{Context, Result};
use console::style;

/// Find a connected device by USB identity.
///
/// Prints the port name on stdout when found (exit 0); absence is exit 1
/// so scripts can branch on it without parsing output.
pub(crate) fn cmd_find(vid: u16, pid: u16, name: Option<&str>, json: bool) -> Result<i32> {
    let port = twistflash::find_device(vid, pid, name)
        .context("serial port enumeration failed")?;

    if json {
        let info = serde_json::json!({
            "vid": format!("{vid:04x}"),
            "pid": format!("{pid:04x}"),
            "name": name,
            "port": port,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&info).unwrap_or_default()
        );
        return Ok(i32::from(port.is_none()));
    }

    match port {
        Some(port) => {
            println!("{port}");
            Ok(0)
        },
        None => {
            eprintln!(
                "{} no device {vid:04x}:{pid:04x} found",
                style("✗").red().bold()
            );
            Ok(1)
        },
    }
}
