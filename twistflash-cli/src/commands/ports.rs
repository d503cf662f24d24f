//! List-ports command implementation.

use anyhow::{Context, Result};
use console::style;

/// List detected serial ports with board classification.
pub(crate) fn cmd_list_ports(json: bool) -> Result<i32> {
    let detected = twistflash::discover_ports().context("serial port enumeration failed")?;

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "board": p.board.name(),
                    "known": p.board.is_known(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return Ok(0);
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("no serial ports found").dim());
        return Ok(0);
    }

    for port in &detected {
        let board_type = if port.board.is_known() {
            format!(" [{}]", style(port.board.name()).yellow())
        } else {
            String::new()
        };

        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };

        let product = port.product.as_deref().unwrap_or("");
        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            board_type,
            vid_pid,
            if product.is_empty() {
                String::new()
            } else {
                format!(" - {}", style(product).dim())
            }
        );
    }

    // Show which port a plain `twistflash flash` would pick
    if let Some(board) = detected.iter().find(|p| p.board.is_high_priority()) {
        eprintln!(
            "\n{} would auto-select {}",
            style("→").green().bold(),
            style(&board.name).cyan().bold()
        );
    }

    Ok(0)
}
