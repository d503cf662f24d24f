//! twistflash CLI - Command-line tool for programming OwnTech Twist boards.
//!
//! ## Features
//!
//! - Flash firmware binaries through the mcumgr bootloader client
//! - Optional SHA-256 verification before anything touches the device
//! - Device discovery by USB VID/PID
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// CLI error classes that map to distinct process exit codes.
///
/// Anything not downcastable to one of these is a runtime failure
/// (exit code 1).
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Misuse of the CLI or environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Cancelled interactively by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// twistflash - A cross-platform tool for programming OwnTech Twist boards.
///
/// Environment variables:
///   TWISTFLASH_PORT             - Default serial port
///   TWISTFLASH_BAUD             - Bootloader client baud rate (default: 115200)
///   TWISTFLASH_MCUMGR           - Path to the mcumgr executable
///   TWISTFLASH_NON_INTERACTIVE  - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "twistflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/twistflash/twistflash")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "TWISTFLASH_PORT")]
    port: Option<String>,

    /// Baud rate for the bootloader client connection.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "TWISTFLASH_BAUD"
    )]
    baud: u32,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "TWISTFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash a firmware binary through the bootloader.
    Flash {
        /// Path to the firmware binary.
        firmware: PathBuf,

        /// Expected SHA-256 of the firmware; flashing aborts on mismatch.
        #[arg(long)]
        hash: Option<String>,

        /// Skip the 1200-baud bootloader touch (board is already in
        /// bootloader mode).
        #[arg(long)]
        no_touch: bool,

        /// Skip the reset after flashing.
        #[arg(long)]
        no_reset: bool,

        /// Path to the mcumgr executable (found on PATH if not given).
        #[arg(long, env = "TWISTFLASH_MCUMGR")]
        mcumgr: Option<PathBuf>,

        /// Kill the tool after this many seconds without output.
        #[arg(long, default_value = "10")]
        tool_timeout: u64,
    },

    /// Find a connected device by USB VID/PID.
    Find {
        /// USB vendor ID (hex, e.g. 2fe3 or 0x2FE3).
        #[arg(long, value_parser = parse_hex_u16)]
        vid: u16,

        /// USB product ID (hex, e.g. 0100 or 0x0100).
        #[arg(long, value_parser = parse_hex_u16)]
        pid: u16,

        /// Only match ports whose description contains this substring.
        #[arg(long)]
        name: Option<String>,

        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reset the board through the bootloader client.
    Reset {
        /// Path to the mcumgr executable (found on PATH if not given).
        #[arg(long, env = "TWISTFLASH_MCUMGR")]
        mcumgr: Option<PathBuf>,

        /// Kill the tool after this many seconds without output.
        #[arg(long, default_value = "10")]
        tool_timeout: u64,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a 16-bit USB identifier (supports 0x prefix).
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code_for(&err)
        },
    };
    std::process::exit(code);
}

/// Map an error onto the CLI exit code contract.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => 1,
    }
}

fn run() -> Result<i32> {
    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        // Disable all color output
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "twistflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            firmware,
            hash,
            no_touch,
            no_reset,
            mcumgr,
            tool_timeout,
        } => commands::flash::cmd_flash(
            &cli,
            &mut config,
            firmware,
            hash.as_deref(),
            *no_touch,
            *no_reset,
            mcumgr.as_ref(),
            *tool_timeout,
        ),
        Commands::Find {
            vid,
            pid,
            name,
            json,
        } => commands::find::cmd_find(*vid, *pid, name.as_deref(), *json),
        Commands::Reset {
            mcumgr,
            tool_timeout,
        } => commands::flash::cmd_reset(&cli, &mut config, mcumgr.as_ref(), *tool_timeout),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(0)
        },
    }
}

/// Get serial port from CLI args or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash() {
        let cli = Cli::try_parse_from([
            "twistflash",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "460800",
            "flash",
            "firmware.bin",
        ]);
        assert!(cli.is_ok());
        let cli = cli.unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, 460800);
        assert!(matches!(cli.command, Commands::Flash { .. }));
    }

    #[test]
    fn test_cli_parse_flash_with_all_options() {
        let cli = Cli::try_parse_from([
            "twistflash",
            "flash",
            "fw.bin",
            "--hash",
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
            "--no-touch",
            "--no-reset",
            "--mcumgr",
            "./3rdParties/mcumgr",
            "--tool-timeout",
            "30",
        ])
        .unwrap();
        if let Commands::Flash {
            firmware,
            hash,
            no_touch,
            no_reset,
            mcumgr,
            tool_timeout,
        } = cli.command
        {
            assert_eq!(firmware.to_str().unwrap(), "fw.bin");
            assert_eq!(
                hash.as_deref(),
                Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
            );
            assert!(no_touch);
            assert!(no_reset);
            assert_eq!(mcumgr.unwrap().to_str().unwrap(), "./3rdParties/mcumgr");
            assert_eq!(tool_timeout, 30);
        } else {
            panic!("Expected Flash command");
        }
    }

    #[test]
    fn test_cli_parse_find() {
        let cli = Cli::try_parse_from([
            "twistflash",
            "find",
            "--vid",
            "0x2FE3",
            "--pid",
            "0100",
            "--name",
            "Twist",
        ])
        .unwrap();
        if let Commands::Find {
            vid,
            pid,
            name,
            json,
        } = cli.command
        {
            assert_eq!(vid, 0x2FE3);
            assert_eq!(pid, 0x0100);
            assert_eq!(name.as_deref(), Some("Twist"));
            assert!(!json);
        } else {
            panic!("Expected Find command");
        }
    }

    #[test]
    fn test_cli_parse_find_invalid_vid() {
        let result = Cli::try_parse_from(["twistflash", "find", "--vid", "ZZZZ", "--pid", "0100"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_reset() {
        let cli = Cli::try_parse_from(["twistflash", "reset"]).unwrap();
        if let Commands::Reset {
            mcumgr,
            tool_timeout,
        } = cli.command
        {
            assert!(mcumgr.is_none());
            assert_eq!(tool_timeout, 10);
        } else {
            panic!("Expected Reset command");
        }
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["twistflash", "list-ports"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: false }));
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["twistflash", "list-ports", "--json"]).unwrap();
        if let Commands::ListPorts { json } = cli.command {
            assert!(json);
        } else {
            panic!("Expected ListPorts command");
        }
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["twistflash", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { .. }));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["twistflash", "list-ports"]).unwrap();
        assert_eq!(cli.baud, 115200);
        assert!(!cli.quiet);
        assert!(!cli.non_interactive);
        assert!(!cli.confirm_port);
        assert!(!cli.list_all_ports);
        assert!(cli.port.is_none());
        assert!(cli.config_path.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "twistflash",
            "--port",
            "COM3",
            "--baud",
            "230400",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--confirm-port",
            "--list-all-ports",
            "--config",
            "/tmp/config.toml",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.baud, 230400);
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert!(cli.confirm_port);
        assert!(cli.list_all_ports);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        let result = Cli::try_parse_from(["twistflash"]);
        assert!(result.is_err());
    }

    // ---- parse_hex_u16 ----

    #[test]
    fn test_parse_hex_u16_with_prefix() {
        assert_eq!(parse_hex_u16("0x2FE3").unwrap(), 0x2FE3);
        assert_eq!(parse_hex_u16("0X2FE3").unwrap(), 0x2FE3);
    }

    #[test]
    fn test_parse_hex_u16_without_prefix() {
        assert_eq!(parse_hex_u16("2fe3").unwrap(), 0x2FE3);
        assert_eq!(parse_hex_u16("ff").unwrap(), 0xFF);
    }

    #[test]
    fn test_parse_hex_u16_with_whitespace() {
        assert_eq!(parse_hex_u16("  0x0100  ").unwrap(), 0x0100);
    }

    #[test]
    fn test_parse_hex_u16_invalid() {
        assert!(parse_hex_u16("not_hex").is_err());
        assert!(parse_hex_u16("0xGG").is_err());
    }

    #[test]
    fn test_parse_hex_u16_overflow() {
        assert!(parse_hex_u16("0x1FFFF").is_err());
    }

    #[test]
    fn test_parse_hex_u16_zero() {
        assert_eq!(parse_hex_u16("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u16("0").unwrap(), 0);
    }

    // ---- exit code mapping ----

    #[test]
    fn test_exit_code_for_usage_error() {
        let err: anyhow::Error = CliError::Usage("bad".to_string()).into();
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_exit_code_for_cancelled() {
        let err: anyhow::Error = CliError::Cancelled("stop".to_string()).into();
        assert_eq!(exit_code_for(&err), 130);
    }

    #[test]
    fn test_exit_code_for_runtime_error() {
        let err = anyhow::anyhow!("something broke");
        assert_eq!(exit_code_for(&err), 1);
    }
}
