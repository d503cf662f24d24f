//! Flash and reset command implementations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use twistflash::{DeviceLocator, FlashOptions, FlashProcedure, McumgrRunner, ToolRunner};

use crate::config::Config;
use crate::{Cli, get_port, use_fancy_output};

/// Build the mcumgr runner from CLI arguments and configuration.
fn build_runner(
    cli: &Cli,
    config: &Config,
    mcumgr: Option<&PathBuf>,
    tool_timeout: u64,
) -> McumgrRunner {
    let mut runner = McumgrRunner::new()
        .with_baud(cli.baud)
        .with_timeout(Duration::from_secs(tool_timeout));

    let program = mcumgr
        .cloned()
        .or_else(|| config.flash.mcumgr.clone().map(PathBuf::from));
    if let Some(program) = program {
        runner = runner.with_program(program);
    }

    runner
}

/// Flash command implementation.
#[allow(clippy::fn_params_excessive_bools)]
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    firmware: &Path,
    hash: Option<&str>,
    no_touch: bool,
    no_reset: bool,
    mcumgr: Option<&PathBuf>,
    tool_timeout: u64,
) -> Result<i32> {
    let port = get_port(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} (tool baud {})",
            style("🔌").cyan(),
            style(&port).green(),
            cli.baud
        );
    }

    let runner = build_runner(cli, config, mcumgr, tool_timeout);

    let mut options = FlashOptions::default();
    if no_touch || config.flash.no_touch {
        options = options.without_touch();
    }
    if no_reset || config.flash.no_reset {
        options = options.without_reset();
    }

    let procedure = FlashProcedure::new(runner, DeviceLocator::native(), options);

    // Create progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    if !cli.quiet {
        eprintln!(
            "{} Flashing {}...",
            style("⏳").yellow(),
            firmware.display()
        );
    }

    let outcome = procedure
        .run(firmware, &port, hash, &mut |p| {
            pb.set_position(p.percent.round() as u64);
            if let Some(speed) = p.speed {
                pb.set_message(speed);
            }
        })
        .with_context(|| format!("could not flash {}", firmware.display()))?;

    pb.finish_and_clear();

    if outcome.success {
        if !cli.quiet {
            eprintln!("\n{} {}", style("🎉").green().bold(), outcome.message);
        }
        Ok(0)
    } else {
        eprintln!(
            "{} [{}] {}",
            style("✗").red().bold(),
            outcome.code(),
            outcome.message
        );
        Ok(1)
    }
}

/// Reset command implementation.
pub(crate) fn cmd_reset(
    cli: &Cli,
    config: &mut Config,
    mcumgr: Option<&PathBuf>,
    tool_timeout: u64,
) -> Result<i32> {
    let port = get_port(cli, config)?;
    let runner = build_runner(cli, config, mcumgr, tool_timeout);

    if !cli.quiet {
        eprintln!(
            "{} Resetting board on {}...",
            style("🔄").cyan(),
            style(&port).green()
        );
    }

    let output = runner
        .reset(&port)
        .context("could not run the bootloader client")?;

    if output.success() {
        if !cli.quiet {
            eprintln!("{} Reset target", style("✓").green());
        }
        Ok(0)
    } else {
        eprintln!(
            "{} reset failed: {}",
            style("✗").red().bold(),
            output.excerpt()
        );
        Ok(1)
    }
}
