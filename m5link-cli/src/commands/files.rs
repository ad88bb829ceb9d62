//! File commands: `ls`, `cat`, `put`, `run`.

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use m5link::{DeviceFiles, ProgressUpdate, TransferOutcome, TransferStage, bulk_download_with};
use std::io::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};

use super::{Session, print_to_stdout};
use crate::config::Config;
use crate::{Cli, CliError, clear_interrupted_flag, use_fancy_output, was_interrupted};

/// Default directory for uploads without an explicit destination.
const DEFAULT_REMOTE_DIR: &str = "/flash";

/// Stop draining console output after this long without new bytes.
const RUN_IDLE_TIMEOUT: Duration = Duration::from_millis(500);

const POLL_WAIT: Duration = Duration::from_millis(50);

/// List a directory on the device.
pub(crate) fn cmd_ls(cli: &Cli, config: &mut Config, path: &str) -> Result<()> {
    let session = Session::open(cli, config, print_to_stdout)?;
    let entries = DeviceFiles::new(session.conn())
        .list_dir(path)
        .with_context(|| format!("Failed to list {path}"));
    session.finish()?;

    let mut stdout = std::io::stdout().lock();
    for entry in entries? {
        writeln!(stdout, "{entry}")?;
    }
    Ok(())
}

/// Print a file stored on the device.
pub(crate) fn cmd_cat(cli: &Cli, config: &mut Config, path: &str) -> Result<()> {
    let session = Session::open(cli, config, print_to_stdout)?;
    let content = DeviceFiles::new(session.conn())
        .read_file(path)
        .with_context(|| format!("Failed to read {path}"));
    session.finish()?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&content?)?;
    stdout.flush()?;
    Ok(())
}

/// Upload a local text file.
pub(crate) fn cmd_put(
    cli: &Cli,
    config: &mut Config,
    local: &Path,
    remote: Option<&str>,
) -> Result<()> {
    let text = std::fs::read_to_string(local)
        .with_context(|| format!("Failed to read {}", local.display()))?;
    let remote = match remote {
        Some(remote) => remote.to_string(),
        None => default_remote_path(local)?,
    };
    let transfer = config.transfer_config();

    let session = Session::open(cli, config, print_to_stdout)?;

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );
    pb.set_message(remote.clone());

    let report = |update: ProgressUpdate| pb.set_position(percent_position(update.percent));
    let outcome = bulk_download_with(session.conn(), &remote, &text, &report, &transfer);
    session.finish()?;

    match outcome {
        TransferOutcome::Completed { done, .. } => {
            pb.finish_with_message(format!("{remote} saved"));
            if !done {
                debug!("Finish reply for {remote} had no done marker");
            }
            if !cli.quiet {
                eprintln!(
                    "{} Uploaded {} to {}",
                    style("✓").green(),
                    local.display(),
                    style(&remote).cyan()
                );
            }
            Ok(())
        },
        TransferOutcome::Failed { stage, error } => {
            pb.abandon();
            Err(anyhow::Error::new(error)
                .context(format!("Upload of {remote} failed at {}", stage_label(stage))))
        },
    }
}

/// Run a script on the device and print what it writes to the console.
pub(crate) fn cmd_run(cli: &Cli, config: &mut Config, path: &str, follow: bool) -> Result<()> {
    let session = Session::open(cli, config, print_to_stdout)?;
    let result = run_and_drain(&session, path, follow);
    session.finish()?;
    result
}

fn run_and_drain(session: &Session, path: &str, follow: bool) -> Result<()> {
    let conn = session.conn();
    let reply = DeviceFiles::new(conn)
        .run_file(path)
        .with_context(|| format!("Failed to run {path}"))?;
    debug!("Run reply: {}", String::from_utf8_lossy(&reply).trim());

    clear_interrupted_flag();
    let mut last_data = Instant::now();
    loop {
        if was_interrupted() {
            clear_interrupted_flag();
            if follow {
                return Ok(());
            }
            return Err(CliError::Cancelled("Interrupted".to_string()).into());
        }
        if conn.poll_console(POLL_WAIT)? > 0 {
            last_data = Instant::now();
        } else if !follow && last_data.elapsed() >= RUN_IDLE_TIMEOUT {
            return Ok(());
        }
    }
}

fn default_remote_path(local: &Path) -> Result<String> {
    let Some(name) = local.file_name().and_then(|n| n.to_str()) else {
        bail!(CliError::Usage(format!(
            "Cannot derive a device path from {}; pass REMOTE explicitly",
            local.display()
        )));
    };
    Ok(format!("{DEFAULT_REMOTE_DIR}/{name}"))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped to 0..=100
fn percent_position(percent: f64) -> u64 {
    percent.clamp(0.0, 100.0).round() as u64
}

fn stage_label(stage: TransferStage) -> String {
    match stage {
        TransferStage::Chunk(index) => format!("chunk {}", index + 1),
        TransferStage::Finish => "finish".to_string(),
    }
}
