//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use nfcloader::{Downloader, DriverKind, Event, FirmwareImage, Transport};
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled(nfcloader::Error::Cancelled.to_string()).into())
    } else {
        Ok(())
    }
}

fn progress_bar(cli: &Cli, total: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    file: &Path,
    driver: DriverKind,
    reader: Option<&str>,
) -> Result<()> {
    let image = FirmwareImage::open(file)
        .with_context(|| format!("Failed to open firmware image {}", file.display()))?;
    if image.is_empty() {
        return Err(CliError::Usage(format!("Firmware image {} is empty", file.display())).into());
    }
    let total = usize::try_from(image.len()).context("Firmware image too large")?;

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("📦").cyan(),
            image
                .path()
                .display(),
            total
        );
        eprintln!(
            "{} Waiting for a tag on the {} reader...",
            style("⏳").yellow(),
            driver
        );
    }

    let transport = Transport::connect(driver, reader).context("Could not reach a tag")?;
    ensure_not_interrupted()?;
    debug!("Tag reached through the {} driver", transport.kind());

    let mut downloader =
        Downloader::new(transport).with_config(config.transfer.session_config());
    debug!("Session timing: {:?}", downloader.config());

    let pb = progress_bar(cli, image.len());
    let result = downloader.run(image, total, |event| match event {
        Event::Connected(device) => {
            pb.set_message(device.to_string());
        },
        Event::ChunkSent(progress) => {
            pb.set_position(progress.sent as u64);
            if progress.final_chunk {
                pb.set_message("waiting for CRC check");
            }
        },
    });

    let report = match result {
        Ok(report) => {
            pb.finish_and_clear();
            report
        },
        Err(err) => {
            pb.abandon();
            if let nfcloader::Error::Transfer(ref failure) = err {
                if failure.critical && !cli.quiet {
                    eprintln!(
                        "{} The IC may no longer run the NFC downloader; do not retry blindly.",
                        style("⚠").yellow().bold()
                    );
                }
            }
            return Err(err).context("Download failed");
        },
    };

    if !cli.quiet {
        eprintln!("{} Download successful", style("✓").green().bold());
        eprintln!("    Transmitted (bytes): {}", report.bytes_sent);
        eprintln!("    Speed (bytes/sec): {:.0}", report.throughput());
    }

    Ok(())
}
