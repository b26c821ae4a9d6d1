//! nfcloader CLI - Command-line tool for the NHS31xx one-time NFC downloader.
//!
//! ## Features
//!
//! - Download a firmware image through a PN532 or PC/SC reader
//! - List available readers
//! - Configuration files and environment variable support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use env_logger::Env;
use log::debug;
use nfcloader::DriverKind;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Exit code for any failure.
const EXIT_FAILURE: i32 = -1;

/// Exit code for a user-requested stop.
const EXIT_CANCELLED: i32 = -2;

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors raised by the CLI itself.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid combination of arguments or settings.
    #[error("{0}")]
    Usage(String),
    /// The user stopped the operation.
    #[error("{0}")]
    Cancelled(String),
}

/// nfcloader - Program NHS31xx ICs through the one-time NFC downloader.
///
/// Environment variables:
///   NFCLOADER_DRIVER   - Default reader driver (nfc, smartcard)
///   NFCLOADER_READER   - Default reader name fragment
#[derive(Parser)]
#[command(name = "nfcloader")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported reader drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Driver {
    /// PN532 NFC front-end on a serial port (default).
    Nfc,
    /// PC/SC contactless smartcard reader.
    Smartcard,
}

impl From<Driver> for DriverKind {
    fn from(driver: Driver) -> Self {
        match driver {
            Driver::Nfc => DriverKind::Nfc,
            Driver::Smartcard => DriverKind::Smartcard,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Download a firmware image to the IC.
    Flash {
        /// Path to the firmware image (raw binary).
        file: PathBuf,

        /// Reader driver to use.
        #[arg(short, long, value_enum, env = "NFCLOADER_DRIVER")]
        driver: Option<Driver>,

        /// Reader to use (name fragment, or serial port for the nfc driver).
        #[arg(
            short = 't',
            long = "tagreader",
            value_name = "NAME",
            env = "NFCLOADER_READER"
        )]
        tagreader: Option<String>,
    },

    /// List available tag readers.
    ListReaders {
        /// Reader driver to query.
        #[arg(short, long, value_enum, env = "NFCLOADER_DRIVER")]
        driver: Option<Driver>,

        /// Output reader list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
}

/// Pick the driver: command line or environment, then config file, then default.
fn resolve_driver(flag: Option<Driver>, config: &Config) -> Result<DriverKind> {
    if let Some(driver) = flag {
        return Ok(driver.into());
    }

    match config.reader.driver {
        Some(ref name) => name
            .parse::<DriverKind>()
            .with_context(|| format!("Invalid driver \"{name}\" in configuration")),
        None => Ok(DriverKind::default()),
    }
}

/// Pick the reader filter: command line or environment, then config file.
fn resolve_reader(flag: Option<&String>, config: &Config) -> Option<String> {
    flag.cloned()
        .or_else(|| {
            config
                .reader
                .name
                .clone()
        })
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    let cancelled = err
        .chain()
        .any(|cause| {
            matches!(
                cause.downcast_ref::<nfcloader::Error>(),
                Some(nfcloader::Error::Cancelled)
            ) || matches!(
                cause.downcast_ref::<CliError>(),
                Some(CliError::Cancelled(_))
            )
        });

    if cancelled { EXIT_CANCELLED } else { EXIT_FAILURE }
}

fn main() {
    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

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
        "nfcloader v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    nfcloader::set_interrupt_checker(was_interrupted);

    if let Err(err) = run(&cli) {
        let code = exit_code(&err);
        if code == EXIT_CANCELLED {
            eprintln!("{} {}", style("✗").yellow(), err.root_cause());
        } else {
            eprintln!("{} {err:#}", style("Error:").red().bold());
        }
        std::process::exit(code);
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            file,
            driver,
            tagreader,
        } => {
            let driver = resolve_driver(*driver, &config)?;
            let reader = resolve_reader(tagreader.as_ref(), &config);
            commands::flash::cmd_flash(cli, &config, file, driver, reader.as_deref())
        },
        Commands::ListReaders { driver, json } => {
            let driver = resolve_driver(*driver, &config)?;
            commands::readers::cmd_list_readers(driver, *json)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flash() {
        let cli = Cli::try_parse_from([
            "nfcloader",
            "-v",
            "flash",
            "app.bin",
            "-d",
            "smartcard",
            "-t",
            "ACR122",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Flash {
                file,
                driver,
                tagreader,
            } => {
                assert_eq!(file, PathBuf::from("app.bin"));
                assert_eq!(driver, Some(Driver::Smartcard));
                assert_eq!(tagreader.as_deref(), Some("ACR122"));
            },
            Commands::ListReaders { .. } => panic!("expected flash"),
        }
    }

    #[test]
    fn test_parse_flash_long_options() {
        let cli = Cli::try_parse_from([
            "nfcloader",
            "flash",
            "--driver",
            "nfc",
            "--tagreader",
            "/dev/ttyUSB0",
            "app.bin",
            "--quiet",
        ])
        .unwrap();

        assert!(cli.quiet);
        assert!(matches!(
            cli.command,
            Commands::Flash {
                driver: Some(Driver::Nfc),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_driver() {
        let err = Cli::try_parse_from(["nfcloader", "flash", "app.bin", "-d", "nfcpy"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_parse_flash_requires_file() {
        assert!(Cli::try_parse_from(["nfcloader", "flash"]).is_err());
    }

    #[test]
    fn test_parse_list_readers_json() {
        let cli = Cli::try_parse_from(["nfcloader", "list-readers", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListReaders { json: true, .. }
        ));
    }

    #[test]
    fn test_resolve_driver_priority() {
        let mut config = Config::default();
        assert_eq!(resolve_driver(None, &config).unwrap(), DriverKind::Nfc);

        config.reader.driver = Some("smartcard".to_string());
        assert_eq!(
            resolve_driver(None, &config).unwrap(),
            DriverKind::Smartcard
        );
        assert_eq!(
            resolve_driver(Some(Driver::Nfc), &config).unwrap(),
            DriverKind::Nfc
        );

        config.reader.driver = Some("bogus".to_string());
        assert!(resolve_driver(None, &config).is_err());
    }

    #[test]
    fn test_resolve_reader_priority() {
        let mut config = Config::default();
        assert_eq!(resolve_reader(None, &config), None);

        config.reader.name = Some("uTrust".to_string());
        assert_eq!(resolve_reader(None, &config).as_deref(), Some("uTrust"));

        let flag = "ACR122".to_string();
        assert_eq!(
            resolve_reader(Some(&flag), &config).as_deref(),
            Some("ACR122")
        );
    }

    #[test]
    fn test_exit_codes() {
        let cancelled = anyhow::Error::new(nfcloader::Error::Cancelled).context("Download failed");
        assert_eq!(exit_code(&cancelled), EXIT_CANCELLED);

        let cli_cancelled: anyhow::Error = CliError::Cancelled("stopped".into()).into();
        assert_eq!(exit_code(&cli_cancelled), EXIT_CANCELLED);

        let other = anyhow::Error::new(nfcloader::Error::NoReaders);
        assert_eq!(exit_code(&other), EXIT_FAILURE);
    }
}
