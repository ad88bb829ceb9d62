//! m5link CLI - Command-line tool for M5Stack MicroPython boards.
//!
//! ## Features
//!
//! - List, read, upload and run files on the device
//! - Serial console monitor with keyboard passthrough
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
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl+C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl+C was pressed since the last check.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

pub(crate) fn clear_interrupted_flag() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}

/// Errors with a dedicated process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Cancelled by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

/// m5link - Move files to and from M5Stack MicroPython boards.
///
/// Environment variables:
///   M5LINK_PORT              - Default serial port
///   M5LINK_BAUD              - Default baud rate (default: 115200)
///   M5LINK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "m5link")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "M5LINK_PORT")]
    port: Option<String>,

    /// Baud rate of the serial link.
    #[arg(short, long, global = true, env = "M5LINK_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "M5LINK_NON_INTERACTIVE")]
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
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List a directory on the device.
    Ls {
        /// Directory on the device.
        #[arg(default_value = "/flash")]
        path: String,
    },

    /// Print a file stored on the device.
    Cat {
        /// File on the device.
        path: String,
    },

    /// Upload a local text file to the device.
    Put {
        /// Local file to upload.
        local: PathBuf,

        /// Destination on the device (default: /flash/<file name>).
        remote: Option<String>,
    },

    /// Run a script stored on the device.
    Run {
        /// Script on the device.
        path: String,

        /// Keep printing console output until Ctrl+C.
        #[arg(short, long)]
        follow: bool,
    },

    /// Open the device console.
    Monitor {
        /// Prefix every line with a timestamp.
        #[arg(long)]
        timestamp: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
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
        "m5link v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl+C handler: {e}");
    }

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Ls { path } => commands::files::cmd_ls(cli, &mut config, path),
        Commands::Cat { path } => commands::files::cmd_cat(cli, &mut config, path),
        Commands::Put { local, remote } => {
            commands::files::cmd_put(cli, &mut config, local, remote.as_deref())
        },
        Commands::Run { path, follow } => {
            commands::files::cmd_run(cli, &mut config, path, *follow)
        },
        Commands::Monitor { timestamp } => {
            commands::monitor::cmd_monitor(cli, &mut config, *timestamp)
        },
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: m5link completions bash \
                         (or use --install to auto-install completions)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
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

/// Baud rate from the command line, then config, then the default.
pub(crate) fn get_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.port.connection.baud)
        .unwrap_or(m5link::port::DEFAULT_BAUD)
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["m5link", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_parse_ls_default_path() {
        let cli = Cli::try_parse_from(["m5link", "ls"]).unwrap();
        match cli.command {
            Commands::Ls { path } => assert_eq!(path, "/flash"),
            _ => panic!("expected ls"),
        }
    }

    #[test]
    fn test_parse_put_with_global_options() {
        let cli = Cli::try_parse_from([
            "m5link",
            "put",
            "main.py",
            "/flash/app.py",
            "--port",
            "/dev/ttyUSB0",
            "-b",
            "921600",
            "--non-interactive",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, Some(921_600));
        assert!(cli.non_interactive);
        match cli.command {
            Commands::Put { local, remote } => {
                assert_eq!(local, PathBuf::from("main.py"));
                assert_eq!(remote.as_deref(), Some("/flash/app.py"));
            },
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn test_parse_run_follow() {
        let cli = Cli::try_parse_from(["m5link", "run", "/flash/main.py", "-f"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { follow: true, .. }));
    }

    #[test]
    fn test_cat_requires_path() {
        assert!(Cli::try_parse_from(["m5link", "cat"]).is_err());
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::try_parse_from(["m5link", "-vv", "list-ports"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = CliError::Usage("bad".into()).into();
        let cancelled: anyhow::Error = CliError::Cancelled("stop".into()).into();
        let runtime = anyhow::anyhow!("device said no");
        assert_eq!(exit_code_for(&usage), 2);
        assert_eq!(exit_code_for(&cancelled), 130);
        assert_eq!(exit_code_for(&runtime), 1);
    }

    #[test]
    fn test_baud_precedence() {
        let mut config = Config::default();
        let cli = Cli::try_parse_from(["m5link", "ls"]).unwrap();
        assert_eq!(get_baud(&cli, &config), m5link::port::DEFAULT_BAUD);

        config.port.connection.baud = Some(57_600);
        assert_eq!(get_baud(&cli, &config), 57_600);

        let cli = Cli::try_parse_from(["m5link", "ls", "--baud", "9600"]).unwrap();
        assert_eq!(get_baud(&cli, &config), 9600);
    }
}
