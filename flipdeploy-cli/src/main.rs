//! flipdeploy CLI - Command-line tool for deploying files to a Flipper Zero.
//!
//! ## Features
//!
//! - Upload single files or whole directory trees over the serial CLI
//! - Create, list and stat remote paths
//! - Show device and firmware information
//! - Port auto-discovery
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and colors should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

mod commands;
mod config;
mod serial;

use config::Config;
use serial::SerialOptions;

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
    /// Some files of a batch failed (exit code 1).
    #[error("{failed} of {total} file(s) failed to upload")]
    UploadFailed {
        /// Failed files.
        failed: usize,
        /// Files in the batch.
        total: usize,
    },
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
            Self::UploadFailed { .. } => 1,
        }
    }
}

/// flipdeploy - Deploy files to a Flipper Zero over its serial CLI.
///
/// Environment variables:
///   FLIPDEPLOY_PORT              - Default serial port
///   FLIPDEPLOY_BAUD              - Baud rate (default: 230400)
///   FLIPDEPLOY_NON_INTERACTIVE   - Non-interactive mode (never guess a port)
#[derive(Parser)]
#[command(name = "flipdeploy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    flipdeploy info\n  \
    flipdeploy push Samsung_TV.ir /ext/infrared/Samsung_TV.ir\n  \
    flipdeploy sync staging/nfc /ext/nfc --dry-run")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "FLIPDEPLOY_PORT")]
    port: Option<String>,

    /// Baud rate [default: 230400].
    #[arg(short, long, global = true, env = "FLIPDEPLOY_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of guessing a port).
    #[arg(long, global = true, env = "FLIPDEPLOY_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn serial_options(&self) -> SerialOptions {
        SerialOptions {
            port: self
                .port
                .clone(),
            baud: self.baud,
            non_interactive: self.non_interactive,
        }
    }
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

    /// Show device and firmware information.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List a remote directory.
    Ls {
        /// Remote directory (e.g., /ext/infrared).
        path: String,

        /// List every file below the directory.
        #[arg(short, long)]
        recursive: bool,

        /// Output entries as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show whether a remote path exists, its kind and size.
    Stat {
        /// Remote path.
        path: String,
    },

    /// Create a remote directory.
    Mkdir {
        /// Remote directory.
        path: String,

        /// Also create missing parent directories.
        #[arg(short = 'P', long)]
        parents: bool,
    },

    /// Upload one file.
    Push {
        /// Local file.
        local: PathBuf,

        /// Remote destination path.
        remote: String,
    },

    /// Upload every file below a local directory.
    Sync {
        /// Local directory.
        dir: PathBuf,

        /// Remote directory the tree is mirrored into.
        remote_dir: String,

        /// Show what would be uploaded without touching the device.
        #[arg(long)]
        dry_run: bool,
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

fn init_logging(cli: &Cli) {
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
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            // Second Ctrl-C: stop waiting for the current exchange
            std::process::exit(130);
        }
        eprintln!(
            "\n{} finishing the current step, press Ctrl-C again to abort",
            style("Interrupted:").yellow()
        );
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    flipdeploy::set_interrupt_checker(was_interrupted);
}

/// Exit code for an error chain.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(flipdeploy::Error::Cancelled) = cause.downcast_ref::<flipdeploy::Error>() {
            return 130;
        }
    }
    1
}

fn report_error(err: &anyhow::Error) {
    eprintln!(
        "{} {err:#}",
        style("Error:")
            .red()
            .bold()
    );
    let hint = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<flipdeploy::Error>())
        .find_map(flipdeploy::Error::remediation_hint);
    if let Some(hint) = hint {
        eprintln!(
            "{} {hint}",
            style("Hint:")
                .cyan()
                .bold()
        );
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let options = cli.serial_options();

    match &cli.command {
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Info { json } => commands::info::cmd_info(&options, &config, *json),
        Commands::Ls {
            path,
            recursive,
            json,
        } => commands::storage::cmd_ls(&options, &config, path, *recursive, *json),
        Commands::Stat { path } => commands::storage::cmd_stat(&options, &config, path),
        Commands::Mkdir { path, parents } => {
            commands::storage::cmd_mkdir(&options, &config, path, *parents, cli.quiet)
        },
        Commands::Push { local, remote } => {
            commands::push::cmd_push(&options, &config, local, remote, cli.quiet)
        },
        Commands::Sync {
            dir,
            remote_dir,
            dry_run,
        } => commands::push::cmd_sync(&options, &config, dir, remote_dir, *dry_run, cli.quiet),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: flipdeploy completions bash \
                         (or use flipdeploy completions --install)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);
    debug!(
        "flipdeploy v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::from(exit_code_for(&err))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_push() {
        let cli = Cli::try_parse_from([
            "flipdeploy",
            "push",
            "TV.ir",
            "/ext/infrared/TV.ir",
        ])
        .unwrap();
        match cli.command {
            Commands::Push { local, remote } => {
                assert_eq!(local, PathBuf::from("TV.ir"));
                assert_eq!(remote, "/ext/infrared/TV.ir");
            },
            _ => panic!("Expected Push command"),
        }
    }

    #[test]
    fn test_cli_parse_sync_dry_run() {
        let cli =
            Cli::try_parse_from(["flipdeploy", "sync", "staging/nfc", "/ext/nfc", "--dry-run"])
                .unwrap();
        match cli.command {
            Commands::Sync {
                dir,
                remote_dir,
                dry_run,
            } => {
                assert_eq!(dir, PathBuf::from("staging/nfc"));
                assert_eq!(remote_dir, "/ext/nfc");
                assert!(dry_run);
            },
            _ => panic!("Expected Sync command"),
        }
    }

    #[test]
    fn test_cli_parse_ls_recursive_json() {
        let cli = Cli::try_parse_from(["flipdeploy", "ls", "/ext/nfc", "-r", "--json"]).unwrap();
        match cli.command {
            Commands::Ls {
                path,
                recursive,
                json,
            } => {
                assert_eq!(path, "/ext/nfc");
                assert!(recursive);
                assert!(json);
            },
            _ => panic!("Expected Ls command"),
        }
    }

    #[test]
    fn test_cli_parse_mkdir_parents() {
        let cli = Cli::try_parse_from(["flipdeploy", "mkdir", "-P", "/ext/apps/Games"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Mkdir { parents: true, .. }
        ));
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["flipdeploy", "info", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: true }));
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["flipdeploy", "list-ports"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: false }));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "flipdeploy",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "115200",
            "-vv",
            "--non-interactive",
            "stat",
            "/ext",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, Some(115_200));
        assert_eq!(cli.verbose, 2);
        assert!(cli.non_interactive);

        let options = cli.serial_options();
        assert_eq!(options.port.as_deref(), Some("/dev/ttyACM0"));
        assert!(options.non_interactive);
    }

    #[test]
    fn test_cli_global_option_after_subcommand() {
        let cli = Cli::try_parse_from(["flipdeploy", "info", "-p", "COM3"]).unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["flipdeploy"]).is_err());
    }

    #[test]
    fn test_cli_push_requires_remote() {
        assert!(Cli::try_parse_from(["flipdeploy", "push", "TV.ir"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let usage = anyhow::Error::new(CliError::Usage("bad".into()));
        assert_eq!(exit_code_for(&usage), 2);

        let cancelled = anyhow::Error::new(flipdeploy::Error::Cancelled).context("uploading");
        assert_eq!(exit_code_for(&cancelled), 130);

        let failed = anyhow::Error::new(CliError::UploadFailed {
            failed: 1,
            total: 3,
        });
        assert_eq!(exit_code_for(&failed), 1);

        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), 1);
    }
}
