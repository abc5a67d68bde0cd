//! Shell completion generation and installation.

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use console::style;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::Cli;

const BIN_NAME: &str = "flipdeploy";

/// Write the completion script for `shell` to `out`.
fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, BIN_NAME, out);
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

/// Shell named by a `$SHELL`-style path.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    match Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())?
    {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        _ => None,
    }
}

fn home_dir() -> Result<PathBuf> {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .context("Could not determine home directory")
}

/// Where the completion script for `shell` is installed below `home`.
///
/// Only shells that pick up scripts from a well-known directory are supported.
fn install_path(shell: Shell, home: &Path) -> Result<PathBuf> {
    let data_home = env::var_os("XDG_DATA_HOME")
        .map_or_else(|| home.join(".local/share"), PathBuf::from);
    let config_home = env::var_os("XDG_CONFIG_HOME")
        .map_or_else(|| home.join(".config"), PathBuf::from);

    match shell {
        Shell::Bash => Ok(data_home
            .join("bash-completion/completions")
            .join(BIN_NAME)),
        Shell::Zsh => Ok(home
            .join(".zfunc")
            .join(format!("_{BIN_NAME}"))),
        Shell::Fish => Ok(config_home
            .join("fish/completions")
            .join(format!("{BIN_NAME}.fish"))),
        other => anyhow::bail!(
            "Automatic install is not supported for {other}; redirect `{BIN_NAME} completions {other}` instead"
        ),
    }
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => env::var("SHELL")
            .ok()
            .as_deref()
            .and_then(shell_from_path)
            .context(
                "Could not detect your shell. Please specify it explicitly:\n  \
                 flipdeploy completions --install bash",
            )?,
    };

    let path = install_path(shell, &home_dir()?)?;
    let mut buf = Vec::new();
    write_completions(shell, &mut buf);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &buf)
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {shell} completions to {}",
        style("✓")
            .green()
            .bold(),
        style(path.display()).yellow()
    );
    if shell == Shell::Zsh {
        eprintln!(
            "Make sure {} is in your .zshrc before compinit.",
            style("fpath=(~/.zfunc $fpath)").cyan()
        );
    }

    Ok(())
}
