//! Remote filesystem commands: `ls`, `stat`, `mkdir`.

use {
    crate::{
        CliError,
        config::Config,
        serial::{self, SerialOptions},
    },
    anyhow::{Context, Result},
    console::style,
    flipdeploy::{Entry, EntryKind, PathStat},
};

/// Human-readable byte count.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn kind_str(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::File => "file",
        EntryKind::Directory => "dir",
    }
}

/// One styled listing line.
fn format_entry(entry: &Entry) -> String {
    match entry.kind {
        EntryKind::Directory => format!(
            "  {} {}/",
            style("[D]").blue(),
            style(&entry.name)
                .blue()
                .bold()
        ),
        EntryKind::File => format!(
            "  {} {} {}",
            style("[F]").dim(),
            entry.name,
            style(format_size(
                entry
                    .size
                    .unwrap_or(0)
            ))
            .dim()
        ),
    }
}

/// `ls` command implementation.
pub(crate) fn cmd_ls(
    options: &SerialOptions,
    config: &Config,
    path: &str,
    recursive: bool,
    json: bool,
) -> Result<()> {
    let mut client = serial::connect(options, config)?;
    let entries = if recursive {
        client.walk(path)
    } else {
        client.list(path)
    }
    .with_context(|| format!("Failed to list {path}"))?;
    client.disconnect()?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "path": path,
                "entries": entries,
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!("  {}", style("(empty)").dim());
    }
    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    Ok(())
}

fn describe_stat(path: &str, stat: PathStat) -> String {
    match stat {
        PathStat::Missing => format!("{path}: missing"),
        PathStat::Exists {
            kind,
            size: Some(size),
        } => format!("{path}: {}, {}", kind_str(kind), format_size(size)),
        PathStat::Exists { kind, size: None } => format!("{path}: {}", kind_str(kind)),
    }
}

/// `stat` command implementation.
///
/// A missing path is reported on stdout and is not an error.
pub(crate) fn cmd_stat(options: &SerialOptions, config: &Config, path: &str) -> Result<()> {
    let mut client = serial::connect(options, config)?;
    let stat = client
        .stat(path)
        .with_context(|| format!("Failed to stat {path}"))?;
    client.disconnect()?;

    println!("{}", describe_stat(path, stat));
    Ok(())
}

/// `mkdir` command implementation.
pub(crate) fn cmd_mkdir(
    options: &SerialOptions,
    config: &Config,
    path: &str,
    parents: bool,
    quiet: bool,
) -> Result<()> {
    if !path.starts_with('/') {
        return Err(CliError::Usage(format!(
            "remote paths must be absolute (e.g. /ext/apps), got {path}"
        ))
        .into());
    }

    let mut client = serial::connect(options, config)?;
    if parents {
        client.mkdir_all(path)
    } else {
        client.mkdir(path)
    }
    .with_context(|| format!("Failed to create {path}"))?;
    client.disconnect()?;

    if !quiet {
        eprintln!(
            "{} {}",
            style("✓")
                .green()
                .bold(),
            path
        );
    }
    Ok(())
}
