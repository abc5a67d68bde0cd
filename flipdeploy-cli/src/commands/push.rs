//! File upload commands: `push` and `sync`.

use {
    crate::{
        CliError,
        commands::storage::format_size,
        config::Config,
        serial::{self, SerialOptions},
        use_fancy_output,
    },
    anyhow::{Context, Result},
    console::style,
    flipdeploy::{Error as DeviceError, UploadProgress},
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::debug,
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

fn require_absolute(remote: &str) -> Result<()> {
    if remote.starts_with('/') {
        Ok(())
    } else {
        Err(CliError::Usage(format!(
            "remote paths must be absolute (e.g. /ext/infrared/TV.ir), got {remote}"
        ))
        .into())
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Map a library cancellation onto the CLI's exit code.
fn cancelled_or(err: DeviceError, context: String) -> anyhow::Error {
    if matches!(err, DeviceError::Cancelled) {
        CliError::Cancelled("Upload cancelled".to_string()).into()
    } else {
        anyhow::Error::new(err).context(context)
    }
}

/// `push` command implementation.
pub(crate) fn cmd_push(
    options: &SerialOptions,
    config: &Config,
    local: &Path,
    remote: &str,
    quiet: bool,
) -> Result<()> {
    require_absolute(remote)?;
    let data =
        fs::read(local).with_context(|| format!("Failed to read {}", local.display()))?;

    let mut client = serial::connect(options, config)?;
    if let Some((parent, _)) = remote.rsplit_once('/') {
        client
            .mkdir_all(parent)
            .with_context(|| format!("Failed to create {parent}"))?;
    }

    let pb = progress_bar(quiet);
    pb.set_length(data.len() as u64);
    pb.set_message(remote.to_string());

    let outcome = client.write_file_with_progress(&data, remote, &mut |sent, _| {
        pb.set_position(sent as u64);
    });
    pb.finish_and_clear();

    let chunks = outcome.chunks;
    let retries = outcome.retries;
    outcome
        .into_result()
        .map_err(|e| cancelled_or(e, format!("Failed to upload {}", local.display())))?;
    client.disconnect()?;

    if !quiet {
        eprintln!(
            "{} {} -> {} ({}, {chunks} chunk(s){})",
            style("✓")
                .green()
                .bold(),
            local.display(),
            style(remote).cyan(),
            format_size(data.len() as u64),
            if retries > 0 {
                format!(", {retries} retried")
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

/// Files below `dir` paired with their remote paths below `remote_dir`,
/// sorted by remote path. Hidden entries are skipped.
pub(crate) fn collect_uploads(dir: &Path, remote_dir: &str) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Err(CliError::Usage(format!("{} is not a directory", dir.display())).into());
    }
    require_absolute(remote_dir)?;

    let base = remote_dir.trim_end_matches('/');
    let mut uploads = Vec::new();
    let mut pending = vec![(dir.to_path_buf(), base.to_string())];

    while let Some((local_dir, remote)) = pending.pop() {
        let entries = fs::read_dir(&local_dir)
            .with_context(|| format!("Failed to read directory {}", local_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                return Err(CliError::Usage(format!(
                    "{} is not valid UTF-8",
                    entry
                        .path()
                        .display()
                ))
                .into());
            };
            if name.starts_with('.') {
                debug!("Skipping hidden {}", entry.path().display());
                continue;
            }

            let remote_path = format!("{remote}/{name}");
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push((entry.path(), remote_path));
            } else if file_type.is_file() {
                uploads.push((remote_path, entry.path()));
            }
        }
    }

    uploads.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(uploads)
}

/// `sync` command implementation.
pub(crate) fn cmd_sync(
    options: &SerialOptions,
    config: &Config,
    dir: &Path,
    remote_dir: &str,
    dry_run: bool,
    quiet: bool,
) -> Result<()> {
    let uploads = collect_uploads(dir, remote_dir)?;
    if uploads.is_empty() {
        eprintln!("{} nothing to upload in {}", style("!").yellow(), dir.display());
        return Ok(());
    }

    if dry_run {
        for (remote, local) in &uploads {
            println!("{} -> {remote}", local.display());
        }
        eprintln!("{} file(s) would be uploaded", uploads.len());
        return Ok(());
    }

    let mut items = Vec::with_capacity(uploads.len());
    for (remote, local) in uploads {
        let data =
            fs::read(&local).with_context(|| format!("Failed to read {}", local.display()))?;
        items.push((remote, data));
    }

    let mut client = serial::connect(options, config)?;
    let pb = progress_bar(quiet);
    let report = client
        .upload_all(&items, &mut |event| match event {
            UploadProgress::FileStarted {
                index,
                count,
                path,
                size,
            } => {
                pb.set_length(size as u64);
                pb.set_position(0);
                pb.set_message(format!("[{}/{count}] {path}", index + 1));
            },
            UploadProgress::Bytes { sent, .. } => pb.set_position(sent as u64),
            UploadProgress::FileFinished { outcome } => {
                // Suspend so the line also shows when the bar is hidden
                if let Some(e) = outcome.error() {
                    pb.suspend(|| {
                        eprintln!(
                            "{} {}: {e}",
                            style("✗")
                                .red()
                                .bold(),
                            outcome.path
                        );
                    });
                } else if !quiet {
                    pb.suspend(|| eprintln!("{} {}", style("✓").green(), outcome.path));
                }
            },
        })
        .map_err(|e| cancelled_or(e, "Failed to prepare remote directories".to_string()))?;
    pb.finish_and_clear();

    if client.is_connected() {
        client.disconnect()?;
    }

    if !quiet {
        eprintln!(
            "{} uploaded, {} failed, {} sent",
            style(report.succeeded).green(),
            style(report.failed).red(),
            format_size(report.total_bytes as u64)
        );
    }

    if report.all_succeeded() {
        return Ok(());
    }
    let cancelled = report
        .outcomes
        .iter()
        .any(|o| matches!(o.error(), Some(DeviceError::Cancelled)));
    if cancelled {
        return Err(CliError::Cancelled("Upload cancelled".to_string()).into());
    }
    Err(CliError::UploadFailed {
        failed: report.failed,
        total: report.outcomes.len(),
    }
    .into())
}
