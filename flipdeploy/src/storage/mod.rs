//! Remote filesystem operations.
//!
//! Thin wrappers over `storage mkdir|stat|list` that turn the CLI's text
//! output into typed results, plus the chunked writer in [`transfer`].

pub mod transfer;

use std::collections::BTreeSet;

use log::debug;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Command, CommandSession};

pub use transfer::{TransferConfig, TransferOutcome, TransferStatus, write_file};

/// Storage root below which directories are never created.
pub const STORAGE_ROOT: &str = "/ext";

const ALREADY_EXISTS: &str = "already exist";
const NOT_EXIST: &str = "not exist";

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory (or a storage root).
    Directory,
}

/// One line of `storage list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Entry {
    /// Name, or full path when produced by [`walk`].
    pub name: String,
    /// Size in bytes; files only.
    pub size: Option<u64>,
    /// Entry kind.
    pub kind: EntryKind,
}

/// Result of `storage stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStat {
    /// Nothing at that path.
    Missing,
    /// Something exists.
    Exists {
        /// Entry kind.
        kind: EntryKind,
        /// Size in bytes; files only.
        size: Option<u64>,
    },
}

/// Parse a `123b` size field.
pub fn parse_size(field: &str) -> Option<u64> {
    field
        .trim()
        .strip_suffix('b')?
        .parse()
        .ok()
}

/// Parse the body of `storage list`.
///
/// Unrecognized lines are skipped.
pub fn parse_list(body: &str) -> Vec<Entry> {
    body.lines()
        .map(str::trim)
        .filter_map(|line| {
            if let Some(name) = line.strip_prefix("[D] ") {
                Some(Entry {
                    name: name.to_string(),
                    size: None,
                    kind: EntryKind::Directory,
                })
            } else if let Some(rest) = line.strip_prefix("[F] ") {
                // Name may contain spaces; the size is the last field
                let (name, size) = match rest.rsplit_once(' ') {
                    Some((name, field)) if parse_size(field).is_some() => (name, parse_size(field)),
                    _ => (rest, None),
                };
                Some(Entry {
                    name: name.to_string(),
                    size,
                    kind: EntryKind::File,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Parse the body of a successful `storage stat`.
pub fn parse_stat(body: &str) -> Result<PathStat> {
    let line = body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    if line.starts_with("Directory") || line.starts_with("Storage") {
        Ok(PathStat::Exists {
            kind: EntryKind::Directory,
            size: None,
        })
    } else if let Some(rest) = line.strip_prefix("File") {
        let size = rest
            .split_once("size:")
            .and_then(|(_, field)| parse_size(field));
        Ok(PathStat::Exists {
            kind: EntryKind::File,
            size,
        })
    } else {
        Err(Error::ProtocolViolation(format!(
            "unexpected stat output: {line:?}"
        )))
    }
}

fn device_error(path: &str, message: String) -> Error {
    Error::DeviceReported {
        path: path.to_string(),
        offset: 0,
        message,
    }
}

/// Create a directory. An existing directory counts as success.
pub fn mkdir<P: Port>(session: &mut CommandSession<P>, path: &str) -> Result<()> {
    let response = session.execute(&Command::storage_mkdir(path)?)?;
    match response.storage_error() {
        None => {
            debug!("Created {path}");
            Ok(())
        },
        Some(message) if message.contains(ALREADY_EXISTS) => {
            debug!("{path} already exists");
            Ok(())
        },
        Some(message) => Err(device_error(path, message)),
    }
}

/// Create `path` and every missing ancestor below the storage root.
pub fn mkdir_all<P: Port>(session: &mut CommandSession<P>, path: &str) -> Result<()> {
    for dir in ancestors(path) {
        mkdir(session, &dir)?;
    }
    Ok(())
}

/// Query a path.
pub fn stat<P: Port>(session: &mut CommandSession<P>, path: &str) -> Result<PathStat> {
    let response = session.execute(&Command::storage_stat(path)?)?;
    match response.storage_error() {
        None => parse_stat(&response.body()),
        Some(message) if message.contains(NOT_EXIST) => Ok(PathStat::Missing),
        Some(message) => Err(device_error(path, message)),
    }
}

/// List a directory.
pub fn list<P: Port>(session: &mut CommandSession<P>, path: &str) -> Result<Vec<Entry>> {
    let response = session.execute(&Command::storage_list(path)?)?;
    match response.storage_error() {
        None => Ok(parse_list(&response.body())),
        Some(message) if message.contains(NOT_EXIST) => Err(Error::NotFound(path.to_string())),
        Some(message) => Err(device_error(path, message)),
    }
}

/// List every file below `path`, depth first, with full paths as names.
pub fn walk<P: Port>(session: &mut CommandSession<P>, path: &str) -> Result<Vec<Entry>> {
    let mut files = Vec::new();
    let mut pending = vec![path.trim_end_matches('/').to_string()];

    while let Some(dir) = pending.pop() {
        let mut subdirs = Vec::new();
        for entry in list(session, &dir)? {
            let full = format!("{dir}/{}", entry.name);
            match entry.kind {
                EntryKind::Directory => subdirs.push(full),
                EntryKind::File => files.push(Entry {
                    name: full,
                    ..entry
                }),
            }
        }
        // Visit subdirectories in listing order
        pending.extend(
            subdirs
                .into_iter()
                .rev(),
        );
    }
    Ok(files)
}

/// Directories from just below the storage root down to `path`, outermost first.
fn ancestors(path: &str) -> Vec<String> {
    let trimmed = path.trim_end_matches('/');
    let mut dirs = Vec::new();
    let mut current = trimmed;
    while !current.is_empty() && current != STORAGE_ROOT && current != "/" {
        dirs.push(current.to_string());
        current = match current.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => "",
        };
    }
    dirs.reverse();
    dirs
}

/// Every directory implied by a set of remote file paths, sorted so that
/// parents come before children. The storage root itself is excluded.
pub fn required_dirs<'a, I>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut dirs = BTreeSet::new();
    for path in paths {
        if let Some((parent, _)) = path.rsplit_once('/') {
            dirs.extend(ancestors(parent));
        }
    }
    dirs.into_iter()
        .collect()
}
