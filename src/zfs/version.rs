//! Snapshot and bookmark version model.

use std::fmt;

use thiserror::Error;

use crate::zfs::path::DatasetPath;

/// Kind of a filesystem version. A bookmark preserves a snapshot's identity
/// (GUID, createtxg) without holding data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionType {
    Snapshot,
    Bookmark,
}

impl VersionType {
    /// The delimiter between filesystem and version name.
    pub fn delimiter(self) -> char {
        match self {
            VersionType::Snapshot => '@',
            VersionType::Bookmark => '#',
        }
    }

    pub fn from_delimiter(c: char) -> Option<Self> {
        match c {
            '@' => Some(VersionType::Snapshot),
            '#' => Some(VersionType::Bookmark),
            _ => None,
        }
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionType::Snapshot => write!(f, "snapshot"),
            VersionType::Bookmark => write!(f, "bookmark"),
        }
    }
}

/// One version of a filesystem, as reported by a version listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemVersion {
    pub kind: VersionType,
    /// Short name, without the filesystem prefix and delimiter.
    pub name: String,
    /// Pool-global 64-bit identifier; shared between a snapshot and any
    /// bookmark derived from it.
    pub guid: u64,
    /// Monotone per-pool creation transaction number.
    pub createtxg: u64,
    /// Creation time, seconds since the epoch.
    pub creation: u64,
}

impl FilesystemVersion {
    /// Version name relative to its filesystem, e.g. `@daily-2026` or
    /// `#cursor`.
    pub fn rel_name(&self) -> String {
        format!("{}{}", self.kind.delimiter(), self.name)
    }

    /// Absolute version name, e.g. `tank/a@daily-2026`.
    pub fn to_abs_path(&self, fs: &DatasetPath) -> String {
        format!("{}{}{}", fs, self.kind.delimiter(), self.name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed version string {input:?}: {reason}")]
pub struct DecomposeVersionError {
    pub input: String,
    pub reason: &'static str,
}

/// Split an absolute version string `fs@name` / `fs#name` into filesystem,
/// version type, and short name.
pub fn decompose_version_string(
    s: &str,
) -> Result<(String, VersionType, String), DecomposeVersionError> {
    let err = |reason| DecomposeVersionError {
        input: s.to_string(),
        reason,
    };
    let idx = s
        .find(['@', '#'])
        .ok_or_else(|| err("contains neither '@' nor '#'"))?;
    let (fs, rel) = s.split_at(idx);
    let mut rel_chars = rel.chars();
    let delim = rel_chars.next().expect("split_at on a found index");
    let name = rel_chars.as_str();
    if fs.is_empty() {
        return Err(err("empty filesystem part"));
    }
    if name.is_empty() {
        return Err(err("empty version name"));
    }
    if name.contains(['@', '#']) {
        return Err(err("more than one version delimiter"));
    }
    let kind = VersionType::from_delimiter(delim).expect("delimiter came from find");
    Ok((fs.to_string(), kind, name.to_string()))
}

/// Shape check for a relative version name: non-empty and starting with
/// `@` or `#`.
pub fn validate_rel_name(rel_name: &str) -> Result<VersionType, DecomposeVersionError> {
    let err = |reason| DecomposeVersionError {
        input: rel_name.to_string(),
        reason,
    };
    let first = rel_name.chars().next().ok_or_else(|| err("empty"))?;
    let kind = VersionType::from_delimiter(first)
        .ok_or_else(|| err("must start with '@' or '#'"))?;
    if rel_name.len() == 1 {
        return Err(err("empty version name"));
    }
    Ok(kind)
}
