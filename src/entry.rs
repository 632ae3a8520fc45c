// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Entry hierarchy vocabulary.
//!
//! Every node in a repository store is an __entry__. Entries are addressed by
//! their __location__, a hierarchical path that starts at the name of the
//! repository that owns them, e.g., `//Local/processes/etl`. Repositories are
//! the roots of the hierarchy and the only entries without a containing
//! folder.
//!
//! Entries are plain snapshots handed out by a store. This crate never
//! creates or destroys them itself, it only reads them and asks the store to
//! copy or move them around.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Hierarchical address of an entry.
///
/// The first segment always names the repository. A location with exactly
/// one segment is the repository root itself.
///
/// # Invariant
///
/// - Never empty.
/// - No segment is empty or contains a `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    segments: Vec<String>,
}

impl Location {
    /// Location of a repository root.
    ///
    /// # Errors
    ///
    /// - Return [`LocationError::InvalidName`] if `name` is not a valid
    ///   segment.
    pub fn repository(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_segment(&name)?;
        Ok(Self {
            segments: vec![name],
        })
    }

    /// Location of child named `name` inside of this location.
    ///
    /// # Errors
    ///
    /// - Return [`LocationError::InvalidName`] if `name` is not a valid
    ///   segment.
    pub fn child(&self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_segment(&name)?;
        let mut segments = self.segments.clone();
        segments.push(name);
        Ok(Self { segments })
    }

    /// Name of the repository this location lives in.
    pub fn repository_name(&self) -> &str {
        &self.segments[0]
    }

    /// Location of the repository root this location lives in.
    pub fn repository_root(&self) -> Self {
        Self {
            segments: vec![self.segments[0].clone()],
        }
    }

    /// Last segment of the location.
    pub fn name(&self) -> &str {
        // INVARIANT: Segments are never empty.
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Location of the containing folder, `None` for repository roots.
    pub fn parent(&self) -> Option<Self> {
        if self.is_repository_root() {
            return None;
        }

        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Check if location addresses a repository root.
    pub fn is_repository_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// Check if this location is strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Location) -> bool {
        self.segments.len() > ancestor.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
    }

    /// Same location with its last segment swapped for `name`.
    ///
    /// # Errors
    ///
    /// - Return [`LocationError::InvalidName`] if `name` is not a valid
    ///   segment.
    pub fn with_name(&self, name: impl Into<String>) -> Result<Self> {
        match self.parent() {
            Some(parent) => parent.child(name),
            None => Self::repository(name),
        }
    }

    /// Re-root this location from `from` onto `to`.
    ///
    /// Returns `None` if this location is neither `from` nor below it.
    pub fn rebase(&self, from: &Location, to: &Location) -> Option<Self> {
        if self != from && !self.is_descendant_of(from) {
            return None;
        }

        let mut segments = to.segments.clone();
        segments.extend_from_slice(&self.segments[from.segments.len()..]);
        Some(Self { segments })
    }

    /// Number of segments, the repository root has depth one.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl Display for Location {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "//{}", self.segments.join("/"))
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(data: &str) -> Result<Self> {
        let trimmed = data
            .strip_prefix("//")
            .ok_or_else(|| LocationError::MissingPrefix(data.to_string()))?;
        let segments = trimmed
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        if segments.is_empty() {
            return Err(LocationError::Empty);
        }

        Ok(Self { segments })
    }
}

fn validate_segment(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(LocationError::InvalidName(name.to_string()));
    }

    Ok(())
}

/// Closed set of entry kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Root of a hierarchy.
    Repository,

    /// Ordinary folder.
    Folder,

    /// The dedicated connections folder of a repository.
    ConnectionsFolder,

    /// Connection definition.
    Connection,

    /// Process definition.
    Process,

    /// Any other stored object, tagged with its format.
    Data(String),
}

impl EntryKind {
    /// Check if entries of this kind can hold children.
    pub fn is_folder(&self) -> bool {
        matches!(
            self,
            Self::Repository | Self::Folder | Self::ConnectionsFolder
        )
    }
}

/// Snapshot of a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    pub location: Location,
    pub kind: EntryKind,
    pub read_only: bool,

    /// Seconds since the Unix epoch.
    pub last_modified: u64,
}

impl Entry {
    pub fn name(&self) -> &str {
        self.location.name()
    }

    /// Location of owning folder, `None` only for repositories.
    pub fn containing_folder(&self) -> Option<Location> {
        self.location.parent()
    }

    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    pub fn is_repository(&self) -> bool {
        self.kind == EntryKind::Repository
    }

    pub fn is_connection(&self) -> bool {
        self.kind == EntryKind::Connection
    }
}

/// Location handling error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// Location string does not start with `//`.
    #[error("location {0:?} must start with '//'")]
    MissingPrefix(String),

    /// Location string names no repository.
    #[error("location names no repository")]
    Empty,

    /// Entry name cannot be used as a path segment.
    #[error("invalid entry name {0:?}")]
    InvalidName(String),
}

/// Friendly result alias :3
type Result<T, E = LocationError> = std::result::Result<T, E>;
