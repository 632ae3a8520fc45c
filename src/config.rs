// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for configuration files that repotree uses to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.

use crate::{
    entry::{EntryKind, Location, LocationError},
    store::{memory::RepositoryOptions, EntryStore, MemoryStore, StoreError},
    tree::{SortOrder, TreeFilter},
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

/// User settings.
///
/// Every field is optional, an empty file yields the defaults.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Repository layout file to load instead of the default one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<PathBuf>,

    /// Defaults for tree views.
    pub tree: TreeSettings,
}

impl Settings {
    /// Build the child filter these settings describe.
    pub fn tree_filter(&self) -> TreeFilter {
        TreeFilter::new()
            .only_folders(self.tree.only_folders)
            .only_writable(self.tree.only_writable)
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on layout path.
        if let Some(layout) = settings.layout.take() {
            let expanded = shellexpand::full(layout.to_string_lossy().as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned();
            settings.layout = Some(PathBuf::from(expanded));
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Tree view defaults.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TreeSettings {
    pub sort: SortOrder,
    pub only_folders: bool,
    pub only_writable: bool,
}

/// Serialized repository hierarchy.
///
/// # General Layout
///
/// A layout lists every repository along with the entries stored inside of
/// it. Entry paths are relative to their repository root, and intermediate
/// folders need not be listed explicitly. Connections folders are implied by
/// the `connections` flag of their repository.
///
/// ```toml
/// [[repository]]
/// name = "Local"
/// writable = true
/// connections = true
///
/// [[repository.entry]]
/// path = "processes/etl"
/// kind = "process"
/// modified = 1700000000
/// ```
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Layout {
    #[serde(default, rename = "repository")]
    pub repositories: Vec<LayoutRepository>,
}

impl Layout {
    /// Build an in-memory store holding this layout.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Location`] if a name or path is malformed.
    /// - Return [`ConfigError::Store`] if a repository is listed twice.
    pub fn to_store(&self) -> Result<MemoryStore> {
        let store = MemoryStore::new();
        for repository in &self.repositories {
            let root = store.add_repository(&repository.name, repository.options())?;
            for entry in &repository.entries {
                let location = entry.location(&root)?;
                store.insert_path(&location, entry.entry_kind(), entry.modified);
            }
        }

        Ok(store)
    }

    /// Capture current hierarchy of a store.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Store`] if the store cannot list repositories.
    pub fn from_store(store: &MemoryStore) -> Result<Self> {
        let mut repositories = Vec::new();
        for root in store.repositories()? {
            let name = root.location.repository_name().to_string();
            let options = store.repository_options(&name).unwrap_or_default();
            repositories.push(LayoutRepository {
                name,
                writable: options.writable,
                connections: options.connections,
                latency_ms: options.latency.map(|latency| latency.as_millis() as u64),
                entries: Vec::new(),
            });
        }

        for entry in store.entries() {
            let kind = match &entry.kind {
                EntryKind::Folder => LayoutKind::Folder,
                EntryKind::Process => LayoutKind::Process,
                EntryKind::Connection => LayoutKind::Connection,
                EntryKind::Data(_) => LayoutKind::Data,
                EntryKind::Repository | EntryKind::ConnectionsFolder => continue,
            };
            let format = match entry.kind {
                EntryKind::Data(format) => Some(format),
                _ => None,
            };

            let root = entry.location.repository_root();
            let full = entry.location.to_string();
            let path = full
                .strip_prefix(&format!("{root}/"))
                .unwrap_or(full.as_str())
                .to_string();

            if let Some(repository) = repositories
                .iter_mut()
                .find(|repository| repository.name == root.repository_name())
            {
                repository.entries.push(LayoutEntry {
                    path,
                    kind,
                    format,
                    modified: entry.last_modified,
                });
            }
        }

        Ok(Self { repositories })
    }
}

impl FromStr for Layout {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for Layout {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Repository listing of a layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LayoutRepository {
    pub name: String,

    #[serde(default = "enabled")]
    pub writable: bool,

    #[serde(default = "enabled")]
    pub connections: bool,

    /// Artificial listing delay, marks the repository as slow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    #[serde(default, rename = "entry")]
    pub entries: Vec<LayoutEntry>,
}

impl LayoutRepository {
    pub fn options(&self) -> RepositoryOptions {
        RepositoryOptions {
            writable: self.writable,
            connections: self.connections,
            latency: self.latency_ms.map(Duration::from_millis),
        }
    }
}

fn enabled() -> bool {
    true
}

/// Entry listing of a layout repository.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LayoutEntry {
    /// Path relative to the repository root, segments split by `/`.
    pub path: String,

    pub kind: LayoutKind,

    /// Format of data entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default)]
    pub modified: u64,
}

impl LayoutEntry {
    fn location(&self, root: &Location) -> Result<Location> {
        let mut location = root.clone();
        for segment in self.path.split('/').filter(|segment| !segment.is_empty()) {
            location = location.child(segment)?;
        }

        if location == *root {
            return Err(ConfigError::Location(LocationError::Empty));
        }

        Ok(location)
    }

    fn entry_kind(&self) -> EntryKind {
        match self.kind {
            LayoutKind::Folder => EntryKind::Folder,
            LayoutKind::Process => EntryKind::Process,
            LayoutKind::Connection => EntryKind::Connection,
            LayoutKind::Data => EntryKind::Data(self.format.clone().unwrap_or_default()),
        }
    }
}

/// Kinds of entries a layout can list.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Folder,
    Process,
    Connection,
    Data,
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Layout names a malformed location.
    #[error(transparent)]
    Location(#[from] LocationError),

    /// Layout cannot be loaded into or read from a store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
