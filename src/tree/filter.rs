// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Child filtering and ordering.

use crate::{entry::Entry, store::EntryStore};

use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, sync::Arc};

/// Predicate deciding if an entry is shown in the tree.
pub type EntryPredicate = Arc<dyn Fn(&Entry) -> bool + Send + Sync + 'static>;

/// Ordering of children inside one folder.
///
/// Folders always come before data entries, the order applies within each
/// group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Case-insensitive name order.
    #[default]
    Name,

    /// Newest first, name order among equals.
    LastModified,
}

impl SortOrder {
    pub fn compare(&self, lhs: &Entry, rhs: &Entry) -> Ordering {
        match self {
            Self::Name => compare_names(lhs, rhs),
            Self::LastModified => rhs
                .last_modified
                .cmp(&lhs.last_modified)
                .then_with(|| compare_names(lhs, rhs)),
        }
    }

    /// Compare two children of one folder, folders before data entries.
    pub fn compare_children(&self, lhs: &Entry, rhs: &Entry) -> Ordering {
        rhs.is_folder()
            .cmp(&lhs.is_folder())
            .then_with(|| self.compare(lhs, rhs))
    }

    pub fn sort(&self, entries: &mut [Entry]) {
        entries.sort_by(|lhs, rhs| self.compare(lhs, rhs));
    }
}

fn compare_names(lhs: &Entry, rhs: &Entry) -> Ordering {
    lhs.name()
        .to_lowercase()
        .cmp(&rhs.name().to_lowercase())
        .then_with(|| lhs.name().cmp(rhs.name()))
}

/// Active child filter of a tree.
///
/// Stages run in a fixed order: the folders-only mode, then the predicate,
/// then the writable-repository check. The last stage may ask a remote
/// backend, so it only ever sees entries the cheaper stages accepted.
#[derive(Clone, Default)]
pub struct TreeFilter {
    pub only_folders: bool,
    pub predicate: Option<EntryPredicate>,
    pub only_writable: bool,
}

impl TreeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only_folders(mut self, only_folders: bool) -> Self {
        self.only_folders = only_folders;
        self
    }

    pub fn only_writable(mut self, only_writable: bool) -> Self {
        self.only_writable = only_writable;
        self
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&Entry) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Check stages that need no store access.
    pub fn accepts_locally(&self, entry: &Entry) -> bool {
        if self.only_folders && !entry.is_folder() {
            return false;
        }

        self.predicate
            .as_ref()
            .map(|predicate| predicate(entry))
            .unwrap_or(true)
    }

    /// Check every stage.
    pub fn accepts<S: EntryStore + ?Sized>(&self, store: &S, entry: &Entry) -> bool {
        self.accepts_locally(entry) && self.accepts_repository(store, entry)
    }

    /// Check the writable-repository stage only.
    pub fn accepts_repository<S: EntryStore + ?Sized>(&self, store: &S, entry: &Entry) -> bool {
        !self.only_writable || store.is_writable(entry.location.repository_name())
    }

    /// Keep accepted entries in place.
    ///
    /// All entries are expected to live in the same repository, so the
    /// writable check runs at most once.
    pub fn retain<S: EntryStore + ?Sized>(&self, store: &S, entries: &mut Vec<Entry>) {
        entries.retain(|entry| self.accepts_locally(entry));
        if let Some(first) = entries.first() {
            if !self.accepts_repository(store, first) {
                entries.clear();
            }
        }
    }
}

impl fmt::Debug for TreeFilter {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("TreeFilter")
            .field("only_folders", &self.only_folders)
            .field("predicate", &self.predicate.is_some())
            .field("only_writable", &self.only_writable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entry::EntryKind,
        store::{MemoryStore, memory::RepositoryOptions},
    };
    use pretty_assertions::assert_eq;

    fn entry(name: &str, kind: EntryKind, last_modified: u64) -> Entry {
        Entry {
            location: format!("//Local/{name}").parse().unwrap(),
            kind,
            read_only: false,
            last_modified,
        }
    }

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(Entry::name).collect()
    }

    #[test]
    fn sort_by_name_ignores_case() {
        let mut entries = vec![
            entry("beta", EntryKind::Process, 1),
            entry("Alpha", EntryKind::Process, 2),
            entry("alpha", EntryKind::Process, 3),
        ];
        SortOrder::Name.sort(&mut entries);

        assert_eq!(names(&entries), vec!["Alpha", "alpha", "beta"]);
    }

    #[test]
    fn sort_by_last_modified_puts_newest_first() {
        let mut entries = vec![
            entry("b", EntryKind::Process, 5),
            entry("c", EntryKind::Process, 9),
            entry("a", EntryKind::Process, 5),
        ];
        SortOrder::LastModified.sort(&mut entries);

        assert_eq!(names(&entries), vec!["c", "a", "b"]);
    }

    #[test]
    fn filter_stages() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.add_repository(
            "Local",
            RepositoryOptions {
                writable: false,
                ..Default::default()
            },
        )?;

        let folder = entry("data", EntryKind::Folder, 0);
        let process = entry("etl", EntryKind::Process, 0);
        let hidden = entry(".hidden", EntryKind::Folder, 0);

        let filter = TreeFilter::new()
            .only_folders(true)
            .with_predicate(|entry| !entry.name().starts_with('.'));
        assert!(filter.accepts(&store, &folder));
        assert!(!filter.accepts(&store, &process));
        assert!(!filter.accepts(&store, &hidden));

        let filter = filter.only_writable(true);
        assert!(!filter.accepts(&store, &folder));

        let mut entries = vec![folder, process, hidden];
        TreeFilter::new().only_writable(true).retain(&store, &mut entries);
        assert!(entries.is_empty());

        Ok(())
    }
}
