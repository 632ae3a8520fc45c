// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! In-memory entry store.
//!
//! Keeps a whole repository hierarchy in a sorted map keyed by location.
//! Serves as the backend of the command line front end, where the hierarchy
//! is loaded from and saved to a layout file, and as the backend of tests,
//! where faults can be injected into listings and transfers.

use crate::{
    entry::{Entry, EntryKind, Location},
    progress::ProgressListener,
    store::{EntryStore, ListenerId, Listeners, Result, StoreError, StoreEvent, StoreListener},
};

use dashmap::DashMap;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Mutex, PoisonError, RwLock},
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, instrument};

/// Name of the connections folder in repositories that support connections.
pub const CONNECTIONS_FOLDER: &str = "Connections";

/// Per-repository behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOptions {
    /// Repository accepts modification.
    pub writable: bool,

    /// Repository has a dedicated connections folder.
    pub connections: bool,

    /// Artificial delay of every folder listing. Repositories with a delay
    /// are reported as slow.
    pub latency: Option<Duration>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            writable: true,
            connections: true,
            latency: None,
        }
    }
}

/// Mutation performed through [`EntryStore::copy`] or
/// [`EntryStore::move_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperation {
    Copy {
        source: Location,
        target: Location,
        overwrite: bool,
    },
    Move {
        source: Location,
        target: Location,
        overwrite: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Copy,
    Move,
}

#[derive(Debug, Clone)]
struct Node {
    kind: EntryKind,
    last_modified: u64,
}

#[derive(Debug, Default)]
struct State {
    repositories: BTreeMap<String, RepositoryOptions>,
    nodes: BTreeMap<Location, Node>,
}

impl State {
    fn entry(&self, location: &Location) -> Option<Entry> {
        let node = self.nodes.get(location)?;
        let writable = self
            .repositories
            .get(location.repository_name())
            .map(|options| options.writable)
            .unwrap_or(false);

        Some(Entry {
            location: location.clone(),
            kind: node.kind.clone(),
            read_only: !writable,
            last_modified: node.last_modified,
        })
    }

    fn options(&self, repository: &str) -> Result<&RepositoryOptions> {
        self.repositories
            .get(repository)
            .ok_or_else(|| StoreError::Failure(format!("unknown repository {repository:?}")))
    }

    /// Location followed by all of its descendants, in order.
    fn subtree(&self, location: &Location) -> Vec<Location> {
        self.nodes
            .range(location.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| *key == location || key.is_descendant_of(location))
            .cloned()
            .collect()
    }

    fn children(&self, folder: &Location) -> Vec<Entry> {
        self.subtree(folder)
            .into_iter()
            .filter(|key| key.depth() == folder.depth() + 1)
            .filter_map(|key| self.entry(&key))
            .collect()
    }

    fn folder(&self, location: &Location) -> Result<&Node> {
        match self.nodes.get(location) {
            Some(node) if node.kind.is_folder() => Ok(node),
            Some(_) => Err(StoreError::Failure(format!("{location} is not a folder"))),
            None => Err(StoreError::NotFound(location.clone())),
        }
    }

    /// Enforce the hierarchy rules for placing `source` into `target`.
    fn check_placement(
        &self,
        source: &Location,
        source_kind: &EntryKind,
        target: &Location,
        transfer: Transfer,
    ) -> Result<()> {
        let target_node = self.folder(target)?;
        let target_repository = target.repository_name();
        let target_options = self.options(target_repository)?;

        if !target_options.writable {
            return Err(StoreError::ReadOnly(target_repository.to_string()));
        }

        if transfer == Transfer::Move {
            if source.is_repository_root() {
                return Err(StoreError::Failure(format!(
                    "repository {source} cannot be moved"
                )));
            }

            let source_repository = source.repository_name();
            if !self.options(source_repository)?.writable {
                return Err(StoreError::ReadOnly(source_repository.to_string()));
            }
        }

        if target == source || target.is_descendant_of(source) {
            return Err(StoreError::Failure(format!(
                "cannot place {source} inside of itself"
            )));
        }

        if *source_kind == EntryKind::ConnectionsFolder {
            return Err(StoreError::ConnectionsFolderImmutable(source.clone()));
        }

        if target_node.kind == EntryKind::ConnectionsFolder {
            if source_kind.is_folder() {
                return Err(StoreError::ConnectionsFolderImmutable(target.clone()));
            }

            if *source_kind != EntryKind::Connection {
                return Err(StoreError::StoreOtherInConnectionsFolder {
                    entry: source.clone(),
                    folder: target.clone(),
                });
            }
        }

        if *source_kind == EntryKind::Connection {
            if !target_options.connections {
                return Err(StoreError::ConnectionsNotSupported(
                    target_repository.to_string(),
                ));
            }

            if target_node.kind != EntryKind::ConnectionsFolder {
                return Err(StoreError::NotAConnectionsFolder {
                    entry: source.clone(),
                    connections_folder: connections_folder_of(target_repository)?,
                });
            }
        }

        Ok(())
    }

    fn remove_subtree(&mut self, location: &Location) -> Vec<(Location, Node)> {
        self.subtree(location)
            .into_iter()
            .filter_map(|key| self.nodes.remove(&key).map(|node| (key, node)))
            .collect()
    }
}

fn connections_folder_of(repository: &str) -> Result<Location> {
    Location::repository(repository)
        .and_then(|root| root.child(CONNECTIONS_FOLDER))
        .map_err(|error| StoreError::Failure(error.to_string()))
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Thread-safe repository hierarchy held in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    listeners: Listeners,
    listing_faults: Mutex<HashMap<Location, VecDeque<StoreError>>>,
    transfer_faults: Mutex<HashMap<Location, VecDeque<StoreError>>>,
    listings: DashMap<Location, usize>,
    operations: Mutex<Vec<StoreOperation>>,
}

impl MemoryStore {
    /// Construct new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, events: Vec<StoreEvent>) {
        for event in events {
            self.listeners.notify(&event);
        }
    }

    /// Add a new repository.
    ///
    /// Repositories supporting connections receive their connections folder
    /// right away.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::AlreadyExists`] if repository exists already.
    #[instrument(skip(self, options), level = "debug")]
    pub fn add_repository(&self, name: &str, options: RepositoryOptions) -> Result<Location> {
        let root =
            Location::repository(name).map_err(|error| StoreError::Failure(error.to_string()))?;
        let mut events = Vec::new();
        {
            let mut state = self.write();
            if state.repositories.contains_key(name) {
                return Err(StoreError::AlreadyExists(root));
            }

            let connections = options.connections;
            state.repositories.insert(name.to_string(), options);
            state.nodes.insert(
                root.clone(),
                Node {
                    kind: EntryKind::Repository,
                    last_modified: now(),
                },
            );
            events.extend(state.entry(&root).map(|entry| StoreEvent::EntryAdded { entry }));

            if connections {
                let folder = connections_folder_of(name)?;
                state.nodes.insert(
                    folder.clone(),
                    Node {
                        kind: EntryKind::ConnectionsFolder,
                        last_modified: now(),
                    },
                );
                events.extend(state.entry(&folder).map(|entry| StoreEvent::EntryAdded { entry }));
            }
        }

        debug!("added repository {root}");
        self.publish(events);
        Ok(root)
    }

    /// Options of repository `name`.
    pub fn repository_options(&self, name: &str) -> Option<RepositoryOptions> {
        self.read().repositories.get(name).cloned()
    }

    /// Change whether a repository accepts modification.
    pub fn set_writable(&self, name: &str, writable: bool) {
        if let Some(options) = self.write().repositories.get_mut(name) {
            options.writable = writable;
        }
    }

    /// Add a plain folder.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if the containing folder is missing.
    /// - Return [`StoreError::AlreadyExists`] if the location is taken.
    pub fn add_folder(&self, location: &Location) -> Result<Entry> {
        self.add_entry(location, EntryKind::Folder, now())
    }

    /// Add an entry of any non-repository kind.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if the containing folder is missing.
    /// - Return [`StoreError::AlreadyExists`] if the location is taken.
    pub fn add_entry(
        &self,
        location: &Location,
        kind: EntryKind,
        last_modified: u64,
    ) -> Result<Entry> {
        let parent = location
            .parent()
            .ok_or_else(|| StoreError::Failure("use add_repository for roots".into()))?;

        let entry = {
            let mut state = self.write();
            state.folder(&parent)?;
            if state.nodes.contains_key(location) {
                return Err(StoreError::AlreadyExists(location.clone()));
            }

            state.nodes.insert(
                location.clone(),
                Node {
                    kind,
                    last_modified,
                },
            );
            state
                .entry(location)
                .ok_or_else(|| StoreError::NotFound(location.clone()))?
        };

        self.publish(vec![StoreEvent::EntryAdded {
            entry: entry.clone(),
        }]);
        Ok(entry)
    }

    /// Add entry, creating any missing intermediate folders silently.
    ///
    /// Used to load layouts, so no notifications are published.
    pub(crate) fn insert_path(&self, location: &Location, kind: EntryKind, last_modified: u64) {
        let mut state = self.write();
        let mut ancestor = location.parent();
        while let Some(folder) = ancestor {
            if folder.is_repository_root() {
                break;
            }

            state.nodes.entry(folder.clone()).or_insert(Node {
                kind: EntryKind::Folder,
                last_modified,
            });
            ancestor = folder.parent();
        }

        state.nodes.insert(
            location.clone(),
            Node {
                kind,
                last_modified,
            },
        );
    }

    /// Remove entry and everything below it.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if nothing lives at the location.
    pub fn remove(&self, location: &Location) -> Result<()> {
        let event = {
            let mut state = self.write();
            let entry = state
                .entry(location)
                .ok_or_else(|| StoreError::NotFound(location.clone()))?;
            let parent = location
                .parent()
                .ok_or_else(|| StoreError::Failure("repositories cannot be removed".into()))?;
            state.remove_subtree(location);
            StoreEvent::EntryRemoved { entry, parent }
        };

        self.publish(vec![event]);
        Ok(())
    }

    /// Rename entry in place.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if nothing lives at the location.
    /// - Return [`StoreError::AlreadyExists`] if the new name is taken.
    pub fn rename(&self, location: &Location, new_name: &str) -> Result<Location> {
        let renamed = location
            .with_name(new_name)
            .map_err(|error| StoreError::Failure(error.to_string()))?;

        let event = {
            let mut state = self.write();
            if !state.nodes.contains_key(location) {
                return Err(StoreError::NotFound(location.clone()));
            }

            if location.is_repository_root() {
                return Err(StoreError::Failure("repositories cannot be renamed".into()));
            }

            if state.nodes.contains_key(&renamed) {
                return Err(StoreError::AlreadyExists(renamed));
            }

            for (key, node) in state.remove_subtree(location) {
                if let Some(rebased) = key.rebase(location, &renamed) {
                    state.nodes.insert(rebased, node);
                }
            }

            let entry = state
                .entry(&renamed)
                .ok_or_else(|| StoreError::NotFound(renamed.clone()))?;
            StoreEvent::EntryChanged {
                entry,
                previous: location.clone(),
            }
        };

        self.publish(vec![event]);
        Ok(renamed)
    }

    /// Update modification time of an entry.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if nothing lives at the location.
    pub fn touch(&self, location: &Location, last_modified: u64) -> Result<Entry> {
        let entry = {
            let mut state = self.write();
            let node = state
                .nodes
                .get_mut(location)
                .ok_or_else(|| StoreError::NotFound(location.clone()))?;
            node.last_modified = last_modified;
            state
                .entry(location)
                .ok_or_else(|| StoreError::NotFound(location.clone()))?
        };

        self.publish(vec![StoreEvent::EntryChanged {
            entry: entry.clone(),
            previous: location.clone(),
        }]);
        Ok(entry)
    }

    /// Announce that folder content was reloaded.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if nothing lives at the location.
    pub fn refresh(&self, folder: &Location) -> Result<()> {
        let folder = self
            .read()
            .entry(folder)
            .ok_or_else(|| StoreError::NotFound(folder.clone()))?;

        self.publish(vec![StoreEvent::FolderRefreshed { folder }]);
        Ok(())
    }

    /// Announce that a repository lost its backend connection.
    pub fn disconnect(&self, repository: &Location) {
        self.publish(vec![StoreEvent::RepositoryDisconnected {
            repository: repository.repository_root(),
        }]);
    }

    /// Make the next listing of `folder` fail with `error`.
    ///
    /// Faults queue up, each one is consumed by one listing.
    pub fn inject_listing_fault(&self, folder: &Location, error: StoreError) {
        self.listing_faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(folder.clone())
            .or_default()
            .push_back(error);
    }

    /// Make the next copy or move of `source` fail with `error`.
    ///
    /// Faults queue up, each one is consumed by one transfer attempt.
    pub fn inject_transfer_fault(&self, source: &Location, error: StoreError) {
        self.transfer_faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(source.clone())
            .or_default()
            .push_back(error);
    }

    /// Number of times the subfolders of `folder` were listed.
    pub fn listing_count(&self, folder: &Location) -> usize {
        self.listings.get(folder).map(|count| *count).unwrap_or(0)
    }

    /// Every successful copy and move, in order.
    pub fn operations(&self) -> Vec<StoreOperation> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every entry including repository roots, in location order.
    pub fn entries(&self) -> Vec<Entry> {
        let state = self.read();
        state
            .nodes
            .keys()
            .filter_map(|key| state.entry(key))
            .collect()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn take_fault(
        faults: &Mutex<HashMap<Location, VecDeque<StoreError>>>,
        location: &Location,
    ) -> Option<StoreError> {
        faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(location)
            .and_then(VecDeque::pop_front)
    }

    fn simulate_latency(&self, folder: &Location) {
        let latency = self
            .read()
            .repositories
            .get(folder.repository_name())
            .and_then(|options| options.latency);

        if let Some(latency) = latency {
            thread::sleep(latency);
        }
    }

    #[instrument(skip(self, progress), level = "debug")]
    fn transfer(
        &self,
        transfer: Transfer,
        source: &Location,
        target: &Location,
        new_name: Option<&str>,
        overwrite: bool,
        progress: &mut dyn ProgressListener,
    ) -> Result<Location> {
        if let Some(error) = Self::take_fault(&self.transfer_faults, source) {
            debug!("injected transfer fault for {source}: {error}");
            return Err(error);
        }

        let mut events = Vec::new();
        let destination = {
            let mut state = self.write();
            let source_node = state
                .nodes
                .get(source)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(source.clone()))?;
            state.check_placement(source, &source_node.kind, target, transfer)?;

            let name = new_name.unwrap_or_else(|| source.name());
            let destination = target
                .child(name)
                .map_err(|error| StoreError::Failure(error.to_string()))?;

            if destination == *source {
                return Err(StoreError::AlreadyExists(destination));
            }

            if source.is_descendant_of(&destination) {
                return Err(StoreError::Failure(format!(
                    "cannot replace {destination} with its own descendant {source}"
                )));
            }

            if let Some(existing) = state.entry(&destination) {
                if !overwrite {
                    return Err(StoreError::AlreadyExists(destination));
                }

                state.remove_subtree(&destination);
                events.push(StoreEvent::EntryRemoved {
                    entry: existing,
                    parent: target.clone(),
                });
            }

            let subtree = match transfer {
                Transfer::Copy => state
                    .subtree(source)
                    .into_iter()
                    .filter_map(|key| state.nodes.get(&key).cloned().map(|node| (key, node)))
                    .collect::<Vec<_>>(),
                Transfer::Move => {
                    let removed = state
                        .entry(source)
                        .ok_or_else(|| StoreError::NotFound(source.clone()))?;
                    let subtree = state.remove_subtree(source);
                    events.push(StoreEvent::EntryRemoved {
                        entry: removed,
                        parent: source.parent().unwrap_or_else(|| source.repository_root()),
                    });
                    subtree
                }
            };

            progress.set_total(subtree.len() as u64);
            for (done, (key, mut node)) in subtree.into_iter().enumerate() {
                if let Some(rebased) = key.rebase(source, &destination) {
                    // INVARIANT: Copied roots and displaced connections folders turn
                    // into plain folders.
                    if node.kind == EntryKind::Repository
                        || (node.kind == EntryKind::ConnectionsFolder
                            && rebased.depth() != 2)
                    {
                        node.kind = EntryKind::Folder;
                    }
                    state.nodes.insert(rebased, node);
                }
                progress.set_completed(done as u64 + 1);
            }

            let added = state
                .entry(&destination)
                .ok_or_else(|| StoreError::NotFound(destination.clone()))?;
            events.push(StoreEvent::EntryAdded { entry: added });
            destination
        };

        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(match transfer {
                Transfer::Copy => StoreOperation::Copy {
                    source: source.clone(),
                    target: target.clone(),
                    overwrite,
                },
                Transfer::Move => StoreOperation::Move {
                    source: source.clone(),
                    target: target.clone(),
                    overwrite,
                },
            });

        self.publish(events);
        Ok(destination)
    }
}

impl EntryStore for MemoryStore {
    fn repositories(&self) -> Result<Vec<Entry>> {
        let state = self.read();
        let roots = state
            .repositories
            .keys()
            .filter_map(|name| Location::repository(name.as_str()).ok())
            .filter_map(|root| state.entry(&root))
            .collect();
        Ok(roots)
    }

    fn resolve(&self, location: &Location) -> Result<Option<Entry>> {
        Ok(self.read().entry(location))
    }

    fn list_subfolders(&self, folder: &Location) -> Result<Vec<Entry>> {
        *self.listings.entry(folder.clone()).or_insert(0) += 1;
        self.simulate_latency(folder);

        if let Some(error) = Self::take_fault(&self.listing_faults, folder) {
            debug!("injected listing fault for {folder}: {error}");
            return Err(error);
        }

        let state = self.read();
        state.folder(folder)?;
        Ok(state
            .children(folder)
            .into_iter()
            .filter(Entry::is_folder)
            .collect())
    }

    fn list_data_entries(&self, folder: &Location) -> Result<Vec<Entry>> {
        let state = self.read();
        state.folder(folder)?;
        Ok(state
            .children(folder)
            .into_iter()
            .filter(|entry| !entry.is_folder())
            .collect())
    }

    fn copy(
        &self,
        source: &Location,
        target: &Location,
        new_name: Option<&str>,
        overwrite: bool,
        progress: &mut dyn ProgressListener,
    ) -> Result<Location> {
        self.transfer(Transfer::Copy, source, target, new_name, overwrite, progress)
    }

    fn move_entry(
        &self,
        source: &Location,
        target: &Location,
        new_name: Option<&str>,
        overwrite: bool,
        progress: &mut dyn ProgressListener,
    ) -> Result<Location> {
        self.transfer(Transfer::Move, source, target, new_name, overwrite, progress)
    }

    fn is_slow(&self, folder: &Location) -> bool {
        self.read()
            .repositories
            .get(folder.repository_name())
            .map(|options| options.latency.is_some())
            .unwrap_or(false)
    }

    fn is_writable(&self, repository: &str) -> bool {
        self.read()
            .repositories
            .get(repository)
            .map(|options| options.writable)
            .unwrap_or(false)
    }

    fn subscribe(&self, listener: StoreListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}
