// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Entry store contract.
//!
//! The __entry store__ owns the repository hierarchy. It may be a local
//! directory, a remote server, or anything else that can list folders and
//! copy or move entries between them. This module only specifies what the
//! tree model and the transfer engine need from a store, plus the change
//! notifications a store must publish whenever its hierarchy mutates.
//!
//! # Listener Lifecycle
//!
//! Observers register through [`EntryStore::subscribe`] and receive a
//! [`ListenerId`]. They stay registered until they explicitly call
//! [`EntryStore::unsubscribe`] with that identifier. Nothing is cleaned up
//! behind their back.
//!
//! # Connections Folders
//!
//! A repository may carry a dedicated __connections folder__ that holds all
//! of its connection entries. Stores enforce the rules of that folder and
//! report violations through the closed set of [`StoreError`] variants, so
//! callers can pick a recovery path per violation kind.

pub mod memory;

pub use memory::MemoryStore;

use crate::{
    entry::{Entry, Location},
    progress::ProgressListener,
};

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

/// Change notification published by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Entry was added to its containing folder.
    EntryAdded { entry: Entry },

    /// Entry was removed from `parent`.
    EntryRemoved { entry: Entry, parent: Location },

    /// Entry was renamed or its content changed.
    ///
    /// For renames, `previous` holds the location the entry had before.
    EntryChanged { entry: Entry, previous: Location },

    /// Folder content was reloaded from the backend.
    FolderRefreshed { folder: Entry },

    /// Repository lost its connection to the backend.
    RepositoryDisconnected { repository: Location },
}

impl StoreEvent {
    /// Entry the event is about, if any.
    pub fn entry(&self) -> Option<&Entry> {
        match self {
            Self::EntryAdded { entry }
            | Self::EntryRemoved { entry, .. }
            | Self::EntryChanged { entry, .. } => Some(entry),
            Self::FolderRefreshed { folder } => Some(folder),
            Self::RepositoryDisconnected { .. } => None,
        }
    }
}

/// Callback receiving store notifications.
pub type StoreListener = Box<dyn Fn(&StoreEvent) + Send + Sync + 'static>;

/// Handle to a registered store listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registry of store listeners.
///
/// Listeners are invoked in registration order on the thread that publishes
/// the event.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<StoreListener>)>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: StoreListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish event to every registered listener.
    ///
    /// The registry lock is released before any listener runs, so listeners
    /// may subscribe or unsubscribe from inside their callback.
    pub fn notify(&self, event: &StoreEvent) {
        let snapshot = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect::<Vec<_>>();

        for listener in snapshot {
            listener(event);
        }
    }
}

/// Storage backend for the repository hierarchy.
///
/// All methods may block on I/O. Callers that must stay responsive run them
/// on background workers.
pub trait EntryStore: Send + Sync + 'static {
    /// List all repository roots.
    fn repositories(&self) -> Result<Vec<Entry>>;

    /// Resolve location to a live entry, `None` if nothing lives there.
    fn resolve(&self, location: &Location) -> Result<Option<Entry>>;

    /// List direct subfolders of a folder.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Disconnected`] if the backend went away while
    ///   loading.
    fn list_subfolders(&self, folder: &Location) -> Result<Vec<Entry>>;

    /// List direct non-folder children of a folder.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Disconnected`] if the backend went away while
    ///   loading.
    fn list_data_entries(&self, folder: &Location) -> Result<Vec<Entry>>;

    /// Copy entry at `source` into `target` folder.
    ///
    /// The copy is named `new_name` if given, otherwise it keeps the name of
    /// the source. An existing entry of the same name is replaced only if
    /// `overwrite` is set. Returns the location of the copy.
    fn copy(
        &self,
        source: &Location,
        target: &Location,
        new_name: Option<&str>,
        overwrite: bool,
        progress: &mut dyn ProgressListener,
    ) -> Result<Location>;

    /// Move entry at `source` into `target` folder.
    ///
    /// Same naming and overwrite rules as [`copy`](EntryStore::copy).
    /// Returns the new location of the entry.
    fn move_entry(
        &self,
        source: &Location,
        target: &Location,
        new_name: Option<&str>,
        overwrite: bool,
        progress: &mut dyn ProgressListener,
    ) -> Result<Location>;

    /// Check if listing the folder may be slow, e.g., remote I/O.
    fn is_slow(&self, folder: &Location) -> bool;

    /// Check if the repository accepts modifications.
    fn is_writable(&self, repository: &str) -> bool;

    /// Register listener for change notifications.
    fn subscribe(&self, listener: StoreListener) -> ListenerId;

    /// Remove a previously registered listener.
    fn unsubscribe(&self, id: ListenerId);
}

/// All possible error types for store interaction.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Connections folder forbids structural modification.
    #[error("connections folder {0} cannot be structurally modified")]
    ConnectionsFolderImmutable(Location),

    /// Only connection entries may live in a connections folder.
    #[error("{entry} is not a connection and cannot be stored in connections folder {folder}")]
    StoreOtherInConnectionsFolder { entry: Location, folder: Location },

    /// Repository does not support connection entries at all.
    #[error("repository {0:?} does not support connections")]
    ConnectionsNotSupported(String),

    /// Connection entries must live in their repository's connections folder.
    #[error("connection {entry} can only be stored in {connections_folder}")]
    NotAConnectionsFolder {
        entry: Location,
        connections_folder: Location,
    },

    /// User declined to log into the repository.
    #[error("login to repository {0:?} was cancelled")]
    LoginCancelled(String),

    /// Backend disconnected while content was being loaded.
    #[error("repository {0:?} disconnected while loading")]
    Disconnected(String),

    /// Nothing lives at the location.
    #[error("no entry at {0}")]
    NotFound(Location),

    /// Target name is taken and overwrite was not requested.
    #[error("entry {0} already exists")]
    AlreadyExists(Location),

    /// Repository refuses modification.
    #[error("repository {0:?} is read-only")]
    ReadOnly(String),

    /// Any other backend failure, e.g., transient I/O.
    #[error("{0}")]
    Failure(String),
}

impl StoreError {
    /// Check if error is a connections folder rule violation that can only be
    /// recovered from by skipping the entry.
    pub fn is_connections_violation(&self) -> bool {
        matches!(
            self,
            Self::ConnectionsFolderImmutable(_)
                | Self::StoreOtherInConnectionsFolder { .. }
                | Self::ConnectionsNotSupported(_)
        )
    }

    /// Connections folder the entry should have been stored in, if the
    /// error can be recovered from by redirecting the entry there.
    pub fn redirect_target(&self) -> Option<&Location> {
        match self {
            Self::NotAConnectionsFolder {
                connections_folder, ..
            } => Some(connections_folder),
            _ => None,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
