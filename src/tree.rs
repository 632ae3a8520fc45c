// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Lazily materialized repository tree.
//!
//! The [`TreeModel`] presents an [`EntryStore`] as a tree data source. It
//! answers "what are the ordered children of this folder" without ever
//! blocking its caller on a slow backend, and keeps a sorted, filtered copy
//! of every folder it has seen consistent with the store's change
//! notifications.
//!
//! # Scheduling
//!
//! A tree model belongs to exactly one scheduling domain, typically the task
//! driving a user interface. All queries, all cache updates, and all observer
//! callbacks happen on that domain. Anything arriving from elsewhere, i.e.,
//! store notifications published by other threads and results of background
//! folder fetches, is queued as a message and only applied when the owner
//! calls [`TreeModel::dispatch_pending`] or [`TreeModel::dispatch_next`].
//! Messages are applied in the order they were received.
//!
//! # Folder Status
//!
//! Folders whose store reports them as slow are never listed on the owning
//! domain. The first query turns such a folder __pending__, answers with a
//! single [`Node::Pending`] placeholder, and starts a background fetch. When
//! the fetch succeeds, the placeholder is swapped for the real children. When
//! it fails, the folder turns __broken__ and reports no children until the
//! store announces a refresh of that folder.

pub mod filter;

pub use filter::{EntryPredicate, SortOrder, TreeFilter};

use crate::{
    entry::{Entry, Location},
    store::{self, EntryStore, ListenerId, StoreError, StoreEvent},
};

use dashmap::DashSet;
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::Arc,
    thread,
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    time::timeout,
};
use tracing::{debug, error, instrument, trace};

/// Load state of a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStatus {
    /// Children are known or can be computed on the spot.
    Ready,

    /// Background fetch is in flight.
    Pending,

    /// Last fetch failed.
    Broken,
}

/// Node handed out to tree consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Entry(Entry),

    /// Loading placeholder standing in for the children of a pending folder.
    Pending(Location),
}

impl Node {
    pub fn entry(&self) -> Option<&Entry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Pending(_) => None,
        }
    }

    /// Location of the entry, or of the folder a placeholder belongs to.
    pub fn location(&self) -> &Location {
        match self {
            Self::Entry(entry) => &entry.location,
            Self::Pending(folder) => folder,
        }
    }
}

/// Notification delivered to tree observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    NodesInserted {
        parent: Location,
        indices: Vec<usize>,
        nodes: Vec<Node>,
    },
    NodesRemoved {
        parent: Location,
        indices: Vec<usize>,
        nodes: Vec<Node>,
    },
    NodesChanged {
        parent: Location,
        indices: Vec<usize>,
        nodes: Vec<Node>,
    },

    /// Everything below `node` may have changed.
    StructureChanged { node: Location },

    /// Set of repository roots changed.
    RootsChanged,

    /// Whole tree must be re-read, e.g., after a filter change.
    TreeReset,

    /// Folder could not be loaded and is now broken.
    FetchFailed { folder: Location, message: String },
}

/// Callback receiving tree notifications.
pub type TreeObserver = Box<dyn FnMut(&TreeEvent) + Send + 'static>;

/// Handle to a registered tree observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

enum Message {
    Store(StoreEvent),
    Fetched {
        folder: Location,
        generation: u64,
        result: store::Result<Vec<Entry>>,
    },
}

/// Tree data source over an entry store.
pub struct TreeModel<S: EntryStore> {
    store: Arc<S>,
    filter: TreeFilter,
    sort: SortOrder,

    // Bumped whenever filter or order change, so fetches started under older
    // settings can be recognized and discarded.
    generation: u64,
    cache: HashMap<Location, Vec<Entry>>,
    pending: HashSet<Location>,
    broken: HashSet<Location>,
    in_flight: Arc<DashSet<Location>>,
    sender: UnboundedSender<Message>,
    inbox: UnboundedReceiver<Message>,
    observers: Vec<(ObserverId, TreeObserver)>,
    next_observer: u64,
    listener: ListenerId,
}

impl<S: EntryStore> TreeModel<S> {
    /// Construct new tree model and subscribe it to store notifications.
    ///
    /// The subscription lasts until the model is dropped.
    pub fn new(store: Arc<S>, filter: TreeFilter, sort: SortOrder) -> Self {
        let (sender, inbox) = unbounded_channel();
        let listener = {
            let sender = sender.clone();
            store.subscribe(Box::new(move |event| {
                // INVARIANT: Never touch model state from the publishing thread.
                let _ = sender.send(Message::Store(event.clone()));
            }))
        };

        Self {
            store,
            filter,
            sort,
            generation: 0,
            cache: HashMap::new(),
            pending: HashSet::new(),
            broken: HashSet::new(),
            in_flight: Arc::new(DashSet::new()),
            sender,
            inbox,
            observers: Vec::new(),
            next_observer: 0,
            listener,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn filter(&self) -> &TreeFilter {
        &self.filter
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort
    }

    /// Register observer for tree notifications.
    pub fn subscribe(&mut self, observer: TreeObserver) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    /// Remove observer, returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        before != self.observers.len()
    }

    /// Load state of a folder.
    pub fn status(&self, folder: &Location) -> FolderStatus {
        if self.broken.contains(folder) {
            FolderStatus::Broken
        } else if self.pending.contains(folder) {
            FolderStatus::Pending
        } else {
            FolderStatus::Ready
        }
    }

    /// Check if a background fetch for the folder is still running.
    pub fn is_fetching(&self, folder: &Location) -> bool {
        self.in_flight.contains(folder)
    }

    /// Repository roots accepted by the active filter, in name order.
    pub fn repositories(&self) -> Vec<Entry> {
        let mut roots = match self.store.repositories() {
            Ok(roots) => roots,
            Err(error) => {
                error!("cannot list repositories: {error}");
                return Vec::new();
            }
        };

        roots.retain(|root| self.filter.accepts(&*self.store, root));
        SortOrder::Name.sort(&mut roots);
        roots
    }

    /// Ordered children of a folder.
    ///
    /// Pending folders answer with a single placeholder and make sure a
    /// fetch is in flight. Broken folders answer with nothing.
    #[instrument(skip(self), level = "trace")]
    pub fn children(&mut self, folder: &Location) -> Vec<Node> {
        match self.status(folder) {
            FolderStatus::Broken => return Vec::new(),
            FolderStatus::Pending => {
                self.request_fetch(folder);
                return vec![Node::Pending(folder.clone())];
            }
            FolderStatus::Ready => {}
        }

        if let Some(children) = self.cache.get(folder) {
            return children.iter().cloned().map(Node::Entry).collect();
        }

        if self.store.is_slow(folder) {
            self.pending.insert(folder.clone());
            self.request_fetch(folder);
            return vec![Node::Pending(folder.clone())];
        }

        match load_children(&*self.store, folder, &self.filter, self.sort) {
            Ok(children) => {
                let nodes = children.iter().cloned().map(Node::Entry).collect();
                self.cache.insert(folder.clone(), children);
                nodes
            }
            Err(StoreError::Disconnected(repository)) => {
                debug!("repository {repository:?} disconnected while listing {folder}");
                Vec::new()
            }
            Err(error) => {
                self.mark_broken(folder, &error);
                Vec::new()
            }
        }
    }

    pub fn child_count(&mut self, folder: &Location) -> usize {
        self.children(folder).len()
    }

    pub fn child(&mut self, folder: &Location, index: usize) -> Option<Node> {
        self.children(folder).into_iter().nth(index)
    }

    /// Position of `entry` among the children of `folder`.
    pub fn index_of(&mut self, folder: &Location, entry: &Location) -> Option<usize> {
        self.children(folder)
            .iter()
            .position(|node| matches!(node, Node::Entry(child) if child.location == *entry))
    }

    /// Replace the active filter.
    ///
    /// Drops every cached folder and tells observers to re-read the tree.
    pub fn set_filter(&mut self, filter: TreeFilter) {
        debug!("switch tree filter to {filter:?}");
        self.filter = filter;
        self.reset();
    }

    /// Replace the active child order.
    ///
    /// Drops every cached folder and tells observers to re-read the tree.
    pub fn set_sort_order(&mut self, sort: SortOrder) {
        debug!("switch tree order to {sort:?}");
        self.sort = sort;
        self.reset();
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.cache.clear();
        self.emit(TreeEvent::TreeReset);
    }

    /// Apply every message queued so far, returns how many were applied.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(message) = self.inbox.try_recv() {
            self.dispatch(message);
            count += 1;
        }

        count
    }

    /// Wait for the next message and apply it.
    pub async fn dispatch_next(&mut self) {
        if let Some(message) = self.inbox.recv().await {
            self.dispatch(message);
        }
    }

    /// Children of a folder once any background fetch has finished.
    ///
    /// Messages are applied while waiting. Returns `None` if the folder is
    /// broken, or its load was abandoned without a result, e.g., because the
    /// repository disconnected.
    pub async fn settled_children(&mut self, folder: &Location, poll: Duration) -> Option<Vec<Node>> {
        self.children(folder);

        // INVARIANT: Abandoned loads clear the guard but never send a message.
        while self.status(folder) == FolderStatus::Pending && self.is_fetching(folder) {
            let _ = timeout(poll, self.dispatch_next()).await;
        }

        match self.status(folder) {
            FolderStatus::Ready => Some(self.children(folder)),
            FolderStatus::Pending | FolderStatus::Broken => None,
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::Store(event) => self.on_store_event(event),
            Message::Fetched {
                folder,
                generation,
                result,
            } => self.on_fetched(folder, generation, result),
        }
    }

    fn request_fetch(&mut self, folder: &Location) {
        // INVARIANT: At most one fetch in flight per folder.
        if !self.in_flight.insert(folder.clone()) {
            trace!("fetch of {folder} already in flight");
            return;
        }

        debug!("fetch children of {folder} in background");
        let store = Arc::clone(&self.store);
        let filter = self.filter.clone();
        let sort = self.sort;
        let generation = self.generation;
        let in_flight = Arc::clone(&self.in_flight);
        let sender = self.sender.clone();
        let folder = folder.clone();

        let job = move || match load_children(&*store, &folder, &filter, sort) {
            Err(StoreError::Disconnected(repository)) => {
                // INVARIANT: No events for aborted loads, or the user gets
                // asked to log in again right away.
                debug!("repository {repository:?} disconnected while fetching {folder}");
                in_flight.remove(&folder);
            }
            result => {
                let message = Message::Fetched {
                    folder,
                    generation,
                    result,
                };
                if let Err(unsent) = sender.send(message) {
                    if let Message::Fetched { folder, .. } = unsent.0 {
                        in_flight.remove(&folder);
                    }
                }
            }
        };

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                thread::spawn(job);
            }
        }
    }

    fn on_fetched(
        &mut self,
        folder: Location,
        generation: u64,
        result: store::Result<Vec<Entry>>,
    ) {
        if generation != self.generation || !self.pending.contains(&folder) {
            debug!("discard stale children of {folder}");
            self.pending.remove(&folder);
            self.emit(TreeEvent::StructureChanged {
                node: folder.clone(),
            });
            self.in_flight.remove(&folder);
            return;
        }

        self.pending.remove(&folder);
        match result {
            Ok(children) => {
                debug!("install {} children of {folder}", children.len());
                let nodes = children
                    .iter()
                    .cloned()
                    .map(Node::Entry)
                    .collect::<Vec<_>>();
                self.cache.insert(folder.clone(), children);

                // INVARIANT: Stores give no diff, so swap everything at once.
                self.emit(TreeEvent::NodesRemoved {
                    parent: folder.clone(),
                    indices: vec![0],
                    nodes: vec![Node::Pending(folder.clone())],
                });
                self.emit(TreeEvent::NodesInserted {
                    parent: folder.clone(),
                    indices: (0..nodes.len()).collect(),
                    nodes,
                });
            }
            Err(error) => {
                self.mark_broken(&folder, &error);
                self.emit(TreeEvent::StructureChanged {
                    node: folder.clone(),
                });
            }
        }

        // INVARIANT: Guard only clears after observers saw the outcome.
        self.in_flight.remove(&folder);
    }

    fn mark_broken(&mut self, folder: &Location, error: &StoreError) {
        error!("cannot load children of {folder}: {error}");
        self.broken.insert(folder.clone());
        self.emit(TreeEvent::FetchFailed {
            folder: folder.clone(),
            message: error.to_string(),
        });
    }

    #[instrument(skip(self), level = "trace")]
    fn on_store_event(&mut self, event: StoreEvent) {
        let hidden = event
            .entry()
            .filter(|entry| !self.filter.accepts(&*self.store, entry))
            .map(|entry| entry.location.clone());
        if let Some(location) = hidden {
            trace!("suppress event for filtered entry {location}");
            if let StoreEvent::EntryChanged { entry, previous } = event {
                if previous == entry.location {
                    self.on_entry_hidden(entry);
                }
            }
            return;
        }

        match event {
            StoreEvent::EntryAdded { entry } => self.on_entry_added(entry),
            StoreEvent::EntryRemoved { entry, parent } => self.on_entry_removed(entry, parent),
            StoreEvent::EntryChanged { entry, previous } => self.on_entry_changed(entry, previous),
            StoreEvent::FolderRefreshed { folder } => {
                debug!("folder {} refreshed", folder.location);
                self.forget_subtree(&folder.location);
                self.emit(TreeEvent::StructureChanged {
                    node: folder.location,
                });
            }
            StoreEvent::RepositoryDisconnected { repository } => {
                debug!("repository {repository} disconnected");
                self.forget_subtree(&repository);
                self.emit(TreeEvent::StructureChanged { node: repository });
            }
        }
    }

    // Cached children are patched in place. Re-listing here would show
    // store state whose events are still queued.
    fn on_entry_added(&mut self, entry: Entry) {
        let Some(parent) = entry.containing_folder() else {
            self.emit(TreeEvent::RootsChanged);
            return;
        };

        match self.insert_cached(&parent, &entry) {
            Some(index) => self.emit(TreeEvent::NodesInserted {
                parent,
                indices: vec![index],
                nodes: vec![Node::Entry(entry)],
            }),
            None => {
                self.cache.remove(&parent);
                self.emit(TreeEvent::StructureChanged { node: parent });
            }
        }
    }

    fn on_entry_removed(&mut self, entry: Entry, parent: Location) {
        if entry.location.is_repository_root() {
            self.forget_subtree(&entry.location);
            self.emit(TreeEvent::RootsChanged);
            return;
        }

        let removed = self.remove_cached(&parent, &entry.location);
        self.forget_subtree(&entry.location);

        match removed {
            Some((index, _)) => self.emit(TreeEvent::NodesRemoved {
                parent,
                indices: vec![index],
                nodes: vec![Node::Entry(entry)],
            }),
            None => {
                self.cache.remove(&parent);
                self.emit(TreeEvent::StructureChanged { node: parent });
            }
        }
    }

    fn on_entry_changed(&mut self, entry: Entry, previous: Location) {
        let Some(parent) = entry.containing_folder() else {
            self.emit(TreeEvent::RootsChanged);
            return;
        };

        if previous != entry.location {
            self.forget_subtree(&previous);
            if let Some(old_parent) = previous.parent().filter(|old| *old != parent) {
                self.cache.remove(&old_parent);
                self.emit(TreeEvent::StructureChanged { node: old_parent });
            }
            self.cache.remove(&parent);
            self.emit(TreeEvent::StructureChanged { node: parent });
            return;
        }

        let Some((index, old)) = self.remove_cached(&parent, &entry.location) else {
            self.cache.remove(&parent);
            self.emit(TreeEvent::StructureChanged { node: parent });
            return;
        };

        match self.insert_cached(&parent, &entry) {
            Some(slot) if slot == index => self.emit(TreeEvent::NodesChanged {
                parent,
                indices: vec![index],
                nodes: vec![Node::Entry(entry)],
            }),
            Some(slot) => {
                self.emit(TreeEvent::NodesRemoved {
                    parent: parent.clone(),
                    indices: vec![index],
                    nodes: vec![Node::Entry(old)],
                });
                self.emit(TreeEvent::NodesInserted {
                    parent,
                    indices: vec![slot],
                    nodes: vec![Node::Entry(entry)],
                });
            }
            None => {
                self.cache.remove(&parent);
                self.emit(TreeEvent::StructureChanged { node: parent });
            }
        }
    }

    /// Entry no longer passes the filter, drop it from the cached children.
    fn on_entry_hidden(&mut self, entry: Entry) {
        let Some(parent) = entry.containing_folder() else {
            self.emit(TreeEvent::RootsChanged);
            return;
        };

        if let Some((index, old)) = self.remove_cached(&parent, &entry.location) {
            self.emit(TreeEvent::NodesRemoved {
                parent,
                indices: vec![index],
                nodes: vec![Node::Entry(old)],
            });
        }
    }

    /// Slot entry into the cached children of `parent`.
    ///
    /// Returns `None` if the folder is not cached or already holds the entry.
    fn insert_cached(&mut self, parent: &Location, entry: &Entry) -> Option<usize> {
        let sort = self.sort;
        let children = self.cache.get_mut(parent)?;
        if children.iter().any(|child| child.location == entry.location) {
            return None;
        }

        let index = children
            .partition_point(|child| sort.compare_children(child, entry) == Ordering::Less);
        children.insert(index, entry.clone());
        Some(index)
    }

    fn remove_cached(&mut self, parent: &Location, location: &Location) -> Option<(usize, Entry)> {
        let children = self.cache.get_mut(parent)?;
        let index = children.iter().position(|child| child.location == *location)?;
        Some((index, children.remove(index)))
    }

    /// Forget everything known about `location` and the folders below it,
    /// so the next query starts from scratch.
    fn forget_subtree(&mut self, location: &Location) {
        let inside = |key: &Location| key == location || key.is_descendant_of(location);
        self.cache.retain(|key, _| !inside(key));
        self.pending.retain(|key| !inside(key));
        self.broken.retain(|key| !inside(key));
    }

    fn emit(&mut self, event: TreeEvent) {
        trace!("emit {event:?}");
        for (_, observer) in self.observers.iter_mut() {
            observer(&event);
        }
    }
}

impl<S: EntryStore> Drop for TreeModel<S> {
    fn drop(&mut self) {
        self.store.unsubscribe(self.listener);
    }
}

/// List, sort, and filter the children of a folder.
fn load_children<S: EntryStore + ?Sized>(
    store: &S,
    folder: &Location,
    filter: &TreeFilter,
    sort: SortOrder,
) -> store::Result<Vec<Entry>> {
    let mut children = store.list_subfolders(folder)?;
    sort.sort(&mut children);

    if !filter.only_folders {
        let mut entries = store.list_data_entries(folder)?;
        sort.sort(&mut entries);
        children.extend(entries);
    }

    filter.retain(store, &mut children);
    Ok(children)
}
