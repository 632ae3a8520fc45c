// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository tree browsing and transfer.
//!
//! repotree presents a hierarchy of __repositories__, each holding folders
//! and entries, as a lazily loaded tree, and lets users copy or move entries
//! between folders of that hierarchy.
//!
//! The crate is organized around an [`EntryStore`](store::EntryStore), the
//! backend owning the hierarchy. A [`TreeModel`](tree::TreeModel) keeps a
//! sorted and filtered view of the store in sync with its change
//! notifications, while a [`TransferEngine`](transfer::TransferEngine) runs
//! validated copy and move batches against it on background workers.

pub mod config;
pub mod entry;
pub mod path;
pub mod progress;
pub mod store;
pub mod transfer;
pub mod tree;

pub use entry::{Entry, EntryKind, Location};
pub use store::{EntryStore, MemoryStore, StoreError, StoreEvent};
pub use transfer::{BatchReport, EntryOutcome, Gesture, TransferEngine};
pub use tree::{FolderStatus, Node, TreeEvent, TreeModel};
