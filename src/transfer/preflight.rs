// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Transfer request validation.
//!
//! Every copy or move gesture is validated as a whole before the store sees
//! a single mutation. One bad source location rejects the entire request.

use crate::{
    entry::{Entry, Location},
    store::{EntryStore, StoreError},
};

use tracing::debug;

/// Gesture requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Copy,
    Move,
}

/// Operation actually performed for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Copy,
    Move,
}

/// Single source of a validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub source: Entry,
    pub operation: Operation,
}

/// Validated copy or move request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Folder receiving the entries.
    pub target: Location,
    pub gesture: Gesture,
    pub items: Vec<TransferItem>,

    /// Number of locations the user selected, before nested selections
    /// were folded into their ancestors.
    pub requested: usize,
}

/// Drop locations that are nested below another selected location.
///
/// Only the outermost selected ancestor gets transferred, it carries its
/// descendants along anyway. Exact duplicates collapse to their first
/// occurrence. Request order is kept.
pub fn dedup_nested(sources: impl IntoIterator<Item = Location>) -> Vec<Location> {
    let sources = sources.into_iter().collect::<Vec<_>>();
    let mut kept: Vec<Location> = Vec::with_capacity(sources.len());

    for source in sources.iter() {
        let subsumed = sources
            .iter()
            .any(|other| source.is_descendant_of(other));
        if subsumed || kept.contains(source) {
            debug!("drop {source}, it is already part of the request");
            continue;
        }

        kept.push(source.clone());
    }

    kept
}

/// Validate a gesture and turn it into a transfer request.
///
/// Dropping onto a non-folder entry is only accepted for copies, which land
/// in the folder containing the drop target. Repositories can never be
/// moved, so they are always copied regardless of the gesture.
///
/// # Errors
///
/// - Return [`PreflightError`] describing the first violated rule.
pub fn prepare<S: EntryStore + ?Sized>(
    store: &S,
    drop_target: &Location,
    sources: impl IntoIterator<Item = Location>,
    gesture: Gesture,
) -> Result<TransferRequest> {
    let sources = sources.into_iter().collect::<Vec<_>>();
    let requested = sources.len();
    let sources = dedup_nested(sources);
    if sources.is_empty() {
        return Err(PreflightError::EmptyRequest);
    }

    let dropped_on = store
        .resolve(drop_target)?
        .ok_or_else(|| PreflightError::TargetNotFound(drop_target.clone()))?;

    let target = if dropped_on.is_folder() {
        dropped_on.location
    } else {
        match (gesture, dropped_on.containing_folder()) {
            (Gesture::Copy, Some(folder)) => folder,
            _ => return Err(PreflightError::TargetNotAFolder(drop_target.clone())),
        }
    };

    let mut items = Vec::with_capacity(sources.len());
    for location in sources {
        let source = store
            .resolve(&location)?
            .ok_or_else(|| PreflightError::SourceNotFound(location.clone()))?;

        if location == target {
            return Err(PreflightError::SelfTransfer(location));
        }

        if target.is_descendant_of(&location) {
            return Err(PreflightError::IntoOwnSubtree {
                entry: location,
                target,
            });
        }

        let operation = match gesture {
            Gesture::Move if source.is_repository() => {
                debug!("repository {location} cannot be moved, copy it instead");
                Operation::Copy
            }
            Gesture::Move => Operation::Move,
            Gesture::Copy => Operation::Copy,
        };

        if operation == Operation::Move && location.parent().as_ref() == Some(&target) {
            return Err(PreflightError::AlreadyInTarget {
                entry: location,
                target,
            });
        }

        items.push(TransferItem { source, operation });
    }

    Ok(TransferRequest {
        target,
        gesture,
        items,
        requested,
    })
}

/// Reasons a request gets rejected before any mutation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PreflightError {
    /// Nothing to transfer.
    #[error("no entries selected")]
    EmptyRequest,

    /// Drop target does not resolve to a live entry.
    #[error("target {0} does not exist")]
    TargetNotFound(Location),

    /// Entries can only be moved onto folders.
    #[error("target {0} is not a folder")]
    TargetNotAFolder(Location),

    /// Source does not resolve to a live entry.
    #[error("source {0} does not exist")]
    SourceNotFound(Location),

    /// Source and target are the same.
    #[error("cannot transfer {0} into itself")]
    SelfTransfer(Location),

    /// Target lives below source.
    #[error("cannot transfer {entry} into its own subtree at {target}")]
    IntoOwnSubtree { entry: Location, target: Location },

    /// Move would leave the entry where it already is.
    #[error("{entry} already lives in {target}")]
    AlreadyInTarget { entry: Location, target: Location },

    /// Store could not answer a lookup.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Friendly result alias :3
pub type Result<T, E = PreflightError> = std::result::Result<T, E>;
