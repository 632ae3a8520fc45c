// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Copy and move engine.
//!
//! A __transfer__ takes a set of source locations and a target folder, and
//! copies or moves every source into that folder. The whole request is
//! validated up front by [`preflight`], then the entries are processed one
//! after another on a background worker.
//!
//! # Batch Processing
//!
//! Each entry walks through the same steps:
//!
//! 1. Check for a name conflict in the target folder. Conflicts are resolved
//!    through the [`TransferFrontend`], either per entry or once for the rest
//!    of the batch.
//! 2. Perform the store operation with a progress slice of its own.
//! 3. On failure, pick a recovery path from the error kind: redirect
//!    connections into their connections folder, skip connections folder
//!    violations, silently abort when a login was cancelled, or ask the user
//!    to retry, skip, or cancel everything else.
//!
//! Entries are never processed concurrently inside one batch. Separate
//! batches are not synchronized with each other.

pub mod frontend;
pub mod preflight;

pub use frontend::{
    ChannelFrontend, Conflict, ConflictChoice, ConflictDecision, Failure, FailureChoice,
    InquireFrontend, Notice, Prompt, TransferFrontend,
};
pub use preflight::{Gesture, Operation, PreflightError, TransferItem, TransferRequest};

use crate::{
    entry::{Entry, Location},
    progress::{ProgressListener, RescalingProgressListener},
    store::{EntryStore, StoreError},
};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Progress units owned by each entry of a batch.
pub const ENTRY_SCALE: u64 = 1000;

/// Result of one entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Entry now lives at the given location.
    Done(Location),

    /// Entry was left alone.
    Skipped,

    /// Entry stopped the batch.
    Aborted,
}

/// Summary of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub target: Location,

    /// Outcome per attempted entry, in request order.
    pub outcomes: Vec<(Location, EntryOutcome)>,

    /// Entries never attempted because the batch stopped early.
    pub not_attempted: Vec<Location>,

    pub cancelled: bool,
}

impl BatchReport {
    fn new(target: Location) -> Self {
        Self {
            target,
            outcomes: Vec::new(),
            not_attempted: Vec::new(),
            cancelled: false,
        }
    }

    /// Locations of successfully transferred entries.
    pub fn transferred(&self) -> Vec<&Location> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                EntryOutcome::Done(location) => Some(location),
                _ => None,
            })
            .collect()
    }

    /// Sources that were skipped.
    pub fn skipped(&self) -> Vec<&Location> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == EntryOutcome::Skipped)
            .map(|(source, _)| source)
            .collect()
    }
}

/// Conflict decisions remembered across one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecisionState {
    pub repeat: Option<ConflictDecision>,
}

enum Resolution {
    Proceed {
        new_name: Option<String>,
        overwrite: bool,
    },
    Skip,
}

/// Runs copy and move requests against a store.
pub struct TransferEngine<S, F>
where
    S: EntryStore,
    F: TransferFrontend,
{
    store: Arc<S>,
    frontend: Arc<F>,
}

impl<S, F> Clone for TransferEngine<S, F>
where
    S: EntryStore,
    F: TransferFrontend,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            frontend: Arc::clone(&self.frontend),
        }
    }
}

impl<S, F> TransferEngine<S, F>
where
    S: EntryStore,
    F: TransferFrontend,
{
    pub fn new(store: Arc<S>, frontend: Arc<F>) -> Self {
        Self { store, frontend }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn frontend(&self) -> &Arc<F> {
        &self.frontend
    }

    /// Validate a gesture without running it.
    ///
    /// Rejections are shown through the frontend as a notice.
    ///
    /// # Errors
    ///
    /// - Return [`PreflightError`] if the request is rejected.
    pub fn prepare(
        &self,
        target: &Location,
        sources: impl IntoIterator<Item = Location>,
        gesture: Gesture,
    ) -> Result<TransferRequest, PreflightError> {
        preflight::prepare(&*self.store, target, sources, gesture).inspect_err(|error| {
            warn!("reject transfer into {target}: {error}");
            self.frontend.notify(&Notice::Rejected(error.clone()));
        })
    }

    /// Validate a gesture and run it on a background worker.
    ///
    /// Returns as soon as the request is accepted. The batch itself runs on
    /// the blocking pool of the current tokio runtime.
    ///
    /// # Errors
    ///
    /// - Return [`PreflightError`] if the request is rejected, nothing runs.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn transfer<P>(
        &self,
        target: &Location,
        sources: impl IntoIterator<Item = Location>,
        gesture: Gesture,
        mut progress: P,
    ) -> Result<JoinHandle<BatchReport>, PreflightError>
    where
        P: ProgressListener + Send + 'static,
    {
        let request = self.prepare(target, sources, gesture)?;
        let engine = self.clone();
        Ok(tokio::task::spawn_blocking(move || {
            engine.run(request, &mut progress)
        }))
    }

    /// Run a validated request on the calling thread.
    ///
    /// Progress runs from zero to [`ENTRY_SCALE`] per entry, and is marked
    /// complete exactly once no matter how the batch ends.
    #[instrument(skip(self, request, progress), fields(target = %request.target), level = "debug")]
    pub fn run(&self, request: TransferRequest, progress: &mut dyn ProgressListener) -> BatchReport {
        let count = request.items.len();
        progress.set_total(count as u64 * ENTRY_SCALE);

        let mut state = DecisionState::default();
        let mut report = BatchReport::new(request.target.clone());
        for (index, item) in request.items.iter().enumerate() {
            if report.cancelled {
                report.not_attempted.push(item.source.location.clone());
                continue;
            }

            let min = index as u64 * ENTRY_SCALE;
            let max = min + ENTRY_SCALE;
            let outcome = {
                let mut slice = RescalingProgressListener::new(&mut *progress, min, max);
                self.process(&request.target, item, count, index, &mut state, &mut slice)
            };

            match &outcome {
                EntryOutcome::Done(location) => {
                    info!("transferred {} to {location}", item.source.location);
                    progress.set_completed(max);
                }
                EntryOutcome::Skipped => {
                    warn!("skip {}", item.source.location);
                    progress.set_completed(max);
                }
                EntryOutcome::Aborted => {
                    debug!("batch stopped at {}", item.source.location);
                    report.cancelled = true;
                }
            }
            report.outcomes.push((item.source.location.clone(), outcome));
        }

        // Folded nested selections still count as requested.
        if request.requested > 1 {
            self.frontend.reveal(&request.target);
        }
        progress.complete();

        report
    }

    fn process(
        &self,
        target: &Location,
        item: &TransferItem,
        count: usize,
        index: usize,
        state: &mut DecisionState,
        progress: &mut dyn ProgressListener,
    ) -> EntryOutcome {
        let source = &item.source.location;
        let remaining = count - index - 1;
        let mut target = target.clone();
        let (mut new_name, mut overwrite) =
            match self.check_conflict(&item.source, &target, remaining, state) {
                Resolution::Proceed {
                    new_name,
                    overwrite,
                } => (new_name, overwrite),
                Resolution::Skip => return EntryOutcome::Skipped,
            };

        loop {
            let result = match item.operation {
                Operation::Copy => {
                    self.store
                        .copy(source, &target, new_name.as_deref(), overwrite, progress)
                }
                Operation::Move => {
                    self.store
                        .move_entry(source, &target, new_name.as_deref(), overwrite, progress)
                }
            };

            let error = match result {
                Ok(location) => return EntryOutcome::Done(location),
                Err(error) => error,
            };

            let failure = Failure {
                source: source.clone(),
                target: target.clone(),
                error: error.clone(),
            };

            if let Some(connections_folder) = error.redirect_target().filter(|folder| **folder != target) {
                if !self.frontend.confirm_redirect(source, connections_folder) {
                    return EntryOutcome::Aborted;
                }
                debug!("redirect {source} into {connections_folder}");
                target = connections_folder.clone();

                // INVARIANT: Names clash against the folder actually written to.
                (new_name, overwrite) =
                    match self.check_conflict(&item.source, &target, remaining, state) {
                        Resolution::Proceed {
                            new_name,
                            overwrite,
                        } => (new_name, overwrite),
                        Resolution::Skip => return EntryOutcome::Skipped,
                    };
                continue;
            }

            match error {
                error if error.is_connections_violation() => {
                    warn!("{failure}");
                    if count == 1 {
                        self.frontend.notify(&Notice::Violation(failure));
                        return EntryOutcome::Skipped;
                    }

                    return match self.frontend.continue_after_violation(&failure) {
                        true => EntryOutcome::Skipped,
                        false => EntryOutcome::Aborted,
                    };
                }
                StoreError::LoginCancelled(repository) => {
                    debug!("login to {repository:?} cancelled, stop batch");
                    return EntryOutcome::Aborted;
                }
                _ => {
                    warn!("{failure}");
                    match self.frontend.resolve_failure(&failure) {
                        FailureChoice::Retry => debug!("retry {source}"),
                        FailureChoice::Skip => return EntryOutcome::Skipped,
                        FailureChoice::CancelAll => return EntryOutcome::Aborted,
                    }
                }
            }
        }
    }

    fn check_conflict(
        &self,
        source: &Entry,
        target: &Location,
        remaining: usize,
        state: &mut DecisionState,
    ) -> Resolution {
        let existing = match self.lookup(target, source.name()) {
            Some(existing) => existing,
            None => {
                return Resolution::Proceed {
                    new_name: None,
                    overwrite: false,
                }
            }
        };

        let decision = match state.repeat {
            Some(decision) => decision,
            None => {
                let choice = self.frontend.resolve_conflict(&Conflict {
                    source: source.clone(),
                    existing,
                    remaining,
                });
                if choice.repeat {
                    state.repeat = Some(choice.decision);
                }
                choice.decision
            }
        };

        match decision {
            ConflictDecision::Insert => Resolution::Proceed {
                new_name: Some(self.free_name(target, source.name())),
                overwrite: false,
            },
            ConflictDecision::Overwrite => Resolution::Proceed {
                new_name: None,
                overwrite: true,
            },
            ConflictDecision::Skip => Resolution::Skip,
        }
    }

    /// Find first unused `name (N)` inside the target folder.
    fn free_name(&self, target: &Location, name: &str) -> String {
        let mut counter = 2_u64;
        loop {
            let candidate = format!("{name} ({counter})");
            if self.lookup(target, &candidate).is_none() {
                return candidate;
            }
            counter += 1;
        }
    }

    fn lookup(&self, folder: &Location, name: &str) -> Option<Entry> {
        let location = folder.child(name).ok()?;
        match self.store.resolve(&location) {
            Ok(entry) => entry,
            Err(error) => {
                warn!("cannot resolve {location}: {error}");
                None
            }
        }
    }
}
