// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! User decision points of a transfer.
//!
//! A batch runs on a background worker, but some of its steps need a human
//! answer: what to do about a name conflict, whether to retry a failed
//! entry, and so on. The worker asks through [`TransferFrontend`] and blocks
//! until it gets an answer. Two implementations are provided:
//!
//! - [`ChannelFrontend`] hands every question to a UI task as a [`Prompt`]
//!   carrying a one-shot reply channel.
//! - [`InquireFrontend`] asks on the terminal, suspending a progress bar
//!   while the prompt is shown.

use crate::{
    entry::{Entry, Location},
    store::StoreError,
    transfer::preflight::PreflightError,
};

use indicatif::ProgressBar;
use inquire::{Confirm, Select};
use std::fmt;
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};
use tracing::{info, instrument, warn};

/// Answer to a name conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Keep both entries, the incoming one gets a fresh name.
    Insert,

    /// Replace the existing entry.
    Overwrite,

    /// Leave the existing entry alone and skip the incoming one.
    Skip,
}

impl fmt::Display for ConflictDecision {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(fmt, "keep both"),
            Self::Overwrite => write!(fmt, "overwrite"),
            Self::Skip => write!(fmt, "skip"),
        }
    }
}

/// Conflict decision with its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictChoice {
    pub decision: ConflictDecision,

    /// Apply the decision to every later conflict of the same batch.
    pub repeat: bool,
}

impl ConflictChoice {
    pub fn once(decision: ConflictDecision) -> Self {
        Self {
            decision,
            repeat: false,
        }
    }

    pub fn always(decision: ConflictDecision) -> Self {
        Self {
            decision,
            repeat: true,
        }
    }
}

/// Name conflict between an incoming entry and an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub source: Entry,
    pub existing: Entry,

    /// Number of entries of the batch still waiting after this one.
    pub remaining: usize,
}

/// Entry that could not be transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub source: Location,
    pub target: Location,
    pub error: StoreError,
}

impl fmt::Display for Failure {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "cannot transfer {} into {}: {}", self.source, self.target, self.error)
    }
}

/// Answer to a failed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureChoice {
    Retry,
    Skip,
    CancelAll,
}

impl fmt::Display for FailureChoice {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(fmt, "retry"),
            Self::Skip => write!(fmt, "skip"),
            Self::CancelAll => write!(fmt, "cancel all"),
        }
    }
}

/// Blocking notice shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Request was rejected before anything happened.
    Rejected(PreflightError),

    /// Entry violated a connections folder rule and was skipped.
    Violation(Failure),
}

impl fmt::Display for Notice {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(error) => write!(fmt, "transfer rejected: {error}"),
            Self::Violation(failure) => write!(fmt, "{failure}"),
        }
    }
}

/// Source of user decisions for a running transfer.
///
/// Methods are called from the transfer worker and block it until answered.
pub trait TransferFrontend: Send + Sync + 'static {
    /// Decide what to do about a name conflict.
    fn resolve_conflict(&self, conflict: &Conflict) -> ConflictChoice;

    /// Decide what to do about a failed entry.
    fn resolve_failure(&self, failure: &Failure) -> FailureChoice;

    /// Report a connections folder violation and ask if the remaining
    /// entries of the batch should still be transferred.
    fn continue_after_violation(&self, failure: &Failure) -> bool;

    /// Ask if a connection should go into its repository's connections
    /// folder instead of the requested target.
    fn confirm_redirect(&self, source: &Location, connections_folder: &Location) -> bool;

    /// Show a notice that needs no answer.
    fn notify(&self, notice: &Notice);

    /// Select and scroll to a folder once a batch finished.
    fn reveal(&self, folder: &Location);
}

/// Question forwarded to a UI task by [`ChannelFrontend`].
#[derive(Debug)]
pub enum Prompt {
    Conflict {
        conflict: Conflict,
        reply: oneshot::Sender<ConflictChoice>,
    },
    Failure {
        failure: Failure,
        reply: oneshot::Sender<FailureChoice>,
    },
    Violation {
        failure: Failure,
        reply: oneshot::Sender<bool>,
    },
    Redirect {
        source: Location,
        connections_folder: Location,
        reply: oneshot::Sender<bool>,
    },
    Notice(Notice),
    Reveal(Location),
}

/// Frontend forwarding every question to a UI task.
///
/// If the UI side is gone, or drops a reply channel without answering, the
/// worker falls back to the most conservative answer: skip conflicts, cancel
/// on failures, and decline redirects.
#[derive(Debug, Clone)]
pub struct ChannelFrontend {
    prompts: UnboundedSender<Prompt>,
}

impl ChannelFrontend {
    pub fn new() -> (Self, UnboundedReceiver<Prompt>) {
        let (prompts, receiver) = mpsc::unbounded_channel();
        (Self { prompts }, receiver)
    }

    fn ask<T>(&self, prompt: impl FnOnce(oneshot::Sender<T>) -> Prompt, fallback: T) -> T {
        let (reply, answer) = oneshot::channel();
        if self.prompts.send(prompt(reply)).is_err() {
            warn!("no frontend listening for prompts");
            return fallback;
        }

        match answer.blocking_recv() {
            Ok(answer) => answer,
            Err(_) => {
                warn!("prompt dropped without an answer");
                fallback
            }
        }
    }

    fn tell(&self, prompt: Prompt) {
        if self.prompts.send(prompt).is_err() {
            warn!("no frontend listening for prompts");
        }
    }
}

impl TransferFrontend for ChannelFrontend {
    fn resolve_conflict(&self, conflict: &Conflict) -> ConflictChoice {
        self.ask(
            |reply| Prompt::Conflict {
                conflict: conflict.clone(),
                reply,
            },
            ConflictChoice::once(ConflictDecision::Skip),
        )
    }

    fn resolve_failure(&self, failure: &Failure) -> FailureChoice {
        self.ask(
            |reply| Prompt::Failure {
                failure: failure.clone(),
                reply,
            },
            FailureChoice::CancelAll,
        )
    }

    fn continue_after_violation(&self, failure: &Failure) -> bool {
        self.ask(
            |reply| Prompt::Violation {
                failure: failure.clone(),
                reply,
            },
            false,
        )
    }

    fn confirm_redirect(&self, source: &Location, connections_folder: &Location) -> bool {
        self.ask(
            |reply| Prompt::Redirect {
                source: source.clone(),
                connections_folder: connections_folder.clone(),
                reply,
            },
            false,
        )
    }

    fn notify(&self, notice: &Notice) {
        self.tell(Prompt::Notice(notice.clone()));
    }

    fn reveal(&self, folder: &Location) {
        self.tell(Prompt::Reveal(folder.clone()));
    }
}

/// Terminal frontend for progress bar.
#[derive(Debug, Clone)]
pub struct InquireFrontend {
    pub(crate) bar: ProgressBar,
}

impl InquireFrontend {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl TransferFrontend for InquireFrontend {
    #[instrument(skip(self, conflict), level = "debug")]
    fn resolve_conflict(&self, conflict: &Conflict) -> ConflictChoice {
        info!("{} already exists", conflict.existing.location);
        self.bar.suspend(|| {
            let options = vec![
                ConflictDecision::Insert,
                ConflictDecision::Overwrite,
                ConflictDecision::Skip,
            ];
            let message = format!("{} already exists", conflict.existing.location);
            let decision = match Select::new(&message, options).prompt() {
                Ok(decision) => decision,
                Err(error) => {
                    warn!("cannot prompt for conflict: {error}");
                    return ConflictChoice::once(ConflictDecision::Skip);
                }
            };

            if conflict.remaining == 0 {
                return ConflictChoice::once(decision);
            }

            let repeat = Confirm::new("apply to all remaining conflicts?")
                .with_default(false)
                .prompt()
                .unwrap_or(false);
            ConflictChoice { decision, repeat }
        })
    }

    #[instrument(skip(self, failure), level = "debug")]
    fn resolve_failure(&self, failure: &Failure) -> FailureChoice {
        warn!("{failure}");
        self.bar.suspend(|| {
            let options = vec![
                FailureChoice::Retry,
                FailureChoice::Skip,
                FailureChoice::CancelAll,
            ];
            Select::new("transfer failed", options)
                .prompt()
                .unwrap_or(FailureChoice::CancelAll)
        })
    }

    #[instrument(skip(self, failure), level = "debug")]
    fn continue_after_violation(&self, failure: &Failure) -> bool {
        warn!("{failure}");
        self.bar.suspend(|| {
            Confirm::new("continue with remaining entries?")
                .with_default(true)
                .prompt()
                .unwrap_or(false)
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn confirm_redirect(&self, source: &Location, connections_folder: &Location) -> bool {
        self.bar.suspend(|| {
            let message = format!("{source} is a connection, store it in {connections_folder}?");
            Confirm::new(&message)
                .with_default(true)
                .prompt()
                .unwrap_or(false)
        })
    }

    fn notify(&self, notice: &Notice) {
        self.bar.suspend(|| warn!("{notice}"));
    }

    fn reveal(&self, folder: &Location) {
        info!("transferred entries into {folder}");
    }
}
