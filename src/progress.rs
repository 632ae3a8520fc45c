// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Progress reporting.
//!
//! Long running store operations report how far along they are through a
//! [`ProgressListener`]. Nested operations do not know about the range their
//! parent reserved for them, so they report against their own `0..total`
//! scale and a [`RescalingProgressListener`] maps that onto the parent's
//! slice.

use indicatif::ProgressBar;

/// Receiver of progress updates.
pub trait ProgressListener {
    /// Define the denominator of the operation.
    fn set_total(&mut self, total: u64);

    /// Report absolute progress against the current total.
    fn set_completed(&mut self, completed: u64);

    /// Mark the operation as done.
    fn complete(&mut self);
}

impl ProgressListener for ProgressBar {
    fn set_total(&mut self, total: u64) {
        self.set_length(total);
    }

    fn set_completed(&mut self, completed: u64) {
        self.set_position(completed);
    }

    fn complete(&mut self) {
        self.finish();
    }
}

/// Listener that throws every update away.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressListener for NullProgress {
    fn set_total(&mut self, _total: u64) {}

    fn set_completed(&mut self, _completed: u64) {}

    fn complete(&mut self) {}
}

/// Map sub-operation progress onto a slice of a parent's range.
///
/// Configured with the parent's reserved range `[min, max]`. Every
/// [`set_completed`](ProgressListener::set_completed) call forwards
/// `min + (max - min) * completed / total` to the parent. A total of zero
/// counts as fully complete.
///
/// [`complete`](ProgressListener::complete) only moves the parent to `max`,
/// it never completes the parent itself.
pub struct RescalingProgressListener<'a> {
    parent: &'a mut dyn ProgressListener,
    min: u64,
    max: u64,
    total: u64,
}

impl<'a> RescalingProgressListener<'a> {
    /// Construct new rescaler over parent range `[min, max]`.
    ///
    /// Bounds are swapped if given in reverse.
    pub fn new(parent: &'a mut dyn ProgressListener, min: u64, max: u64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            parent,
            min,
            max,
            total: 0,
        }
    }

    fn rescale(&self, completed: u64) -> u64 {
        if self.total == 0 {
            return self.max;
        }

        let completed = completed.min(self.total);
        let span = (self.max - self.min) as u128;
        self.min + (span * completed as u128 / self.total as u128) as u64
    }
}

impl ProgressListener for RescalingProgressListener<'_> {
    fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    fn set_completed(&mut self, completed: u64) {
        let absolute = self.rescale(completed);
        self.parent.set_completed(absolute);
    }

    fn complete(&mut self) {
        self.set_completed(self.total);
    }
}
