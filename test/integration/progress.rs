// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::ProgressLog;

use pretty_assertions::assert_eq;
use repotree::progress::{ProgressListener, RescalingProgressListener};

#[test]
fn rescaler_maps_into_parent_range() {
    let log = ProgressLog::default();
    let mut parent = log.clone();
    {
        let mut rescaler = RescalingProgressListener::new(&mut parent, 20, 80);
        rescaler.set_total(4);
        rescaler.set_completed(2);
        rescaler.complete();
    }

    assert_eq!(log.state().updates, vec![50, 80]);
}

#[test]
fn rescaler_treats_empty_total_as_complete() {
    let log = ProgressLog::default();
    let mut parent = log.clone();
    {
        let mut rescaler = RescalingProgressListener::new(&mut parent, 20, 80);
        rescaler.set_total(0);
        rescaler.set_completed(0);
        rescaler.set_completed(17);
    }

    assert_eq!(log.state().updates, vec![80, 80]);
}

#[test]
fn nested_rescalers_compose() {
    let log = ProgressLog::default();
    let mut parent = log.clone();
    {
        let mut outer = RescalingProgressListener::new(&mut parent, 0, 1000);
        outer.set_total(1000);
        let mut inner = RescalingProgressListener::new(&mut outer, 500, 1000);
        inner.set_total(10);
        inner.set_completed(5);
    }

    assert_eq!(log.state().updates, vec![750]);
}
