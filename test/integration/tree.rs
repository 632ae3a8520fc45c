// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{loc, EventLog, StoreFixture};

use anyhow::Result;
use pretty_assertions::assert_eq;
use repotree::{
    entry::{EntryKind, Location},
    store::{EntryStore, MemoryStore, StoreError},
    tree::{FolderStatus, Node, SortOrder, TreeEvent, TreeFilter, TreeModel},
};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};

fn names(nodes: Vec<Node>) -> Vec<String> {
    nodes
        .into_iter()
        .map(|node| match node {
            Node::Entry(entry) => entry.name().to_string(),
            Node::Pending(_) => "<pending>".to_string(),
        })
        .collect()
}

async fn settle(model: &mut TreeModel<MemoryStore>, folder: &Location) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while model.status(folder) == FolderStatus::Pending {
            model.dispatch_next().await;
        }
    })
    .await?;

    Ok(())
}

#[test]
fn children_follow_store_mutations() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let mut model = TreeModel::new(Arc::clone(&fixture.store), TreeFilter::new(), SortOrder::Name);
    let folder = loc("//Local/processes");
    assert_eq!(names(model.children(&folder)), vec!["etl", "report"]);

    fixture
        .store
        .add_entry(&loc("//Local/processes/clean"), EntryKind::Process, 5)?;
    model.dispatch_pending();
    assert_eq!(names(model.children(&folder)), vec!["clean", "etl", "report"]);

    fixture.store.rename(&loc("//Local/processes/etl"), "load")?;
    model.dispatch_pending();
    assert_eq!(names(model.children(&folder)), vec!["clean", "load", "report"]);

    fixture.store.remove(&loc("//Local/processes/report"))?;
    model.dispatch_pending();
    assert_eq!(names(model.children(&folder)), vec!["clean", "load"]);

    Ok(())
}

#[test]
fn store_events_become_indexed_tree_events() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let log = EventLog::default();
    let mut model = TreeModel::new(Arc::clone(&fixture.store), TreeFilter::new(), SortOrder::Name);
    model.subscribe(log.observer());
    let folder = loc("//Local/processes");
    model.children(&folder);

    let added = fixture
        .store
        .add_entry(&loc("//Local/processes/clean"), EntryKind::Process, 5)?;
    let removed = fixture
        .store
        .resolve(&loc("//Local/processes/report"))?
        .ok_or_else(|| anyhow::anyhow!("missing report"))?;
    fixture.store.remove(&removed.location)?;
    assert_eq!(model.dispatch_pending(), 2);

    assert_eq!(
        log.take(),
        vec![
            TreeEvent::NodesInserted {
                parent: folder.clone(),
                indices: vec![0],
                nodes: vec![Node::Entry(added)],
            },
            TreeEvent::NodesRemoved {
                parent: folder.clone(),
                indices: vec![2],
                nodes: vec![Node::Entry(removed)],
            },
        ]
    );

    Ok(())
}

#[tokio::test]
async fn slow_folder_fetches_at_most_once() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let log = EventLog::default();
    let mut model = TreeModel::new(Arc::clone(&fixture.store), TreeFilter::new(), SortOrder::Name);
    model.subscribe(log.observer());
    let folder = loc("//Server/shared");

    for _ in 0..5 {
        assert_eq!(model.children(&folder), vec![Node::Pending(folder.clone())]);
    }
    assert_eq!(model.status(&folder), FolderStatus::Pending);
    assert!(model.is_fetching(&folder));

    settle(&mut model, &folder).await?;

    assert_eq!(fixture.store.listing_count(&folder), 1);
    assert!(!model.is_fetching(&folder));
    assert_eq!(names(model.children(&folder)), vec!["budget"]);

    let events = log.take();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        TreeEvent::NodesRemoved {
            parent: folder.clone(),
            indices: vec![0],
            nodes: vec![Node::Pending(folder.clone())],
        }
    );
    assert!(matches!(
        &events[1],
        TreeEvent::NodesInserted { parent, indices, .. } if *parent == folder && *indices == vec![0]
    ));

    Ok(())
}

#[tokio::test]
async fn broken_folder_recovers_after_refresh() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let log = EventLog::default();
    let mut model = TreeModel::new(Arc::clone(&fixture.store), TreeFilter::new(), SortOrder::Name);
    model.subscribe(log.observer());
    let folder = loc("//Server/shared");
    fixture
        .store
        .inject_listing_fault(&folder, StoreError::Failure("connection reset".into()));

    model.children(&folder);
    settle(&mut model, &folder).await?;

    assert_eq!(model.status(&folder), FolderStatus::Broken);
    assert_eq!(model.child_count(&folder), 0);
    assert!(log.take().iter().any(|event| matches!(
        event,
        TreeEvent::FetchFailed { folder: failed, .. } if *failed == folder
    )));

    // Broken folders stay quiet until refreshed.
    model.children(&folder);
    assert!(!model.is_fetching(&folder));
    assert_eq!(fixture.store.listing_count(&folder), 1);

    fixture.store.refresh(&folder)?;
    model.dispatch_pending();
    assert_eq!(model.status(&folder), FolderStatus::Ready);

    assert_eq!(names(model.children(&folder)), vec!["<pending>"]);
    settle(&mut model, &folder).await?;
    assert_eq!(names(model.children(&folder)), vec!["budget"]);
    assert_eq!(fixture.store.listing_count(&folder), 2);

    Ok(())
}

#[tokio::test]
async fn disconnect_during_fetch_stays_silent() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let log = EventLog::default();
    let mut model = TreeModel::new(Arc::clone(&fixture.store), TreeFilter::new(), SortOrder::Name);
    model.subscribe(log.observer());
    let folder = loc("//Server/shared");
    fixture
        .store
        .inject_listing_fault(&folder, StoreError::Disconnected("Server".into()));

    model.children(&folder);
    timeout(Duration::from_secs(5), async {
        while model.is_fetching(&folder) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    assert_eq!(model.dispatch_pending(), 0);
    assert_eq!(log.take(), vec![]);
    assert_eq!(model.status(&folder), FolderStatus::Pending);

    // Next query tries again.
    model.children(&folder);
    settle(&mut model, &folder).await?;
    assert_eq!(names(model.children(&folder)), vec!["budget"]);

    Ok(())
}

#[tokio::test]
async fn fetch_outdated_by_sort_change_is_discarded() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let log = EventLog::default();
    let mut model = TreeModel::new(Arc::clone(&fixture.store), TreeFilter::new(), SortOrder::Name);
    model.subscribe(log.observer());
    let folder = loc("//Server/shared");

    model.children(&folder);
    model.set_sort_order(SortOrder::LastModified);
    settle(&mut model, &folder).await?;

    assert_eq!(
        log.take(),
        vec![
            TreeEvent::TreeReset,
            TreeEvent::StructureChanged {
                node: folder.clone()
            },
        ]
    );

    assert_eq!(names(model.children(&folder)), vec!["<pending>"]);
    settle(&mut model, &folder).await?;
    assert_eq!(names(model.children(&folder)), vec!["budget"]);
    assert_eq!(fixture.store.listing_count(&folder), 2);

    Ok(())
}

#[test]
fn repository_disconnect_drops_cached_folders() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let log = EventLog::default();
    let mut model = TreeModel::new(Arc::clone(&fixture.store), TreeFilter::new(), SortOrder::Name);
    model.subscribe(log.observer());
    let folder = loc("//Local/data/archive");

    model.children(&folder);
    model.children(&folder);
    assert_eq!(fixture.store.listing_count(&folder), 1);

    fixture.store.disconnect(&folder);
    model.dispatch_pending();
    assert_eq!(
        log.take(),
        vec![TreeEvent::StructureChanged {
            node: loc("//Local")
        }]
    );

    model.children(&folder);
    assert_eq!(fixture.store.listing_count(&folder), 2);

    Ok(())
}

#[test]
fn writable_filter_hides_read_only_repositories() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let log = EventLog::default();
    let filter = TreeFilter::new().only_writable(true);
    let mut model = TreeModel::new(Arc::clone(&fixture.store), filter, SortOrder::Name);
    model.subscribe(log.observer());

    let roots = model
        .repositories()
        .into_iter()
        .map(|root| root.location.to_string())
        .collect::<Vec<_>>();
    assert_eq!(roots, vec!["//Local", "//Server"]);

    fixture.store.add_folder(&loc("//Mirror/backup/2024"))?;
    assert_eq!(model.dispatch_pending(), 1);
    assert_eq!(log.take(), vec![]);
    assert_eq!(model.child_count(&loc("//Mirror/backup")), 0);

    Ok(())
}

#[test]
fn folders_only_tree() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let filter = TreeFilter::new().only_folders(true);
    let mut model = TreeModel::new(Arc::clone(&fixture.store), filter, SortOrder::Name);

    assert_eq!(
        names(model.children(&loc("//Local"))),
        vec!["Connections", "data", "processes"]
    );
    assert_eq!(names(model.children(&loc("//Local/data"))), vec!["archive"]);

    Ok(())
}

#[tokio::test]
async fn settled_children_give_up_on_abandoned_fetch() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let mut model = TreeModel::new(Arc::clone(&fixture.store), TreeFilter::new(), SortOrder::Name);
    let folder = loc("//Server/shared");
    let poll = Duration::from_millis(10);
    fixture
        .store
        .inject_listing_fault(&folder, StoreError::Disconnected("Server".into()));

    let children = timeout(Duration::from_secs(5), model.settled_children(&folder, poll)).await?;
    assert_eq!(children, None);
    assert_eq!(model.status(&folder), FolderStatus::Pending);

    let children = timeout(Duration::from_secs(5), model.settled_children(&folder, poll)).await?;
    assert_eq!(children.map(names), Some(vec!["budget".to_string()]));
    assert_eq!(fixture.store.listing_count(&folder), 2);

    Ok(())
}
