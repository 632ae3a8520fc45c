// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{loc, ProgressLog, ScriptedFrontend, StoreFixture};

use anyhow::Result;
use pretty_assertions::assert_eq;
use repotree::{
    entry::{EntryKind, Location},
    store::{memory::StoreOperation, EntryStore, MemoryStore, StoreError},
    transfer::{
        BatchReport, ConflictChoice, ConflictDecision, EntryOutcome, FailureChoice, Gesture,
        PreflightError, TransferEngine, ENTRY_SCALE,
    },
};
use std::sync::Arc;

fn engine(
    fixture: &StoreFixture,
    frontend: ScriptedFrontend,
) -> (TransferEngine<MemoryStore, ScriptedFrontend>, Arc<ScriptedFrontend>) {
    let frontend = Arc::new(frontend);
    let engine = TransferEngine::new(Arc::clone(&fixture.store), Arc::clone(&frontend));
    (engine, frontend)
}

async fn run(
    engine: &TransferEngine<MemoryStore, ScriptedFrontend>,
    target: &str,
    sources: &[&str],
    gesture: Gesture,
) -> Result<(BatchReport, ProgressLog)> {
    let progress = ProgressLog::default();
    let handle = engine.transfer(
        &loc(target),
        sources.iter().map(|source| loc(source)),
        gesture,
        progress.clone(),
    )?;
    Ok((handle.await?, progress))
}

fn rejected(
    engine: &TransferEngine<MemoryStore, ScriptedFrontend>,
    target: &str,
    sources: &[&str],
    gesture: Gesture,
) -> Option<PreflightError> {
    engine
        .transfer(
            &loc(target),
            sources.iter().map(|source| loc(source)),
            gesture,
            ProgressLog::default(),
        )
        .err()
}

#[tokio::test]
async fn self_transfer_is_rejected_without_mutation() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let before = fixture.snapshot();
    let (engine, frontend) = engine(&fixture, ScriptedFrontend::default());

    let error = rejected(&engine, "//Local/processes", &["//Local/processes"], Gesture::Move);

    assert_eq!(error, Some(PreflightError::SelfTransfer(loc("//Local/processes"))));
    assert_eq!(fixture.snapshot(), before);
    assert_eq!(fixture.store.operations(), vec![]);
    assert_eq!(frontend.asked(), vec!["notice rejected"]);

    Ok(())
}

#[tokio::test]
async fn move_into_own_subtree_is_rejected_without_mutation() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let before = fixture.snapshot();
    let (engine, _) = engine(&fixture, ScriptedFrontend::default());

    let error = rejected(
        &engine,
        "//Local/data/archive",
        &["//Local/processes/etl", "//Local/data"],
        Gesture::Move,
    );

    assert_eq!(
        error,
        Some(PreflightError::IntoOwnSubtree {
            entry: loc("//Local/data"),
            target: loc("//Local/data/archive"),
        })
    );
    assert_eq!(fixture.snapshot(), before);

    Ok(())
}

#[tokio::test]
async fn move_into_current_parent_is_rejected() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let (engine, _) = engine(&fixture, ScriptedFrontend::default());

    let error = rejected(&engine, "//Local/processes", &["//Local/processes/etl"], Gesture::Move);

    assert_eq!(
        error,
        Some(PreflightError::AlreadyInTarget {
            entry: loc("//Local/processes/etl"),
            target: loc("//Local/processes"),
        })
    );
    assert_eq!(fixture.store.operations(), vec![]);

    Ok(())
}

#[tokio::test]
async fn nested_selection_transfers_outermost_only() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let (engine, frontend) = engine(&fixture, ScriptedFrontend::default());

    let (report, _) = run(
        &engine,
        "//Server/shared",
        &["//Local/data", "//Local/data/sales", "//Local/data/archive/2023"],
        Gesture::Copy,
    )
    .await?;

    assert_eq!(
        report.outcomes,
        vec![(
            loc("//Local/data"),
            EntryOutcome::Done(loc("//Server/shared/data"))
        )]
    );
    assert_eq!(
        fixture.store.operations(),
        vec![StoreOperation::Copy {
            source: loc("//Local/data"),
            target: loc("//Server/shared"),
            overwrite: false,
        }]
    );
    assert!(fixture
        .store
        .resolve(&loc("//Server/shared/data/archive/2023"))?
        .is_some());

    // Three locations were selected, so the target is revealed.
    assert_eq!(frontend.asked(), vec!["reveal //Server/shared"]);

    Ok(())
}

#[tokio::test]
async fn repeated_overwrite_skips_second_prompt() -> Result<()> {
    let fixture = StoreFixture::new()?;
    fixture.store.add_folder(&loc("//Local/out"))?;
    fixture
        .store
        .add_entry(&loc("//Local/out/etl"), EntryKind::Process, 1)?;
    fixture
        .store
        .add_entry(&loc("//Local/out/report"), EntryKind::Process, 1)?;
    let (engine, frontend) = engine(
        &fixture,
        ScriptedFrontend::with_conflicts([ConflictChoice::always(ConflictDecision::Overwrite)]),
    );

    let (report, _) = run(
        &engine,
        "//Local/out",
        &["//Local/processes/etl", "//Local/processes/report"],
        Gesture::Copy,
    )
    .await?;

    assert_eq!(
        frontend.asked(),
        vec!["conflict //Local/out/etl", "reveal //Local/out"]
    );
    assert_eq!(
        report.transferred(),
        vec![&loc("//Local/out/etl"), &loc("//Local/out/report")]
    );
    assert!(fixture
        .store
        .operations()
        .iter()
        .all(|operation| matches!(operation, StoreOperation::Copy { overwrite: true, .. })));

    let etl = fixture
        .store
        .resolve(&loc("//Local/out/etl"))?
        .map(|entry| entry.last_modified);
    assert_eq!(etl, Some(20));

    Ok(())
}

#[tokio::test]
async fn repository_move_is_performed_as_copy() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let (engine, _) = engine(&fixture, ScriptedFrontend::default());

    let (report, _) = run(&engine, "//Local/data", &["//Server"], Gesture::Move).await?;

    assert_eq!(
        fixture.store.operations(),
        vec![StoreOperation::Copy {
            source: loc("//Server"),
            target: loc("//Local/data"),
            overwrite: false,
        }]
    );
    assert_eq!(report.transferred(), vec![&loc("//Local/data/Server")]);
    assert!(fixture.store.resolve(&loc("//Server"))?.is_some());

    let copied = fixture.store.resolve(&loc("//Local/data/Server"))?;
    assert_eq!(copied.map(|entry| entry.kind), Some(EntryKind::Folder));

    Ok(())
}

#[tokio::test]
async fn cancel_all_keeps_completed_entries() -> Result<()> {
    let fixture = StoreFixture::new()?;
    fixture.store.add_folder(&loc("//Local/out"))?;
    fixture
        .store
        .inject_transfer_fault(&loc("//Local/processes/report"), StoreError::Failure("disk full".into()));
    let (engine, frontend) = engine(&fixture, ScriptedFrontend::default());
    frontend
        .failures
        .lock()
        .unwrap()
        .push_back(FailureChoice::CancelAll);

    let (report, progress) = run(
        &engine,
        "//Local/out",
        &["//Local/processes/etl", "//Local/processes/report", "//Local/data/sales"],
        Gesture::Move,
    )
    .await?;

    assert!(report.cancelled);
    assert_eq!(report.transferred(), vec![&loc("//Local/out/etl")]);
    assert_eq!(report.not_attempted, vec![loc("//Local/data/sales")]);
    assert!(fixture.store.resolve(&loc("//Local/out/etl"))?.is_some());
    assert!(fixture.store.resolve(&loc("//Local/data/sales"))?.is_some());
    assert_eq!(
        frontend.asked(),
        vec!["failure //Local/processes/report", "reveal //Local/out"]
    );

    let progress = progress.state();
    assert_eq!(progress.total, Some(3 * ENTRY_SCALE));
    assert_eq!(progress.completions, 1);

    Ok(())
}

#[tokio::test]
async fn connection_without_connections_support_is_skipped() -> Result<()> {
    let fixture = StoreFixture::new()?;
    fixture.store.set_writable("Mirror", true);
    let (engine, frontend) = engine(&fixture, ScriptedFrontend::default());

    let (report, progress) =
        run(&engine, "//Mirror/backup", &["//Local/Connections/db"], Gesture::Copy).await?;

    assert_eq!(frontend.asked(), vec!["notice violation"]);
    assert_eq!(report.skipped(), vec![&loc("//Local/Connections/db")]);
    assert!(!report.cancelled);
    assert_eq!(progress.state().updates.last(), Some(&ENTRY_SCALE));

    Ok(())
}

#[tokio::test]
async fn connection_redirect_can_be_declined() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let (engine, frontend) = engine(&fixture, ScriptedFrontend::default());
    frontend.redirects.lock().unwrap().push_back(false);

    let (report, _) = run(&engine, "//Server/shared", &["//Local/Connections/db"], Gesture::Move).await?;

    assert_eq!(
        frontend.asked(),
        vec!["redirect //Local/Connections/db //Server/Connections"]
    );
    assert!(report.cancelled);
    assert!(fixture.store.resolve(&loc("//Local/Connections/db"))?.is_some());

    Ok(())
}

#[tokio::test]
async fn moving_connections_folder_is_refused() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let (engine, frontend) = engine(&fixture, ScriptedFrontend::default());
    frontend.violations.lock().unwrap().push_back(true);

    let (report, _) = run(
        &engine,
        "//Server/shared",
        &["//Local/Connections", "//Local/processes/etl"],
        Gesture::Move,
    )
    .await?;

    let expect: Vec<(Location, EntryOutcome)> = vec![
        (loc("//Local/Connections"), EntryOutcome::Skipped),
        (
            loc("//Local/processes/etl"),
            EntryOutcome::Done(loc("//Server/shared/etl")),
        ),
    ];
    assert_eq!(report.outcomes, expect);
    assert_eq!(
        frontend.asked(),
        vec!["violation //Local/Connections", "reveal //Server/shared"]
    );

    Ok(())
}

#[tokio::test]
async fn redirected_connection_offers_insert_on_clash() -> Result<()> {
    let fixture = StoreFixture::new()?;
    fixture
        .store
        .add_entry(&loc("//Server/Connections/db"), EntryKind::Connection, 3)?;
    let (engine, frontend) = engine(
        &fixture,
        ScriptedFrontend::with_conflicts([ConflictChoice::once(ConflictDecision::Insert)]),
    );
    frontend.redirects.lock().unwrap().push_back(true);

    let (report, _) = run(&engine, "//Server/shared", &["//Local/Connections/db"], Gesture::Copy).await?;

    assert_eq!(
        frontend.asked(),
        vec![
            "redirect //Local/Connections/db //Server/Connections",
            "conflict //Server/Connections/db",
        ]
    );
    assert_eq!(
        report.outcomes,
        vec![(
            loc("//Local/Connections/db"),
            EntryOutcome::Done(loc("//Server/Connections/db (2)"))
        )]
    );
    assert!(fixture.store.resolve(&loc("//Server/Connections/db"))?.is_some());

    Ok(())
}
