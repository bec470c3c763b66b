mod common;

use std::{sync::Arc, time::Duration};

use common::{sheet, Harness, MemoryLock, StaticQuizSource};
use make_api::services::sync_worker::{CycleOutcome, SkipReason};

#[tokio::test]
async fn test_failing_quiz_does_not_stop_the_cycle() {
    let harness = Harness::new();
    harness.source.fail_with("q-general", 500);
    harness.source.set_sheet(
        "q-laser",
        sheet(&["9/14/2025 13:45:12,7 / 7,Ann Lee,40123456,ann@g.hmc.edu"]),
    );

    let CycleOutcome::Completed(report) = harness.worker().run_cycle().await else {
        panic!("cycle should run");
    };

    assert_eq!(report.failed_quizzes(), 1);
    assert!(!report.is_clean());
    let laser = report.quizzes.iter().find(|q| q.quiz_id == "q-laser").unwrap();
    assert_eq!(laser.stored, Some(1));

    let summary = report.reconcile.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(harness.users.snapshot().await.len(), 1);
}

#[tokio::test]
async fn test_cycle_repairs_ids_before_reconciling() {
    let harness = Harness::new();
    harness.source.set_sheet(
        "q-general",
        sheet(&[
            "9/14/2025 13:45:12,7 / 7,Ann Lee,40123456,ann@g.hmc.edu",
            "9/20/2025 10:00:00,7 / 7,Ann Lee,1234,ann@g.hmc.edu",
        ]),
    );
    harness.source.set_sheet("q-laser", sheet(&[]));

    let CycleOutcome::Completed(report) = harness.worker().run_cycle().await else {
        panic!("cycle should run");
    };

    assert_eq!(report.ids_repaired, 1);
    assert!(harness
        .stored_for("q-general")
        .await
        .iter()
        .all(|s| s.student_id == 40123456));
    assert_eq!(harness.users.snapshot().await.len(), 1);
}

#[tokio::test]
async fn test_overlapping_cycle_is_skipped() {
    let harness = Harness::with_source(StaticQuizSource::with_delay(Duration::from_millis(200)));
    harness.source.set_sheet("q-general", sheet(&[]));
    harness.source.set_sheet("q-laser", sheet(&[]));
    let worker = harness.worker();

    let (first, second) = tokio::join!(worker.run_cycle(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.run_cycle().await
    });

    assert!(matches!(first, CycleOutcome::Completed(_)));
    assert!(matches!(second, CycleOutcome::Skipped(SkipReason::Busy)));

    let status = harness.status.read().await;
    assert_eq!(status.cycles_completed, 1);
    assert_eq!(status.cycles_skipped, 1);
    assert!(!status.busy);
    assert!(status.last_report.is_some());
}

#[tokio::test]
async fn test_cycle_skipped_while_another_process_holds_lease() {
    let harness = Harness::new();
    let lock = Arc::new(MemoryLock::held_by("other-host"));
    let worker = harness.worker().with_lease(lock.clone());

    let outcome = worker.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Skipped(SkipReason::LeaseHeld)));
    assert_eq!(harness.source.calls(), 0);
    assert_eq!(lock.holder().as_deref(), Some("other-host"));
    assert_eq!(harness.status.read().await.cycles_skipped, 1);
}

#[tokio::test]
async fn test_lease_renewed_through_cycle_and_released() {
    let harness = Harness::new();
    harness.source.set_sheet(
        "q-general",
        sheet(&["9/14/2025 13:45:12,7 / 7,Ann Lee,40123456,ann@g.hmc.edu"]),
    );
    harness.source.set_sheet("q-laser", sheet(&[]));
    let lock = Arc::new(MemoryLock::new());
    let worker = harness.worker().with_lease(lock.clone());

    let CycleOutcome::Completed(report) = worker.run_cycle().await else {
        panic!("cycle should run");
    };

    assert!(report.is_clean());
    assert!(!report.lease_lost);
    // once per quiz, then once after id repair
    assert_eq!(lock.renewals(), 3);
    assert_eq!(lock.releases(), 1);
    assert_eq!(lock.holder(), None);
    assert_eq!(harness.users.snapshot().await.len(), 1);
}

#[tokio::test]
async fn test_lost_lease_stops_cycle_before_reconcile() {
    let harness = Harness::new();
    harness.source.set_sheet(
        "q-general",
        sheet(&["9/14/2025 13:45:12,7 / 7,Ann Lee,40123456,ann@g.hmc.edu"]),
    );
    harness.source.set_sheet(
        "q-laser",
        sheet(&["9/15/2025 09:00:00,7 / 7,Bo Park,40000002,bo@g.hmc.edu"]),
    );
    let lock = Arc::new(MemoryLock::lapsing_after(0));
    let worker = harness.worker().with_lease(lock.clone());

    let CycleOutcome::Completed(report) = worker.run_cycle().await else {
        panic!("cycle should run");
    };

    assert!(report.lease_lost);
    assert!(!report.is_clean());
    assert_eq!(report.quizzes.len(), 1);
    assert!(report.reconcile.is_none());
    assert_eq!(harness.source.calls(), 1);
    assert!(harness.users.snapshot().await.is_empty());
    // the new holder keeps its lease
    assert_eq!(lock.holder().as_deref(), Some("someone-else"));
}
