//! Event dispatch and job worker behaviour against the in-memory store.

mod common;

use common::{date, Harness};
use rollup_common::{DispatchMode, Milestone, WorkItem, WorkItemEvent, WorkItemType, WorkerConfig};
use rollup_engine::{DispatchOutcome, JobOutcome, RollupDispatcher, RollupWorker};
use rollup_store::RollupQueue;
use serde_json::json;

fn milestone_fixture(h: &Harness) {
    h.epic(1, None);
    h.store.insert_milestone(Milestone {
        id: 10,
        start_date: Some(date(2024, 1, 1)),
        due_date: Some(date(2024, 3, 1)),
    });
    h.store
        .insert_work_item(WorkItem::new(2, WorkItemType::Issue).with_parent(1).with_milestone(10));
}

fn milestone_moved() -> WorkItemEvent {
    WorkItemEvent::MilestoneUpdated {
        milestone_id: 10,
        changed_attributes: Some(vec!["due_date".into()]),
    }
}

// =========================================================================
// Dispatcher
// =========================================================================

#[tokio::test]
async fn milestone_change_recomputes_parents_inline() {
    let h = Harness::new();
    milestone_fixture(&h);
    h.store.update_milestone(10, Some(date(2024, 1, 1)), Some(date(2024, 4, 15)));
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Inline);

    let outcome = dispatcher.handle(&milestone_moved()).await.unwrap();

    let summary = match outcome {
        DispatchOutcome::Recomputed(summary) => summary,
        other => panic!("expected inline recompute, got {other:?}"),
    };
    assert_eq!(summary.updated, 1);
    assert_eq!(h.source(1).due_date, Some(date(2024, 4, 15)));
    assert_eq!(h.source(1).due_date_sourcing_milestone_id, Some(10));
}

#[tokio::test]
async fn async_mode_enqueues_instead_of_computing() {
    let h = Harness::new();
    milestone_fixture(&h);
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Async);

    let outcome = dispatcher.handle(&milestone_moved()).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Enqueued(vec![1]));
    assert_eq!(h.queue.enqueued(), vec![vec![1]]);
    assert!(h.store.dates_sources().is_empty());

    let worker = RollupWorker::new(h.service.clone(), WorkerConfig::default());
    worker.drain(10).await.unwrap();
    assert_eq!(h.source(1).start_date, Some(date(2024, 1, 1)));
}

#[tokio::test]
async fn irrelevant_changes_are_ignored() {
    let h = Harness::new();
    milestone_fixture(&h);
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Inline);

    let title_only = WorkItemEvent::WorkItemUpdated {
        work_item_id: 2,
        changed_attributes: Some(vec!["title".into()]),
        changed_widgets: Vec::new(),
    };
    let undeclared = WorkItemEvent::WorkItemUpdated {
        work_item_id: 2,
        changed_attributes: None,
        changed_widgets: Vec::new(),
    };

    assert_eq!(dispatcher.handle(&title_only).await.unwrap(), DispatchOutcome::Ignored);
    assert_eq!(dispatcher.handle(&undeclared).await.unwrap(), DispatchOutcome::Ignored);
    assert!(h.store.dates_sources().is_empty());
}

#[tokio::test]
async fn dispatcher_without_triggers_ignores_everything() {
    let h = Harness::new();
    milestone_fixture(&h);
    let dispatcher = RollupDispatcher::new(h.service.clone(), DispatchMode::Inline);

    assert_eq!(dispatcher.handle(&milestone_moved()).await.unwrap(), DispatchOutcome::Ignored);
}

#[tokio::test]
async fn widget_change_on_child_recomputes_its_parent() {
    let h = Harness::new();
    h.epic(1, None);
    h.store.insert_work_item(
        WorkItem::new(2, WorkItemType::Issue)
            .with_parent(1)
            .with_dates(Some(date(2024, 5, 5)), None),
    );
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Inline);

    let event = WorkItemEvent::WorkItemUpdated {
        work_item_id: 2,
        changed_attributes: None,
        changed_widgets: vec!["start_and_due_date".into()],
    };
    dispatcher.handle(&event).await.unwrap();

    assert_eq!(h.source(1).start_date, Some(date(2024, 5, 5)));
}

#[tokio::test]
async fn reparenting_updates_old_and_new_parent() {
    let h = Harness::new();
    h.epic(1, None);
    h.epic(2, None);
    h.fixed_child(3, 1, Some(date(2024, 1, 1)), Some(date(2024, 1, 31)));
    h.service.execute(&[1, 2]).await.unwrap();
    assert_eq!(h.source(1).start_date, Some(date(2024, 1, 1)));

    h.store.set_parent(3, Some(2));
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Inline);
    let outcome = dispatcher
        .handle(&WorkItemEvent::WorkItemReparented {
            work_item_id: 3,
            previous_parent_id: Some(1),
            parent_id: Some(2),
        })
        .await
        .unwrap();

    let summary = match outcome {
        DispatchOutcome::Recomputed(summary) => summary,
        other => panic!("expected inline recompute, got {other:?}"),
    };
    assert_eq!(summary.updated, 3);
    assert_eq!(h.source(1).start_date, None);
    assert_eq!(h.source(2).start_date, Some(date(2024, 1, 1)));
    assert_eq!(h.source(2).due_date_sourcing_work_item_id, Some(3));
}

#[tokio::test]
async fn reparented_leaf_carries_its_legacy_dates_to_the_new_parent() {
    let h = Harness::new();
    h.epic(1, None);
    h.epic(2, None);
    h.store.insert_work_item(
        WorkItem::new(3, WorkItemType::Issue)
            .with_parent(1)
            .with_dates(Some(date(2024, 1, 10)), Some(date(2024, 2, 10))),
    );
    h.service.execute(&[1, 2]).await.unwrap();
    assert_eq!(h.source(1).start_date, Some(date(2024, 1, 10)));

    h.store.set_parent(3, Some(2));
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Inline);
    dispatcher
        .handle(&WorkItemEvent::WorkItemReparented {
            work_item_id: 3,
            previous_parent_id: Some(1),
            parent_id: Some(2),
        })
        .await
        .unwrap();

    let leaf = h.source(3);
    assert_eq!(leaf.start_date, Some(date(2024, 1, 10)));
    assert_eq!(leaf.due_date, Some(date(2024, 2, 10)));
    assert_eq!(h.source(1).start_date, None);
    assert_eq!(h.source(1).due_date, None);
    let new_parent = h.source(2);
    assert_eq!(new_parent.start_date, Some(date(2024, 1, 10)));
    assert_eq!(new_parent.due_date, Some(date(2024, 2, 10)));
    assert_eq!(new_parent.start_date_sourcing_work_item_id, Some(3));
}

#[tokio::test]
async fn created_child_recomputes_its_parent() {
    let h = Harness::new();
    h.epic(1, None);
    h.service.execute(&[1]).await.unwrap();
    assert_eq!(h.source(1).due_date, None);

    h.store.insert_work_item(
        WorkItem::new(2, WorkItemType::Issue)
            .with_parent(1)
            .with_dates(None, Some(date(2024, 7, 1))),
    );
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Inline);
    let outcome = dispatcher
        .handle_stored("work_item_created", &json!({"work_item_id": 2, "parent_id": 1}))
        .await
        .unwrap();

    assert!(matches!(outcome, DispatchOutcome::Recomputed(_)), "got {outcome:?}");
    assert_eq!(h.source(1).due_date, Some(date(2024, 7, 1)));
    assert_eq!(h.source(1).due_date_sourcing_work_item_id, Some(2));

    let root = WorkItemEvent::WorkItemCreated {
        work_item_id: 5,
        parent_id: None,
    };
    assert_eq!(dispatcher.handle(&root).await.unwrap(), DispatchOutcome::Ignored);
}

#[tokio::test]
async fn bulk_move_recomputes_current_and_previous_parents() {
    let h = Harness::new();
    h.epic(1, None);
    h.epic(2, None);
    h.fixed_child(3, 1, Some(date(2024, 2, 1)), None);
    h.fixed_child(4, 1, Some(date(2024, 2, 9)), None);
    h.service.execute(&[1]).await.unwrap();

    h.store.set_parent(3, Some(2));
    h.store.set_parent(4, Some(2));
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Async);
    let outcome = dispatcher
        .handle(&WorkItemEvent::HierarchyBulkUpdated {
            work_item_ids: vec![3, 4],
            previous_parent_ids: vec![1],
            changed_attributes: Some(vec!["parent_id".into()]),
        })
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Enqueued(vec![1, 2]));
}

#[tokio::test]
async fn deleted_child_no_longer_contributes() {
    let h = Harness::new();
    h.epic(1, None);
    h.fixed_child(2, 1, Some(date(2024, 1, 1)), None);
    h.fixed_child(3, 1, Some(date(2024, 1, 20)), None);
    h.service.execute(&[1]).await.unwrap();
    assert_eq!(h.source(1).start_date, Some(date(2024, 1, 1)));

    h.store.delete_work_item(2);
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Inline);
    dispatcher
        .handle(&WorkItemEvent::WorkItemDeleted {
            work_item_id: 2,
            parent_id: Some(1),
        })
        .await
        .unwrap();

    assert_eq!(h.source(1).start_date, Some(date(2024, 1, 20)));
    assert_eq!(h.source(1).start_date_sourcing_work_item_id, Some(3));
}

#[tokio::test]
async fn stored_events_are_decoded_and_malformed_ones_ignored() {
    let h = Harness::new();
    milestone_fixture(&h);
    let dispatcher = RollupDispatcher::with_default_triggers(h.service.clone(), DispatchMode::Async);

    let ok = dispatcher
        .handle_stored(
            "milestone_updated",
            &json!({"milestone_id": 10, "changed_attributes": ["start_date"]}),
        )
        .await
        .unwrap();
    assert_eq!(ok, DispatchOutcome::Enqueued(vec![1]));

    let not_an_object = dispatcher.handle_stored("milestone_updated", &json!("10")).await.unwrap();
    let missing_field = dispatcher
        .handle_stored("milestone_updated", &json!({"changed_attributes": ["start_date"]}))
        .await
        .unwrap();
    let wrong_tag = dispatcher
        .handle_stored(
            "milestone_updated",
            &json!({"type": "work_item_deleted", "work_item_id": 2, "parent_id": 1}),
        )
        .await
        .unwrap();
    let unknown_type = dispatcher.handle_stored("label_added", &json!({"label_id": 1})).await.unwrap();

    for outcome in [not_an_object, missing_field, wrong_tag, unknown_type] {
        assert_eq!(outcome, DispatchOutcome::Ignored);
    }
    assert_eq!(h.queue.enqueued().len(), 1);
}

// =========================================================================
// Worker
// =========================================================================

#[tokio::test]
async fn failed_job_is_retried_then_completes() {
    let h = Harness::new();
    h.epic(1, None);
    h.fixed_child(2, 1, Some(date(2024, 1, 1)), None);
    h.queue.enqueue(vec![1]).await.unwrap();
    let worker = RollupWorker::new(
        h.service.clone(),
        WorkerConfig {
            max_attempts: 3,
            ..Default::default()
        },
    );

    h.store.fail_next_apply();
    let first = worker.run_once().await.unwrap();
    assert!(matches!(first, JobOutcome::Retrying { attempts: 1, .. }));
    assert_eq!(h.source(1).start_date, None);

    let second = worker.run_once().await.unwrap();
    assert!(matches!(second, JobOutcome::Completed { .. }));
    assert_eq!(h.source(1).start_date, Some(date(2024, 1, 1)));

    assert_eq!(worker.run_once().await.unwrap(), JobOutcome::Idle);
    assert!(h.queue.dead().is_empty());
}

#[tokio::test]
async fn exhausted_job_is_dead_lettered() {
    let h = Harness::new();
    h.epic(1, None);
    h.queue.enqueue(vec![1]).await.unwrap();
    let worker = RollupWorker::new(
        h.service.clone(),
        WorkerConfig {
            max_attempts: 1,
            ..Default::default()
        },
    );

    h.store.fail_next_apply();
    let outcome = worker.run_once().await.unwrap();

    assert!(matches!(outcome, JobOutcome::DeadLettered { attempts: 1, .. }));
    let dead = h.queue.dead();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.work_item_ids, vec![1]);
    assert!(dead[0].1.contains("injected failure"));
    assert_eq!(h.queue.pending_len(), 0);
}

#[tokio::test]
async fn drain_respects_its_limit() {
    let h = Harness::new();
    for id in 1..=3 {
        h.epic(id, None);
        h.queue.enqueue(vec![id]).await.unwrap();
    }
    let worker = RollupWorker::new(h.service.clone(), WorkerConfig::default());

    assert_eq!(worker.drain(2).await.unwrap(), 2);
    assert_eq!(h.queue.pending_len(), 1);
    assert_eq!(worker.drain(10).await.unwrap(), 1);
}

#[tokio::test]
async fn run_loop_stops_on_shutdown() {
    let h = Harness::new();
    h.epic(1, None);
    h.queue.enqueue(vec![1]).await.unwrap();
    let worker = RollupWorker::new(
        h.service.clone(),
        WorkerConfig {
            poll_interval: std::time::Duration::from_millis(10),
            ..Default::default()
        },
    );
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(async move { worker.run(rx).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(h.queue.pending_len(), 0);
    assert!(h.store.dates_sources().iter().any(|s| s.work_item_id == 1));
}

#[tokio::test]
async fn run_loop_with_huge_poll_interval_still_stops() {
    let h = Harness::new();
    let worker = RollupWorker::new(
        h.service.clone(),
        WorkerConfig {
            poll_interval: std::time::Duration::MAX,
            ..Default::default()
        },
    );
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(async move { worker.run(rx).await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap()
        .unwrap();
}
