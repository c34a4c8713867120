/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Integration tests for the atomic claim protocol.

use std::collections::HashSet;
use std::sync::Arc;

use crate::fixtures::get_or_init_fixture;
use chrono::{Duration, Utc};
use columba::database::UniversalTimestamp;
use columba::models::{NewTask, TaskStatus};
use serial_test::serial;
use tokio::sync::Barrier;

#[tokio::test]
#[serial]
async fn test_claim_marks_task_running_with_deadline() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let created = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast").with_max_runtime(120))
        .await
        .expect("Failed to create task");

    let before = UniversalTimestamp(Utc::now());
    let batch = dal
        .tasks()
        .get_next_batch(10)
        .await
        .expect("Failed to claim batch");

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, created.id);
    assert_eq!(batch[0].status, TaskStatus::Running);
    let deadline = batch[0].timeout_after.expect("Claim should set a deadline");
    assert!(deadline > before, "Deadline must be in the future");

    // The claim is durable, not just reflected in the returned batch
    let fetched = dal
        .tasks()
        .get_by_id("ws-1", created.id)
        .await
        .expect("Failed to get task");
    assert_eq!(fetched.status, TaskStatus::Running);
    assert!(fetched.timeout_after.is_some());
}

#[tokio::test]
#[serial]
async fn test_claim_respects_next_run_after() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    dal.tasks()
        .create(
            NewTask::new("ws-1", "send_broadcast")
                .with_next_run_after(UniversalTimestamp(Utc::now() + Duration::hours(1))),
        )
        .await
        .expect("Failed to create task");

    let batch = dal
        .tasks()
        .get_next_batch(10)
        .await
        .expect("Failed to claim batch");
    assert!(batch.is_empty(), "Future-scheduled task must not be claimed");

    let due = dal
        .tasks()
        .create(
            NewTask::new("ws-1", "send_broadcast")
                .with_next_run_after(UniversalTimestamp(Utc::now() - Duration::hours(1))),
        )
        .await
        .expect("Failed to create task");

    let batch = dal
        .tasks()
        .get_next_batch(10)
        .await
        .expect("Failed to claim batch");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, due.id);
}

#[tokio::test]
#[serial]
async fn test_claim_returns_oldest_first_and_respects_limit() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let task = dal
            .tasks()
            .create(NewTask::new("ws-1", "send_broadcast"))
            .await
            .expect("Failed to create task");
        ids.push(task.id);
        // Keep creation timestamps strictly increasing
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let first_batch = dal
        .tasks()
        .get_next_batch(2)
        .await
        .expect("Failed to claim batch");
    assert_eq!(first_batch.len(), 2);
    assert_eq!(first_batch[0].id, ids[0], "Oldest task comes first");
    assert_eq!(first_batch[1].id, ids[1]);

    // Claimed tasks hold a live deadline, so only the third is left
    let second_batch = dal
        .tasks()
        .get_next_batch(2)
        .await
        .expect("Failed to claim batch");
    assert_eq!(second_batch.len(), 1);
    assert_eq!(second_batch[0].id, ids[2]);
}

#[tokio::test]
#[serial]
async fn test_concurrent_claims_are_disjoint() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;

    let dal_a = fixture.get_dal();
    let dal_b = fixture.get_dal();

    for _ in 0..10 {
        dal_a
            .tasks()
            .create(NewTask::new("ws-1", "send_broadcast"))
            .await
            .expect("Failed to create task");
    }

    // Release the fixture lock before spawning concurrent claimants
    drop(fixture);

    let barrier = Arc::new(Barrier::new(2));
    let barrier_a = barrier.clone();
    let barrier_b = barrier;

    let claim_a = tokio::spawn(async move {
        barrier_a.wait().await;
        dal_a
            .tasks()
            .get_next_batch(5)
            .await
            .expect("Failed to claim batch")
    });
    let claim_b = tokio::spawn(async move {
        barrier_b.wait().await;
        dal_b
            .tasks()
            .get_next_batch(5)
            .await
            .expect("Failed to claim batch")
    });

    let batch_a = claim_a.await.expect("Claim task panicked");
    let batch_b = claim_b.await.expect("Claim task panicked");

    let ids_a: HashSet<_> = batch_a.iter().map(|t| t.id).collect();
    let ids_b: HashSet<_> = batch_b.iter().map(|t| t.id).collect();

    assert!(
        ids_a.is_disjoint(&ids_b),
        "Concurrent claimants must never receive the same task"
    );
    assert_eq!(
        ids_a.len() + ids_b.len(),
        10,
        "Every eligible task should be claimed exactly once"
    );
}

#[tokio::test]
#[serial]
async fn test_expired_running_claim_is_reclaimed() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let created = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast"))
        .await
        .expect("Failed to create task");

    let batch = dal
        .tasks()
        .get_next_batch(10)
        .await
        .expect("Failed to claim batch");
    assert_eq!(batch.len(), 1);

    // A healthy claim blocks re-claiming
    let batch = dal
        .tasks()
        .get_next_batch(10)
        .await
        .expect("Failed to claim batch");
    assert!(batch.is_empty(), "Live claim must not be handed out again");

    // Simulate a crashed worker by expiring the claim deadline
    let mut crashed = dal
        .tasks()
        .get_by_id("ws-1", created.id)
        .await
        .expect("Failed to get task");
    crashed.timeout_after = Some(UniversalTimestamp(Utc::now() - Duration::seconds(60)));
    dal.tasks()
        .update("ws-1", crashed)
        .await
        .expect("Failed to update task");

    let batch = dal
        .tasks()
        .get_next_batch(10)
        .await
        .expect("Failed to claim batch");
    assert_eq!(batch.len(), 1, "Expired claim should be reclaimable");
    assert_eq!(batch[0].id, created.id);
    let renewed = batch[0].timeout_after.expect("Reclaim should set a deadline");
    assert!(renewed > UniversalTimestamp(Utc::now()));
}

#[tokio::test]
#[serial]
async fn test_claim_ignores_paused_and_terminal_tasks() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let deadline = UniversalTimestamp(Utc::now() + Duration::seconds(300));

    let paused = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast"))
        .await
        .expect("Failed to create task");
    dal.tasks()
        .mark_as_running("ws-1", paused.id, deadline)
        .await
        .expect("Failed to mark task running");
    // Paused tasks stay out of the claim set even past their resume time;
    // resuming is the caller's move
    dal.tasks()
        .mark_as_paused(
            "ws-1",
            paused.id,
            UniversalTimestamp(Utc::now() - Duration::seconds(30)),
            10.0,
            &columba::models::TaskState::Opaque(serde_json::json!({"cursor": 100})),
        )
        .await
        .expect("Failed to pause task");

    let completed = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast"))
        .await
        .expect("Failed to create task");
    dal.tasks()
        .mark_as_running("ws-1", completed.id, deadline)
        .await
        .expect("Failed to mark task running");
    dal.tasks()
        .mark_as_completed("ws-1", completed.id)
        .await
        .expect("Failed to mark task completed");

    let failed = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast").with_retry_policy(0, 60))
        .await
        .expect("Failed to create task");
    dal.tasks()
        .mark_as_running("ws-1", failed.id, deadline)
        .await
        .expect("Failed to mark task running");
    dal.tasks()
        .mark_as_failed("ws-1", failed.id, "smtp gateway unreachable")
        .await
        .expect("Failed to mark task failed");

    let batch = dal
        .tasks()
        .get_next_batch(10)
        .await
        .expect("Failed to claim batch");
    assert!(
        batch.is_empty(),
        "Only pending and expired-running tasks are claimable, got: {:?}",
        batch.iter().map(|t| t.status).collect::<Vec<_>>()
    );
}
