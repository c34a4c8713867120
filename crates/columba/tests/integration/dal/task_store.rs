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

//! Integration tests for task CRUD, listing and housekeeping.

use crate::fixtures::get_or_init_fixture;
use chrono::{Duration, Utc};
use columba::database::{UniversalTimestamp, UniversalUuid};
use columba::models::{NewTask, TaskFilter, TaskStatus};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_create_and_get_task() {
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

    assert_eq!(created.status, TaskStatus::Pending);
    assert_eq!(created.progress, 0.0);
    assert_eq!(created.retry_count, 0);
    assert!(created.state.is_none());
    assert!(created.next_run_after.is_none());
    assert!(created.timeout_after.is_none());

    let fetched = dal
        .tasks()
        .get_by_id("ws-1", created.id)
        .await
        .expect("Failed to get task");
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.workspace_id, "ws-1");
    assert_eq!(fetched.task_type, "send_broadcast");

    // The id alone is not enough; the workspace must match too
    let err = dal
        .tasks()
        .get_by_id("ws-2", created.id)
        .await
        .expect_err("Task should not be visible from another workspace");
    assert!(err.is_not_found(), "Expected not-found, got: {:?}", err);
}

#[tokio::test]
#[serial]
async fn test_get_task_not_found() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let err = dal
        .tasks()
        .get_by_id("ws-1", UniversalUuid::new_v4())
        .await
        .expect_err("Unknown id should not resolve");
    assert!(err.is_not_found(), "Expected not-found, got: {:?}", err);
}

#[tokio::test]
#[serial]
async fn test_update_overwrites_every_field() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let created = dal
        .tasks()
        .create(NewTask::new("ws-1", "export_contacts"))
        .await
        .expect("Failed to create task");

    let mut task = created.clone();
    task.progress = 55.5;
    task.error_message = Some("transient smtp error".to_string());
    task.next_run_after = Some(UniversalTimestamp(Utc::now() + Duration::seconds(120)));
    task.max_retries = 7;

    dal.tasks()
        .update("ws-1", task)
        .await
        .expect("Failed to update task");

    let fetched = dal
        .tasks()
        .get_by_id("ws-1", created.id)
        .await
        .expect("Failed to get task");
    assert_eq!(fetched.progress, 55.5);
    assert_eq!(fetched.error_message.as_deref(), Some("transient smtp error"));
    assert!(fetched.next_run_after.is_some());
    assert_eq!(fetched.max_retries, 7);
    assert!(
        fetched.updated_at > created.updated_at,
        "Update should advance updated_at"
    );

    // The write is a full overwrite, so None clears columns
    let mut cleared = fetched.clone();
    cleared.error_message = None;
    cleared.next_run_after = None;
    dal.tasks()
        .update("ws-1", cleared)
        .await
        .expect("Failed to update task");

    let fetched = dal
        .tasks()
        .get_by_id("ws-1", created.id)
        .await
        .expect("Failed to get task");
    assert!(fetched.error_message.is_none(), "None should clear the column");
    assert!(fetched.next_run_after.is_none(), "None should clear the column");
}

#[tokio::test]
#[serial]
async fn test_update_missing_task_is_not_found() {
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
    dal.tasks()
        .delete("ws-1", created.id)
        .await
        .expect("Failed to delete task");

    let err = dal
        .tasks()
        .update("ws-1", created)
        .await
        .expect_err("Updating a deleted task should fail");
    assert!(err.is_not_found(), "Expected not-found, got: {:?}", err);
}

#[tokio::test]
#[serial]
async fn test_delete_task() {
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

    dal.tasks()
        .delete("ws-1", created.id)
        .await
        .expect("Failed to delete task");

    let err = dal
        .tasks()
        .get_by_id("ws-1", created.id)
        .await
        .expect_err("Deleted task should be gone");
    assert!(err.is_not_found());

    let err = dal
        .tasks()
        .delete("ws-1", created.id)
        .await
        .expect_err("Second delete should report not-found");
    assert!(err.is_not_found());
}

#[tokio::test]
#[serial]
async fn test_get_by_broadcast_id() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let created = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast").with_broadcast_id("bcast-42"))
        .await
        .expect("Failed to create task");

    let fetched = dal
        .tasks()
        .get_by_broadcast_id("ws-1", "bcast-42")
        .await
        .expect("Failed to get task by broadcast id");
    assert_eq!(fetched.id, created.id);

    let err = dal
        .tasks()
        .get_by_broadcast_id("ws-1", "bcast-unknown")
        .await
        .expect_err("Unknown broadcast id should not resolve");
    assert!(err.is_not_found(), "Expected not-found, got: {:?}", err);
}

#[tokio::test]
#[serial]
async fn test_list_filters_by_status_and_type() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let broadcast = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast"))
        .await
        .expect("Failed to create task");
    dal.tasks()
        .create(NewTask::new("ws-1", "export_contacts"))
        .await
        .expect("Failed to create task");
    // A task in another workspace must never leak into the listing
    dal.tasks()
        .create(NewTask::new("ws-2", "send_broadcast"))
        .await
        .expect("Failed to create task");

    dal.tasks()
        .mark_as_running(
            "ws-1",
            broadcast.id,
            UniversalTimestamp(Utc::now() + Duration::seconds(300)),
        )
        .await
        .expect("Failed to mark task running");

    let page = dal
        .tasks()
        .list("ws-1", &TaskFilter::default())
        .await
        .expect("Failed to list tasks");
    assert_eq!(page.total_count, 2);
    assert_eq!(page.tasks.len(), 2);

    let running_only = dal
        .tasks()
        .list(
            "ws-1",
            &TaskFilter::default().with_statuses(vec![TaskStatus::Running]),
        )
        .await
        .expect("Failed to list tasks");
    assert_eq!(running_only.total_count, 1);
    assert_eq!(running_only.tasks[0].id, broadcast.id);

    let exports_only = dal
        .tasks()
        .list(
            "ws-1",
            &TaskFilter::default().with_task_types(vec!["export_contacts".to_string()]),
        )
        .await
        .expect("Failed to list tasks");
    assert_eq!(exports_only.total_count, 1);
    assert_eq!(exports_only.tasks[0].task_type, "export_contacts");
}

#[tokio::test]
#[serial]
async fn test_list_pagination_reports_full_total() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    for _ in 0..5 {
        dal.tasks()
            .create(NewTask::new("ws-1", "send_broadcast"))
            .await
            .expect("Failed to create task");
    }

    let page = dal
        .tasks()
        .list("ws-1", &TaskFilter::default().with_page(2, 0))
        .await
        .expect("Failed to list tasks");
    assert_eq!(page.tasks.len(), 2);
    assert_eq!(page.total_count, 5, "Total must ignore the page window");

    let last_page = dal
        .tasks()
        .list("ws-1", &TaskFilter::default().with_page(2, 4))
        .await
        .expect("Failed to list tasks");
    assert_eq!(last_page.tasks.len(), 1);
    assert_eq!(last_page.total_count, 5);
}

#[tokio::test]
#[serial]
async fn test_list_filters_by_creation_date_range() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let old = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast"))
        .await
        .expect("Failed to create task");
    let recent = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast"))
        .await
        .expect("Failed to create task");

    // Push one creation date two days back through the overwrite path
    let mut backdated = old.clone();
    backdated.created_at = UniversalTimestamp(Utc::now() - Duration::days(2));
    dal.tasks()
        .update("ws-1", backdated)
        .await
        .expect("Failed to update task");

    let yesterday = UniversalTimestamp(Utc::now() - Duration::days(1));
    let tomorrow = UniversalTimestamp(Utc::now() + Duration::days(1));

    let recent_page = dal
        .tasks()
        .list(
            "ws-1",
            &TaskFilter::default().with_created_between(yesterday, tomorrow),
        )
        .await
        .expect("Failed to list tasks");
    assert_eq!(recent_page.total_count, 1);
    assert_eq!(recent_page.tasks[0].id, recent.id);

    let mut old_filter = TaskFilter::default();
    old_filter.created_before = Some(yesterday);
    let old_page = dal
        .tasks()
        .list("ws-1", &old_filter)
        .await
        .expect("Failed to list tasks");
    assert_eq!(old_page.total_count, 1);
    assert_eq!(old_page.tasks[0].id, old.id);
}

#[tokio::test]
#[serial]
async fn test_status_counts() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let deadline = UniversalTimestamp(Utc::now() + Duration::seconds(300));
    for _ in 0..3 {
        dal.tasks()
            .create(NewTask::new("ws-1", "send_broadcast"))
            .await
            .expect("Failed to create task");
    }
    let running = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast"))
        .await
        .expect("Failed to create task");
    dal.tasks()
        .mark_as_running("ws-1", running.id, deadline)
        .await
        .expect("Failed to mark task running");

    let done = dal
        .tasks()
        .create(NewTask::new("ws-1", "send_broadcast"))
        .await
        .expect("Failed to create task");
    dal.tasks()
        .mark_as_running("ws-1", done.id, deadline)
        .await
        .expect("Failed to mark task running");
    dal.tasks()
        .mark_as_completed("ws-1", done.id)
        .await
        .expect("Failed to mark task completed");

    let counts = dal
        .tasks()
        .get_status_counts("ws-1")
        .await
        .expect("Failed to get status counts");
    assert_eq!(counts.pending, 3);
    assert_eq!(counts.running, 1);
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.paused, 0);
    assert_eq!(counts.total(), 5);
}

#[tokio::test]
#[serial]
async fn test_delete_completed_older_than() {
    let fixture = get_or_init_fixture().await;
    let mut fixture = fixture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    fixture.reset_database().await;
    fixture.initialize().await;
    let dal = fixture.get_dal();

    let deadline = UniversalTimestamp(Utc::now() + Duration::seconds(300));
    let mut completed_ids = Vec::new();
    for _ in 0..2 {
        let task = dal
            .tasks()
            .create(NewTask::new("ws-1", "send_broadcast"))
            .await
            .expect("Failed to create task");
        dal.tasks()
            .mark_as_running("ws-1", task.id, deadline)
            .await
            .expect("Failed to mark task running");
        dal.tasks()
            .mark_as_completed("ws-1", task.id)
            .await
            .expect("Failed to mark task completed");
        completed_ids.push(task.id);
    }

    // Age one completion a week into the past
    let mut aged = dal
        .tasks()
        .get_by_id("ws-1", completed_ids[0])
        .await
        .expect("Failed to get task");
    aged.completed_at = Some(UniversalTimestamp(Utc::now() - Duration::days(7)));
    dal.tasks()
        .update("ws-1", aged)
        .await
        .expect("Failed to update task");

    let cutoff = UniversalTimestamp(Utc::now() - Duration::days(1));
    let removed = dal
        .tasks()
        .delete_completed_older_than("ws-1", cutoff)
        .await
        .expect("Failed to prune completed tasks");
    assert_eq!(removed, 1);

    assert!(dal
        .tasks()
        .get_by_id("ws-1", completed_ids[0])
        .await
        .expect_err("Aged task should be pruned")
        .is_not_found());
    assert!(dal
        .tasks()
        .get_by_id("ws-1", completed_ids[1])
        .await
        .is_ok());
}
