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

//! Task Model
//!
//! This module defines the domain structures for asynchronous tasks: the
//! status state machine, the opaque per-task state payload, and the full
//! task row as seen by callers of the DAL.
//!
//! A task moves through its lifecycle as follows:
//! - Created `Pending` by a producer (for example, broadcast creation)
//! - Claimed into `Running` by a worker via the claim protocol
//! - Ends `Completed`, or cycles Pending/Running/Paused through retries
//!   and pauses, or ends `Failed` once retries are exhausted
//!
//! Rows are never deleted automatically; deletion is an explicit
//! administrative operation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::StoreError;

/// Execution status of a task.
///
/// `Failed` is terminal: a task only reaches it when its retries are
/// exhausted, and nothing in the store moves it out again. `Completed` is
/// terminal for the scheduler but rows remain queryable and deletable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed (possibly not before `next_run_after`)
    Pending,
    /// Claimed by a worker; `timeout_after` bounds how long the claim holds
    Running,
    /// Parked by its handler until `next_run_after`
    Paused,
    /// Finished successfully
    Completed,
    /// Retries exhausted, will never run again
    Failed,
}

impl TaskStatus {
    /// The canonical string stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Returns true for statuses the scheduler never picks up again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// All statuses, in lifecycle order.
    pub fn all() -> [TaskStatus; 5] {
        [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    /// Parses the canonical column representation.
    ///
    /// Unknown strings are rejected with [`StoreError::InvalidStatus`], so a
    /// caller-supplied status never reaches a query as a raw string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// Checkpoint state for a broadcast send in progress.
///
/// Lets a resumed or retried task skip recipients it already handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBroadcastState {
    /// The broadcast being delivered
    pub broadcast_id: String,
    /// Offset of the next recipient to send to
    pub recipient_offset: i64,
    /// Messages delivered so far in this run
    #[serde(default)]
    pub sent_count: i64,
    /// Deliveries that bounced or errored so far in this run
    #[serde(default)]
    pub failed_count: i64,
}

/// Opaque per-task state payload, keyed by task type.
///
/// The store persists and returns this without inspecting it; only the
/// business handler for the task type knows its meaning. Known payloads get
/// a typed variant; anything else round-trips through [`TaskState::Opaque`]
/// unmodified, so handlers can evolve their payloads without a store change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskState {
    /// Broadcast delivery checkpoint
    SendBroadcast(SendBroadcastState),
    /// Any payload without a typed variant
    #[serde(untagged)]
    Opaque(serde_json::Value),
}

/// Represents a task row (domain type).
///
/// One row per asynchronous unit of work, scoped to a workspace. Timing
/// fields drive the claim protocol: a task is eligible when it is `Pending`
/// with `next_run_after` unset or in the past, or when it is `Running` with
/// `timeout_after` in the past (a worker died holding the claim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for the task
    pub id: UniversalUuid,
    /// Workspace (tenant) this task belongs to
    pub workspace_id: String,
    /// Handler-routing key (e.g. "send_broadcast")
    pub task_type: String,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// Completion percentage, 0 to 100
    pub progress: f64,
    /// Opaque handler-owned checkpoint payload
    pub state: Option<TaskState>,
    /// Message from the most recent failure
    pub error_message: Option<String>,
    /// When the row was created
    pub created_at: UniversalTimestamp,
    /// When the row was last written
    pub updated_at: UniversalTimestamp,
    /// When a worker last started executing this task
    pub last_run_at: Option<UniversalTimestamp>,
    /// When the task completed successfully
    pub completed_at: Option<UniversalTimestamp>,
    /// Earliest time the task may next be claimed
    pub next_run_after: Option<UniversalTimestamp>,
    /// Deadline after which a `Running` claim is considered abandoned
    pub timeout_after: Option<UniversalTimestamp>,
    /// Maximum seconds a single run may take before its claim expires
    pub max_runtime: i32,
    /// Number of retries allowed after failures
    pub max_retries: i32,
    /// Failures recorded so far
    pub retry_count: i32,
    /// Seconds to wait before a retry becomes claimable
    pub retry_interval: i32,
    /// Optional correlation key to the broadcast this task serves
    pub broadcast_id: Option<String>,
}

impl Task {
    /// Returns the state payload parsed from its serialized form.
    pub fn parsed_state(&self) -> Option<&TaskState> {
        self.state.as_ref()
    }

    /// Returns true once no further runs will be scheduled.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Structure for creating new tasks (domain type).
///
/// Only workspace and type are required; everything else has platform
/// defaults. The store assigns the id and timestamps, and new tasks always
/// start `Pending` with zero progress and zero recorded retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    /// Workspace (tenant) the task belongs to
    pub workspace_id: String,
    /// Handler-routing key
    pub task_type: String,
    /// Initial checkpoint payload, if the producer has one
    pub state: Option<TaskState>,
    /// Earliest time the first run may start; `None` means immediately
    pub next_run_after: Option<UniversalTimestamp>,
    /// Maximum seconds a single run may take
    pub max_runtime: i32,
    /// Number of retries allowed after failures
    pub max_retries: i32,
    /// Seconds to wait before a retry becomes claimable
    pub retry_interval: i32,
    /// Optional correlation key to a broadcast
    pub broadcast_id: Option<String>,
}

/// Platform default for `max_runtime`, in seconds.
pub const DEFAULT_MAX_RUNTIME_SECONDS: i32 = 300;
/// Platform default for `max_retries`.
pub const DEFAULT_MAX_RETRIES: i32 = 3;
/// Platform default for `retry_interval`, in seconds.
pub const DEFAULT_RETRY_INTERVAL_SECONDS: i32 = 300;

impl NewTask {
    /// Creates a task description with platform defaults.
    pub fn new(workspace_id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            task_type: task_type.into(),
            state: None,
            next_run_after: None,
            max_runtime: DEFAULT_MAX_RUNTIME_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL_SECONDS,
            broadcast_id: None,
        }
    }

    /// Sets the initial state payload.
    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = Some(state);
        self
    }

    /// Schedules the first run no earlier than the given time.
    pub fn with_next_run_after(mut self, next_run_after: UniversalTimestamp) -> Self {
        self.next_run_after = Some(next_run_after);
        self
    }

    /// Sets the retry policy in one call.
    pub fn with_retry_policy(mut self, max_retries: i32, retry_interval: i32) -> Self {
        self.max_retries = max_retries;
        self.retry_interval = retry_interval;
        self
    }

    /// Sets the per-run time budget in seconds.
    pub fn with_max_runtime(mut self, max_runtime: i32) -> Self {
        self.max_runtime = max_runtime;
        self
    }

    /// Correlates the task with a broadcast.
    pub fn with_broadcast_id(mut self, broadcast_id: impl Into<String>) -> Self {
        self.broadcast_id = Some(broadcast_id.into());
        self
    }
}

/// Filter for listing tasks within a workspace.
///
/// All criteria are optional and combine with AND. Empty sets mean "no
/// restriction", mirroring an absent criterion.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only tasks whose status is in this set
    pub statuses: Vec<TaskStatus>,
    /// Only tasks whose type is in this set
    pub task_types: Vec<String>,
    /// Only tasks created at or after this time
    pub created_after: Option<UniversalTimestamp>,
    /// Only tasks created at or before this time
    pub created_before: Option<UniversalTimestamp>,
    /// Page size; `None` returns every match
    pub limit: Option<i64>,
    /// Rows to skip before the page starts
    pub offset: Option<i64>,
}

impl TaskFilter {
    /// Restricts results to the given statuses.
    pub fn with_statuses(mut self, statuses: Vec<TaskStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    /// Restricts results to the given task types.
    pub fn with_task_types(mut self, task_types: Vec<String>) -> Self {
        self.task_types = task_types;
        self
    }

    /// Restricts results to tasks created in the given closed range.
    pub fn with_created_between(
        mut self,
        after: UniversalTimestamp,
        before: UniversalTimestamp,
    ) -> Self {
        self.created_after = Some(after);
        self.created_before = Some(before);
        self
    }

    /// Sets the page window.
    pub fn with_page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

/// One page of a task listing.
#[derive(Debug, Clone)]
pub struct TaskListPage {
    /// Tasks on this page, newest first
    pub tasks: Vec<Task>,
    /// Total number of tasks matching the filter, ignoring the page window
    pub total_count: i64,
}

/// Per-status task totals for one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStatusCounts {
    /// Tasks waiting to run
    pub pending: i64,
    /// Tasks currently claimed
    pub running: i64,
    /// Tasks parked by their handler
    pub paused: i64,
    /// Tasks finished successfully
    pub completed: i64,
    /// Tasks that exhausted their retries
    pub failed: i64,
}

impl TaskStatusCounts {
    /// Total tasks across all statuses.
    pub fn total(&self) -> i64 {
        self.pending + self.running + self.paused + self.completed + self.failed
    }
}
