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

//! PostgreSQL-specific database models
//!
//! This module contains Diesel model definitions that use native PostgreSQL
//! types. These models are used internally by the PostgreSQL code paths of
//! the DAL and converted to/from domain types at the DAL boundary.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::postgres::*;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::models::segment_queue::SegmentQueueEntry;
use crate::models::task::{Task, TaskStatus};

// ============================================================================
// Task Models
// ============================================================================

// QueryableByName lets the claim query load rows from raw SQL by column name.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PgTask {
    pub id: Uuid,
    pub workspace_id: String,
    pub task_type: String,
    pub status: String,
    pub progress: f64,
    pub state: Option<String>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub last_run_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub next_run_after: Option<NaiveDateTime>,
    pub timeout_after: Option<NaiveDateTime>,
    pub max_runtime: i32,
    pub max_retries: i32,
    pub retry_count: i32,
    pub retry_interval: i32,
    pub broadcast_id: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewPgTask {
    pub id: Uuid,
    pub workspace_id: String,
    pub task_type: String,
    pub status: String,
    pub progress: f64,
    pub state: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub next_run_after: Option<NaiveDateTime>,
    pub max_runtime: i32,
    pub max_retries: i32,
    pub retry_count: i32,
    pub retry_interval: i32,
    pub broadcast_id: Option<String>,
}

/// Full-overwrite changeset for a task row.
///
/// `treat_none_as_null` makes `None` clear the column instead of skipping
/// it, which the overwrite contract requires (e.g. clearing `timeout_after`).
#[derive(Debug, AsChangeset)]
#[diesel(table_name = tasks)]
#[diesel(treat_none_as_null = true)]
pub struct PgTaskChangeset {
    pub task_type: String,
    pub status: String,
    pub progress: f64,
    pub state: Option<String>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub last_run_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub next_run_after: Option<NaiveDateTime>,
    pub timeout_after: Option<NaiveDateTime>,
    pub max_runtime: i32,
    pub max_retries: i32,
    pub retry_count: i32,
    pub retry_interval: i32,
    pub broadcast_id: Option<String>,
}

// ============================================================================
// Segment Queue Models
// ============================================================================

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = segment_queue)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PgSegmentQueueEntry {
    pub email: String,
    pub queued_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = segment_queue)]
pub struct NewPgSegmentQueueEntry {
    pub email: String,
    pub queued_at: NaiveDateTime,
}

// ============================================================================
// Conversion Implementations: PostgreSQL models <-> Domain models
// ============================================================================

impl From<PgTask> for Task {
    fn from(p: PgTask) -> Self {
        Task {
            id: UniversalUuid(p.id),
            workspace_id: p.workspace_id,
            task_type: p.task_type,
            status: p
                .status
                .parse::<TaskStatus>()
                .expect("Invalid status in database"),
            progress: p.progress,
            state: p
                .state
                .map(|json| serde_json::from_str(&json).expect("Invalid state JSON in database")),
            error_message: p.error_message,
            created_at: UniversalTimestamp::from_naive(p.created_at),
            updated_at: UniversalTimestamp::from_naive(p.updated_at),
            last_run_at: p.last_run_at.map(UniversalTimestamp::from_naive),
            completed_at: p.completed_at.map(UniversalTimestamp::from_naive),
            next_run_after: p.next_run_after.map(UniversalTimestamp::from_naive),
            timeout_after: p.timeout_after.map(UniversalTimestamp::from_naive),
            max_runtime: p.max_runtime,
            max_retries: p.max_retries,
            retry_count: p.retry_count,
            retry_interval: p.retry_interval,
            broadcast_id: p.broadcast_id,
        }
    }
}

impl From<PgSegmentQueueEntry> for SegmentQueueEntry {
    fn from(p: PgSegmentQueueEntry) -> Self {
        SegmentQueueEntry {
            email: p.email,
            queued_at: UniversalTimestamp::from_naive(p.queued_at),
        }
    }
}
