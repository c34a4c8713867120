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

//! SQLite-specific database models
//!
//! This module contains Diesel model definitions that use SQLite-compatible
//! types. UUIDs are stored as 16-byte BLOBs and timestamps as RFC3339 TEXT.
//!
//! RFC3339 strings produced by the helpers below compare lexicographically
//! in chronological order, so SQL comparisons and ORDER BY on timestamp
//! columns behave the same as on native timestamp types.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::sqlite::*;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::models::segment_queue::SegmentQueueEntry;
use crate::models::task::{Task, TaskStatus};

// ============================================================================
// Task Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteTask {
    pub id: Vec<u8>,
    pub workspace_id: String,
    pub task_type: String,
    pub status: String,
    pub progress: f64,
    pub state: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_run_at: Option<String>,
    pub completed_at: Option<String>,
    pub next_run_after: Option<String>,
    pub timeout_after: Option<String>,
    pub max_runtime: i32,
    pub max_retries: i32,
    pub retry_count: i32,
    pub retry_interval: i32,
    pub broadcast_id: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewSqliteTask {
    pub id: Vec<u8>,
    pub workspace_id: String,
    pub task_type: String,
    pub status: String,
    pub progress: f64,
    pub state: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub next_run_after: Option<String>,
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
pub struct SqliteTaskChangeset {
    pub task_type: String,
    pub status: String,
    pub progress: f64,
    pub state: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_run_at: Option<String>,
    pub completed_at: Option<String>,
    pub next_run_after: Option<String>,
    pub timeout_after: Option<String>,
    pub max_runtime: i32,
    pub max_retries: i32,
    pub retry_count: i32,
    pub retry_interval: i32,
    pub broadcast_id: Option<String>,
}

// ============================================================================
// Segment Queue Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = segment_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteSegmentQueueEntry {
    pub email: String,
    pub queued_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = segment_queue)]
pub struct NewSqliteSegmentQueueEntry {
    pub email: String,
    pub queued_at: String,
}

// ============================================================================
// Type Conversion Helpers
// ============================================================================

/// Convert UUID to SQLite BLOB format
pub fn uuid_to_blob(uuid: &Uuid) -> Vec<u8> {
    uuid.as_bytes().to_vec()
}

/// Convert SQLite BLOB to UUID
pub fn blob_to_uuid(blob: &[u8]) -> Result<Uuid, uuid::Error> {
    Uuid::from_slice(blob)
}

/// Convert DateTime<Utc> to RFC3339 string for SQLite storage
pub fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse RFC3339 string from SQLite to DateTime<Utc>
pub fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Current timestamp as RFC3339 string
pub fn current_timestamp_string() -> String {
    Utc::now().to_rfc3339()
}

// ============================================================================
// Conversion Implementations: SQLite models <-> Domain models
// ============================================================================

impl From<SqliteTask> for Task {
    fn from(s: SqliteTask) -> Self {
        Task {
            id: UniversalUuid(blob_to_uuid(&s.id).expect("Invalid UUID in database")),
            workspace_id: s.workspace_id,
            task_type: s.task_type,
            status: s
                .status
                .parse::<TaskStatus>()
                .expect("Invalid status in database"),
            progress: s.progress,
            state: s
                .state
                .map(|json| serde_json::from_str(&json).expect("Invalid state JSON in database")),
            error_message: s.error_message,
            created_at: UniversalTimestamp(
                string_to_datetime(&s.created_at).expect("Invalid timestamp in database"),
            ),
            updated_at: UniversalTimestamp(
                string_to_datetime(&s.updated_at).expect("Invalid timestamp in database"),
            ),
            last_run_at: s
                .last_run_at
                .map(|ts| UniversalTimestamp(string_to_datetime(&ts).expect("Invalid timestamp"))),
            completed_at: s
                .completed_at
                .map(|ts| UniversalTimestamp(string_to_datetime(&ts).expect("Invalid timestamp"))),
            next_run_after: s
                .next_run_after
                .map(|ts| UniversalTimestamp(string_to_datetime(&ts).expect("Invalid timestamp"))),
            timeout_after: s
                .timeout_after
                .map(|ts| UniversalTimestamp(string_to_datetime(&ts).expect("Invalid timestamp"))),
            max_runtime: s.max_runtime,
            max_retries: s.max_retries,
            retry_count: s.retry_count,
            retry_interval: s.retry_interval,
            broadcast_id: s.broadcast_id,
        }
    }
}

impl From<SqliteSegmentQueueEntry> for SegmentQueueEntry {
    fn from(s: SqliteSegmentQueueEntry) -> Self {
        SegmentQueueEntry {
            email: s.email,
            queued_at: UniversalTimestamp(
                string_to_datetime(&s.queued_at).expect("Invalid timestamp in database"),
            ),
        }
    }
}
