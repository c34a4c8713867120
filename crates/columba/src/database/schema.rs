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

//! Diesel schema definitions for both database backends.
//!
//! The two backends store the same logical tables with different column
//! representations:
//!
//! - PostgreSQL uses native `UUID` and `TIMESTAMP` columns.
//! - SQLite stores UUIDs as 16-byte BLOBs and timestamps as RFC3339 TEXT.
//!
//! Conversions between these representations and the domain types happen at
//! the DAL boundary, see the backend model modules under `crate::dal`.

/// PostgreSQL schema definitions using native PostgreSQL types.
pub mod postgres {
    diesel::table! {
        tasks (id) {
            id -> Uuid,
            #[max_length = 32]
            workspace_id -> Varchar,
            #[max_length = 255]
            task_type -> Varchar,
            #[max_length = 32]
            status -> Varchar,
            progress -> Float8,
            state -> Nullable<Text>,
            error_message -> Nullable<Text>,
            created_at -> Timestamp,
            updated_at -> Timestamp,
            last_run_at -> Nullable<Timestamp>,
            completed_at -> Nullable<Timestamp>,
            next_run_after -> Nullable<Timestamp>,
            timeout_after -> Nullable<Timestamp>,
            max_runtime -> Int4,
            max_retries -> Int4,
            retry_count -> Int4,
            retry_interval -> Int4,
            #[max_length = 255]
            broadcast_id -> Nullable<Varchar>,
        }
    }

    diesel::table! {
        segment_queue (email) {
            #[max_length = 255]
            email -> Varchar,
            queued_at -> Timestamp,
        }
    }

    diesel::allow_tables_to_appear_in_same_query!(tasks, segment_queue,);
}

/// SQLite schema definitions using SQLite-compatible types.
pub mod sqlite {
    diesel::table! {
        tasks (id) {
            id -> Binary,
            workspace_id -> Text,
            task_type -> Text,
            status -> Text,
            progress -> Double,
            state -> Nullable<Text>,
            error_message -> Nullable<Text>,
            created_at -> Text,
            updated_at -> Text,
            last_run_at -> Nullable<Text>,
            completed_at -> Nullable<Text>,
            next_run_after -> Nullable<Text>,
            timeout_after -> Nullable<Text>,
            max_runtime -> Integer,
            max_retries -> Integer,
            retry_count -> Integer,
            retry_interval -> Integer,
            broadcast_id -> Nullable<Text>,
        }
    }

    diesel::table! {
        segment_queue (email) {
            email -> Text,
            queued_at -> Text,
        }
    }

    diesel::allow_tables_to_appear_in_same_query!(tasks, segment_queue,);
}
