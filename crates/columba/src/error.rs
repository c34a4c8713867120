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

//! Error types for the task store and segment queue.
//!
//! All DAL operations return [`StoreError`]. The variants separate three
//! concerns a caller handles differently:
//!
//! - Not-found conditions ([`StoreError::TaskNotFound`],
//!   [`StoreError::BroadcastTaskNotFound`]) where the caller named a row
//!   that does not exist.
//! - Validation failures ([`StoreError::InvalidStatus`]) that are rejected
//!   before any query is issued.
//! - Infrastructure failures ([`StoreError::ConnectionPool`],
//!   [`StoreError::Database`]) where the operation itself could not run.

use thiserror::Error;

use crate::database::universal_types::UniversalUuid;

/// Errors returned by task store and segment queue operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No task with the given id exists in the given workspace.
    #[error("Task {task_id} not found in workspace {workspace_id}")]
    TaskNotFound {
        /// Workspace the lookup was scoped to
        workspace_id: String,
        /// Task identifier that did not match any row
        task_id: UniversalUuid,
    },

    /// No task carries the given broadcast id in the given workspace.
    #[error("No task for broadcast {broadcast_id} in workspace {workspace_id}")]
    BroadcastTaskNotFound {
        /// Workspace the lookup was scoped to
        workspace_id: String,
        /// Broadcast identifier that did not match any row
        broadcast_id: String,
    },

    /// A status string from outside the store did not name a known status.
    ///
    /// Raised before any query is issued, so the store is never touched
    /// with an invalid filter.
    #[error("Invalid task status: {0}")]
    InvalidStatus(String),

    /// The connection pool could not provide a connection, or the blocking
    /// interact closure panicked or was aborted.
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    /// A query failed inside the database.
    #[error("Database error during {operation}: {source}")]
    Database {
        /// Name of the DAL operation that issued the query
        operation: &'static str,
        /// Underlying diesel error
        #[source]
        source: diesel::result::Error,
    },

    /// A task state payload could not be serialized or deserialized.
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Wraps a diesel error with the name of the operation that ran it.
    pub fn database(operation: &'static str, source: diesel::result::Error) -> Self {
        StoreError::Database { operation, source }
    }

    /// Returns true if this error is one of the not-found conditions.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::TaskNotFound { .. } | StoreError::BroadcastTaskNotFound { .. }
        )
    }
}
