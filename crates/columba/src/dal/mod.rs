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

//! Data Access Layer with runtime backend selection
//!
//! This module provides a DAL implementation that works with both
//! PostgreSQL and SQLite backends, selecting the appropriate implementation
//! at runtime based on the database connection type.
//!
//! # Architecture
//!
//! Each DAL operation dispatches to a backend-specific implementation based
//! on the backend detected from the connection string. Backend row models
//! with native column types live in `postgres_models` / `sqlite_models` and
//! convert to the domain types at this boundary.
//!
//! # Example
//!
//! ```rust,ignore
//! use columba::dal::DAL;
//! use columba::database::Database;
//!
//! // Create database with runtime backend detection
//! let db = Database::new("postgres://localhost/notifications", "notifications", 10);
//! let dal = DAL::new(db);
//!
//! // Operations automatically use the correct backend
//! let page = dal.tasks().list("ws_1", &Default::default()).await?;
//! ```

use crate::database::{AnyPool, BackendType, Database};

// Backend row models with native column types
#[cfg(feature = "postgres")]
mod postgres_models;
#[cfg(feature = "sqlite")]
mod sqlite_models;

// Sub-modules for each entity type
pub mod segment_queue;
pub mod task;

// Re-export DAL components
pub use segment_queue::SegmentQueueDAL;
pub use task::{CheckpointOutcome, TaskDAL};

/// Helper macro for dispatching operations based on backend type.
///
/// This macro simplifies writing code that needs to execute different
/// implementations based on the database backend.
///
/// # Example
///
/// ```rust,ignore
/// dispatch_backend!(
///     self.dal.backend(),
///     self.get_by_id_postgres(workspace_id, id).await,
///     self.get_by_id_sqlite(workspace_id, id).await
/// )
/// ```
#[macro_export]
macro_rules! dispatch_backend {
    ($backend:expr, $pg:expr, $sqlite:expr) => {
        match $backend {
            #[cfg(feature = "postgres")]
            $crate::database::BackendType::Postgres => $pg,
            #[cfg(feature = "sqlite")]
            $crate::database::BackendType::Sqlite => $sqlite,
        }
    };
}

/// The Data Access Layer struct.
///
/// This struct provides access to all database operations through a single
/// interface that works with both PostgreSQL and SQLite backends.
///
/// # Thread Safety
///
/// The `DAL` struct is `Clone` and can be safely shared between threads.
/// Each clone references the same underlying database connection pool.
#[derive(Clone, Debug)]
pub struct DAL {
    /// The database instance with connection pool
    pub database: Database,
}

impl DAL {
    /// Creates a new DAL instance.
    ///
    /// # Arguments
    ///
    /// * `database` - A Database instance configured for either PostgreSQL or SQLite
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Returns the backend type for this DAL instance.
    pub fn backend(&self) -> BackendType {
        self.database.backend()
    }

    /// Returns a reference to the underlying database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Returns the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.database.pool()
    }

    /// Returns a task DAL for task store and lifecycle operations.
    pub fn tasks(&self) -> TaskDAL {
        TaskDAL::new(self)
    }

    /// Returns a segment queue DAL for debounced queue operations.
    pub fn segment_queue(&self) -> SegmentQueueDAL {
        SegmentQueueDAL::new(self)
    }
}
