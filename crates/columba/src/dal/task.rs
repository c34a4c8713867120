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

//! Task Data Access Layer
//!
//! This module provides the data access layer for the task store with
//! runtime backend selection between PostgreSQL and SQLite.
//!
//! Key features:
//! - Workspace-scoped CRUD with filtered, counted listing
//! - Atomic task claiming for distributed workers (`get_next_batch`)
//! - Lifecycle transitions with retry accounting (`mark_as_failed` and
//!   friends, see the `state` submodule)
//!
//! Rows are written with client-generated ids and timestamps so both
//! backends behave identically.

use diesel::prelude::*;

use super::DAL;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::StoreError;
use crate::models::task::{NewTask, Task, TaskFilter, TaskListPage, TaskStatus, TaskStatusCounts};

mod claiming;
mod state;

pub use state::CheckpointOutcome;

/// Data access layer for task operations with runtime backend selection.
#[derive(Clone)]
pub struct TaskDAL<'a> {
    dal: &'a DAL,
}

impl<'a> TaskDAL<'a> {
    /// Creates a new TaskDAL instance.
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Creates a new task record.
    ///
    /// The store assigns the id and timestamps; the task starts `Pending`
    /// with zero progress and zero recorded retries.
    pub async fn create(&self, new_task: NewTask) -> Result<Task, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.create_postgres(new_task).await,
            self.create_sqlite(new_task).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn create_postgres(&self, new_task: NewTask) -> Result<Task, StoreError> {
        use super::postgres_models::NewPgTask;
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let state_json = new_task
            .state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let id = UniversalUuid::new_v4();
        let now = UniversalTimestamp::now();

        let row = NewPgTask {
            id: id.into(),
            workspace_id: new_task.workspace_id,
            task_type: new_task.task_type,
            status: TaskStatus::Pending.as_str().to_string(),
            progress: 0.0,
            state: state_json,
            created_at: now.to_naive(),
            updated_at: now.to_naive(),
            next_run_after: new_task.next_run_after.map(|t| t.to_naive()),
            max_runtime: new_task.max_runtime,
            max_retries: new_task.max_retries,
            retry_count: 0,
            retry_interval: new_task.retry_interval,
            broadcast_id: new_task.broadcast_id,
        };

        let task = conn
            .interact(move |conn| {
                diesel::insert_into(tasks::table)
                    .values(&row)
                    .get_result::<super::postgres_models::PgTask>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("create_task", e))?;

        Ok(task.into())
    }

    #[cfg(feature = "sqlite")]
    async fn create_sqlite(&self, new_task: NewTask) -> Result<Task, StoreError> {
        use super::sqlite_models::{datetime_to_string, uuid_to_blob, NewSqliteTask, SqliteTask};
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let state_json = new_task
            .state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let id = UniversalUuid::new_v4();
        let now = UniversalTimestamp::now();

        let row = NewSqliteTask {
            id: uuid_to_blob(&id.as_uuid()),
            workspace_id: new_task.workspace_id,
            task_type: new_task.task_type,
            status: TaskStatus::Pending.as_str().to_string(),
            progress: 0.0,
            state: state_json,
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
            next_run_after: new_task
                .next_run_after
                .map(|t| datetime_to_string(t.as_datetime())),
            max_runtime: new_task.max_runtime,
            max_retries: new_task.max_retries,
            retry_count: 0,
            retry_interval: new_task.retry_interval,
            broadcast_id: new_task.broadcast_id,
        };

        let task = conn
            .interact(move |conn| {
                diesel::insert_into(tasks::table)
                    .values(&row)
                    .get_result::<SqliteTask>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("create_task", e))?;

        Ok(task.into())
    }

    /// Retrieves a task by workspace and id.
    ///
    /// Fails with [`StoreError::TaskNotFound`] when no row matches the pair.
    pub async fn get_by_id(
        &self,
        workspace_id: &str,
        task_id: UniversalUuid,
    ) -> Result<Task, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.get_by_id_postgres(workspace_id.to_string(), task_id)
                .await,
            self.get_by_id_sqlite(workspace_id.to_string(), task_id)
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn get_by_id_postgres(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
    ) -> Result<Task, StoreError> {
        use super::postgres_models::PgTask;
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let task = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::id.eq(task_id.as_uuid()))
                    .filter(tasks::workspace_id.eq(ws))
                    .first::<PgTask>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| match e {
                diesel::result::Error::NotFound => StoreError::TaskNotFound {
                    workspace_id,
                    task_id,
                },
                other => StoreError::database("get_task", other),
            })?;

        Ok(task.into())
    }

    #[cfg(feature = "sqlite")]
    async fn get_by_id_sqlite(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
    ) -> Result<Task, StoreError> {
        use super::sqlite_models::{uuid_to_blob, SqliteTask};
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let id_blob = uuid_to_blob(&task_id.as_uuid());
        let task = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::id.eq(id_blob))
                    .filter(tasks::workspace_id.eq(ws))
                    .first::<SqliteTask>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| match e {
                diesel::result::Error::NotFound => StoreError::TaskNotFound {
                    workspace_id,
                    task_id,
                },
                other => StoreError::database("get_task", other),
            })?;

        Ok(task.into())
    }

    /// Finds the task that represents a given broadcast send.
    ///
    /// When several tasks carry the same `broadcast_id` the newest one wins.
    /// Fails with [`StoreError::BroadcastTaskNotFound`] when none match.
    pub async fn get_by_broadcast_id(
        &self,
        workspace_id: &str,
        broadcast_id: &str,
    ) -> Result<Task, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.get_by_broadcast_id_postgres(workspace_id.to_string(), broadcast_id.to_string())
                .await,
            self.get_by_broadcast_id_sqlite(workspace_id.to_string(), broadcast_id.to_string())
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn get_by_broadcast_id_postgres(
        &self,
        workspace_id: String,
        broadcast_id: String,
    ) -> Result<Task, StoreError> {
        use super::postgres_models::PgTask;
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let bc = broadcast_id.clone();
        let task = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::workspace_id.eq(ws))
                    .filter(tasks::broadcast_id.eq(bc))
                    .order(tasks::created_at.desc())
                    .first::<PgTask>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| match e {
                diesel::result::Error::NotFound => StoreError::BroadcastTaskNotFound {
                    workspace_id,
                    broadcast_id,
                },
                other => StoreError::database("get_task_by_broadcast", other),
            })?;

        Ok(task.into())
    }

    #[cfg(feature = "sqlite")]
    async fn get_by_broadcast_id_sqlite(
        &self,
        workspace_id: String,
        broadcast_id: String,
    ) -> Result<Task, StoreError> {
        use super::sqlite_models::SqliteTask;
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let bc = broadcast_id.clone();
        let task = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::workspace_id.eq(ws))
                    .filter(tasks::broadcast_id.eq(bc))
                    .order(tasks::created_at.desc())
                    .first::<SqliteTask>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| match e {
                diesel::result::Error::NotFound => StoreError::BroadcastTaskNotFound {
                    workspace_id,
                    broadcast_id,
                },
                other => StoreError::database("get_task_by_broadcast", other),
            })?;

        Ok(task.into())
    }

    /// Overwrites a task row with the caller's copy.
    ///
    /// Every data column is written, including columns the caller set to
    /// `None`; `updated_at` is stamped by the store. Fails with
    /// [`StoreError::TaskNotFound`] when zero rows are affected.
    pub async fn update(&self, workspace_id: &str, task: Task) -> Result<(), StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.update_postgres(workspace_id.to_string(), task).await,
            self.update_sqlite(workspace_id.to_string(), task).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn update_postgres(&self, workspace_id: String, task: Task) -> Result<(), StoreError> {
        use super::postgres_models::PgTaskChangeset;
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let state_json = task.state.as_ref().map(serde_json::to_string).transpose()?;
        let now = UniversalTimestamp::now();
        let task_id = task.id;

        let changeset = PgTaskChangeset {
            task_type: task.task_type,
            status: task.status.as_str().to_string(),
            progress: task.progress,
            state: state_json,
            error_message: task.error_message,
            created_at: task.created_at.to_naive(),
            updated_at: now.to_naive(),
            last_run_at: task.last_run_at.map(|t| t.to_naive()),
            completed_at: task.completed_at.map(|t| t.to_naive()),
            next_run_after: task.next_run_after.map(|t| t.to_naive()),
            timeout_after: task.timeout_after.map(|t| t.to_naive()),
            max_runtime: task.max_runtime,
            max_retries: task.max_retries,
            retry_count: task.retry_count,
            retry_interval: task.retry_interval,
            broadcast_id: task.broadcast_id,
        };

        let ws = workspace_id.clone();
        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(task_id.as_uuid()))
                        .filter(tasks::workspace_id.eq(ws)),
                )
                .set(&changeset)
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("update_task", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }
        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn update_sqlite(&self, workspace_id: String, task: Task) -> Result<(), StoreError> {
        use super::sqlite_models::{datetime_to_string, uuid_to_blob, SqliteTaskChangeset};
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let state_json = task.state.as_ref().map(serde_json::to_string).transpose()?;
        let now = UniversalTimestamp::now();
        let task_id = task.id;

        let changeset = SqliteTaskChangeset {
            task_type: task.task_type,
            status: task.status.as_str().to_string(),
            progress: task.progress,
            state: state_json,
            error_message: task.error_message,
            created_at: task.created_at.to_rfc3339(),
            updated_at: now.to_rfc3339(),
            last_run_at: task.last_run_at.map(|t| datetime_to_string(t.as_datetime())),
            completed_at: task
                .completed_at
                .map(|t| datetime_to_string(t.as_datetime())),
            next_run_after: task
                .next_run_after
                .map(|t| datetime_to_string(t.as_datetime())),
            timeout_after: task
                .timeout_after
                .map(|t| datetime_to_string(t.as_datetime())),
            max_runtime: task.max_runtime,
            max_retries: task.max_retries,
            retry_count: task.retry_count,
            retry_interval: task.retry_interval,
            broadcast_id: task.broadcast_id,
        };

        let ws = workspace_id.clone();
        let id_blob = uuid_to_blob(&task_id.as_uuid());
        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(id_blob))
                        .filter(tasks::workspace_id.eq(ws)),
                )
                .set(&changeset)
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("update_task", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }
        Ok(())
    }

    /// Deletes a task row.
    ///
    /// Fails with [`StoreError::TaskNotFound`] when zero rows are affected.
    pub async fn delete(
        &self,
        workspace_id: &str,
        task_id: UniversalUuid,
    ) -> Result<(), StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.delete_postgres(workspace_id.to_string(), task_id)
                .await,
            self.delete_sqlite(workspace_id.to_string(), task_id).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn delete_postgres(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
    ) -> Result<(), StoreError> {
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let affected = conn
            .interact(move |conn| {
                diesel::delete(
                    tasks::table
                        .filter(tasks::id.eq(task_id.as_uuid()))
                        .filter(tasks::workspace_id.eq(ws)),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("delete_task", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }
        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn delete_sqlite(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
    ) -> Result<(), StoreError> {
        use super::sqlite_models::uuid_to_blob;
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let id_blob = uuid_to_blob(&task_id.as_uuid());
        let affected = conn
            .interact(move |conn| {
                diesel::delete(
                    tasks::table
                        .filter(tasks::id.eq(id_blob))
                        .filter(tasks::workspace_id.eq(ws)),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("delete_task", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }
        Ok(())
    }

    /// Lists tasks in a workspace, newest first.
    ///
    /// The returned page carries the total number of matches computed
    /// independently of the page window, so callers can paginate.
    pub async fn list(
        &self,
        workspace_id: &str,
        filter: &TaskFilter,
    ) -> Result<TaskListPage, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.list_postgres(workspace_id.to_string(), filter.clone())
                .await,
            self.list_sqlite(workspace_id.to_string(), filter.clone())
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn list_postgres(
        &self,
        workspace_id: String,
        filter: TaskFilter,
    ) -> Result<TaskListPage, StoreError> {
        use super::postgres_models::PgTask;
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let task_types = filter.task_types.clone();
        let created_after = filter.created_after.map(|t| t.to_naive());
        let created_before = filter.created_before.map(|t| t.to_naive());
        let limit = filter.limit;
        let offset = filter.offset;

        let (rows, total) = conn
            .interact(move |conn| -> Result<(Vec<PgTask>, i64), diesel::result::Error> {
                let mut count_query = tasks::table
                    .filter(tasks::workspace_id.eq(workspace_id.clone()))
                    .into_boxed();
                if !statuses.is_empty() {
                    count_query = count_query.filter(tasks::status.eq_any(statuses.clone()));
                }
                if !task_types.is_empty() {
                    count_query = count_query.filter(tasks::task_type.eq_any(task_types.clone()));
                }
                if let Some(after) = created_after {
                    count_query = count_query.filter(tasks::created_at.ge(after));
                }
                if let Some(before) = created_before {
                    count_query = count_query.filter(tasks::created_at.le(before));
                }
                let total = count_query.count().get_result::<i64>(conn)?;

                let mut query = tasks::table
                    .filter(tasks::workspace_id.eq(workspace_id))
                    .into_boxed();
                if !statuses.is_empty() {
                    query = query.filter(tasks::status.eq_any(statuses));
                }
                if !task_types.is_empty() {
                    query = query.filter(tasks::task_type.eq_any(task_types));
                }
                if let Some(after) = created_after {
                    query = query.filter(tasks::created_at.ge(after));
                }
                if let Some(before) = created_before {
                    query = query.filter(tasks::created_at.le(before));
                }
                query = query.order(tasks::created_at.desc());
                if let Some(limit) = limit {
                    query = query.limit(limit);
                }
                if let Some(offset) = offset {
                    query = query.offset(offset);
                }
                let rows = query.load::<PgTask>(conn)?;

                Ok((rows, total))
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("list_tasks", e))?;

        Ok(TaskListPage {
            tasks: rows.into_iter().map(Into::into).collect(),
            total_count: total,
        })
    }

    #[cfg(feature = "sqlite")]
    async fn list_sqlite(
        &self,
        workspace_id: String,
        filter: TaskFilter,
    ) -> Result<TaskListPage, StoreError> {
        use super::sqlite_models::{datetime_to_string, SqliteTask};
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let task_types = filter.task_types.clone();
        let created_after = filter
            .created_after
            .map(|t| datetime_to_string(t.as_datetime()));
        let created_before = filter
            .created_before
            .map(|t| datetime_to_string(t.as_datetime()));
        let limit = filter.limit;
        let offset = filter.offset;

        let (rows, total) = conn
            .interact(
                move |conn| -> Result<(Vec<SqliteTask>, i64), diesel::result::Error> {
                    let mut count_query = tasks::table
                        .filter(tasks::workspace_id.eq(workspace_id.clone()))
                        .into_boxed();
                    if !statuses.is_empty() {
                        count_query = count_query.filter(tasks::status.eq_any(statuses.clone()));
                    }
                    if !task_types.is_empty() {
                        count_query =
                            count_query.filter(tasks::task_type.eq_any(task_types.clone()));
                    }
                    if let Some(ref after) = created_after {
                        count_query = count_query.filter(tasks::created_at.ge(after.clone()));
                    }
                    if let Some(ref before) = created_before {
                        count_query = count_query.filter(tasks::created_at.le(before.clone()));
                    }
                    let total = count_query.count().get_result::<i64>(conn)?;

                    let mut query = tasks::table
                        .filter(tasks::workspace_id.eq(workspace_id))
                        .into_boxed();
                    if !statuses.is_empty() {
                        query = query.filter(tasks::status.eq_any(statuses));
                    }
                    if !task_types.is_empty() {
                        query = query.filter(tasks::task_type.eq_any(task_types));
                    }
                    if let Some(after) = created_after {
                        query = query.filter(tasks::created_at.ge(after));
                    }
                    if let Some(before) = created_before {
                        query = query.filter(tasks::created_at.le(before));
                    }
                    query = query.order(tasks::created_at.desc());
                    if let Some(limit) = limit {
                        query = query.limit(limit);
                    }
                    if let Some(offset) = offset {
                        query = query.offset(offset);
                    }
                    let rows = query.load::<SqliteTask>(conn)?;

                    Ok((rows, total))
                },
            )
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("list_tasks", e))?;

        Ok(TaskListPage {
            tasks: rows.into_iter().map(Into::into).collect(),
            total_count: total,
        })
    }

    /// Returns per-status task totals for a workspace.
    pub async fn get_status_counts(
        &self,
        workspace_id: &str,
    ) -> Result<TaskStatusCounts, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.get_status_counts_postgres(workspace_id.to_string())
                .await,
            self.get_status_counts_sqlite(workspace_id.to_string())
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn get_status_counts_postgres(
        &self,
        workspace_id: String,
    ) -> Result<TaskStatusCounts, StoreError> {
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let rows = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::workspace_id.eq(workspace_id))
                    .group_by(tasks::status)
                    .select((tasks::status, diesel::dsl::count_star()))
                    .load::<(String, i64)>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("get_status_counts", e))?;

        Ok(Self::fold_status_counts(rows))
    }

    #[cfg(feature = "sqlite")]
    async fn get_status_counts_sqlite(
        &self,
        workspace_id: String,
    ) -> Result<TaskStatusCounts, StoreError> {
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let rows = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::workspace_id.eq(workspace_id))
                    .group_by(tasks::status)
                    .select((tasks::status, diesel::dsl::count_star()))
                    .load::<(String, i64)>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("get_status_counts", e))?;

        Ok(Self::fold_status_counts(rows))
    }

    fn fold_status_counts(rows: Vec<(String, i64)>) -> TaskStatusCounts {
        let mut counts = TaskStatusCounts::default();
        for (status, count) in rows {
            match status
                .parse::<TaskStatus>()
                .expect("Invalid status in database")
            {
                TaskStatus::Pending => counts.pending = count,
                TaskStatus::Running => counts.running = count,
                TaskStatus::Paused => counts.paused = count,
                TaskStatus::Completed => counts.completed = count,
                TaskStatus::Failed => counts.failed = count,
            }
        }
        counts
    }

    /// Deletes completed tasks whose `completed_at` is older than the cutoff.
    ///
    /// Returns the number of rows removed. Intended for retention jobs; it
    /// never touches tasks in non-terminal statuses.
    pub async fn delete_completed_older_than(
        &self,
        workspace_id: &str,
        cutoff: UniversalTimestamp,
    ) -> Result<usize, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.delete_completed_older_than_postgres(workspace_id.to_string(), cutoff)
                .await,
            self.delete_completed_older_than_sqlite(workspace_id.to_string(), cutoff)
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn delete_completed_older_than_postgres(
        &self,
        workspace_id: String,
        cutoff: UniversalTimestamp,
    ) -> Result<usize, StoreError> {
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let removed = conn
            .interact(move |conn| {
                diesel::delete(
                    tasks::table
                        .filter(tasks::workspace_id.eq(workspace_id))
                        .filter(tasks::status.eq(TaskStatus::Completed.as_str()))
                        .filter(tasks::completed_at.lt(cutoff.to_naive())),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("delete_completed_tasks", e))?;

        Ok(removed)
    }

    #[cfg(feature = "sqlite")]
    async fn delete_completed_older_than_sqlite(
        &self,
        workspace_id: String,
        cutoff: UniversalTimestamp,
    ) -> Result<usize, StoreError> {
        use super::sqlite_models::datetime_to_string;
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let cutoff_s = datetime_to_string(cutoff.as_datetime());
        let removed = conn
            .interact(move |conn| {
                diesel::delete(
                    tasks::table
                        .filter(tasks::workspace_id.eq(workspace_id))
                        .filter(tasks::status.eq(TaskStatus::Completed.as_str()))
                        .filter(tasks::completed_at.lt(cutoff_s)),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("delete_completed_tasks", e))?;

        Ok(removed)
    }
}
