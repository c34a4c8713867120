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

//! Task lifecycle transitions.
//!
//! A worker that claimed a task calls `mark_as_running`, executes the
//! handler, and terminates the run with exactly one of `mark_as_completed`,
//! `mark_as_failed` or `mark_as_paused`. `save_state` checkpoints progress
//! mid-run without a transition.
//!
//! `mark_as_failed` decides between retry and permanent failure from the
//! row's current retry count. That read and the status write happen inside
//! one transaction; two independent statements would race against another
//! worker failing or reclaiming the same task.

use diesel::prelude::*;

use super::TaskDAL;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::StoreError;
use crate::models::task::TaskState;

/// Outcome of a `save_state` checkpoint write.
#[must_use = "a stale checkpoint means the task is no longer running"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// The checkpoint was persisted.
    Saved,
    /// The task had concurrently left `running`; the checkpoint was
    /// discarded. Not an error, but the handler should wind down since
    /// its claim is gone.
    Stale,
}

impl<'a> TaskDAL<'a> {
    /// Marks a claimed task as running, recording the start of a run.
    ///
    /// Sets `last_run_at` to now and `timeout_after` to the given deadline.
    /// Only tasks currently `pending` or `running` match; fails with
    /// [`StoreError::TaskNotFound`] when zero rows are affected (the task
    /// was deleted or already moved elsewhere).
    pub async fn mark_as_running(
        &self,
        workspace_id: &str,
        task_id: UniversalUuid,
        timeout_after: UniversalTimestamp,
    ) -> Result<(), StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.mark_as_running_postgres(workspace_id.to_string(), task_id, timeout_after)
                .await,
            self.mark_as_running_sqlite(workspace_id.to_string(), task_id, timeout_after)
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn mark_as_running_postgres(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
        timeout_after: UniversalTimestamp,
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
                let now = UniversalTimestamp::now();
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(task_id.as_uuid()))
                        .filter(tasks::workspace_id.eq(ws))
                        .filter(tasks::status.eq_any(["pending", "running"])),
                )
                .set((
                    tasks::status.eq("running"),
                    tasks::last_run_at.eq(Some(now.to_naive())),
                    tasks::timeout_after.eq(Some(timeout_after.to_naive())),
                    tasks::updated_at.eq(now.to_naive()),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("mark_as_running", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }
        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn mark_as_running_sqlite(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
        timeout_after: UniversalTimestamp,
    ) -> Result<(), StoreError> {
        use super::super::sqlite_models::{datetime_to_string, uuid_to_blob};
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let id_blob = uuid_to_blob(&task_id.as_uuid());
        let deadline = datetime_to_string(timeout_after.as_datetime());
        let affected = conn
            .interact(move |conn| {
                let now = UniversalTimestamp::now().to_rfc3339();
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(id_blob))
                        .filter(tasks::workspace_id.eq(ws))
                        .filter(tasks::status.eq_any(["pending", "running"])),
                )
                .set((
                    tasks::status.eq("running"),
                    tasks::last_run_at.eq(Some(now.clone())),
                    tasks::timeout_after.eq(Some(deadline)),
                    tasks::updated_at.eq(now),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("mark_as_running", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }
        Ok(())
    }

    /// Marks a task as completed.
    ///
    /// Sets `progress` to 100, stamps `completed_at` and clears
    /// `timeout_after`. Fails with [`StoreError::TaskNotFound`] when zero
    /// rows are affected.
    pub async fn mark_as_completed(
        &self,
        workspace_id: &str,
        task_id: UniversalUuid,
    ) -> Result<(), StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.mark_as_completed_postgres(workspace_id.to_string(), task_id)
                .await,
            self.mark_as_completed_sqlite(workspace_id.to_string(), task_id)
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn mark_as_completed_postgres(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
    ) -> Result<(), StoreError> {
        use chrono::NaiveDateTime;

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
                let now = UniversalTimestamp::now();
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(task_id.as_uuid()))
                        .filter(tasks::workspace_id.eq(ws)),
                )
                .set((
                    tasks::status.eq("completed"),
                    tasks::progress.eq(100.0),
                    tasks::completed_at.eq(Some(now.to_naive())),
                    tasks::timeout_after.eq(None::<NaiveDateTime>),
                    tasks::updated_at.eq(now.to_naive()),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("mark_as_completed", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }
        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn mark_as_completed_sqlite(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
    ) -> Result<(), StoreError> {
        use super::super::sqlite_models::uuid_to_blob;
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
                let now = UniversalTimestamp::now().to_rfc3339();
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(id_blob))
                        .filter(tasks::workspace_id.eq(ws)),
                )
                .set((
                    tasks::status.eq("completed"),
                    tasks::progress.eq(100.0),
                    tasks::completed_at.eq(Some(now.clone())),
                    tasks::timeout_after.eq(None::<String>),
                    tasks::updated_at.eq(now),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("mark_as_completed", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }
        Ok(())
    }

    /// Records a failed run and decides between retry and permanent failure.
    ///
    /// Reads the row's current `retry_count` and writes the outcome in the
    /// same transaction. If retries remain the task goes back to `pending`
    /// with `next_run_after = now + retry_interval` and the retry count
    /// incremented; otherwise it becomes `failed` (terminal) with
    /// `next_run_after` cleared. The failure message is stored either way
    /// and the claim deadline is cleared.
    ///
    /// Fails with [`StoreError::TaskNotFound`] when the task does not exist.
    pub async fn mark_as_failed(
        &self,
        workspace_id: &str,
        task_id: UniversalUuid,
        message: &str,
    ) -> Result<(), StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.mark_as_failed_postgres(workspace_id.to_string(), task_id, message.to_string())
                .await,
            self.mark_as_failed_sqlite(workspace_id.to_string(), task_id, message.to_string())
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn mark_as_failed_postgres(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
        message: String,
    ) -> Result<(), StoreError> {
        use chrono::NaiveDateTime;
        use diesel::connection::Connection;

        use super::super::postgres_models::PgTask;
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let will_retry = conn
            .interact(move |conn| {
                conn.transaction::<bool, diesel::result::Error, _>(|conn| {
                    let now = UniversalTimestamp::now();

                    // Lock the row so a concurrent failure or reclaim of the
                    // same task cannot interleave with the decision
                    let task: PgTask = tasks::table
                        .filter(tasks::id.eq(task_id.as_uuid()))
                        .filter(tasks::workspace_id.eq(ws.clone()))
                        .for_update()
                        .first(conn)?;

                    let will_retry = task.retry_count < task.max_retries;
                    if will_retry {
                        let next_run =
                            now.to_naive() + chrono::Duration::seconds(task.retry_interval as i64);
                        diesel::update(
                            tasks::table
                                .filter(tasks::id.eq(task_id.as_uuid()))
                                .filter(tasks::workspace_id.eq(ws)),
                        )
                        .set((
                            tasks::status.eq("pending"),
                            tasks::retry_count.eq(task.retry_count + 1),
                            tasks::next_run_after.eq(Some(next_run)),
                            tasks::error_message.eq(Some(message)),
                            tasks::timeout_after.eq(None::<NaiveDateTime>),
                            tasks::updated_at.eq(now.to_naive()),
                        ))
                        .execute(conn)?;
                    } else {
                        diesel::update(
                            tasks::table
                                .filter(tasks::id.eq(task_id.as_uuid()))
                                .filter(tasks::workspace_id.eq(ws)),
                        )
                        .set((
                            tasks::status.eq("failed"),
                            tasks::next_run_after.eq(None::<NaiveDateTime>),
                            tasks::error_message.eq(Some(message)),
                            tasks::timeout_after.eq(None::<NaiveDateTime>),
                            tasks::updated_at.eq(now.to_naive()),
                        ))
                        .execute(conn)?;
                    }

                    Ok(will_retry)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| match e {
                diesel::result::Error::NotFound => StoreError::TaskNotFound {
                    workspace_id,
                    task_id,
                },
                other => StoreError::database("mark_as_failed", other),
            })?;

        if will_retry {
            tracing::debug!(task_id = %task_id, "Task failed, scheduled for retry");
        } else {
            tracing::info!(task_id = %task_id, "Task failed permanently, retries exhausted");
        }
        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn mark_as_failed_sqlite(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
        message: String,
    ) -> Result<(), StoreError> {
        use super::super::sqlite_models::{datetime_to_string, uuid_to_blob, SqliteTask};
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let id_blob = uuid_to_blob(&task_id.as_uuid());
        let will_retry = conn
            .interact(move |conn| {
                // The write lock from the IMMEDIATE transaction stands in
                // for row-level locking on SQLite
                conn.immediate_transaction::<bool, diesel::result::Error, _>(|conn| {
                    let now = UniversalTimestamp::now();
                    let now_s = now.to_rfc3339();

                    let task: SqliteTask = tasks::table
                        .filter(tasks::id.eq(id_blob.clone()))
                        .filter(tasks::workspace_id.eq(ws.clone()))
                        .first(conn)?;

                    let will_retry = task.retry_count < task.max_retries;
                    if will_retry {
                        let next_run = datetime_to_string(
                            &(*now.as_datetime()
                                + chrono::Duration::seconds(task.retry_interval as i64)),
                        );
                        diesel::update(
                            tasks::table
                                .filter(tasks::id.eq(id_blob))
                                .filter(tasks::workspace_id.eq(ws)),
                        )
                        .set((
                            tasks::status.eq("pending"),
                            tasks::retry_count.eq(task.retry_count + 1),
                            tasks::next_run_after.eq(Some(next_run)),
                            tasks::error_message.eq(Some(message)),
                            tasks::timeout_after.eq(None::<String>),
                            tasks::updated_at.eq(now_s),
                        ))
                        .execute(conn)?;
                    } else {
                        diesel::update(
                            tasks::table
                                .filter(tasks::id.eq(id_blob))
                                .filter(tasks::workspace_id.eq(ws)),
                        )
                        .set((
                            tasks::status.eq("failed"),
                            tasks::next_run_after.eq(None::<String>),
                            tasks::error_message.eq(Some(message)),
                            tasks::timeout_after.eq(None::<String>),
                            tasks::updated_at.eq(now_s),
                        ))
                        .execute(conn)?;
                    }

                    Ok(will_retry)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| match e {
                diesel::result::Error::NotFound => StoreError::TaskNotFound {
                    workspace_id,
                    task_id,
                },
                other => StoreError::database("mark_as_failed", other),
            })?;

        if will_retry {
            tracing::debug!(task_id = %task_id, "Task failed, scheduled for retry");
        } else {
            tracing::info!(task_id = %task_id, "Task failed permanently, retries exhausted");
        }
        Ok(())
    }

    /// Parks a running task until `next_run_after`, persisting its
    /// checkpoint.
    ///
    /// Long-running handlers call this to yield between batches: the
    /// handler's opaque `state` and `progress` are stored and the claim
    /// deadline is cleared. Fails with [`StoreError::TaskNotFound`] when
    /// zero rows are affected.
    pub async fn mark_as_paused(
        &self,
        workspace_id: &str,
        task_id: UniversalUuid,
        next_run_after: UniversalTimestamp,
        progress: f64,
        state: &TaskState,
    ) -> Result<(), StoreError> {
        let state_json = serde_json::to_string(state)?;
        crate::dispatch_backend!(
            self.dal.backend(),
            self.mark_as_paused_postgres(
                workspace_id.to_string(),
                task_id,
                next_run_after,
                progress,
                state_json
            )
            .await,
            self.mark_as_paused_sqlite(
                workspace_id.to_string(),
                task_id,
                next_run_after,
                progress,
                state_json
            )
            .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn mark_as_paused_postgres(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
        next_run_after: UniversalTimestamp,
        progress: f64,
        state_json: String,
    ) -> Result<(), StoreError> {
        use chrono::NaiveDateTime;

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
                let now = UniversalTimestamp::now();
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(task_id.as_uuid()))
                        .filter(tasks::workspace_id.eq(ws)),
                )
                .set((
                    tasks::status.eq("paused"),
                    tasks::progress.eq(progress),
                    tasks::state.eq(Some(state_json)),
                    tasks::next_run_after.eq(Some(next_run_after.to_naive())),
                    tasks::timeout_after.eq(None::<NaiveDateTime>),
                    tasks::updated_at.eq(now.to_naive()),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("mark_as_paused", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }

        tracing::debug!(task_id = %task_id, "Task paused with checkpoint");
        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn mark_as_paused_sqlite(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
        next_run_after: UniversalTimestamp,
        progress: f64,
        state_json: String,
    ) -> Result<(), StoreError> {
        use super::super::sqlite_models::{datetime_to_string, uuid_to_blob};
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let ws = workspace_id.clone();
        let id_blob = uuid_to_blob(&task_id.as_uuid());
        let next_run = datetime_to_string(next_run_after.as_datetime());
        let affected = conn
            .interact(move |conn| {
                let now = UniversalTimestamp::now().to_rfc3339();
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(id_blob))
                        .filter(tasks::workspace_id.eq(ws)),
                )
                .set((
                    tasks::status.eq("paused"),
                    tasks::progress.eq(progress),
                    tasks::state.eq(Some(state_json)),
                    tasks::next_run_after.eq(Some(next_run)),
                    tasks::timeout_after.eq(None::<String>),
                    tasks::updated_at.eq(now),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("mark_as_paused", e))?;

        if affected == 0 {
            return Err(StoreError::TaskNotFound {
                workspace_id,
                task_id,
            });
        }

        tracing::debug!(task_id = %task_id, "Task paused with checkpoint");
        Ok(())
    }

    /// Best-effort checkpoint of a running task's progress and state.
    ///
    /// Only rows still `running` are written. When the task has
    /// concurrently moved out of `running` (completed by a reclaiming
    /// worker, failed, deleted) the write affects zero rows and
    /// [`CheckpointOutcome::Stale`] is returned instead of an error.
    pub async fn save_state(
        &self,
        workspace_id: &str,
        task_id: UniversalUuid,
        progress: f64,
        state: &TaskState,
    ) -> Result<CheckpointOutcome, StoreError> {
        let state_json = serde_json::to_string(state)?;
        crate::dispatch_backend!(
            self.dal.backend(),
            self.save_state_postgres(workspace_id.to_string(), task_id, progress, state_json)
                .await,
            self.save_state_sqlite(workspace_id.to_string(), task_id, progress, state_json)
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn save_state_postgres(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
        progress: f64,
        state_json: String,
    ) -> Result<CheckpointOutcome, StoreError> {
        use crate::database::schema::postgres::tasks;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                let now = UniversalTimestamp::now();
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(task_id.as_uuid()))
                        .filter(tasks::workspace_id.eq(workspace_id))
                        .filter(tasks::status.eq("running")),
                )
                .set((
                    tasks::progress.eq(progress),
                    tasks::state.eq(Some(state_json)),
                    tasks::updated_at.eq(now.to_naive()),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("save_state", e))?;

        if affected == 0 {
            tracing::warn!(task_id = %task_id, "Checkpoint discarded, task no longer running");
            return Ok(CheckpointOutcome::Stale);
        }
        Ok(CheckpointOutcome::Saved)
    }

    #[cfg(feature = "sqlite")]
    async fn save_state_sqlite(
        &self,
        workspace_id: String,
        task_id: UniversalUuid,
        progress: f64,
        state_json: String,
    ) -> Result<CheckpointOutcome, StoreError> {
        use super::super::sqlite_models::uuid_to_blob;
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let id_blob = uuid_to_blob(&task_id.as_uuid());
        let affected = conn
            .interact(move |conn| {
                let now = UniversalTimestamp::now().to_rfc3339();
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(id_blob))
                        .filter(tasks::workspace_id.eq(workspace_id))
                        .filter(tasks::status.eq("running")),
                )
                .set((
                    tasks::progress.eq(progress),
                    tasks::state.eq(Some(state_json)),
                    tasks::updated_at.eq(now),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("save_state", e))?;

        if affected == 0 {
            tracing::warn!(task_id = %task_id, "Checkpoint discarded, task no longer running");
            return Ok(CheckpointOutcome::Stale);
        }
        Ok(CheckpointOutcome::Saved)
    }
}
