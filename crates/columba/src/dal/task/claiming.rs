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

//! Atomic task claiming for distributed workers.
//!
//! A task is eligible to run when it is `pending` with `next_run_after`
//! unset or in the past, or when it is `running` with `timeout_after` in
//! the past (a worker died holding the claim and the run is reclaimed).
//!
//! Claiming selects eligible rows and marks them `running` in one
//! transaction, so two concurrent callers never receive the same task.
//! The transaction does nothing but select-and-mark; business execution
//! happens outside it.

use diesel::prelude::*;

use super::TaskDAL;
use crate::database::universal_types::UniversalTimestamp;
use crate::error::StoreError;
use crate::models::task::Task;

impl<'a> TaskDAL<'a> {
    /// Atomically claims up to `limit` eligible tasks across all workspaces.
    ///
    /// Claimed tasks are returned marked `running` with `timeout_after` set
    /// to now plus each task's `max_runtime`, so a claim abandoned by a
    /// crashed worker becomes reclaimable once that deadline passes. Tasks
    /// are claimed oldest first by creation time.
    ///
    /// Concurrent calls return disjoint sets: each caller skips rows
    /// already locked by another claimant instead of blocking on them.
    pub async fn get_next_batch(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.get_next_batch_postgres(limit).await,
            self.get_next_batch_sqlite(limit).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn get_next_batch_postgres(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        use super::super::postgres_models::PgTask;
        use diesel::connection::Connection;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let limit = limit as i64;

        let mut claimed: Vec<PgTask> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let now = UniversalTimestamp::now();

                    // Claim eligible tasks with FOR UPDATE SKIP LOCKED:
                    // 1. Select eligible rows with lock (skip rows held by
                    //    concurrent claimants), oldest first
                    // 2. Mark them running with a fresh claim deadline
                    // 3. Return the updated rows
                    diesel::sql_query(format!(
                        r#"
                        WITH eligible AS (
                            SELECT id FROM tasks
                            WHERE (status = 'pending' AND (next_run_after IS NULL OR next_run_after <= $1))
                               OR (status = 'running' AND timeout_after <= $1)
                            ORDER BY created_at ASC
                            LIMIT {}
                            FOR UPDATE SKIP LOCKED
                        )
                        UPDATE tasks
                        SET status = 'running',
                            timeout_after = $1 + (tasks.max_runtime * INTERVAL '1 second'),
                            updated_at = $1
                        FROM eligible
                        WHERE tasks.id = eligible.id
                        RETURNING tasks.*
                        "#,
                        limit
                    ))
                    .bind::<diesel::sql_types::Timestamp, _>(now.to_naive())
                    .load(conn)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("get_next_batch", e))?;

        // UPDATE ... RETURNING does not preserve the selection order
        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        tracing::debug!(claimed = claimed.len(), "Claimed task batch");
        Ok(claimed.into_iter().map(Into::into).collect())
    }

    #[cfg(feature = "sqlite")]
    async fn get_next_batch_sqlite(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        use super::super::sqlite_models::{datetime_to_string, SqliteTask};
        use crate::database::schema::sqlite::tasks;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let limit = limit as i64;

        // SQLite doesn't support FOR UPDATE SKIP LOCKED, so we use an
        // IMMEDIATE transaction to acquire the write lock up front. This
        // serializes concurrent claim attempts, ensuring each task is
        // claimed exactly once.
        let claimed: Vec<SqliteTask> = conn
            .interact(move |conn| -> Result<Vec<SqliteTask>, diesel::result::Error> {
                conn.immediate_transaction::<Vec<SqliteTask>, diesel::result::Error, _>(|conn| {
                    let now = UniversalTimestamp::now();
                    let now_s = now.to_rfc3339();

                    // Select eligible rows within the transaction, oldest first
                    let eligible: Vec<SqliteTask> = tasks::table
                        .filter(
                            tasks::status
                                .eq("pending")
                                .and(
                                    tasks::next_run_after
                                        .is_null()
                                        .or(tasks::next_run_after.le(now_s.clone())),
                                )
                                .or(tasks::status
                                    .eq("running")
                                    .and(tasks::timeout_after.le(now_s.clone()))),
                        )
                        .order(tasks::created_at.asc())
                        .limit(limit)
                        .load(conn)?;

                    if eligible.is_empty() {
                        return Ok(Vec::new());
                    }

                    // The claim deadline depends on each row's max_runtime,
                    // so rows are marked one at a time
                    let mut claimed = eligible;
                    for task in &mut claimed {
                        let deadline = datetime_to_string(
                            &(*now.as_datetime()
                                + chrono::Duration::seconds(task.max_runtime as i64)),
                        );
                        diesel::update(tasks::table.filter(tasks::id.eq(task.id.clone())))
                            .set((
                                tasks::status.eq("running"),
                                tasks::timeout_after.eq(Some(deadline.clone())),
                                tasks::updated_at.eq(now_s.clone()),
                            ))
                            .execute(conn)?;

                        task.status = "running".to_string();
                        task.timeout_after = Some(deadline);
                        task.updated_at = now_s.clone();
                    }

                    Ok(claimed)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("get_next_batch", e))?;

        tracing::debug!(claimed = claimed.len(), "Claimed task batch");
        Ok(claimed.into_iter().map(Into::into).collect())
    }
}
