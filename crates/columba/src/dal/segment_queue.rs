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

//! Data access layer for the debounced segment recomputation queue.
//!
//! The queue is keyed by email alone. Re-enqueueing an email that is
//! already queued resets its debounce clock instead of adding a second
//! row, so a burst of profile updates for one contact collapses into a
//! single recomputation once the burst goes quiet.
//!
//! Consumers poll with [`SegmentQueueDAL::get_pending_emails`], process
//! the returned emails, and only then call [`SegmentQueueDAL::remove`] or
//! [`SegmentQueueDAL::remove_batch`]. Rows stay in the queue until removed,
//! so a consumer crash after polling loses no work.

use diesel::prelude::*;

use super::DAL;
use crate::database::universal_types::UniversalTimestamp;
use crate::error::StoreError;
use crate::models::segment_queue::{SegmentQueueEntry, SEGMENT_QUEUE_DEBOUNCE_SECONDS};

/// Data access operations for the segment recomputation queue.
#[derive(Clone)]
pub struct SegmentQueueDAL<'a> {
    dal: &'a DAL,
}

impl<'a> SegmentQueueDAL<'a> {
    /// Creates a new SegmentQueueDAL instance.
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Enqueues an email for segment recomputation.
    ///
    /// Upserts on the email key: if the email is already queued, its
    /// `queued_at` is reset to now and the debounce window starts over.
    pub async fn enqueue(&self, email: &str) -> Result<(), StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.enqueue_postgres(email.to_string()).await,
            self.enqueue_sqlite(email.to_string()).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn enqueue_postgres(&self, email: String) -> Result<(), StoreError> {
        use super::postgres_models::NewPgSegmentQueueEntry;
        use crate::database::schema::postgres::segment_queue;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            let now = UniversalTimestamp::now().to_naive();
            let entry = NewPgSegmentQueueEntry {
                email,
                queued_at: now,
            };
            diesel::insert_into(segment_queue::table)
                .values(&entry)
                .on_conflict(segment_queue::email)
                .do_update()
                .set(segment_queue::queued_at.eq(now))
                .execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
        .map_err(|e| StoreError::database("enqueue_email", e))?;

        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn enqueue_sqlite(&self, email: String) -> Result<(), StoreError> {
        use super::sqlite_models::NewSqliteSegmentQueueEntry;
        use crate::database::schema::sqlite::segment_queue;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            let now = UniversalTimestamp::now().to_rfc3339();
            let entry = NewSqliteSegmentQueueEntry {
                email,
                queued_at: now.clone(),
            };
            diesel::insert_into(segment_queue::table)
                .values(&entry)
                .on_conflict(segment_queue::email)
                .do_update()
                .set(segment_queue::queued_at.eq(now))
                .execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
        .map_err(|e| StoreError::database("enqueue_email", e))?;

        Ok(())
    }

    /// Returns up to `limit` emails whose debounce window has elapsed,
    /// oldest first.
    ///
    /// An email is pending once it has sat unchanged in the queue for the
    /// full debounce window. Rows are not removed or marked here; the
    /// consumer calls [`remove`](Self::remove) or
    /// [`remove_batch`](Self::remove_batch) after processing.
    pub async fn get_pending_emails(
        &self,
        limit: usize,
    ) -> Result<Vec<SegmentQueueEntry>, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.get_pending_emails_postgres(limit).await,
            self.get_pending_emails_sqlite(limit).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn get_pending_emails_postgres(
        &self,
        limit: usize,
    ) -> Result<Vec<SegmentQueueEntry>, StoreError> {
        use diesel::connection::Connection;

        use super::postgres_models::PgSegmentQueueEntry;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let limit = limit as i64;

        let pending: Vec<PgSegmentQueueEntry> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let cutoff = (*UniversalTimestamp::now().as_datetime()
                        - chrono::Duration::seconds(SEGMENT_QUEUE_DEBOUNCE_SECONDS))
                    .naive_utc();

                    // SKIP LOCKED keeps concurrent pollers from handing the
                    // same email to two consumers at once
                    diesel::sql_query(format!(
                        r#"
                        SELECT email, queued_at FROM segment_queue
                        WHERE queued_at < $1
                        ORDER BY queued_at ASC
                        LIMIT {}
                        FOR UPDATE SKIP LOCKED
                        "#,
                        limit
                    ))
                    .bind::<diesel::sql_types::Timestamp, _>(cutoff)
                    .load(conn)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("get_pending_emails", e))?;

        Ok(pending.into_iter().map(Into::into).collect())
    }

    #[cfg(feature = "sqlite")]
    async fn get_pending_emails_sqlite(
        &self,
        limit: usize,
    ) -> Result<Vec<SegmentQueueEntry>, StoreError> {
        use super::sqlite_models::{datetime_to_string, SqliteSegmentQueueEntry};
        use crate::database::schema::sqlite::segment_queue;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let limit = limit as i64;

        // SQLite has no FOR UPDATE SKIP LOCKED; its single-writer model
        // serializes pollers instead
        let pending: Vec<SqliteSegmentQueueEntry> = conn
            .interact(move |conn| {
                let cutoff = datetime_to_string(
                    &(*UniversalTimestamp::now().as_datetime()
                        - chrono::Duration::seconds(SEGMENT_QUEUE_DEBOUNCE_SECONDS)),
                );

                segment_queue::table
                    .filter(segment_queue::queued_at.lt(cutoff))
                    .order(segment_queue::queued_at.asc())
                    .limit(limit)
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("get_pending_emails", e))?;

        Ok(pending.into_iter().map(Into::into).collect())
    }

    /// Removes a processed email from the queue.
    ///
    /// Idempotent: removing an email that is not queued is a no-op.
    pub async fn remove(&self, email: &str) -> Result<(), StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.remove_postgres(email.to_string()).await,
            self.remove_sqlite(email.to_string()).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn remove_postgres(&self, email: String) -> Result<(), StoreError> {
        use crate::database::schema::postgres::segment_queue;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            diesel::delete(segment_queue::table.filter(segment_queue::email.eq(email)))
                .execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
        .map_err(|e| StoreError::database("remove_email", e))?;

        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn remove_sqlite(&self, email: String) -> Result<(), StoreError> {
        use crate::database::schema::sqlite::segment_queue;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            diesel::delete(segment_queue::table.filter(segment_queue::email.eq(email)))
                .execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
        .map_err(|e| StoreError::database("remove_email", e))?;

        Ok(())
    }

    /// Removes a batch of processed emails, returning how many rows were
    /// deleted.
    ///
    /// Idempotent: emails that are no longer queued are skipped silently.
    pub async fn remove_batch(&self, emails: &[String]) -> Result<usize, StoreError> {
        if emails.is_empty() {
            return Ok(0);
        }
        crate::dispatch_backend!(
            self.dal.backend(),
            self.remove_batch_postgres(emails.to_vec()).await,
            self.remove_batch_sqlite(emails.to_vec()).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn remove_batch_postgres(&self, emails: Vec<String>) -> Result<usize, StoreError> {
        use crate::database::schema::postgres::segment_queue;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let removed = conn
            .interact(move |conn| {
                diesel::delete(segment_queue::table.filter(segment_queue::email.eq_any(emails)))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("remove_email_batch", e))?;

        Ok(removed)
    }

    #[cfg(feature = "sqlite")]
    async fn remove_batch_sqlite(&self, emails: Vec<String>) -> Result<usize, StoreError> {
        use crate::database::schema::sqlite::segment_queue;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let removed = conn
            .interact(move |conn| {
                diesel::delete(segment_queue::table.filter(segment_queue::email.eq_any(emails)))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("remove_email_batch", e))?;

        Ok(removed)
    }

    /// Returns the number of emails currently queued, pending or not.
    pub async fn size(&self) -> Result<i64, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.size_postgres().await,
            self.size_sqlite().await
        )
    }

    #[cfg(feature = "postgres")]
    async fn size_postgres(&self) -> Result<i64, StoreError> {
        use crate::database::schema::postgres::segment_queue;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let count = conn
            .interact(|conn| segment_queue::table.count().get_result::<i64>(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("segment_queue_size", e))?;

        Ok(count)
    }

    #[cfg(feature = "sqlite")]
    async fn size_sqlite(&self) -> Result<i64, StoreError> {
        use crate::database::schema::sqlite::segment_queue;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let count = conn
            .interact(|conn| segment_queue::table.count().get_result::<i64>(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("segment_queue_size", e))?;

        Ok(count)
    }

    /// Deletes every row in the queue, returning how many were removed.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.clear_postgres().await,
            self.clear_sqlite().await
        )
    }

    #[cfg(feature = "postgres")]
    async fn clear_postgres(&self) -> Result<usize, StoreError> {
        use crate::database::schema::postgres::segment_queue;

        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let removed = conn
            .interact(|conn| diesel::delete(segment_queue::table).execute(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("clear_segment_queue", e))?;

        Ok(removed)
    }

    #[cfg(feature = "sqlite")]
    async fn clear_sqlite(&self) -> Result<usize, StoreError> {
        use crate::database::schema::sqlite::segment_queue;

        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        let removed = conn
            .interact(|conn| diesel::delete(segment_queue::table).execute(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
            .map_err(|e| StoreError::database("clear_segment_queue", e))?;

        Ok(removed)
    }
}
