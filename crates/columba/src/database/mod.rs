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

//! Database infrastructure: connection pooling, schema definitions,
//! cross-backend value types and embedded migrations.
//!
//! Everything below the DAL goes through this module. The same binary can
//! talk to PostgreSQL or SQLite, selected at runtime from the connection
//! string passed to [`Database::new`].

pub mod connection;
pub mod schema;
pub mod universal_types;

pub use connection::{AnyConnection, AnyPool, BackendType, Database};
pub use universal_types::{current_timestamp, UniversalTimestamp, UniversalUuid};

use diesel::pg::PgConnection;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

/// Embedded PostgreSQL migrations, compiled into the binary.
pub const POSTGRES_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/postgres");

/// Embedded SQLite migrations, compiled into the binary.
pub const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

/// Runs all pending PostgreSQL migrations on the given connection.
///
/// Exposed for test fixtures and operational tooling that manage their own
/// connections. Application code should prefer [`Database::run_migrations`].
pub fn run_migrations_postgres(
    conn: &mut PgConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    conn.run_pending_migrations(POSTGRES_MIGRATIONS)?;
    Ok(())
}

/// Runs all pending SQLite migrations on the given connection.
pub fn run_migrations_sqlite(
    conn: &mut SqliteConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    conn.run_pending_migrations(SQLITE_MIGRATIONS)?;
    Ok(())
}
