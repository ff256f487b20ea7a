//! Version-tracked database migrations.
//!
//! Each migration has a version number and SQL. `run_migrations()`
//! checks the current version and applies only the new ones
//! sequentially.

use libsql::Connection;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS organisations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS volunteers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT NOT NULL UNIQUE,
            push_capable INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_volunteers_phone ON volunteers(phone);

        CREATE TABLE IF NOT EXISTS requests (
            id TEXT PRIMARY KEY,
            organisation_id TEXT NOT NULL REFERENCES organisations(id),
            identifier TEXT NOT NULL,
            text TEXT NOT NULL,
            required_volunteer_count INTEGER NOT NULL,
            state TEXT NOT NULL DEFAULT 'open',
            fulfillment_date TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_requests_state ON requests(state);

        CREATE TABLE IF NOT EXISTS assignments (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL REFERENCES requests(id),
            volunteer_id TEXT NOT NULL REFERENCES volunteers(id),
            state TEXT NOT NULL DEFAULT 'awaiting_dispatch',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(request_id, volunteer_id)
        );
        CREATE INDEX IF NOT EXISTS idx_assignments_request_state
            ON assignments(request_id, state);
        CREATE INDEX IF NOT EXISTS idx_assignments_volunteer_state
            ON assignments(volunteer_id, state);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            direction TEXT NOT NULL,
            channel TEXT NOT NULL,
            message_type TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'pending',
            text TEXT NOT NULL,
            volunteer_id TEXT NOT NULL REFERENCES volunteers(id),
            request_id TEXT,
            creator_id TEXT,
            external_id TEXT UNIQUE,
            read_at TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_volunteer ON messages(volunteer_id);
        CREATE INDEX IF NOT EXISTS idx_messages_direction_read
            ON messages(direction, read_at);
        CREATE INDEX IF NOT EXISTS idx_messages_external_id ON messages(external_id);
    "#,
}];

/// Run all pending migrations against the connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Open(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                StoreError::Open(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Open(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| StoreError::Open(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row
            .get(0)
            .map_err(|e| StoreError::Open(format!("Failed to parse migration version: {e}"))),
        None => Ok(0),
    }
}

/// Record an applied migration.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| StoreError::Open(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
