//! libSQL backend — async `Store` trait implementation.
//!
//! Stores a single connection that is reused for all operations.
//! `libsql::Connection` is `Send + Sync` and safe for concurrent async
//! use. Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Assignment, AssignmentState, Message, Organisation, Request, Volunteer, parse_assignment_state,
    parse_channel, parse_direction, parse_message_state, parse_message_type, parse_request_state,
};
use crate::store::migrations;
use crate::store::traits::{NewMessage, NewRequest, Store};

/// libSQL store backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create data directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Store opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn assignment_by_id(&self, id: Uuid) -> Result<Option<Assignment>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("assignment_by_id: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("assignment_by_id: {e}")))?
        {
            Some(row) => Ok(Some(map_row(row_to_assignment(&row), "assignment_by_id")?)),
            None => Ok(None),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

const ASSIGNMENT_COLUMNS: &str = "id, request_id, volunteer_id, state, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, direction, channel, message_type, state, text, volunteer_id, \
                               request_id, creator_id, external_id, read_at, created_at";

const REQUEST_COLUMNS: &str =
    "id, organisation_id, identifier, text, required_volunteer_count, state, fulfillment_date";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_optional_uuid(s: &Option<String>) -> Option<Uuid> {
    s.as_ref().map(|s| parse_uuid(s))
}

/// Map a row-mapper failure into a `StoreError` for the given op.
fn map_row<T>(res: Result<T, libsql::Error>, op: &str) -> Result<T, StoreError> {
    res.map_err(|e| StoreError::Query(format!("{op}: {e}")))
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_to_organisation(row: &libsql::Row) -> Result<Organisation, libsql::Error> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    Ok(Organisation {
        id: parse_uuid(&id),
        name,
    })
}

fn row_to_volunteer(row: &libsql::Row) -> Result<Volunteer, libsql::Error> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let phone: String = row.get(2)?;
    let push_capable: i64 = row.get(3)?;
    Ok(Volunteer {
        id: parse_uuid(&id),
        name,
        phone,
        push_capable: push_capable != 0,
    })
}

fn row_to_request(row: &libsql::Row) -> Result<Request, libsql::Error> {
    let id: String = row.get(0)?;
    let organisation_id: String = row.get(1)?;
    let identifier: String = row.get(2)?;
    let text: String = row.get(3)?;
    let required: i64 = row.get(4)?;
    let state: String = row.get(5)?;
    let fulfillment: Option<String> = row.get(6)?;
    Ok(Request {
        id: parse_uuid(&id),
        organisation_id: parse_uuid(&organisation_id),
        identifier,
        text,
        required_volunteer_count: required.max(0) as u32,
        state: parse_request_state(&state),
        fulfillment_date: parse_optional_datetime(&fulfillment),
    })
}

fn row_to_assignment(row: &libsql::Row) -> Result<Assignment, libsql::Error> {
    let id: String = row.get(0)?;
    let request_id: String = row.get(1)?;
    let volunteer_id: String = row.get(2)?;
    let state: String = row.get(3)?;
    let created: String = row.get(4)?;
    let updated: String = row.get(5)?;
    Ok(Assignment {
        id: parse_uuid(&id),
        request_id: parse_uuid(&request_id),
        volunteer_id: parse_uuid(&volunteer_id),
        state: parse_assignment_state(&state),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let id: String = row.get(0)?;
    let direction: String = row.get(1)?;
    let channel: String = row.get(2)?;
    let message_type: String = row.get(3)?;
    let state: String = row.get(4)?;
    let text: String = row.get(5)?;
    let volunteer_id: String = row.get(6)?;
    let request_id: Option<String> = row.get(7)?;
    let creator_id: Option<String> = row.get(8)?;
    let external_id: Option<String> = row.get(9)?;
    let read_at: Option<String> = row.get(10)?;
    let created_at: String = row.get(11)?;
    Ok(Message {
        id: parse_uuid(&id),
        direction: parse_direction(&direction),
        channel: parse_channel(&channel),
        message_type: parse_message_type(&message_type),
        state: parse_message_state(&state),
        text,
        volunteer_id: parse_uuid(&volunteer_id),
        request_id: parse_optional_uuid(&request_id),
        creator_id: parse_optional_uuid(&creator_id),
        external_id,
        read_at: parse_optional_datetime(&read_at),
        created_at: parse_datetime(&created_at),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn create_organisation(&self, name: &str) -> Result<Organisation, StoreError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO organisations (id, name) VALUES (?1, ?2)",
                params![id.to_string(), name],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_organisation: {e}")))?;
        Ok(Organisation {
            id,
            name: name.to_string(),
        })
    }

    async fn get_organisation(&self, id: Uuid) -> Result<Option<Organisation>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name FROM organisations WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_organisation: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_organisation: {e}")))?
        {
            Some(row) => Ok(Some(map_row(row_to_organisation(&row), "get_organisation")?)),
            None => Ok(None),
        }
    }

    async fn create_volunteer(
        &self,
        name: &str,
        phone: &str,
        push_capable: bool,
    ) -> Result<Volunteer, StoreError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO volunteers (id, name, phone, push_capable) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), name, phone, push_capable as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_volunteer: {e}")))?;
        Ok(Volunteer {
            id,
            name: name.to_string(),
            phone: phone.to_string(),
            push_capable,
        })
    }

    async fn get_volunteer(&self, id: Uuid) -> Result<Option<Volunteer>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, phone, push_capable FROM volunteers WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_volunteer: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_volunteer: {e}")))?
        {
            Some(row) => Ok(Some(map_row(row_to_volunteer(&row), "get_volunteer")?)),
            None => Ok(None),
        }
    }

    async fn volunteer_by_phone(&self, phone: &str) -> Result<Option<Volunteer>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, phone, push_capable FROM volunteers WHERE phone = ?1",
                params![phone],
            )
            .await
            .map_err(|e| StoreError::Query(format!("volunteer_by_phone: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("volunteer_by_phone: {e}")))?
        {
            Some(row) => Ok(Some(map_row(row_to_volunteer(&row), "volunteer_by_phone")?)),
            None => Ok(None),
        }
    }

    async fn create_request(&self, new: NewRequest) -> Result<Request, StoreError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO requests (id, organisation_id, identifier, text,
                    required_volunteer_count, state, fulfillment_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    new.organisation_id.to_string(),
                    new.identifier.as_str(),
                    new.text.as_str(),
                    new.required_volunteer_count as i64,
                    new.state.as_str(),
                    opt_text(new.fulfillment_date.map(|d| d.to_rfc3339()).as_deref()),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_request: {e}")))?;

        Ok(Request {
            id,
            organisation_id: new.organisation_id,
            identifier: new.identifier,
            text: new.text,
            required_volunteer_count: new.required_volunteer_count,
            state: new.state,
            fulfillment_date: new.fulfillment_date,
        })
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<Request>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_request: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_request: {e}")))?
        {
            Some(row) => Ok(Some(map_row(row_to_request(&row), "get_request")?)),
            None => Ok(None),
        }
    }

    async fn create_assignment(
        &self,
        request_id: Uuid,
        volunteer_id: Uuid,
        state: AssignmentState,
    ) -> Result<Assignment, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.conn()
            .execute(
                "INSERT INTO assignments (id, request_id, volunteer_id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id.to_string(),
                    request_id.to_string(),
                    volunteer_id.to_string(),
                    state.as_str(),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_assignment: {e}")))?;

        debug!(%id, %request_id, %volunteer_id, state = state.as_str(), "Assignment created");
        Ok(Assignment {
            id,
            request_id,
            volunteer_id,
            state,
            created_at: now,
            updated_at: now,
        })
    }

    async fn find_assignment(
        &self,
        request_id: Uuid,
        volunteer_id: Uuid,
    ) -> Result<Option<Assignment>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                     WHERE request_id = ?1 AND volunteer_id = ?2"
                ),
                params![request_id.to_string(), volunteer_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("find_assignment: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("find_assignment: {e}")))?
        {
            Some(row) => Ok(Some(map_row(row_to_assignment(&row), "find_assignment")?)),
            None => Ok(None),
        }
    }

    async fn assignments_by_request(
        &self,
        request_id: Uuid,
        state: Option<AssignmentState>,
    ) -> Result<Vec<Assignment>, StoreError> {
        let mut rows = match state {
            Some(state) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                         WHERE request_id = ?1 AND state = ?2 ORDER BY created_at ASC"
                    ),
                    params![request_id.to_string(), state.as_str()],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                         WHERE request_id = ?1 ORDER BY created_at ASC"
                    ),
                    params![request_id.to_string()],
                )
                .await,
        }
        .map_err(|e| StoreError::Query(format!("assignments_by_request: {e}")))?;

        let mut assignments = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_assignment(&row) {
                Ok(assignment) => assignments.push(assignment),
                Err(e) => tracing::warn!("Skipping assignment row: {e}"),
            }
        }
        Ok(assignments)
    }

    async fn pending_assignments(
        &self,
        volunteer_id: Uuid,
    ) -> Result<Vec<Assignment>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                     WHERE volunteer_id = ?1 AND state = 'awaiting_response'
                     ORDER BY created_at ASC"
                ),
                params![volunteer_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("pending_assignments: {e}")))?;

        let mut assignments = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_assignment(&row) {
                Ok(assignment) => assignments.push(assignment),
                Err(e) => tracing::warn!("Skipping assignment row: {e}"),
            }
        }
        Ok(assignments)
    }

    async fn resolved_assignments(
        &self,
        volunteer_id: Uuid,
    ) -> Result<Vec<Assignment>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                     WHERE volunteer_id = ?1 AND state IN ('accepted', 'rejected')
                     ORDER BY updated_at DESC"
                ),
                params![volunteer_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("resolved_assignments: {e}")))?;

        let mut assignments = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_assignment(&row) {
                Ok(assignment) => assignments.push(assignment),
                Err(e) => tracing::warn!("Skipping assignment row: {e}"),
            }
        }
        Ok(assignments)
    }

    async fn count_assignments(
        &self,
        request_id: Uuid,
        state: AssignmentState,
    ) -> Result<u32, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM assignments WHERE request_id = ?1 AND state = ?2",
                params![request_id.to_string(), state.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("count_assignments: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("count_assignments: {e}")))?;

        match row {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("count_assignments: {e}")))?;
                Ok(count.max(0) as u32)
            }
            None => Ok(0),
        }
    }

    async fn transition_assignment(
        &self,
        id: Uuid,
        from: AssignmentState,
        to: AssignmentState,
    ) -> Result<Assignment, StoreError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE assignments SET state = ?1, updated_at = ?2
                 WHERE id = ?3 AND state = ?4",
                params![to.as_str(), now, id.to_string(), from.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("transition_assignment: {e}")))?;

        if changed == 0 {
            return match self.assignment_by_id(id).await? {
                Some(_) => Err(StoreError::Conflict {
                    entity: "assignment",
                    id,
                }),
                None => Err(StoreError::NotFound {
                    entity: "assignment",
                    id,
                }),
            };
        }

        debug!(%id, from = from.as_str(), to = to.as_str(), "Assignment transitioned");
        self.assignment_by_id(id).await?.ok_or(StoreError::NotFound {
            entity: "assignment",
            id,
        })
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO messages (id, direction, channel, message_type, state, text,
                    volunteer_id, request_id, creator_id, external_id, read_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11)",
                params![
                    id.to_string(),
                    new.direction.as_str(),
                    new.channel.as_str(),
                    new.message_type.as_str(),
                    new.state.as_str(),
                    new.text.as_str(),
                    new.volunteer_id.to_string(),
                    opt_text(new.request_id.map(|r| r.to_string()).as_deref()),
                    opt_text(new.creator_id.map(|c| c.to_string()).as_deref()),
                    opt_text(new.external_id.as_deref()),
                    new.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_message: {e}")))?;

        debug!(%id, direction = new.direction.as_str(), channel = new.channel.as_str(),
               "Message created");
        Ok(Message {
            id,
            direction: new.direction,
            channel: new.channel,
            message_type: new.message_type,
            state: new.state,
            text: new.text,
            volunteer_id: new.volunteer_id,
            request_id: new.request_id,
            creator_id: new.creator_id,
            external_id: new.external_id,
            read_at: None,
            created_at: new.created_at,
        })
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_message: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_message: {e}")))?
        {
            Some(row) => Ok(Some(map_row(row_to_message(&row), "get_message")?)),
            None => Ok(None),
        }
    }

    async fn message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE external_id = ?1"),
                params![external_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("message_by_external_id: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("message_by_external_id: {e}")))?
        {
            Some(row) => Ok(Some(map_row(row_to_message(&row), "message_by_external_id")?)),
            None => Ok(None),
        }
    }

    async fn unread_incoming(&self) -> Result<Vec<Message>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE direction = 'incoming' AND read_at IS NULL
                     ORDER BY created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("unread_incoming: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_message(&row) {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!("Skipping message row: {e}"),
            }
        }
        Ok(messages)
    }

    async fn mark_message_read(&self, id: Uuid) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE messages SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_message_read: {e}")))?;
        Ok(())
    }

    async fn mark_message_sent(&self, id: Uuid) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE messages SET state = 'sent' WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_message_sent: {e}")))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
