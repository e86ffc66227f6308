//! SQLite-backed project store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::entries::{append_entry, decode_list};
use super::{
    CreateProjectRequest, EligibleQuery, FieldMap, FieldValue, Project, ProjectFilter, ProjectId,
    ProjectList, ProjectStore, ProjectUpdate, StatusCount, StoreError,
};

/// How long a writer waits for another connection's lock before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SELECT_COLUMNS: &str = "id, status, errors, warnings, fields, created_at, updated_at";

/// SQLite-backed project store.
///
/// Read-modify-write operations run inside `BEGIN IMMEDIATE` transactions, so
/// several stores (or processes) opened on the same file never lose writes.
pub struct SqliteProjectStore {
    conn: Mutex<Connection>,
}

impl SqliteProjectStore {
    /// Open a store on a database file, creating the file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        Self::open(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open a store on a database file with an explicit lock wait.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "Opened project database");
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite project store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT,
                errors TEXT NOT NULL DEFAULT '',
                warnings TEXT NOT NULL DEFAULT '',
                fields TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
        let id: ProjectId = row.get(0)?;
        let status: Option<String> = row.get(1)?;
        let errors: String = row.get(2)?;
        let warnings: String = row.get(3)?;
        let fields_json: String = row.get(4)?;
        let created_at_str: String = row.get(5)?;
        let updated_at_str: String = row.get(6)?;

        let fields: FieldMap = serde_json::from_str(&fields_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

        Ok(Project {
            id,
            status,
            errors: decode_list(&errors),
            warnings: decode_list(&warnings),
            fields,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    fn fetch(conn: &Connection, id: ProjectId) -> Result<Option<Project>, StoreError> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?", SELECT_COLUMNS);
        let project = conn
            .query_row(&sql, params![id], Self::row_to_project)
            .optional()?;
        Ok(project)
    }

    fn fetch_existing(conn: &Connection, id: ProjectId) -> Result<Project, StoreError> {
        Self::fetch(conn, id)?.ok_or(StoreError::NotFound(id))
    }

    fn query_projects(
        conn: &Connection,
        sql: &str,
        params: Vec<Box<dyn rusqlite::ToSql>>,
    ) -> Result<Vec<Project>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_project)?;

        let mut projects = Vec::new();
        for row_result in rows {
            projects.push(row_result?);
        }
        Ok(projects)
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn json_path(key: &str) -> Result<String, StoreError> {
    if key.is_empty() || key.contains('"') || key.contains('\\') {
        return Err(StoreError::InvalidRequest(format!(
            "unsupported field key: {:?}",
            key
        )));
    }
    Ok(format!("$.\"{}\"", key))
}

/// JSON has no encoding for NaN or infinity; such a value would not read back.
fn check_fields(fields: &FieldMap) -> Result<(), StoreError> {
    for (key, value) in fields {
        if let FieldValue::Real(x) = value {
            if !x.is_finite() {
                return Err(StoreError::InvalidRequest(format!(
                    "field {:?} is not a finite number: {}",
                    key, x
                )));
            }
        }
    }
    Ok(())
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit
        .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
        .unwrap_or(-1)
}

impl ProjectStore for SqliteProjectStore {
    fn create(&self, request: CreateProjectRequest) -> Result<Project, StoreError> {
        check_fields(&request.fields)?;
        let conn = self.lock()?;

        let now = Utc::now();
        let fields_json = serde_json::to_string(&request.fields)?;

        conn.execute(
            "INSERT INTO projects (status, errors, warnings, fields, created_at, updated_at) VALUES (NULL, '', '', ?, ?, ?)",
            params![fields_json, now.to_rfc3339(), now.to_rfc3339()],
        )?;

        Ok(Project {
            id: conn.last_insert_rowid(),
            status: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            fields: request.fields,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn update(&self, id: ProjectId, update: ProjectUpdate) -> Result<Project, StoreError> {
        check_fields(&update.fields)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = Self::fetch_existing(&tx, id)?;
        if update.is_empty() {
            return Ok(current);
        }

        let mut fields = current.fields.clone();
        fields.extend(update.fields);
        let status = update.status.or(current.status.clone());
        let fields_json = serde_json::to_string(&fields)?;
        let now = Utc::now();

        tx.execute(
            "UPDATE projects SET status = ?, fields = ?, updated_at = ? WHERE id = ?",
            params![status, fields_json, now.to_rfc3339(), id],
        )?;
        tx.commit()?;

        Ok(Project {
            status,
            fields,
            updated_at: now,
            ..current
        })
    }

    fn append_to_list(
        &self,
        id: ProjectId,
        list: ProjectList,
        text: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let column = list.column();
        let stored: Option<String> = tx
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?", column),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let stored = stored.ok_or(StoreError::NotFound(id))?;

        tx.execute(
            &format!(
                "UPDATE projects SET {} = ?, updated_at = ? WHERE id = ?",
                column
            ),
            params![append_entry(&stored, text), Utc::now().to_rfc3339(), id],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn list_eligible(&self, query: &EligibleQuery) -> Result<Vec<Project>, StoreError> {
        let conn = self.lock()?;

        let mut conditions = vec!["status = ?", "errors = ''"];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(query.prerequisite.clone())];

        if let Some(min_id) = query.min_id {
            conditions.push("id >= ?");
            params.push(Box::new(min_id));
        } else if let Some(start_row) = query.start_row {
            // Past the end of the table the subquery yields NULL and nothing matches.
            conditions.push("id >= (SELECT id FROM projects ORDER BY id ASC LIMIT 1 OFFSET ?)");
            params.push(Box::new(sql_limit(Some(start_row.saturating_sub(1)))));
        }
        params.push(Box::new(sql_limit(query.limit)));

        let sql = format!(
            "SELECT {} FROM projects WHERE {} ORDER BY id ASC LIMIT ?",
            SELECT_COLUMNS,
            conditions.join(" AND ")
        );

        Self::query_projects(&conn, &sql, params)
    }

    fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError> {
        let conn = self.lock()?;

        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.clone()));
        }
        if filter.blocked_only {
            conditions.push("errors != ''");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let sql = format!(
            "SELECT {} FROM projects {} ORDER BY id ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        Self::query_projects(&conn, &sql, params)
    }

    fn exists_with_field(&self, key: &str, value: &FieldValue) -> Result<bool, StoreError> {
        let path = json_path(key)?;
        let conn = self.lock()?;

        let mut stmt =
            conn.prepare("SELECT fields FROM projects WHERE json_type(fields, ?) IS NOT NULL")?;
        let rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;

        for row_result in rows {
            let fields: FieldMap = serde_json::from_str(&row_result?)?;
            if fields.get(key) == Some(value) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn status_counts(&self) -> Result<Vec<StatusCount>, StoreError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT status,
                    SUM(CASE WHEN errors = '' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN errors != '' THEN 1 ELSE 0 END)
             FROM projects GROUP BY status ORDER BY status ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StatusCount {
                status: row.get(0)?,
                clean: row.get::<_, i64>(1)?.max(0) as u64,
                blocked: row.get::<_, i64>(2)?.max(0) as u64,
            })
        })?;

        let mut counts = Vec::new();
        for row_result in rows {
            counts.push(row_result?);
        }
        Ok(counts)
    }

    fn clear_list(&self, id: ProjectId, list: ProjectList) -> Result<Project, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            &format!(
                "UPDATE projects SET {} = '', updated_at = ? WHERE id = ?",
                list.column()
            ),
            params![Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }

        let project = Self::fetch_existing(&tx, id)?;
        tx.commit()?;
        Ok(project)
    }

    fn delete(&self, id: ProjectId) -> Result<Project, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let project = Self::fetch_existing(&tx, id)?;
        tx.execute("DELETE FROM projects WHERE id = ?", params![id])?;
        tx.commit()?;

        Ok(project)
    }

    fn clear_all(&self) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deleted = tx.execute("DELETE FROM projects", [])?;
        tx.execute("DELETE FROM sqlite_sequence WHERE name = 'projects'", [])?;
        tx.commit()?;

        Ok(deleted)
    }
}
