// ABOUTME: SQLite-backed server registry for Mongo Warden
// ABOUTME: Stores server definitions, the current-primary pointer, the sync schedule, and history

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

use crate::models::{HistoryEntry, NewServer, ServerDefinition, ServerPatch, SyncSchedule};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid server definition: {0}")]
    Validation(String),
    #[error("Server id already exists: {0}")]
    Duplicate(String),
    #[error("Server not found: {0}")]
    NotFound(String),
    #[error("Cannot delete the current primary server: {0}")]
    PrimaryDeletion(String),
}

const CURRENT_PRIMARY_KEY: &str = "current_primary";

pub struct RegistryStore {
    conn: Mutex<Connection>,
}

impl RegistryStore {
    /// Open or create the registry database at the given path
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    /// In-memory registry, used by tests
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<(), RegistryError> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Registered MongoDB servers
            CREATE TABLE IF NOT EXISTS servers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL DEFAULT 27017,
                db_name TEXT NOT NULL,
                username TEXT,
                password TEXT,
                description TEXT,
                active INTEGER DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Single-valued state (current-primary pointer, schema version)
            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Sync schedule (single row, JSON blob)
            CREATE TABLE IF NOT EXISTS sync_schedule (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL
            );

            -- History table
            CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                operation_type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                details TEXT,
                results TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history(timestamp);
            "#,
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO sync_schedule (id, data) VALUES (1, ?)",
            params![serde_json::to_string(&SyncSchedule::default())?],
        )?;

        Ok(())
    }

    // ===== Servers =====

    /// Get all registered servers, active first
    pub fn list_servers(&self) -> Result<Vec<ServerDefinition>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, host, port, db_name, username, password, description, active, created_at, updated_at
             FROM servers ORDER BY active DESC, name",
        )?;

        let servers = stmt
            .query_map([], row_to_server)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(servers)
    }

    /// Get a single server by id
    pub fn get_server(&self, id: &str) -> Result<Option<ServerDefinition>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, host, port, db_name, username, password, description, active, created_at, updated_at
             FROM servers WHERE id = ?",
        )?;
        Ok(stmt.query_row(params![id], row_to_server).optional()?)
    }

    /// Register a new server definition
    pub fn create_server(&self, new: &NewServer) -> Result<ServerDefinition, RegistryError> {
        if new.id.trim().is_empty() {
            return Err(RegistryError::Validation("server id is required".into()));
        }
        let host = match new.host.as_deref().map(str::trim) {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(RegistryError::Validation("host is required".into())),
        };
        let port = new
            .port
            .ok_or_else(|| RegistryError::Validation("port is required".into()))?;
        let database = match new.database.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => return Err(RegistryError::Validation("database name is required".into())),
        };

        let now = Utc::now();
        let def = ServerDefinition {
            id: new.id.trim().to_string(),
            name: new.name.clone().unwrap_or_else(|| new.id.trim().to_string()),
            host,
            port,
            database,
            username: new.username.clone().filter(|u| !u.is_empty()),
            password: new.password.clone().filter(|p| !p.is_empty()),
            description: new.description.clone(),
            active: new.active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO servers (id, name, host, port, db_name, username, password, description, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                def.id,
                def.name,
                def.host,
                def.port,
                def.database,
                def.username,
                def.password,
                def.description,
                if def.active { 1 } else { 0 },
                def.created_at.to_rfc3339(),
                def.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(def),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(RegistryError::Duplicate(def.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a partial update to an existing server
    pub fn update_server(
        &self,
        id: &str,
        patch: &ServerPatch,
    ) -> Result<ServerDefinition, RegistryError> {
        let mut def = self
            .get_server(id)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if let Some(name) = &patch.name {
            def.name = name.clone();
        }
        if let Some(host) = &patch.host {
            if host.trim().is_empty() {
                return Err(RegistryError::Validation("host cannot be empty".into()));
            }
            def.host = host.trim().to_string();
        }
        if let Some(port) = patch.port {
            def.port = port;
        }
        if let Some(database) = &patch.database {
            if database.trim().is_empty() {
                return Err(RegistryError::Validation("database name cannot be empty".into()));
            }
            def.database = database.trim().to_string();
        }
        if let Some(username) = &patch.username {
            def.username = Some(username.clone()).filter(|u| !u.is_empty());
        }
        if let Some(password) = &patch.password {
            def.password = Some(password.clone()).filter(|p| !p.is_empty());
        }
        if let Some(description) = &patch.description {
            def.description = Some(description.clone());
        }
        if let Some(active) = patch.active {
            def.active = active;
        }
        def.updated_at = Utc::now();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE servers SET name = ?, host = ?, port = ?, db_name = ?, username = ?, password = ?, description = ?, active = ?, updated_at = ? WHERE id = ?",
            params![
                def.name,
                def.host,
                def.port,
                def.database,
                def.username,
                def.password,
                def.description,
                if def.active { 1 } else { 0 },
                def.updated_at.to_rfc3339(),
                def.id,
            ],
        )?;

        Ok(def)
    }

    /// Delete a server; the current primary cannot be deleted
    pub fn delete_server(&self, id: &str) -> Result<(), RegistryError> {
        // check and delete under one lock acquisition so a concurrent
        // promotion cannot land in between
        let conn = self.conn.lock().unwrap();
        let primary: Option<String> = conn
            .query_row(
                "SELECT value FROM state WHERE key = ?",
                params![CURRENT_PRIMARY_KEY],
                |row| row.get(0),
            )
            .optional()?;
        if primary.as_deref() == Some(id) {
            return Err(RegistryError::PrimaryDeletion(id.to_string()));
        }

        let deleted = conn.execute("DELETE FROM servers WHERE id = ?", params![id])?;
        if deleted == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    // ===== Current primary =====

    /// Id of the current primary server, if one has been promoted
    pub fn current_primary_id(&self) -> Result<Option<String>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT value FROM state WHERE key = ?",
                params![CURRENT_PRIMARY_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    }

    /// The current primary server definition, if any
    pub fn get_current_primary(&self) -> Result<Option<ServerDefinition>, RegistryError> {
        match self.current_primary_id()? {
            Some(id) => self.get_server(&id),
            None => Ok(None),
        }
    }

    /// Move the current-primary pointer. Only the switch coordinator calls this;
    /// the existence check and the pointer write share one lock acquisition so
    /// the pointer can never reference a server deleted in between.
    pub(crate) fn set_primary(&self, id: &str) -> Result<(), RegistryError> {
        let conn = self.conn.lock().unwrap();
        let active: Option<bool> = conn
            .query_row(
                "SELECT active FROM servers WHERE id = ?",
                params![id],
                |row| Ok(row.get::<_, i32>(0)? == 1),
            )
            .optional()?;
        match active {
            None => return Err(RegistryError::NotFound(id.to_string())),
            Some(false) => {
                return Err(RegistryError::Validation(format!(
                    "server '{}' is not active",
                    id
                )))
            }
            Some(true) => {}
        }

        conn.execute(
            "INSERT OR REPLACE INTO state (key, value) VALUES (?, ?)",
            params![CURRENT_PRIMARY_KEY, id],
        )?;
        Ok(())
    }

    // ===== Sync schedule =====

    /// Get the persisted sync schedule
    pub fn get_sync_schedule(&self) -> Result<SyncSchedule, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let data: String = conn.query_row(
            "SELECT data FROM sync_schedule WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Replace the persisted sync schedule after validating it
    pub fn set_sync_schedule(&self, schedule: &SyncSchedule) -> Result<(), RegistryError> {
        if schedule.enabled {
            if schedule.source_id.trim().is_empty() {
                return Err(RegistryError::Validation(
                    "an enabled schedule requires a source server".into(),
                ));
            }
            if schedule.target_ids.is_empty() {
                return Err(RegistryError::Validation(
                    "an enabled schedule requires at least one target server".into(),
                ));
            }
            if schedule.interval_minutes < 5 {
                return Err(RegistryError::Validation(
                    "schedule interval must be at least 5 minutes".into(),
                ));
            }
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sync_schedule SET data = ? WHERE id = 1",
            params![serde_json::to_string(schedule)?],
        )?;
        Ok(())
    }

    // ===== History =====

    /// Get history entries, newest first
    pub fn get_history(&self, limit: Option<u32>) -> Result<Vec<HistoryEntry>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, operation_type, timestamp, details, results
             FROM history ORDER BY timestamp DESC LIMIT ?",
        )?;

        let entries = stmt
            .query_map(params![limit.map(i64::from).unwrap_or(-1)], |row| {
                let details_json: Option<String> = row.get(3)?;
                let results_json: Option<String> = row.get(4)?;

                Ok(HistoryEntry {
                    id: row.get(0)?,
                    operation_type: row.get(1)?,
                    timestamp: row
                        .get::<_, String>(2)?
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                    details: details_json.and_then(|j| serde_json::from_str(&j).ok()),
                    results: results_json.and_then(|j| serde_json::from_str(&j).ok()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Add a history entry
    pub fn add_history(&self, entry: &HistoryEntry) -> Result<(), RegistryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO history (id, operation_type, timestamp, details, results) VALUES (?, ?, ?, ?, ?)",
            params![
                entry.id,
                entry.operation_type,
                entry.timestamp.to_rfc3339(),
                entry
                    .details
                    .as_ref()
                    .and_then(|d| serde_json::to_string(d).ok()),
                entry
                    .results
                    .as_ref()
                    .and_then(|r| serde_json::to_string(r).ok()),
            ],
        )?;
        Ok(())
    }

    /// Trim history to max entries, returning how many were removed
    pub fn trim_history(&self, max_entries: u32) -> Result<u32, RegistryError> {
        let conn = self.conn.lock().unwrap();

        let count: u32 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        if count <= max_entries {
            return Ok(0);
        }

        let to_delete = count - max_entries;
        conn.execute(
            "DELETE FROM history WHERE id IN (
                SELECT id FROM history ORDER BY timestamp ASC LIMIT ?
            )",
            params![to_delete],
        )?;

        Ok(to_delete)
    }

    /// Raw SQL escape hatch for seeding malformed rows in tests
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), RegistryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        Ok(())
    }
}

fn row_to_server(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerDefinition> {
    Ok(ServerDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        host: row.get(2)?,
        port: row.get(3)?,
        database: row.get(4)?,
        username: row.get(5)?,
        password: row.get(6)?,
        description: row.get(7)?,
        active: row.get::<_, i32>(8)? == 1,
        created_at: row
            .get::<_, String>(9)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
        updated_at: row
            .get::<_, String>(10)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_server(id: &str) -> NewServer {
        NewServer {
            id: id.to_string(),
            name: Some(format!("Server {}", id)),
            host: Some("localhost".to_string()),
            port: Some(27017),
            database: Some("admin_app".to_string()),
            username: None,
            password: None,
            description: None,
            active: Some(true),
        }
    }

    #[test]
    fn create_and_list_servers() {
        let store = RegistryStore::open_in_memory().unwrap();
        store.create_server(&new_server("alpha")).unwrap();
        store.create_server(&new_server("beta")).unwrap();

        let servers = store.list_servers().unwrap();
        assert_eq!(servers.len(), 2);
        assert!(servers.iter().any(|s| s.id == "alpha"));
    }

    #[test]
    fn duplicate_id_is_rejected_and_registry_unchanged() {
        let store = RegistryStore::open_in_memory().unwrap();
        store.create_server(&new_server("alpha")).unwrap();

        let err = store.create_server(&new_server("alpha")).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
        assert_eq!(store.list_servers().unwrap().len(), 1);
    }

    #[test]
    fn missing_host_fails_validation() {
        let store = RegistryStore::open_in_memory().unwrap();
        let mut def = new_server("alpha");
        def.host = None;
        let err = store.create_server(&def).unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));

        def.host = Some("  ".to_string());
        let err = store.create_server(&def).unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[test]
    fn update_unknown_server_is_not_found() {
        let store = RegistryStore::open_in_memory().unwrap();
        let err = store
            .update_server("ghost", &ServerPatch::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn update_applies_only_patched_fields() {
        let store = RegistryStore::open_in_memory().unwrap();
        store.create_server(&new_server("alpha")).unwrap();

        let patch = ServerPatch {
            host: Some("db.internal".to_string()),
            ..Default::default()
        };
        let updated = store.update_server("alpha", &patch).unwrap();
        assert_eq!(updated.host, "db.internal");
        assert_eq!(updated.port, 27017);
        assert_eq!(updated.database, "admin_app");
    }

    #[test]
    fn primary_pointer_is_single_valued() {
        let store = RegistryStore::open_in_memory().unwrap();
        store.create_server(&new_server("alpha")).unwrap();
        store.create_server(&new_server("beta")).unwrap();

        assert!(store.get_current_primary().unwrap().is_none());

        store.set_primary("alpha").unwrap();
        assert_eq!(store.current_primary_id().unwrap().as_deref(), Some("alpha"));

        store.set_primary("beta").unwrap();
        assert_eq!(store.current_primary_id().unwrap().as_deref(), Some("beta"));
        // pointer moved, alpha implicitly demoted
        let primary = store.get_current_primary().unwrap().unwrap();
        assert_eq!(primary.id, "beta");
    }

    #[test]
    fn inactive_server_cannot_become_primary() {
        let store = RegistryStore::open_in_memory().unwrap();
        let mut def = new_server("alpha");
        def.active = Some(false);
        store.create_server(&def).unwrap();

        let err = store.set_primary("alpha").unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
        assert!(store.current_primary_id().unwrap().is_none());
    }

    #[test]
    fn deleting_the_primary_is_forbidden() {
        let store = RegistryStore::open_in_memory().unwrap();
        store.create_server(&new_server("alpha")).unwrap();
        store.set_primary("alpha").unwrap();

        let err = store.delete_server("alpha").unwrap_err();
        assert!(matches!(err, RegistryError::PrimaryDeletion(_)));
        assert!(store.get_server("alpha").unwrap().is_some());
    }

    #[test]
    fn deleting_a_secondary_succeeds() {
        let store = RegistryStore::open_in_memory().unwrap();
        store.create_server(&new_server("alpha")).unwrap();
        store.create_server(&new_server("beta")).unwrap();
        store.set_primary("alpha").unwrap();

        store.delete_server("beta").unwrap();
        assert!(store.get_server("beta").unwrap().is_none());

        let err = store.delete_server("beta").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn concurrent_promotion_and_deletion_keep_the_pointer_valid() {
        use std::sync::Arc;

        let store = Arc::new(RegistryStore::open_in_memory().unwrap());
        store.create_server(&new_server("alpha")).unwrap();
        store.create_server(&new_server("beta")).unwrap();
        store.set_primary("alpha").unwrap();

        let promoter = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let _ = store.set_primary("beta");
                    let _ = store.set_primary("alpha");
                }
            })
        };
        let deleter = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let _ = store.delete_server("beta");
                    let _ = store.create_server(&new_server("beta"));
                }
            })
        };
        promoter.join().unwrap();
        deleter.join().unwrap();

        // whatever interleaving happened, the pointer must reference a
        // currently registered server
        let primary = store.current_primary_id().unwrap().unwrap();
        assert!(store.get_server(&primary).unwrap().is_some());
    }

    #[test]
    fn schedule_round_trips_and_validates() {
        let store = RegistryStore::open_in_memory().unwrap();

        let default = store.get_sync_schedule().unwrap();
        assert!(!default.enabled);

        let schedule = SyncSchedule {
            enabled: true,
            interval_minutes: 30,
            start_at: None,
            source_id: "alpha".to_string(),
            target_ids: vec!["beta".to_string()],
            drop_before_insert: true,
        };
        store.set_sync_schedule(&schedule).unwrap();
        let loaded = store.get_sync_schedule().unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.interval_minutes, 30);
        assert_eq!(loaded.target_ids, vec!["beta".to_string()]);

        let bad = SyncSchedule {
            target_ids: vec![],
            ..schedule.clone()
        };
        assert!(matches!(
            store.set_sync_schedule(&bad),
            Err(RegistryError::Validation(_))
        ));

        let bad = SyncSchedule {
            interval_minutes: 1,
            ..schedule
        };
        assert!(matches!(
            store.set_sync_schedule(&bad),
            Err(RegistryError::Validation(_))
        ));
    }

    #[test]
    fn history_is_trimmed_oldest_first() {
        let store = RegistryStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .add_history(&HistoryEntry {
                    id: format!("h{}", i),
                    operation_type: "switch".to_string(),
                    timestamp: Utc::now() + chrono::Duration::seconds(i as i64),
                    details: None,
                    results: None,
                })
                .unwrap();
        }

        let removed = store.trim_history(3).unwrap();
        assert_eq!(removed, 2);
        let entries = store.get_history(None).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].id, "h4");
    }
}
