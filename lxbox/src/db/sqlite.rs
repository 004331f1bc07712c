//! SQLite-backed store.

use super::ContainerStore;
use crate::config::{ConfigMap, Profile};
use crate::container::ContainerArgs;
use crate::device::DeviceSet;
use crate::errors::{LxboxError, LxboxResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    architecture TEXT NOT NULL,
    ctype TEXT NOT NULL,
    driver TEXT NOT NULL,
    ephemeral INTEGER NOT NULL DEFAULT 0,
    stateful INTEGER NOT NULL DEFAULT 0,
    creation_date TEXT NOT NULL,
    last_use_date TEXT,
    profiles TEXT NOT NULL,
    config TEXT NOT NULL,
    devices TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS profiles (
    name TEXT PRIMARY KEY,
    config TEXT NOT NULL,
    devices TEXT NOT NULL
);
";

const CONTAINER_COLUMNS: &str = "id, name, architecture, ctype, driver, ephemeral, stateful, \
     creation_date, last_use_date, profiles, config, devices";

/// Raw container row, decoded after the statement is finished.
struct ContainerRow {
    id: i64,
    name: String,
    architecture: String,
    ctype: String,
    driver: String,
    ephemeral: bool,
    stateful: bool,
    creation_date: String,
    last_use_date: Option<String>,
    profiles: String,
    config: String,
    devices: String,
}

impl ContainerRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            architecture: row.get(2)?,
            ctype: row.get(3)?,
            driver: row.get(4)?,
            ephemeral: row.get(5)?,
            stateful: row.get(6)?,
            creation_date: row.get(7)?,
            last_use_date: row.get(8)?,
            profiles: row.get(9)?,
            config: row.get(10)?,
            devices: row.get(11)?,
        })
    }

    fn decode(self) -> LxboxResult<ContainerArgs> {
        Ok(ContainerArgs {
            id: self.id,
            name: self.name,
            ephemeral: self.ephemeral,
            architecture: self.architecture.parse()?,
            ctype: self.ctype.parse()?,
            driver: self.driver.parse()?,
            stateful: self.stateful,
            creation_date: parse_time(&self.creation_date)?,
            last_used_date: self.last_use_date.as_deref().map(parse_time).transpose()?,
            profiles: serde_json::from_str(&self.profiles)?,
            config: serde_json::from_str(&self.config)?,
            devices: serde_json::from_str(&self.devices)?,
        })
    }
}

fn parse_time(raw: &str) -> LxboxResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LxboxError::Database(format!("invalid timestamp {:?}: {}", raw, e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Store backed by one SQLite database.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> LxboxResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            LxboxError::Database(format!("failed to open {}: {}", path.display(), e))
        })?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::trace!(path = %path.display(), journal_mode = %mode, "Opened database");
        Self::with_connection(conn)
    }

    /// Throwaway database, mostly for tests.
    pub fn open_in_memory() -> LxboxResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> LxboxResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn expect_one(changed: usize, name: &str) -> LxboxResult<()> {
        if changed == 0 {
            return Err(LxboxError::NotFound(format!("container {}", name)));
        }
        Ok(())
    }
}

impl ContainerStore for SqliteStore {
    fn container_insert(&self, args: &ContainerArgs) -> LxboxResult<i64> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO containers (name, architecture, ctype, driver, ephemeral, stateful, \
             creation_date, last_use_date, profiles, config, devices) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                args.name,
                args.architecture.as_str(),
                args.ctype.as_str(),
                args.driver.as_str(),
                args.ephemeral,
                args.stateful,
                args.creation_date.to_rfc3339(),
                args.last_used_date.map(|t| t.to_rfc3339()),
                serde_json::to_string(&args.profiles)?,
                serde_json::to_string(&args.config)?,
                serde_json::to_string(&args.devices)?,
            ],
        );

        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                tracing::debug!(container = %args.name, id, "Inserted container record");
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => Err(LxboxError::AlreadyExists(format!(
                "container {}",
                args.name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn container_get(&self, name: &str) -> LxboxResult<Option<ContainerArgs>> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {} FROM containers WHERE name = ?1", CONTAINER_COLUMNS),
                params![name],
                ContainerRow::from_row,
            )
            .optional()?
        };
        row.map(ContainerRow::decode).transpose()
    }

    fn container_update(&self, name: &str, args: &ContainerArgs) -> LxboxResult<()> {
        let changed = self.conn.lock().execute(
            "UPDATE containers SET architecture = ?1, ephemeral = ?2, profiles = ?3, \
             config = ?4, devices = ?5 WHERE name = ?6",
            params![
                args.architecture.as_str(),
                args.ephemeral,
                serde_json::to_string(&args.profiles)?,
                serde_json::to_string(&args.config)?,
                serde_json::to_string(&args.devices)?,
                name,
            ],
        )?;
        Self::expect_one(changed, name)
    }

    fn container_set_stateful(&self, name: &str, stateful: bool) -> LxboxResult<()> {
        let changed = self.conn.lock().execute(
            "UPDATE containers SET stateful = ?1 WHERE name = ?2",
            params![stateful, name],
        )?;
        Self::expect_one(changed, name)
    }

    fn container_touch(&self, name: &str, when: DateTime<Utc>) -> LxboxResult<()> {
        let changed = self.conn.lock().execute(
            "UPDATE containers SET last_use_date = ?1 WHERE name = ?2",
            params![when.to_rfc3339(), name],
        )?;
        Self::expect_one(changed, name)
    }

    fn container_remove(&self, name: &str) -> LxboxResult<()> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM containers WHERE name = ?1", params![name])?;
        tracing::debug!(container = %name, removed, "Removed container record");
        Ok(())
    }

    fn container_names(&self) -> LxboxResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM containers ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn profile_get(&self, name: &str) -> LxboxResult<Option<Profile>> {
        let row: Option<(String, String)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT config, devices FROM profiles WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        row.map(|(config, devices)| {
            Ok(Profile {
                name: name.to_string(),
                config: serde_json::from_str::<ConfigMap>(&config)?,
                devices: serde_json::from_str::<DeviceSet>(&devices)?,
            })
        })
        .transpose()
    }

    fn profile_put(&self, profile: &Profile) -> LxboxResult<()> {
        self.conn.lock().execute(
            "INSERT INTO profiles (name, config, devices) VALUES (?1, ?2, ?3) \
             ON CONFLICT(name) DO UPDATE SET config = excluded.config, devices = excluded.devices",
            params![
                profile.name,
                serde_json::to_string(&profile.config)?,
                serde_json::to_string(&profile.devices)?,
            ],
        )?;
        Ok(())
    }

    fn profile_names(&self) -> LxboxResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM profiles ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}
