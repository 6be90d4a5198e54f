//! Persistent bot state in SQLite.
//!
//! Storage: `<servicex_home>/servicex.db` unless the config names another
//! path.
//!
//! Holds the small amount of state that outlives a connection: known
//! networks, the channels to rejoin on sign-on, and which extensions are
//! enabled per network.  Scheduled tasks live only in memory.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use rusqlite::{params, Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A network row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: i64,
    pub name: String,
    pub nicknames: Vec<String>,
    pub command_trigger: String,
}

/// SQLite-backed store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database at `db_path` and make sure the schema
    /// exists.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!(path = %db_path.display(), "connected to database");
        Ok(store)
    }

    /// In-memory database (tests and dry runs).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create tables if they do not exist.
    pub fn init_schema(&self) -> anyhow::Result<()> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS networks (
                id              INTEGER PRIMARY KEY,
                name            TEXT NOT NULL,
                nicknames       TEXT NOT NULL,
                command_trigger TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS channels (
                network_id INTEGER NOT NULL,
                name       TEXT NOT NULL,
                PRIMARY KEY (network_id, name)
            );
            CREATE TABLE IF NOT EXISTS extensions (
                network_id INTEGER NOT NULL,
                name       TEXT NOT NULL,
                enabled    INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (network_id, name)
            );",
        )?;
        Ok(())
    }

    pub fn get_networks(&self) -> anyhow::Result<Vec<NetworkRecord>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, nicknames, command_trigger FROM networks ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let nicknames: String = row.get(2)?;
            Ok(NetworkRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                nicknames: nicknames
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(String::from)
                    .collect(),
                command_trigger: row.get(3)?,
            })
        })?;
        let mut networks = Vec::new();
        for row in rows {
            networks.push(row?);
        }
        Ok(networks)
    }

    /// Insert or replace a network row.
    pub fn upsert_network(&self, network: &NetworkRecord) -> anyhow::Result<()> {
        self.conn().execute(
            "INSERT INTO networks (id, name, nicknames, command_trigger)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                nicknames = excluded.nicknames,
                command_trigger = excluded.command_trigger",
            params![
                network.id,
                network.name,
                network.nicknames.join(", "),
                network.command_trigger
            ],
        )?;
        Ok(())
    }

    /// Saved channels for a network, in the order they were added.
    pub fn get_channels(&self, network_id: i64) -> anyhow::Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name FROM channels WHERE network_id = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map([network_id], |row| row.get::<_, String>(0))?;
        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    /// Save a channel.  Saving one that is already present is a no-op.
    pub fn add_channel(&self, network_id: i64, channel: &str) -> anyhow::Result<()> {
        let result = self.conn().execute(
            "INSERT INTO channels (network_id, name) VALUES (?1, ?2)",
            params![network_id, channel],
        );
        match result {
            Ok(_) => {
                info!(network_id, channel, "added channel to database");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                info!(network_id, channel, "channel already in database");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove_channel(&self, network_id: i64, channel: &str) -> anyhow::Result<()> {
        self.conn().execute(
            "DELETE FROM channels WHERE network_id = ?1 AND name = ?2",
            params![network_id, channel],
        )?;
        info!(network_id, channel, "removed channel from database");
        Ok(())
    }

    /// Names of enabled extensions for a network, in the order they were
    /// first recorded.
    pub fn get_enabled_extensions(&self, network_id: i64) -> anyhow::Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name FROM extensions WHERE network_id = ?1 AND enabled = 1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([network_id], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Enable or disable an extension, creating its row if needed.
    pub fn set_extension_enabled(
        &self,
        network_id: i64,
        name: &str,
        enabled: bool,
    ) -> anyhow::Result<()> {
        self.conn().execute(
            "INSERT INTO extensions (network_id, name, enabled) VALUES (?1, ?2, ?3)
             ON CONFLICT(network_id, name) DO UPDATE SET enabled = excluded.enabled",
            params![network_id, name, enabled],
        )?;
        info!(network_id, extension = name, enabled, "updated extension status");
        Ok(())
    }
}
