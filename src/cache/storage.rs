//! Cache storage trait and its SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::traits::{CachedResponse, PartitionState};
use crate::net::{RequestKey, Response, ResponseType};

/// Durable, named key→response partitions.
///
/// Writes to the same key overwrite each other; the last completed write wins.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Whether a partition with this name exists.
  fn has(&self, name: &str) -> Result<bool>;

  /// Persisted lifecycle state of a partition, `None` if it does not exist.
  fn state(&self, name: &str) -> Result<Option<PartitionState>>;

  /// Record the lifecycle state of an existing partition.
  fn set_state(&self, name: &str, state: PartitionState) -> Result<()>;

  /// All partition names, oldest first.
  fn names(&self) -> Result<Vec<String>>;

  /// Delete a partition and all of its entries. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up an entry by request identity.
  fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store an entry, creating the partition if needed.
  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several entries; either all of them land or none do.
  fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Keys stored in a partition, in insertion order.
  fn entries(&self, name: &str) -> Result<Vec<RequestKey>>;
}

/// Storage that lives only as long as the process.
/// Used for tests and `--ephemeral` runs.
#[derive(Default)]
pub struct MemoryStorage {
  partitions: Mutex<Vec<MemoryPartition>>,
}

struct MemoryPartition {
  name: String,
  state: PartitionState,
  entries: Vec<(RequestKey, CachedResponse)>,
}

impl MemoryPartition {
  fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      state: PartitionState::default(),
      entries: Vec::new(),
    }
  }

  fn upsert(&mut self, key: &RequestKey, response: &Response) {
    let cached = CachedResponse {
      response: response.clone(),
      stored_at: Utc::now(),
    };
    match self.entries.iter_mut().find(|(k, _)| k == key) {
      Some(slot) => slot.1 = cached,
      None => self.entries.push((key.clone(), cached)),
    }
  }
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_partitions<T>(&self, f: impl FnOnce(&mut Vec<MemoryPartition>) -> T) -> Result<T> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut partitions))
  }
}

fn partition_mut<'a>(
  partitions: &'a mut Vec<MemoryPartition>,
  name: &str,
) -> &'a mut MemoryPartition {
  let index = match partitions.iter().position(|p| p.name == name) {
    Some(index) => index,
    None => {
      partitions.push(MemoryPartition::new(name));
      partitions.len() - 1
    }
  };
  &mut partitions[index]
}

impl CacheStorage for MemoryStorage {
  fn open(&self, name: &str) -> Result<()> {
    self.with_partitions(|partitions| {
      partition_mut(partitions, name);
    })
  }

  fn has(&self, name: &str) -> Result<bool> {
    self.with_partitions(|partitions| partitions.iter().any(|p| p.name == name))
  }

  fn state(&self, name: &str) -> Result<Option<PartitionState>> {
    self.with_partitions(|partitions| {
      partitions
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.state)
    })
  }

  fn set_state(&self, name: &str, state: PartitionState) -> Result<()> {
    self.with_partitions(|partitions| {
      match partitions.iter_mut().find(|p| p.name == name) {
        Some(partition) => {
          partition.state = state;
          Ok(())
        }
        None => Err(eyre!("No partition named {}", name)),
      }
    })?
  }

  fn names(&self) -> Result<Vec<String>> {
    self.with_partitions(|partitions| partitions.iter().map(|p| p.name.clone()).collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    self.with_partitions(|partitions| {
      let before = partitions.len();
      partitions.retain(|p| p.name != name);
      partitions.len() != before
    })
  }

  fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.with_partitions(|partitions| {
      partitions
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| p.entries.iter().find(|(k, _)| k == key))
        .map(|(_, cached)| cached.clone())
    })
  }

  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.with_partitions(|partitions| partition_mut(partitions, name).upsert(key, response))
  }

  fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    // Held under a single lock, so readers never see a partial batch.
    self.with_partitions(|partitions| {
      let partition = partition_mut(partitions, name);
      for (key, response) in entries {
        partition.upsert(key, response);
      }
    })
  }

  fn entries(&self, name: &str) -> Result<Vec<RequestKey>> {
    self.with_partitions(|partitions| {
      partitions
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.entries.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default()
    })
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the database at the default location.
  pub fn open_default() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the database at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A private database that disappears with the connection.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-cache").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    // Databases created before partitions tracked their lifecycle state
    let has_state: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM pragma_table_info('partitions') WHERE name = 'state'",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to inspect cache schema: {}", e))?;

    if has_state.is_none() {
      conn
        .execute_batch(ADD_STATE_COLUMN)
        .map_err(|e| eyre!("Failed to migrate partition state: {}", e))?;
    }

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per stored response
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    response_url TEXT,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, key_hash),
    FOREIGN KEY (partition) REFERENCES partitions(name) ON DELETE CASCADE
);
"#;

const ADD_STATE_COLUMN: &str =
  "ALTER TABLE partitions ADD COLUMN state TEXT NOT NULL DEFAULT 'pending'";

const INSERT_PARTITION: &str = "INSERT OR IGNORE INTO partitions (name) VALUES (?)";

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO entries
  (partition, key_hash, method, url, status, status_text, headers, body, response_type, response_url, stored_at)
  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))";

fn upsert_entry(conn: &Connection, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_ENTRY,
      params![
        name,
        key.cache_hash(),
        key.method,
        key.url,
        response.status,
        response.status_text,
        headers,
        response.body.as_ref(),
        response.response_type.as_str(),
        response.url,
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(INSERT_PARTITION, params![name])
      .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;

    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM partitions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query partition {}: {}", name, e))?;

    Ok(found.is_some())
  }

  fn state(&self, name: &str) -> Result<Option<PartitionState>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let state: Option<String> = conn
      .query_row(
        "SELECT state FROM partitions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query partition {}: {}", name, e))?;

    state
      .map(|s| {
        PartitionState::parse(&s)
          .ok_or_else(|| eyre!("Unknown state '{}' for partition {}", s, name))
      })
      .transpose()
  }

  fn set_state(&self, name: &str, state: PartitionState) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let updated = conn
      .execute(
        "UPDATE partitions SET state = ? WHERE name = ?",
        params![state.as_str(), name],
      )
      .map_err(|e| eyre!("Failed to update partition {}: {}", name, e))?;

    if updated == 0 {
      return Err(eyre!("No partition named {}", name));
    }
    Ok(())
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    Ok(removed > 0)
  }

  fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, status_text, headers, body, response_type, response_url, stored_at
         FROM entries WHERE partition = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String, Option<String>, String)> = stmt
      .query_row(params![name, key.cache_hash()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    let Some((status, status_text, headers, body, response_type, url, stored_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
    let response_type = ResponseType::parse(&response_type)
      .ok_or_else(|| eyre!("Unknown response type '{}' for {}", response_type, key))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        status_text,
        headers,
        body: body.into(),
        response_type,
        url,
      },
      stored_at: parse_datetime(&stored_at)?,
    }))
  }

  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(INSERT_PARTITION, params![name])
      .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;
    upsert_entry(&conn, name, key, response)
  }

  fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_PARTITION, params![name])
      .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;
    for (key, response) in entries {
      // An early return drops `tx`, which rolls back.
      upsert_entry(&tx, name, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entries(&self, name: &str) -> Result<Vec<RequestKey>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE partition = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![name], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
