//! SQLite implementation of the generation store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStorage, Generation};
use crate::http::{Request, Response, ResponseType};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private store that lives only as long as this value.
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

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per cache generation
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored response snapshots, keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    response_type TEXT NOT NULL,
    response_url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);
"#;

/// Write one entry. Only GET requests can be stored.
fn insert_entry(
  conn: &Connection,
  cache_name: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  if request.method != Method::GET {
    return Err(eyre!(
      "Refusing to cache {} {}: only GET requests can be stored",
      request.method,
      request.url
    ));
  }

  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries
         (generation, request_key, method, url, status, status_text, response_type, response_url, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache_name,
        request.cache_key(),
        request.method.as_str(),
        request.identity_url().as_str(),
        response.status,
        response.status_text,
        response.response_type.as_str(),
        response.url,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", request.url, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation name: {}", e))?;

    Ok(names)
  }

  fn generations(&self) -> Result<Vec<Generation>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT g.name, g.created_at, COUNT(e.request_key) FROM generations g
         LEFT JOIN entries e ON e.generation = g.name
         GROUP BY g.name
         ORDER BY g.rowid",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read generation: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, entries)| {
        Ok(Generation {
          name,
          created_at: parse_datetime(&created_at)?,
          entries: usize::try_from(entries).unwrap_or_default(),
        })
      })
      .collect()
  }

  fn open(&self, cache_name: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![cache_name],
      )
      .map_err(|e| eyre!("Failed to open generation {}: {}", cache_name, e))?;

    Ok(())
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM entries WHERE generation = ?",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache_name, e))?;

    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![cache_name])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", cache_name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, cache_name: &str, request: &Request) -> Result<Option<Response>> {
    if request.method != Method::GET {
      return Ok(None);
    }

    let conn = self.lock()?;

    let row: Option<(i64, String, String, String, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, status_text, response_type, response_url, headers, body FROM entries
         WHERE generation = ? AND request_key = ?",
        params![cache_name, request.cache_key()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.url, e))?;

    let Some((status, status_text, response_type, url, headers, body)) = row else {
      return Ok(None);
    };

    let status =
      u16::try_from(status).map_err(|_| eyre!("Corrupt status {} for {}", status, request.url))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", request.url, e))?;

    Ok(Some(Response {
      status,
      status_text,
      headers,
      body,
      response_type: response_type.parse::<ResponseType>()?,
      url,
    }))
  }

  fn put(&self, cache_name: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self.lock()?;

    let exists = conn
      .query_row(
        "SELECT 1 FROM generations WHERE name = ?",
        params![cache_name],
        |_| Ok(()),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up generation {}: {}", cache_name, e))?
      .is_some();

    if !exists {
      return Err(eyre!("Generation {} no longer exists", cache_name));
    }

    insert_entry(&conn, cache_name, request, response)
  }

  fn put_all(&self, cache_name: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    // Dropping the transaction without commit rolls everything back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to open generation {}: {}", cache_name, e))?;

    for (request, response) in entries {
      insert_entry(&tx, cache_name, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
