//! Embedded relational store. A single SQLite file under
//! `<data_directory>/data`, opened through a pooled connection manager so
//! the registrar, every race session, and the supply loop can all hold a
//! handle at once (see the concurrency model's "process-wide pool with its
//! own internal synchronization").
//!
//! Schema changes live as numbered `.sql` files under `migrations/`,
//! embedded into the binary with `rust_embed` and applied in ascending
//! numeric-prefix order the first time their name is missing from the
//! `init` bookkeeping table.

use crate::error::{Result, TypeRaceError};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::task;

#[derive(rust_embed::RustEmbed)]
#[folder = "migrations"]
struct Migrations;

#[derive(Clone)]
pub struct PersistenceLayer {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl PersistenceLayer {
    pub fn new(data_directory: &str) -> Result<Self> {
        let dir = Path::new(data_directory);
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .map_err(|e| TypeRaceError::persistence(format!("creating data directory: {}", e)))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                    .map_err(|e| TypeRaceError::persistence(format!("setting data directory permissions: {}", e)))?;
            }
        }

        let db_path = dir.join("data");
        let manager = SqliteConnectionManager::file(db_path);
        let pool = r2d2::Pool::new(manager)
            .map_err(|e| TypeRaceError::persistence(format!("opening connection pool: {}", e)))?;

        {
            let conn = pool.get()?;
            run_migrations(&conn)?;
        }

        Ok(PersistenceLayer { pool })
    }

    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = r2d2::Pool::new(manager)
            .map_err(|e| TypeRaceError::persistence(format!("opening in-memory pool: {}", e)))?;
        {
            let conn = pool.get()?;
            run_migrations(&conn)?;
        }
        Ok(PersistenceLayer { pool })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| TypeRaceError::persistence(format!("blocking task panicked: {}", e)))?
    }

    pub async fn highest_completion_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let result: Option<i64> = conn
                .query_row(
                    "SELECT typing_test_completion_count FROM person_who_types \
                     ORDER BY typing_test_completion_count DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })?;
            Ok(result.unwrap_or(0))
        })
        .await
    }

    pub async fn sentence_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let result: Option<i64> = conn
                .query_row("SELECT id FROM sentence ORDER BY id DESC LIMIT 1", [], |row| row.get(0))
                .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })?;
            Ok(result.unwrap_or(0))
        })
        .await
    }

    /// Retrieves the text of the given sentence ids in one query, as
    /// described for the race words picker.
    pub async fn fetch_sentences_by_ids(&self, ids: Vec<i64>) -> Result<HashMap<i64, String>> {
        self.with_conn(move |conn| {
            if ids.is_empty() {
                return Ok(HashMap::new());
            }
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!("SELECT id, text FROM sentence WHERE id IN ({})", placeholders);
            let mut stmt = conn.prepare(&query)?;
            let params = rusqlite::params_from_iter(ids.iter());
            let rows = stmt.query_map(params, |row| {
                let id: i64 = row.get(0)?;
                let text: String = row.get(1)?;
                Ok((id, text))
            })?;
            let mut out = HashMap::new();
            for row in rows {
                let (id, text) = row?;
                out.insert(id, text);
            }
            Ok(out)
        })
        .await
    }

    /// Upsert: insert with count 1, else increment. Returns the new count.
    pub async fn increment_completion(&self, fingerprint: String) -> Result<i64> {
        self.with_conn(move |conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT typing_test_completion_count FROM person_who_types WHERE ssh_finger_print = ?1",
                    [&fingerprint],
                    |row| row.get(0),
                )
                .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })?;
            let new_count = existing.unwrap_or(0) + 1;
            if existing.is_none() {
                conn.execute(
                    "INSERT INTO person_who_types (ssh_finger_print, typing_test_completion_count) VALUES (?1, ?2)",
                    rusqlite::params![fingerprint, new_count],
                )?;
            } else {
                conn.execute(
                    "UPDATE person_who_types SET typing_test_completion_count = ?1 WHERE ssh_finger_print = ?2",
                    rusqlite::params![new_count, fingerprint],
                )?;
            }
            Ok(new_count)
        })
        .await
    }

    /// Batch insert pre-normalized sentence text. Skips anything shorter
    /// than 5 characters as a defense-in-depth measure -- callers are
    /// expected to have already filtered (see the supply loop).
    pub async fn insert_sentences(&self, texts: Vec<String>) -> Result<()> {
        self.with_conn(move |conn| {
            for text in texts.iter().filter(|t| t.len() >= 5) {
                conn.execute("INSERT INTO sentence (text) VALUES (?1)", [text])?;
            }
            Ok(())
        })
        .await
    }
}

/// Parses the leading run of ASCII digits in a migration filename, e.g.
/// `"0002_create_person_who_types.sql"` -> `Some(2)`.
fn numeric_prefix(name: &str) -> Option<u64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS init (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            migration_file_name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    let mut candidates: Vec<String> = Migrations::iter()
        .map(|f| f.to_string())
        .filter(|name| numeric_prefix(name).is_some())
        .collect();
    candidates.sort_by_key(|name| numeric_prefix(name).unwrap_or(u64::MAX));

    let mut completed: HashSet<String> = HashSet::new();
    {
        let mut stmt = conn.prepare("SELECT migration_file_name FROM init")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            completed.insert(row?);
        }
    }

    for name in candidates {
        if completed.contains(&name) {
            continue;
        }
        let file = Migrations::get(&name)
            .ok_or_else(|| TypeRaceError::persistence(format!("embedded migration {} vanished", name)))?;
        let contents = std::str::from_utf8(&file.data)
            .map_err(|e| TypeRaceError::persistence(format!("migration {} is not valid utf8: {}", name, e)))?;

        for statement in contents.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            conn.execute(statement, [])
                .map_err(|e| TypeRaceError::persistence(format!("executing migration {}: {}", name, e)))?;
        }

        conn.execute("INSERT INTO init (migration_file_name) VALUES (?1)", [&name])?;
    }

    Ok(())
}
