use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

use crate::error::MygeminiError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct ArchiveStore {
    conn: Connection,
    max_entries: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRecord {
    pub id: i64,
    pub create_at: String,
    pub question: String,
    pub answer: String,
}

impl ArchiveRecord {
    /// First `max_chars` characters of `text`.
    pub fn preview(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }
}

impl ArchiveStore {
    pub fn open(db_path: &Path, max_entries: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create archive dir: {:?}", parent))?;
        }

        let conn = Connection::open(db_path)
            .map_err(db_err)
            .with_context(|| format!("Failed to open archive database: {:?}", db_path))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(db_err)
            .with_context(|| format!("Not a usable archive database: {:?}", db_path))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                create_at TEXT NOT NULL
            );",
        )
        .map_err(db_err)?;

        info!("Archive database opened at {:?}", db_path);
        Ok(Self { conn, max_entries })
    }

    pub fn save(&self, question: &str, answer: &str) -> Result<String> {
        let create_at = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.conn
            .execute(
                "INSERT INTO chat_history (question, answer, create_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![question, answer, create_at],
            )
            .map_err(db_err)?;

        self.enforce_retention()?;
        Ok(create_at)
    }

    /// Records whose question or answer contains `term`, newest first.
    pub fn search(&self, term: &str) -> Result<Vec<ArchiveRecord>> {
        let pattern = format!("%{}%", escape_like(term));
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, create_at, question, answer FROM chat_history
             WHERE question LIKE ?1 ESCAPE '\\' OR answer LIKE ?1 ESCAPE '\\'
             ORDER BY create_at DESC, id DESC",
            )
            .map_err(db_err)?;

        let records = stmt
            .query_map(rusqlite::params![pattern], Self::row_to_record)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(db_err)
            .with_context(|| format!("Archive search failed for '{}'", term))?;

        Ok(records)
    }

    pub fn list(&self, limit: u32) -> Result<Vec<ArchiveRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, create_at, question, answer FROM chat_history ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err)?;

        let records = stmt
            .query_map(rusqlite::params![limit], Self::row_to_record)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(db_err)?;

        Ok(records)
    }

    pub fn clear(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM chat_history", [])
            .map_err(db_err)
            .context("Failed to clear archive")?;
        info!("Archive cleared");
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArchiveRecord> {
        Ok(ArchiveRecord {
            id: row.get(0)?,
            create_at: row.get(1)?,
            question: row.get(2)?,
            answer: row.get(3)?,
        })
    }

    fn enforce_retention(&self) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM chat_history WHERE id NOT IN (SELECT id FROM chat_history ORDER BY id DESC LIMIT ?1)",
                rusqlite::params![self.max_entries],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: rusqlite::Error) -> MygeminiError {
    MygeminiError::Archive(e.to_string())
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
