//! Announcement storage.

use super::{Database, now_ms};
use crate::types::Announcement;
use anyhow::Result;
use rusqlite::{Row, params};

/// How many announcements a listing ever surfaces.
pub const RECENT_LIMIT: i64 = 20;

fn parse_announcement_row(row: &Row) -> rusqlite::Result<Announcement> {
    Ok(Announcement {
        id: row.get("id")?,
        content: row.get("content")?,
        author_name: row.get("author_name")?,
        created_at: row.get("created_at")?,
    })
}

impl Database {
    /// Persist a new announcement.
    pub fn insert_announcement(&self, content: &str, author_name: &str) -> Result<Announcement> {
        let now = now_ms();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO announcements (content, author_name, created_at) VALUES (?1, ?2, ?3)",
                params![content, author_name, now],
            )?;

            Ok(Announcement {
                id: conn.last_insert_rowid(),
                content: content.to_string(),
                author_name: author_name.to_string(),
                created_at: now,
            })
        })
    }

    /// The most recent announcements, newest first.
    pub fn recent_announcements(&self) -> Result<Vec<Announcement>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM announcements ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;
            let items = stmt
                .query_map(params![RECENT_LIMIT], parse_announcement_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(items)
        })
    }
}
