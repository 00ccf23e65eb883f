//! User records and the role directory.

use super::{Database, now_ms};
use crate::error::{ApiError, ApiResult};
use crate::types::{Role, User};
use anyhow::Result;
use rusqlite::{Connection, Row, params};

pub(crate) fn parse_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        telegram_id: row.get("telegram_id")?,
        full_name: row.get("full_name")?,
        role: row.get("role")?,
        created_at: row.get("created_at")?,
    })
}

/// Internal helper to get a user using an existing connection (avoids deadlock).
pub(crate) fn get_user_internal(conn: &Connection, user_id: i64) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE id = ?1")?;

    let result = stmt.query_row(params![user_id], parse_user_row);

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn get_by_telegram_id_internal(conn: &Connection, telegram_id: i64) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE telegram_id = ?1")?;

    let result = stmt.query_row(params![telegram_id], parse_user_row);

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Database {
    /// Look up a user by Telegram identity, creating the record on first
    /// contact.
    ///
    /// The display name is refreshed on every call, and a user whose Telegram
    /// id matches the configured owner identity is forced back to the owner
    /// role each time. That invariant is re-applied on every sign-in, so a
    /// prior manual demotion never sticks.
    pub fn resolve_or_create(
        &self,
        telegram_id: i64,
        full_name: &str,
        owner_telegram_id: i64,
    ) -> Result<User> {
        self.with_conn(|conn| {
            match get_by_telegram_id_internal(conn, telegram_id)? {
                Some(user) => {
                    let role = if telegram_id == owner_telegram_id {
                        Role::Owner
                    } else {
                        user.role
                    };
                    conn.execute(
                        "UPDATE users SET full_name = ?1, role = ?2 WHERE id = ?3",
                        params![full_name, role, user.id],
                    )?;
                    Ok(User {
                        full_name: full_name.to_string(),
                        role,
                        ..user
                    })
                }
                None => {
                    let role = if telegram_id == owner_telegram_id {
                        Role::Owner
                    } else {
                        Role::Worker
                    };
                    let now = now_ms();
                    conn.execute(
                        "INSERT INTO users (telegram_id, full_name, role, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![telegram_id, full_name, role, now],
                    )?;
                    Ok(User {
                        id: conn.last_insert_rowid(),
                        telegram_id,
                        full_name: full_name.to_string(),
                        role,
                        created_at: now,
                    })
                }
            }
        })
    }

    /// Get a user by internal id.
    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| get_user_internal(conn, user_id))
    }

    /// Get a user by Telegram identity.
    pub fn get_user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| get_by_telegram_id_internal(conn, telegram_id))
    }

    /// List all users, oldest first.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM users ORDER BY id")?;
            let users = stmt
                .query_map([], parse_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    /// All known Telegram ids, for broadcast enumeration.
    pub fn all_telegram_ids(&self) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT telegram_id FROM users ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Change a user's role.
    ///
    /// Only the owner may change roles, and the owner's own role is immutable
    /// through this path.
    pub fn set_role(
        &self,
        acting: &User,
        target_user_id: i64,
        new_role: Role,
        owner_telegram_id: i64,
    ) -> ApiResult<()> {
        if acting.role != Role::Owner {
            return Err(ApiError::forbidden("only the owner can change roles"));
        }

        self.with_conn(|conn| {
            let target = match get_user_internal(conn, target_user_id)? {
                Some(target) => target,
                None => anyhow::bail!(ApiError::invalid_target("target user does not exist")),
            };

            if target.telegram_id == owner_telegram_id {
                anyhow::bail!(ApiError::invalid_target("the owner's role is immutable"));
            }

            conn.execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                params![new_role, target.id],
            )?;
            Ok(())
        })
        .map_err(ApiError::from)
    }
}
