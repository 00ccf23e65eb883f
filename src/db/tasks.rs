//! Task CRUD operations.

use super::{Database, now_ms};
use crate::lifecycle::TaskChanges;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row, params};

use crate::types::{Task, TaskStatus, TaskWithAssignee};

pub(crate) fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: row.get("status")?,
        dispute_reason: row.get("dispute_reason")?,
        is_locked: row.get("is_locked")?,
        creator_id: row.get("creator_id")?,
        assignee_id: row.get("assignee_id")?,
        deadline: row.get("deadline")?,
        created_at: row.get("created_at")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
fn get_task_internal(conn: &Connection, task_id: i64) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;

    let result = stmt.query_row(params![task_id], parse_task_row);

    match result {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Database {
    /// Create a new task in the initial `todo` status.
    pub fn create_task(
        &self,
        title: &str,
        description: Option<&str>,
        creator_id: i64,
        assignee_id: i64,
        deadline: Option<i64>,
    ) -> Result<Task> {
        let now = now_ms();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (title, description, status, creator_id, assignee_id, deadline, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    title,
                    description,
                    TaskStatus::Todo,
                    creator_id,
                    assignee_id,
                    deadline,
                    now,
                ],
            )?;

            Ok(Task {
                id: conn.last_insert_rowid(),
                title: title.to_string(),
                description: description.map(str::to_string),
                status: TaskStatus::Todo,
                dispute_reason: None,
                is_locked: false,
                creator_id,
                assignee_id,
                deadline,
                created_at: now,
            })
        })
    }

    /// Get a task by id.
    pub fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// List tasks with their assignee names, optionally filtered by assignee.
    ///
    /// Ordered by deadline ascending; tasks without a deadline sort last,
    /// ties break by id.
    pub fn list_tasks(&self, assignee_id: Option<i64>) -> Result<Vec<TaskWithAssignee>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT t.*, u.full_name AS assignee_name
                 FROM tasks t
                 INNER JOIN users u ON u.id = t.assignee_id",
            );
            if assignee_id.is_some() {
                sql.push_str(" WHERE t.assignee_id = ?1");
            }
            sql.push_str(" ORDER BY t.deadline IS NULL, t.deadline ASC, t.id ASC");

            let mut stmt = conn.prepare(&sql)?;

            let parse = |row: &Row| -> rusqlite::Result<TaskWithAssignee> {
                Ok(TaskWithAssignee {
                    task: parse_task_row(row)?,
                    assignee_name: row.get("assignee_name")?,
                })
            };

            let tasks = if let Some(aid) = assignee_id {
                stmt.query_map(params![aid], parse)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            } else {
                stmt.query_map([], parse)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            Ok(tasks)
        })
    }

    /// Apply a validated set of changes to a task and return the result.
    ///
    /// Single read-modify-write per call; the connection mutex makes it
    /// atomic with respect to other callers. There is no version check, so
    /// concurrent updates to the same row are last-write-wins.
    pub fn apply_task_changes(&self, task_id: i64, changes: &TaskChanges) -> Result<Task> {
        self.with_conn(|conn| {
            let task = get_task_internal(conn, task_id)?
                .ok_or_else(|| anyhow!("task not found: {}", task_id))?;

            let new_title = changes.title.clone().unwrap_or(task.title);
            let new_description = changes.description.clone().or(task.description);
            let new_status = changes.status.unwrap_or(task.status);
            let new_deadline = changes.deadline.or(task.deadline);
            let new_dispute_reason = match &changes.dispute_reason {
                Some(reason) => reason.clone(),
                None => task.dispute_reason,
            };
            let new_is_locked = task.is_locked || changes.lock;

            conn.execute(
                "UPDATE tasks SET
                    title = ?1, description = ?2, status = ?3,
                    dispute_reason = ?4, is_locked = ?5, deadline = ?6
                 WHERE id = ?7",
                params![
                    new_title,
                    new_description,
                    new_status,
                    new_dispute_reason,
                    new_is_locked,
                    new_deadline,
                    task_id,
                ],
            )?;

            Ok(Task {
                title: new_title,
                description: new_description,
                status: new_status,
                dispute_reason: new_dispute_reason,
                is_locked: new_is_locked,
                deadline: new_deadline,
                ..task
            })
        })
    }
}
