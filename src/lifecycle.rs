//! Task lifecycle rules.
//!
//! The rules governing who may move a task between statuses live here as a
//! pure function over closed enums: `evaluate` turns (actor, current task,
//! requested patch) into either a concrete set of field writes plus an
//! optional notification, or a typed rejection. Nothing is persisted until a
//! rule has accepted the request, so a rejected update never leaves a partial
//! mutation behind.
//!
//! The four rules are evaluated in priority order:
//!
//! 1. raise dispute (assignee only, unlocked tasks only)
//! 2. resolve dispute (owner only; ruling anything but done locks the task)
//! 3. worker self-update (assignee only; only the status field is honored)
//! 4. privileged full update (admin/owner; everything but the dispute reason)

use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::notify::Notifier;
use crate::types::{Role, Task, TaskStatus, User};
use tracing::warn;

/// A requested task mutation, decoded from the transport.
///
/// `None` means "leave unchanged". Which fields are honored depends on the
/// rule that ends up applying, not on the caller's intent.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<i64>,
    pub dispute_reason: Option<String>,
}

/// The concrete field writes a rule produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskChanges {
    pub status: Option<TaskStatus>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<i64>,
    /// `Some(None)` clears the reason, `Some(Some(..))` sets it.
    pub dispute_reason: Option<Option<String>>,
    /// Set the permanent dispute lock.
    pub lock: bool,
}

/// Side-effect message a rule wants sent after the write.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Tell the creator the assignee disputed the task.
    DisputeRaised { reason: Option<String> },
    /// Tell the assignee how the owner ruled.
    DisputeResolved { status: TaskStatus },
    /// Tell the creator the assignee finished the task.
    ReadyForReview,
}

/// Result of evaluating a patch against the rules.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub changes: TaskChanges,
    pub notice: Option<Notice>,
}

/// Evaluate a requested update against the current task state.
///
/// Pure: reads its arguments, touches no storage.
pub fn evaluate(actor: &User, task: &Task, patch: &TaskPatch) -> ApiResult<Outcome> {
    // Rule 1: raise dispute.
    if patch.status == Some(TaskStatus::Disputed) {
        if task.assignee_id != actor.id {
            return Err(ApiError::forbidden("only the assignee can dispute a task"));
        }
        if task.is_locked {
            return Err(ApiError::invalid_state("task is locked against disputes"));
        }
        return Ok(Outcome {
            changes: TaskChanges {
                status: Some(TaskStatus::Disputed),
                dispute_reason: Some(patch.dispute_reason.clone()),
                ..Default::default()
            },
            notice: Some(Notice::DisputeRaised {
                reason: patch.dispute_reason.clone(),
            }),
        });
    }

    // Rule 2: resolve dispute. Any requested status counts as a ruling.
    if task.status == TaskStatus::Disputed
        && let Some(resolved) = patch.status
    {
        if actor.role != Role::Owner {
            return Err(ApiError::forbidden("only the owner can resolve a dispute"));
        }
        return Ok(Outcome {
            changes: TaskChanges {
                status: Some(resolved),
                dispute_reason: Some(None),
                // An adverse ruling is final: the task can never be
                // re-disputed. Ruling "done" leaves it open.
                lock: resolved != TaskStatus::Done,
                ..Default::default()
            },
            notice: Some(Notice::DisputeResolved { status: resolved }),
        });
    }

    match actor.role {
        // Rule 3: worker self-update. Only the status field is honored;
        // any other supplied fields are silently ignored, not rejected.
        Role::Worker => {
            if task.assignee_id != actor.id {
                return Err(ApiError::forbidden(
                    "workers can only update their own tasks",
                ));
            }
            let notice =
                (patch.status == Some(TaskStatus::Done)).then_some(Notice::ReadyForReview);
            Ok(Outcome {
                changes: TaskChanges {
                    status: patch.status,
                    ..Default::default()
                },
                notice,
            })
        }
        // Rule 4: privileged full update. Every supplied field except the
        // dispute reason is applied verbatim; no notification.
        Role::Admin | Role::Owner => Ok(Outcome {
            changes: TaskChanges {
                status: patch.status,
                title: patch.title.clone(),
                description: patch.description.clone(),
                deadline: patch.deadline,
                ..Default::default()
            },
            notice: None,
        }),
    }
}

/// Run a task update end to end: load, evaluate, persist, notify.
///
/// Fails with `NotFound` before any rule is evaluated when the task does not
/// exist. Notification dispatch is fire-and-forget; it happens after the
/// write and cannot fail the update.
pub fn execute_update(
    db: &Database,
    notifier: &Notifier,
    actor: &User,
    task_id: i64,
    patch: &TaskPatch,
) -> ApiResult<Task> {
    let task = db
        .get_task(task_id)?
        .ok_or_else(|| ApiError::task_not_found(task_id))?;

    let outcome = evaluate(actor, &task, patch)?;
    let updated = db.apply_task_changes(task_id, &outcome.changes)?;

    if let Some(notice) = outcome.notice {
        dispatch_notice(db, notifier, &updated, &notice);
    }

    Ok(updated)
}

/// Resolve the notice recipient and enqueue the message.
///
/// A recipient that cannot be resolved is logged and skipped; notification
/// problems never surface to the caller.
fn dispatch_notice(db: &Database, notifier: &Notifier, task: &Task, notice: &Notice) {
    let recipient_id = match notice {
        Notice::DisputeRaised { .. } | Notice::ReadyForReview => task.creator_id,
        Notice::DisputeResolved { .. } => task.assignee_id,
    };

    let recipient = match db.get_user(recipient_id) {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(task_id = task.id, recipient_id, "notice recipient missing");
            return;
        }
        Err(e) => {
            warn!(task_id = task.id, error = %e, "failed to resolve notice recipient");
            return;
        }
    };

    let text = match notice {
        Notice::DisputeRaised { reason } => format!(
            "\u{26a0} Task disputed: {}\nReason: {}",
            task.title,
            reason.as_deref().unwrap_or("-")
        ),
        Notice::DisputeResolved { status } => format!(
            "\u{1f512} Dispute resolved: {}\nStatus: {}",
            task.title, status
        ),
        Notice::ReadyForReview => format!(
            "\u{2705} Task completed: {}\nPlease review!",
            task.title
        ),
    };

    notifier.notify(recipient.telegram_id, &text);
}
