//! End-to-end flows through the role directory, lifecycle engine and
//! notifier, using an in-memory database and a recording delivery sink.

use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task_desk::api::TaskView;
use task_desk::db::Database;
use task_desk::error::ErrorCode;
use task_desk::lifecycle::{self, TaskPatch};
use task_desk::notify::{MessageSink, Notifier};
use task_desk::types::{Role, TaskStatus};

const OWNER_TG: i64 = 1;
const WANDA_TG: i64 = 42;
const WALT_TG: i64 = 43;

/// Sink that records every delivery attempt and can fail for one chat id.
struct RecordingSink {
    messages: Mutex<Vec<(i64, String)>>,
    fail_for: Option<i64>,
}

impl RecordingSink {
    fn new(fail_for: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            fail_for,
        })
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn deliver(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push((chat_id, text.to_string()));
        if self.fail_for == Some(chat_id) {
            return Err(anyhow!("recipient unreachable"));
        }
        Ok(())
    }
}

async fn wait_for_messages(sink: &RecordingSink, expected: usize) -> Vec<(i64, String)> {
    for _ in 0..100 {
        {
            let messages = sink.messages.lock().unwrap();
            if messages.len() >= expected {
                return messages.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sink.messages.lock().unwrap().clone()
}

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn dispute_patch(reason: &str) -> TaskPatch {
    TaskPatch {
        status: Some(TaskStatus::Disputed),
        dispute_reason: Some(reason.to_string()),
        ..Default::default()
    }
}

fn status_patch(status: TaskStatus) -> TaskPatch {
    TaskPatch {
        status: Some(status),
        ..Default::default()
    }
}

#[tokio::test]
async fn dispute_cycle_locks_the_task_and_notifies_both_sides() {
    let db = setup_db();
    let sink = RecordingSink::new(None);
    let notifier = Notifier::spawn(Arc::clone(&sink) as Arc<dyn MessageSink>);

    let owner = db.resolve_or_create(OWNER_TG, "Olive Owner", OWNER_TG).unwrap();
    let wanda = db.resolve_or_create(WANDA_TG, "Wanda Worker", OWNER_TG).unwrap();
    let task = db.create_task("T1", None, owner.id, wanda.id, None).unwrap();

    // The assignee disputes with a reason; the creator is told why.
    let disputed =
        lifecycle::execute_update(&db, &notifier, &wanda, task.id, &dispute_patch("blocked"))
            .unwrap();
    assert_eq!(disputed.status, TaskStatus::Disputed);
    assert_eq!(disputed.dispute_reason.as_deref(), Some("blocked"));

    let messages = wait_for_messages(&sink, 1).await;
    assert_eq!(messages[0].0, OWNER_TG);
    assert!(messages[0].1.contains("blocked"));

    // The owner rules in_progress: reason cleared, task locked for good,
    // and the assignee is told the outcome.
    let resolved = lifecycle::execute_update(
        &db,
        &notifier,
        &owner,
        task.id,
        &status_patch(TaskStatus::InProgress),
    )
    .unwrap();
    assert_eq!(resolved.status, TaskStatus::InProgress);
    assert_eq!(resolved.dispute_reason, None);
    assert!(resolved.is_locked);

    let messages = wait_for_messages(&sink, 2).await;
    assert_eq!(messages[1].0, WANDA_TG);
    assert!(messages[1].1.contains("in_progress"));

    // A second dispute on the same task is rejected outright.
    let err = lifecycle::execute_update(&db, &notifier, &wanda, task.id, &dispute_patch("again"))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
}

#[tokio::test]
async fn resolving_to_done_does_not_lock() {
    let db = setup_db();
    let sink = RecordingSink::new(None);
    let notifier = Notifier::spawn(Arc::clone(&sink) as Arc<dyn MessageSink>);

    let owner = db.resolve_or_create(OWNER_TG, "Olive", OWNER_TG).unwrap();
    let wanda = db.resolve_or_create(WANDA_TG, "Wanda", OWNER_TG).unwrap();
    let task = db.create_task("T1", None, owner.id, wanda.id, None).unwrap();

    lifecycle::execute_update(&db, &notifier, &wanda, task.id, &dispute_patch("why"))
        .unwrap();
    let resolved = lifecycle::execute_update(
        &db,
        &notifier,
        &owner,
        task.id,
        &status_patch(TaskStatus::Done),
    )
    .unwrap();

    assert_eq!(resolved.status, TaskStatus::Done);
    assert!(!resolved.is_locked);

    // The same task can be disputed again later.
    let disputed =
        lifecycle::execute_update(&db, &notifier, &wanda, task.id, &dispute_patch("not done"))
            .unwrap();
    assert_eq!(disputed.status, TaskStatus::Disputed);
}

#[tokio::test]
async fn worker_update_persists_only_the_status_field() {
    let db = setup_db();
    let sink = RecordingSink::new(None);
    let notifier = Notifier::spawn(Arc::clone(&sink) as Arc<dyn MessageSink>);

    let owner = db.resolve_or_create(OWNER_TG, "Olive", OWNER_TG).unwrap();
    let wanda = db.resolve_or_create(WANDA_TG, "Wanda", OWNER_TG).unwrap();
    let task = db
        .create_task("T1", Some("original"), owner.id, wanda.id, None)
        .unwrap();

    let patch = TaskPatch {
        status: Some(TaskStatus::InProgress),
        title: Some("hijacked".to_string()),
        description: Some("hijacked".to_string()),
        deadline: Some(9_999),
        ..Default::default()
    };
    lifecycle::execute_update(&db, &notifier, &wanda, task.id, &patch).unwrap();

    let stored = db.get_task(task.id).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::InProgress);
    assert_eq!(stored.title, "T1");
    assert_eq!(stored.description.as_deref(), Some("original"));
    assert_eq!(stored.deadline, None);
}

#[tokio::test]
async fn completing_a_task_asks_the_creator_to_review() {
    let db = setup_db();
    let sink = RecordingSink::new(None);
    let notifier = Notifier::spawn(Arc::clone(&sink) as Arc<dyn MessageSink>);

    let owner = db.resolve_or_create(OWNER_TG, "Olive", OWNER_TG).unwrap();
    let wanda = db.resolve_or_create(WANDA_TG, "Wanda", OWNER_TG).unwrap();
    let task = db.create_task("T1", None, owner.id, wanda.id, None).unwrap();

    lifecycle::execute_update(&db, &notifier, &wanda, task.id, &status_patch(TaskStatus::Done))
        .unwrap();

    let messages = wait_for_messages(&sink, 1).await;
    assert_eq!(messages[0].0, OWNER_TG);
    assert!(messages[0].1.contains("T1"));
}

#[tokio::test]
async fn updating_a_missing_task_is_not_found() {
    let db = setup_db();
    let sink = RecordingSink::new(None);
    let notifier = Notifier::spawn(Arc::clone(&sink) as Arc<dyn MessageSink>);

    let owner = db.resolve_or_create(OWNER_TG, "Olive", OWNER_TG).unwrap();

    let err = lifecycle::execute_update(
        &db,
        &notifier,
        &owner,
        12345,
        &status_patch(TaskStatus::Done),
    )
    .unwrap_err();

    assert_eq!(err.code, ErrorCode::NotFound);
}

#[test]
fn worker_listing_shows_exactly_their_tasks() {
    let db = setup_db();
    let owner = db.resolve_or_create(OWNER_TG, "Olive", OWNER_TG).unwrap();
    let wanda = db.resolve_or_create(WANDA_TG, "Wanda", OWNER_TG).unwrap();
    let walt = db.resolve_or_create(WALT_TG, "Walt", OWNER_TG).unwrap();

    db.create_task("for wanda 1", None, owner.id, wanda.id, None).unwrap();
    db.create_task("for wanda 2", None, owner.id, wanda.id, None).unwrap();
    db.create_task("for walt", None, owner.id, walt.id, None).unwrap();

    // Workers are always restricted to their own assignments.
    let rows = db.list_tasks(Some(wanda.id)).unwrap();
    let views: Vec<TaskView> = rows
        .into_iter()
        .map(|row| TaskView::for_viewer(row, &wanda))
        .collect();

    assert_eq!(views.len(), 2);
    assert!(views.iter().all(|v| v.is_mine));
}

#[test]
fn dispute_reason_is_redacted_from_other_workers() {
    let db = setup_db();
    let owner = db.resolve_or_create(OWNER_TG, "Olive", OWNER_TG).unwrap();
    let wanda = db.resolve_or_create(WANDA_TG, "Wanda", OWNER_TG).unwrap();
    let walt = db.resolve_or_create(WALT_TG, "Walt", OWNER_TG).unwrap();

    let task = db.create_task("T1", None, owner.id, wanda.id, None).unwrap();
    db.apply_task_changes(
        task.id,
        &task_desk::lifecycle::TaskChanges {
            status: Some(TaskStatus::Disputed),
            dispute_reason: Some(Some("sensitive".to_string())),
            ..Default::default()
        },
    )
    .unwrap();

    let view_for = |viewer: &task_desk::types::User| {
        let row = db
            .list_tasks(None)
            .unwrap()
            .into_iter()
            .find(|r| r.task.id == task.id)
            .unwrap();
        TaskView::for_viewer(row, viewer)
    };

    // The assignee and privileged roles see the reason; other workers don't.
    assert_eq!(view_for(&wanda).dispute_reason.as_deref(), Some("sensitive"));
    assert_eq!(view_for(&owner).dispute_reason.as_deref(), Some("sensitive"));
    assert_eq!(view_for(&walt).dispute_reason, None);
    assert_eq!(walt.role, Role::Worker);
}

#[tokio::test]
async fn broadcast_reaches_everyone_despite_one_failure() {
    let db = setup_db();
    // The second recipient is unreachable.
    let sink = RecordingSink::new(Some(WANDA_TG));
    let notifier = Notifier::spawn(Arc::clone(&sink) as Arc<dyn MessageSink>);

    db.resolve_or_create(OWNER_TG, "Olive", OWNER_TG).unwrap();
    db.resolve_or_create(WANDA_TG, "Wanda", OWNER_TG).unwrap();
    db.resolve_or_create(WALT_TG, "Walt", OWNER_TG).unwrap();

    let ids = db.all_telegram_ids().unwrap();
    notifier.broadcast(&ids, "\u{1f4e2} New announcement:\nAll hands");

    let messages = wait_for_messages(&sink, 3).await;
    let recipients: Vec<i64> = messages.iter().map(|(id, _)| *id).collect();
    assert_eq!(recipients, vec![OWNER_TG, WANDA_TG, WALT_TG]);
}
