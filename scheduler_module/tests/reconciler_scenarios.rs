mod support;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mail_module::{BodyMode, DomainAllowlist, MailReader, ReplyComposer};
use scheduler_module::pending::PendingLedger;
use scheduler_module::reconciler::{MessageOutcome, TaskReconciler, NO_ASSIGNEE_REPLY};
use task_store_module::{Criticality, TaskStatus};
use tempfile::TempDir;

use support::{open_task, FakeMailbox, FakeTaskStore, BOT};

struct Harness {
    _temp: TempDir,
    mailbox: Arc<FakeMailbox>,
    store: Arc<FakeTaskStore>,
    reader: MailReader<FakeMailbox>,
    reconciler: TaskReconciler<FakeMailbox, FakeTaskStore>,
    ledger: PendingLedger,
    download_dir: std::path::PathBuf,
}

fn harness() -> Harness {
    let temp = TempDir::new().expect("tempdir");
    let mailbox = Arc::new(FakeMailbox::new());
    let store = Arc::new(FakeTaskStore::new(
        Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap(),
    ));
    let download_dir = temp.path().join("downloads");
    let ledger = PendingLedger::new(temp.path().join("state").join("pending.json"));
    let reader = MailReader::new(
        mailbox.clone(),
        DomainAllowlist::new(["gmail.com"]),
        download_dir.clone(),
    );
    let reconciler = TaskReconciler::new(mailbox.clone(), store.clone(), ReplyComposer::new(BOT))
        .with_ledger(ledger.clone());
    Harness {
        _temp: temp,
        mailbox,
        store,
        reader,
        reconciler,
        ledger,
        download_dir,
    }
}

impl Harness {
    fn reconcile_all(&self) -> Vec<MessageOutcome> {
        let fetched = self
            .reader
            .fetch_unread(5, BodyMode::Materialize)
            .expect("fetch");
        fetched
            .messages
            .into_iter()
            .map(|message| self.reconciler.reconcile(message))
            .collect()
    }

    fn downloads_left(&self) -> usize {
        std::fs::read_dir(&self.download_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

#[test]
fn new_thread_creates_medium_open_task_for_first_recipient() {
    let h = harness();
    h.mailbox.deliver(
        "m1",
        "t1",
        "Alice <alice@gmail.com>",
        "Bot <bot@gmail.com>, bob@gmail.com, carol@gmail.com",
        "VPN down",
    );

    let outcomes = h.reconcile_all();

    assert_eq!(outcomes, vec![MessageOutcome::Created { task_id: 1 }]);
    let tasks = h.store.tasks();
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.creator_name, "alice@gmail.com");
    assert_eq!(task.assignee_name, "bob@gmail.com");
    assert_eq!(task.subject, "VPN down");
    assert_eq!(task.thread_id, "t1");
    assert_eq!(task.criticality, Criticality::Medium);
    assert_eq!(task.status, TaskStatus::Open);
    assert_eq!(h.downloads_left(), 0);
}

#[test]
fn existing_thread_updates_body_instead_of_creating() {
    let h = harness();
    h.store.insert(open_task(
        7,
        "t1",
        Criticality::High,
        Utc.with_ymd_and_hms(2024, 6, 30, 8, 0, 0).unwrap(),
        None,
    ));
    h.mailbox
        .deliver("m2", "t1", "alice@gmail.com", "bot@gmail.com, bob@gmail.com", "Re: VPN down");

    let outcomes = h.reconcile_all();

    assert_eq!(outcomes, vec![MessageOutcome::Updated { task_id: 7 }]);
    assert_eq!(h.store.tasks().len(), 1);
    assert!(h.store.create_attempts().is_empty());
    let updates = h.store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].body.as_deref(), Some("<p>body of m2</p>"));
}

#[test]
fn thread_lookup_is_exact_not_substring() {
    let h = harness();
    h.store.insert(open_task(
        3,
        "t10",
        Criticality::Low,
        Utc.with_ymd_and_hms(2024, 6, 30, 8, 0, 0).unwrap(),
        None,
    ));
    h.mailbox
        .deliver("m1", "t1", "alice@gmail.com", "bot@gmail.com, bob@gmail.com", "new");

    let outcomes = h.reconcile_all();

    assert!(matches!(outcomes[0], MessageOutcome::Created { .. }));
    assert_eq!(h.store.tasks().len(), 2);
}

#[test]
fn no_assignee_replies_and_skips_creation() {
    let h = harness();
    h.mailbox
        .deliver("m1", "t1", "alice@gmail.com", "Bot <BOT@gmail.com>", "Help");

    let outcomes = h.reconcile_all();

    assert_eq!(outcomes, vec![MessageOutcome::NoAssignee { replied: true }]);
    assert!(h.store.tasks().is_empty());
    assert!(h.store.create_attempts().is_empty());

    let sent = h.mailbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].thread_id, "t1");
    assert_eq!(sent[0].subject, "Re: Help");
    assert_eq!(sent[0].envelope.to, vec!["alice@gmail.com"]);
    let raw = String::from_utf8(
        base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE, &sent[0].raw)
            .expect("base64"),
    )
    .expect("utf8");
    assert!(raw.contains(NO_ASSIGNEE_REPLY));
}

#[test]
fn replies_never_address_the_bot() {
    let h = harness();
    h.mailbox.deliver_with_headers(
        "m1",
        "t1",
        &[
            ("From", "alice@gmail.com".to_string()),
            ("To", "bot@gmail.com".to_string()),
            ("Cc", "Bot@Gmail.com, dave@gmail.com".to_string()),
            ("Subject", "cc only".to_string()),
        ],
    );

    h.reconcile_all();

    for outbound in h.mailbox.sent() {
        assert!(outbound.envelope.to.iter().all(|a| !a.eq_ignore_ascii_case(BOT)));
        assert!(outbound.envelope.cc.iter().all(|a| !a.eq_ignore_ascii_case(BOT)));
    }
}

#[test]
fn create_retries_with_fresh_login_and_keeps_body_alive() {
    let h = harness();
    h.store.fail_creates_with(&[503, 401]);
    h.mailbox
        .deliver("m1", "t1", "alice@gmail.com", "bot@gmail.com, bob@gmail.com", "flaky");

    let outcomes = h.reconcile_all();

    assert_eq!(outcomes, vec![MessageOutcome::Created { task_id: 1 }]);
    let attempts = h.store.create_attempts();
    assert_eq!(attempts.len(), 3);
    for attempt in &attempts {
        assert_eq!(attempt.body.as_deref(), Some("<p>body of m1</p>"));
    }
    assert_eq!(h.store.reauthentications(), 2);
    assert_eq!(h.downloads_left(), 0);
    assert!(h.ledger.load().expect("ledger").is_empty());
}

#[test]
fn exhausted_retries_land_in_pending_ledger() {
    let h = harness();
    h.store.fail_creates_with(&[500, 502, 503]);
    h.mailbox
        .deliver("m1", "t1", "alice@gmail.com", "bot@gmail.com, bob@gmail.com", "down");

    let outcomes = h.reconcile_all();

    assert!(matches!(outcomes[0], MessageOutcome::Deferred { .. }));
    assert_eq!(h.store.create_attempts().len(), 3);
    assert!(h.store.tasks().is_empty());
    assert_eq!(h.downloads_left(), 0);

    let pending = h.ledger.load().expect("ledger");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message_id(), "m1");
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].message.to, vec!["bot@gmail.com", "bob@gmail.com"]);
}

#[test]
fn client_errors_are_not_retried() {
    let h = harness();
    h.store.fail_creates_with(&[422]);
    h.mailbox
        .deliver("m1", "t1", "alice@gmail.com", "bot@gmail.com, bob@gmail.com", "bad");

    let outcomes = h.reconcile_all();

    assert!(matches!(outcomes[0], MessageOutcome::Failed { .. }));
    assert_eq!(h.store.create_attempts().len(), 1);
    assert_eq!(h.store.reauthentications(), 0);
    assert!(h.ledger.load().expect("ledger").is_empty());
}

#[test]
fn messages_are_read_once_even_when_processing_fails() {
    let h = harness();
    h.store.fail_creates_with(&[422]);
    h.mailbox
        .deliver("m1", "t1", "alice@gmail.com", "bot@gmail.com, bob@gmail.com", "bad");

    h.reconcile_all();
    let second = h.reconcile_all();

    assert!(second.is_empty());
    assert_eq!(h.mailbox.read_ids(), vec!["m1"]);
}

#[test]
fn message_without_body_is_skipped() {
    let h = harness();
    h.mailbox
        .deliver("m1", "t1", "alice@gmail.com", "bot@gmail.com, bob@gmail.com", "no body");
    let fetched = h.reader.fetch_unread(5, BodyMode::Skip).expect("fetch");

    let outcomes: Vec<_> = fetched
        .messages
        .into_iter()
        .map(|message| h.reconciler.reconcile(message))
        .collect();

    assert_eq!(outcomes, vec![MessageOutcome::MissingBody]);
    assert!(h.store.create_attempts().is_empty());
}

#[test]
fn process_counts_each_batch_outcome() {
    let h = harness();
    h.store.insert(open_task(
        5,
        "t2",
        Criticality::Medium,
        Utc.with_ymd_and_hms(2024, 6, 30, 8, 0, 0).unwrap(),
        None,
    ));
    h.mailbox
        .deliver("m1", "t1", "alice@gmail.com", "bot@gmail.com, bob@gmail.com", "new");
    h.mailbox
        .deliver("m2", "t2", "alice@gmail.com", "bot@gmail.com, bob@gmail.com", "Re: old");
    h.mailbox
        .deliver("m3", "t3", "alice@gmail.com", "bot@gmail.com", "nobody");
    let fetched = h.reader.fetch_unread(5, BodyMode::Materialize).expect("fetch");

    let summary = h.reconciler.process(fetched.messages);

    assert_eq!(summary.created, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.no_assignee, 1);
    assert_eq!(summary.processed(), 3);
    assert_eq!(h.downloads_left(), 0);
}
