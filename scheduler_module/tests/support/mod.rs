#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use mail_module::{
    MailError, MailProvider, MessageHeader, MessagePayload, MessageRef, OutboundMessage,
    ProviderMessage,
};
use task_store_module::{
    BackendError, Criticality, NewTask, Task, TaskFilter, TaskStatus, TaskStore,
};

pub const BOT: &str = "bot@gmail.com";

#[derive(Default)]
struct MailboxState {
    listing: Vec<MessageRef>,
    messages: HashMap<String, ProviderMessage>,
    raw: HashMap<String, Vec<u8>>,
    read: Vec<String>,
    sent: Vec<OutboundMessage>,
}

/// In-memory mailbox. Listing only returns messages not yet marked read.
#[derive(Default)]
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
    fail_send: Mutex<bool>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, id: &str, thread_id: &str, from: &str, to: &str, subject: &str) {
        let headers = vec![
            ("From", from.to_string()),
            ("To", to.to_string()),
            ("Subject", subject.to_string()),
            ("Message-ID", format!("<{}@mail.gmail.com>", id)),
        ];
        self.deliver_with_headers(id, thread_id, &headers);
    }

    pub fn deliver_with_headers(&self, id: &str, thread_id: &str, headers: &[(&str, String)]) {
        let mut state = self.state.lock().unwrap();
        state.listing.push(MessageRef {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
        });
        state.messages.insert(
            id.to_string(),
            ProviderMessage {
                id: id.to_string(),
                thread_id: thread_id.to_string(),
                snippet: String::new(),
                payload: MessagePayload {
                    headers: headers
                        .iter()
                        .map(|(name, value)| MessageHeader {
                            name: name.to_string(),
                            value: value.clone(),
                        })
                        .collect(),
                },
            },
        );
        state.raw.insert(
            id.to_string(),
            format!(
                "Subject: x\r\nContent-Type: text/html\r\n\r\n<p>body of {}</p>",
                id
            )
            .into_bytes(),
        );
    }

    /// Drops the stored raw message so later downloads answer 404.
    pub fn forget_raw(&self, id: &str) {
        self.state.lock().unwrap().raw.remove(id);
    }

    pub fn set_fail_send(&self, fail: bool) {
        *self.fail_send.lock().unwrap() = fail;
    }

    pub fn read_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().read.clone()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().unwrap().sent.clone()
    }
}

impl MailProvider for FakeMailbox {
    fn list_unread(&self, _query: &str, max_results: usize) -> Result<Vec<MessageRef>, MailError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .listing
            .iter()
            .filter(|message| !state.read.contains(&message.id))
            .take(max_results)
            .cloned()
            .collect())
    }

    fn get_message(&self, message_id: &str) -> Result<ProviderMessage, MailError> {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(message_id)
            .cloned()
            .ok_or_else(|| not_found(message_id))
    }

    fn get_raw_message(&self, message_id: &str) -> Result<Vec<u8>, MailError> {
        self.state
            .lock()
            .unwrap()
            .raw
            .get(message_id)
            .cloned()
            .ok_or_else(|| not_found(message_id))
    }

    fn mark_read(&self, message_id: &str) -> Result<(), MailError> {
        self.state.lock().unwrap().read.push(message_id.to_string());
        Ok(())
    }

    fn get_thread(&self, thread_id: &str) -> Result<Vec<ProviderMessage>, MailError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .listing
            .iter()
            .filter(|message| message.thread_id == thread_id)
            .filter_map(|message| state.messages.get(&message.id).cloned())
            .collect())
    }

    fn send(&self, message: &OutboundMessage) -> Result<String, MailError> {
        if *self.fail_send.lock().unwrap() {
            return Err(MailError::Status {
                status: 500,
                body: "send failed".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.sent.push(message.clone());
        Ok(format!("sent-{}", state.sent.len()))
    }
}

fn not_found(id: &str) -> MailError {
    MailError::Status {
        status: 404,
        body: format!("{} not found", id),
    }
}

/// Body contents observed by the backend, per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub task_id: Option<i64>,
    pub thread_id: String,
    pub body: Option<String>,
}

#[derive(Default)]
struct StoreState {
    tasks: Vec<Task>,
    next_id: i64,
    create_attempts: Vec<Upload>,
    updates: Vec<Upload>,
    create_failures: VecDeque<u16>,
    reauthentications: usize,
    reminders_marked: Vec<i64>,
    fail_mark_reminder: bool,
    fail_open_tasks: bool,
}

/// In-memory backend with scriptable create failures.
pub struct FakeTaskStore {
    state: Mutex<StoreState>,
    clock: DateTime<Utc>,
}

impl FakeTaskStore {
    pub fn new(clock: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                next_id: 1,
                ..Default::default()
            }),
            clock,
        }
    }

    /// Queues HTTP statuses returned by the next create calls.
    pub fn fail_creates_with(&self, statuses: &[u16]) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .extend(statuses.iter().copied());
    }

    pub fn set_fail_mark_reminder(&self, fail: bool) {
        self.state.lock().unwrap().fail_mark_reminder = fail;
    }

    pub fn set_fail_open_tasks(&self, fail: bool) {
        self.state.lock().unwrap().fail_open_tasks = fail;
    }

    pub fn insert(&self, task: Task) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(task.id + 1);
        state.tasks.push(task);
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().unwrap().tasks.clone()
    }

    pub fn create_attempts(&self) -> Vec<Upload> {
        self.state.lock().unwrap().create_attempts.clone()
    }

    pub fn updates(&self) -> Vec<Upload> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn reauthentications(&self) -> usize {
        self.state.lock().unwrap().reauthentications
    }

    pub fn reminders_marked(&self) -> Vec<i64> {
        self.state.lock().unwrap().reminders_marked.clone()
    }
}

fn read_body(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

fn status_error(status: u16) -> BackendError {
    BackendError::Status {
        status,
        body: "scripted failure".to_string(),
    }
}

impl TaskStore for FakeTaskStore {
    fn authenticate(&self) -> Result<String, BackendError> {
        Ok("token".to_string())
    }

    fn reauthenticate(&self) -> Result<String, BackendError> {
        self.state.lock().unwrap().reauthentications += 1;
        Ok("token".to_string())
    }

    fn create_task(&self, task: &NewTask, body_path: &Path) -> Result<Task, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.create_attempts.push(Upload {
            task_id: None,
            thread_id: task.thread_id.clone(),
            body: read_body(body_path),
        });
        if let Some(status) = state.create_failures.pop_front() {
            return Err(status_error(status));
        }
        let created = Task {
            id: state.next_id,
            creator_name: task.creator_name.clone(),
            assignee_name: task.assignee_name.clone(),
            subject: task.subject.clone(),
            criticality: task.criticality,
            status: task.status,
            thread_id: task.thread_id.clone(),
            html_file: Some(format!("/media/{}.html", state.next_id)),
            created_time: self.clock,
            last_reminder_sent_time: None,
        };
        state.next_id += 1;
        state.tasks.push(created.clone());
        Ok(created)
    }

    fn update_task_body(&self, task_id: i64, body_path: &Path) -> Result<Task, BackendError> {
        let mut state = self.state.lock().unwrap();
        let body = read_body(body_path);
        let task = state
            .tasks
            .iter()
            .find(|task| task.id == task_id)
            .cloned()
            .ok_or_else(|| status_error(404))?;
        state.updates.push(Upload {
            task_id: Some(task_id),
            thread_id: task.thread_id.clone(),
            body,
        });
        Ok(task)
    }

    fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, BackendError> {
        let state = self.state.lock().unwrap();
        match filter {
            TaskFilter::Status(_) if state.fail_open_tasks => Err(status_error(502)),
            // Mimics a backend doing substring matching on thread ids.
            TaskFilter::ThreadId(thread_id) => Ok(state
                .tasks
                .iter()
                .filter(|task| task.thread_id.contains(thread_id.as_str()))
                .cloned()
                .collect()),
            TaskFilter::Status(status) => Ok(state
                .tasks
                .iter()
                .filter(|task| task.status == *status)
                .cloned()
                .collect()),
        }
    }

    fn mark_reminder_sent(&self, task_id: i64) -> Result<Task, BackendError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_mark_reminder {
            return Err(status_error(500));
        }
        let clock = self.clock;
        let task = state
            .tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| status_error(404))?;
        task.last_reminder_sent_time = Some(clock);
        let task = task.clone();
        state.reminders_marked.push(task_id);
        Ok(task)
    }
}

pub fn open_task(
    id: i64,
    thread_id: &str,
    criticality: Criticality,
    created_time: DateTime<Utc>,
    last_reminder_sent_time: Option<DateTime<Utc>>,
) -> Task {
    Task {
        id,
        creator_name: "alice@gmail.com".to_string(),
        assignee_name: "bob@gmail.com".to_string(),
        subject: format!("task {}", id),
        criticality,
        status: TaskStatus::Open,
        thread_id: thread_id.to_string(),
        html_file: None,
        created_time,
        last_reminder_sent_time,
    }
}
