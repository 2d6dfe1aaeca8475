use std::sync::Arc;

use chrono::{DateTime, Utc};
use mail_module::{MailProvider, ReplyComposer};
use task_store_module::{BackendError, Task, TaskStatus, TaskStore};
use tracing::{debug, error, info};

use crate::policy::ReminderPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderOutcome {
    NotDue,
    Sent { task_id: i64 },
    /// Nothing was recorded; the next sweep tries again.
    SendFailed { task_id: i64, error: String },
    /// The reminder went out but the backend did not record it.
    RecordFailed { task_id: i64, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub reminded: usize,
    pub not_due: usize,
    pub send_failed: usize,
    pub record_failed: usize,
}

impl SweepSummary {
    fn record(&mut self, outcome: &ReminderOutcome) {
        self.checked += 1;
        match outcome {
            ReminderOutcome::NotDue => self.not_due += 1,
            ReminderOutcome::Sent { .. } => self.reminded += 1,
            ReminderOutcome::SendFailed { .. } => self.send_failed += 1,
            ReminderOutcome::RecordFailed { .. } => self.record_failed += 1,
        }
    }
}

/// Sends reminder replies on the threads of overdue open tasks.
pub struct ReminderSweeper<M, S> {
    mail: Arc<M>,
    store: Arc<S>,
    composer: ReplyComposer,
    policy: ReminderPolicy,
    ui_base_url: String,
}

impl<M, S> ReminderSweeper<M, S>
where
    M: MailProvider,
    S: TaskStore,
{
    pub fn new(
        mail: Arc<M>,
        store: Arc<S>,
        composer: ReplyComposer,
        policy: ReminderPolicy,
        ui_base_url: impl Into<String>,
    ) -> Self {
        Self {
            mail,
            store,
            composer,
            policy,
            ui_base_url: ui_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn sweep(&self) -> Result<SweepSummary, BackendError> {
        self.sweep_at(Utc::now())
    }

    /// A failure listing open tasks fails the sweep; per-task failures are counted.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepSummary, BackendError> {
        let tasks = self.store.open_tasks()?;
        let mut summary = SweepSummary::default();
        for task in &tasks {
            if task.status != TaskStatus::Open {
                continue;
            }
            let outcome = self.remind(task, now);
            summary.record(&outcome);
        }
        if summary.checked > 0 {
            info!(
                "reminder sweep: {} open, {} reminded, {} not due, {} send failures, {} record failures",
                summary.checked,
                summary.reminded,
                summary.not_due,
                summary.send_failed,
                summary.record_failed
            );
        }
        Ok(summary)
    }

    pub fn remind(&self, task: &Task, now: DateTime<Utc>) -> ReminderOutcome {
        let baseline = task.reminder_baseline();
        if !self.policy.is_due(task.criticality, baseline, now) {
            debug!(
                "task {} ({}) not due, last activity {}",
                task.id, task.criticality, baseline
            );
            return ReminderOutcome::NotDue;
        }

        let html = self.reminder_html(task);
        if let Err(err) = self
            .composer
            .reply_on_thread(self.mail.as_ref(), &task.thread_id, &html)
        {
            error!("failed to send reminder for task {}: {}", task.id, err);
            return ReminderOutcome::SendFailed {
                task_id: task.id,
                error: err.to_string(),
            };
        }

        match self.store.mark_reminder_sent(task.id) {
            Ok(_) => {
                info!("sent reminder for task {} to {}", task.id, task.assignee_name);
                ReminderOutcome::Sent { task_id: task.id }
            }
            Err(err) => {
                error!(
                    "reminder for task {} sent but not recorded: {}",
                    task.id, err
                );
                ReminderOutcome::RecordFailed {
                    task_id: task.id,
                    error: err.to_string(),
                }
            }
        }
    }

    pub fn task_edit_url(&self, task_id: i64) -> String {
        format!("{}/tasks/{}/edit", self.ui_base_url, task_id)
    }

    pub fn reminder_html(&self, task: &Task) -> String {
        let url = self.task_edit_url(task.id);
        format!(
            "<p>This is a reminder for the task. Please check this at your earliest convenience.</p>\n\
             <p>Task Criticality: {}</p>\n\
             <p>Task Status: {}</p>\n\
             <p>If the task is completed, please mark it as 'FIXED' or 'CLOSED'.</p>\n\
             <p>Here: <a href=\"{url}\">{url}</a></p>",
            task.criticality,
            task.status,
            url = url
        )
    }
}
