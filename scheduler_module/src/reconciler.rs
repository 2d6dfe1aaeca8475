use std::sync::Arc;

use chrono::Utc;
use mail_module::{BodyArtifact, InboundMessage, MailProvider, ReplyComposer};
use task_store_module::{BackendError, NewTask, Task, TaskStore};
use tracing::{error, info, warn};

use crate::pending::PendingLedger;

pub const TASK_CREATE_ATTEMPTS: u32 = 3;
pub const NO_ASSIGNEE_REPLY: &str = "No assignee found. Skipping task creation.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Created { task_id: i64 },
    Updated { task_id: i64 },
    NoAssignee { replied: bool },
    MissingBody,
    /// Saved to the pending ledger for a later tick.
    Deferred { error: String },
    Failed { error: String },
}

impl MessageOutcome {
    /// True when the message needs no further attempts.
    pub fn is_settled(&self) -> bool {
        !matches!(self, MessageOutcome::Deferred { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub fetched: usize,
    pub skipped_at_fetch: usize,
    pub created: usize,
    pub updated: usize,
    pub no_assignee: usize,
    pub missing_body: usize,
    pub deferred: usize,
    pub failed: usize,
    pub recovered: usize,
}

impl IngestionSummary {
    pub fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Created { .. } => self.created += 1,
            MessageOutcome::Updated { .. } => self.updated += 1,
            MessageOutcome::NoAssignee { .. } => self.no_assignee += 1,
            MessageOutcome::MissingBody => self.missing_body += 1,
            MessageOutcome::Deferred { .. } => self.deferred += 1,
            MessageOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Adds the outcome counters of `other`. Fetch counters are left alone.
    pub fn merge(&mut self, other: &IngestionSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.no_assignee += other.no_assignee;
        self.missing_body += other.missing_body;
        self.deferred += other.deferred;
        self.failed += other.failed;
        self.recovered += other.recovered;
    }

    /// Messages that reached a terminal outcome this tick.
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.no_assignee + self.missing_body + self.failed
    }
}

/// Maps inbound messages onto backend tasks: one task per thread.
pub struct TaskReconciler<M, S> {
    mail: Arc<M>,
    store: Arc<S>,
    composer: ReplyComposer,
    ledger: Option<PendingLedger>,
}

impl<M, S> TaskReconciler<M, S>
where
    M: MailProvider,
    S: TaskStore,
{
    pub fn new(mail: Arc<M>, store: Arc<S>, composer: ReplyComposer) -> Self {
        Self {
            mail,
            store,
            composer,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: PendingLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Reconciles a batch. One message failing never stops the rest.
    pub fn process(&self, messages: Vec<InboundMessage>) -> IngestionSummary {
        let mut summary = IngestionSummary::default();
        for message in messages {
            let outcome = self.reconcile(message);
            summary.record(&outcome);
        }
        summary
    }

    /// Reconciles one message. Its body file is removed once this returns.
    pub fn reconcile(&self, mut message: InboundMessage) -> MessageOutcome {
        let Some(body) = message.body.take() else {
            warn!("message {} has no body, skipping", message.message_id);
            return MessageOutcome::MissingBody;
        };

        let existing = match self.store.find_task_by_thread(&message.thread_id) {
            Ok(existing) => existing,
            Err(err) => return self.fail(&message, "task lookup", err),
        };

        if let Some(task) = existing {
            return match self.store.update_task_body(task.id, body.path()) {
                Ok(updated) => {
                    info!(
                        "thread {} already tracked by task {}, body refreshed",
                        message.thread_id, updated.id
                    );
                    MessageOutcome::Updated { task_id: updated.id }
                }
                Err(err) => self.fail(&message, "task update", err),
            };
        }

        let assignees = assignee_candidates(self.composer.bot_address(), &message);
        let Some(assignee) = assignees.first() else {
            info!(
                "no assignee for message {} on thread {}, replying",
                message.message_id, message.thread_id
            );
            let replied = match self.composer.reply_on_thread(
                self.mail.as_ref(),
                &message.thread_id,
                NO_ASSIGNEE_REPLY,
            ) {
                Ok(_) => true,
                Err(err) => {
                    error!(
                        "failed to send no-assignee reply on thread {}: {}",
                        message.thread_id, err
                    );
                    false
                }
            };
            return MessageOutcome::NoAssignee { replied };
        };

        let new_task = NewTask::open(
            message.sender.clone(),
            assignee.clone(),
            message.subject.clone(),
            message.thread_id.clone(),
        );
        match self.create_with_retries(&new_task, &body) {
            Ok(task) => {
                info!(
                    "created task {} for thread {} ({} -> {})",
                    task.id, task.thread_id, task.creator_name, task.assignee_name
                );
                MessageOutcome::Created { task_id: task.id }
            }
            Err(err) => self.fail(&message, "task create", err),
        }
    }

    /// Up to [`TASK_CREATE_ATTEMPTS`] tries, logging in again before each retry.
    /// The body artifact stays alive for the whole loop.
    fn create_with_retries(&self, new_task: &NewTask, body: &BodyArtifact) -> Result<Task, BackendError> {
        let mut attempt = 1;
        loop {
            let result = self.store.create_task(new_task, body.path());
            let err = match result {
                Ok(task) => return Ok(task),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= TASK_CREATE_ATTEMPTS {
                return Err(err);
            }
            warn!(
                "task create for thread {} failed (attempt {}/{}): {}",
                new_task.thread_id, attempt, TASK_CREATE_ATTEMPTS, err
            );
            attempt += 1;
            if let Err(auth_err) = self.store.reauthenticate() {
                warn!("re-authentication before retry failed: {}", auth_err);
                if !auth_err.is_retryable() {
                    return Err(auth_err);
                }
            }
        }
    }

    fn fail(&self, message: &InboundMessage, stage: &str, err: BackendError) -> MessageOutcome {
        let error = format!("{} failed: {}", stage, err);
        if !err.is_retryable() {
            error!("message {} dropped: {}", message.message_id, error);
            return MessageOutcome::Failed { error };
        }
        let Some(ledger) = &self.ledger else {
            error!("message {} lost after retries: {}", message.message_id, error);
            return MessageOutcome::Failed { error };
        };
        match ledger.record(message, &error, Utc::now()) {
            Ok(_) => {
                warn!(
                    "message {} deferred to pending ledger: {}",
                    message.message_id, error
                );
                MessageOutcome::Deferred { error }
            }
            Err(ledger_err) => {
                error!(
                    "message {} could not be saved for retry ({}): {}",
                    message.message_id, ledger_err, error
                );
                MessageOutcome::Failed { error }
            }
        }
    }
}

/// Direct recipients other than the bot, in header order.
pub fn assignee_candidates(bot_address: &str, message: &InboundMessage) -> Vec<String> {
    message
        .to
        .iter()
        .filter(|address| !address.eq_ignore_ascii_case(bot_address))
        .cloned()
        .collect()
}
