use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use mail_module::{
    BodyMode, DomainAllowlist, GmailClient, MailError, MailProvider, MailReader, ReplyComposer,
};
use task_store_module::{BackendSession, HttpTaskStore, TaskStore};
use tracing::{error, info, warn};

use crate::config::TrackerConfig;
use crate::jobs::{sleep_until, JobControl, PeriodicJob};
use crate::pending::PendingLedger;
use crate::reconciler::{IngestionSummary, MessageOutcome, TaskReconciler};
use crate::sweeper::ReminderSweeper;
use crate::BoxError;

/// One ingestion tick: retry pending messages, then read new mail.
pub struct IngestionJob<M, S> {
    reader: MailReader<M>,
    reconciler: TaskReconciler<M, S>,
    ledger: Option<PendingLedger>,
    max_unread: usize,
}

impl<M, S> IngestionJob<M, S>
where
    M: MailProvider,
    S: TaskStore,
{
    pub fn new(
        reader: MailReader<M>,
        reconciler: TaskReconciler<M, S>,
        ledger: Option<PendingLedger>,
        max_unread: usize,
    ) -> Self {
        Self {
            reader,
            reconciler,
            ledger,
            max_unread,
        }
    }

    pub fn tick(&self) -> Result<IngestionSummary, MailError> {
        let mut summary = IngestionSummary::default();
        self.drain_pending(&mut summary);

        let fetched = self.reader.fetch_unread(self.max_unread, BodyMode::Materialize)?;
        summary.fetched = fetched.messages.len() + fetched.skipped.len();
        summary.skipped_at_fetch = fetched.skipped.len();
        summary.merge(&self.reconciler.process(fetched.messages));
        Ok(summary)
    }

    fn drain_pending(&self, summary: &mut IngestionSummary) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        let entries = match ledger.load() {
            Ok(entries) => entries,
            Err(err) => {
                error!("cannot read pending ledger: {}", err);
                return;
            }
        };
        if entries.is_empty() {
            return;
        }
        info!("retrying {} pending message(s)", entries.len());

        for entry in entries {
            let message_id = entry.message_id().to_string();
            let body = match self.reader.materialize_body(&message_id) {
                Ok(body) => body,
                Err(err) if err.is_retryable() => {
                    warn!("pending message {} body unavailable: {}", message_id, err);
                    if let Err(ledger_err) =
                        ledger.record(&entry.message, &err.to_string(), Utc::now())
                    {
                        error!("cannot update pending ledger: {}", ledger_err);
                    }
                    continue;
                }
                Err(err) => {
                    error!(
                        "pending message {} dropped, body gone for good: {}",
                        message_id, err
                    );
                    summary.failed += 1;
                    if let Err(ledger_err) = ledger.remove(&message_id) {
                        error!("cannot remove {} from pending ledger: {}", message_id, ledger_err);
                    }
                    continue;
                }
            };

            let outcome = self.reconciler.reconcile(entry.into_inbound(body));
            summary.record(&outcome);
            if !outcome.is_settled() {
                continue;
            }
            if matches!(
                outcome,
                MessageOutcome::Created { .. } | MessageOutcome::Updated { .. }
            ) {
                summary.recovered += 1;
            }
            if let Err(err) = ledger.remove(&message_id) {
                error!("cannot remove {} from pending ledger: {}", message_id, err);
            }
        }
    }
}

impl<M, S> PeriodicJob for IngestionJob<M, S>
where
    M: MailProvider + Send + Sync + 'static,
    S: TaskStore + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "ingestion"
    }

    fn run_once(&mut self) {
        match self.tick() {
            Ok(summary) => info!(
                "ingestion tick: fetched={} skipped={} created={} updated={} no_assignee={} deferred={} failed={} recovered={}",
                summary.fetched,
                summary.skipped_at_fetch,
                summary.created,
                summary.updated,
                summary.no_assignee,
                summary.deferred,
                summary.failed,
                summary.recovered
            ),
            Err(err) => error!("ingestion tick failed: {}", err),
        }
    }
}

pub struct ReminderJob<M, S> {
    sweeper: ReminderSweeper<M, S>,
}

impl<M, S> ReminderJob<M, S> {
    pub fn new(sweeper: ReminderSweeper<M, S>) -> Self {
        Self { sweeper }
    }
}

impl<M, S> PeriodicJob for ReminderJob<M, S>
where
    M: MailProvider + Send + Sync + 'static,
    S: TaskStore + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "reminders"
    }

    fn run_once(&mut self) {
        if let Err(err) = self.sweeper.sweep() {
            error!("reminder sweep failed: {}", err);
        }
    }
}

/// Polls the backend health endpoint until it answers. Returns false if
/// stopped first.
pub fn wait_for_backend(store: &HttpTaskStore, retry_every: Duration, stop: &AtomicBool) -> bool {
    loop {
        match store.health_check() {
            Ok(()) => {
                info!("task backend is reachable");
                return true;
            }
            Err(err) => {
                warn!(
                    "task backend not ready ({}), retrying in {:?}",
                    err, retry_every
                );
            }
        }
        if !sleep_until(Instant::now() + retry_every, stop) {
            return false;
        }
    }
}

/// Wires the production clients and blocks until `stop` is raised.
pub fn run_service(config: TrackerConfig, stop: Arc<AtomicBool>) -> Result<(), BoxError> {
    let session = BackendSession::new(config.backend_credentials.clone());
    let store = Arc::new(HttpTaskStore::new(
        &config.api_base_url,
        session,
        config.http_timeout,
    )?);
    let gmail = Arc::new(GmailClient::new(
        &config.gmail_api_base_url,
        config.gmail_auth.clone(),
        config.http_timeout,
    )?);

    if !wait_for_backend(&store, config.backend_startup_retry, &stop) {
        info!("stopped while waiting for the task backend");
        return Ok(());
    }
    if let Err(err) = store.authenticate() {
        warn!("initial backend login failed, will retry on first use: {}", err);
    }

    let composer = ReplyComposer::new(&config.bot_email);
    let ledger = PendingLedger::new(&config.pending_messages_path);
    let reader = MailReader::new(
        gmail.clone(),
        DomainAllowlist::new(&config.allowed_sender_domains),
        config.download_dir.clone(),
    );
    let reconciler = TaskReconciler::new(gmail.clone(), store.clone(), composer.clone())
        .with_ledger(ledger.clone());
    let ingestion = IngestionJob::new(reader, reconciler, Some(ledger), config.max_unread_per_poll);
    let sweeper = ReminderSweeper::new(
        gmail,
        store,
        composer,
        config.reminder_policy.clone(),
        &config.ui_base_url,
    );

    let mut control = JobControl::new(stop);
    control.spawn(ingestion, config.ingestion_interval)?;
    control.spawn(ReminderJob::new(sweeper), config.reminder_sweep_interval)?;
    control.join();
    Ok(())
}
