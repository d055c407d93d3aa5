use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tokio::time::timeout;

use crate::{
    ai::Classifier,
    calendar::MeetingProvisioner,
    config::AppConfig,
    db::{RunTracker, TrackerError},
    domain::{
        ClassificationVerdict, MeetingDecision, MeetingDetails, Message, RunRecord, RunSummary,
        ScheduledSlot, SkipReason,
    },
    engine::{DecisionEngine, RetryPolicy},
    error::{ErrorKind, TriageError},
    infrastructure::{notifier::Notifier, shutdown::ShutdownListener},
    mail::EmailSource,
};

/// Service handles the pipeline drives. All are swappable for tests.
#[derive(Clone)]
pub struct PipelineServices {
    pub source: Arc<dyn EmailSource>,
    pub classifier: Arc<dyn Classifier>,
    pub provisioner: Arc<dyn MeetingProvisioner>,
    pub tracker: Arc<dyn RunTracker>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_messages: usize,
    pub classifier_concurrency: usize,
    pub call_timeout: Duration,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_messages: config.triage.max_messages_per_run,
            classifier_concurrency: config.triage.classifier_concurrency.max(1),
            call_timeout: config.external_call_timeout,
        }
    }
}

pub struct TriagePipeline {
    services: PipelineServices,
    engine: DecisionEngine,
    retry: RetryPolicy,
    settings: PipelineSettings,
}

impl TriagePipeline {
    pub fn new(
        services: PipelineServices,
        engine: DecisionEngine,
        retry: RetryPolicy,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            services,
            engine,
            retry,
            settings,
        }
    }

    /// One poll-classify-decide-provision pass. Never fails as a whole: every
    /// per-message problem lands in the returned summary.
    pub async fn run_once(&self, shutdown: &mut ShutdownListener) -> RunSummary {
        let started_at = Utc::now();
        let run_id = new_run_id(started_at);
        let mut summary = RunSummary::start(run_id.clone(), started_at);
        tracing::info!(target: "pipeline", run_id = %run_id, "triage run started");

        let messages = match self
            .services
            .source
            .fetch_unread(self.settings.max_messages)
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                tracing::error!(target: "pipeline", run_id = %run_id, error = %err, "run aborted");
                summary.run_error = Some(err.to_string());
                return self.finish(summary).await;
            }
        };
        summary.fetched = messages.len();

        let pending = self.screen(messages, &mut summary).await;
        let pending_count = pending.len();

        let concurrency = self.settings.classifier_concurrency.max(1);
        let classified = tokio::select! {
            biased;
            _ = shutdown.notified() => {
                tracing::warn!(
                    target: "pipeline",
                    run_id = %run_id,
                    pending = pending_count,
                    "shutdown during classification; deferring remaining messages"
                );
                summary.stopped_early = true;
                summary.deferred += pending_count;
                Vec::new()
            }
            results = stream::iter(pending)
                .map(|message| async move {
                    let verdict = self.classify(&message).await;
                    (message, verdict)
                })
                .buffered(concurrency)
                .collect::<Vec<_>>() => results,
        };

        for (message, verdict) in classified {
            if shutdown.is_triggered() {
                summary.stopped_early = true;
                summary.deferred += 1;
                continue;
            }
            match verdict {
                Ok(verdict) => self.process(&run_id, &message, &verdict, &mut summary).await,
                Err(err) if err.is_deferrable() => {
                    tracing::warn!(
                        target: "pipeline",
                        message_id = %message.id,
                        error = %err,
                        "classification failed; message deferred"
                    );
                    summary.deferred += 1;
                }
                Err(err) => {
                    tracing::error!(target: "pipeline", message_id = %message.id, error = %err, "classification failed");
                    summary.record_failure(&message.id, err.kind());
                }
            }
        }

        self.finish(summary).await
    }

    /// Drops messages without an id and those already carrying a terminal
    /// record, so neither reaches the classifier.
    async fn screen(&self, messages: Vec<Message>, summary: &mut RunSummary) -> Vec<Message> {
        let mut pending = Vec::with_capacity(messages.len());
        for message in messages {
            if message.id.trim().is_empty() {
                tracing::error!(
                    target: "pipeline",
                    subject = %message.subject,
                    sender = %message.sender,
                    "message without identifier cannot be tracked"
                );
                summary.record_failure("", ErrorKind::InvariantViolation);
                continue;
            }
            match self.services.tracker.lookup(&message.id).await {
                Ok(Some(_)) => {
                    summary.already_processed += 1;
                    self.consume(&message.id).await;
                }
                Ok(None) => pending.push(message),
                Err(err) => {
                    tracing::warn!(
                        target: "pipeline",
                        message_id = %message.id,
                        error = %err,
                        "tracker lookup failed; message deferred"
                    );
                    summary.deferred += 1;
                }
            }
        }
        pending
    }

    async fn classify(&self, message: &Message) -> Result<ClassificationVerdict, TriageError> {
        match timeout(
            self.settings.call_timeout,
            self.services.classifier.classify(message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TriageError::ClassifierUnavailable(format!(
                "no verdict within {:?}",
                self.settings.call_timeout
            ))),
        }
    }

    async fn process(
        &self,
        run_id: &str,
        message: &Message,
        verdict: &ClassificationVerdict,
        summary: &mut RunSummary,
    ) {
        match self.services.tracker.claim(&message.id, run_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    target: "pipeline",
                    message_id = %message.id,
                    "message claimed by another run; deferred"
                );
                summary.deferred += 1;
                return;
            }
            Err(err) => {
                tracing::warn!(target: "pipeline", message_id = %message.id, error = %err, "claim failed; deferred");
                summary.deferred += 1;
                return;
            }
        }

        let prior = match self.services.tracker.lookup(&message.id).await {
            Ok(prior) => prior,
            Err(err) => {
                tracing::warn!(target: "pipeline", message_id = %message.id, error = %err, "lookup failed; deferred");
                self.release(&message.id, run_id).await;
                summary.deferred += 1;
                return;
            }
        };

        let decision = match self
            .engine
            .decide(message, verdict, prior.as_ref(), Utc::now())
        {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(target: "pipeline", message_id = %message.id, error = %err, "decision failed");
                self.release(&message.id, run_id).await;
                summary.record_failure(&message.id, err.kind());
                return;
            }
        };

        match decision {
            MeetingDecision::Skip(SkipReason::AlreadyProcessed) => {
                self.release(&message.id, run_id).await;
                summary.already_processed += 1;
                self.consume(&message.id).await;
            }
            MeetingDecision::Skip(reason) => {
                tracing::info!(
                    target: "pipeline",
                    message_id = %message.id,
                    reason = reason.as_str(),
                    confidence = verdict.confidence,
                    threshold = self.engine.threshold(),
                    "no meeting needed"
                );
                let record = RunRecord::skipped(&message.id, run_id, reason);
                match self.store(&record).await {
                    Ok(()) => {
                        summary.skipped += 1;
                        self.consume(&message.id).await;
                    }
                    Err(err) => {
                        tracing::warn!(target: "pipeline", message_id = %message.id, error = %err, "skip not recorded; deferred");
                        self.release(&message.id, run_id).await;
                        summary.deferred += 1;
                    }
                }
            }
            MeetingDecision::Create { details, slot } => {
                tracing::info!(
                    target: "pipeline",
                    message_id = %message.id,
                    thread_id = message.thread_id.as_deref().unwrap_or("-"),
                    confidence = verdict.confidence,
                    urgency = details.urgency.as_str(),
                    "meeting required"
                );
                self.provision(run_id, &details, &slot, summary).await;
            }
        }
    }

    async fn provision(
        &self,
        run_id: &str,
        details: &MeetingDetails,
        slot: &ScheduledSlot,
        summary: &mut RunSummary,
    ) {
        let message_id = details.source_message_id.as_str();
        let provisioner = self.services.provisioner.as_ref();
        let invitees = details.invitees.as_slice();

        // Not raced against shutdown: an in-flight creation always settles.
        let created = self
            .retry
            .run("create meeting", move |attempt| {
                tracing::debug!(target: "pipeline", message_id, attempt, "provisioning meeting");
                provisioner.create(details, slot, invitees)
            })
            .await;

        match created {
            Ok(meeting) => {
                let record = RunRecord::created(message_id, run_id, &meeting);
                if let Err(err) = self.store(&record).await {
                    // The claim stays held so no other run re-provisions until
                    // the lease expires.
                    tracing::error!(
                        target: "pipeline",
                        message_id,
                        event_id = %meeting.event_id,
                        error = %err,
                        "meeting created but outcome could not be recorded"
                    );
                    summary.record_failure(message_id, err.kind());
                    return;
                }
                summary.created += 1;
                tracing::info!(
                    target: "pipeline",
                    message_id,
                    event_id = %meeting.event_id,
                    start = %slot.start,
                    duration = details.duration_minutes,
                    invitees = details.invitees.len(),
                    "meeting scheduled"
                );
                self.services
                    .notifier
                    .meeting_created(details, slot, &meeting)
                    .await;
                self.consume(message_id).await;
            }
            Err(err) => {
                tracing::error!(target: "pipeline", message_id, error = %err, "meeting could not be created");
                summary.record_failure(message_id, err.kind());
                let record = RunRecord::failed(message_id, run_id, err.kind(), err.to_string());
                match self.store(&record).await {
                    Ok(()) => self.consume(message_id).await,
                    Err(store_err) => {
                        tracing::warn!(target: "pipeline", message_id, error = %store_err, "failure not recorded");
                        self.release(message_id, run_id).await;
                    }
                }
            }
        }
    }

    /// Writes a terminal record, retrying transient tracker errors. A record
    /// that already exists counts as stored.
    async fn store(&self, record: &RunRecord) -> Result<(), TriageError> {
        let tracker = self.services.tracker.as_ref();
        self.retry
            .run("record outcome", move |_| async move {
                match tracker.record(record).await {
                    Ok(()) => Ok(()),
                    Err(TrackerError::Duplicate(id)) => {
                        tracing::warn!(target: "tracker", message_id = %id, "outcome was already recorded");
                        Ok(())
                    }
                    Err(err) => Err(TriageError::from(err)),
                }
            })
            .await
    }

    async fn release(&self, message_id: &str, run_id: &str) {
        if let Err(err) = self.services.tracker.release(message_id, run_id).await {
            tracing::warn!(target: "tracker", message_id, error = %err, "failed to release claim");
        }
    }

    async fn consume(&self, message_id: &str) {
        if let Err(err) = self.services.source.mark_consumed(message_id).await {
            tracing::warn!(target: "mail", message_id, error = %err, "failed to mark message consumed");
        }
    }

    async fn finish(&self, mut summary: RunSummary) -> RunSummary {
        summary.finished_at = Some(Utc::now());
        if let Err(err) = self.services.tracker.save_summary(&summary).await {
            tracing::warn!(target: "tracker", run_id = %summary.run_id, error = %err, "failed to persist run summary");
        }
        tracing::info!(
            target: "pipeline",
            run_id = %summary.run_id,
            fetched = summary.fetched,
            created = summary.created,
            skipped = summary.skipped,
            already_processed = summary.already_processed,
            failed = summary.failed,
            deferred = summary.deferred,
            stopped_early = summary.stopped_early,
            "triage run finished"
        );
        if summary.run_error.is_some() || summary.failed > 0 {
            self.services.notifier.run_failed(&summary).await;
        }
        summary
    }
}

fn new_run_id(started_at: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        started_at.format("%Y%m%dT%H%M%S%.3fZ"),
        std::process::id()
    )
}
