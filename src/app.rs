use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::Client;
use tokio_cron_scheduler::JobScheduler;

use crate::{
    ai::GeminiClient,
    calendar::GoogleCalendarProvisioner,
    config::AppConfig,
    db::{self, RunTracker, SqliteRunTracker},
    engine::{DecisionEngine, RetryPolicy},
    infrastructure::{
        directories::ResolvedPaths,
        notifier::WebhookNotifier,
        shutdown::{bounded, Shutdown},
    },
    mail::{AutomationFilter, GmailSource},
    tasks::{
        pipeline::{PipelineServices, PipelineSettings, TriagePipeline},
        scheduler::{
            configure_triage_job, new_run_gate, run_guarded, wait_for_active_run, RunGate,
        },
    },
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MeetingTriageApp {
    _paths: ResolvedPaths,
    config: Arc<AppConfig>,
    pipeline: Arc<TriagePipeline>,
    tracker: Arc<dyn RunTracker>,
    gate: RunGate,
    shutdown: Shutdown,
}

impl MeetingTriageApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let config = Arc::new(config);
        tracing::info!(
            target: "tracker",
            data = %paths.data_dir.display(),
            db = %paths.db_path.display(),
            "opening run tracker"
        );
        let pool = db::init_pool(&paths.db_path).await?;
        let tracker: Arc<dyn RunTracker> =
            Arc::new(SqliteRunTracker::new(pool, config.triage.claim_lease));

        let http_client = Client::builder()
            .user_agent(format!("meeting-triage-rust/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let timeout = config.external_call_timeout;

        let filter = AutomationFilter::new(
            &config.gmail.automation_sender_patterns,
            &config.automation_email,
        )
        .context("invalid automation sender pattern")?;
        let source = Arc::new(GmailSource::new(
            http_client.clone(),
            config.gmail.clone(),
            filter,
            timeout,
        ));
        let classifier = Arc::new(GeminiClient::new(
            http_client.clone(),
            config.gemini.clone(),
            timeout,
        ));
        let provisioner = Arc::new(GoogleCalendarProvisioner::new(
            http_client.clone(),
            config.calendar.clone(),
            config.gmail.credentials_path.clone(),
            timeout,
        ));
        let notifier = Arc::new(WebhookNotifier::new(
            http_client,
            config.notify.webhook_url.clone(),
            timeout,
        ));

        let pipeline = Arc::new(TriagePipeline::new(
            PipelineServices {
                source,
                classifier,
                provisioner,
                tracker: tracker.clone(),
                notifier,
            },
            DecisionEngine::new(&config.triage, &config.automation_email),
            RetryPolicy::from(&config.retry),
            PipelineSettings::from(config.as_ref()),
        ));

        match tracker.recent_summaries(1).await {
            Ok(summaries) => match summaries.first() {
                Some(last) => tracing::info!(
                    target: "tracker",
                    run_id = %last.run_id,
                    started_at = %last.started_at,
                    created = last.created,
                    failed = last.failed,
                    run_error = last.run_error.as_deref().unwrap_or("-"),
                    "previous triage run"
                ),
                None => tracing::info!(target: "tracker", "no previous triage runs recorded"),
            },
            Err(err) => {
                tracing::warn!(target: "tracker", error = %err, "could not read previous run summary")
            }
        }

        Ok(Self {
            _paths: paths,
            config,
            pipeline,
            tracker,
            gate: new_run_gate(),
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let MeetingTriageApp {
            _paths: _,
            config,
            pipeline,
            tracker,
            gate,
            shutdown,
        } = self;

        tracing::info!(
            calendar = %config.calendar.calendar_id,
            threshold = config.triage.confidence_threshold,
            timezone = %config.triage.timezone,
            "meeting triage service starting"
        );

        if config.scheduler.run_once {
            let summary = run_guarded(&pipeline, &gate, &shutdown).await;
            if let Some(summary) = summary {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            tracker.close().await;
            return Ok(());
        }

        let mut scheduler: JobScheduler = configure_triage_job(
            &config.scheduler.cron_spec,
            pipeline.clone(),
            gate.clone(),
            shutdown.clone(),
        )
        .await?;

        let mut shutdown_listener = shutdown.subscribe();
        shutdown_listener.notified().await;
        tracing::info!("stop signal received (CTRL+C / SIGTERM)");

        match bounded("scheduler", SHUTDOWN_TIMEOUT, scheduler.shutdown()).await {
            Some(Err(err)) => tracing::error!(target: "scheduler", ?err, "scheduler shutdown failed"),
            Some(Ok(())) | None => {}
        }

        // Holding the gate means no run is in flight and none can start.
        let _idle = wait_for_active_run(&gate).await;

        bounded("run tracker", SHUTDOWN_TIMEOUT, tracker.close()).await;

        tracing::info!("meeting triage service stopped");
        Ok(())
    }
}
