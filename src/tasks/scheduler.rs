use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, MutexGuard};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{domain::RunSummary, infrastructure::shutdown::Shutdown};

use super::pipeline::TriagePipeline;

/// Serializes runs inside this process. A tick that finds the gate held is
/// skipped rather than queued.
pub type RunGate = Arc<Mutex<()>>;

pub fn new_run_gate() -> RunGate {
    Arc::new(Mutex::new(()))
}

/// Runs the pipeline unless another run is still active.
pub async fn run_guarded(
    pipeline: &TriagePipeline,
    gate: &RunGate,
    shutdown: &Shutdown,
) -> Option<RunSummary> {
    let Ok(_guard) = gate.try_lock() else {
        tracing::warn!(target: "scheduler", "previous triage run still active; tick skipped");
        return None;
    };
    let mut listener = shutdown.subscribe();
    if listener.is_triggered() {
        return None;
    }
    Some(pipeline.run_once(&mut listener).await)
}

/// Blocks until no run holds the gate, then keeps it held so no new run can
/// start. Not time-limited: every external call inside a run carries its own
/// timeout, and a provisioning call must not be cut off midway.
pub async fn wait_for_active_run(gate: &RunGate) -> MutexGuard<'_, ()> {
    if let Ok(guard) = gate.try_lock() {
        return guard;
    }
    tracing::info!(target: "scheduler", "waiting for the active triage run to finish");
    gate.lock().await
}

pub async fn configure_triage_job(
    cron_spec: &str,
    pipeline: Arc<TriagePipeline>,
    gate: RunGate,
    shutdown: Shutdown,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let label = cron_spec.to_string();
    let job = Job::new_async(cron_spec, move |_id, _l| {
        let pipeline = pipeline.clone();
        let gate = gate.clone();
        let shutdown = shutdown.clone();
        let cron_label = label.clone();
        Box::pin(async move {
            tracing::debug!(target: "scheduler", cron = %cron_label, "triage tick");
            run_guarded(&pipeline, &gate, &shutdown).await;
        })
    })?;
    scheduler.add(job).await?;
    tracing::info!(target: "scheduler", cron = %cron_spec, "triage job registered");
    scheduler.start().await?;
    Ok(scheduler)
}
