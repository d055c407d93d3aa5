use std::{future::Future, time::Duration};

use tokio::sync::watch;

/// Process-wide stop flag. Runs poll it between messages; teardown waits on
/// it before draining the scheduler and the active run.
#[derive(Clone)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, ShutdownListener) {
        let (sender, receiver) = watch::channel(false);
        (Self { sender }, ShutdownListener { receiver })
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn trigger(&self) {
        // `send` is a no-op while nobody is subscribed; the flag must stick
        // for listeners created afterwards.
        if !self.sender.send_replace(true) {
            tracing::info!(target: "shutdown", "shutdown requested");
        }
    }
}

impl ShutdownListener {
    pub async fn notified(&mut self) {
        if *self.receiver.borrow() {
            return;
        }
        let _ = self.receiver.changed().await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }
}

pub fn install_signal_handlers(shutdown: Shutdown) {
    let ctrlc = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc.trigger();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let term = shutdown.clone();
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::terminate()) {
                sig.recv().await;
                term.trigger();
            }
        });
    }
}

/// Awaits `task` for at most `limit`, logging when teardown gives up on it.
pub async fn bounded<F, T>(label: &str, limit: Duration, task: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, task).await {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(
                target: "shutdown",
                task = label,
                "did not finish within {:?}; continuing shutdown",
                limit
            );
            None
        }
    }
}
