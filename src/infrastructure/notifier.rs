use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::domain::{MeetingDetails, MeetingRef, RunSummary, ScheduledSlot};

/// Best-effort outbound notifications. Failures are logged, never returned.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn meeting_created(
        &self,
        details: &MeetingDetails,
        slot: &ScheduledSlot,
        meeting: &MeetingRef,
    );

    async fn run_failed(&self, summary: &RunSummary);
}

/// Posts `{"text": ...}` to a chat webhook. Without a URL it only logs.
pub struct WebhookNotifier {
    http: Client,
    webhook_url: Option<String>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(http: Client, webhook_url: Option<String>, timeout: Duration) -> Self {
        Self {
            http,
            webhook_url,
            timeout,
        }
    }

    async fn post(&self, text: String) {
        let Some(url) = self.webhook_url.as_deref() else {
            tracing::info!(target: "notify", "{text}");
            return;
        };
        let result = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .and_then(|response| response.error_for_status());
        if let Err(err) = result {
            tracing::warn!(target: "notify", error = %err, "failed to deliver webhook notification");
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn meeting_created(
        &self,
        details: &MeetingDetails,
        slot: &ScheduledSlot,
        meeting: &MeetingRef,
    ) {
        self.post(created_text(details, slot, meeting)).await;
    }

    async fn run_failed(&self, summary: &RunSummary) {
        self.post(run_failed_text(summary)).await;
    }
}

fn created_text(details: &MeetingDetails, slot: &ScheduledSlot, meeting: &MeetingRef) -> String {
    let mut text = format!(
        "Meeting scheduled: {}\nWhen: {} ({} min, {})\nUrgency: {}\nInvitees: {}",
        details.title,
        slot.start.format("%a %Y-%m-%d %H:%M %Z"),
        details.duration_minutes,
        slot.timezone(),
        details.urgency.as_str(),
        details.invitees.join(", "),
    );
    if let Some(link) = &meeting.conference_link {
        text.push_str(&format!("\nJoin: {link}"));
    }
    if let Some(link) = &meeting.html_link {
        text.push_str(&format!("\nEvent: {link}"));
    }
    text
}

fn run_failed_text(summary: &RunSummary) -> String {
    let mut text = format!("Triage run {} needs attention.", summary.run_id);
    if let Some(err) = &summary.run_error {
        text.push_str(&format!("\nRun aborted: {err}"));
    }
    if !summary.failures.is_empty() {
        let failed = summary
            .failures
            .iter()
            .map(|f| format!("{} ({})", f.message_id, f.kind))
            .collect::<Vec<_>>()
            .join(", ");
        text.push_str(&format!("\nFailed messages: {failed}"));
    }
    text
}
