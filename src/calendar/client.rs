use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode, Url};

use crate::{
    config::CalendarConfig,
    domain::{MeetingDetails, MeetingRef, ScheduledSlot},
    error::TriageError,
    infrastructure::credentials::read_access_token,
};

use super::{
    event::{build_event, classify_failure, event_id_for, EventResponse},
    MeetingProvisioner,
};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/calendars";

pub struct GoogleCalendarProvisioner {
    http: Client,
    config: CalendarConfig,
    credentials_path: String,
    timeout: Duration,
    api_base: String,
}

impl GoogleCalendarProvisioner {
    pub fn new(
        http: Client,
        config: CalendarConfig,
        credentials_path: String,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            config,
            credentials_path,
            timeout,
            api_base: CALENDAR_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn events_url(&self, event_id: Option<&str>) -> Result<Url, TriageError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|err| TriageError::ProvisionerRejected(err.to_string()))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                TriageError::ProvisionerRejected("calendar base url cannot be a base".into())
            })?;
            segments.push(&self.config.calendar_id).push("events");
            if let Some(id) = event_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn token(&self) -> Result<String, TriageError> {
        read_access_token(&self.credentials_path)
            .await
            .map_err(|err| TriageError::ProvisionerRateLimited {
                detail: format!("access token unavailable: {err:#}"),
                retry_after: None,
            })
    }

    async fn fetch_existing(&self, token: &str, event_id: &str) -> Result<MeetingRef, TriageError> {
        let response = self
            .http
            .get(self.events_url(Some(event_id))?)
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response).await?;
        parse_event(response).await
    }
}

#[async_trait]
impl MeetingProvisioner for GoogleCalendarProvisioner {
    async fn create(
        &self,
        details: &MeetingDetails,
        slot: &ScheduledSlot,
        invitees: &[String],
    ) -> Result<MeetingRef, TriageError> {
        let token = self.token().await?;
        let event = build_event(details, slot, invitees);
        let response = self
            .http
            .post(self.events_url(None)?)
            .bearer_auth(&token)
            .query(&[("conferenceDataVersion", "1"), ("sendUpdates", "all")])
            .timeout(self.timeout)
            .json(&event)
            .send()
            .await
            .map_err(transport_error)?;

        // The event id is derived from the message id, so a conflict means an
        // earlier attempt already created this meeting.
        if response.status() == StatusCode::CONFLICT {
            let event_id = event_id_for(&details.source_message_id);
            tracing::info!(
                target: "calendar",
                message_id = %details.source_message_id,
                event_id = %event_id,
                "event already exists; reusing it"
            );
            return self.fetch_existing(&token, &event_id).await;
        }

        let response = ensure_success(response).await?;
        let meeting = parse_event(response).await?;
        tracing::info!(
            target: "calendar",
            message_id = %details.source_message_id,
            event_id = %meeting.event_id,
            start = %slot.start,
            invitees = invitees.len(),
            "calendar event created"
        );
        Ok(meeting)
    }
}

fn transport_error(err: reqwest::Error) -> TriageError {
    TriageError::ProvisionerRateLimited {
        detail: format!("calendar request failed: {err}"),
        retry_after: None,
    }
}

async fn ensure_success(response: Response) -> Result<Response, TriageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status, &body, retry_after))
}

async fn parse_event(response: Response) -> Result<MeetingRef, TriageError> {
    let event: EventResponse = response.json().await.map_err(|err| {
        TriageError::ProvisionerRejected(format!("unreadable calendar response: {err}"))
    })?;
    event.into_meeting()
}
