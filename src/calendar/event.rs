use std::time::Duration;

use chrono::SecondsFormat;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{MeetingDetails, MeetingRef, ScheduledSlot},
    error::TriageError,
};

const EVENT_ID_PREFIX: &str = "triage";

/// Calendar event ids only allow `[a-v0-9]`; hex-encoding the message id
/// keeps the mapping stable and collision-free.
pub fn event_id_for(message_id: &str) -> String {
    let mut id = String::with_capacity(EVENT_ID_PREFIX.len() + message_id.len() * 2);
    id.push_str(EVENT_ID_PREFIX);
    for byte in message_id.as_bytes() {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub id: String,
    pub summary: String,
    pub description: String,
    pub start: EventTime,
    pub end: EventTime,
    pub attendees: Vec<Attendee>,
    pub conference_data: ConferenceRequestData,
    pub reminders: Reminders,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Serialize)]
pub struct Attendee {
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceRequestData {
    pub create_request: CreateConferenceRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConferenceRequest {
    pub request_id: String,
    pub conference_solution_key: ConferenceSolutionKey,
}

#[derive(Debug, Serialize)]
pub struct ConferenceSolutionKey {
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminders {
    pub use_default: bool,
    pub overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Serialize)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: u32,
}

pub fn build_event(
    details: &MeetingDetails,
    slot: &ScheduledSlot,
    invitees: &[String],
) -> EventRequest {
    let id = event_id_for(&details.source_message_id);
    let time_zone = slot.timezone().to_string();
    EventRequest {
        id: id.clone(),
        summary: details.title.clone(),
        description: details.description.clone(),
        start: EventTime {
            date_time: slot.start.to_rfc3339_opts(SecondsFormat::Secs, false),
            time_zone: time_zone.clone(),
        },
        end: EventTime {
            date_time: slot.end.to_rfc3339_opts(SecondsFormat::Secs, false),
            time_zone,
        },
        attendees: invitees
            .iter()
            .map(|email| Attendee {
                email: email.clone(),
            })
            .collect(),
        conference_data: ConferenceRequestData {
            create_request: CreateConferenceRequest {
                request_id: id,
                conference_solution_key: ConferenceSolutionKey {
                    r#type: "hangoutsMeet".into(),
                },
            },
        },
        reminders: Reminders {
            use_default: false,
            overrides: vec![
                ReminderOverride {
                    method: "email".into(),
                    minutes: 24 * 60,
                },
                ReminderOverride {
                    method: "popup".into(),
                    minutes: 15,
                },
            ],
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub html_link: Option<String>,
    #[serde(default)]
    pub hangout_link: Option<String>,
    #[serde(default)]
    pub conference_data: Option<ConferenceData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceData {
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    #[serde(default)]
    pub entry_point_type: String,
    #[serde(default)]
    pub uri: String,
}

impl EventResponse {
    /// Deleted events keep their id reserved, so a lookup after a conflict
    /// can return a cancelled event that nobody will attend.
    pub fn into_meeting(self) -> Result<MeetingRef, TriageError> {
        if self.status.as_deref() == Some("cancelled") {
            return Err(TriageError::ProvisionerRejected(format!(
                "calendar event {} was cancelled",
                self.id
            )));
        }
        let video = self.conference_data.and_then(|data| {
            data.entry_points
                .into_iter()
                .find(|entry| entry.entry_point_type == "video" && !entry.uri.is_empty())
                .map(|entry| entry.uri)
        });
        Ok(MeetingRef {
            event_id: self.id,
            conference_link: video.or(self.hangout_link),
            html_link: self.html_link,
        })
    }
}

/// Maps a non-success calendar response onto the retry taxonomy.
pub fn classify_failure(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> TriageError {
    let quota = status == StatusCode::FORBIDDEN
        && (body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded"));
    let detail = format!(
        "calendar returned {status}: {}",
        body.chars().take(300).collect::<String>()
    );
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
        || quota
    {
        TriageError::ProvisionerRateLimited {
            detail,
            retry_after,
        }
    } else {
        TriageError::ProvisionerRejected(detail)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{domain::Urgency, engine::schedule::next_business_slot};

    fn details() -> MeetingDetails {
        MeetingDetails {
            source_message_id: "18c2f".into(),
            title: "Deadline sync".into(),
            description: "Align on timeline".into(),
            duration_minutes: 60,
            urgency: Urgency::High,
            invitees: vec!["john@co.io".into(), "team@co.io".into()],
        }
    }

    #[test]
    fn event_ids_use_the_allowed_alphabet() {
        let id = event_id_for("18c2f-Z/");
        assert!(id.len() >= 5);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='v').contains(&c)));
        assert_eq!(event_id_for("18c2f"), event_id_for("18c2f"));
        assert_ne!(event_id_for("ab"), event_id_for("ba"));
    }

    #[test]
    fn request_body_matches_calendar_schema() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 15, 0, 0).unwrap();
        let slot = next_business_slot(
            now,
            chrono_tz::Asia::Seoul,
            chrono::NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            60,
        );
        let details = details();
        let body = serde_json::to_value(build_event(&details, &slot, &details.invitees)).unwrap();

        assert_eq!(body["id"], event_id_for("18c2f"));
        assert_eq!(body["summary"], "Deadline sync");
        assert_eq!(body["start"]["dateTime"], "2025-01-13T14:00:00+09:00");
        assert_eq!(body["end"]["dateTime"], "2025-01-13T15:00:00+09:00");
        assert_eq!(body["start"]["timeZone"], "Asia/Seoul");
        assert_eq!(body["attendees"][1]["email"], "team@co.io");
        assert_eq!(
            body["conferenceData"]["createRequest"]["conferenceSolutionKey"]["type"],
            "hangoutsMeet"
        );
        assert_eq!(body["reminders"]["overrides"][0]["minutes"], 1440);
    }

    #[test]
    fn meeting_ref_prefers_video_entry_point() {
        let event: EventResponse = serde_json::from_value(serde_json::json!({
            "id": "triage31",
            "htmlLink": "https://calendar.google.com/event?eid=x",
            "hangoutLink": "https://meet.google.com/old-link",
            "conferenceData": { "entryPoints": [
                { "entryPointType": "phone", "uri": "tel:+1-555" },
                { "entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij" }
            ]}
        }))
        .unwrap();
        let meeting = event.into_meeting().unwrap();
        assert_eq!(meeting.event_id, "triage31");
        assert_eq!(
            meeting.conference_link.as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
    }

    #[test]
    fn cancelled_events_are_not_reused() {
        let event: EventResponse = serde_json::from_value(serde_json::json!({
            "id": "triage31",
            "status": "cancelled",
            "hangoutLink": "https://meet.google.com/abc-defg-hij"
        }))
        .unwrap();
        assert!(matches!(
            event.into_meeting(),
            Err(TriageError::ProvisionerRejected(_))
        ));

        let confirmed: EventResponse =
            serde_json::from_value(serde_json::json!({ "id": "triage31", "status": "confirmed" }))
                .unwrap();
        assert_eq!(confirmed.into_meeting().unwrap().event_id, "triage31");
    }

    #[test]
    fn failures_split_into_retryable_and_terminal() {
        let retryable = [
            (StatusCode::TOO_MANY_REQUESTS, ""),
            (StatusCode::SERVICE_UNAVAILABLE, ""),
            (StatusCode::FORBIDDEN, r#"{"error":{"errors":[{"reason":"rateLimitExceeded"}]}}"#),
        ];
        for (status, body) in retryable {
            assert!(matches!(
                classify_failure(status, body, None),
                TriageError::ProvisionerRateLimited { .. }
            ));
        }
        let terminal = [
            (StatusCode::BAD_REQUEST, "Invalid attendee email."),
            (StatusCode::FORBIDDEN, "forbiddenForNonOrganizer"),
            (StatusCode::NOT_FOUND, "calendar not found"),
        ];
        for (status, body) in terminal {
            assert!(matches!(
                classify_failure(status, body, None),
                TriageError::ProvisionerRejected(_)
            ));
        }
    }
}
