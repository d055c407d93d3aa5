use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationVerdict {
    pub requires_meeting: bool,
    pub confidence: f64,
    pub meeting_title: String,
    pub meeting_description: String,
    pub suggested_duration_minutes: Option<i64>,
    pub urgency: Urgency,
    pub participants: Vec<String>,
    pub meeting_type: Option<String>,
    pub key_topics: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LowConfidence,
    NotRequired,
    AlreadyProcessed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::LowConfidence => "low_confidence",
            SkipReason::NotRequired => "not_required",
            SkipReason::AlreadyProcessed => "already_processed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeetingDetails {
    pub source_message_id: String,
    pub title: String,
    pub description: String,
    pub duration_minutes: u32,
    pub urgency: Urgency,
    pub invitees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSlot {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl ScheduledSlot {
    pub fn timezone(&self) -> &'static str {
        self.start.timezone().name()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeetingDecision {
    Create {
        details: MeetingDetails,
        slot: ScheduledSlot,
    },
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeetingRef {
    pub event_id: String,
    pub conference_link: Option<String>,
    pub html_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Created,
    Skipped,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Created => "created",
            RunOutcome::Skipped => "skipped",
            RunOutcome::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(RunOutcome::Created),
            "skipped" => Some(RunOutcome::Skipped),
            "failed" => Some(RunOutcome::Failed),
            _ => None,
        }
    }
}

/// Terminal outcome for one message. Never overwritten once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub message_id: String,
    pub run_id: String,
    pub outcome: RunOutcome,
    pub recorded_at: DateTime<Utc>,
    pub detail: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl RunRecord {
    pub fn created(message_id: &str, run_id: &str, meeting: &MeetingRef) -> Self {
        let detail = match &meeting.conference_link {
            Some(link) => format!("{} {}", meeting.event_id, link),
            None => meeting.event_id.clone(),
        };
        Self::new(message_id, run_id, RunOutcome::Created, Some(detail), None)
    }

    pub fn skipped(message_id: &str, run_id: &str, reason: SkipReason) -> Self {
        Self::new(
            message_id,
            run_id,
            RunOutcome::Skipped,
            Some(reason.as_str().to_string()),
            None,
        )
    }

    pub fn failed(message_id: &str, run_id: &str, kind: ErrorKind, detail: String) -> Self {
        Self::new(message_id, run_id, RunOutcome::Failed, Some(detail), Some(kind))
    }

    fn new(
        message_id: &str,
        run_id: &str,
        outcome: RunOutcome,
        detail: Option<String>,
        error_kind: Option<ErrorKind>,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            run_id: run_id.to_string(),
            outcome,
            recorded_at: Utc::now(),
            detail,
            error_kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMessage {
    pub message_id: String,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fetched: usize,
    pub created: usize,
    pub skipped: usize,
    pub already_processed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub failures: Vec<FailedMessage>,
    pub run_error: Option<String>,
    pub stopped_early: bool,
}

impl RunSummary {
    pub fn start(run_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            fetched: 0,
            created: 0,
            skipped: 0,
            already_processed: 0,
            failed: 0,
            deferred: 0,
            failures: Vec::new(),
            run_error: None,
            stopped_early: false,
        }
    }

    pub fn record_failure(&mut self, message_id: &str, kind: ErrorKind) {
        self.failed += 1;
        self.failures.push(FailedMessage {
            message_id: message_id.to_string(),
            kind,
        });
    }
}
