use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::{
    config::TriageConfig,
    domain::{
        address::{dedup_addresses, first_address},
        ClassificationVerdict, MeetingDecision, MeetingDetails, Message, RunRecord, SkipReason,
    },
    error::TriageError,
};

use super::schedule::next_business_slot;

pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 480;
const FALLBACK_TITLE: &str = "AI Generated Meeting";

/// Pure decision step: no I/O, deterministic for a given `now`.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    threshold: f64,
    default_duration_minutes: u32,
    business_hour_start: NaiveTime,
    timezone: Tz,
    automation_email: String,
}

impl DecisionEngine {
    pub fn new(config: &TriageConfig, automation_email: &str) -> Self {
        Self {
            threshold: config.confidence_threshold,
            default_duration_minutes: config.default_duration_minutes,
            business_hour_start: config.business_hour_start,
            timezone: config.timezone,
            automation_email: automation_email.trim().to_ascii_lowercase(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `prior` is the message's existing terminal record, looked up by the
    /// caller while it holds the message claim.
    pub fn decide(
        &self,
        message: &Message,
        verdict: &ClassificationVerdict,
        prior: Option<&RunRecord>,
        now: DateTime<Utc>,
    ) -> Result<MeetingDecision, TriageError> {
        if message.id.trim().is_empty() {
            return Err(TriageError::InvariantViolation(
                "message has no identifier".to_string(),
            ));
        }

        if prior.is_some() {
            return Ok(MeetingDecision::Skip(SkipReason::AlreadyProcessed));
        }
        if !verdict.requires_meeting {
            return Ok(MeetingDecision::Skip(SkipReason::NotRequired));
        }
        if verdict.confidence < self.threshold {
            return Ok(MeetingDecision::Skip(SkipReason::LowConfidence));
        }

        let duration_minutes = self.clamp_duration(verdict.suggested_duration_minutes);
        let details = MeetingDetails {
            source_message_id: message.id.clone(),
            title: meeting_title(message, verdict),
            description: meeting_description(message, verdict),
            duration_minutes,
            urgency: verdict.urgency,
            invitees: self.invitees(message, verdict),
        };
        let slot = next_business_slot(
            now,
            self.timezone,
            self.business_hour_start,
            duration_minutes,
        );

        Ok(MeetingDecision::Create { details, slot })
    }

    fn clamp_duration(&self, suggested: Option<i64>) -> u32 {
        let minutes = match suggested {
            Some(value) if value > 0 => value.min(i64::from(MAX_DURATION_MINUTES)) as u32,
            _ => self.default_duration_minutes,
        };
        minutes.clamp(MIN_DURATION_MINUTES, MAX_DURATION_MINUTES)
    }

    fn invitees(&self, message: &Message, verdict: &ClassificationVerdict) -> Vec<String> {
        let participants = verdict
            .participants
            .iter()
            .filter_map(|entry| first_address(entry));
        let candidates = std::iter::once(message.sender.clone())
            .chain(message.recipients.iter().cloned())
            .chain(participants);

        dedup_addresses(candidates)
            .into_iter()
            .filter(|address| *address != self.automation_email)
            .filter(|address| first_address(address).as_deref() == Some(address.as_str()))
            .collect()
    }
}

fn meeting_title(message: &Message, verdict: &ClassificationVerdict) -> String {
    [verdict.meeting_title.trim(), message.subject.trim()]
        .into_iter()
        .find(|candidate| !candidate.is_empty())
        .unwrap_or(FALLBACK_TITLE)
        .to_string()
}

fn meeting_description(message: &Message, verdict: &ClassificationVerdict) -> String {
    let mut out = String::new();
    let summary = verdict.meeting_description.trim();
    if !summary.is_empty() {
        out.push_str(summary);
        out.push_str("\n\n");
    }
    if let Some(kind) = verdict.meeting_type.as_deref().filter(|k| !k.trim().is_empty()) {
        out.push_str("Meeting Type: ");
        out.push_str(kind.trim());
        out.push('\n');
    }
    if !verdict.key_topics.is_empty() {
        out.push_str("Key Topics: ");
        out.push_str(&verdict.key_topics.join(", "));
        out.push('\n');
    }
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
    out.push_str(&format!(
        "This meeting was automatically created from the email \"{}\" sent by {}.",
        message.subject.trim(),
        message.sender
    ));
    out
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    use super::*;
    use crate::{
        domain::{MeetingRef, RunOutcome, Urgency},
        error::ErrorKind,
    };

    fn engine() -> DecisionEngine {
        let config = TriageConfig {
            confidence_threshold: 0.70,
            max_messages_per_run: 50,
            default_duration_minutes: 60,
            business_hour_start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            timezone: chrono_tz::UTC,
            classifier_concurrency: 4,
            claim_lease: std::time::Duration::from_secs(900),
        };
        DecisionEngine::new(&config, "bot@co.io")
    }

    fn message(sender: &str, recipients: &[&str]) -> Message {
        Message {
            id: "msg-1".into(),
            thread_id: None,
            subject: "Project Meeting Discussion".into(),
            sender: sender.into(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            body: "Let's sync up on the requirements and timeline.".into(),
            received_at: Utc::now(),
            unread: true,
        }
    }

    fn verdict(requires_meeting: bool, confidence: f64) -> ClassificationVerdict {
        ClassificationVerdict {
            requires_meeting,
            confidence,
            meeting_title: "Project deadline sync".into(),
            meeting_description: "Align on requirements and timeline".into(),
            suggested_duration_minutes: Some(60),
            urgency: Urgency::Medium,
            participants: Vec::new(),
            meeting_type: None,
            key_topics: Vec::new(),
        }
    }

    // 2025-01-10 is a Friday.
    fn friday_afternoon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 15, 0, 0).unwrap()
    }

    fn expect_create(decision: MeetingDecision) -> (MeetingDetails, crate::domain::ScheduledSlot) {
        match decision {
            MeetingDecision::Create { details, slot } => (details, slot),
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn high_confidence_creates_meeting_with_header_invitees() {
        let msg = message("john@co.io", &["team@co.io", "manager@co.io"]);
        let decision = engine()
            .decide(&msg, &verdict(true, 0.92), None, friday_afternoon())
            .unwrap();
        let (details, slot) = expect_create(decision);
        assert_eq!(
            details.invitees,
            vec!["john@co.io", "team@co.io", "manager@co.io"]
        );
        assert_eq!(details.duration_minutes, 60);
        assert_eq!(details.title, "Project deadline sync");
        assert_eq!(details.source_message_id, "msg-1");
        assert_eq!(slot.start.weekday(), Weekday::Mon);
        assert_eq!(slot.start.hour(), 14);
    }

    #[test]
    fn not_required_wins_over_low_confidence() {
        let msg = message("john@co.io", &["team@co.io"]);
        let decision = engine()
            .decide(&msg, &verdict(false, 0.15), None, friday_afternoon())
            .unwrap();
        assert_eq!(decision, MeetingDecision::Skip(SkipReason::NotRequired));
    }

    #[test]
    fn threshold_is_inclusive() {
        let msg = message("john@co.io", &["team@co.io"]);
        let at = engine()
            .decide(&msg, &verdict(true, 0.70), None, friday_afternoon())
            .unwrap();
        assert!(matches!(at, MeetingDecision::Create { .. }));

        let below = engine()
            .decide(&msg, &verdict(true, 0.699999), None, friday_afternoon())
            .unwrap();
        assert_eq!(below, MeetingDecision::Skip(SkipReason::LowConfidence));
    }

    #[test]
    fn existing_record_always_skips() {
        let msg = message("john@co.io", &["team@co.io"]);
        let meeting = MeetingRef {
            event_id: "evt".into(),
            conference_link: None,
            html_link: None,
        };
        let priors = [
            RunRecord::created("msg-1", "run-0", &meeting),
            RunRecord::skipped("msg-1", "run-0", SkipReason::NotRequired),
            RunRecord::failed("msg-1", "run-0", ErrorKind::ProvisionerRejected, "403".into()),
        ];
        for prior in &priors {
            for v in [verdict(true, 1.0), verdict(false, 0.0), verdict(true, 0.5)] {
                let decision = engine()
                    .decide(&msg, &v, Some(prior), friday_afternoon())
                    .unwrap();
                assert_eq!(decision, MeetingDecision::Skip(SkipReason::AlreadyProcessed));
            }
        }
        assert_eq!(priors[0].outcome, RunOutcome::Created);
    }

    #[test]
    fn invitees_are_merged_once_each() {
        let msg = message("a@co.io", &["a@co.io", "b@co.io"]);
        let mut v = verdict(true, 0.9);
        v.participants = vec!["B@co.io".into(), "Carol <c@co.io>".into()];
        let (details, _) = expect_create(engine().decide(&msg, &v, None, friday_afternoon()).unwrap());
        assert_eq!(details.invitees, vec!["a@co.io", "b@co.io", "c@co.io"]);
    }

    #[test]
    fn automation_identity_and_junk_participants_are_dropped() {
        let msg = message("john@co.io", &["bot@co.io", "team@co.io"]);
        let mut v = verdict(true, 0.9);
        v.participants = vec!["Bot@Co.io".into(), "the whole team".into()];
        let (details, _) = expect_create(engine().decide(&msg, &v, None, friday_afternoon()).unwrap());
        assert_eq!(details.invitees, vec!["john@co.io", "team@co.io"]);
    }

    #[test]
    fn duration_is_clamped_or_defaulted() {
        let msg = message("john@co.io", &["team@co.io"]);
        let cases = [
            (None, 60),
            (Some(0), 60),
            (Some(-30), 60),
            (Some(5), MIN_DURATION_MINUTES),
            (Some(90), 90),
            (Some(10_000), MAX_DURATION_MINUTES),
        ];
        for (suggested, expected) in cases {
            let mut v = verdict(true, 0.9);
            v.suggested_duration_minutes = suggested;
            let (details, slot) =
                expect_create(engine().decide(&msg, &v, None, friday_afternoon()).unwrap());
            assert_eq!(details.duration_minutes, expected, "suggested {suggested:?}");
            assert_eq!(
                (slot.end - slot.start).num_minutes(),
                i64::from(expected)
            );
        }
    }

    #[test]
    fn title_falls_back_to_subject() {
        let msg = message("john@co.io", &["team@co.io"]);
        let mut v = verdict(true, 0.9);
        v.meeting_title = "   ".into();
        let (details, _) = expect_create(engine().decide(&msg, &v, None, friday_afternoon()).unwrap());
        assert_eq!(details.title, "Project Meeting Discussion");
    }

    #[test]
    fn description_carries_topics_and_origin() {
        let msg = message("john@co.io", &["team@co.io"]);
        let mut v = verdict(true, 0.9);
        v.meeting_type = Some("review".into());
        v.key_topics = vec!["timeline".into(), "scope".into()];
        let (details, _) = expect_create(engine().decide(&msg, &v, None, friday_afternoon()).unwrap());
        assert!(details.description.starts_with("Align on requirements and timeline\n\n"));
        assert!(details.description.contains("Meeting Type: review\n"));
        assert!(details.description.contains("Key Topics: timeline, scope\n"));
        assert!(details.description.ends_with("sent by john@co.io."));
    }

    #[test]
    fn missing_identifier_is_an_invariant_violation() {
        let mut msg = message("john@co.io", &["team@co.io"]);
        msg.id = String::new();
        let err = engine()
            .decide(&msg, &verdict(true, 0.9), None, friday_afternoon())
            .unwrap_err();
        assert!(matches!(err, TriageError::InvariantViolation(_)));
    }
}
