use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ClassificationVerdict, Message, Urgency},
    error::TriageError,
};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_BODY_CHARS: usize = 8_000;
const SYSTEM_PROMPT: &str = r#"You triage email for a busy team and decide whether a message requires scheduling a video meeting.
Only suggest a meeting if:
1. The email explicitly requests a meeting, call or discussion
2. The content suggests coordination is needed
3. Multiple people need to be aligned on something
4. There is a decision that requires group input
5. There is urgency that requires immediate attention
Do NOT suggest meetings for simple information sharing, FYI emails, automated notifications, thank-you messages or simple confirmations.
Respond with a single JSON object and nothing else:
{"requires_meeting": true/false, "meeting_title": "string", "meeting_description": "string", "suggested_duration": 60, "urgency": "low"|"medium"|"high", "participants": ["email"], "meeting_type": "discussion"|"presentation"|"review"|"standup"|"other", "key_topics": ["string"], "confidence_score": 0.0-1.0}"#;

static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid json object regex"));

pub fn build_prompt(message: &Message) -> String {
    let body: String = message.body.chars().take(MAX_BODY_CHARS).collect();
    format!(
        "Analyze the following email and decide whether it requires a meeting.\n\n\
         Subject: {}\n\
         Sender: {}\n\
         Recipients: {}\n\
         Received: {}\n\
         Content:\n{}",
        message.subject,
        message.sender,
        message.recipients.join(", "),
        message.received_at.to_rfc3339(),
        body
    )
}

pub fn build_request(prompt: String) -> GenerateContentRequest {
    GenerateContentRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: SYSTEM_PROMPT.to_string(),
            }],
        },
        contents: vec![Content {
            role: Some("user".into()),
            parts: vec![Part { text: prompt }],
        }],
        generation_config: GenerationConfig {
            temperature: 0.2,
            top_p: 1.0,
            max_output_tokens: 1024,
            response_mime_type: "application/json".into(),
        },
    }
}

/// Pulls the verdict text out of a `generateContent` envelope.
pub fn extract_text(response: GenerateContentResponse) -> Result<String, TriageError> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        TriageError::ClassifierUnavailable("response did not contain any candidates".into())
    })?;
    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| {
            TriageError::ClassifierUnavailable(format!(
                "candidate has no text (finish reason {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ))
        })?;
    Ok(text)
}

/// Validates model output against the verdict schema.
pub fn parse_verdict(text: &str) -> Result<ClassificationVerdict, TriageError> {
    let json = JSON_OBJECT.find(text).map(|m| m.as_str()).ok_or_else(|| {
        TriageError::ClassifierMalformedResponse("no JSON object in model output".into())
    })?;
    let raw: RawVerdict = serde_json::from_str(json)
        .map_err(|err| TriageError::ClassifierMalformedResponse(err.to_string()))?;

    if !raw.confidence_score.is_finite() || !(0.0..=1.0).contains(&raw.confidence_score) {
        return Err(TriageError::ClassifierMalformedResponse(format!(
            "confidence_score {} is outside [0, 1]",
            raw.confidence_score
        )));
    }

    Ok(ClassificationVerdict {
        requires_meeting: raw.requires_meeting,
        confidence: raw.confidence_score,
        meeting_title: raw.meeting_title.unwrap_or_default(),
        meeting_description: raw.meeting_description.unwrap_or_default(),
        suggested_duration_minutes: raw
            .suggested_duration
            .filter(|minutes| minutes.is_finite())
            .map(|minutes| minutes.round() as i64),
        urgency: raw.urgency.unwrap_or_default(),
        participants: raw.participants.unwrap_or_default(),
        meeting_type: raw.meeting_type,
        key_topics: raw.key_topics.unwrap_or_default(),
    })
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    requires_meeting: bool,
    confidence_score: f64,
    #[serde(default)]
    meeting_title: Option<String>,
    #[serde(default)]
    meeting_description: Option<String>,
    #[serde(default)]
    suggested_duration: Option<f64>,
    #[serde(default)]
    urgency: Option<Urgency>,
    #[serde(default)]
    participants: Option<Vec<String>>,
    #[serde(default)]
    meeting_type: Option<String>,
    #[serde(default)]
    key_topics: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub system_instruction: Content,
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: i32,
    pub response_mime_type: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    pub text: Option<String>,
}
