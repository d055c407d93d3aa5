use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::{
    config::GmailConfig,
    domain::{
        address::{dedup_addresses, extract_addresses, first_address},
        Message,
    },
    error::TriageError,
    infrastructure::credentials::read_access_token,
};

use super::{
    filter::{AutomationFilter, MailHeaders},
    EmailSource,
};

const GMAIL_MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

/// Gmail REST adapter. The access token is re-read from disk for every call,
/// token refresh belongs to whatever process writes that file.
pub struct GmailSource {
    http: Client,
    config: GmailConfig,
    filter: AutomationFilter,
    timeout: Duration,
}

impl GmailSource {
    pub fn new(
        http: Client,
        config: GmailConfig,
        filter: AutomationFilter,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            config,
            filter,
            timeout,
        }
    }

    async fn token(&self) -> Result<String, TriageError> {
        read_access_token(&self.config.credentials_path)
            .await
            .map_err(|err| TriageError::SourceUnavailable(format!("{err:#}")))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TriageError> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| TriageError::SourceUnavailable(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TriageError::SourceUnavailable(
                "gmail rejected the access token".into(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriageError::SourceUnavailable(format!(
                "gmail returned {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        Ok(response)
    }

    async fn fetch_detail(&self, token: &str, id: &str) -> Result<MessageDetail, TriageError> {
        let response = self
            .send(
                self.http
                    .get(format!("{GMAIL_MESSAGES_URL}/{id}"))
                    .bearer_auth(token)
                    .query(&[("format", "full")]),
            )
            .await?;
        response
            .json()
            .await
            .map_err(|err| TriageError::SourceUnavailable(err.to_string()))
    }

    fn to_message(&self, detail: MessageDetail) -> Option<Message> {
        let payload = detail.payload.as_ref();
        let headers = payload.map(|p| read_headers(&p.headers)).unwrap_or_default();

        let Some(sender) = first_address(&headers.from) else {
            tracing::debug!(target: "mail", id = %detail.id, "message without sender address ignored");
            return None;
        };
        if let Some(reason) = self.filter.automated_reason(&sender, &headers) {
            tracing::debug!(target: "mail", id = %detail.id, sender = %sender, reason, "automated message ignored");
            return None;
        }

        let recipients = dedup_addresses(
            extract_addresses(&headers.to)
                .into_iter()
                .chain(extract_addresses(&headers.cc)),
        );
        let body = payload
            .and_then(body_text)
            .unwrap_or_else(|| detail.snippet.clone());
        let received_at = detail
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Some(Message {
            id: detail.id,
            thread_id: detail.thread_id,
            subject: headers.subject,
            sender,
            recipients,
            body,
            received_at,
            unread: detail.label_ids.iter().any(|label| label == "UNREAD"),
        })
    }
}

#[async_trait]
impl EmailSource for GmailSource {
    async fn fetch_unread(&self, max_count: usize) -> Result<Vec<Message>, TriageError> {
        let token = self.token().await?;
        let max_results = max_count.to_string();
        let list: MessageListResponse = self
            .send(
                self.http
                    .get(GMAIL_MESSAGES_URL)
                    .bearer_auth(&token)
                    .query(&[
                        ("q", self.config.query.as_str()),
                        ("maxResults", max_results.as_str()),
                    ]),
            )
            .await?
            .json()
            .await
            .map_err(|err| TriageError::SourceUnavailable(err.to_string()))?;

        let mut messages = Vec::with_capacity(list.messages.len());
        for stub in list.messages.iter().take(max_count) {
            match self.fetch_detail(&token, &stub.id).await {
                Ok(detail) => {
                    // A custom query may surface mail that is already read.
                    if let Some(message) = self.to_message(detail).filter(|m| m.unread) {
                        messages.push(message);
                    }
                }
                Err(err) => {
                    tracing::warn!(target: "mail", id = %stub.id, error = %err, "skipping message this run");
                }
            }
        }

        tracing::info!(
            target: "mail",
            listed = list.messages.len(),
            candidates = messages.len(),
            "inbox polled"
        );
        Ok(messages)
    }

    async fn mark_consumed(&self, message_id: &str) -> Result<(), TriageError> {
        if !self.config.mark_consumed {
            return Ok(());
        }
        let token = self.token().await?;
        self.send(
            self.http
                .post(format!("{GMAIL_MESSAGES_URL}/{message_id}/modify"))
                .bearer_auth(&token)
                .json(&serde_json::json!({ "removeLabelIds": ["UNREAD"] })),
        )
        .await?;
        Ok(())
    }
}

fn read_headers(headers: &[Header]) -> MailHeaders {
    let get = |name: &str| -> String {
        headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    MailHeaders {
        from: get("From"),
        to: get("To"),
        cc: get("Cc"),
        subject: get("Subject"),
        list_unsubscribe: get("List-Unsubscribe"),
        precedence: get("Precedence"),
        auto_submitted: get("Auto-Submitted"),
    }
}

fn body_text(payload: &MessagePart) -> Option<String> {
    if let Some(text) = find_part(payload, "text/plain") {
        return Some(text);
    }
    find_part(payload, "text/html").map(|html| {
        HTML_TAG
            .replace_all(&html, " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    })
}

fn find_part(part: &MessagePart, mime: &str) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case(mime) {
        if let Some(text) = part
            .body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .and_then(decode_body)
        {
            return Some(text);
        }
    }
    part.parts.iter().find_map(|child| find_part(child, mime))
}

// Gmail uses URL-safe base64 and is inconsistent about padding.
fn decode_body(data: &str) -> Option<String> {
    let trimmed = data.trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        base64::engine::general_purpose::URL_SAFE.encode(text)
    }

    fn source() -> GmailSource {
        let patterns: Vec<String> = crate::config::DEFAULT_SENDER_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();
        GmailSource::new(
            Client::new(),
            GmailConfig {
                credentials_path: "token.json".into(),
                query: "is:unread".into(),
                automation_sender_patterns: patterns.clone(),
                mark_consumed: true,
            },
            AutomationFilter::new(&patterns, "bot@co.io").unwrap(),
            Duration::from_secs(5),
        )
    }

    fn detail(from: &str, extra_headers: serde_json::Value) -> MessageDetail {
        let mut headers = vec![
            serde_json::json!({ "name": "From", "value": from }),
            serde_json::json!({ "name": "To", "value": "Team <team@co.io>, manager@co.io" }),
            serde_json::json!({ "name": "Cc", "value": "Manager@co.io, lead@co.io" }),
            serde_json::json!({ "name": "Subject", "value": "Project Meeting Discussion" }),
        ];
        if let serde_json::Value::Array(extra) = extra_headers {
            headers.extend(extra);
        }
        serde_json::from_value(serde_json::json!({
            "id": "18c2f",
            "threadId": "18c2e",
            "snippet": "snippet text",
            "internalDate": "1736521200000",
            "labelIds": ["UNREAD", "INBOX"],
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": headers,
                "parts": [
                    { "mimeType": "text/html", "body": { "data": encode("<p>html body</p>") } },
                    { "mimeType": "text/plain", "body": { "data": encode("Let's sync on the timeline.") } }
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn builds_message_from_full_payload() {
        let message = source()
            .to_message(detail("John Smith <John@co.io>", serde_json::json!([])))
            .expect("message");
        assert_eq!(message.id, "18c2f");
        assert_eq!(message.thread_id.as_deref(), Some("18c2e"));
        assert_eq!(message.sender, "john@co.io");
        assert_eq!(message.recipients, vec!["team@co.io", "manager@co.io", "lead@co.io"]);
        assert_eq!(message.body, "Let's sync on the timeline.");
        assert_eq!(message.received_at.timestamp_millis(), 1_736_521_200_000);
        assert!(message.unread);
    }

    #[test]
    fn automated_messages_are_absent() {
        let source = source();
        assert!(source
            .to_message(detail("GitHub <noreply@github.com>", serde_json::json!([])))
            .is_none());
        assert!(source
            .to_message(detail(
                "news@letters.io",
                serde_json::json!([{ "name": "List-Unsubscribe", "value": "<mailto:x@letters.io>" }])
            ))
            .is_none());
    }

    #[test]
    fn html_only_body_is_stripped() {
        let payload: MessagePart = serde_json::from_value(serde_json::json!({
            "mimeType": "text/html",
            "body": { "data": encode("<div>Can we <b>meet</b> tomorrow?</div>") }
        }))
        .unwrap();
        assert_eq!(body_text(&payload).as_deref(), Some("Can we meet tomorrow?"));
    }

    #[test]
    fn decodes_unpadded_and_padded_base64() {
        let padded = encode("hi");
        assert!(padded.ends_with('='));
        assert_eq!(decode_body(&padded).as_deref(), Some("hi"));
        assert_eq!(decode_body(padded.trim_end_matches('=')).as_deref(), Some("hi"));
    }
}
