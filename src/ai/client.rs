use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::{
    config::GeminiConfig,
    domain::{ClassificationVerdict, Message},
    error::TriageError,
};

use super::{
    inference::{
        build_prompt, build_request, extract_text, parse_verdict, GenerateContentResponse,
        GEMINI_API_BASE,
    },
    Classifier,
};

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(http: Client, config: GeminiConfig, timeout: Duration) -> Self {
        Self {
            http,
            config,
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_BASE, self.config.model)
    }
}

#[async_trait]
impl Classifier for GeminiClient {
    async fn classify(&self, message: &Message) -> Result<ClassificationVerdict, TriageError> {
        let request = build_request(build_prompt(message));
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| TriageError::ClassifierUnavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = if status == StatusCode::TOO_MANY_REQUESTS {
                "rate limited"
            } else {
                "request failed"
            };
            return Err(TriageError::ClassifierUnavailable(format!(
                "{reason} with status {status}: {}",
                truncate(&body, 300)
            )));
        }

        let envelope: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| TriageError::ClassifierMalformedResponse(err.to_string()))?;
        let text = extract_text(envelope)?;
        let verdict = parse_verdict(&text)?;

        tracing::debug!(
            target: "classifier",
            message_id = %message.id,
            requires_meeting = verdict.requires_meeting,
            confidence = verdict.confidence,
            "verdict received"
        );
        Ok(verdict)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
