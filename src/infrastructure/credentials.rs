use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TokenFile {
    #[serde(alias = "token")]
    access_token: String,
}

/// Reads a bearer token from either an OAuth JSON document
/// (`access_token` / `token`) or a plain text file.
pub async fn read_access_token(path: &str) -> Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read access token from {path}"))?;
    parse_token(&raw).with_context(|| format!("no access token found in {path}"))
}

fn parse_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<TokenFile>(trimmed)
            .ok()
            .map(|file| file.access_token)
            .filter(|token| !token.trim().is_empty());
    }
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
