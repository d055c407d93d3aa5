use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub automation_email: String,
    pub gmail: GmailConfig,
    pub calendar: CalendarConfig,
    pub gemini: GeminiConfig,
    pub triage: TriageConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub notify: NotifyConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub external_call_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub credentials_path: String,
    pub query: String,
    pub automation_sender_patterns: Vec<String>,
    pub mark_consumed: bool,
}

#[derive(Debug, Clone)]
pub struct CalendarConfig {
    pub calendar_id: String,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub confidence_threshold: f64,
    pub max_messages_per_run: usize,
    pub default_duration_minutes: u32,
    pub business_hour_start: NaiveTime,
    pub timezone: Tz,
    pub classifier_concurrency: usize,
    pub claim_lease: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cron_spec: String,
    pub run_once: bool,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
