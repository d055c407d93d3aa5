use std::{env, str::FromStr, time::Duration};

use chrono::NaiveTime;
use chrono_tz::Tz;
use regex::Regex;

use super::env::{
    AppConfig, CalendarConfig, ConfigError, DirectoryConfig, GeminiConfig, GmailConfig,
    LoggingConfig, NotifyConfig, RetryConfig, SchedulerConfig, TriageConfig,
};

pub const DEFAULT_GMAIL_QUERY: &str =
    "is:unread -category:promotions -category:social -category:updates -category:forums";
pub const DEFAULT_SENDER_PATTERNS: &[&str] = &[
    r"no-?reply",
    r"do-?not-?reply",
    r"notifications?@",
    r"mailer-daemon",
    r"postmaster@",
    r"bounce",
];

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_lookup(|key| env::var(key).ok())
}

impl AppConfig {
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let automation_email = var("EMAIL_ADDRESS")
            .map(|v| v.trim().to_ascii_lowercase())
            .ok_or(ConfigError::Missing("EMAIL_ADDRESS"))?;

        let gemini = GeminiConfig {
            api_key: var("GEMINI_API_KEY").ok_or(ConfigError::Missing("GEMINI_API_KEY"))?,
            model: var("GEMINI_MODEL").unwrap_or_else(|| "gemini-1.5-flash".to_string()),
        };

        let automation_sender_patterns = var("AUTOMATION_SENDER_PATTERNS")
            .map(|value| {
                value
                    .split(';')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| DEFAULT_SENDER_PATTERNS.iter().map(|p| p.to_string()).collect());
        for pattern in &automation_sender_patterns {
            Regex::new(pattern).map_err(|err| ConfigError::Invalid {
                key: "AUTOMATION_SENDER_PATTERNS",
                message: err.to_string(),
            })?;
        }

        let gmail = GmailConfig {
            credentials_path: var("GOOGLE_CREDENTIALS_PATH")
                .unwrap_or_else(|| "token.json".to_string()),
            query: var("GMAIL_QUERY").unwrap_or_else(|| DEFAULT_GMAIL_QUERY.to_string()),
            automation_sender_patterns,
            mark_consumed: parse_bool(var("MARK_CONSUMED"), "MARK_CONSUMED", true)?,
        };

        let calendar = CalendarConfig {
            calendar_id: var("CALENDAR_ID").unwrap_or_else(|| "primary".to_string()),
        };

        let confidence_threshold: f64 =
            parse_or(var("CONFIDENCE_THRESHOLD"), "CONFIDENCE_THRESHOLD", 0.70)?;
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ConfigError::Invalid {
                key: "CONFIDENCE_THRESHOLD",
                message: format!("{confidence_threshold} is outside [0, 1]"),
            });
        }

        let business_hour_start = match var("BUSINESS_HOUR_START") {
            Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|err| {
                ConfigError::Invalid {
                    key: "BUSINESS_HOUR_START",
                    message: format!("{raw}: {err}"),
                }
            })?,
            None => NaiveTime::from_hms_opt(14, 0, 0).ok_or(ConfigError::Invalid {
                key: "BUSINESS_HOUR_START",
                message: "default hour out of range".to_string(),
            })?,
        };

        let timezone_name = var("MEETING_TIMEZONE").unwrap_or_else(|| "UTC".to_string());
        let timezone: Tz = timezone_name
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid {
                key: "MEETING_TIMEZONE",
                message: format!("unknown timezone {timezone_name}"),
            })?;

        let triage = TriageConfig {
            confidence_threshold,
            max_messages_per_run: positive(
                parse_or(var("MAX_EMAILS_PER_CHECK"), "MAX_EMAILS_PER_CHECK", 50usize)?,
                "MAX_EMAILS_PER_CHECK",
            )?,
            default_duration_minutes: positive(
                parse_or(var("DEFAULT_MEETING_DURATION"), "DEFAULT_MEETING_DURATION", 60u32)?,
                "DEFAULT_MEETING_DURATION",
            )?,
            business_hour_start,
            timezone,
            classifier_concurrency: positive(
                parse_or(var("CLASSIFIER_CONCURRENCY"), "CLASSIFIER_CONCURRENCY", 4usize)?,
                "CLASSIFIER_CONCURRENCY",
            )?,
            claim_lease: Duration::from_secs(parse_or(
                var("CLAIM_LEASE_SECS"),
                "CLAIM_LEASE_SECS",
                900u64,
            )?),
        };

        let retry = RetryConfig {
            max_attempts: positive(
                parse_or(var("PROVISION_MAX_ATTEMPTS"), "PROVISION_MAX_ATTEMPTS", 3u32)?,
                "PROVISION_MAX_ATTEMPTS",
            )?,
            initial_backoff: Duration::from_millis(parse_or(
                var("PROVISION_BACKOFF_MS"),
                "PROVISION_BACKOFF_MS",
                1_000u64,
            )?),
            max_backoff: Duration::from_millis(parse_or(
                var("PROVISION_MAX_BACKOFF_MS"),
                "PROVISION_MAX_BACKOFF_MS",
                30_000u64,
            )?),
        };

        let scheduler = SchedulerConfig {
            cron_spec: var("TRIGGER_CRON").unwrap_or_else(|| "0 */5 * * * *".to_string()),
            run_once: parse_bool(var("RUN_ONCE"), "RUN_ONCE", false)?,
        };

        let notify = NotifyConfig {
            webhook_url: var("NOTIFY_WEBHOOK_URL"),
        };

        let directories = DirectoryConfig {
            logs_dir: var("LOGS_DIR").unwrap_or_else(|| "logs".to_string()),
            data_dir: var("DATA_DIR").unwrap_or_else(|| "data".to_string()),
            db_filename: var("DB_FILENAME").unwrap_or_else(|| "meetings.db".to_string()),
        };

        let logging = LoggingConfig {
            level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        let external_call_timeout = Duration::from_millis(positive(
            parse_or(var("EXTERNAL_CALL_TIMEOUT_MS"), "EXTERNAL_CALL_TIMEOUT_MS", 30_000u64)?,
            "EXTERNAL_CALL_TIMEOUT_MS",
        )?);

        Ok(Self {
            automation_email,
            gmail,
            calendar,
            gemini,
            triage,
            retry,
            scheduler,
            notify,
            directories,
            logging,
            external_call_timeout,
        })
    }
}

fn parse_or<T: FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
            key,
            message: format!("{raw}: {err}"),
        }),
        None => Ok(default),
    }
}

fn positive<T: PartialOrd + Default>(value: T, key: &'static str) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            message: "must be greater than zero".to_string(),
        })
    }
}

fn parse_bool(value: Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                message: format!("{v} is not a boolean"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("EMAIL_ADDRESS", "Bot@Example.com"),
        ("GEMINI_API_KEY", "key"),
    ];

    #[test]
    fn defaults_match_documented_values() {
        let config = config_from(REQUIRED).expect("config");
        assert_eq!(config.automation_email, "bot@example.com");
        assert_eq!(config.calendar.calendar_id, "primary");
        assert!((config.triage.confidence_threshold - 0.70).abs() < f64::EPSILON);
        assert_eq!(config.triage.max_messages_per_run, 50);
        assert_eq!(config.triage.default_duration_minutes, 60);
        assert_eq!(
            config.triage.business_hour_start,
            NaiveTime::from_hms_opt(14, 0, 0).unwrap()
        );
        assert_eq!(config.triage.timezone, chrono_tz::UTC);
        assert_eq!(config.scheduler.cron_spec, "0 */5 * * * *");
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.gmail.mark_consumed);
        assert!(!config.scheduler.run_once);
        assert_eq!(
            config.gmail.automation_sender_patterns.len(),
            DEFAULT_SENDER_PATTERNS.len()
        );
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = config_from(&[("EMAIL_ADDRESS", "bot@example.com")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GEMINI_API_KEY")));
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CONFIDENCE_THRESHOLD", "1.5"));
        let err = config_from(&pairs).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "CONFIDENCE_THRESHOLD",
                ..
            }
        ));
    }

    #[test]
    fn timezone_and_hour_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MEETING_TIMEZONE", "Asia/Seoul"));
        pairs.push(("BUSINESS_HOUR_START", "09:30"));
        pairs.push(("RUN_ONCE", "yes"));
        let config = config_from(&pairs).expect("config");
        assert_eq!(config.triage.timezone, chrono_tz::Asia::Seoul);
        assert_eq!(
            config.triage.business_hour_start,
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert!(config.scheduler.run_once);
    }

    #[test]
    fn bad_sender_pattern_fails_fast() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("AUTOMATION_SENDER_PATTERNS", "ok;(unclosed"));
        assert!(config_from(&pairs).is_err());
    }
}
