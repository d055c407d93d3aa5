use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures crossing the boundary of a single triage run.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("email source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),
    #[error("classifier returned a malformed verdict: {0}")]
    ClassifierMalformedResponse(String),
    #[error("meeting provisioner rate limited: {detail}")]
    ProvisionerRateLimited {
        detail: String,
        retry_after: Option<Duration>,
    },
    #[error("meeting provisioner rejected the request: {0}")]
    ProvisionerRejected(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("run tracker unavailable: {0}")]
    TrackerUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    ClassifierUnavailable,
    ClassifierMalformedResponse,
    ProvisionerRateLimited,
    ProvisionerRejected,
    InvariantViolation,
    TrackerUnavailable,
}

impl TriageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TriageError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            TriageError::ClassifierUnavailable(_) => ErrorKind::ClassifierUnavailable,
            TriageError::ClassifierMalformedResponse(_) => ErrorKind::ClassifierMalformedResponse,
            TriageError::ProvisionerRateLimited { .. } => ErrorKind::ProvisionerRateLimited,
            TriageError::ProvisionerRejected(_) => ErrorKind::ProvisionerRejected,
            TriageError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            TriageError::TrackerUnavailable(_) => ErrorKind::TrackerUnavailable,
        }
    }

    /// Deferred errors leave the message untouched for the next tick.
    pub fn is_deferrable(&self) -> bool {
        matches!(
            self,
            TriageError::ClassifierUnavailable(_)
                | TriageError::ClassifierMalformedResponse(_)
                | TriageError::TrackerUnavailable(_)
        )
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::ClassifierUnavailable => "classifier_unavailable",
            ErrorKind::ClassifierMalformedResponse => "classifier_malformed_response",
            ErrorKind::ProvisionerRateLimited => "provisioner_rate_limited",
            ErrorKind::ProvisionerRejected => "provisioner_rejected",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::TrackerUnavailable => "tracker_unavailable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value {
            "source_unavailable" => ErrorKind::SourceUnavailable,
            "classifier_unavailable" => ErrorKind::ClassifierUnavailable,
            "classifier_malformed_response" => ErrorKind::ClassifierMalformedResponse,
            "provisioner_rate_limited" => ErrorKind::ProvisionerRateLimited,
            "provisioner_rejected" => ErrorKind::ProvisionerRejected,
            "invariant_violation" => ErrorKind::InvariantViolation,
            "tracker_unavailable" => ErrorKind::TrackerUnavailable,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_and_tracker_failures_are_deferred() {
        assert!(TriageError::ClassifierUnavailable("429".into()).is_deferrable());
        assert!(TriageError::ClassifierMalformedResponse("no json".into()).is_deferrable());
        assert!(TriageError::TrackerUnavailable("locked".into()).is_deferrable());
        assert!(!TriageError::ProvisionerRejected("bad invitee".into()).is_deferrable());
        assert!(!TriageError::InvariantViolation("empty id".into()).is_deferrable());
    }

    #[test]
    fn kind_labels_parse_back() {
        for kind in [
            ErrorKind::SourceUnavailable,
            ErrorKind::ProvisionerRateLimited,
            ErrorKind::InvariantViolation,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("unknown"), None);
    }
}
