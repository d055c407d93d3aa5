mod client;
pub mod inference;

use async_trait::async_trait;

use crate::{
    domain::{ClassificationVerdict, Message},
    error::TriageError,
};

pub use client::GeminiClient;

/// Opaque relevance classifier. Any implementation (hosted model, rules,
/// human review) satisfies the same contract.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &Message) -> Result<ClassificationVerdict, TriageError>;
}
