pub mod filter;
mod gmail;

use async_trait::async_trait;

use crate::{domain::Message, error::TriageError};

pub use filter::AutomationFilter;
pub use gmail::GmailSource;

#[async_trait]
pub trait EmailSource: Send + Sync {
    /// Unread, non-automated messages, at most `max_count`. Filtered mail is
    /// simply absent from the result.
    async fn fetch_unread(&self, max_count: usize) -> Result<Vec<Message>, TriageError>;

    /// Marks a message as handled so the inbox stops surfacing it.
    async fn mark_consumed(&self, message_id: &str) -> Result<(), TriageError>;
}
