use chrono::{DateTime, Utc};

/// An inbox message as seen by a single run.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender: String,
    /// To + Cc, lower-cased and deduplicated in header order.
    pub recipients: Vec<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub unread: bool,
}
