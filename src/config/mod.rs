pub mod env;
mod loader;

pub use env::{
    AppConfig, CalendarConfig, DirectoryConfig, GeminiConfig, GmailConfig,
    RetryConfig, TriageConfig,
};
pub use loader::{load_config, DEFAULT_SENDER_PATTERNS};
