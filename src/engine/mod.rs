pub mod decision;
pub mod retry;
pub mod schedule;

pub use decision::DecisionEngine;
pub use retry::RetryPolicy;
