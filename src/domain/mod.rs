pub mod address;
pub mod message;
pub mod types;

pub use message::Message;
pub use types::{
    ClassificationVerdict, MeetingDecision, MeetingDetails, MeetingRef,
    RunOutcome, RunRecord, RunSummary, ScheduledSlot, SkipReason, Urgency,
};
