mod client;
pub mod event;

use async_trait::async_trait;

use crate::{
    domain::{MeetingDetails, MeetingRef, ScheduledSlot},
    error::TriageError,
};

pub use client::GoogleCalendarProvisioner;

#[async_trait]
pub trait MeetingProvisioner: Send + Sync {
    /// Creates the calendar event with a video-conference link.
    ///
    /// `ProvisionerRateLimited` is safe to retry; `ProvisionerRejected` is not.
    async fn create(
        &self,
        details: &MeetingDetails,
        slot: &ScheduledSlot,
        invitees: &[String],
    ) -> Result<MeetingRef, TriageError>;
}
