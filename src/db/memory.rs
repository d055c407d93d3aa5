use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{RunRecord, RunSummary};

use super::run_records::{RunTracker, TrackerError};

/// In-process tracker used by pipeline tests.
#[derive(Default)]
pub struct MemoryRunTracker {
    records: Mutex<HashMap<String, RunRecord>>,
    claims: Mutex<HashMap<String, String>>,
    summaries: Mutex<Vec<RunSummary>>,
    pub fail_writes: AtomicBool,
}

impl MemoryRunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: RunRecord) {
        self.records.lock().insert(record.message_id.clone(), record);
    }

    pub fn hold_claim(&self, message_id: &str, run_id: &str) {
        self.claims
            .lock()
            .insert(message_id.to_string(), run_id.to_string());
    }

    pub fn records(&self) -> HashMap<String, RunRecord> {
        self.records.lock().clone()
    }

    pub fn claim_holder(&self, message_id: &str) -> Option<String> {
        self.claims.lock().get(message_id).cloned()
    }
}

#[async_trait]
impl RunTracker for MemoryRunTracker {
    async fn lookup(&self, message_id: &str) -> Result<Option<RunRecord>, TrackerError> {
        Ok(self.records.lock().get(message_id).cloned())
    }

    async fn record(&self, record: &RunRecord) -> Result<(), TrackerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::Unavailable("database is locked".into()));
        }
        let mut records = self.records.lock();
        if records.contains_key(&record.message_id) {
            return Err(TrackerError::Duplicate(record.message_id.clone()));
        }
        records.insert(record.message_id.clone(), record.clone());
        self.claims.lock().remove(&record.message_id);
        Ok(())
    }

    async fn claim(&self, message_id: &str, run_id: &str) -> Result<bool, TrackerError> {
        let mut claims = self.claims.lock();
        match claims.get(message_id) {
            Some(holder) if holder != run_id => Ok(false),
            _ => {
                claims.insert(message_id.to_string(), run_id.to_string());
                Ok(true)
            }
        }
    }

    async fn release(&self, message_id: &str, run_id: &str) -> Result<(), TrackerError> {
        let mut claims = self.claims.lock();
        if claims.get(message_id).map(String::as_str) == Some(run_id) {
            claims.remove(message_id);
        }
        Ok(())
    }

    async fn save_summary(&self, summary: &RunSummary) -> Result<(), TrackerError> {
        self.summaries.lock().push(summary.clone());
        Ok(())
    }

    async fn recent_summaries(&self, limit: u32) -> Result<Vec<RunSummary>, TrackerError> {
        Ok(self
            .summaries
            .lock()
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
