//! Job records and the process-scoped job registry
//!
//! A record is created when a run begins and is mutated only by the
//! orchestrator that owns it. `success` and `failed` are terminal: once a
//! record reaches either, later updates are refused.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tariff_common::ErrorKind;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Started)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub source_id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub records_acquired: usize,
    pub records_validated: usize,
    pub records_persisted: usize,
    pub combined_score: Option<f64>,
    pub errors: Vec<String>,
    pub error_kind: Option<ErrorKind>,
}

impl JobRecord {
    pub fn new(job_id: Uuid, source_id: impl Into<String>) -> Self {
        Self {
            job_id,
            source_id: source_id.into(),
            status: JobStatus::Started,
            started_at: Utc::now(),
            ended_at: None,
            records_acquired: 0,
            records_validated: 0,
            records_persisted: 0,
            combined_score: None,
            errors: Vec::new(),
            error_kind: None,
        }
    }

    /// Move to a terminal status. Returns false if already terminal.
    pub fn finish(&mut self, status: JobStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `started` record
    pub fn start(&self, job_id: Uuid, source_id: &str) -> JobRecord {
        let record = JobRecord::new(job_id, source_id);
        self.write().insert(job_id, record.clone());
        debug!(%job_id, source_id, "Job registered");
        record
    }

    /// Apply `f` to a non-terminal record. Returns the updated record.
    pub fn update(&self, job_id: Uuid, f: impl FnOnce(&mut JobRecord)) -> Option<JobRecord> {
        let mut jobs = self.write();
        let record = jobs.get_mut(&job_id)?;
        if record.status.is_terminal() {
            warn!(%job_id, status = record.status.as_str(), "Ignoring update to finished job");
            return None;
        }
        f(record);
        Some(record.clone())
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.read().get(&job_id).cloned()
    }

    /// All records, oldest first
    pub fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<_> = self.read().values().cloned().collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop records started more than `max_age` ago
    pub fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_at(Utc::now(), max_age)
    }

    pub fn sweep_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now - max_age;
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, job| job.started_at >= cutoff);
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, remaining = jobs.len(), "Swept old jobs");
        }
        removed
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, JobRecord>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, JobRecord>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_is_monotonic() {
        let mut record = JobRecord::new(Uuid::new_v4(), "CI");
        assert!(!record.finish(JobStatus::Started));
        assert!(record.finish(JobStatus::Success));
        assert!(!record.finish(JobStatus::Failed));
        assert_eq!(record.status, JobStatus::Success);
        assert!(record.duration().is_some());
    }

    #[test]
    fn test_registry_refuses_updates_after_finish() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        registry.start(id, "SN");

        let updated = registry.update(id, |job| {
            job.records_acquired = 12;
            job.finish(JobStatus::Failed);
        });
        assert_eq!(updated.map(|j| j.status), Some(JobStatus::Failed));

        assert!(registry.update(id, |job| job.records_acquired = 99).is_none());
        assert_eq!(registry.get(id).map(|j| j.records_acquired), Some(12));
        assert!(registry.update(Uuid::new_v4(), |_| {}).is_none());
    }

    #[test]
    fn test_sweep_removes_old_entries() {
        let registry = JobRegistry::new();
        let old = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        registry.start(old, "CI");
        registry.start(fresh, "SN");

        // Pretend 25 hours passed for the first record only
        {
            let mut jobs = registry.write();
            if let Some(job) = jobs.get_mut(&old) {
                job.started_at = Utc::now() - Duration::hours(25);
            }
        }

        assert_eq!(registry.sweep(Duration::hours(24)), 1);
        assert!(registry.get(old).is_none());
        assert!(registry.get(fresh).is_some());

        let later = Utc::now() + Duration::hours(48);
        assert_eq!(registry.sweep_at(later, Duration::hours(24)), 1);
        assert!(registry.is_empty());
    }
}
