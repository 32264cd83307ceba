use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of one user request, from prompt submission to downloadable
/// STL files. Advances monotonically; `Ready` requires both STL URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Generating,
    Selecting,
    Processing,
    Ready,
}

impl JobStatus {
    pub fn is_active(self) -> bool {
        !matches!(self, JobStatus::Ready)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Generating => "generating",
            JobStatus::Selecting => "selecting",
            JobStatus::Processing => "processing",
            JobStatus::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub prompt: String,
    pub image_url: Option<String>,
    pub cutter_stl_url: Option<String>,
    pub stamp_stl_url: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_seq: u64,
    jobs: HashMap<String, (u64, Job)>,
}

/// In-memory job records behind a mutex. Every operation is a single atomic
/// read or replace; updates preserve fields they do not name.
///
/// Lifetime is tied to the process. An optional `max_jobs` bound evicts the
/// oldest record on create; unbounded by default.
#[derive(Debug, Default)]
pub struct JobStore {
    inner: Mutex<StoreInner>,
    max_jobs: Option<usize>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounded(max_jobs: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_jobs: Some(max_jobs.max(1)),
        }
    }

    pub fn create_job(&self, prompt: impl Into<String>) -> Job {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            image_url: None,
            cutter_stl_url: None,
            stamp_stl_url: None,
            status: JobStatus::Generating,
            created_at: Utc::now(),
        };

        let mut inner = self.lock();
        if let Some(max_jobs) = self.max_jobs {
            while inner.jobs.len() >= max_jobs {
                let oldest = inner
                    .jobs
                    .iter()
                    .min_by_key(|(_, (seq, _))| *seq)
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => inner.jobs.remove(&id),
                    None => break,
                };
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(job.id.clone(), (seq, job.clone()));
        job
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.lock().jobs.get(id).map(|(_, job)| job.clone())
    }

    pub fn update_job_image(&self, id: &str, image_url: impl Into<String>) -> Option<Job> {
        self.update(id, |job| job.image_url = Some(image_url.into()))
    }

    pub fn update_job_status(&self, id: &str, status: JobStatus) -> Option<Job> {
        self.update(id, |job| job.status = status)
    }

    /// Records both output files and advances the job to `Ready`. This is the
    /// only path to `Ready`, so a ready job always carries both URLs.
    pub fn update_job_stls(
        &self,
        id: &str,
        cutter_url: impl Into<String>,
        stamp_url: impl Into<String>,
    ) -> Option<Job> {
        self.update(id, |job| {
            job.cutter_stl_url = Some(cutter_url.into());
            job.stamp_stl_url = Some(stamp_url.into());
            job.status = JobStatus::Ready;
        })
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut Job)) -> Option<Job> {
        let mut inner = self.lock();
        let (seq, mut job) = inner.jobs.get(id).cloned()?;
        apply(&mut job);
        inner.jobs.insert(id.to_string(), (seq, job.clone()));
        Some(job)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("job store mutex poisoned")
    }
}
