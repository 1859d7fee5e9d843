use crate::api::payload::job_update_from_payload;
use crate::common::config::{StateDir, JOBS_FILE};
use crate::common::error::Result;
use crate::common::types::{status, JobRecord, JobUpdate};
use indexmap::IndexMap;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Locally known jobs, keyed by job ID and persisted as `jobs.json`.
///
/// Every mutating call rewrites the whole document before returning, and
/// only changes the in-memory view once that write succeeded.
#[derive(Debug)]
pub struct JobStore {
    state: StateDir,
    jobs: IndexMap<String, JobRecord>,
}

impl JobStore {
    pub fn open(state: &StateDir) -> Self {
        let jobs = state.load_json(JOBS_FILE);
        JobStore {
            state: state.clone(),
            jobs,
        }
    }

    pub fn count(&self) -> usize {
        self.jobs.len()
    }

    pub fn get(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.get(job_id)
    }

    /// Upsert by job ID. Only non-empty fields of `job` overwrite an existing record.
    pub fn add(&mut self, job: JobRecord) -> Result<()> {
        let job_id = job.job_id.clone();
        let mut next = self.jobs.clone();
        merge_into(&mut next, &job_id, JobUpdate::from(job));
        self.commit(next)
    }

    /// Insert `job` unless its ID is already known. Returns whether it was added.
    pub fn add_if_absent(&mut self, job: JobRecord) -> Result<bool> {
        if self.jobs.contains_key(&job.job_id) {
            return Ok(false);
        }
        self.add(job)?;
        Ok(true)
    }

    /// Merge a remote job-detail payload into the record for `job_id`,
    /// creating the record if needed.
    pub fn update_from_api(&mut self, job_id: &str, payload: &Value) -> Result<JobRecord> {
        let update = job_update_from_payload(payload);
        let mut next = self.jobs.clone();
        let job = merge_into(&mut next, job_id, update).clone();
        self.commit(next)?;
        Ok(job)
    }

    /// Apply local field overrides to an existing record. Returns false if unknown.
    pub fn update(&mut self, job_id: &str, update: JobUpdate) -> Result<bool> {
        if !self.jobs.contains_key(job_id) {
            return Ok(false);
        }
        let mut next = self.jobs.clone();
        merge_into(&mut next, job_id, update);
        self.commit(next)?;
        Ok(true)
    }

    /// Jobs sorted by `created_at` descending, optionally filtered by a
    /// case-insensitive status substring, then truncated to `limit`.
    pub fn list(&self, limit: Option<usize>, status_filter: Option<&str>) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .values()
            .filter(|job| match status_filter {
                Some(filter) => status::matches_filter(&job.status, filter),
                None => true,
            })
            .cloned()
            .collect();

        sort_newest_first(&mut jobs);

        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// IDs of listed jobs that are not in a terminal state.
    pub fn refreshable_ids(&self, limit: Option<usize>, status_filter: Option<&str>) -> Vec<String> {
        self.list(limit, status_filter)
            .into_iter()
            .filter(|job| !job.is_terminal())
            .map(|job| job.job_id)
            .collect()
    }

    /// Read one job ID per line, skipping blanks and `#` comments.
    /// Returns the number of records created or touched.
    pub fn import_from_file<P: AsRef<Path>>(&mut self, path: P, source: &str) -> Result<usize> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut next = self.jobs.clone();
        let mut count = 0;

        for line in content.lines() {
            let job_id = line.trim();
            if job_id.is_empty() || job_id.starts_with('#') {
                continue;
            }

            match next.get_mut(job_id) {
                Some(existing) => {
                    if !source.is_empty() {
                        existing.source = source.to_string();
                    }
                }
                None => {
                    let mut job = JobRecord::new(job_id);
                    job.source = source.to_string();
                    job.status = status::UNKNOWN.to_string();
                    job.updated_at = chrono::Utc::now().to_rfc3339();
                    next.insert(job_id.to_string(), job);
                }
            }
            count += 1;
        }

        if count > 0 {
            self.commit(next)?;
        }
        tracing::debug!(count, source, "imported job ids");
        Ok(count)
    }

    pub fn remove(&mut self, job_id: &str) -> Result<bool> {
        let mut next = self.jobs.clone();
        if next.shift_remove(job_id).is_none() {
            return Ok(false);
        }
        self.commit(next)?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.commit(IndexMap::new())
    }

    /// Persist `next`, then adopt it. A failed write leaves the store untouched.
    fn commit(&mut self, next: IndexMap<String, JobRecord>) -> Result<()> {
        self.state.save_json(JOBS_FILE, &next)?;
        self.jobs = next;
        Ok(())
    }
}

fn merge_into<'a>(
    jobs: &'a mut IndexMap<String, JobRecord>,
    job_id: &str,
    mut update: JobUpdate,
) -> &'a JobRecord {
    update.job_id = None;
    let job = jobs
        .entry(job_id.to_string())
        .or_insert_with(|| JobRecord::new(job_id));
    job.apply(update);
    job.updated_at = chrono::Utc::now().to_rfc3339();
    job
}

/// Newest first by `created_at`; records without a timestamp sort last.
pub fn sort_newest_first(jobs: &mut [JobRecord]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
