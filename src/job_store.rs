//! The metadata row store is an out-of-scope external collaborator (spec
//! §1/§6): this crate only depends on its shape through the [`JobStore`]
//! trait. A concrete SQL-backed implementation lives outside this crate;
//! [`InMemoryJobStore`] stands in for it in tests and examples, and
//! [`FileJobStore`] gives the `job-matcher` CLI a concrete store for local
//! operation without pulling in a SQL dependency this crate has no other use
//! for.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::Job;

/// The subset of the row store's method surface the matching core depends
/// on: counting/paging jobs for the indexing driver, and rehydrating full
/// `Job` records from the ids an ANN query returns.
///
/// A plain native `async fn` trait (no `async-trait` crate): nothing here
/// needs to be boxed as a trait object, since the indexing/query pipelines
/// are generic over `S: JobStore` rather than holding a `dyn JobStore`.
pub trait JobStore: Send + Sync {
    async fn count(&self, source: Option<&str>) -> Result<usize>;

    /// Returns up to `limit` jobs starting at `offset`, optionally filtered
    /// by source, in a stable order (by `id`) so repeated paging during one
    /// indexing run is deterministic.
    async fn fetch_batch(&self, source: Option<&str>, limit: usize, offset: usize) -> Result<Vec<Job>>;

    /// Rehydrates full `Job` records for the given ids, in no particular
    /// order. Ids with no matching row are simply omitted — the caller
    /// (the query pipeline) treats a missing id as `MatcherError::NotFound`
    /// and drops that hit.
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Job>>;
}

/// In-memory `JobStore` used by tests and examples. Not a production
/// row-store implementation — the real one lives outside this crate.
#[derive(Debug, Default, Clone)]
pub struct InMemoryJobStore {
    jobs: Vec<Job>,
}

impl InMemoryJobStore {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self { jobs }
    }

    pub fn push(&mut self, job: Job) {
        self.jobs.push(job);
    }
}

impl JobStore for InMemoryJobStore {
    async fn count(&self, source: Option<&str>) -> Result<usize> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| source.map(|s| j.source == s).unwrap_or(true))
            .count())
    }

    async fn fetch_batch(&self, source: Option<&str>, limit: usize, offset: usize) -> Result<Vec<Job>> {
        let mut filtered: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| source.map(|s| j.source == s).unwrap_or(true))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.id().cmp(&b.id()));
        Ok(filtered.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Job>> {
        let wanted: HashSet<&String> = ids.iter().collect();
        Ok(self.jobs.iter().filter(|j| wanted.contains(&j.id())).cloned().collect())
    }
}

/// A flat JSON-array file of [`Job`] records, used by the CLI binary as a
/// concrete, dependency-light stand-in for the real metadata row store. Not
/// meant to replace a production database: no indices, no concurrent-writer
/// story beyond a single CLI process, just enough to drive `index_jobs`/
/// `search` against a local file for development and the documented
/// scenarios.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    path: PathBuf,
    jobs: Vec<Job>,
}

impl FileJobStore {
    /// Loads jobs from `path` if it exists, otherwise starts empty (the path
    /// is created on first `save`).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let jobs = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read job store file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse job store file {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self { path, jobs })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create job store directory {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.jobs)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write job store file {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Upserts by `(source, source_id)`, matching [`Job::id`]'s injectivity
    /// invariant.
    pub fn upsert(&mut self, job: Job) {
        let id = job.id();
        if let Some(existing) = self.jobs.iter_mut().find(|j| j.id() == id) {
            *existing = job;
        } else {
            self.jobs.push(job);
        }
    }
}

impl JobStore for FileJobStore {
    async fn count(&self, source: Option<&str>) -> Result<usize> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| source.map(|s| j.source == s).unwrap_or(true))
            .count())
    }

    async fn fetch_batch(&self, source: Option<&str>, limit: usize, offset: usize) -> Result<Vec<Job>> {
        let mut filtered: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| source.map(|s| j.source == s).unwrap_or(true))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.id().cmp(&b.id()));
        Ok(filtered.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Job>> {
        let wanted: HashSet<&String> = ids.iter().collect();
        Ok(self.jobs.iter().filter(|j| wanted.contains(&j.id())).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(source: &str, source_id: &str) -> Job {
        Job {
            source: source.to_string(),
            source_id: source_id.to_string(),
            title: "Engineer".to_string(),
            company: "Acme".to_string(),
            location: "Remote".to_string(),
            description: "Build things with python and docker.".to_string(),
            url: "https://example.com".to_string(),
            salary_min: None,
            salary_max: None,
            contract_type: None,
            contract_time: None,
            category: None,
            latitude: None,
            longitude: None,
            posted_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fetch_batch_filters_by_source_and_paginates() {
        let store = InMemoryJobStore::new(vec![
            job("adzuna", "1"),
            job("adzuna", "2"),
            job("other", "3"),
        ]);
        let adzuna_only = store.fetch_batch(Some("adzuna"), 10, 0).await.unwrap();
        assert_eq!(adzuna_only.len(), 2);

        let page = store.fetch_batch(None, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_get_by_ids_omits_missing() {
        let store = InMemoryJobStore::new(vec![job("adzuna", "1")]);
        let found = store
            .get_by_ids(&["adzuna_1".to_string(), "adzuna_missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_file_job_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let mut store = FileJobStore::open(&path).unwrap();
        assert!(store.is_empty());
        store.upsert(job("adzuna", "1"));
        store.upsert(job("adzuna", "2"));
        store.save().unwrap();

        let reloaded = FileJobStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        let found = reloaded.get_by_ids(&["adzuna_1".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_file_job_store_upsert_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let mut store = FileJobStore::open(&path).unwrap();

        let mut original = job("adzuna", "1");
        original.title = "Junior Engineer".to_string();
        store.upsert(original);

        let mut updated = job("adzuna", "1");
        updated.title = "Senior Engineer".to_string();
        store.upsert(updated);

        assert_eq!(store.len(), 1);
        let found = store.get_by_ids(&["adzuna_1".to_string()]).await.unwrap();
        assert_eq!(found[0].title, "Senior Engineer");
    }
}
