use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::{MatcherError, MatcherResult};
use crate::models::VectorIndexEntry;

/// Soft query timeout. Guards mainly against lock contention with an
/// in-flight write (upsert/delete hold the write lock across a blocking
/// disk flush); the scan itself is synchronous and doesn't yield mid-way.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Scalar metadata value, restricted to the three portable JSON scalar
/// types per spec §3's metadata invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl PartialOrd for MetaValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (MetaValue::String(a), MetaValue::String(b)) => a.partial_cmp(b),
            (MetaValue::Number(a), MetaValue::Number(b)) => a.partial_cmp(b),
            (MetaValue::Bool(a), MetaValue::Bool(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// A single predicate in a `where` filter: equality, range, or set
/// membership over one metadata field. `$gte`/`$lte`/`$eq`/`$in` from spec
/// §4.3, each engine-agnostic since the flat index below evaluates them by
/// direct comparison rather than delegating to a query planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FilterOp {
    Eq(MetaValue),
    Gte(MetaValue),
    Lte(MetaValue),
    In(Vec<MetaValue>),
}

/// A structured metadata filter: all per-field predicates must hold (AND
/// semantics). ISO-8601 `posted_at` strings compare lexicographically, which
/// is correctness-preserving because the index only ever stores UTC-
/// normalized `posted_at` (spec §3 invariant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhereClause {
    predicates: HashMap<String, FilterOp>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: MetaValue) -> Self {
        self.predicates.insert(field.into(), FilterOp::Eq(value));
        self
    }

    pub fn gte(mut self, field: impl Into<String>, value: MetaValue) -> Self {
        self.predicates.insert(field.into(), FilterOp::Gte(value));
        self
    }

    pub fn lte(mut self, field: impl Into<String>, value: MetaValue) -> Self {
        self.predicates.insert(field.into(), FilterOp::Lte(value));
        self
    }

    pub fn is_in(mut self, field: impl Into<String>, values: Vec<MetaValue>) -> Self {
        self.predicates.insert(field.into(), FilterOp::In(values));
        self
    }

    fn field_value(entry: &VectorIndexEntry, field: &str) -> Option<MetaValue> {
        let m = &entry.metadata;
        Some(match field {
            "job_id" => MetaValue::String(m.job_id.clone()),
            "source" => MetaValue::String(m.source.clone()),
            "source_id" => MetaValue::String(m.source_id.clone()),
            "company" => MetaValue::String(m.company.clone()),
            "location" => MetaValue::String(m.location.clone()),
            "category" => MetaValue::String(m.category.clone()),
            "posted_at" => MetaValue::String(m.posted_at.clone()),
            "salary_min" => m.salary_min.map(MetaValue::Number)?,
            "salary_max" => m.salary_max.map(MetaValue::Number)?,
            _ => return None,
        })
    }

    fn matches(&self, entry: &VectorIndexEntry) -> bool {
        self.predicates.iter().all(|(field, op)| {
            let Some(actual) = Self::field_value(entry, field) else {
                return false;
            };
            match op {
                FilterOp::Eq(v) => &actual == v,
                FilterOp::Gte(v) => actual.partial_cmp(v) == Some(std::cmp::Ordering::Greater)
                    || actual == *v,
                FilterOp::Lte(v) => actual.partial_cmp(v) == Some(std::cmp::Ordering::Less)
                    || actual == *v,
                FilterOp::In(values) => values.contains(&actual),
            }
        })
    }
}

/// Parallel-array result shape mirroring the ANN query contract: ascending
/// distance order, one entry per hit.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub distances: Vec<f64>,
    pub documents: Vec<String>,
    pub metadatas: Vec<crate::models::JobMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub collection_name: String,
    pub persist_dir: String,
    pub version_id: String,
    pub count: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    entries: HashMap<String, VectorIndexEntry>,
}

/// Persistent, per-embedding-version flat vector index.
///
/// No ANN library is reimplemented: with a brute-force exact nearest-
/// neighbor scan over the collection, metadata filters can be applied
/// *before* ranking rather than requiring the over-fetch-then-filter
/// emulation the spec allows for engines with native (approximate) ANN —
/// this index always returns the true top-N under the filter, a strictly
/// stronger guarantee.
///
/// Safe for concurrent reads; writes (upsert, delete, collection drop) are
/// serialized via the internal `RwLock`, matching the spec's requirement
/// that write concurrency on one collection be externally serialized.
pub struct VectorIndex {
    persist_dir: PathBuf,
    base_name: String,
    version_id: String,
    dim: usize,
    state: RwLock<CollectionFile>,
}

impl VectorIndex {
    /// Opens (or creates) the collection `"<base>__<versionId>"` under
    /// `persist_dir`. `dim` is the embedder's dimension for this version;
    /// every vector upserted must match it (invariant ii of spec §4.3).
    pub async fn open(
        persist_dir: impl Into<PathBuf>,
        base_name: impl Into<String>,
        version_id: impl Into<String>,
        dim: usize,
    ) -> Result<Self> {
        let persist_dir = persist_dir.into();
        let base_name = base_name.into();
        let version_id = version_id.into();

        std::fs::create_dir_all(&persist_dir)
            .with_context(|| format!("failed to create vector persist dir {}", persist_dir.display()))?;

        let index = Self {
            persist_dir,
            base_name,
            version_id,
            dim,
            state: RwLock::new(CollectionFile::default()),
        };

        let loaded = index.load_from_disk()?;
        *index.state.write().await = loaded;
        Ok(index)
    }

    pub fn collection_name(&self) -> String {
        format!("{}__{}", self.base_name, self.version_id)
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    fn collection_path(&self) -> PathBuf {
        self.persist_dir.join(format!("{}.json", self.collection_name()))
    }

    fn load_from_disk(&self) -> Result<CollectionFile> {
        let path = self.collection_path();
        if !path.exists() {
            return Ok(CollectionFile::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read collection file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse collection file {}", path.display()))
    }

    /// Atomic rewrite: write to a sibling temp file, then rename over the
    /// target, so a crash mid-write never leaves a half-written collection.
    fn persist(&self, state: &CollectionFile) -> Result<()> {
        let path = self.collection_path();
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create temp file {}", tmp_path.display()))?;
            let json = serde_json::to_string(state)?;
            file.write_all(json.as_bytes())?;
        }
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to rename {} to {}", tmp_path.display(), path.display()))?;
        Ok(())
    }

    /// Upserts `ids`/`docs`/`embeddings`/`metadatas` (all equal length,
    /// checked up front) in batches of `batch_size`; each batch is persisted
    /// atomically. Re-upserting an id replaces its prior record.
    pub async fn upsert(
        &self,
        ids: &[String],
        docs: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[crate::models::JobMetadata],
        batch_size: usize,
    ) -> MatcherResult<usize> {
        let n = ids.len();
        if docs.len() != n || embeddings.len() != n || metadatas.len() != n {
            return Err(MatcherError::invalid_input(
                "upsert",
                format!(
                    "ids ({n}), docs ({}), embeddings ({}), metadatas ({}) must have equal length",
                    docs.len(),
                    embeddings.len(),
                    metadatas.len()
                ),
            ));
        }
        if n == 0 {
            return Ok(0);
        }
        for (i, embedding) in embeddings.iter().enumerate() {
            if embedding.len() != self.dim {
                return Err(MatcherError::invalid_input(
                    "embeddings",
                    format!(
                        "embedding at index {i} has dimension {} but collection expects {}",
                        embedding.len(),
                        self.dim
                    ),
                ));
            }
        }

        let batch_size = batch_size.max(1);
        let mut total = 0usize;

        for start in (0..n).step_by(batch_size) {
            let end = (start + batch_size).min(n);
            let mut guard = self.state.write().await;
            for i in start..end {
                guard.entries.insert(
                    ids[i].clone(),
                    VectorIndexEntry {
                        id: ids[i].clone(),
                        document: docs[i].clone(),
                        embedding: embeddings[i].clone(),
                        metadata: metadatas[i].clone(),
                    },
                );
            }
            self.persist(&guard)
                .map_err(|e| MatcherError::transient_with_source("failed to persist upsert batch", e))?;
            total += end - start;
        }

        Ok(total)
    }

    /// Exact nearest-neighbor query by cosine distance (`1 - dot product`
    /// for L2-normalized vectors), ascending distance order, after applying
    /// the optional metadata filter. Bounded by [`QUERY_TIMEOUT`].
    pub async fn query(
        &self,
        query_embedding: &[f32],
        n_results: usize,
        where_clause: Option<&WhereClause>,
    ) -> MatcherResult<QueryResult> {
        if query_embedding.len() != self.dim {
            return Err(MatcherError::invalid_input(
                "query_embedding",
                format!(
                    "query embedding has dimension {} but collection expects {}",
                    query_embedding.len(),
                    self.dim
                ),
            ));
        }

        tokio::time::timeout(QUERY_TIMEOUT, self.query_inner(query_embedding, n_results, where_clause))
            .await
            .map_err(|_| MatcherError::transient(format!("ANN query timed out after {QUERY_TIMEOUT:?}")))?
    }

    async fn query_inner(
        &self,
        query_embedding: &[f32],
        n_results: usize,
        where_clause: Option<&WhereClause>,
    ) -> MatcherResult<QueryResult> {
        let guard = self.state.read().await;
        let mut scored: Vec<(&VectorIndexEntry, f64)> = guard
            .entries
            .values()
            .filter(|entry| where_clause.map(|w| w.matches(entry)).unwrap_or(true))
            .map(|entry| {
                let similarity = dot(query_embedding, &entry.embedding) as f64;
                (entry, 1.0 - similarity)
            })
            .collect();

        scored.sort_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n_results);

        let mut result = QueryResult::default();
        for (entry, distance) in scored {
            result.ids.push(entry.id.clone());
            result.distances.push(distance);
            result.documents.push(entry.document.clone());
            result.metadatas.push(entry.metadata.clone());
        }
        Ok(result)
    }

    pub async fn get_by_ids(&self, ids: &[String]) -> Vec<VectorIndexEntry> {
        let guard = self.state.read().await;
        ids.iter().filter_map(|id| guard.entries.get(id).cloned()).collect()
    }

    pub async fn delete_by_ids(&self, ids: &[String]) -> MatcherResult<usize> {
        let mut guard = self.state.write().await;
        let mut removed = 0usize;
        for id in ids {
            if guard.entries.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.persist(&guard)
                .map_err(|e| MatcherError::transient_with_source("failed to persist deletion", e))?;
        }
        Ok(removed)
    }

    pub async fn list_all_ids(&self) -> Vec<String> {
        let guard = self.state.read().await;
        let mut ids: Vec<String> = guard.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn delete_collection(&self) -> MatcherResult<()> {
        let mut guard = self.state.write().await;
        guard.entries.clear();
        let path = self.collection_path();
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| MatcherError::transient_with_source("failed to remove collection file", anyhow::anyhow!(e)))?;
        }
        Ok(())
    }

    pub async fn info(&self) -> CollectionInfo {
        let guard = self.state.read().await;
        CollectionInfo {
            collection_name: self.collection_name(),
            persist_dir: self.persist_dir.display().to_string(),
            version_id: self.version_id.clone(),
            count: guard.entries.len(),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Constructs the physical collection directory layout for a given base
/// name, independent of any particular `VectorIndex` instance — used by the
/// CLI to report where a collection lives without opening it.
pub fn collection_file_path(persist_dir: &Path, base_name: &str, version_id: &str) -> PathBuf {
    persist_dir.join(format!("{base_name}__{version_id}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobMetadata;

    fn meta(job_id: &str, posted_at: &str, salary_min: Option<f64>) -> JobMetadata {
        JobMetadata {
            job_id: job_id.to_string(),
            source: "test".to_string(),
            source_id: job_id.to_string(),
            company: "Acme".to_string(),
            location: "Remote".to_string(),
            category: "eng".to_string(),
            posted_at: posted_at.to_string(),
            salary_min,
            salary_max: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_query_ascending_distance() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "jobs", "v1", 2).await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let docs = vec!["doc a".to_string(), "doc b".to_string(), "doc c".to_string()];
        let embeddings = vec![vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]];
        let metadatas = vec![
            meta("a", "2024-01-01T00:00:00Z", None),
            meta("b", "2024-01-01T00:00:00Z", None),
            meta("c", "2024-01-01T00:00:00Z", None),
        ];

        index.upsert(&ids, &docs, &embeddings, &metadatas, 256).await.unwrap();

        let result = index.query(&[1.0, 0.0], 3, None).await.unwrap();
        assert_eq!(result.ids[0], "a");
        for w in result.distances.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[tokio::test]
    async fn test_upsert_rejects_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "jobs", "v1", 2).await.unwrap();
        let ids = vec!["a".to_string()];
        let docs = vec!["doc".to_string(), "extra".to_string()];
        let embeddings = vec![vec![1.0, 0.0]];
        let metadatas = vec![meta("a", "2024-01-01T00:00:00Z", None)];
        let result = index.upsert(&ids, &docs, &embeddings, &metadatas, 256).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_re_upsert_replaces_prior_record() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "jobs", "v1", 2).await.unwrap();
        let ids = vec!["a".to_string()];
        index
            .upsert(&ids, &["doc1".to_string()], &[vec![1.0, 0.0]], &[meta("a", "2024-01-01T00:00:00Z", None)], 256)
            .await
            .unwrap();
        index
            .upsert(&ids, &["doc2".to_string()], &[vec![0.0, 1.0]], &[meta("a", "2024-01-01T00:00:00Z", None)], 256)
            .await
            .unwrap();
        let entries = index.get_by_ids(&ids).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].document, "doc2");
    }

    #[tokio::test]
    async fn test_where_clause_gte_filters_by_posted_at() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "jobs", "v1", 2).await.unwrap();
        let ids = vec!["old".to_string(), "new".to_string()];
        let docs = vec!["d".to_string(), "d".to_string()];
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.0]];
        let metadatas = vec![
            meta("old", "2023-01-01T00:00:00Z", None),
            meta("new", "2024-06-01T00:00:00Z", None),
        ];
        index.upsert(&ids, &docs, &embeddings, &metadatas, 256).await.unwrap();

        let where_clause = WhereClause::new().gte("posted_at", MetaValue::String("2024-01-01T00:00:00Z".to_string()));
        let result = index.query(&[1.0, 0.0], 10, Some(&where_clause)).await.unwrap();
        assert_eq!(result.ids, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_and_list_ids() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "jobs", "v1", 2).await.unwrap();
        let ids = vec!["a".to_string(), "b".to_string()];
        index
            .upsert(
                &ids,
                &["d".to_string(), "d".to_string()],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                &[meta("a", "2024-01-01T00:00:00Z", None), meta("b", "2024-01-01T00:00:00Z", None)],
                256,
            )
            .await
            .unwrap();
        let removed = index.delete_by_ids(&["a".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.list_all_ids().await, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_info_reflects_count() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "jobs", "v1", 2).await.unwrap();
        index
            .upsert(
                &["a".to_string()],
                &["d".to_string()],
                &[vec![1.0, 0.0]],
                &[meta("a", "2024-01-01T00:00:00Z", None)],
                256,
            )
            .await
            .unwrap();
        let info = index.info().await;
        assert_eq!(info.count, 1);
        assert_eq!(info.collection_name, "jobs__v1");
    }

    #[tokio::test]
    async fn test_distinct_versions_are_independent_collections() {
        let dir = tempfile::tempdir().unwrap();
        let index_a = VectorIndex::open(dir.path(), "jobs", "A", 2).await.unwrap();
        index_a
            .upsert(
                &["x".to_string()],
                &["d".to_string()],
                &[vec![1.0, 0.0]],
                &[meta("x", "2024-01-01T00:00:00Z", None)],
                256,
            )
            .await
            .unwrap();

        let index_b = VectorIndex::open(dir.path(), "jobs", "B", 2).await.unwrap();
        assert!(index_b.list_all_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_query_rejects_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path(), "jobs", "v1", 2).await.unwrap();
        let result = index.query(&[1.0, 0.0, 0.0], 5, None).await;
        assert!(result.is_err());
    }
}
