use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An immutable job posting. `id` is derived (`"<source>_<sourceId>"`), not
/// stored independently — it is injective on `(source, sourceId)` by
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub url: String,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub contract_type: Option<String>,
    pub contract_time: Option<String>,
    pub category: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub posted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn id(&self) -> String {
        format!("{}_{}", self.source, self.source_id)
    }
}

/// Derived from a résumé upload. One profile is ever "current"; replacing it
/// discards the previous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeProfile {
    pub raw_text: String,
    pub clean_text: String,
    pub skills: BTreeSet<String>,
    pub embedding: Vec<f32>,
    pub preferred_location: Option<String>,
    pub min_salary: Option<f64>,
}

/// `(modelName, dim, versionId)`. Every vector in an index collection was
/// produced under exactly one `EmbeddingConfig`; vectors under different
/// `versionId`s are never compared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub model_name: String,
    pub dim: usize,
    pub version_id: String,
}

/// Scalar-only metadata payload attached to a vector index entry, restricted
/// to string/number/boolean types to preserve the portability of the filter
/// language across backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub job_id: String,
    pub source: String,
    pub source_id: String,
    pub company: String,
    pub location: String,
    pub category: String,
    pub posted_at: String,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
}

impl JobMetadata {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id(),
            source: job.source.clone(),
            source_id: job.source_id.clone(),
            company: job.company.clone(),
            location: job.location.clone(),
            category: job.category.clone().unwrap_or_default(),
            posted_at: job.posted_at.to_rfc3339(),
            salary_min: job.salary_min,
            salary_max: job.salary_max,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexEntry {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: JobMetadata,
}

/// Five non-negative weights summing to 1. Defaults per spec §3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub embedding: f64,
    pub skill: f64,
    pub recency: f64,
    pub location: f64,
    pub salary: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            embedding: 0.55,
            skill: 0.25,
            recency: 0.10,
            location: 0.07,
            salary: 0.03,
        }
    }
}

impl ScoringWeights {
    pub fn as_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("embedding", self.embedding),
            ("skill", self.skill),
            ("recency", self.recency),
            ("location", self.location),
            ("salary", self.salary),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub embedding: f64,
    pub skill: f64,
    pub recency: f64,
    pub location: f64,
    pub salary: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredJob {
    pub job: Job,
    pub total_score: f64,
    pub breakdown: ScoreBreakdown,
    pub effective_weights: BTreeMap<String, f64>,
    pub contributions: BTreeMap<String, f64>,
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub explanation: String,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    Semantic,
    Skill,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceMatch {
    pub resume_sentence: String,
    pub job_sentence: String,
    pub similarity: f64,
    pub match_type: MatchType,
    pub matched_terms: Vec<String>,
}

impl EvidenceMatch {
    pub fn new(
        resume_sentence: impl Into<String>,
        job_sentence: impl Into<String>,
        similarity: f64,
        match_type: MatchType,
        mut matched_terms: Vec<String>,
    ) -> Self {
        matched_terms.sort();
        matched_terms.dedup();
        Self {
            resume_sentence: resume_sentence.into(),
            job_sentence: job_sentence.into(),
            similarity,
            match_type,
            matched_terms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceResult {
    pub job_id: String,
    pub matches: Vec<EvidenceMatch>,
    pub top_resume_sentences: Vec<String>,
    pub top_job_sentences: Vec<String>,
    pub skill_matches: Vec<String>,
    pub keyword_matches: Vec<String>,
}

impl EvidenceResult {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn avg_similarity(&self) -> f64 {
        if self.matches.is_empty() {
            return 0.0;
        }
        self.matches.iter().map(|m| m.similarity).sum::<f64>() / self.matches.len() as f64
    }
}
