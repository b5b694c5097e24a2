use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::text_cleaner::{extract_skills, DEFAULT_SKILL_LEXICON};
use crate::errors::{MatcherError, MatcherResult};
use crate::models::{Job, ResumeProfile, ScoreBreakdown, ScoredJob, ScoringWeights};

const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

/// The five renormalizable components, in the fixed order the spec defines
/// them. Kept as an enum (rather than stringly-typed keys) so exclusion and
/// renormalization can't typo a component name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Component {
    Embedding,
    Skill,
    Recency,
    Location,
    Salary,
}

impl Component {
    const ALL: [Component; 5] = [
        Component::Embedding,
        Component::Skill,
        Component::Recency,
        Component::Location,
        Component::Salary,
    ];

    fn key(self) -> &'static str {
        match self {
            Component::Embedding => "embedding",
            Component::Skill => "skill",
            Component::Recency => "recency",
            Component::Location => "location",
            Component::Salary => "salary",
        }
    }

    fn weight(self, weights: &ScoringWeights) -> f64 {
        match self {
            Component::Embedding => weights.embedding,
            Component::Skill => weights.skill,
            Component::Recency => weights.recency,
            Component::Location => weights.location,
            Component::Salary => weights.salary,
        }
    }

    fn score(self, breakdown: &ScoreBreakdown) -> f64 {
        match self {
            Component::Embedding => breakdown.embedding,
            Component::Skill => breakdown.skill,
            Component::Recency => breakdown.recency,
            Component::Location => breakdown.location,
            Component::Salary => breakdown.salary,
        }
    }
}

/// Computes hybrid match scores for jobs against a résumé profile: cosine
/// similarity fused with skill overlap, recency, location fit, and salary
/// fit, under weights that renormalize over whichever components are
/// structurally available for a given job/résumé pair.
#[derive(Debug, Clone)]
pub struct HybridScorer {
    weights: ScoringWeights,
}

impl Default for HybridScorer {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
        }
    }
}

impl HybridScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// §4.4.1 — `embed = clamp(1 - distance, 0, 1)`.
    pub fn distance_to_similarity(distance: f64) -> f64 {
        (1.0 - distance).clamp(0.0, 1.0)
    }

    /// §4.4.2 — recall of the job's extracted skills by the résumé's skill
    /// set. A job with no extractable skills is neutral (the posting gave no
    /// evidence either way), not penalized.
    pub fn compute_skill_overlap(
        resume_skills: &std::collections::BTreeSet<String>,
        job_description: &str,
    ) -> (f64, Vec<String>, Vec<String>) {
        let job_skills: std::collections::BTreeSet<String> =
            extract_skills(job_description, DEFAULT_SKILL_LEXICON)
                .into_iter()
                .collect();

        if job_skills.is_empty() {
            return (0.5, Vec::new(), Vec::new());
        }

        let matched: Vec<String> = resume_skills.intersection(&job_skills).cloned().collect();
        let missing: Vec<String> = job_skills.difference(resume_skills).cloned().collect();
        let score = matched.len() as f64 / job_skills.len() as f64;
        (score, matched, missing)
    }

    /// §4.4.3 — exponential decay with a 30-day half-life. A future
    /// `posted_at` (negative `days_ago`) scores 1.0.
    pub fn compute_recency(posted_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let days_ago = (now - posted_at).num_days().max(0) as f64;
        let decay_rate = std::f64::consts::LN_2 / RECENCY_HALF_LIFE_DAYS;
        (-decay_rate * days_ago).exp().clamp(0.0, 1.0)
    }

    /// §4.4.4 — string-based location fit. No gazetteer: "York" legitimately
    /// matches inside "New York" here, a known and accepted limitation.
    pub fn compute_location_match(job_location: &str, preferred_location: Option<&str>) -> f64 {
        let Some(preferred) = preferred_location else {
            return 0.5;
        };

        let job_lower = job_location.to_lowercase();
        let pref_lower = preferred.to_lowercase();

        if job_lower.contains("remote") && pref_lower.contains("remote") {
            return 1.0;
        }
        if job_lower.contains(&pref_lower) || pref_lower.contains(&job_lower) {
            return 1.0;
        }

        let pref_words: std::collections::HashSet<&str> = pref_lower.split_whitespace().collect();
        let job_normalized = job_lower.replace(',', " ");
        let job_words: std::collections::HashSet<&str> = job_normalized.split_whitespace().collect();
        if pref_words.iter().any(|w| job_words.contains(w)) {
            return 0.7;
        }

        0.3
    }

    /// §4.4.5 — ratio of job salary midpoint to the résumé's minimum desired
    /// salary, under a piecewise ramp.
    pub fn compute_salary_match(
        job_salary_min: Option<f64>,
        job_salary_max: Option<f64>,
        user_min_salary: Option<f64>,
    ) -> f64 {
        let Some(user_min) = user_min_salary else {
            return 0.5;
        };

        let job_mid = match (job_salary_min, job_salary_max) {
            (Some(min), Some(max)) => (min + max) / 2.0,
            (None, Some(max)) => max,
            (Some(min), None) => min,
            (None, None) => return 0.5,
        };

        let ratio = job_mid / user_min;
        if ratio >= 1.0 {
            1.0
        } else if ratio >= 0.8 {
            0.6 + (ratio - 0.8) * 2.0
        } else {
            (ratio * 0.75).max(0.0)
        }
    }

    /// §4.4.6 — excludes components whose input is structurally absent
    /// (never present-but-zero) and redistributes their weight over the
    /// remaining components so they still sum to 1.
    fn renormalize(&self, excluded: &[Component]) -> BTreeMap<Component, f64> {
        let remaining: Vec<Component> = Component::ALL
            .into_iter()
            .filter(|c| !excluded.contains(c))
            .collect();

        let total: f64 = remaining.iter().map(|c| c.weight(&self.weights)).sum();

        if total <= 0.0 {
            let equal = 1.0 / remaining.len().max(1) as f64;
            return remaining.into_iter().map(|c| (c, equal)).collect();
        }

        remaining
            .into_iter()
            .map(|c| (c, c.weight(&self.weights) / total))
            .collect()
    }

    /// §4.4.8 — a short explanation phrase assembled from the breakdown.
    fn generate_explanation(
        breakdown: &ScoreBreakdown,
        matched_skills: &[String],
        missing_skills: &[String],
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        if breakdown.embedding >= 0.7 {
            parts.push(format!("Strong semantic match ({:.0}%)", breakdown.embedding * 100.0));
        } else if breakdown.embedding >= 0.5 {
            parts.push(format!("Good semantic match ({:.0}%)", breakdown.embedding * 100.0));
        }

        if !matched_skills.is_empty() {
            parts.push(format!("covers {} required skills", matched_skills.len()));
        }
        if missing_skills.len() > 3 {
            parts.push(format!("missing {} skills", missing_skills.len()));
        }

        if breakdown.recency >= 0.8 {
            parts.push("posted recently".to_string());
        }

        if parts.is_empty() {
            return "Moderate match".to_string();
        }
        format!("{}.", parts.join(", "))
    }

    /// Scores a single job against a résumé profile at a fixed instant
    /// `now` (threaded explicitly so recency scoring is deterministic and
    /// testable rather than reaching for the wall clock internally).
    pub fn score_job(&self, job: &Job, distance: f64, profile: &ResumeProfile, now: DateTime<Utc>) -> ScoredJob {
        let mut breakdown = ScoreBreakdown::default();

        breakdown.embedding = Self::distance_to_similarity(distance);

        let (skill_score, matched, missing) =
            Self::compute_skill_overlap(&profile.skills, &job.description);
        breakdown.skill = skill_score;

        breakdown.recency = Self::compute_recency(job.posted_at, now);

        breakdown.location =
            Self::compute_location_match(&job.location, profile.preferred_location.as_deref());

        breakdown.salary = Self::compute_salary_match(job.salary_min, job.salary_max, profile.min_salary);

        let mut excluded = Vec::new();
        if profile.preferred_location.is_none() {
            excluded.push(Component::Location);
        }
        if profile.min_salary.is_none() && job.salary_min.is_none() && job.salary_max.is_none() {
            excluded.push(Component::Salary);
        }

        let effective_weights = self.renormalize(&excluded);

        let mut contributions: BTreeMap<String, f64> = BTreeMap::new();
        let mut total_score = 0.0;
        for (component, weight) in &effective_weights {
            let contribution = component.score(&breakdown) * weight;
            contributions.insert(component.key().to_string(), contribution);
            total_score += contribution;
        }

        let mut matched_sorted = matched.clone();
        matched_sorted.sort();
        matched_sorted.dedup();
        let mut missing_sorted = missing.clone();
        missing_sorted.sort();
        missing_sorted.dedup();
        missing_sorted.truncate(10);

        let explanation = Self::generate_explanation(&breakdown, &matched_sorted, &missing_sorted);

        let effective_weights_map: BTreeMap<String, f64> = effective_weights
            .into_iter()
            .map(|(c, w)| (c.key().to_string(), w))
            .collect();

        ScoredJob {
            job: job.clone(),
            total_score: total_score.clamp(0.0, 1.0),
            breakdown,
            effective_weights: effective_weights_map,
            contributions,
            matched_skills: matched_sorted,
            missing_skills: missing_sorted,
            explanation,
            distance,
        }
    }

    /// §4.4.9 — scores every job and returns them sorted by descending
    /// `total_score`; ties keep insertion order (stable sort).
    pub fn score_jobs(
        &self,
        jobs: &[Job],
        distances: &[f64],
        profile: &ResumeProfile,
        now: DateTime<Utc>,
    ) -> MatcherResult<Vec<ScoredJob>> {
        if jobs.len() != distances.len() {
            return Err(MatcherError::invalid_input(
                "distances",
                format!(
                    "jobs ({}) and distances ({}) must have the same length",
                    jobs.len(),
                    distances.len()
                ),
            ));
        }

        let mut scored: Vec<ScoredJob> = jobs
            .iter()
            .zip(distances.iter())
            .map(|(job, distance)| self.score_job(job, *distance, profile, now))
            .collect();

        scored.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(scored)
    }
}
