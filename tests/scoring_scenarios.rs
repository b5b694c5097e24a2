//! End-to-end scenarios from the matching core's testable-properties section,
//! constructing `Job`/`ResumeProfile` fixtures directly rather than driving
//! the full pipeline (which would require a downloaded embedding model).

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use job_matcher::matching::evidence::EvidenceExtractor;
use job_matcher::matching::scorer::HybridScorer;
use job_matcher::matching::vector_index::VectorIndex;
use job_matcher::{Job, ResumeProfile};

fn resume_profile(skills: &[&str], preferred_location: Option<&str>, min_salary: Option<f64>) -> ResumeProfile {
    ResumeProfile {
        raw_text: String::new(),
        clean_text: String::new(),
        skills: skills.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        embedding: vec![],
        preferred_location: preferred_location.map(|s| s.to_string()),
        min_salary,
    }
}

fn job_posting(
    description: &str,
    location: &str,
    posted_at: chrono::DateTime<Utc>,
    salary_min: Option<f64>,
    salary_max: Option<f64>,
) -> Job {
    Job {
        source: "adzuna".to_string(),
        source_id: "1".to_string(),
        title: "Senior Backend Engineer".to_string(),
        company: "Acme Corp".to_string(),
        location: location.to_string(),
        description: description.to_string(),
        url: "https://example.com/jobs/1".to_string(),
        salary_min,
        salary_max,
        contract_type: Some("full_time".to_string()),
        contract_time: None,
        category: Some("engineering".to_string()),
        latitude: None,
        longitude: None,
        posted_at,
        created_at: posted_at,
    }
}

/// Scenario 1 — Python résumé vs. Python posting.
#[test]
fn scenario_1_python_resume_vs_python_posting() {
    let now = Utc::now();
    let profile = resume_profile(
        &["python", "django", "fastapi", "postgresql", "docker", "kubernetes", "aws"],
        Some("Remote"),
        Some(140_000.0),
    );
    let job = job_posting(
        "python django fastapi postgresql docker kubernetes aws redis",
        "Remote",
        now - Duration::days(2),
        Some(150_000.0),
        Some(170_000.0),
    );

    let scorer = HybridScorer::default();
    let scored = scorer.score_job(&job, 0.1, &profile, now);

    assert!(scored.breakdown.embedding >= 0.9);
    assert!((scored.breakdown.skill - 7.0 / 8.0).abs() < 1e-9);
    assert!((scored.breakdown.recency - 0.955).abs() < 0.01);
    assert_eq!(scored.breakdown.location, 1.0);
    assert_eq!(scored.breakdown.salary, 1.0);
    assert!(scored.total_score >= 0.85);
}

/// Scenario 2 — stale posting drops recency (and thus total) relative to
/// scenario 1, by roughly `weight_recency * (fresh_recency - stale_recency)`.
#[test]
fn scenario_2_stale_posting_lowers_recency_and_total() {
    let now = Utc::now();
    let profile = resume_profile(
        &["python", "django", "fastapi", "postgresql", "docker", "kubernetes", "aws"],
        Some("Remote"),
        Some(140_000.0),
    );
    let fresh_job = job_posting(
        "python django fastapi postgresql docker kubernetes aws redis",
        "Remote",
        now - Duration::days(2),
        Some(150_000.0),
        Some(170_000.0),
    );
    let stale_job = job_posting(
        "python django fastapi postgresql docker kubernetes aws redis",
        "Remote",
        now - Duration::days(90),
        Some(150_000.0),
        Some(170_000.0),
    );

    let scorer = HybridScorer::default();
    let fresh = scorer.score_job(&fresh_job, 0.1, &profile, now);
    let stale = scorer.score_job(&stale_job, 0.1, &profile, now);

    assert!((stale.breakdown.recency - 0.125).abs() < 0.01);
    let drop = fresh.total_score - stale.total_score;
    assert!((drop - 0.10 * (0.955 - 0.125)).abs() < 0.02);
}

/// Scenario 3 — remote-to-remote matches fully; a concrete city does not.
#[test]
fn scenario_3_remote_match_vs_city_mismatch() {
    assert_eq!(
        HybridScorer::compute_location_match("Remote (US)", Some("Remote")),
        1.0
    );
    assert_eq!(HybridScorer::compute_location_match("London, UK", Some("Remote")), 0.3);
}

/// Scenario 4 — a posting with no extractable skills scores skill fit
/// neutrally and reports no matched/missing skills.
#[test]
fn scenario_4_no_job_skills_extracted_is_neutral() {
    let skills: BTreeSet<String> = ["python".to_string()].into_iter().collect();
    let (score, matched, missing) =
        HybridScorer::compute_skill_overlap(&skills, "Looking for a passionate teammate.");
    assert_eq!(score, 0.5);
    assert!(matched.is_empty());
    assert!(missing.is_empty());
}

/// Scenario 5 — a collection upserted under one embedding version is
/// invisible to a query opened against a different version.
#[tokio::test]
async fn scenario_5_version_fence_isolates_collections() {
    let dir = tempfile::tempdir().unwrap();

    let index_a = VectorIndex::open(dir.path(), "jobs", "versionA", 3).await.unwrap();
    let ids = vec!["adzuna_1".to_string(), "adzuna_2".to_string(), "adzuna_3".to_string()];
    let docs = vec!["doc1".to_string(), "doc2".to_string(), "doc3".to_string()];
    let embeddings = vec![
        vec![1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0],
    ];
    let now = Utc::now();
    let job1 = job_posting("python", "Remote", now, None, None);
    let metadatas = vec![
        job_matcher::JobMetadata::from_job(&job1),
        job_matcher::JobMetadata::from_job(&job1),
        job_matcher::JobMetadata::from_job(&job1),
    ];
    index_a.upsert(&ids, &docs, &embeddings, &metadatas, 256).await.unwrap();
    assert_eq!(index_a.list_all_ids().await.len(), 3);

    // A differently-versioned collection under the same base/persist dir
    // starts empty, even though `index_a` just wrote three vectors.
    let index_b = VectorIndex::open(dir.path(), "jobs", "versionB", 3).await.unwrap();
    assert!(index_b.list_all_ids().await.is_empty());
    let result_b = index_b.query(&[1.0, 0.0, 0.0], 10, None).await.unwrap();
    assert!(result_b.ids.is_empty());
}

/// Scenario 6 — evidence extraction without a usable embedder degrades to
/// skill- and keyword-only evidence instead of failing outright.
#[tokio::test]
async fn scenario_6_evidence_degrades_without_embedder() {
    let extractor = EvidenceExtractor::new(None);
    let result = extractor
        .extract_evidence(
            "adzuna_1",
            "Experienced python and docker engineer with five years building backend systems.",
            "We need a python and docker engineer to help build our backend systems.",
        )
        .await;

    assert!(result
        .matches
        .iter()
        .all(|m| m.match_type == job_matcher::MatchType::Skill));
    assert!(!result.skill_matches.is_empty());
    assert!(!result.keyword_matches.is_empty());
}
