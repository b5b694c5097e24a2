//! The two external entry points the core exposes per spec §6:
//! `index_jobs` (offline indexing driver) and `search` (online query path).
//! Both are generic over `S: JobStore` rather than boxing it, since a single
//! concrete store is wired up per process (spec §1/§6: the row store is an
//! external collaborator, not something this crate implements).

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::info;
use tokio_util::sync::CancellationToken;

use crate::errors::{MatcherError, MatcherResult};
use crate::job_store::JobStore;
use crate::matching::embeddings::EmbeddingManager;
use crate::matching::evidence::EvidenceExtractor;
use crate::matching::scorer::HybridScorer;
use crate::matching::text_cleaner::{
    build_job_document, clean_job_text, clean_resume_text, extract_skills_default,
    is_text_too_short,
};
use crate::matching::vector_index::{MetaValue, VectorIndex, WhereClause};
use crate::models::{EvidenceResult, Job, JobMetadata, ResumeProfile, ScoredJob, ScoringWeights};

const DEFAULT_MAX_DESCRIPTION_CHARS: usize = 6000;
const MIN_JOB_CHARS: usize = 100;
const MIN_RESUME_CHARS: usize = 200;
/// Per-job soft timeout for evidence extraction. A job that times out
/// degrades to an empty evidence result rather than dropping it from the
/// batch or failing the whole call.
const EVIDENCE_PER_JOB_TIMEOUT: Duration = Duration::from_secs(1);

/// CLI/library-level flags for `indexJobs` (spec §6).
#[derive(Debug, Clone)]
pub struct IndexJobsOptions {
    pub source: Option<String>,
    pub limit: Option<usize>,
    pub batch_size_jobs: usize,
    pub batch_size_embed: usize,
    pub rebuild: bool,
}

impl Default for IndexJobsOptions {
    fn default() -> Self {
        Self {
            source: None,
            limit: None,
            batch_size_jobs: 256,
            batch_size_embed: 64,
            rebuild: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexCounts {
    pub fetched: usize,
    pub skipped_too_short: usize,
    pub already_indexed: usize,
    pub indexed: usize,
    pub elapsed: Duration,
}

/// Diagnostic counters for one `search` call (spec §6: "total candidates
/// fetched, filtered out, scored, time per stage"). Returned alongside the
/// ranked results rather than logged-only, so an embedding caller (the HTTP
/// API layer) can surface per-query timing without re-instrumenting the
/// pipeline itself.
#[derive(Debug, Clone, Default)]
pub struct SearchDiagnostics {
    /// Candidates returned by the ANN query, before the row-store rehydration
    /// and score/minScore/topK filters.
    pub candidates_fetched: usize,
    /// Candidates dropped: missing from the row store (`NotFound`, absorbed)
    /// plus those filtered out by `minScore`/`topK` after scoring.
    pub filtered_out: usize,
    /// Candidates that made it through scoring into the returned list.
    pub scored: usize,
    pub embed_resume_time: Duration,
    pub ann_query_time: Duration,
    pub scoring_time: Duration,
    pub total_time: Duration,
}

/// `search` options (spec §6). `top_k` is validated against `1..=200`.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub min_score: f64,
    pub recency_days: Option<i64>,
    pub preferred_location: Option<String>,
    pub min_salary: Option<f64>,
    pub sources: Option<Vec<String>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 20,
            min_score: 0.0,
            recency_days: None,
            preferred_location: None,
            min_salary: None,
            sources: None,
        }
    }
}

/// Checked at each stage boundary in index_jobs/search (before an embed
/// batch, before the ANN query); a cancelled token fails the call as
/// `Transient` rather than quietly returning a partial result.
fn check_cancelled(token: Option<&CancellationToken>) -> MatcherResult<()> {
    if token.map(|t| t.is_cancelled()).unwrap_or(false) {
        return Err(MatcherError::transient("operation cancelled"));
    }
    Ok(())
}

/// Cleans, extracts skills from, and embeds one job; assembles the document
/// C3 ultimately stores. Returns `None` for postings too short to be useful
/// signal, per §4.1's `is_text_too_short`.
async fn prepare_job(job: &Job, embedder: &EmbeddingManager) -> MatcherResult<Option<(String, Vec<f32>, JobMetadata)>> {
    let cleaned = clean_job_text(&job.description);
    if is_text_too_short(&cleaned.text, MIN_JOB_CHARS) {
        return Ok(None);
    }

    let document = build_job_document(
        &job.title,
        &job.company,
        &job.location,
        &cleaned.text,
        DEFAULT_MAX_DESCRIPTION_CHARS,
    );

    let embedding = embedder
        .embed_one(&document, true)
        .await
        .map_err(|e| MatcherError::transient_with_source("failed to embed job document", e))?;

    Ok(Some((document, embedding, JobMetadata::from_job(job))))
}

/// Offline indexing driver: reads jobs from `store`, filters out ids already
/// present in the index unless `opts.rebuild` is set, cleans and embeds them
/// in batches, and upserts into the versioned collection matching the
/// currently-loaded embedder.
pub async fn index_jobs<S: JobStore>(
    store: &S,
    index: &VectorIndex,
    embedder: &EmbeddingManager,
    opts: IndexJobsOptions,
    cancellation: Option<&CancellationToken>,
) -> MatcherResult<IndexCounts> {
    let start = Instant::now();
    let mut counts = IndexCounts::default();

    if opts.rebuild {
        index.delete_collection().await?;
        info!("rebuild requested: cleared collection {}", index.collection_name());
    }

    let existing_ids: HashSet<String> = if opts.rebuild {
        HashSet::new()
    } else {
        index.list_all_ids().await.into_iter().collect()
    };

    let mut offset = 0usize;
    let mut ids_batch = Vec::new();
    let mut docs_batch = Vec::new();
    let mut embeddings_batch = Vec::new();
    let mut metadatas_batch = Vec::new();

    loop {
        check_cancelled(cancellation)?;
        let remaining_limit = opts.limit.map(|l| l.saturating_sub(counts.fetched));
        if remaining_limit == Some(0) {
            break;
        }
        let page_size = remaining_limit
            .map(|r| r.min(opts.batch_size_jobs))
            .unwrap_or(opts.batch_size_jobs);

        let page = store
            .fetch_batch(opts.source.as_deref(), page_size, offset)
            .await
            .map_err(|e| MatcherError::transient_with_source("failed to fetch job batch", e))?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        counts.fetched += page.len();

        for job in &page {
            if !opts.rebuild && existing_ids.contains(&job.id()) {
                counts.already_indexed += 1;
                continue;
            }

            match prepare_job(job, embedder).await? {
                None => counts.skipped_too_short += 1,
                Some((document, embedding, metadata)) => {
                    ids_batch.push(job.id());
                    docs_batch.push(document);
                    embeddings_batch.push(embedding);
                    metadatas_batch.push(metadata);

                    if ids_batch.len() >= opts.batch_size_embed {
                        check_cancelled(cancellation)?;
                        flush_batch(
                            index,
                            &mut ids_batch,
                            &mut docs_batch,
                            &mut embeddings_batch,
                            &mut metadatas_batch,
                            &mut counts,
                        )
                        .await?;
                    }
                }
            }
        }

        if page.len() < page_size {
            break;
        }
    }

    flush_batch(
        index,
        &mut ids_batch,
        &mut docs_batch,
        &mut embeddings_batch,
        &mut metadatas_batch,
        &mut counts,
    )
    .await?;

    counts.elapsed = start.elapsed();
    info!(
        "indexing complete: fetched={} indexed={} skipped_too_short={} already_indexed={} elapsed={:?}",
        counts.fetched, counts.indexed, counts.skipped_too_short, counts.already_indexed, counts.elapsed
    );
    Ok(counts)
}

async fn flush_batch(
    index: &VectorIndex,
    ids: &mut Vec<String>,
    docs: &mut Vec<String>,
    embeddings: &mut Vec<Vec<f32>>,
    metadatas: &mut Vec<JobMetadata>,
    counts: &mut IndexCounts,
) -> MatcherResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let n = index.upsert(ids, docs, embeddings, metadatas, ids.len()).await?;
    counts.indexed += n;
    ids.clear();
    docs.clear();
    embeddings.clear();
    metadatas.clear();
    Ok(())
}

/// Builds a `ResumeProfile` from raw résumé text: cleans (without boilerplate
/// stripping), extracts skills, and embeds the cleaned text.
pub async fn build_resume_profile(
    resume_text: &str,
    embedder: &EmbeddingManager,
    preferred_location: Option<String>,
    min_salary: Option<f64>,
) -> MatcherResult<ResumeProfile> {
    if resume_text.trim().is_empty() {
        return Err(MatcherError::invalid_input("resumeText", "résumé text must not be empty"));
    }

    let cleaned = clean_resume_text(resume_text);
    if is_text_too_short(&cleaned.text, MIN_RESUME_CHARS) {
        return Err(MatcherError::invalid_input(
            "resumeText",
            format!("résumé has fewer than {MIN_RESUME_CHARS} non-whitespace characters"),
        ));
    }

    let skills = extract_skills_default(&cleaned.text).into_iter().collect();
    let embedding = embedder
        .embed_one(&cleaned.text, true)
        .await
        .map_err(|e| MatcherError::transient_with_source("failed to embed résumé", e))?;

    Ok(ResumeProfile {
        raw_text: resume_text.to_string(),
        clean_text: cleaned.text,
        skills,
        embedding,
        preferred_location,
        min_salary,
    })
}

fn validate_search_options(opts: &SearchOptions) -> MatcherResult<()> {
    if opts.top_k > 200 {
        return Err(MatcherError::invalid_input("topK", "must be between 0 and 200"));
    }
    if !(0.0..=1.0).contains(&opts.min_score) {
        return Err(MatcherError::invalid_input("minScore", "must be between 0 and 1"));
    }
    Ok(())
}

fn build_where_clause(opts: &SearchOptions, now: DateTime<Utc>) -> Option<WhereClause> {
    let mut clause = WhereClause::new();
    let mut has_predicate = false;

    if let Some(days) = opts.recency_days {
        let cutoff = now - chrono::Duration::days(days);
        clause = clause.gte("posted_at", MetaValue::String(cutoff.to_rfc3339()));
        has_predicate = true;
    }
    if let Some(sources) = &opts.sources {
        if !sources.is_empty() {
            clause = clause.is_in(
                "source",
                sources.iter().map(|s| MetaValue::String(s.clone())).collect(),
            );
            has_predicate = true;
        }
    }

    has_predicate.then_some(clause)
}

/// Online query path: clean + extract skills from the résumé, embed it,
/// query the versioned index for a superset of candidates, rehydrate full
/// `Job` records from the row store, score and rank with the hybrid scorer,
/// then apply `minScore`/`topK` post-filters. Fails fast (`VersionMismatch`)
/// if the loaded embedder's version disagrees with the queried collection.
pub async fn search<S: JobStore>(
    resume_text: &str,
    options: SearchOptions,
    store: &S,
    index: &VectorIndex,
    embedder: &EmbeddingManager,
    weights: ScoringWeights,
    cancellation: Option<&CancellationToken>,
) -> MatcherResult<(Vec<ScoredJob>, SearchDiagnostics)> {
    let overall_start = Instant::now();
    let mut diagnostics = SearchDiagnostics::default();

    validate_search_options(&options)?;
    if options.top_k == 0 {
        return Ok((Vec::new(), diagnostics));
    }
    check_cancelled(cancellation)?;

    let config = embedder
        .config()
        .await
        .map_err(|e| MatcherError::configuration_with_source("failed to load embedding model", e))?;
    if config.version_id != index.version_id() {
        return Err(MatcherError::version_mismatch(config.version_id, index.version_id().to_string()));
    }

    let embed_start = Instant::now();
    let profile = build_resume_profile(
        resume_text,
        embedder,
        options.preferred_location.clone(),
        options.min_salary,
    )
    .await?;
    diagnostics.embed_resume_time = embed_start.elapsed();

    let now = Utc::now();
    let where_clause = build_where_clause(&options, now);

    // Over-fetch: ANN results are a superset of what survives scoring's
    // post-filters, per spec §9's "single-pass scoring over reranked
    // candidates" note.
    let fetch_n = options.top_k.saturating_mul(2).max(options.top_k);
    check_cancelled(cancellation)?;
    let query_start = Instant::now();
    let query_result = index
        .query(&profile.embedding, fetch_n, where_clause.as_ref())
        .await?;
    diagnostics.ann_query_time = query_start.elapsed();

    let ids = query_result.ids;
    let distances = query_result.distances;
    diagnostics.candidates_fetched = ids.len();

    let jobs = store
        .get_by_ids(&ids)
        .await
        .map_err(|e| MatcherError::transient_with_source("failed to rehydrate jobs", e))?;

    let mut jobs_by_id = std::collections::HashMap::new();
    for job in jobs {
        jobs_by_id.insert(job.id(), job);
    }

    let mut matched_jobs = Vec::with_capacity(ids.len());
    let mut matched_distances = Vec::with_capacity(ids.len());
    for (id, distance) in ids.iter().zip(distances.iter()) {
        match jobs_by_id.remove(id) {
            Some(job) => {
                matched_jobs.push(job);
                matched_distances.push(*distance);
            }
            None => {
                diagnostics.filtered_out += 1;
                MatcherError::not_found(format!("job id {id} from ANN hit not found in row store")).log("search");
            }
        }
    }

    let scoring_start = Instant::now();
    let scorer = HybridScorer::new(weights);
    let mut scored = scorer.score_jobs(&matched_jobs, &matched_distances, &profile, now)?;
    diagnostics.scoring_time = scoring_start.elapsed();

    let before_post_filter = scored.len();
    scored.retain(|s| s.total_score >= options.min_score);
    scored.truncate(options.top_k);
    diagnostics.filtered_out += before_post_filter - scored.len();
    diagnostics.scored = scored.len();
    diagnostics.total_time = overall_start.elapsed();

    Ok((scored, diagnostics))
}

/// Extracts evidence for the head of a result list (spec §4.5/§9: evidence is
/// advisory and computed only for the top-K to bound cost). `extract_evidence`
/// itself never fails: an embedding failure for one job degrades to an empty
/// semantic-match list for that job (spec §7's `Degraded` kind) rather than
/// aborting the whole batch.
pub async fn extract_evidence_for_results(
    results: &[ScoredJob],
    profile: &ResumeProfile,
    embedder: Option<&EmbeddingManager>,
    cancellation: Option<&CancellationToken>,
) -> Vec<EvidenceResult> {
    let extractor = EvidenceExtractor::new(embedder);
    let mut out = Vec::with_capacity(results.len());
    for scored in results {
        if cancellation.map(|t| t.is_cancelled()).unwrap_or(false) {
            break;
        }
        let job_id = scored.job.id();
        let evidence = tokio::time::timeout(
            EVIDENCE_PER_JOB_TIMEOUT,
            extractor.extract_evidence(&job_id, &profile.clean_text, &scored.job.description),
        )
        .await
        .unwrap_or_else(|_| {
            MatcherError::transient(format!(
                "evidence extraction for job {job_id} timed out after {EVIDENCE_PER_JOB_TIMEOUT:?}"
            ))
            .log("evidence");
            EvidenceResult {
                job_id: job_id.clone(),
                matches: Vec::new(),
                top_resume_sentences: Vec::new(),
                top_job_sentences: Vec::new(),
                skill_matches: Vec::new(),
                keyword_matches: Vec::new(),
            }
        });
        out.push(evidence);
    }
    out
}
