use std::path::PathBuf;
use std::process::ExitCode;

use job_matcher::config::ConfigManager;
use job_matcher::job_store::FileJobStore;
use job_matcher::matching::embeddings::EmbeddingManager;
use job_matcher::matching::vector_index::VectorIndex;
use job_matcher::pipeline::{index_jobs, search, IndexJobsOptions, SearchOptions};
use job_matcher::{MatcherError, ScoringWeights};
use log::{error, info};

const EXIT_SUCCESS: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_INVALID_ARGS: u8 = 2;

fn print_usage() {
    eprintln!(
        "job-matcher — résumé-to-job matching core\n\n\
         USAGE:\n\
         \u{20}  job-matcher index  [--source <name>] [--limit <n>] [--batch-size-jobs <n>]\n\
         \u{20}                     [--batch-size-embed <n>] [--rebuild] [-v]\n\
         \u{20}  job-matcher search --resume <path> [--top-k <n>] [--min-score <f>]\n\
         \u{20}                     [--recency-days <n>] [--preferred-location <s>]\n\
         \u{20}                     [--min-salary <f>] [--sources <a,b,c>] [-v]\n"
    );
}

struct IndexArgs {
    source: Option<String>,
    limit: Option<usize>,
    batch_size_jobs: usize,
    batch_size_embed: usize,
    rebuild: bool,
    verbose: bool,
}

struct SearchArgs {
    resume_path: PathBuf,
    top_k: usize,
    min_score: f64,
    recency_days: Option<i64>,
    preferred_location: Option<String>,
    min_salary: Option<f64>,
    sources: Option<Vec<String>>,
    verbose: bool,
}

fn parse_index_args(args: &[String]) -> Result<IndexArgs, String> {
    let mut parsed = IndexArgs {
        source: None,
        limit: None,
        batch_size_jobs: 256,
        batch_size_embed: 64,
        rebuild: false,
        verbose: false,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--source" => {
                i += 1;
                parsed.source = Some(require_value(args, i, "--source")?);
            }
            "--limit" => {
                i += 1;
                parsed.limit = Some(parse_usize(&require_value(args, i, "--limit")?, "--limit")?);
            }
            "--batch-size-jobs" => {
                i += 1;
                parsed.batch_size_jobs =
                    parse_usize(&require_value(args, i, "--batch-size-jobs")?, "--batch-size-jobs")?;
            }
            "--batch-size-embed" => {
                i += 1;
                parsed.batch_size_embed =
                    parse_usize(&require_value(args, i, "--batch-size-embed")?, "--batch-size-embed")?;
            }
            "--rebuild" => parsed.rebuild = true,
            "-v" | "--verbose" => parsed.verbose = true,
            other => return Err(format!("unrecognized flag for `index`: {other}")),
        }
        i += 1;
    }

    Ok(parsed)
}

fn parse_search_args(args: &[String]) -> Result<SearchArgs, String> {
    let mut resume_path = None;
    let mut top_k = 20usize;
    let mut min_score = 0.0f64;
    let mut recency_days = None;
    let mut preferred_location = None;
    let mut min_salary = None;
    let mut sources = None;
    let mut verbose = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--resume" => {
                i += 1;
                resume_path = Some(PathBuf::from(require_value(args, i, "--resume")?));
            }
            "--top-k" => {
                i += 1;
                top_k = parse_usize(&require_value(args, i, "--top-k")?, "--top-k")?;
            }
            "--min-score" => {
                i += 1;
                min_score = parse_f64(&require_value(args, i, "--min-score")?, "--min-score")?;
            }
            "--recency-days" => {
                i += 1;
                recency_days = Some(parse_i64(&require_value(args, i, "--recency-days")?, "--recency-days")?);
            }
            "--preferred-location" => {
                i += 1;
                preferred_location = Some(require_value(args, i, "--preferred-location")?);
            }
            "--min-salary" => {
                i += 1;
                min_salary = Some(parse_f64(&require_value(args, i, "--min-salary")?, "--min-salary")?);
            }
            "--sources" => {
                i += 1;
                let raw = require_value(args, i, "--sources")?;
                sources = Some(raw.split(',').map(|s| s.trim().to_string()).collect());
            }
            "-v" | "--verbose" => verbose = true,
            other => return Err(format!("unrecognized flag for `search`: {other}")),
        }
        i += 1;
    }

    let resume_path = resume_path.ok_or_else(|| "`search` requires --resume <path>".to_string())?;

    Ok(SearchArgs {
        resume_path,
        top_k,
        min_score,
        recency_days,
        preferred_location,
        min_salary,
        sources,
        verbose,
    })
}

fn require_value(args: &[String], index: usize, flag: &str) -> Result<String, String> {
    args.get(index)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_usize(s: &str, flag: &str) -> Result<usize, String> {
    s.parse::<usize>().map_err(|_| format!("{flag} expects a non-negative integer, got '{s}'"))
}

fn parse_i64(s: &str, flag: &str) -> Result<i64, String> {
    s.parse::<i64>().map_err(|_| format!("{flag} expects an integer, got '{s}'"))
}

fn parse_f64(s: &str, flag: &str) -> Result<f64, String> {
    s.parse::<f64>().map_err(|_| format!("{flag} expects a number, got '{s}'"))
}

async fn run_index(args: IndexArgs, config: &ConfigManager) -> Result<(), MatcherError> {
    let settings = config.settings();
    let store = FileJobStore::open(&settings.metadata_db_path)
        .map_err(|e| MatcherError::configuration_with_source("failed to open job store", e))?;

    let embedder = EmbeddingManager::new(&settings.embedding_model_name);
    let embedding_config = embedder
        .config()
        .await
        .map_err(|e| MatcherError::configuration_with_source("failed to load embedding model", e))?;

    let index = VectorIndex::open(
        &settings.vector_persist_dir,
        &settings.vector_collection_base,
        &embedding_config.version_id,
        embedding_config.dim,
    )
    .await
    .map_err(|e| MatcherError::configuration_with_source("failed to open vector index", e))?;

    let opts = IndexJobsOptions {
        source: args.source,
        limit: args.limit,
        batch_size_jobs: args.batch_size_jobs,
        batch_size_embed: args.batch_size_embed,
        rebuild: args.rebuild,
    };

    let counts = index_jobs(&store, &index, &embedder, opts, None).await?;

    println!(
        "fetched={} indexed={} skipped_too_short={} already_indexed={} elapsed={:?}",
        counts.fetched, counts.indexed, counts.skipped_too_short, counts.already_indexed, counts.elapsed
    );
    Ok(())
}

async fn run_search(args: SearchArgs, config: &ConfigManager) -> Result<(), MatcherError> {
    let settings = config.settings();
    let resume_text = std::fs::read_to_string(&args.resume_path).map_err(|e| {
        MatcherError::invalid_input(
            "resume",
            format!("failed to read résumé file {}: {e}", args.resume_path.display()),
        )
    })?;

    let store = FileJobStore::open(&settings.metadata_db_path)
        .map_err(|e| MatcherError::configuration_with_source("failed to open job store", e))?;

    let embedder = EmbeddingManager::new(&settings.embedding_model_name);
    let embedding_config = embedder
        .config()
        .await
        .map_err(|e| MatcherError::configuration_with_source("failed to load embedding model", e))?;

    let index = VectorIndex::open(
        &settings.vector_persist_dir,
        &settings.vector_collection_base,
        &embedding_config.version_id,
        embedding_config.dim,
    )
    .await
    .map_err(|e| MatcherError::configuration_with_source("failed to open vector index", e))?;

    let options = SearchOptions {
        top_k: args.top_k,
        min_score: args.min_score,
        recency_days: args.recency_days,
        preferred_location: args.preferred_location,
        min_salary: args.min_salary,
        sources: args.sources,
    };

    let (results, diagnostics) = search(
        &resume_text,
        options,
        &store,
        &index,
        &embedder,
        ScoringWeights::default(),
        None,
    )
    .await?;

    let json = serde_json::to_string_pretty(&results)
        .map_err(|e| MatcherError::configuration_with_source("failed to serialize results", anyhow::anyhow!(e)))?;
    println!("{json}");
    if args.verbose {
        info!(
            "returned {} results (candidates_fetched={} filtered_out={} embed={:?} ann_query={:?} scoring={:?} total={:?})",
            results.len(),
            diagnostics.candidates_fetched,
            diagnostics.filtered_out,
            diagnostics.embed_resume_time,
            diagnostics.ann_query_time,
            diagnostics.scoring_time,
            diagnostics.total_time,
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let Some((subcommand, rest)) = raw_args.split_first() else {
        print_usage();
        return ExitCode::from(EXIT_INVALID_ARGS);
    };

    let mut config_manager = match ConfigManager::new() {
        Ok(cm) => cm,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    config_manager.apply_env_overrides();
    for warning in config_manager.validate() {
        log::warn!("configuration warning: {warning}");
    }

    let result = match subcommand.as_str() {
        "index" => match parse_index_args(rest) {
            Ok(args) => run_index(args, &config_manager).await,
            Err(msg) => {
                eprintln!("invalid arguments: {msg}");
                print_usage();
                return ExitCode::from(EXIT_INVALID_ARGS);
            }
        },
        "search" => match parse_search_args(rest) {
            Ok(args) => run_search(args, &config_manager).await,
            Err(msg) => {
                eprintln!("invalid arguments: {msg}");
                print_usage();
                return ExitCode::from(EXIT_INVALID_ARGS);
            }
        },
        "-h" | "--help" => {
            print_usage();
            return ExitCode::from(EXIT_SUCCESS);
        }
        other => {
            eprintln!("unknown subcommand: {other}");
            print_usage();
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            e.log("job-matcher");
            match e {
                MatcherError::InvalidInput { .. } => ExitCode::from(EXIT_INVALID_ARGS),
                _ => ExitCode::from(EXIT_FATAL),
            }
        }
    }
}
