//! lexmt command-line front-end.
//!
//! Thin plumbing only: argument parsing, config/dataset loading, wiring
//! the shared clients and stores together, and exit-code mapping. All
//! pipeline behavior lives in the library crates.
//!
//! Exit codes: 0 success, 2 invalid configuration, 3 upstream unavailable
//! after retries, 4 all samples failed.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{error, info};

use lexmt_eval::{Harness, MetricEngine, Preprocessor, RemoteScorer, write_artifacts};
use lexmt_llm::{
    ApiEmbedder, CachedEmbedder, ChatClient, Embedder, OpenAiCompatProvider, RetryConfig,
    RetryPolicy,
};
use lexmt_pipeline::Orchestrator;
use lexmt_retrieval::{Termbase, TmIndex};
use lexmt_types::{LangPair, PipelineError, RunConfig, Segment, SegmentStatus};

#[derive(Parser)]
#[command(name = "lexmt", version, about = "Hierarchical legal-domain translation pipeline")]
struct Cli {
    /// Path to the run configuration JSON.
    #[arg(long, global = true, default_value = "lexmt.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the configured ablations over a dataset and write artifacts.
    Run {
        /// Dataset JSON file (array of {id, source, pair, reference?}).
        #[arg(long)]
        dataset: PathBuf,

        /// Also synthesize intermediate-layer result documents from the
        /// full config's traces.
        #[arg(long)]
        save_intermediate: bool,
    },
    /// Populate the termbase from a training corpus.
    Preprocess {
        /// Dataset JSON file.
        #[arg(long)]
        dataset: PathBuf,
    },
    /// Import aligned pairs into the translation memory.
    ImportTm {
        /// Corpus JSON file (array of {source, target, pair}).
        #[arg(long)]
        corpus: PathBuf,
    },
}

/// Dataset record with the friendlier `"pair": "zh-en"` spelling.
#[derive(Debug, Deserialize)]
struct DatasetRecord {
    id: String,
    source: String,
    pair: String,
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CorpusRecord {
    source: String,
    target: String,
    pair: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "run failed");
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::ConfigInvalid(_)) => ExitCode::from(2),
        Some(PipelineError::UpstreamUnavailable(_)) => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli.config)?;
    config.validate()?;
    let config = Arc::new(config);

    let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(ApiEmbedder::new(
        config.embedding.clone(),
    )));
    let client = ChatClient::new(
        Arc::new(RetryPolicy::new(
            OpenAiCompatProvider::new(&config.provider),
            RetryConfig::with_max_retries(config.provider.max_retries),
        )),
        &config.provider,
        config.max_concurrent,
    );

    let termbase = Arc::new(match &config.termbase.path {
        Some(path) => {
            Termbase::load(config.termbase.clone(), embedder.clone(), path)
                .await
                .map_err(PipelineError::from)?
        }
        None => Termbase::new(config.termbase.clone(), embedder.clone()),
    });
    let tm = Arc::new(match &config.tm.path {
        Some(path) => TmIndex::load(config.tm.clone(), embedder.clone(), path)
            .await
            .map_err(PipelineError::from)?,
        None => TmIndex::new(config.tm.clone(), embedder.clone()),
    });

    match cli.command {
        Command::Run {
            dataset,
            save_intermediate,
        } => {
            let mut config = (*config).clone();
            config.save_intermediate |= save_intermediate;
            let config = Arc::new(config);

            let dataset = load_dataset(&dataset)?;
            let orchestrator = Arc::new(Orchestrator::new(
                client.clone(),
                Some(termbase),
                Some(tm),
                config.clone(),
            ));
            let engine = Arc::new(MetricEngine::new(
                Some(client),
                config.scorer.as_ref().map(RemoteScorer::new),
            ));
            let harness = Harness::new(orchestrator, config.clone(), engine);

            let (artifact, intermediates) = harness.run(&dataset).await?;
            let written = write_artifacts(&artifact, &intermediates, &config.output_dir)?;
            for path in &written {
                info!(path = %path.display(), "artifact written");
            }

            Ok(run_exit_code(&artifact))
        }
        Command::Preprocess { dataset } => {
            let dataset = load_dataset(&dataset)?;
            let preprocessor = Preprocessor::new(client, termbase.clone(), &config);
            let report = preprocessor.run(&dataset).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if let Some(path) = &config.termbase.path {
                termbase.save(path).await.map_err(PipelineError::from)?;
                info!(path = %path.display(), "termbase saved");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ImportTm { corpus } => {
            let records = load_corpus(&corpus)?;
            let total = records.len();
            for record in records {
                let pair: LangPair = record.pair.parse()?;
                tm.insert(&record.source, &record.target, pair)
                    .await
                    .map_err(PipelineError::from)?;
            }
            info!(total, "TM import complete");

            if let Some(path) = &config.tm.path {
                tm.save(path).await.map_err(PipelineError::from)?;
                info!(path = %path.display(), "translation memory saved");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// All samples failed → 3 when the failures are upstream outages, else 4.
fn run_exit_code(artifact: &lexmt_eval::RunArtifact) -> ExitCode {
    let results: Vec<_> = artifact
        .ablations
        .iter()
        .flat_map(|a| a.results.iter())
        .collect();
    if results.is_empty() || results.iter().any(|r| r.success) {
        return ExitCode::SUCCESS;
    }
    let all_upstream = results
        .iter()
        .filter(|r| r.status == SegmentStatus::Failed)
        .all(|r| r.error_kind.as_deref() == Some("upstream_unavailable"));
    if all_upstream && results.iter().any(|r| r.status == SegmentStatus::Failed) {
        ExitCode::from(3)
    } else {
        ExitCode::from(4)
    }
}

fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return Ok(RunConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: RunConfig = serde_json::from_str(&raw)
        .map_err(|e| PipelineError::ConfigInvalid(format!("{}: {e}", path.display())))?;
    Ok(config)
}

fn load_dataset(path: &Path) -> Result<Vec<Segment>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading dataset {}", path.display()))?;
    let records: Vec<DatasetRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing dataset {}", path.display()))?;

    let mut segments = Vec::with_capacity(records.len());
    for record in records {
        let pair: LangPair = record.pair.parse()?;
        let mut segment = Segment::new(record.id, record.source, pair);
        segment.reference = record.reference;
        segments.push(segment);
    }
    Ok(segments)
}

fn load_corpus(path: &Path) -> Result<Vec<CorpusRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading corpus {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing corpus {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_records_parse_with_string_pairs() {
        let json = r#"[
            {"id": "s1", "source": "劳动者享有权利。", "pair": "zh-en",
             "reference": "Workers have rights."},
            {"id": "s2", "source": "第二条。", "pair": "zh-en"}
        ]"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(&path, json).unwrap();

        let segments = load_dataset(&path).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].pair, LangPair::zh_en());
        assert_eq!(
            segments[0].reference.as_deref(),
            Some("Workers have rights.")
        );
        assert!(segments[1].reference.is_none());
    }

    #[test]
    fn bad_pair_in_dataset_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(&path, r#"[{"id": "s1", "source": "x", "pair": "tlh-en"}]"#).unwrap();
        assert!(load_dataset(&path).is_err());
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/lexmt.json")).unwrap();
        assert_eq!(config.max_concurrent, 10);
    }

    #[test]
    fn malformed_config_is_config_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexmt.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ConfigInvalid(_))
        ));
    }
}
