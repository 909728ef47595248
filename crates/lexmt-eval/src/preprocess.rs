//! Offline term preprocessing: extract → deduplicate → lookup →
//! batch-translate → ingest.
//!
//! Running this over a training corpus amortizes per-segment term
//! translation cost across the whole test set: at pipeline time the
//! terminology layer finds most terms already in the termbase.
//!
//! Failure semantics: a segment whose extraction fails is logged and
//! skipped; a batch whose translation fails is retried once and then its
//! terms are recorded as failed in the report, without raising.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use lexmt_llm::{CallOptions, ChatClient};
use lexmt_pipeline::{prompts, roster, run_agent};
use lexmt_retrieval::{Termbase, normalize_form};
use lexmt_types::term::MAX_CONTEXTS;
use lexmt_types::{LangPair, Result, Segment, TermEntry};

/// Outcome counters for one preprocessing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreprocessReport {
    /// Segments scanned.
    pub total_segments: usize,
    /// Distinct terms after deduplication.
    pub unique_terms: usize,
    /// Terms already covered by the termbase (exact or fuzzy).
    pub db_hits: usize,
    /// Terms newly translated and ingested.
    pub new_translations: usize,
    /// Terms whose batch translation failed after the retry.
    pub translation_failed: usize,
    /// Entries whose ingest reported an error.
    pub ingest_errors: usize,
}

#[derive(Debug, Deserialize)]
struct ExtractReply {
    #[serde(default)]
    terms: Vec<ExtractedTerm>,
}

#[derive(Debug, Deserialize)]
struct ExtractedTerm {
    term: String,
    #[serde(default = "default_importance")]
    importance: f32,
}

fn default_importance() -> f32 {
    0.5
}

/// One deduplicated term awaiting lookup or translation.
#[derive(Debug, Clone)]
struct MergedTerm {
    surface: String,
    pair: LangPair,
    count: u32,
    confidence: f32,
    contexts: Vec<String>,
}

/// Drives the five preprocessing stages over a dataset.
pub struct Preprocessor {
    client: ChatClient,
    termbase: Arc<Termbase>,
    max_concurrent: usize,
    batch_size: usize,
    batch_concurrent: usize,
}

impl Preprocessor {
    /// Create a preprocessor over the shared client and termbase.
    pub fn new(
        client: ChatClient,
        termbase: Arc<Termbase>,
        config: &lexmt_types::RunConfig,
    ) -> Self {
        Self {
            client,
            termbase,
            max_concurrent: config.max_concurrent.max(1),
            batch_size: config.preprocess.batch_size.max(1),
            batch_concurrent: config.preprocess.max_concurrent.max(1),
        }
    }

    /// Run all stages and return the report.
    pub async fn run(&self, dataset: &[Segment]) -> Result<PreprocessReport> {
        let mut report = PreprocessReport {
            total_segments: dataset.len(),
            ..PreprocessReport::default()
        };

        // Stage 1: extract terms from every segment under the shared cap.
        let extracted = self.extract_all(dataset).await;

        // Stage 2: deduplicate by normalized source form.
        let merged = merge_terms(extracted);
        report.unique_terms = merged.len();
        debug!(unique_terms = merged.len(), "deduplicated extracted terms");

        // Stage 3: split into database hits and terms needing translation.
        let mut to_ingest: Vec<TermEntry> = Vec::new();
        let mut flagged: Vec<MergedTerm> = Vec::new();
        for term in merged {
            let hits = self
                .termbase
                .lookup_lexical(&term.surface, term.pair, 1)
                .await;
            match hits.into_iter().next() {
                Some(hit) => {
                    report.db_hits += 1;
                    // Re-ingesting the known mapping aggregates counts and
                    // contexts without creating a new entry.
                    to_ingest.push(entry_for(&term, hit.entry.target_form));
                }
                None => flagged.push(term),
            }
        }

        // Stage 4: batch-translate the flagged terms.
        let (translated, failed) = self.translate_batches(&flagged).await;
        report.translation_failed = failed;
        for (term, target) in translated {
            report.new_translations += 1;
            to_ingest.push(entry_for(&term, target));
        }

        // Stage 5: ingest.
        match self.termbase.ingest(to_ingest).await {
            Ok(summary) => report.ingest_errors += summary.vector_errors,
            Err(e) => {
                warn!(error = %e, "termbase ingest failed");
                report.ingest_errors += 1;
            }
        }

        info!(
            total_segments = report.total_segments,
            unique_terms = report.unique_terms,
            db_hits = report.db_hits,
            new_translations = report.new_translations,
            translation_failed = report.translation_failed,
            ingest_errors = report.ingest_errors,
            "preprocessing complete"
        );
        Ok(report)
    }

    /// Stage 1: MonoExtract over all segments, bounded concurrency.
    /// Per-segment failure logs and contributes nothing.
    async fn extract_all(&self, dataset: &[Segment]) -> Vec<(String, f32, String, LangPair)> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<Vec<(String, f32, String, LangPair)>> = JoinSet::new();

        for segment in dataset {
            if segment.validate().is_err() {
                warn!(segment = %segment.id, "skipping segment with empty source");
                continue;
            }
            let client = self.client.clone();
            let segment = segment.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                match run_agent::<ExtractReply>(
                    &client,
                    &roster::MONO_EXTRACT,
                    prompts::mono_extract(&segment),
                    CallOptions::default(),
                )
                .await
                {
                    Ok(reply) => reply
                        .terms
                        .into_iter()
                        .filter(|t| !t.term.trim().is_empty())
                        .map(|t| {
                            (
                                t.term.trim().to_string(),
                                t.importance.clamp(0.0, 1.0),
                                segment.source.clone(),
                                segment.pair,
                            )
                        })
                        .collect(),
                    Err(e) => {
                        warn!(segment = %segment.id, error = %e, "term extraction failed");
                        Vec::new()
                    }
                }
            });
        }

        let mut all = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(mut terms) => all.append(&mut terms),
                Err(e) => warn!(error = %e, "extraction task panicked"),
            }
        }
        all
    }

    /// Stage 4: batches of up to `batch_size` terms, one JSON-map call per
    /// batch, concurrent under the lower preprocessing cap. Each failed
    /// batch is retried once; persistent failure marks its terms failed.
    async fn translate_batches(
        &self,
        flagged: &[MergedTerm],
    ) -> (Vec<(MergedTerm, String)>, usize) {
        let semaphore = Arc::new(Semaphore::new(self.batch_concurrent));
        let mut tasks: JoinSet<(Vec<MergedTerm>, Option<BTreeMap<String, String>>)> =
            JoinSet::new();

        for batch in flagged.chunks(self.batch_size) {
            let batch: Vec<MergedTerm> = batch.to_vec();
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let pair = batch[0].pair;
                let request: Vec<(String, Vec<String>)> = batch
                    .iter()
                    .map(|t| (t.surface.clone(), t.contexts.clone()))
                    .collect();
                let prompt = prompts::batch_term_translate(&request, pair);

                let mut outcome = run_agent::<BTreeMap<String, String>>(
                    &client,
                    &roster::BATCH_TERM_TRANSLATE,
                    prompt.clone(),
                    CallOptions::default(),
                )
                .await;
                if let Err(first) = &outcome {
                    warn!(error = %first, terms = batch.len(), "batch translation failed, retrying once");
                    outcome = run_agent(
                        &client,
                        &roster::BATCH_TERM_TRANSLATE,
                        prompt,
                        CallOptions::default(),
                    )
                    .await;
                }
                (batch, outcome.ok())
            });
        }

        let mut translated = Vec::new();
        let mut failed = 0usize;
        while let Some(result) = tasks.join_next().await {
            let Ok((batch, outcome)) = result else {
                warn!("batch translation task panicked");
                continue;
            };
            match outcome {
                Some(map) => {
                    for term in batch {
                        match map.get(&term.surface) {
                            Some(target) if !target.trim().is_empty() => {
                                translated.push((term, target.trim().to_string()));
                            }
                            _ => {
                                warn!(term = %term.surface, "batch reply missing term");
                                failed += 1;
                            }
                        }
                    }
                }
                None => failed += batch.len(),
            }
        }
        (translated, failed)
    }
}

/// Stage 2: merge by normalized source form. Counts sum, confidence is the
/// max, and the two longest contexts survive.
fn merge_terms(extracted: Vec<(String, f32, String, LangPair)>) -> Vec<MergedTerm> {
    let mut merged: BTreeMap<(LangPair, String), MergedTerm> = BTreeMap::new();

    for (surface, importance, context, pair) in extracted {
        let key = (pair, normalize_form(&surface));
        if key.1.is_empty() {
            continue;
        }
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.count += 1;
                existing.confidence = existing.confidence.max(importance);
                if !existing.contexts.contains(&context) {
                    existing.contexts.push(context);
                }
            }
            None => {
                merged.insert(
                    key,
                    MergedTerm {
                        surface,
                        pair,
                        count: 1,
                        confidence: importance,
                        contexts: vec![context],
                    },
                );
            }
        }
    }

    let mut terms: Vec<MergedTerm> = merged.into_values().collect();
    for term in &mut terms {
        // Longest contexts are the most informative for disambiguation.
        term.contexts.sort_by_key(|c| std::cmp::Reverse(c.chars().count()));
        term.contexts.truncate(MAX_CONTEXTS);
    }
    terms
}

fn entry_for(term: &MergedTerm, target: String) -> TermEntry {
    let mut entry = TermEntry::new(term.surface.clone(), target, term.pair)
        .with_confidence(term.confidence)
        .with_contexts(term.contexts.clone());
    entry.occurrences = term.count;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexmt_llm::HashEmbedder;
    use lexmt_llm::provider::Provider;
    use lexmt_llm::types::{ChatRequest, ChatResponse, Choice};
    use lexmt_llm::{ChatMessage, ProviderError};
    use lexmt_types::RunConfig;
    use lexmt_types::config::{ProviderSettings, TermbaseSettings};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct QueueProvider {
        replies: Mutex<VecDeque<String>>,
    }

    #[async_trait::async_trait]
    impl Provider for QueueProvider {
        fn name(&self) -> &str {
            "queue"
        }
        async fn complete(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            let reply = self
                .replies
                .lock()
                .expect("lock")
                .pop_front()
                .ok_or_else(|| ProviderError::RequestFailed("script exhausted".into()))?;
            Ok(ChatResponse {
                id: "r".into(),
                choices: vec![Choice {
                    index: 0,
                    message: ChatMessage::assistant(reply),
                    finish_reason: None,
                }],
                usage: None,
                model: "m".into(),
            })
        }
    }

    fn client(replies: &[&str]) -> ChatClient {
        ChatClient::new(
            Arc::new(QueueProvider {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            }),
            &ProviderSettings::default(),
            8,
        )
    }

    fn sequential_config() -> RunConfig {
        // Single-flight keeps scripted replies paired with segments.
        let mut config = RunConfig::default();
        config.max_concurrent = 1;
        config.preprocess.max_concurrent = 1;
        config
    }

    fn termbase() -> Arc<Termbase> {
        Arc::new(Termbase::new(
            TermbaseSettings::default(),
            Arc::new(HashEmbedder::new(64)),
        ))
    }

    fn dataset() -> Vec<Segment> {
        vec![
            Segment::new("s1", "劳动者享有平等就业的权利。", LangPair::zh_en()),
            Segment::new("s2", "劳动者依法参加工会。", LangPair::zh_en()),
        ]
    }

    #[tokio::test]
    async fn extracts_merges_translates_and_ingests() {
        let tb = termbase();
        let pre = Preprocessor::new(
            client(&[
                // Extraction: the same term twice plus one singleton.
                r#"{"terms": [{"term": "劳动者", "importance": 0.9}]}"#,
                r#"{"terms": [{"term": "劳动者", "importance": 0.7}, {"term": "工会", "importance": 0.8}]}"#,
                // One batch translation call for both flagged terms.
                r#"{"劳动者": "workers", "工会": "trade union"}"#,
            ]),
            tb.clone(),
            &sequential_config(),
        );

        let report = pre.run(&dataset()).await.unwrap();
        assert_eq!(report.total_segments, 2);
        assert_eq!(report.unique_terms, 2);
        assert_eq!(report.db_hits, 0);
        assert_eq!(report.new_translations, 2);
        assert_eq!(report.translation_failed, 0);

        assert_eq!(tb.size(LangPair::zh_en()).await, 2);
        let exported = tb.export(LangPair::zh_en()).await;
        let worker = exported
            .iter()
            .find(|e| e.source_form == "劳动者")
            .unwrap();
        // Counts summed across both segments, max importance kept.
        assert_eq!(worker.occurrences, 2);
        assert!((worker.confidence - 0.9).abs() < 1e-6);
        assert_eq!(worker.contexts.len(), 2);
    }

    #[tokio::test]
    async fn second_run_adds_no_entries_and_doubles_counts() {
        let tb = termbase();
        let extraction = [
            r#"{"terms": [{"term": "劳动者", "importance": 0.9}]}"#,
            r#"{"terms": [{"term": "劳动者", "importance": 0.7}, {"term": "工会", "importance": 0.8}]}"#,
        ];

        let first = Preprocessor::new(
            client(&[
                extraction[0],
                extraction[1],
                r#"{"劳动者": "workers", "工会": "trade union"}"#,
            ]),
            tb.clone(),
            &sequential_config(),
        );
        first.run(&dataset()).await.unwrap();
        let size_after_first = tb.size(LangPair::zh_en()).await;

        // Second run: both terms now hit the database; no batch call.
        let second = Preprocessor::new(
            client(&[extraction[0], extraction[1]]),
            tb.clone(),
            &sequential_config(),
        );
        let report = second.run(&dataset()).await.unwrap();

        assert_eq!(report.db_hits, 2);
        assert_eq!(report.new_translations, 0);
        assert_eq!(tb.size(LangPair::zh_en()).await, size_after_first);

        let worker = tb
            .export(LangPair::zh_en())
            .await
            .into_iter()
            .find(|e| e.source_form == "劳动者")
            .unwrap();
        assert_eq!(worker.occurrences, 4, "counts aggregate across runs");
    }

    #[tokio::test]
    async fn failed_extraction_skips_segment_and_continues() {
        let tb = termbase();
        let pre = Preprocessor::new(
            client(&[
                "garbage",
                "still garbage", // repair retry for segment 1
                r#"{"terms": [{"term": "工会", "importance": 0.8}]}"#,
                r#"{"工会": "trade union"}"#,
            ]),
            tb.clone(),
            &sequential_config(),
        );

        let report = pre.run(&dataset()).await.unwrap();
        assert_eq!(report.unique_terms, 1);
        assert_eq!(report.new_translations, 1);
    }

    #[tokio::test]
    async fn failed_batch_is_retried_then_recorded() {
        let tb = termbase();
        let pre = Preprocessor::new(
            client(&[
                r#"{"terms": [{"term": "劳动者", "importance": 0.9}]}"#,
                r#"{"terms": []}"#,
                // Batch call fails four times: initial + repair, retry + repair.
                "bad", "bad", "bad", "bad",
            ]),
            tb.clone(),
            &sequential_config(),
        );

        let report = pre.run(&dataset()).await.unwrap();
        assert_eq!(report.translation_failed, 1);
        assert_eq!(report.new_translations, 0);
        assert_eq!(tb.size(LangPair::zh_en()).await, 0);
    }

    #[tokio::test]
    async fn terms_missing_from_batch_reply_counted_failed() {
        let tb = termbase();
        let pre = Preprocessor::new(
            client(&[
                r#"{"terms": [{"term": "劳动者", "importance": 0.9}, {"term": "工会", "importance": 0.8}]}"#,
                r#"{"terms": []}"#,
                r#"{"劳动者": "workers"}"#,
            ]),
            tb.clone(),
            &sequential_config(),
        );

        let report = pre.run(&dataset()).await.unwrap();
        assert_eq!(report.new_translations, 1);
        assert_eq!(report.translation_failed, 1);
    }

    #[test]
    fn merge_sums_counts_and_keeps_longest_contexts() {
        let merged = merge_terms(vec![
            ("劳动者".into(), 0.5, "short".into(), LangPair::zh_en()),
            ("劳动者".into(), 0.9, "a much longer context line".into(), LangPair::zh_en()),
            ("劳动者".into(), 0.7, "medium length ctx".into(), LangPair::zh_en()),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].count, 3);
        assert!((merged[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(merged[0].contexts.len(), 2);
        assert_eq!(merged[0].contexts[0], "a much longer context line");
    }

    #[test]
    fn merge_normalizes_surface_variants() {
        let merged = merge_terms(vec![
            ("Labor Contract".into(), 0.5, "c1".into(), LangPair::zh_en()),
            ("labor contract!".into(), 0.6, "c2".into(), LangPair::zh_en()),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].count, 2);
    }
}
