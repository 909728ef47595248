//! Metric computation: native n-gram metrics, domain heuristics, remote
//! neural scorers, and LLM-judge metrics.
//!
//! Every metric is a total function from (source, prediction, reference,
//! pair) to a scalar; NaN is the reserved "not computable" value (missing
//! reference, unsupported pair, judge failure). Linear metrics aggregate
//! as sample-wise means; corpus BLEU and corpus chrF aggregate n-gram
//! statistics instead and are reported under separate `*_corpus` keys.

pub mod bleu;
pub mod chrf;
pub mod domain;
pub mod gemba;
pub mod remote;

use std::collections::{BTreeMap, BTreeSet};

use lexmt_llm::ChatClient;
use lexmt_types::config::Metric;
use lexmt_types::{LangPair, SegmentResult, TermTable};

pub use remote::RemoteScorer;

/// Stable artifact key for a metric.
pub fn metric_name(metric: Metric) -> &'static str {
    match metric {
        Metric::Bleu => "bleu",
        Metric::Chrf => "chrf",
        Metric::Bertscore => "bertscore",
        Metric::Comet => "comet",
        Metric::GembaDa => "gemba-da",
        Metric::GembaMqm => "gemba-mqm",
        Metric::TermbaseAccuracy => "termbase_accuracy",
        Metric::Deontic => "deontic",
        Metric::Conditional => "conditional",
    }
}

/// Everything known about one sample at scoring time.
pub struct SampleInputs<'a> {
    /// Source text.
    pub source: &'a str,
    /// The system's prediction.
    pub prediction: &'a str,
    /// Reference translation, when the dataset has one.
    pub reference: Option<&'a str>,
    /// Language pair.
    pub pair: LangPair,
    /// The terminology layer's table, when a trace carries one.
    pub term_table: Option<&'a TermTable>,
}

/// Computes the configured metric subset for samples and systems.
///
/// The chat client powers the GEMBA judges; the remote scorer powers
/// BERTScore and COMET. Either may be absent, in which case the dependent
/// metrics report NaN.
pub struct MetricEngine {
    client: Option<ChatClient>,
    scorer: Option<RemoteScorer>,
}

impl MetricEngine {
    /// Create an engine over the available scoring backends.
    pub fn new(client: Option<ChatClient>, scorer: Option<RemoteScorer>) -> Self {
        Self { client, scorer }
    }

    /// Score one sample with every selected metric.
    pub async fn score_sample(
        &self,
        metrics: &BTreeSet<Metric>,
        input: &SampleInputs<'_>,
    ) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();

        for &metric in metrics {
            let score = match metric {
                Metric::Bleu => match input.reference {
                    Some(reference) => {
                        bleu::sentence_bleu(input.prediction, reference, input.pair.tgt)
                    }
                    None => f64::NAN,
                },
                Metric::Chrf => match input.reference {
                    Some(reference) => {
                        chrf::sentence_chrf(input.prediction, reference, input.pair.tgt)
                    }
                    None => f64::NAN,
                },
                Metric::Bertscore | Metric::Comet => match &self.scorer {
                    Some(scorer) => {
                        scorer
                            .score(
                                metric_name(metric),
                                input.source,
                                input.prediction,
                                input.reference,
                            )
                            .await
                    }
                    None => f64::NAN,
                },
                Metric::GembaDa => match &self.client {
                    Some(client) => {
                        gemba::gemba_da(client, input.source, input.prediction, input.pair).await
                    }
                    None => f64::NAN,
                },
                Metric::GembaMqm => match &self.client {
                    Some(client) => {
                        gemba::gemba_mqm(client, input.source, input.prediction, input.pair).await
                    }
                    None => f64::NAN,
                },
                Metric::TermbaseAccuracy => {
                    domain::terminology_accuracy(input.prediction, input.term_table)
                }
                Metric::Deontic => {
                    domain::deontic_preservation(input.source, input.prediction, input.pair)
                }
                Metric::Conditional => {
                    domain::conditional_logic(input.source, input.prediction, input.pair)
                }
            };
            scores.insert(metric_name(metric).to_string(), score);
        }
        scores
    }

    /// System-level aggregates over scored results: the NaN-skipping mean
    /// of every per-sample metric, plus corpus BLEU / corpus chrF computed
    /// on aggregated statistics over successful samples with references.
    pub fn aggregate(
        metrics: &BTreeSet<Metric>,
        results: &[SegmentResult],
        pair: LangPair,
    ) -> BTreeMap<String, f64> {
        let mut aggregate = BTreeMap::new();

        for &metric in metrics {
            let name = metric_name(metric);
            let values: Vec<f64> = results
                .iter()
                .filter_map(|r| r.metrics.get(name))
                .copied()
                .filter(|v| !v.is_nan())
                .collect();
            let mean = if values.is_empty() {
                f64::NAN
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            aggregate.insert(name.to_string(), mean);
        }

        let scored_pairs: Vec<(&str, &str)> = results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| {
                r.reference
                    .as_deref()
                    .map(|reference| (r.prediction.as_str(), reference))
            })
            .collect();

        if !scored_pairs.is_empty() {
            if metrics.contains(&Metric::Bleu) {
                aggregate.insert(
                    "bleu_corpus".to_string(),
                    bleu::corpus_bleu(scored_pairs.iter().copied(), pair.tgt),
                );
            }
            if metrics.contains(&Metric::Chrf) {
                aggregate.insert(
                    "chrf_corpus".to_string(),
                    chrf::corpus_chrf(scored_pairs.iter().copied(), pair.tgt),
                );
            }
        }

        aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexmt_types::SegmentStatus;

    fn inputs<'a>(prediction: &'a str, reference: Option<&'a str>) -> SampleInputs<'a> {
        SampleInputs {
            source: "劳动者享有平等就业的权利。",
            prediction,
            reference,
            pair: LangPair::zh_en(),
            term_table: None,
        }
    }

    fn selected(metrics: &[Metric]) -> BTreeSet<Metric> {
        metrics.iter().copied().collect()
    }

    #[tokio::test]
    async fn native_metrics_computed_without_backends() {
        let engine = MetricEngine::new(None, None);
        let scores = engine
            .score_sample(
                &selected(&[Metric::Bleu, Metric::Chrf]),
                &inputs(
                    "Workers shall have the right to equal employment.",
                    Some("Workers shall have the right to equal employment."),
                ),
            )
            .await;
        assert!((scores["bleu"] - 1.0).abs() < 1e-9);
        assert!((scores["chrf"] - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_reference_yields_nan() {
        let engine = MetricEngine::new(None, None);
        let scores = engine
            .score_sample(&selected(&[Metric::Bleu]), &inputs("prediction", None))
            .await;
        assert!(scores["bleu"].is_nan());
    }

    #[tokio::test]
    async fn backend_dependent_metrics_nan_without_backends() {
        let engine = MetricEngine::new(None, None);
        let scores = engine
            .score_sample(
                &selected(&[Metric::Comet, Metric::GembaDa]),
                &inputs("prediction", Some("reference")),
            )
            .await;
        assert!(scores["comet"].is_nan());
        assert!(scores["gemba-da"].is_nan());
    }

    #[test]
    fn aggregate_means_skip_nan() {
        let mut a = SegmentResult::cancelled("a", "src");
        a.status = SegmentStatus::Ok;
        a.success = true;
        a.metrics.insert("bleu".into(), 0.4);
        let mut b = SegmentResult::cancelled("b", "src");
        b.status = SegmentStatus::Ok;
        b.success = true;
        b.metrics.insert("bleu".into(), f64::NAN);
        let mut c = SegmentResult::cancelled("c", "src");
        c.status = SegmentStatus::Ok;
        c.success = true;
        c.metrics.insert("bleu".into(), 0.8);

        let aggregate = MetricEngine::aggregate(
            &selected(&[Metric::Bleu]),
            &[a, b, c],
            LangPair::zh_en(),
        );
        assert!((aggregate["bleu"] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn aggregate_includes_corpus_scores_with_references() {
        let mut a = SegmentResult::cancelled("a", "src");
        a.status = SegmentStatus::Ok;
        a.success = true;
        a.prediction = "workers shall have rights".into();
        a.reference = Some("workers shall have rights".into());

        let aggregate = MetricEngine::aggregate(
            &selected(&[Metric::Bleu, Metric::Chrf]),
            &[a],
            LangPair::zh_en(),
        );
        assert!((aggregate["bleu_corpus"] - 1.0).abs() < 1e-9);
        assert!((aggregate["chrf_corpus"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn metric_names_match_config_tags() {
        assert_eq!(metric_name(Metric::GembaDa), "gemba-da");
        assert_eq!(metric_name(Metric::TermbaseAccuracy), "termbase_accuracy");
    }
}
