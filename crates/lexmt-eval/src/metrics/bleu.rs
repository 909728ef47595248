//! BLEU: sentence-level (smoothed) and corpus-level (aggregated statistics).
//!
//! Corpus BLEU is defined on summed n-gram statistics, not on averaged
//! per-sentence scores; both entry points share the same counting core.
//! Unsegmented target languages (zh, ja) are scored at character level.

use std::collections::HashMap;

use lexmt_types::Lang;

const MAX_ORDER: usize = 4;

/// Tokenize for n-gram metrics: characters for unsegmented scripts,
/// lowercased alphanumeric words otherwise.
pub fn metric_tokens(text: &str, lang: Lang) -> Vec<String> {
    if lang.is_unsegmented() {
        text.chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_string())
            .collect()
    } else {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect()
    }
}

/// Clipped n-gram match statistics for one (prediction, reference) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BleuStats {
    /// Clipped matches per order (1..=4).
    pub matches: [u64; MAX_ORDER],
    /// Candidate n-gram totals per order.
    pub totals: [u64; MAX_ORDER],
    /// Candidate length.
    pub pred_len: u64,
    /// Reference length.
    pub ref_len: u64,
}

impl BleuStats {
    /// Accumulate another sentence's statistics.
    pub fn add(&mut self, other: &BleuStats) {
        for i in 0..MAX_ORDER {
            self.matches[i] += other.matches[i];
            self.totals[i] += other.totals[i];
        }
        self.pred_len += other.pred_len;
        self.ref_len += other.ref_len;
    }
}

fn ngram_counts(tokens: &[String], order: usize) -> HashMap<&[String], u64> {
    let mut counts: HashMap<&[String], u64> = HashMap::new();
    if tokens.len() >= order {
        for gram in tokens.windows(order) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

/// Count clipped matches for one sentence pair.
pub fn sentence_stats(prediction: &str, reference: &str, lang: Lang) -> BleuStats {
    let pred = metric_tokens(prediction, lang);
    let reference = metric_tokens(reference, lang);

    let mut stats = BleuStats {
        pred_len: pred.len() as u64,
        ref_len: reference.len() as u64,
        ..BleuStats::default()
    };

    for order in 1..=MAX_ORDER {
        let pred_grams = ngram_counts(&pred, order);
        let ref_grams = ngram_counts(&reference, order);
        for (gram, count) in &pred_grams {
            stats.totals[order - 1] += count;
            if let Some(ref_count) = ref_grams.get(gram) {
                stats.matches[order - 1] += (*count).min(*ref_count);
            }
        }
    }
    stats
}

/// BLEU score in [0, 1] from accumulated statistics.
///
/// `smooth` applies add-one smoothing to zero match counts for orders > 1,
/// which is the conventional sentence-level behavior; corpus scoring
/// leaves counts unsmoothed.
pub fn score_from_stats(stats: &BleuStats, smooth: bool) -> f64 {
    if stats.pred_len == 0 || stats.totals[0] == 0 {
        return 0.0;
    }

    let mut log_precision_sum = 0.0;
    for order in 0..MAX_ORDER {
        let (mut matches, mut total) = (stats.matches[order] as f64, stats.totals[order] as f64);
        if total == 0.0 {
            // Sentence shorter than the order; skip like sacrebleu's
            // effective order handling by treating it as a perfect 1/1.
            if smooth {
                matches = 1.0;
                total = 1.0;
            } else {
                return 0.0;
            }
        } else if matches == 0.0 {
            if !smooth {
                return 0.0;
            }
            matches = 1.0;
            total += 1.0;
        }
        log_precision_sum += (matches / total).ln();
    }

    let brevity_penalty = if stats.pred_len >= stats.ref_len {
        1.0
    } else {
        (1.0 - stats.ref_len as f64 / stats.pred_len as f64).exp()
    };

    brevity_penalty * (log_precision_sum / MAX_ORDER as f64).exp()
}

/// Smoothed sentence BLEU in [0, 1].
pub fn sentence_bleu(prediction: &str, reference: &str, lang: Lang) -> f64 {
    score_from_stats(&sentence_stats(prediction, reference, lang), true)
}

/// Corpus BLEU in [0, 1] over aligned (prediction, reference) pairs.
pub fn corpus_bleu<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    lang: Lang,
) -> f64 {
    let mut total = BleuStats::default();
    for (prediction, reference) in pairs {
        total.add(&sentence_stats(prediction, reference, lang));
    }
    score_from_stats(&total, false)
}
