//! chrF++: character n-gram F-score with word n-grams mixed in.
//!
//! Character n-grams run up to order 6 (whitespace removed), word n-grams
//! up to order 2, and every order contributes one F_β (β = 2, recall
//! weighted) to the macro-average. The corpus variant aggregates match
//! counts per order across sentences before computing the F-scores.

use std::collections::HashMap;

use lexmt_types::Lang;

use super::bleu::metric_tokens;

const CHAR_ORDERS: usize = 6;
const WORD_ORDERS: usize = 2;
const ORDERS: usize = CHAR_ORDERS + WORD_ORDERS;
const BETA_SQ: f64 = 4.0;

/// Per-order match/total counts for one or more sentence pairs.
#[derive(Debug, Clone, Default)]
pub struct ChrfStats {
    matches: [u64; ORDERS],
    pred_totals: [u64; ORDERS],
    ref_totals: [u64; ORDERS],
}

impl ChrfStats {
    /// Accumulate another sentence's statistics.
    pub fn add(&mut self, other: &ChrfStats) {
        for i in 0..ORDERS {
            self.matches[i] += other.matches[i];
            self.pred_totals[i] += other.pred_totals[i];
            self.ref_totals[i] += other.ref_totals[i];
        }
    }
}

fn char_grams(text: &str, order: usize) -> HashMap<String, u64> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut counts = HashMap::new();
    if chars.len() >= order {
        for gram in chars.windows(order) {
            *counts.entry(gram.iter().collect::<String>()).or_insert(0) += 1;
        }
    }
    counts
}

fn word_grams(tokens: &[String], order: usize) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    if tokens.len() >= order {
        for gram in tokens.windows(order) {
            *counts.entry(gram.join(" ")).or_insert(0) += 1;
        }
    }
    counts
}

fn overlap(pred: &HashMap<String, u64>, reference: &HashMap<String, u64>) -> (u64, u64, u64) {
    let matches = pred
        .iter()
        .map(|(gram, count)| reference.get(gram).map_or(0, |r| (*count).min(*r)))
        .sum();
    (matches, pred.values().sum(), reference.values().sum())
}

/// Count n-gram statistics for one sentence pair.
pub fn sentence_stats(prediction: &str, reference: &str, lang: Lang) -> ChrfStats {
    let mut stats = ChrfStats::default();

    for order in 1..=CHAR_ORDERS {
        let (m, p, r) = overlap(&char_grams(prediction, order), &char_grams(reference, order));
        stats.matches[order - 1] = m;
        stats.pred_totals[order - 1] = p;
        stats.ref_totals[order - 1] = r;
    }

    let pred_words = metric_tokens(prediction, lang);
    let ref_words = metric_tokens(reference, lang);
    for order in 1..=WORD_ORDERS {
        let (m, p, r) = overlap(&word_grams(&pred_words, order), &word_grams(&ref_words, order));
        stats.matches[CHAR_ORDERS + order - 1] = m;
        stats.pred_totals[CHAR_ORDERS + order - 1] = p;
        stats.ref_totals[CHAR_ORDERS + order - 1] = r;
    }
    stats
}

/// chrF++ in [0, 1] from accumulated statistics.
pub fn score_from_stats(stats: &ChrfStats) -> f64 {
    let mut f_sum = 0.0;
    let mut active_orders = 0;

    for i in 0..ORDERS {
        if stats.pred_totals[i] == 0 && stats.ref_totals[i] == 0 {
            continue;
        }
        active_orders += 1;
        if stats.pred_totals[i] == 0 || stats.ref_totals[i] == 0 {
            continue; // F is zero for this order
        }
        let precision = stats.matches[i] as f64 / stats.pred_totals[i] as f64;
        let recall = stats.matches[i] as f64 / stats.ref_totals[i] as f64;
        if precision + recall > 0.0 {
            f_sum += (1.0 + BETA_SQ) * precision * recall / (BETA_SQ * precision + recall);
        }
    }

    if active_orders == 0 {
        0.0
    } else {
        f_sum / active_orders as f64
    }
}

/// Sentence chrF++ in [0, 1].
pub fn sentence_chrf(prediction: &str, reference: &str, lang: Lang) -> f64 {
    score_from_stats(&sentence_stats(prediction, reference, lang))
}

/// Corpus chrF++ in [0, 1]: counts aggregate before the F-scores.
pub fn corpus_chrf<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    lang: Lang,
) -> f64 {
    let mut total = ChrfStats::default();
    for (prediction, reference) in pairs {
        total.add(&sentence_stats(prediction, reference, lang));
    }
    score_from_stats(&total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sentences_score_one() {
        let score = sentence_chrf(
            "Workers shall have the right to equal employment.",
            "Workers shall have the right to equal employment.",
            Lang::En,
        );
        assert!((score - 1.0).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn disjoint_sentences_score_near_zero() {
        let score = sentence_chrf("xyzzy qwfp", "mmmm nnnn", Lang::En);
        assert!(score < 0.05, "got {score}");
    }

    #[test]
    fn near_miss_scores_high_but_below_one() {
        let score = sentence_chrf(
            "Workers shall have the right to equal employment",
            "Workers shall have the right to equal employment.",
            Lang::En,
        );
        assert!(score > 0.8 && score < 1.0, "got {score}");
    }

    #[test]
    fn recall_weighted_favors_coverage() {
        // Missing content (low recall) hurts more than extra content
        // (low precision) at beta = 2.
        let reference = "the employer shall pay wages on time";
        let truncated = sentence_chrf("the employer shall", reference, Lang::En);
        let padded = sentence_chrf(
            "the employer shall pay wages on time without any delay whatsoever",
            reference,
            Lang::En,
        );
        assert!(padded > truncated);
    }

    #[test]
    fn chinese_prediction_scores_at_character_level() {
        let score = sentence_chrf("劳动者享有权利", "劳动者享有平等就业的权利", Lang::Zh);
        assert!(score > 0.2 && score < 1.0, "got {score}");
    }

    #[test]
    fn empty_prediction_scores_zero() {
        assert_eq!(sentence_chrf("", "reference", Lang::En), 0.0);
    }

    #[test]
    fn both_empty_scores_zero() {
        assert_eq!(sentence_chrf("", "", Lang::En), 0.0);
    }

    #[test]
    fn corpus_aggregates_counts() {
        let pairs = [
            ("workers shall have rights", "workers shall have rights"),
            ("completely different text", "unrelated reference words"),
        ];
        let corpus = corpus_chrf(pairs, Lang::En);
        assert!(corpus > 0.0 && corpus < 1.0);
    }
}
