//! Legal-domain metrics: terminology accuracy, deontic preservation, and
//! conditional-logic preservation.
//!
//! These are heuristic, reference-free checks for the zh→en pair (the
//! corpora this pipeline ships with). Unsupported pairs report NaN, the
//! reserved "not computable" value.

use lexmt_types::{Lang, LangPair, TermTable};

/// Chinese deontic markers and the English modal classes they license.
/// 应当/应 and 必须 carry obligation; 可以 permission; 不得 prohibition.
/// Ordered longest-first so 应当 is consumed before 应 can shadow it.
const DEONTIC_MAP: &[(&str, &[&str])] = &[
    ("必须", &["must"]),
    ("应当", &["shall", "must"]),
    ("不得", &["shall not", "must not", "may not"]),
    ("可以", &["may"]),
    ("应", &["shall", "must", "should"]),
];

/// Chinese conditional frames; English conditional markers.
const CONDITIONAL_SRC: &[&str] = &["如果", "若", "凡是", "凡", "如有", "遇有"];
const CONDITIONAL_TGT: &[&str] = &["if ", "where ", "when ", "in case", "in the event"];

/// Fraction of constrained term-table rows whose best target form appears
/// in the prediction. NaN when the table constrains nothing.
pub fn terminology_accuracy(prediction: &str, table: Option<&TermTable>) -> f64 {
    let Some(table) = table else {
        return f64::NAN;
    };
    let prediction_lower = prediction.to_lowercase();

    let mut constrained = 0usize;
    let mut honored = 0usize;
    for row in table.constrained_rows() {
        let Some(target) = row.targets.first() else {
            continue;
        };
        constrained += 1;
        if prediction_lower.contains(&target.target.to_lowercase()) {
            honored += 1;
        }
    }

    if constrained == 0 {
        f64::NAN
    } else {
        honored as f64 / constrained as f64
    }
}

/// Fraction of source deontic markers whose licensed modal class appears
/// in the prediction. NaN for unsupported pairs or deontic-free sources.
pub fn deontic_preservation(source: &str, prediction: &str, pair: LangPair) -> f64 {
    if pair.src != Lang::Zh || pair.tgt != Lang::En {
        return f64::NAN;
    }
    let prediction_lower = prediction.to_lowercase();

    let mut markers = 0usize;
    let mut preserved = 0usize;
    let mut remaining = source.to_string();
    for (marker, modals) in DEONTIC_MAP {
        let occurrences = remaining.matches(marker).count();
        if occurrences == 0 {
            continue;
        }
        markers += occurrences;
        if modals.iter().any(|m| prediction_lower.contains(m)) {
            preserved += occurrences;
        }
        // Consume the counted characters so 应 is not re-counted inside
        // an already-counted 应当.
        remaining = remaining.replace(marker, "\u{1}");
    }

    if markers == 0 {
        f64::NAN
    } else {
        preserved as f64 / markers as f64
    }
}

/// Ratio of conditional markers carried from source to prediction,
/// capped at 1. NaN for unsupported pairs or unconditional sources.
pub fn conditional_logic(source: &str, prediction: &str, pair: LangPair) -> f64 {
    if pair.src != Lang::Zh || pair.tgt != Lang::En {
        return f64::NAN;
    }

    let src_count: usize = CONDITIONAL_SRC
        .iter()
        .map(|marker| source.matches(marker).count())
        .sum::<usize>()
        // The suspended 「…的，」 nominalizer is the dominant statutory
        // conditional in zh legal text.
        + source.matches("的，").count();

    if src_count == 0 {
        return f64::NAN;
    }

    let prediction_lower = prediction.to_lowercase();
    let tgt_count: usize = CONDITIONAL_TGT
        .iter()
        .map(|marker| prediction_lower.matches(marker).count())
        .sum();

    (tgt_count as f64 / src_count as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexmt_types::{MatchOrigin, TermChoice, TermRow};

    fn zh_en() -> LangPair {
        LangPair::zh_en()
    }

    fn table_with(entries: &[(&str, &str)]) -> TermTable {
        TermTable {
            rows: entries
                .iter()
                .map(|(src, tgt)| TermRow {
                    source_term: src.to_string(),
                    importance: 0.9,
                    targets: vec![TermChoice {
                        target: tgt.to_string(),
                        score: 1.0,
                        origin: MatchOrigin::DbExact,
                    }],
                    needs_translation: false,
                })
                .collect(),
        }
    }

    #[test]
    fn terminology_accuracy_counts_honored_rows() {
        let table = table_with(&[("劳动者", "workers"), ("劳动合同", "labor contract")]);
        let half = terminology_accuracy("The workers signed an agreement.", Some(&table));
        assert!((half - 0.5).abs() < 1e-9);

        let full = terminology_accuracy("Workers under a labor contract.", Some(&table));
        assert!((full - 1.0).abs() < 1e-9);
    }

    #[test]
    fn terminology_accuracy_nan_without_constraints() {
        assert!(terminology_accuracy("text", None).is_nan());
        assert!(terminology_accuracy("text", Some(&TermTable::empty())).is_nan());
    }

    #[test]
    fn deontic_preserved_when_modal_present() {
        let score = deontic_preservation(
            "用人单位应当支付工资。",
            "The employer shall pay wages.",
            zh_en(),
        );
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn deontic_lost_when_modal_dropped() {
        let score = deontic_preservation(
            "用人单位应当支付工资。",
            "The employer pays wages.",
            zh_en(),
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn prohibition_requires_negated_modal() {
        let kept = deontic_preservation(
            "用人单位不得克扣工资。",
            "The employer shall not withhold wages.",
            zh_en(),
        );
        assert!((kept - 1.0).abs() < 1e-9);

        let lost = deontic_preservation(
            "用人单位不得克扣工资。",
            "The employer does withhold wages.",
            zh_en(),
        );
        assert_eq!(lost, 0.0);
    }

    #[test]
    fn deontic_nan_without_markers_or_for_other_pairs() {
        assert!(deontic_preservation("没有情态的句子。", "a plain sentence", zh_en()).is_nan());
        assert!(
            deontic_preservation(
                "应当",
                "shall",
                LangPair::new(Lang::Zh, Lang::Ja)
            )
            .is_nan()
        );
    }

    #[test]
    fn conditional_carried_through() {
        let score = conditional_logic(
            "如果发生争议，可以申请仲裁。",
            "If a dispute arises, the parties may apply for arbitration.",
            zh_en(),
        );
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn suspended_de_clause_counts_as_conditional() {
        let score = conditional_logic(
            "违反本法规定的，依法承担责任。",
            "Where this Law is violated, liability shall be borne.",
            zh_en(),
        );
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dropped_conditional_scores_zero() {
        let score = conditional_logic(
            "如果发生争议，可以申请仲裁。",
            "Disputes go to arbitration.",
            zh_en(),
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn conditional_nan_without_frames() {
        assert!(conditional_logic("劳动者享有权利。", "workers have rights", zh_en()).is_nan());
    }
}
