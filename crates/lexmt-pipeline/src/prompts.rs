//! User-prompt builders for every agent in the roster.
//!
//! Prompts state the task, the evidence, and the exact JSON reply shape.
//! The discourse re-translation prompt is deliberately restrictive:
//! aggressive TM-driven rewriting measurably hurts n-gram metrics, so the
//! agent is told to touch only the listed divergences.

use std::fmt::Write;

use lexmt_types::{
    Candidate, Divergence, LangPair, MatchOrigin, Segment, SyntaxIssue, SyntaxPattern, TermTable,
    TmHit,
};

fn pair_line(pair: LangPair) -> String {
    format!(
        "Language pair: {} ({}) → {} ({}).",
        pair.src,
        pair.src.display_name(),
        pair.tgt,
        pair.tgt.display_name()
    )
}

/// Render a term table as a compact evidence block.
pub fn render_term_table(table: &TermTable) -> String {
    if table.is_empty() {
        return "  (no terms extracted)".into();
    }
    let mut out = String::new();
    for row in &table.rows {
        let _ = write!(out, "  - \"{}\" (importance {:.2})", row.source_term, row.importance);
        if row.targets.is_empty() {
            out.push_str(": needs-translation\n");
            continue;
        }
        out.push_str(": ");
        let rendered: Vec<String> = row
            .targets
            .iter()
            .map(|t| format!("\"{}\" [{} {:.2}]", t.target, origin_tag(t.origin), t.score))
            .collect();
        out.push_str(&rendered.join(", "));
        out.push('\n');
    }
    out
}

fn origin_tag(origin: MatchOrigin) -> &'static str {
    match origin {
        MatchOrigin::DbExact => "db-exact",
        MatchOrigin::DbFuzzy => "db-fuzzy",
        MatchOrigin::DbVector => "db-vector",
        MatchOrigin::Llm => "llm",
    }
}

/// Direct baseline translation of a segment.
pub fn base_translate(segment: &Segment) -> String {
    format!(
        "{}\nTranslate the following legal text. Preserve deontic force \
         (shall/must/may/should) and conditional structure exactly.\n\n\
         Source:\n{}\n\n\
         Reply as JSON: {{\"translation\": \"...\"}}",
        pair_line(segment.pair),
        segment.source
    )
}

/// Terminology step 1: extract salient legal terms.
pub fn mono_extract(segment: &Segment) -> String {
    format!(
        "{}\nExtract the legal-domain salient terms from the source: proper \
         nouns, specialized nominals, and modal/deontic anchors. Ignore \
         ordinary vocabulary. For each term give its character span in the \
         source and an importance in [0,1].\n\n\
         Source:\n{}\n\n\
         Reply as JSON: {{\"terms\": [{{\"term\": \"...\", \"span\": [start, end], \
         \"importance\": 0.0}}]}}. An empty list is valid.",
        pair_line(segment.pair),
        segment.source
    )
}

/// Terminology step 3: evaluate the term table.
pub fn term_evaluate(segment: &Segment, table: &TermTable) -> String {
    format!(
        "{}\nJudge this terminology table for translating the source below. \
         Score accuracy (are mapped targets correct), consistency (do \
         alternatives agree), and completeness (are all salient terms \
         covered), each in [0,1], plus an overall score and concrete issues.\n\n\
         Source:\n{}\n\n\
         Term table:\n{}\n\
         Reply as JSON: {{\"accuracy\": 0.0, \"consistency\": 0.0, \
         \"completeness\": 0.0, \"overall\": 0.0, \"issues\": [\"...\"]}}",
        pair_line(segment.pair),
        segment.source,
        render_term_table(table)
    )
}

/// Terminology step 4: first-round translation constrained by the table.
pub fn term_translate(segment: &Segment, table: &TermTable, issues: &[String]) -> String {
    let mut prompt = format!(
        "{}\nProduce a first-round translation of the source. Where the term \
         table below constrains a term (any db-* evidence), you MUST use the \
         constrained target form verbatim. Terms marked needs-translation \
         are yours to render.\n\n\
         Source:\n{}\n\n\
         Term table:\n{}",
        pair_line(segment.pair),
        segment.source,
        render_term_table(table)
    );
    if !issues.is_empty() {
        let _ = write!(prompt, "\nKnown terminology issues to avoid:\n");
        for issue in issues {
            let _ = writeln!(prompt, "  - {issue}");
        }
    }
    prompt.push_str("\nReply as JSON: {\"translation\": \"...\"}");
    prompt
}

/// Syntax step 1: bilingual pattern extraction.
pub fn bi_extract(source: &str, prior: &str, pair: LangPair) -> String {
    format!(
        "{}\nIdentify the bilingual syntactic patterns present or expected \
         in this sentence pair: deontic modals (shall/must/may/should), \
         conditional frames (where/if/when), voice choices, connectives, \
         and nominalizations. Categories: modal, connective, conditional, \
         voice, nominalization, other.\n\n\
         Source:\n{source}\n\n\
         Current translation:\n{prior}\n\n\
         Reply as JSON: {{\"patterns\": [{{\"src_pattern\": \"...\", \
         \"tgt_pattern\": \"...\", \"category\": \"modal\", \"confidence\": 0.0}}]}}",
        pair_line(pair)
    )
}

/// Syntax step 2: fidelity evaluation.
pub fn syntax_evaluate(
    source: &str,
    prior: &str,
    patterns: &[SyntaxPattern],
    pair: LangPair,
) -> String {
    let mut rendered = String::new();
    for p in patterns {
        let _ = writeln!(
            rendered,
            "  - [{}] \"{}\" → \"{}\" ({:.2})",
            serde_plain(p.category),
            p.src_pattern,
            p.tgt_pattern,
            p.confidence
        );
    }
    if rendered.is_empty() {
        rendered.push_str("  (no patterns extracted)\n");
    }
    format!(
        "{}\nScore the current translation against the source on: \
         modal_fidelity, connective_consistency, \
         conditional_logic_preservation, voice_appropriateness, each in \
         [0,1], plus an overall score. List issues keyed to specific spans \
         of the translation.\n\n\
         Source:\n{source}\n\n\
         Current translation:\n{prior}\n\n\
         Identified patterns:\n{rendered}\n\
         Reply as JSON: {{\"modal_fidelity\": 0.0, \
         \"connective_consistency\": 0.0, \
         \"conditional_logic_preservation\": 0.0, \
         \"voice_appropriateness\": 0.0, \"overall\": 0.0, \
         \"issues\": [{{\"span\": \"...\", \"description\": \"...\", \
         \"dimension\": \"modal_fidelity\"}}]}}",
        pair_line(pair)
    )
}

fn serde_plain(category: lexmt_types::PatternCategory) -> &'static str {
    use lexmt_types::PatternCategory::*;
    match category {
        Modal => "modal",
        Connective => "connective",
        Conditional => "conditional",
        Voice => "voice",
        Nominalization => "nominalization",
        Other => "other",
    }
}

/// Syntax step 3: targeted revision.
pub fn syntax_translate(
    source: &str,
    prior: &str,
    issues: &[SyntaxIssue],
    constrained_terms: &[(String, String)],
) -> String {
    let mut prompt = format!(
        "Revise the translation to fix exactly the syntactic issues listed. \
         Do not change term choices already settled by the terminology \
         table; if a fix forces a term change, justify it in the \
         \"overrides\" field.\n\n\
         Source:\n{source}\n\n\
         Current translation:\n{prior}\n\nIssues:\n"
    );
    for issue in issues {
        let _ = writeln!(prompt, "  - at \"{}\": {}", issue.span, issue.description);
    }
    if !constrained_terms.is_empty() {
        prompt.push_str("\nSettled terms (keep verbatim):\n");
        for (src, tgt) in constrained_terms {
            let _ = writeln!(prompt, "  - \"{src}\" → \"{tgt}\"");
        }
    }
    prompt.push_str(
        "\nReply as JSON: {\"translation\": \"...\", \"overrides\": [\"reason for any settled-term change\"]}",
    );
    prompt
}

/// Discourse step 2: divergence analysis against TM references.
pub fn discourse_evaluate(source: &str, prior: &str, references: &[TmHit]) -> String {
    let mut rendered = String::new();
    for (i, hit) in references.iter().enumerate() {
        let _ = writeln!(
            rendered,
            "  [{i}] (similarity {:.2})\n      src: {}\n      tgt: {}",
            hit.score, hit.entry.source_text, hit.entry.target_text
        );
    }
    format!(
        "Compare the current translation to the reference translations \
         retrieved from the corpus. Report concrete token/clause-level \
         divergences on three axes: term_consistency, syntactic_alignment, \
         style_alignment, each scored in [0,1], plus an overall score.\n\n\
         Source:\n{source}\n\n\
         Current translation:\n{prior}\n\n\
         References:\n{rendered}\n\
         Reply as JSON: {{\"term_consistency\": 0.0, \
         \"syntactic_alignment\": 0.0, \"style_alignment\": 0.0, \
         \"overall\": 0.0, \"divergences\": [{{\"axis\": \"term_consistency\", \
         \"current\": \"...\", \"expected\": \"...\"}}]}}"
    )
}

/// Discourse step 3: conservative final revision.
pub fn discourse_translate(source: &str, prior: &str, divergences: &[Divergence]) -> String {
    let mut prompt = format!(
        "Produce the final revision of the translation. You may change ONLY \
         what the divergence report lists below; keep everything else \
         byte-identical where possible. Do not paraphrase. If a listed \
         divergence would make the translation less faithful to the source, \
         leave that part unchanged.\n\n\
         Source:\n{source}\n\n\
         Current translation:\n{prior}\n\nDivergence report:\n"
    );
    for d in divergences {
        let _ = writeln!(
            prompt,
            "  - [{}] \"{}\" vs reference \"{}\"",
            d.axis, d.current, d.expected
        );
    }
    prompt.push_str("\nReply as JSON: {\"translation\": \"...\"}");
    prompt
}

/// Candidate selector: one call over all candidates.
pub fn candidate_judge(
    source: &str,
    candidates: &[Candidate],
    stage_goal: &str,
    pair: LangPair,
) -> String {
    let mut rendered = String::new();
    for candidate in candidates {
        let _ = writeln!(rendered, "  [{}] {}", candidate.rank, candidate.text);
    }
    format!(
        "{}\nStage goal: {stage_goal}.\nPick the best candidate translation \
         of the source. Score each candidate in [0,1] and explain the pick \
         briefly. Prefer the most faithful, least-modified option when \
         quality is comparable.\n\n\
         Source:\n{source}\n\nCandidates:\n{rendered}\n\
         Reply as JSON: {{\"chosen_index\": 0, \"scores\": [0.0], \
         \"rationale\": \"...\"}}",
        pair_line(pair)
    )
}

/// Preprocessing: translate one batch of terms in a single call.
pub fn batch_term_translate(terms: &[(String, Vec<String>)], pair: LangPair) -> String {
    let mut rendered = String::new();
    for (term, contexts) in terms {
        let _ = writeln!(rendered, "  - \"{term}\"");
        for context in contexts {
            let _ = writeln!(rendered, "      context: {context}");
        }
    }
    format!(
        "{}\nTranslate each extracted legal term below into the target \
         language, using the supplied contexts to disambiguate. Give the \
         standard legal rendering, not a gloss.\n\n\
         Terms:\n{rendered}\n\
         Reply as JSON: a single object mapping each source term verbatim \
         to its translation, e.g. {{\"劳动合同\": \"labor contract\"}}.",
        pair_line(pair)
    )
}

/// GEMBA direct assessment (0-100 scale, rescaled by the caller).
pub fn gemba_da(source: &str, prediction: &str, pair: LangPair) -> String {
    format!(
        "{}\nScore the candidate translation of the source on a 0-100 \
         direct-assessment scale, where 0 is no meaning preserved and 100 \
         is a perfect translation.\n\n\
         Source:\n{source}\n\nCandidate:\n{prediction}\n\n\
         Reply as JSON: {{\"score\": 0}}",
        pair_line(pair)
    )
}

/// GEMBA MQM-style error annotation; the caller converts the error list
/// into a penalty score.
pub fn gemba_mqm(source: &str, prediction: &str, pair: LangPair) -> String {
    format!(
        "{}\nAnnotate the candidate translation with MQM errors. Severity \
         is one of \"critical\", \"major\", \"minor\".\n\n\
         Source:\n{source}\n\nCandidate:\n{prediction}\n\n\
         Reply as JSON: {{\"errors\": [{{\"span\": \"...\", \
         \"category\": \"accuracy/mistranslation\", \"severity\": \"major\"}}]}}",
        pair_line(pair)
    )
}
