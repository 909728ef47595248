//! The agent kernel: structured prompts in, structured results out.
//!
//! An agent is a pure function `(input, context) → structured output`
//! defined by a role/domain/specialty triple, a rendered prompt, and an
//! output shape. There is no inheritance and no per-agent state; the
//! roster below is a table of named specs, and [`run_agent`] is the one
//! code path every agent goes through.

use serde::de::DeserializeOwned;

use lexmt_llm::client::trace_prompt;
use lexmt_llm::{CallOptions, ChatClient, ChatMessage};
use lexmt_types::{PipelineError, Result};

/// A named agent persona: the triple used to render its system prompt.
#[derive(Debug, Clone, Copy)]
pub struct AgentSpec {
    /// Unique agent name, used in logs and error messages.
    pub name: &'static str,
    /// The persona's role line.
    pub role: &'static str,
    /// The domain it works in.
    pub domain: &'static str,
    /// What it is specialized to do.
    pub specialty: &'static str,
}

impl AgentSpec {
    /// Render the system prompt for this agent.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are {role}, working in the {domain} domain. Your specialty: {specialty}. \
             Respond with ONLY a single JSON object in exactly the format requested. \
             No prose, no markdown fences, no commentary.",
            role = self.role,
            domain = self.domain,
            specialty = self.specialty,
        )
    }
}

/// The agent roster. Layers refer to agents by these entries; nothing else
/// in the system constructs an [`AgentSpec`].
pub mod roster {
    use super::AgentSpec;

    /// Baseline translator used when no refinement layer is enabled, and
    /// as the carried-forward prior when the terminology layer gates.
    pub const BASE_TRANSLATE: AgentSpec = AgentSpec {
        name: "base_translate",
        role: "a professional legal translator",
        domain: "legal",
        specialty: "faithful, terminologically precise statutory translation",
    };

    /// Terminology layer, step 1: monolingual term extraction.
    pub const MONO_EXTRACT: AgentSpec = AgentSpec {
        name: "mono_extract",
        role: "a legal terminologist",
        domain: "legal",
        specialty: "identifying salient legal terms, proper nouns, and deontic anchors in source text",
    };

    /// Terminology layer, step 3: term-table quality evaluation.
    pub const TERM_EVALUATE: AgentSpec = AgentSpec {
        name: "term_evaluate",
        role: "a terminology reviewer",
        domain: "legal",
        specialty: "judging the accuracy, consistency, and completeness of term mappings",
    };

    /// Terminology layer, step 4: constrained first-round translation.
    pub const TERM_TRANSLATE: AgentSpec = AgentSpec {
        name: "term_translate",
        role: "a professional legal translator",
        domain: "legal",
        specialty: "translation constrained by a reviewed terminology table",
    };

    /// Syntax layer, step 1: bilingual pattern extraction.
    pub const BI_EXTRACT: AgentSpec = AgentSpec {
        name: "bi_extract",
        role: "a bilingual legal linguist",
        domain: "legal",
        specialty: "recognizing modal, conditional, voice, connective, and nominalization patterns across a language pair",
    };

    /// Syntax layer, step 2: syntactic fidelity evaluation.
    pub const SYNTAX_EVALUATE: AgentSpec = AgentSpec {
        name: "syntax_evaluate",
        role: "a legal translation reviewer",
        domain: "legal",
        specialty: "scoring modal fidelity, connective consistency, conditional logic, and voice",
    };

    /// Syntax layer, step 3: targeted syntactic revision.
    pub const SYNTAX_TRANSLATE: AgentSpec = AgentSpec {
        name: "syntax_translate",
        role: "a professional legal translator",
        domain: "legal",
        specialty: "revising translations to fix identified syntactic issues without disturbing settled terminology",
    };

    /// Discourse layer, step 2: divergence analysis against TM references.
    pub const DISCOURSE_EVALUATE: AgentSpec = AgentSpec {
        name: "discourse_evaluate",
        role: "a legal corpus analyst",
        domain: "legal",
        specialty: "comparing a draft against retrieved reference translations for term, syntax, and style divergence",
    };

    /// Discourse layer, step 3: conservative style-aligned revision.
    pub const DISCOURSE_TRANSLATE: AgentSpec = AgentSpec {
        name: "discourse_translate",
        role: "a professional legal translator",
        domain: "legal",
        specialty: "minimal revision: change only what a divergence report concretely lists",
    };

    /// Candidate selector judge.
    pub const CANDIDATE_JUDGE: AgentSpec = AgentSpec {
        name: "candidate_judge",
        role: "a senior legal translation judge",
        domain: "legal",
        specialty: "ranking candidate translations for fidelity, terminology, and register",
    };

    /// Offline preprocessing batch term translator.
    pub const BATCH_TERM_TRANSLATE: AgentSpec = AgentSpec {
        name: "batch_term_translate",
        role: "a legal lexicographer",
        domain: "legal",
        specialty: "translating batches of extracted legal terms using their source contexts",
    };

    /// GEMBA-style quality judge used by the evaluation harness.
    pub const GEMBA_JUDGE: AgentSpec = AgentSpec {
        name: "gemba_judge",
        role: "a machine translation quality assessor",
        domain: "legal",
        specialty: "direct assessment and MQM-style error annotation of translations",
    };
}

/// Run an agent: render the prompt, invoke the chat client, and parse the
/// reply into `T`. Malformed output surfaces as
/// [`PipelineError::MalformedModelOutput`] after the client's repair retry.
pub async fn run_agent<T: DeserializeOwned>(
    client: &ChatClient,
    spec: &AgentSpec,
    user_prompt: String,
    opts: CallOptions,
) -> Result<T> {
    let messages = [
        ChatMessage::system(spec.system_prompt()),
        ChatMessage::user(user_prompt),
    ];
    trace_prompt(spec.name, &messages);
    client
        .complete_json::<T>(&messages, opts)
        .await
        .map_err(PipelineError::from)
}

/// Reject a well-formed but empty translation as [`PipelineError::EmptyResult`].
pub fn non_empty(agent: &AgentSpec, text: String) -> Result<String> {
    if text.trim().is_empty() {
        return Err(PipelineError::EmptyResult {
            agent: agent.name.to_string(),
        });
    }
    Ok(text)
}

/// Clamp a model-reported score into [0, 1].
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
}
