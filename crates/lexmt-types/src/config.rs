//! Process-wide run configuration and ablation configs.
//!
//! A single [`RunConfig`] is loaded at harness startup, validated once, and
//! then treated as read-only for the lifetime of the run. Workflows receive
//! it as an explicit shared handle; nothing re-initializes configuration
//! mid-run. All structs accept both `snake_case` and `camelCase` field names
//! via `#[serde(alias)]`, and unknown fields are ignored for forward
//! compatibility.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::layer::LayerKind;

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for a lexmt run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Chat-completion provider settings.
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Embedding endpoint settings.
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Remote neural-scorer endpoint (BERTScore / COMET). Optional; when
    /// absent those metrics report NaN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scorer: Option<ScorerSettings>,

    /// Termbase store and lookup thresholds.
    #[serde(default)]
    pub termbase: TermbaseSettings,

    /// Translation-memory index and hybrid search parameters.
    #[serde(default)]
    pub tm: TmSettings,

    /// Offline term-preprocessing parameters.
    #[serde(default)]
    pub preprocess: PreprocessSettings,

    /// Global cap on in-flight segment pipelines.
    #[serde(default = "default_max_concurrent", alias = "maxConcurrent")]
    pub max_concurrent: usize,

    /// Metrics computed per sample and per system.
    #[serde(default = "default_metrics")]
    pub metrics: BTreeSet<Metric>,

    /// Synthesize terminology-only and terminology+syntax result sets from
    /// the full config's traces.
    #[serde(default, alias = "saveIntermediate")]
    pub save_intermediate: bool,

    /// Include the full per-segment trace in the run artifact.
    #[serde(default = "default_true", alias = "saveTraces")]
    pub save_traces: bool,

    /// Directory for timestamped run artifacts.
    #[serde(default = "default_output_dir", alias = "outputDir")]
    pub output_dir: PathBuf,

    /// Ordered ablation configs evaluated against the shared dataset.
    #[serde(default = "AblationConfig::standard_set")]
    pub ablations: Vec<AblationConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            embedding: EmbeddingSettings::default(),
            scorer: None,
            termbase: TermbaseSettings::default(),
            tm: TmSettings::default(),
            preprocess: PreprocessSettings::default(),
            max_concurrent: default_max_concurrent(),
            metrics: default_metrics(),
            save_intermediate: false,
            save_traces: default_true(),
            output_dir: default_output_dir(),
            ablations: AblationConfig::standard_set(),
        }
    }
}

impl RunConfig {
    /// Validate the whole configuration. Called once at startup; a failure
    /// maps to exit code 2.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(PipelineError::ConfigInvalid(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if self.preprocess.max_concurrent == 0 {
            return Err(PipelineError::ConfigInvalid(
                "preprocess.max_concurrent must be at least 1".into(),
            ));
        }
        if self.preprocess.batch_size == 0 {
            return Err(PipelineError::ConfigInvalid(
                "preprocess.batch_size must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tm.alpha) {
            return Err(PipelineError::ConfigInvalid(format!(
                "tm.alpha must be in [0, 1], got {}",
                self.tm.alpha
            )));
        }
        if let Some(floor) = self.tm.similarity_floor
            && !(0.0..=1.0).contains(&floor)
        {
            return Err(PipelineError::ConfigInvalid(format!(
                "tm.similarity_floor must be in [0, 1], got {floor}"
            )));
        }
        if self.ablations.is_empty() {
            return Err(PipelineError::ConfigInvalid(
                "at least one ablation config is required".into(),
            ));
        }
        let mut names = BTreeSet::new();
        for ablation in &self.ablations {
            if !names.insert(ablation.name.as_str()) {
                return Err(PipelineError::ConfigInvalid(format!(
                    "duplicate ablation name '{}'",
                    ablation.name
                )));
            }
            ablation.validate()?;
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("runs")
}

fn default_metrics() -> BTreeSet<Metric> {
    [Metric::Bleu, Metric::Chrf, Metric::Comet].into_iter().collect()
}

// ── Provider / embedding / scorer ────────────────────────────────────────

/// Chat-completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// OpenAI-compatible base URL.
    #[serde(default = "default_llm_base_url", alias = "baseUrl")]
    pub base_url: String,

    /// Environment variable holding the API key. The key itself is never
    /// stored in configuration.
    #[serde(default = "default_api_key_env", alias = "apiKeyEnv")]
    pub api_key_env: String,

    /// Model used by every agent.
    #[serde(default = "default_model")]
    pub model: String,

    /// Low default temperature for extractor/evaluator/selector calls.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Temperature used only when generating multiple candidates.
    #[serde(default = "default_candidate_temperature", alias = "candidateTemperature")]
    pub candidate_temperature: f64,

    /// Maximum tokens per completion.
    #[serde(default = "default_max_tokens", alias = "maxTokens")]
    pub max_tokens: i32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs", alias = "timeoutSecs")]
    pub timeout_secs: u64,

    /// Maximum retries for transient provider failures.
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            candidate_temperature: default_candidate_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_api_key_env() -> String {
    "LEXMT_API_KEY".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_temperature() -> f64 {
    0.2
}

fn default_candidate_temperature() -> f64 {
    0.8
}

fn default_max_tokens() -> i32 {
    1024
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

/// Embedding endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// OpenAI-compatible base URL.
    #[serde(default = "default_llm_base_url", alias = "baseUrl")]
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env", alias = "apiKeyEnv")]
    pub api_key_env: String,

    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Fixed output width, registered at startup and used to validate TM
    /// inserts.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Texts per embedding request.
    #[serde(default = "default_embed_batch", alias = "batchSize")]
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            batch_size: default_embed_batch(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_dimension() -> usize {
    1024
}

fn default_embed_batch() -> usize {
    32
}

/// Remote neural-scorer endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerSettings {
    /// Base URL of the scorer service.
    #[serde(alias = "baseUrl")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_scorer_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,
}

fn default_scorer_timeout() -> u64 {
    120
}

// ── Retrieval settings ───────────────────────────────────────────────────

/// Termbase store location and lookup thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermbaseSettings {
    /// JSONL file backing the termbase. `None` keeps it in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Character-similarity threshold for the fuzzy pass.
    #[serde(default = "default_fuzzy_threshold", alias = "fuzzyThreshold")]
    pub fuzzy_threshold: f32,

    /// Cosine threshold for the vector pass.
    #[serde(default = "default_vector_threshold", alias = "vectorThreshold")]
    pub vector_threshold: f32,

    /// Results per lookup.
    #[serde(default = "default_lookup_k", alias = "lookupK")]
    pub lookup_k: usize,
}

impl Default for TermbaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            fuzzy_threshold: default_fuzzy_threshold(),
            vector_threshold: default_vector_threshold(),
            lookup_k: default_lookup_k(),
        }
    }
}

fn default_fuzzy_threshold() -> f32 {
    0.75
}

fn default_vector_threshold() -> f32 {
    0.60
}

fn default_lookup_k() -> usize {
    5
}

/// Translation-memory index and hybrid search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmSettings {
    /// JSONL file backing the TM index. `None` keeps it in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Candidates retrieved per query.
    #[serde(default = "default_tm_top_k", alias = "topK")]
    pub top_k: usize,

    /// Dense-vs-lexical fusion weight.
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Hits below this fused score are discarded, even if that leaves zero
    /// references. `None` disables the floor.
    #[serde(default = "default_similarity_floor", alias = "similarityFloor")]
    pub similarity_floor: Option<f32>,

    /// References actually handed to the discourse layer.
    #[serde(default = "default_max_refs", alias = "maxRefs")]
    pub max_refs: usize,
}

impl Default for TmSettings {
    fn default() -> Self {
        Self {
            path: None,
            top_k: default_tm_top_k(),
            alpha: default_alpha(),
            similarity_floor: default_similarity_floor(),
            max_refs: default_max_refs(),
        }
    }
}

fn default_tm_top_k() -> usize {
    5
}

fn default_alpha() -> f32 {
    0.5
}

fn default_similarity_floor() -> Option<f32> {
    Some(0.7)
}

fn default_max_refs() -> usize {
    3
}

/// Offline term-preprocessing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessSettings {
    /// Terms per batch-translation call.
    #[serde(default = "default_preprocess_batch", alias = "batchSize")]
    pub batch_size: usize,

    /// Separate, lower cap for concurrent batch-translation calls.
    #[serde(default = "default_preprocess_concurrent", alias = "maxConcurrent")]
    pub max_concurrent: usize,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            batch_size: default_preprocess_batch(),
            max_concurrent: default_preprocess_concurrent(),
        }
    }
}

fn default_preprocess_batch() -> usize {
    20
}

fn default_preprocess_concurrent() -> usize {
    5
}

// ── Metrics ──────────────────────────────────────────────────────────────

/// Metrics the harness can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    /// Sentence and corpus BLEU.
    #[serde(rename = "bleu")]
    Bleu,
    /// chrF++ (character n-grams plus word n-grams).
    #[serde(rename = "chrf")]
    Chrf,
    /// BERTScore F1 via the remote scorer service.
    #[serde(rename = "bertscore")]
    Bertscore,
    /// COMET via the remote scorer service.
    #[serde(rename = "comet")]
    Comet,
    /// GEMBA direct-assessment LLM judge.
    #[serde(rename = "gemba-da")]
    GembaDa,
    /// GEMBA MQM-style LLM judge.
    #[serde(rename = "gemba-mqm")]
    GembaMqm,
    /// Fraction of constrained term-table rows honored by the prediction.
    #[serde(rename = "termbase_accuracy")]
    TermbaseAccuracy,
    /// Deontic modal preservation (shall/must/may/should).
    #[serde(rename = "deontic")]
    Deontic,
    /// Conditional-frame preservation (where/if/when).
    #[serde(rename = "conditional")]
    Conditional,
}

// ── Layer sets and ablations ─────────────────────────────────────────────

/// Symbolic or explicit subset of the enabled layers, used for the
/// candidate-selection setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionConfig {
    /// `"none"`, `"last"`, or `"all"`.
    Symbolic(SymbolicLayers),
    /// An explicit layer list.
    Explicit(BTreeSet<LayerKind>),
}

/// The symbolic values accepted where a layer subset is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolicLayers {
    /// The empty set.
    None,
    /// Only the last enabled layer.
    Last,
    /// Every enabled layer.
    All,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        SelectionConfig::Symbolic(SymbolicLayers::None)
    }
}

impl SelectionConfig {
    /// Resolve against the enabled layers of an ablation.
    pub fn resolve(&self, enabled: &BTreeSet<LayerKind>) -> BTreeSet<LayerKind> {
        match self {
            SelectionConfig::Symbolic(SymbolicLayers::None) => BTreeSet::new(),
            SelectionConfig::Symbolic(SymbolicLayers::Last) => {
                enabled.iter().next_back().copied().into_iter().collect()
            }
            SelectionConfig::Symbolic(SymbolicLayers::All) => enabled.clone(),
            SelectionConfig::Explicit(set) => set.intersection(enabled).copied().collect(),
        }
    }
}

/// Gating configuration: which layers gate, and at what thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingConfig {
    /// Layers with gating enabled. Defaults to none: a seemingly-benign
    /// "gate everywhere" default would collapse the full pipeline into the
    /// terminology-only output.
    #[serde(default, alias = "enabledLayers")]
    pub enabled_layers: SelectionConfig,

    /// Per-layer score thresholds.
    #[serde(default = "default_gating_thresholds")]
    pub thresholds: BTreeMap<LayerKind, f32>,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            enabled_layers: SelectionConfig::default(),
            thresholds: default_gating_thresholds(),
        }
    }
}

impl GatingConfig {
    /// The gating threshold for a layer (spec defaults when unset).
    pub fn threshold(&self, layer: LayerKind) -> f32 {
        self.thresholds
            .get(&layer)
            .copied()
            .unwrap_or_else(|| default_threshold_for(layer))
    }
}

fn default_threshold_for(layer: LayerKind) -> f32 {
    match layer {
        LayerKind::Terminology => 0.90,
        LayerKind::Syntax => 0.85,
        LayerKind::Discourse => 0.75,
    }
}

fn default_gating_thresholds() -> BTreeMap<LayerKind, f32> {
    LayerKind::ALL
        .into_iter()
        .map(|l| (l, default_threshold_for(l)))
        .collect()
}

/// One named experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AblationConfig {
    /// Name of the ablation (e.g. "baseline", "full").
    pub name: String,

    /// Which refinement layers run. An empty set is the direct-LLM baseline.
    #[serde(default = "all_layers", alias = "enabledLayers")]
    pub enabled_layers: BTreeSet<LayerKind>,

    /// Whether the terminology layer consults the termbase.
    #[serde(default = "default_true", alias = "useTermbase")]
    pub use_termbase: bool,

    /// Whether the discourse layer consults the TM. `None` means "yes iff
    /// discourse is enabled".
    #[serde(default, alias = "useTm", skip_serializing_if = "Option::is_none")]
    pub use_tm: Option<bool>,

    /// Layers that run candidate selection.
    #[serde(default, alias = "selectionLayers")]
    pub selection_layers: SelectionConfig,

    /// Candidates per selecting layer. 1 disables the selector.
    #[serde(default = "default_num_candidates", alias = "numCandidates")]
    pub num_candidates: usize,

    /// Gating policy for this ablation.
    #[serde(default)]
    pub gating: GatingConfig,

    /// Override of the TM similarity floor for sweeps.
    #[serde(default, alias = "similarityFloor", skip_serializing_if = "Option::is_none")]
    pub similarity_floor: Option<f32>,
}

fn all_layers() -> BTreeSet<LayerKind> {
    LayerKind::ALL.into_iter().collect()
}

fn default_num_candidates() -> usize {
    1
}

impl AblationConfig {
    /// A named config with all layers enabled and every knob at its default.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled_layers: all_layers(),
            use_termbase: true,
            use_tm: None,
            selection_layers: SelectionConfig::default(),
            num_candidates: 1,
            gating: GatingConfig::default(),
            similarity_floor: None,
        }
    }

    /// Direct-LLM baseline: no refinement layers.
    pub fn baseline() -> Self {
        let mut c = Self::named("baseline");
        c.enabled_layers = BTreeSet::new();
        c
    }

    /// Terminology layer only.
    pub fn terminology_only() -> Self {
        let mut c = Self::named("terminology");
        c.enabled_layers = [LayerKind::Terminology].into_iter().collect();
        c
    }

    /// Terminology + syntax layers.
    pub fn terminology_syntax() -> Self {
        let mut c = Self::named("terminology_syntax");
        c.enabled_layers = [LayerKind::Terminology, LayerKind::Syntax].into_iter().collect();
        c
    }

    /// All three layers.
    pub fn full() -> Self {
        Self::named("full")
    }

    /// The minimum ablation set the harness ships with.
    pub fn standard_set() -> Vec<AblationConfig> {
        vec![
            Self::baseline(),
            Self::terminology_only(),
            Self::terminology_syntax(),
            Self::full(),
        ]
    }

    /// Effective TM usage: explicit flag, else enabled iff discourse runs.
    pub fn tm_enabled(&self) -> bool {
        self.use_tm
            .unwrap_or_else(|| self.enabled_layers.contains(&LayerKind::Discourse))
    }

    /// Layers that run candidate selection, resolved against enabled layers.
    pub fn resolved_selection(&self) -> BTreeSet<LayerKind> {
        self.selection_layers.resolve(&self.enabled_layers)
    }

    /// Layers that gate, resolved against enabled layers.
    pub fn resolved_gating(&self) -> BTreeSet<LayerKind> {
        self.gating.enabled_layers.resolve(&self.enabled_layers)
    }

    /// Validate this ablation's knobs.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::ConfigInvalid(
                "ablation name must not be empty".into(),
            ));
        }
        if self.num_candidates == 0 {
            return Err(PipelineError::ConfigInvalid(format!(
                "ablation '{}': num_candidates must be at least 1",
                self.name
            )));
        }
        for (layer, threshold) in &self.gating.thresholds {
            if !(0.0..=1.0).contains(threshold) {
                return Err(PipelineError::ConfigInvalid(format!(
                    "ablation '{}': gating threshold for {layer} must be in [0, 1], got {threshold}",
                    self.name
                )));
            }
        }
        if let SelectionConfig::Explicit(set) = &self.selection_layers
            && !set.is_subset(&self.enabled_layers)
        {
            return Err(PipelineError::ConfigInvalid(format!(
                "ablation '{}': selection_layers must be a subset of enabled_layers",
                self.name
            )));
        }
        if let SelectionConfig::Explicit(set) = &self.gating.enabled_layers
            && !set.is_subset(&self.enabled_layers)
        {
            return Err(PipelineError::ConfigInvalid(format!(
                "ablation '{}': gating layers must be a subset of enabled_layers",
                self.name
            )));
        }
        if let Some(floor) = self.similarity_floor
            && !(0.0..=1.0).contains(&floor)
        {
            return Err(PipelineError::ConfigInvalid(format!(
                "ablation '{}': similarity_floor must be in [0, 1], got {floor}",
                self.name
            )));
        }
        Ok(())
    }
}
