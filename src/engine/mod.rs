//! Engine boundary.
//!
//! - [`backend`]: process-wide reference-counted engine backend
//! - [`llama`]: stub engine shaped after llama.cpp
//!
//! The traits below capture the fixed C-style API surface the bridge drives:
//! global init/teardown, model loading, context creation, batched decoding,
//! and a composable sampler chain. Everything behind them (inference,
//! tokenization mathematics, sampling mathematics) belongs to the engine
//! and is out of the bridge's hands.

pub mod backend;
pub mod llama;

use std::path::Path;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Token ID type.
pub type TokenId = i32;

/// Seed handed to the terminal distribution sampler when the caller
/// supplies none (the engine's own default seed value).
pub const DEFAULT_SEED: u32 = 0xFFFF_FFFF;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("failed to create context: {0}")]
    ContextCreate(String),

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("decode failed (status={status})")]
    Decode { status: i32 },

    #[error("failed to construct {0} sampler")]
    SamplerInit(&'static str),

    #[error("failed to append {0} sampler to the chain")]
    SamplerAppend(&'static str),

    #[error("failed to render token {0} as text")]
    TokenText(TokenId),
}

/// Flash-attention mode, mirroring the engine's three-valued enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashAttention {
    /// Let the engine decide (-1).
    Auto,
    /// Force off (0).
    Disabled,
    /// Force on (1).
    Enabled,
}

impl FlashAttention {
    /// Parse the engine's raw encoding. Anything outside -1..=1 is malformed.
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            -1 => Some(FlashAttention::Auto),
            0 => Some(FlashAttention::Disabled),
            1 => Some(FlashAttention::Enabled),
            _ => None,
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            FlashAttention::Auto => -1,
            FlashAttention::Disabled => 0,
            FlashAttention::Enabled => 1,
        }
    }
}

impl Serialize for FlashAttention {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.raw())
    }
}

/// Model loading parameters. Absent fields keep the engine's defaults;
/// absence never coerces to zero.
#[derive(Debug, Clone, Default)]
pub struct ModelParams {
    /// Number of layers to offload to the GPU.
    pub n_gpu_layers: Option<i32>,

    /// Index of the primary GPU device.
    pub main_gpu: Option<i32>,

    /// Memory-map the model file.
    pub use_mmap: Option<bool>,

    /// Lock model pages in memory.
    pub use_mlock: Option<bool>,
}

/// Context creation parameters. The concrete fields are always supplied by
/// the bridge; optional fields keep the engine's defaults when absent.
#[derive(Debug, Clone)]
pub struct ContextParams {
    /// Context size in tokens.
    pub n_ctx: u32,

    /// Maximum tokens per decode batch.
    pub n_batch: u32,

    /// Threads for single-token decoding.
    pub n_threads: i32,

    /// Threads for batch (prompt) processing.
    pub n_threads_batch: i32,

    /// Micro-batch size.
    pub n_ubatch: Option<u32>,

    /// Maximum parallel sequences.
    pub n_seq_max: Option<u32>,

    pub flash_attention: Option<FlashAttention>,
    pub rope_freq_base: Option<f32>,
    pub rope_freq_scale: Option<f32>,
    pub offload_kqv: Option<bool>,

    /// Disable the engine's performance counters.
    pub no_perf: Option<bool>,

    pub embeddings: Option<bool>,
    pub kv_unified: Option<bool>,
}

/// The engine's global entry points.
///
/// `init` and `shutdown` are invoked only by the [`backend`] reference
/// counter, never directly by sessions.
pub trait Engine: Send + Sync {
    /// One-time process-wide initialization.
    fn init(&self);

    /// Global teardown once the last backend user is gone.
    fn shutdown(&self);

    /// Load a model from disk.
    fn load_model(
        &self,
        path: &Path,
        params: &ModelParams,
    ) -> Result<Box<dyn Model>, EngineError>;
}

/// A loaded model and its vocabulary.
pub trait Model: Send {
    /// Build an execution context over this model.
    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn Context>, EngineError>;

    /// Tokenize text. An empty result is valid (the bridge handles the
    /// BOS fallback itself).
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>, EngineError>;

    /// Render a single token as text.
    fn token_text(&self, token: TokenId) -> Result<String, EngineError>;

    /// The beginning-of-sequence token, if the vocabulary defines one.
    fn bos_token(&self) -> Option<TokenId>;

    /// Whether the token terminates generation.
    fn is_end_of_generation(&self, token: TokenId) -> bool;
}

impl std::fmt::Debug for dyn Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Model")
    }
}

/// An execution context bound to one model.
pub trait Context: Send {
    /// Engine-mandated upper bound on tokens per decode call.
    fn batch_limit(&self) -> u32;

    /// Apply decode/batch thread counts before evaluation.
    fn set_thread_counts(&mut self, n_threads: i32, n_threads_batch: i32);

    /// Decode a batch of tokens positioned sequentially from
    /// `first_position`. A non-zero engine status surfaces as
    /// [`EngineError::Decode`].
    fn decode(&mut self, tokens: &[TokenId], first_position: i32) -> Result<(), EngineError>;

    /// Start an empty sampler chain bound to this context's logits.
    fn new_sampler_chain(&self) -> Result<Box<dyn SamplerChain>, EngineError>;
}

/// A composable sampler chain.
///
/// Each `add_*` either installs the stage or releases it before returning
/// an error; the chain owns every stage it accepted, so the error path
/// cannot leak a constructed sampler.
pub trait SamplerChain: Send {
    fn add_penalties(
        &mut self,
        last_n: i32,
        repeat: f32,
        frequency: f32,
        presence: f32,
    ) -> Result<(), EngineError>;

    fn add_top_k(&mut self, k: i32) -> Result<(), EngineError>;

    fn add_top_p(&mut self, p: f32, min_keep: usize) -> Result<(), EngineError>;

    fn add_temperature(&mut self, temperature: f32) -> Result<(), EngineError>;

    /// Terminal distribution/selection sampler.
    fn add_distribution(&mut self, seed: u32) -> Result<(), EngineError>;

    /// Feed an accepted token into the chain's state (penalty windows etc.).
    fn accept(&mut self, token: TokenId);

    /// Sample the next token from the bound context's current logits.
    fn sample(&mut self) -> Result<TokenId, EngineError>;
}
