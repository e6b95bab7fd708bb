//! Host-side configuration for the bridge.
//!
//! Two option sets cross the boundary: [`RuntimeOptions`] at session
//! creation and [`SamplingOptions`] per completion. Optional fields are
//! `Option<T>`: `None` means "keep the engine default" and never silently
//! coerces to zero. Both sets can be loaded from loosely structured JSON
//! blobs (historical key spellings included), falling back to defaults when
//! parsing fails so legacy free-form settings still work.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::FlashAttention;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "llama-bridge", about = "Run a completion against a GGUF model")]
pub struct Cli {
    /// Path to the GGUF model file.
    pub model: PathBuf,

    /// Prompt text. An empty prompt falls back to the model's BOS token.
    #[arg(default_value = "")]
    pub prompt: String,

    /// Worker threads for decoding.
    #[arg(short, long, default_value_t = 4)]
    pub threads: i32,

    /// Context size in tokens.
    #[arg(long, default_value_t = 2048)]
    pub context_size: i32,

    /// Maximum tokens to generate (default: derived from the context size).
    #[arg(long)]
    pub max_tokens: Option<i32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub top_k: Option<i32>,

    #[arg(long)]
    pub repeat_penalty: Option<f32>,

    #[arg(long)]
    pub seed: Option<u32>,

    /// Stop sequence; may be given multiple times.
    #[arg(long = "stop")]
    pub stop_sequences: Vec<String>,

    /// Flash attention mode: -1 auto, 0 disabled, 1 enabled.
    #[arg(long)]
    pub flash_attention: Option<i32>,

    /// Runtime options as a JSON file (overrides --threads/--context-size).
    #[arg(long)]
    pub runtime_config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Session-creation tunables. `None` preserves the engine default.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeOptions {
    /// Threads for single-token decoding. Required, strictly positive.
    pub thread_count: i32,

    /// Context capacity in tokens. Required, strictly positive.
    pub context_size: i32,

    /// Threads for batch (prompt) processing; defaults to `thread_count`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_count_batch: Option<i32>,

    /// Decode batch size; defaults to `min(context_size, 512)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i32>,

    /// Micro-batch size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ubatch_size: Option<i32>,

    /// Maximum parallel sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq_max: Option<i32>,

    /// Number of layers to offload to the GPU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_gpu_layers: Option<i32>,

    /// Index of the primary GPU device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_gpu: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash_attention: Option<FlashAttention>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rope_freq_base: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rope_freq_scale: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offload_kqv: Option<bool>,

    /// Disable the engine's performance counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_perf: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<bool>,

    /// Unified KV cache across sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kv_unified: Option<bool>,

    /// Memory-map the model file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_mmap: Option<bool>,

    /// Lock model pages in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_mlock: Option<bool>,
}

impl RuntimeOptions {
    /// Bare options with every tunable left at the engine default. Values
    /// are taken as given; session creation validates them strictly.
    pub fn new(thread_count: i32, context_size: i32) -> Self {
        Self {
            thread_count,
            context_size,
            thread_count_batch: None,
            batch_size: None,
            ubatch_size: None,
            seq_max: None,
            n_gpu_layers: None,
            main_gpu: None,
            flash_attention: None,
            rope_freq_base: None,
            rope_freq_scale: None,
            offload_kqv: None,
            no_perf: None,
            embeddings: None,
            kv_unified: None,
            use_mmap: None,
            use_mlock: None,
        }
    }

    /// Host-convenience constructor that clamps the required values to 1.
    pub fn with_defaults(thread_count: i32, context_size: i32) -> Self {
        Self::new(thread_count.max(1), context_size.max(1))
    }

    /// Drop optionals that carry no usable value, mirroring the host-side
    /// cleanup applied before options are handed over.
    pub fn sanitized(&self) -> Self {
        Self {
            thread_count: self.thread_count.max(1),
            context_size: self.context_size.max(1),
            thread_count_batch: self.thread_count_batch.filter(|&v| v > 0),
            batch_size: self.batch_size.filter(|&v| v > 0),
            ubatch_size: self.ubatch_size.filter(|&v| v > 0),
            seq_max: self.seq_max.filter(|&v| v > 0),
            n_gpu_layers: self.n_gpu_layers.filter(|&v| v >= 0),
            main_gpu: self.main_gpu.filter(|&v| v >= 0),
            rope_freq_base: self.rope_freq_base.filter(|&v| v > 0.0),
            rope_freq_scale: self.rope_freq_scale.filter(|&v| v > 0.0),
            ..self.clone()
        }
    }

    /// Parse a loose JSON blob. Unknown keys are ignored, historical key
    /// spellings are accepted, and anything unparseable falls back to
    /// defaults built from the supplied values.
    pub fn from_json(raw: &str, fallback_threads: i32, fallback_context: i32) -> Self {
        let fallback = Self::with_defaults(fallback_threads, fallback_context);
        let candidate = raw.trim();
        if candidate.is_empty() || !candidate.starts_with('{') {
            return fallback;
        }

        let wire: RuntimeOptionsWire = match serde_json::from_str(candidate) {
            Ok(wire) => wire,
            Err(_) => return fallback,
        };

        let (thread_count, thread_count_batch) =
            interpret_threads(wire.threads.as_ref(), fallback_threads);

        Self {
            thread_count,
            context_size: wire
                .context
                .as_ref()
                .and_then(json_i32)
                .unwrap_or(fallback_context),
            thread_count_batch,
            batch_size: wire.batch.as_ref().and_then(json_i32),
            ubatch_size: wire.ubatch.as_ref().and_then(json_i32),
            seq_max: wire.seq_max.as_ref().and_then(json_i32),
            n_gpu_layers: wire.n_gpu_layers.as_ref().and_then(json_i32),
            main_gpu: wire.main_gpu.as_ref().and_then(json_i32),
            flash_attention: wire.flash_attention.as_ref().and_then(json_flash_attention),
            rope_freq_base: wire.rope_freq_base.as_ref().and_then(json_f32),
            rope_freq_scale: wire.rope_freq_scale.as_ref().and_then(json_f32),
            offload_kqv: wire.offload_kqv.as_ref().and_then(json_bool),
            no_perf: wire.no_perf.as_ref().and_then(json_bool),
            embeddings: wire.embeddings.as_ref().and_then(json_bool),
            kv_unified: wire.kv_unified.as_ref().and_then(json_bool),
            use_mmap: wire.use_mmap.as_ref().and_then(json_bool),
            use_mlock: wire.use_mlock.as_ref().and_then(json_bool),
        }
        .sanitized()
    }
}

/// Per-completion sampling hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingOptions {
    /// Maximum tokens to generate. Zero generates nothing.
    pub max_tokens: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,

    /// Repeat penalty; values at or below 1.0 (within epsilon) leave the
    /// penalties sampler disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,

    /// Penalty window length; defaults to `min(context_size, 64)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_last_n: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Literal suffixes that end generation when the output ends with one.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stop_sequences: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

impl SamplingOptions {
    pub fn new(max_tokens: i32) -> Self {
        Self {
            max_tokens: max_tokens.max(0),
            temperature: None,
            top_p: None,
            top_k: None,
            repeat_penalty: None,
            repeat_last_n: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: Vec::new(),
            seed: None,
        }
    }

    /// Drop non-finite and out-of-range values the way the bridge entry
    /// point does before any engine call.
    pub fn sanitized(&self) -> Self {
        Self {
            max_tokens: self.max_tokens.max(0),
            temperature: self.temperature.filter(|v| v.is_finite() && *v > 0.0),
            top_p: self
                .top_p
                .filter(|v| v.is_finite() && *v > 0.0 && *v <= 1.0),
            top_k: self.top_k.filter(|&v| v > 0),
            repeat_penalty: self.repeat_penalty.filter(|v| v.is_finite() && *v > 0.0),
            repeat_last_n: self.repeat_last_n.filter(|&v| v >= 0),
            frequency_penalty: self.frequency_penalty.filter(|v| v.is_finite()),
            presence_penalty: self.presence_penalty.filter(|v| v.is_finite()),
            stop_sequences: self
                .stop_sequences
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect(),
            seed: self.seed,
        }
    }

    /// Parse a loose JSON blob, falling back to plain defaults when it does
    /// not parse. See [`RuntimeOptions::from_json`].
    pub fn from_json(raw: &str, default_max_tokens: i32) -> Self {
        let fallback = Self::new(default_max_tokens);
        let candidate = raw.trim();
        if candidate.is_empty() || !candidate.starts_with('{') {
            return fallback;
        }

        let wire: SamplingOptionsWire = match serde_json::from_str(candidate) {
            Ok(wire) => wire,
            Err(_) => return fallback,
        };

        Self {
            max_tokens: wire
                .max_tokens
                .as_ref()
                .and_then(json_i32)
                .unwrap_or(default_max_tokens),
            temperature: wire.temperature.as_ref().and_then(json_f32),
            top_p: wire.top_p.as_ref().and_then(json_f32),
            top_k: wire.top_k.as_ref().and_then(json_i32),
            repeat_penalty: wire.repeat_penalty.as_ref().and_then(json_f32),
            repeat_last_n: wire.repeat_last_n.as_ref().and_then(json_i32),
            frequency_penalty: wire.frequency_penalty.as_ref().and_then(json_f32),
            presence_penalty: wire.presence_penalty.as_ref().and_then(json_f32),
            stop_sequences: wire
                .stop_sequences
                .as_ref()
                .map(json_stop_sequences)
                .unwrap_or_default(),
            seed: wire.seed.as_ref().and_then(json_u32),
        }
        .sanitized()
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RuntimeOptionsWire {
    #[serde(alias = "thread_count", alias = "n_threads")]
    threads: Option<Value>,

    #[serde(alias = "context_size", alias = "n_ctx", alias = "ctx")]
    context: Option<Value>,

    #[serde(alias = "n_batch")]
    batch: Option<Value>,

    #[serde(alias = "n_ubatch")]
    ubatch: Option<Value>,

    #[serde(alias = "n_seq_max")]
    seq_max: Option<Value>,

    #[serde(alias = "gpu_layers")]
    n_gpu_layers: Option<Value>,

    main_gpu: Option<Value>,

    #[serde(rename = "flash_attn", alias = "flash_attention")]
    flash_attention: Option<Value>,

    rope_freq_base: Option<Value>,
    rope_freq_scale: Option<Value>,
    offload_kqv: Option<Value>,
    no_perf: Option<Value>,
    embeddings: Option<Value>,
    kv_unified: Option<Value>,
    use_mmap: Option<Value>,
    use_mlock: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SamplingOptionsWire {
    #[serde(alias = "max_new_tokens")]
    max_tokens: Option<Value>,

    #[serde(alias = "temp")]
    temperature: Option<Value>,

    top_p: Option<Value>,
    top_k: Option<Value>,

    #[serde(alias = "presence_penalty_scale")]
    repeat_penalty: Option<Value>,

    repeat_last_n: Option<Value>,
    frequency_penalty: Option<Value>,
    presence_penalty: Option<Value>,

    #[serde(rename = "stop_sequences", alias = "stop", alias = "stops")]
    stop_sequences: Option<Value>,

    seed: Option<Value>,
}

/// Threads may be a number, the string "auto", or an object split into
/// inference and batch counts.
fn interpret_threads(value: Option<&Value>, fallback: i32) -> (i32, Option<i32>) {
    let fallback = fallback.max(1);
    match value {
        Some(Value::Object(map)) => {
            let inference = ["inference", "decode", "eval", "generation"]
                .iter()
                .find_map(|key| map.get(*key).and_then(json_i32))
                .unwrap_or(fallback);
            let batch = ["batch", "batch_eval", "thread_count_batch"]
                .iter()
                .find_map(|key| map.get(*key).and_then(json_i32))
                .filter(|&v| v > 0);
            (inference.max(1), batch)
        }
        Some(value) => (
            json_i32(value).filter(|&v| v > 0).unwrap_or(fallback),
            None,
        ),
        None => (fallback, None),
    }
}

fn json_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "enabled" | "enable" => Some(true),
            "false" | "0" | "no" | "disabled" | "disable" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_flash_attention(value: &Value) -> Option<FlashAttention> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .and_then(FlashAttention::from_raw),
        Value::Bool(b) => Some(if *b {
            FlashAttention::Enabled
        } else {
            FlashAttention::Disabled
        }),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "auto" => Some(FlashAttention::Auto),
            "enabled" | "enable" | "true" | "on" => Some(FlashAttention::Enabled),
            "disabled" | "disable" | "false" | "off" => Some(FlashAttention::Disabled),
            _ => None,
        },
        _ => None,
    }
}

fn json_stop_sequences(value: &Value) -> Vec<String> {
    match value {
        Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| entry.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_defaults_clamps_to_one() {
        let options = RuntimeOptions::with_defaults(0, -5);
        assert_eq!(options.thread_count, 1);
        assert_eq!(options.context_size, 1);
    }

    #[test]
    fn sanitized_drops_unusable_optionals() {
        let mut options = RuntimeOptions::new(4, 2048);
        options.batch_size = Some(0);
        options.ubatch_size = Some(-1);
        options.n_gpu_layers = Some(-1);
        options.main_gpu = Some(0);
        options.rope_freq_base = Some(-10.0);

        let sanitized = options.sanitized();
        assert_eq!(sanitized.batch_size, None);
        assert_eq!(sanitized.ubatch_size, None);
        assert_eq!(sanitized.n_gpu_layers, None);
        assert_eq!(sanitized.main_gpu, Some(0));
        assert_eq!(sanitized.rope_freq_base, None);
    }

    #[test]
    fn runtime_from_json_accepts_historical_keys() {
        let options = RuntimeOptions::from_json(
            r#"{"n_ctx": 4096, "threads": "auto", "n_batch": 256,
                "flash_attn": "auto", "use_mmap": "yes", "gpu_layers": 20}"#,
            6,
            2048,
        );
        assert_eq!(options.thread_count, 6);
        assert_eq!(options.context_size, 4096);
        assert_eq!(options.batch_size, Some(256));
        assert_eq!(options.flash_attention, Some(FlashAttention::Auto));
        assert_eq!(options.use_mmap, Some(true));
        assert_eq!(options.n_gpu_layers, Some(20));
    }

    #[test]
    fn runtime_from_json_splits_thread_object() {
        let options = RuntimeOptions::from_json(
            r#"{"threads": {"inference": 6, "batch": 8}, "context": 1024}"#,
            2,
            2048,
        );
        assert_eq!(options.thread_count, 6);
        assert_eq!(options.thread_count_batch, Some(8));
        assert_eq!(options.context_size, 1024);
    }

    #[test]
    fn runtime_from_json_falls_back_on_garbage() {
        let options = RuntimeOptions::from_json("not json at all", 3, 512);
        assert_eq!(options, RuntimeOptions::with_defaults(3, 512));

        let options = RuntimeOptions::from_json(r#"{"n_ctx": [1, 2]}"#, 3, 512);
        assert_eq!(options.context_size, 512);
    }

    #[test]
    fn sampling_from_json_accepts_historical_keys() {
        let options = SamplingOptions::from_json(
            r####"{"max_new_tokens": 64, "temp": 0.7, "stop": "###", "seed": 11}"####,
            128,
        );
        assert_eq!(options.max_tokens, 64);
        assert_eq!(options.temperature, Some(0.7));
        assert_eq!(options.stop_sequences, vec!["###".to_string()]);
        assert_eq!(options.seed, Some(11));
    }

    #[test]
    fn sampling_from_json_reads_stop_arrays() {
        let options = SamplingOptions::from_json(r#"{"stops": ["</s>", "", "User:"]}"#, 32);
        assert_eq!(
            options.stop_sequences,
            vec!["</s>".to_string(), "User:".to_string()]
        );
    }

    #[test]
    fn sampling_sanitized_drops_out_of_range_values() {
        let mut options = SamplingOptions::new(-5);
        options.temperature = Some(-1.0);
        options.top_p = Some(1.5);
        options.top_k = Some(0);
        options.repeat_last_n = Some(-1);
        options.frequency_penalty = Some(f32::NAN);
        options.stop_sequences = vec![String::new(), "##".to_string()];

        let sanitized = options.sanitized();
        assert_eq!(sanitized.max_tokens, 0);
        assert_eq!(sanitized.temperature, None);
        assert_eq!(sanitized.top_p, None);
        assert_eq!(sanitized.top_k, None);
        assert_eq!(sanitized.repeat_last_n, None);
        assert_eq!(sanitized.frequency_penalty, None);
        assert_eq!(sanitized.stop_sequences, vec!["##".to_string()]);
    }

    #[test]
    fn sampling_sanitized_keeps_in_range_values() {
        let mut options = SamplingOptions::new(32);
        options.temperature = Some(0.8);
        options.top_p = Some(0.95);
        options.top_k = Some(40);
        options.repeat_penalty = Some(1.1);

        let sanitized = options.sanitized();
        assert_eq!(sanitized, options);
    }
}
