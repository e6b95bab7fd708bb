//! Stub engine shaped after llama.cpp.
//!
//! The real implementation binds the C library compiled by build.rs. Until
//! that lands, this module simulates the engine so the bridge can be
//! exercised end to end: a word-level tokenizer backed by an interning
//! vocabulary, a context that tracks decoded positions, and a sampler chain
//! that applies its configured stages over synthetic logits. Comments note
//! the llama.cpp entry point each piece stands in for.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::engine::{
    Context, ContextParams, Engine, EngineError, Model, ModelParams, SamplerChain, TokenId,
};

const BOS_TOKEN: TokenId = 1;
const EOS_TOKEN: TokenId = 2;
const FIRST_WORD_TOKEN: TokenId = 16;

/// Stub engine entry point.
#[derive(Default)]
pub struct LlamaEngine;

impl Engine for LlamaEngine {
    fn init(&self) {
        // Real implementation: ggml_backend_load_all() + llama_backend_init().
        debug!("engine backend initialized");
    }

    fn shutdown(&self) {
        // Real implementation: llama_backend_free().
        debug!("engine backend freed");
    }

    fn load_model(
        &self,
        path: &Path,
        params: &ModelParams,
    ) -> Result<Box<dyn Model>, EngineError> {
        // Real implementation: llama_model_load_from_file().
        if !path.is_file() {
            return Err(EngineError::ModelLoad(format!(
                "file not found: {}",
                path.display()
            )));
        }

        debug!(
            model = %path.display(),
            n_gpu_layers = ?params.n_gpu_layers,
            use_mmap = ?params.use_mmap,
            "model loaded"
        );
        Ok(Box::new(LlamaModel {
            vocab: Arc::new(Vocab::default()),
        }))
    }
}

/// Interning word vocabulary standing in for the model's real one.
#[derive(Default)]
struct Vocab {
    inner: Mutex<VocabInner>,
}

#[derive(Default)]
struct VocabInner {
    ids: HashMap<String, TokenId>,
    words: Vec<String>,
}

impl Vocab {
    fn intern(&self, word: &str) -> TokenId {
        let mut inner = self.inner.lock().expect("vocab mutex poisoned");
        if let Some(&id) = inner.ids.get(word) {
            return id;
        }
        let id = FIRST_WORD_TOKEN + inner.words.len() as TokenId;
        inner.ids.insert(word.to_string(), id);
        inner.words.push(word.to_string());
        id
    }

    fn text(&self, token: TokenId) -> Option<String> {
        if token == BOS_TOKEN || token == EOS_TOKEN {
            return Some(String::new());
        }
        let inner = self.inner.lock().expect("vocab mutex poisoned");
        let index = usize::try_from(token - FIRST_WORD_TOKEN).ok()?;
        inner.words.get(index).map(|word| format!(" {word}"))
    }

    fn word_tokens(&self) -> Vec<TokenId> {
        let inner = self.inner.lock().expect("vocab mutex poisoned");
        (0..inner.words.len())
            .map(|index| FIRST_WORD_TOKEN + index as TokenId)
            .collect()
    }
}

struct LlamaModel {
    vocab: Arc<Vocab>,
}

impl Model for LlamaModel {
    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn Context>, EngineError> {
        // Real implementation: llama_init_from_model().
        if params.n_ctx == 0 {
            return Err(EngineError::ContextCreate(
                "context size must be positive".into(),
            ));
        }
        Ok(Box::new(LlamaContext {
            vocab: Arc::clone(&self.vocab),
            n_batch: params.n_batch.max(1),
            position: 0,
        }))
    }

    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>, EngineError> {
        // Real implementation: llama_tokenize() against the model vocabulary.
        Ok(text
            .split_whitespace()
            .map(|word| self.vocab.intern(word))
            .collect())
    }

    fn token_text(&self, token: TokenId) -> Result<String, EngineError> {
        // Real implementation: llama_token_to_piece().
        self.vocab.text(token).ok_or(EngineError::TokenText(token))
    }

    fn bos_token(&self) -> Option<TokenId> {
        Some(BOS_TOKEN)
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        // Real implementation: llama_vocab_is_eog().
        token == EOS_TOKEN
    }
}

struct LlamaContext {
    vocab: Arc<Vocab>,
    n_batch: u32,
    position: i32,
}

impl Context for LlamaContext {
    fn batch_limit(&self) -> u32 {
        self.n_batch
    }

    fn set_thread_counts(&mut self, _n_threads: i32, _n_threads_batch: i32) {
        // Real implementation: llama_set_n_threads().
    }

    fn decode(&mut self, tokens: &[TokenId], first_position: i32) -> Result<(), EngineError> {
        // Real implementation: llama_batch_get_one() + llama_decode().
        if tokens.is_empty() || tokens.len() as u64 > u64::from(self.n_batch) {
            return Err(EngineError::Decode { status: 1 });
        }
        self.position = first_position + tokens.len() as i32;
        debug!(n_tokens = tokens.len(), position = self.position, "decoded batch");
        Ok(())
    }

    fn new_sampler_chain(&self) -> Result<Box<dyn SamplerChain>, EngineError> {
        // Real implementation: llama_sampler_chain_init() bound to this
        // context for logits access.
        Ok(Box::new(LlamaSamplerChain {
            vocab: Arc::clone(&self.vocab),
            stages: Vec::new(),
            recent: Vec::new(),
            rng: 0,
        }))
    }
}

enum Stage {
    Penalties {
        last_n: i32,
        repeat: f32,
        frequency: f32,
        presence: f32,
    },
    TopK(i32),
    TopP(f32),
    Temperature(f32),
}

struct LlamaSamplerChain {
    vocab: Arc<Vocab>,
    stages: Vec<Stage>,
    recent: Vec<TokenId>,
    rng: u64,
}

impl SamplerChain for LlamaSamplerChain {
    fn add_penalties(
        &mut self,
        last_n: i32,
        repeat: f32,
        frequency: f32,
        presence: f32,
    ) -> Result<(), EngineError> {
        // Real implementation: llama_sampler_init_penalties() + chain add.
        self.stages.push(Stage::Penalties {
            last_n,
            repeat,
            frequency,
            presence,
        });
        Ok(())
    }

    fn add_top_k(&mut self, k: i32) -> Result<(), EngineError> {
        self.stages.push(Stage::TopK(k));
        Ok(())
    }

    fn add_top_p(&mut self, p: f32, _min_keep: usize) -> Result<(), EngineError> {
        self.stages.push(Stage::TopP(p));
        Ok(())
    }

    fn add_temperature(&mut self, temperature: f32) -> Result<(), EngineError> {
        self.stages.push(Stage::Temperature(temperature));
        Ok(())
    }

    fn add_distribution(&mut self, seed: u32) -> Result<(), EngineError> {
        // Real implementation: llama_sampler_init_dist().
        self.rng = u64::from(seed);
        Ok(())
    }

    fn accept(&mut self, token: TokenId) {
        // Real implementation: llama_sampler_accept(); here only the
        // penalty window needs the history.
        self.recent.push(token);
    }

    fn sample(&mut self) -> Result<TokenId, EngineError> {
        let candidates = self.vocab.word_tokens();
        if candidates.is_empty() {
            return Ok(EOS_TOKEN);
        }

        // Synthetic logits, stable for a given (rng state, token) pair.
        let mut scored: Vec<(TokenId, f32)> = candidates
            .iter()
            .map(|&id| {
                let h = splitmix64(self.rng ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
                (id, (h >> 40) as f32 / (1u64 << 24) as f32)
            })
            .collect();

        for stage in &self.stages {
            match *stage {
                Stage::Penalties {
                    last_n,
                    repeat,
                    frequency,
                    presence,
                } => {
                    if last_n == 0 {
                        continue;
                    }
                    let window_start = if last_n < 0 {
                        0
                    } else {
                        self.recent.len().saturating_sub(last_n as usize)
                    };
                    let window = &self.recent[window_start..];
                    for (id, score) in scored.iter_mut() {
                        let count = window.iter().filter(|&&t| t == *id).count();
                        if count > 0 {
                            if repeat > 1.0 {
                                *score /= repeat;
                            }
                            *score -= frequency * count as f32 + presence;
                        }
                    }
                }
                Stage::TopK(k) => {
                    sort_by_score(&mut scored);
                    scored.truncate((k.max(1)) as usize);
                }
                Stage::TopP(p) => {
                    sort_by_score(&mut scored);
                    let total: f32 = scored.iter().map(|(_, s)| s.max(0.0)).sum();
                    if total > 0.0 {
                        let mut cumulative = 0.0;
                        let mut keep = scored.len();
                        for (index, (_, score)) in scored.iter().enumerate() {
                            cumulative += score.max(0.0) / total;
                            if cumulative >= p {
                                keep = index + 1;
                                break;
                            }
                        }
                        scored.truncate(keep.max(1));
                    }
                }
                Stage::Temperature(t) => {
                    if t > 0.0 {
                        for (_, score) in scored.iter_mut() {
                            *score = score.max(0.0).powf(1.0 / t);
                        }
                    } else {
                        sort_by_score(&mut scored);
                        scored.truncate(1);
                    }
                }
            }
        }

        self.rng = splitmix64(self.rng);
        let total: f32 = scored.iter().map(|(_, s)| s.max(0.0)).sum();
        if total <= 0.0 {
            sort_by_score(&mut scored);
            return Ok(scored[0].0);
        }

        let mut target = (self.rng >> 11) as f32 / (1u64 << 53) as f32 * total;
        for (id, score) in &scored {
            target -= score.max(0.0);
            if target <= 0.0 {
                return Ok(*id);
            }
        }
        Ok(scored[scored.len() - 1].0)
    }
}

fn sort_by_score(scored: &mut [(TokenId, f32)]) {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
