//! Scriptable mock engine for bridge tests.
//!
//! The mock records every interaction (init/shutdown, decode calls with
//! positions, sampler stages, accepted tokens) and emits a configured
//! script of text fragments: the n-th sampled token renders as the n-th
//! script entry, and an exhausted script yields the end-of-generation
//! token. Prompt tokenization is positional, one token per whitespace
//! word.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use llama_bridge::engine::{
    Context, ContextParams, Engine, EngineError, Model, ModelParams, SamplerChain, TokenId,
};

pub const EOG_TOKEN: TokenId = 3;
pub const PROMPT_TOKEN_BASE: TokenId = 100;
pub const SCRIPT_TOKEN_BASE: TokenId = 5000;

#[derive(Clone)]
pub struct MockConfig {
    /// Fragments emitted by successive samples, in order.
    pub script: Vec<&'static str>,

    /// BOS token, or `None` to model a vocabulary without one.
    pub bos: Option<TokenId>,

    /// Engine batch limit reported by contexts.
    pub batch_limit: u32,

    pub fail_model_load: bool,
    pub fail_context: bool,

    /// Decode call index (zero-based, successful calls so far) at which
    /// decode reports a non-zero status.
    pub fail_decode_at: Option<usize>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            script: Vec::new(),
            bos: Some(1),
            batch_limit: 8,
            fail_model_load: false,
            fail_context: false,
            fail_decode_at: None,
        }
    }
}

impl MockConfig {
    pub fn scripted(script: Vec<&'static str>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeCall {
    pub tokens: Vec<TokenId>,
    pub first_position: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageRecord {
    Penalties {
        last_n: i32,
        repeat: f32,
        frequency: f32,
        presence: f32,
    },
    TopK(i32),
    TopP {
        p: f32,
        min_keep: usize,
    },
    Temperature(f32),
    Distribution {
        seed: u32,
    },
}

#[derive(Default)]
pub struct MockState {
    pub init_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
    pub models_freed: AtomicUsize,
    pub decode_calls: Mutex<Vec<DecodeCall>>,
    pub stages: Mutex<Vec<StageRecord>>,
    pub accepted: Mutex<Vec<TokenId>>,
    script_pos: Mutex<usize>,
}

impl MockState {
    pub fn decode_calls(&self) -> Vec<DecodeCall> {
        self.decode_calls.lock().unwrap().clone()
    }

    pub fn stages(&self) -> Vec<StageRecord> {
        self.stages.lock().unwrap().clone()
    }

    pub fn accepted(&self) -> Vec<TokenId> {
        self.accepted.lock().unwrap().clone()
    }
}

pub struct MockEngine {
    config: MockConfig,
    pub state: Arc<MockState>,
}

impl MockEngine {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            state: Arc::new(MockState::default()),
        }
    }
}

impl Engine for MockEngine {
    fn init(&self) {
        self.state.init_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.state.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn load_model(
        &self,
        _path: &Path,
        _params: &ModelParams,
    ) -> Result<Box<dyn Model>, EngineError> {
        if self.config.fail_model_load {
            return Err(EngineError::ModelLoad("mock load failure".into()));
        }
        Ok(Box::new(MockModel {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct MockModel {
    config: MockConfig,
    state: Arc<MockState>,
}

impl Drop for MockModel {
    fn drop(&mut self) {
        self.state.models_freed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Model for MockModel {
    fn new_context(&self, _params: &ContextParams) -> Result<Box<dyn Context>, EngineError> {
        if self.config.fail_context {
            return Err(EngineError::ContextCreate("mock context failure".into()));
        }
        Ok(Box::new(MockContext {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }))
    }

    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>, EngineError> {
        Ok(text
            .split_whitespace()
            .enumerate()
            .map(|(index, _)| PROMPT_TOKEN_BASE + index as TokenId)
            .collect())
    }

    fn token_text(&self, token: TokenId) -> Result<String, EngineError> {
        if token >= SCRIPT_TOKEN_BASE {
            let index = (token - SCRIPT_TOKEN_BASE) as usize;
            return self
                .config
                .script
                .get(index)
                .map(|s| s.to_string())
                .ok_or(EngineError::TokenText(token));
        }
        Ok(format!("<tok{token}>"))
    }

    fn bos_token(&self) -> Option<TokenId> {
        self.config.bos
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        token == EOG_TOKEN
    }
}

pub struct MockContext {
    config: MockConfig,
    state: Arc<MockState>,
}

impl Context for MockContext {
    fn batch_limit(&self) -> u32 {
        self.config.batch_limit
    }

    fn set_thread_counts(&mut self, _n_threads: i32, _n_threads_batch: i32) {}

    fn decode(&mut self, tokens: &[TokenId], first_position: i32) -> Result<(), EngineError> {
        let mut calls = self.state.decode_calls.lock().unwrap();
        if self.config.fail_decode_at == Some(calls.len()) {
            return Err(EngineError::Decode { status: 2 });
        }
        calls.push(DecodeCall {
            tokens: tokens.to_vec(),
            first_position,
        });
        Ok(())
    }

    fn new_sampler_chain(&self) -> Result<Box<dyn SamplerChain>, EngineError> {
        Ok(Box::new(MockSamplerChain {
            script_len: self.config.script.len(),
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct MockSamplerChain {
    script_len: usize,
    state: Arc<MockState>,
}

impl SamplerChain for MockSamplerChain {
    fn add_penalties(
        &mut self,
        last_n: i32,
        repeat: f32,
        frequency: f32,
        presence: f32,
    ) -> Result<(), EngineError> {
        self.state.stages.lock().unwrap().push(StageRecord::Penalties {
            last_n,
            repeat,
            frequency,
            presence,
        });
        Ok(())
    }

    fn add_top_k(&mut self, k: i32) -> Result<(), EngineError> {
        self.state.stages.lock().unwrap().push(StageRecord::TopK(k));
        Ok(())
    }

    fn add_top_p(&mut self, p: f32, min_keep: usize) -> Result<(), EngineError> {
        self.state
            .stages
            .lock()
            .unwrap()
            .push(StageRecord::TopP { p, min_keep });
        Ok(())
    }

    fn add_temperature(&mut self, temperature: f32) -> Result<(), EngineError> {
        self.state
            .stages
            .lock()
            .unwrap()
            .push(StageRecord::Temperature(temperature));
        Ok(())
    }

    fn add_distribution(&mut self, seed: u32) -> Result<(), EngineError> {
        self.state
            .stages
            .lock()
            .unwrap()
            .push(StageRecord::Distribution { seed });
        Ok(())
    }

    fn accept(&mut self, token: TokenId) {
        self.state.accepted.lock().unwrap().push(token);
    }

    fn sample(&mut self) -> Result<TokenId, EngineError> {
        let mut pos = self.state.script_pos.lock().unwrap();
        if *pos >= self.script_len {
            return Ok(EOG_TOKEN);
        }
        let token = SCRIPT_TOKEN_BASE + *pos as TokenId;
        *pos += 1;
        Ok(token)
    }
}
