//! Session creation and teardown.
//!
//! A session owns exactly one loaded model, one execution context, and one
//! backend reference. Field order encodes the teardown sequence: the
//! context is freed before the model, the model before the backend
//! reference. Creation rolls back the same way: a failed model load drops
//! only the backend reference, a failed context build drops the model and
//! the backend reference.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::RuntimeOptions;
use crate::engine::backend::{Backend, BackendRef};
use crate::engine::{Context, ContextParams, Model, ModelParams};
use crate::error::{BridgeError, Result};

/// Largest decode batch the bridge asks for when the host leaves the batch
/// size unset.
const DEFAULT_BATCH_SIZE: i32 = 512;

pub(crate) struct Session {
    // Drop order matters: context, then model, then backend reference.
    pub(crate) context: Box<dyn Context>,
    pub(crate) model: Box<dyn Model>,
    _backend: BackendRef,

    pub(crate) model_path: String,
    pub(crate) thread_count: i32,
    pub(crate) thread_count_batch: i32,
    pub(crate) context_size: i32,

    /// Tokens submitted to the engine during the current completion call.
    pub(crate) tokens_processed: i32,
}

impl Session {
    pub(crate) fn create(
        backend: &Arc<Backend>,
        model_path: &str,
        options: &RuntimeOptions,
    ) -> Result<Self> {
        if model_path.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "model path must not be empty".into(),
            ));
        }
        if options.thread_count <= 0 {
            return Err(BridgeError::InvalidArgument(
                "thread count must be positive".into(),
            ));
        }
        if options.context_size <= 0 {
            return Err(BridgeError::InvalidArgument(
                "context size must be positive".into(),
            ));
        }

        let backend_ref = backend.retain();

        let model_params = ModelParams {
            n_gpu_layers: options.n_gpu_layers,
            main_gpu: options.main_gpu,
            use_mmap: options.use_mmap,
            use_mlock: options.use_mlock,
        };
        // An early return below drops the locals in reverse order: the
        // half-built model first, the backend reference last.
        let model = backend
            .engine()
            .load_model(Path::new(model_path), &model_params)?;

        let thread_count_batch = options.thread_count_batch.unwrap_or(options.thread_count);
        let context_params = ContextParams {
            n_ctx: options.context_size as u32,
            n_batch: match options.batch_size {
                Some(batch) => batch.max(1) as u32,
                None => options.context_size.min(DEFAULT_BATCH_SIZE) as u32,
            },
            n_threads: options.thread_count,
            n_threads_batch: thread_count_batch,
            n_ubatch: options.ubatch_size.map(|v| v.max(1) as u32),
            n_seq_max: options.seq_max.map(|v| v.max(1) as u32),
            flash_attention: options.flash_attention,
            rope_freq_base: options.rope_freq_base,
            rope_freq_scale: options.rope_freq_scale,
            offload_kqv: options.offload_kqv,
            no_perf: options.no_perf,
            embeddings: options.embeddings,
            kv_unified: options.kv_unified,
        };
        let context = model.new_context(&context_params)?;

        info!(
            model = model_path,
            threads = options.thread_count,
            ctx = options.context_size,
            "session ready"
        );

        Ok(Session {
            context,
            model,
            _backend: backend_ref,
            model_path: model_path.to_string(),
            thread_count: options.thread_count,
            thread_count_batch,
            context_size: options.context_size,
            tokens_processed: 0,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        info!(model = %self.model_path, "session closed");
    }
}
