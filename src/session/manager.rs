//! Single-session reuse layer.
//!
//! Interactive hosts drive one model at a time but tweak settings between
//! runs. The manager keeps the most recent session alive and only tears it
//! down when the model path or runtime options actually change (or the
//! model file disappears from disk).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::{RuntimeOptions, SamplingOptions};
use crate::error::{BridgeError, Result};
use crate::session::completion::TokenListener;
use crate::session::registry::{SessionHandle, SessionRegistry};

struct Prepared {
    handle: SessionHandle,
    model_path: PathBuf,
    options: RuntimeOptions,
}

/// Keeps at most one prepared session against a registry.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    current: Mutex<Option<Prepared>>,
}

impl SessionManager {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            current: Mutex::new(None),
        }
    }

    /// Return a session for the given model and options, reusing the
    /// current one when nothing changed. Options are sanitized before the
    /// comparison so equivalent configurations reuse the same session.
    pub fn prepare(&self, model_path: &Path, options: &RuntimeOptions) -> Result<SessionHandle> {
        let sanitized = options.sanitized();
        let mut current = self.current.lock().expect("session manager poisoned");

        if let Some(prepared) = current.as_ref() {
            if prepared.model_path == model_path
                && prepared.options == sanitized
                && model_path.exists()
            {
                debug!(session = %prepared.handle, "reusing prepared session");
                return Ok(prepared.handle);
            }
        }

        if let Some(previous) = current.take() {
            self.registry.release(previous.handle);
        }

        let path_str = model_path.to_str().ok_or_else(|| {
            BridgeError::InvalidArgument("model path is not valid UTF-8".into())
        })?;
        let handle = self
            .registry
            .create_session_with_options(path_str, &sanitized)?;

        *current = Some(Prepared {
            handle,
            model_path: model_path.to_path_buf(),
            options: sanitized,
        });
        Ok(handle)
    }

    /// Run a completion against the prepared session.
    pub fn run(
        &self,
        prompt: &str,
        options: &SamplingOptions,
        listener: Option<&mut dyn TokenListener>,
    ) -> Result<String> {
        let handle = self
            .current
            .lock()
            .expect("session manager poisoned")
            .as_ref()
            .map(|prepared| prepared.handle)
            .ok_or(BridgeError::SessionNotReady)?;

        self.registry
            .completion_with_options(handle, prompt, options, listener)
    }

    /// Release the prepared session, if any. Idempotent.
    pub fn release(&self) {
        if let Some(prepared) = self
            .current
            .lock()
            .expect("session manager poisoned")
            .take()
        {
            self.registry.release(prepared.handle);
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}
