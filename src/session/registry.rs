//! Handle registry: the bridge operations the host calls.
//!
//! Sessions live behind opaque `u64` handles allocated from a counter;
//! a handle is only ever a lookup key, never an address. The registry
//! mutex guards the map alone; each session carries its own lock so that
//! creating or releasing one session never waits on another's generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::{RuntimeOptions, SamplingOptions};
use crate::engine::backend::Backend;
use crate::engine::Engine;
use crate::error::{BridgeError, Result};
use crate::session::completion::{self, TokenListener};
use crate::session::lifecycle::Session;

/// Opaque session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns the backend and every live session.
pub struct SessionRegistry {
    backend: Arc<Backend>,
    sessions: Mutex<HashMap<u64, Arc<Mutex<Session>>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            backend: Backend::new(engine),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a session with every tunable left at the engine default.
    pub fn create_session(
        &self,
        model_path: &str,
        thread_count: i32,
        context_size: i32,
    ) -> Result<SessionHandle> {
        self.create_session_with_options(model_path, &RuntimeOptions::new(thread_count, context_size))
    }

    /// Create a session from a full set of runtime options.
    pub fn create_session_with_options(
        &self,
        model_path: &str,
        options: &RuntimeOptions,
    ) -> Result<SessionHandle> {
        let session = Session::create(&self.backend, model_path, options)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .insert(id, Arc::new(Mutex::new(session)));

        let handle = SessionHandle(id);
        info!(session = %handle, model = model_path, "session registered");
        Ok(handle)
    }

    /// Run a completion with default sampling options.
    pub fn completion(
        &self,
        handle: SessionHandle,
        prompt: &str,
        max_tokens: i32,
        listener: Option<&mut dyn TokenListener>,
    ) -> Result<String> {
        self.completion_with_options(handle, prompt, &SamplingOptions::new(max_tokens), listener)
    }

    /// Run a fully parameterized completion. Options are sanitized before
    /// anything touches the engine.
    pub fn completion_with_options(
        &self,
        handle: SessionHandle,
        prompt: &str,
        options: &SamplingOptions,
        listener: Option<&mut dyn TokenListener>,
    ) -> Result<String> {
        let session = self.get(handle)?;
        let mut session = session.lock().expect("session mutex poisoned");
        completion::run(&mut session, prompt, &options.sanitized(), listener)
    }

    /// Release a session. Safe to call with a stale or unknown handle;
    /// repeated releases are no-ops. Freeing happens once the last borrow
    /// of the session is gone: context first, then model, then the backend
    /// reference.
    pub fn release(&self, handle: SessionHandle) {
        let removed = self
            .sessions
            .lock()
            .expect("session registry poisoned")
            .remove(&handle.id());

        match removed {
            Some(session) => {
                info!(session = %handle, "session released");
                drop(session);
            }
            None => warn!(session = %handle, "release of unknown session ignored"),
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .len()
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    fn get(&self, handle: SessionHandle) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .get(&handle.id())
            .cloned()
            .ok_or(BridgeError::SessionNotFound)
    }
}
