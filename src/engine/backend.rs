//! Process-wide engine backend reference count.
//!
//! The engine's global state is initialized once per process and torn down
//! when the last user lets go. Sessions never call [`Engine::init`] or
//! [`Engine::shutdown`] themselves; they hold a [`BackendRef`] and the
//! counter does the rest.

use std::sync::{Arc, Mutex, Once};

use tracing::debug;

use crate::engine::Engine;

/// Reference-counted owner of the engine's global state.
pub struct Backend {
    engine: Arc<dyn Engine>,
    users: Mutex<u32>,
    init: Once,
}

impl Backend {
    pub fn new(engine: Arc<dyn Engine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            users: Mutex::new(0),
            init: Once::new(),
        })
    }

    /// Acquire one backend reference. The first acquisition in the process
    /// lifetime runs the engine's global initialization; a backend that was
    /// fully torn down is not re-initialized.
    pub fn retain(self: &Arc<Self>) -> BackendRef {
        self.init.call_once(|| self.engine.init());

        let mut users = self.users.lock().expect("backend mutex poisoned");
        *users += 1;
        debug!(users = *users, "backend retained");

        BackendRef {
            backend: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut users = self.users.lock().expect("backend mutex poisoned");
        if *users == 0 {
            return;
        }

        *users -= 1;
        debug!(users = *users, "backend released");
        if *users == 0 {
            self.engine.shutdown();
        }
    }

    /// Current number of live references.
    pub fn user_count(&self) -> u32 {
        *self.users.lock().expect("backend mutex poisoned")
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }
}

/// RAII guard for one backend reference. Dropping it releases exactly once.
pub struct BackendRef {
    backend: Arc<Backend>,
}

impl Drop for BackendRef {
    fn drop(&mut self) {
        self.backend.release();
    }
}
