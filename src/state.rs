use std::sync::Arc;

use parking_lot::Mutex;

use crate::control::Dispatcher;
use crate::model::manager::SceneManager;
use crate::output::BinaryEmitter;

// ── Application State ──────────────────────────────────────────────

/// Shared state for the two runtime actors. The render loop and the
/// control loop both go through the manager mutex, so a render tick
/// observes a control message's mutations either fully or not at all.
pub struct AppState {
    pub manager: Mutex<SceneManager>,
    pub emitter: Arc<BinaryEmitter>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    #[must_use]
    pub fn new(manager: SceneManager, emitter: Arc<BinaryEmitter>, dispatcher: Dispatcher) -> Self {
        AppState {
            manager: Mutex::new(manager),
            emitter,
            dispatcher,
        }
    }

    /// Read-only access to the manager. Locks the mutex for the duration of `f`.
    pub fn with_manager<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&SceneManager) -> R,
    {
        let guard = self.manager.lock();
        f(&guard)
    }

    /// Mutating access to the manager. Locks the mutex for the duration of `f`.
    pub fn with_manager_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut SceneManager) -> R,
    {
        let mut guard = self.manager.lock();
        f(&mut guard)
    }
}
