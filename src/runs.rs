//! Cancellation registry: run identifier → cancellation handle.
//!
//! The only shared mutable state in the crate. Entries are inserted when a
//! run starts and removed when it ends, whatever the outcome; looking up a
//! finished run is "no such run", never an error. The registry is owned by
//! whoever builds the service; there is no global.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    runs: Mutex<HashMap<String, Entry>>,
    generation: AtomicU64,
}

struct Entry {
    generation: u64,
    token: CancellationToken,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and get its RAII guard. Dropping the guard removes
    /// the entry, so every exit path of the run deregisters it.
    /// Registering an identifier that is already present replaces the old
    /// entry; the displaced token is cancelled so its run winds down.
    pub fn register(&self, run_id: impl Into<String>) -> RunGuard {
        let run_id = run_id.into();
        let token = CancellationToken::new();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let displaced = {
            let mut runs = self.inner.runs.lock().expect("run registry lock");
            runs.insert(
                run_id.clone(),
                Entry {
                    generation,
                    token: token.clone(),
                },
            )
        };
        if let Some(old) = displaced {
            debug!(run_id, "replacing an already-registered run");
            old.token.cancel();
        }
        RunGuard {
            registry: Arc::clone(&self.inner),
            run_id,
            generation,
            token,
        }
    }

    /// Cancel a run. `false` means the identifier is unknown: either it
    /// never existed or the run already finished; both are benign.
    pub fn cancel(&self, run_id: &str) -> bool {
        let runs = self.inner.runs.lock().expect("run registry lock");
        match runs.get(run_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, run_id: &str) -> bool {
        let runs = self.inner.runs.lock().expect("run registry lock");
        runs.contains_key(run_id)
    }
}

/// Keeps a run registered for exactly as long as it lives.
pub struct RunGuard {
    registry: Arc<Registry>,
    run_id: String,
    generation: u64,
    token: CancellationToken,
}

impl RunGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut runs = self.registry.runs.lock().expect("run registry lock");
        // A stale guard (displaced by re-registration) must not evict the
        // live entry.
        if runs
            .get(&self.run_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            runs.remove(&self.run_id);
        }
    }
}
