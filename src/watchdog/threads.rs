// src/watchdog/threads.rs

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, warn};

/// Join handles of every supervised worker thread.
///
/// Liveness is read from [`JoinHandle::is_finished`], so a hung thread can
/// never report itself as stopped. Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct ThreadRegistry {
    threads: Arc<Mutex<HashMap<ThreadId, JoinHandle<()>>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a named thread and register it.
    pub fn spawn<F>(&self, name: impl Into<String>, f: F) -> io::Result<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.into()).spawn(f)?;
        Ok(self.register(handle))
    }

    /// Register an already spawned thread.
    pub fn register(&self, handle: JoinHandle<()>) -> ThreadId {
        let id = handle.thread().id();
        self.lock().insert(id, handle);
        id
    }

    /// `true` if `id` is registered and has not finished.
    pub fn is_alive(&self, id: ThreadId) -> bool {
        self.lock().get(&id).is_some_and(|h| !h.is_finished())
    }

    /// `true` if any registered thread has not finished.
    pub fn any_alive(&self) -> bool {
        self.lock().values().any(|h| !h.is_finished())
    }

    pub fn alive_count(&self) -> usize {
        self.lock().values().filter(|h| !h.is_finished()).count()
    }

    /// Join and forget every thread that has finished. Returns how many were
    /// reaped.
    pub fn reap(&self) -> usize {
        let finished: Vec<JoinHandle<()>> = {
            let mut threads = self.lock();
            let ids: Vec<ThreadId> = threads
                .iter()
                .filter(|(_, h)| h.is_finished())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| threads.remove(&id)).collect()
        };

        let count = finished.len();
        for handle in finished {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "worker thread panicked");
            } else {
                debug!(thread = %name, "worker thread reaped");
            }
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ThreadId, JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
