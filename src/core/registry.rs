//! Handle-based registry of beam-search engines.
//!
//! Callers that cannot hold a [`BeamSearch`] directly (host bindings, long-lived
//! services) register it here and refer to it by an opaque
//! [`BeamSearchHandle`]. The handle map is locked only for lookup, insert and
//! removal. Each engine sits behind its own lock, so calls on the same engine
//! are serialized while separate engines step concurrently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::config::BeamSearchConfig;
use super::error::{BeamSearchError, Result};
use crate::generation::{BeamSearch, TokenId};

/// Opaque identifier of a registered engine. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeamSearchHandle(u64);

impl BeamSearchHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BeamSearchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct Instances {
    last_handle: u64,
    engines: HashMap<u64, Arc<Mutex<BeamSearch>>>,
}

/// A thread-safe map from handle to engine.
pub struct BeamSearchRegistry {
    instances: Arc<Mutex<Instances>>,
}

impl BeamSearchRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            instances: Arc::new(Mutex::new(Instances::default())),
        }
    }

    /// Build an engine from `config` and register it.
    pub async fn construct(&self, config: BeamSearchConfig) -> Result<BeamSearchHandle> {
        let engine = BeamSearch::new(config)?;
        Ok(self.register(engine).await)
    }

    /// Hand ownership of an existing engine to the registry.
    pub async fn register(&self, engine: BeamSearch) -> BeamSearchHandle {
        let mut instances = self.instances.lock().await;
        instances.last_handle += 1;
        let handle = instances.last_handle;
        instances.engines.insert(handle, Arc::new(Mutex::new(engine)));
        tracing::debug!(handle, live = instances.engines.len(), "registered beam search");
        BeamSearchHandle(handle)
    }

    /// Run `f` against the engine behind `handle` while holding that engine's lock.
    ///
    /// The registry map is not locked while `f` runs.
    pub async fn with<R, F>(&self, handle: BeamSearchHandle, f: F) -> Result<R>
    where
        F: FnOnce(&mut BeamSearch) -> R,
    {
        let engine = self.engine(handle).await?;
        let mut engine = engine.lock().await;
        Ok(f(&mut engine))
    }

    async fn engine(&self, handle: BeamSearchHandle) -> Result<Arc<Mutex<BeamSearch>>> {
        let instances = self.instances.lock().await;
        instances
            .engines
            .get(&handle.0)
            .cloned()
            .ok_or(BeamSearchError::UnknownHandle(handle.0))
    }

    pub async fn search(
        &self,
        handle: BeamSearchHandle,
        logits: &[f32],
        vocab_size: usize,
    ) -> Result<()> {
        self.with(handle, |engine| engine.search(logits, vocab_size))
            .await?
    }

    pub async fn last_tokens(&self, handle: BeamSearchHandle) -> Result<Vec<TokenId>> {
        self.with(handle, |engine| engine.last_tokens()).await
    }

    pub async fn complete(&self, handle: BeamSearchHandle) -> Result<bool> {
        self.with(handle, |engine| engine.complete()).await
    }

    pub async fn best(&self, handle: BeamSearchHandle) -> Result<Vec<TokenId>> {
        self.with(handle, |engine| engine.best().to_vec()).await
    }

    pub async fn top_beam_ids(&self, handle: BeamSearchHandle) -> Result<Vec<usize>> {
        self.with(handle, |engine| engine.top_beam_ids()).await
    }

    /// Reordered copy of `state`; the caller owns the returned buffer.
    pub async fn reorder_buffer(&self, handle: BeamSearchHandle, state: &[u8]) -> Result<Vec<u8>> {
        self.with(handle, |engine| engine.reorder_state(state))
            .await?
    }

    /// Remove the engine and give it back to the caller.
    ///
    /// A call already holding the engine's lock finishes first.
    pub async fn take(&self, handle: BeamSearchHandle) -> Result<BeamSearch> {
        let engine = {
            let mut instances = self.instances.lock().await;
            instances
                .engines
                .remove(&handle.0)
                .ok_or(BeamSearchError::UnknownHandle(handle.0))?
        };

        match Arc::try_unwrap(engine) {
            Ok(engine) => Ok(engine.into_inner()),
            Err(shared) => {
                // Another call still holds a clone; swap a fresh engine in behind it.
                let mut engine = shared.lock().await;
                let fresh = BeamSearch::new(engine.config().clone())?;
                Ok(std::mem::replace(&mut *engine, fresh))
            }
        }
    }

    /// Drop the engine behind `handle`. Returns `false` if it was not registered.
    pub async fn close(&self, handle: BeamSearchHandle) -> bool {
        let mut instances = self.instances.lock().await;
        let closed = instances.engines.remove(&handle.0).is_some();
        if closed {
            tracing::debug!(handle = handle.0, "closed beam search");
        }
        closed
    }

    /// Drop every registered engine.
    pub async fn clear(&self) {
        let mut instances = self.instances.lock().await;
        instances.engines.clear();
    }

    /// Get the number of registered engines.
    pub async fn len(&self) -> usize {
        let instances = self.instances.lock().await;
        instances.engines.len()
    }

    /// Check if the registry is empty.
    pub async fn is_empty(&self) -> bool {
        let instances = self.instances.lock().await;
        instances.engines.is_empty()
    }
}

impl Default for BeamSearchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global registry instance.
static GLOBAL_REGISTRY: once_cell::sync::Lazy<BeamSearchRegistry> =
    once_cell::sync::Lazy::new(BeamSearchRegistry::new);

/// Get a reference to the process-wide registry.
pub fn global_registry() -> &'static BeamSearchRegistry {
    &GLOBAL_REGISTRY
}
