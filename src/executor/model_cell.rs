//! Single-flight model loading.
//!
//! The cell moves through `Unstarted -> Loading -> Ready`. While loading, the
//! pending load is stored as a [`Shared`] future so every caller awaits the same
//! operation. A failed load puts the cell back to `Unstarted`.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::backend::{ModelLoader, TranslationModel};
use crate::error::{LexError, Result};

type ModelHandle = Arc<dyn TranslationModel>;
type PendingLoad = Shared<BoxFuture<'static, std::result::Result<ModelHandle, String>>>;

enum LoadState {
    Unstarted,
    Loading(PendingLoad),
    Ready(ModelHandle),
}

/// Owns the model handle for the lifetime of an executor
pub struct ModelCell {
    loader: Arc<dyn ModelLoader>,
    state: Mutex<LoadState>,
    loads_started: AtomicUsize,
}

impl ModelCell {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            state: Mutex::new(LoadState::Unstarted),
            loads_started: AtomicUsize::new(0),
        }
    }

    /// Start loading in the background if nothing has started yet.
    /// Returns true when this call started the load.
    pub fn preload(self: &Arc<Self>) -> bool {
        {
            let mut state = self.lock();
            if !matches!(*state, LoadState::Unstarted) {
                return false;
            }
            *state = LoadState::Loading(self.start_load());
        }

        let cell = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = cell.ensure_loaded().await {
                warn!("Background model load failed: {}", e);
            }
        });
        true
    }

    /// Return the loaded model, loading it first or joining the in-flight load
    pub async fn ensure_loaded(&self) -> Result<ModelHandle> {
        let pending = {
            let mut state = self.lock();
            match &*state {
                LoadState::Ready(model) => return Ok(Arc::clone(model)),
                LoadState::Loading(pending) => {
                    debug!("Model load already in flight, waiting for it");
                    pending.clone()
                }
                LoadState::Unstarted => {
                    let pending = self.start_load();
                    *state = LoadState::Loading(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.clone().await;
        self.settle(&pending, &outcome);
        outcome.map_err(LexError::ModelLoad)
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lock(), LoadState::Ready(_))
    }

    /// Number of load operations ever started
    pub fn loads_started(&self) -> usize {
        self.loads_started.load(Ordering::SeqCst)
    }

    fn start_load(&self) -> PendingLoad {
        let attempt = self.loads_started.fetch_add(1, Ordering::SeqCst) + 1;
        let loader = Arc::clone(&self.loader);
        info!("Loading fallback model {} (attempt {})", loader.describe(), attempt);

        async move { loader.load().await.map_err(|e| e.to_string()) }
            .boxed()
            .shared()
    }

    /// Record the outcome of `pending`, unless the state already moved past it
    fn settle(&self, pending: &PendingLoad, outcome: &std::result::Result<ModelHandle, String>) {
        let mut state = self.lock();
        let current = match &*state {
            LoadState::Loading(current) => current.ptr_eq(pending),
            _ => false,
        };
        if !current {
            return;
        }

        *state = match outcome {
            Ok(model) => {
                info!("Fallback model ready");
                LoadState::Ready(Arc::clone(model))
            }
            Err(e) => {
                warn!("Fallback model load failed: {}", e);
                LoadState::Unstarted
            }
        };
    }

    fn lock(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
