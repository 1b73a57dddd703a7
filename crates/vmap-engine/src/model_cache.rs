// model_cache.rs — Reference-counted pool of loaded world models
//
// One entry per model file name. Entries are evicted when the last
// reference is released; queries already holding the `Arc<WorldModel>`
// keep the data alive until they finish.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};
use vmap_common::v_shared::ModelFlags;
use vmap_common::vfiles::model_file_path;

use crate::world_model::WorldModel;

struct ManagedModel {
    model: Arc<WorldModel>,
    ref_count: u32,
}

pub struct ModelCache {
    base_path: PathBuf,
    models: Mutex<HashMap<String, ManagedModel>>,
    /// Number of model files parsed from disk so far.
    load_count: AtomicUsize,
}

impl ModelCache {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            models: Mutex::new(HashMap::new()),
            load_count: AtomicUsize::new(0),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Take a reference on `name`, loading `<base>/<name>.vmo` on a miss.
    /// `flags` only apply when this call performs the load.
    pub fn acquire(&self, name: &str, flags: ModelFlags) -> Option<Arc<WorldModel>> {
        let mut models = self.models.lock();

        if let Some(entry) = models.get_mut(name) {
            entry.ref_count += 1;
            return Some(Arc::clone(&entry.model));
        }

        let path = model_file_path(&self.base_path, name);
        let model = match WorldModel::read_file(&path, flags) {
            Ok(m) => Arc::new(m),
            Err(e) => {
                error!("could not load '{}': {}", path.display(), e);
                return None;
            }
        };
        self.load_count.fetch_add(1, Ordering::Relaxed);
        debug!("loaded model file '{}'", path.display());

        models.insert(
            name.to_string(),
            ManagedModel {
                model: Arc::clone(&model),
                ref_count: 1,
            },
        );
        Some(model)
    }

    /// Drop one reference on `name`; the entry is evicted at zero.
    pub fn release(&self, name: &str) {
        let mut models = self.models.lock();

        let Some(entry) = models.get_mut(name) else {
            error!("trying to release model '{}' that is not loaded", name);
            return;
        };

        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            debug!("unloading model '{}'", name);
            models.remove(name);
        }
    }

    /// Acquire wrapped in a guard that releases on drop.
    pub fn acquire_handle(self: &Arc<Self>, name: &str, flags: ModelFlags) -> Option<ModelHandle> {
        let model = self.acquire(name, flags)?;
        Some(ModelHandle {
            cache: Arc::clone(self),
            name: name.to_string(),
            model,
        })
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.models.lock().contains_key(name)
    }

    pub fn ref_count(&self, name: &str) -> u32 {
        self.models.lock().get(name).map_or(0, |e| e.ref_count)
    }

    pub fn loaded_models(&self) -> usize {
        self.models.lock().len()
    }

    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::Relaxed)
    }
}

/// One counted reference on a cached model.
pub struct ModelHandle {
    cache: Arc<ModelCache>,
    name: String,
    model: Arc<WorldModel>,
}

impl ModelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Arc<WorldModel> {
        &self.model
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").field("name", &self.name).finish()
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        self.cache.release(&self.name);
    }
}
