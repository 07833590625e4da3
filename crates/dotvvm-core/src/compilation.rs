//! View compilation and the compiled-view cache.

use crate::error::CompilationError;
use crate::resolver::{ControlTreeResolver, ResolvedTreeRoot};
use crate::types::TypeRegistry;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_VIEW_CACHE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug)]
struct CacheEntry {
    view: Arc<ResolvedTreeRoot>,
    fingerprint: u64,
    bytes: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    bytes: usize,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|existing| existing == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.bytes = self.bytes.saturating_sub(entry.bytes);
        }
        if let Some(pos) = self.order.iter().position(|existing| existing == key) {
            self.order.remove(pos);
        }
    }
}

/// LRU cache of resolved views keyed by virtual path. An entry is only
/// returned while the source it was compiled from is unchanged; the size
/// budget is measured in source bytes.
#[derive(Debug)]
pub struct ViewCache {
    state: Mutex<CacheState>,
    max_bytes: usize,
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new(DEFAULT_VIEW_CACHE_BYTES)
    }
}

impl ViewCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_bytes: max_bytes.max(1),
        }
    }

    pub fn get(&self, virtual_path: &str, source: &str) -> Option<Arc<ResolvedTreeRoot>> {
        let fingerprint = fingerprint(virtual_path, source);
        let mut state = self.state.lock();
        let hit = state
            .entries
            .get(virtual_path)
            .filter(|entry| entry.fingerprint == fingerprint)
            .map(|entry| entry.view.clone());
        if hit.is_some() {
            state.touch(virtual_path);
        }
        hit
    }

    pub fn put(&self, virtual_path: &str, source: &str, view: Arc<ResolvedTreeRoot>) {
        let bytes = source.len();
        let mut state = self.state.lock();
        let entry = CacheEntry {
            view,
            fingerprint: fingerprint(virtual_path, source),
            bytes,
        };
        if let Some(old) = state.entries.insert(virtual_path.to_string(), entry) {
            state.bytes = state.bytes.saturating_sub(old.bytes);
        }
        state.bytes = state.bytes.saturating_add(bytes);
        state.touch(virtual_path);

        while state.bytes > self.max_bytes && state.order.len() > 1 {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if let Some(old) = state.entries.remove(&oldest) {
                state.bytes = state.bytes.saturating_sub(old.bytes);
                debug!(view = %oldest, "evicted compiled view");
            }
        }
    }

    /// Drops the given views, or everything when `virtual_paths` is empty.
    pub fn invalidate(&self, virtual_paths: &[String]) {
        let mut state = self.state.lock();
        if virtual_paths.is_empty() {
            *state = CacheState::default();
            return;
        }
        for path in virtual_paths {
            state.remove(path);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, virtual_path: &str) -> bool {
        self.state.lock().entries.contains_key(virtual_path)
    }
}

fn fingerprint(virtual_path: &str, source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    env!("CARGO_PKG_VERSION").hash(&mut hasher);
    virtual_path.hash(&mut hasher);
    source.hash(&mut hasher);
    hasher.finish()
}

/// Compiles `.dothtml` views through the parser and resolver, caching the
/// resolved trees. Views come from in-memory sources first, then from files
/// under the application path.
#[derive(Debug)]
pub struct ViewCompiler {
    registry: Arc<TypeRegistry>,
    application_path: PathBuf,
    sources: HashMap<String, String>,
    cache: ViewCache,
}

impl ViewCompiler {
    pub fn new(
        registry: Arc<TypeRegistry>,
        application_path: impl Into<PathBuf>,
        sources: HashMap<String, String>,
        cache: ViewCache,
    ) -> Self {
        Self {
            registry,
            application_path: application_path.into(),
            sources,
            cache,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ViewCache {
        &self.cache
    }

    /// Loads and compiles the view at `virtual_path`.
    pub fn compile_view(&self, virtual_path: &str) -> Result<Arc<ResolvedTreeRoot>, CompilationError> {
        let source = self.read_source(virtual_path)?;
        self.compile_source(virtual_path, &source)
    }

    pub fn compile_source(
        &self,
        virtual_path: &str,
        source: &str,
    ) -> Result<Arc<ResolvedTreeRoot>, CompilationError> {
        if let Some(view) = self.cache.get(virtual_path, source) {
            debug!(view = %virtual_path, "view cache hit");
            return Ok(view);
        }
        let view = ControlTreeResolver::new(&self.registry)
            .resolve_source(source)
            .map_err(|source| CompilationError::Resolve {
                path: virtual_path.to_string(),
                source,
            })?;
        let view = Arc::new(view);
        self.cache.put(virtual_path, source, view.clone());
        info!(view = %virtual_path, bytes = source.len(), "compiled view");
        Ok(view)
    }

    pub fn invalidate(&self, virtual_paths: &[String]) {
        self.cache.invalidate(virtual_paths);
    }

    /// Virtual path of a file under the application directory.
    pub fn virtual_path_of(&self, file: &Path) -> Option<String> {
        let relative = file.strip_prefix(&self.application_path).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn read_source(&self, virtual_path: &str) -> Result<String, CompilationError> {
        if let Some(source) = self.sources.get(virtual_path) {
            return Ok(source.clone());
        }
        let relative = sanitize_virtual_path(virtual_path)
            .ok_or_else(|| CompilationError::ViewNotFound(virtual_path.to_string()))?;
        let path = self.application_path.join(relative);
        if !path.is_file() {
            return Err(CompilationError::ViewNotFound(virtual_path.to_string()));
        }
        std::fs::read_to_string(&path).map_err(|source| CompilationError::Read { path, source })
    }
}

/// Relative path for `virtual_path`, rejecting absolute paths and `..`.
fn sanitize_virtual_path(virtual_path: &str) -> Option<PathBuf> {
    let trimmed = virtual_path.trim_start_matches("~/").trim_start_matches('/');
    let path = Path::new(trimmed);
    if trimmed.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(path.to_path_buf())
}
