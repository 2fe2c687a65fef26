//! Symbol Cache
//!
//! Source-derived data cached per file, with an optional in-process artifact
//! (a parse tree, say) that never leaves memory. Editing the file, or anything
//! it depends on, invalidates both.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::DependencyGraph;
use crate::cache::{AdaptiveCache, CacheValue, WeakAdaptiveCache};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::events::{CacheEvent, CacheObserver};

pub const SYMBOL_PREFIX: &str = "symbols:";

/// Cache key for a file's symbols.
pub fn symbol_key(path: &Path) -> String {
    format!("{}{}", SYMBOL_PREFIX, path.display())
}

fn symbol_path(key: &str) -> Option<&Path> {
    key.strip_prefix(SYMBOL_PREFIX).map(Path::new)
}

// == Shared State ==
/// Artifacts and edges. Holds no reference to the cache so the observer
/// registered on it does not keep it alive.
struct SymbolState<A> {
    artifacts: Mutex<HashMap<PathBuf, A>>,
    graph: Mutex<DependencyGraph>,
}

impl<A> SymbolState<A> {
    fn drop_artifact(&self, key: &str) {
        if let Some(path) = symbol_path(key) {
            self.artifacts.lock().remove(path);
        }
    }

    fn invalidate_dependents<S: CacheValue>(&self, cache: &AdaptiveCache<S>, key: &str) -> Vec<String> {
        let dependents = self.graph.lock().transitive_dependents(key);
        for dependent in &dependents {
            cache.delete(dependent);
            self.drop_artifact(dependent);
        }
        if !dependents.is_empty() {
            info!(key, count = dependents.len(), "Invalidated dependents");
        }
        dependents
    }
}

struct SymbolObserver<S, A> {
    cache: WeakAdaptiveCache<S>,
    state: Arc<SymbolState<A>>,
}

impl<S, A> CacheObserver for SymbolObserver<S, A>
where
    S: CacheValue,
    A: Send + Sync + 'static,
{
    fn on_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::FileChanged { key, .. } => {
                self.state.drop_artifact(key);
                if let Some(cache) = self.cache.upgrade() {
                    self.state.invalidate_dependents(&cache, key);
                }
            }
            CacheEvent::Eviction { key, .. } => self.state.drop_artifact(key),
            _ => {}
        }
    }
}

// == Symbol Cache ==
pub struct SymbolCache<S, A> {
    cache: AdaptiveCache<S>,
    state: Arc<SymbolState<A>>,
}

impl<S, A> SymbolCache<S, A>
where
    S: CacheValue,
    A: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Result<Self> {
        AdaptiveCache::new(config).map(Self::from_cache)
    }

    /// Wraps an existing cache and subscribes to its invalidations.
    pub fn from_cache(cache: AdaptiveCache<S>) -> Self {
        let state = Arc::new(SymbolState {
            artifacts: Mutex::new(HashMap::new()),
            graph: Mutex::new(DependencyGraph::new()),
        });
        cache.add_observer(Arc::new(SymbolObserver {
            cache: cache.downgrade(),
            state: state.clone(),
        }));
        Self { cache, state }
    }

    pub fn cache(&self) -> &AdaptiveCache<S> {
        &self.cache
    }

    // == Cache Symbol ==
    /// Stores `data` for `path` and watches the file.
    ///
    /// Replaces any previous artifact for the path, dropping it when
    /// `artifact` is None. A failed watch is reported through the event bus
    /// and does not fail the call.
    ///
    /// # Returns
    /// The cache key the data was stored under.
    pub fn cache_symbol(&self, path: impl AsRef<Path>, data: S, artifact: Option<A>) -> String {
        let path = path.as_ref();
        let key = symbol_key(path);
        self.cache.set(key.clone(), data, None);

        {
            let mut artifacts = self.state.artifacts.lock();
            match artifact {
                Some(artifact) => artifacts.insert(path.to_path_buf(), artifact),
                None => artifacts.remove(path),
            };
        }

        if let Err(e) = self.cache.watch_file(path, Some(&key)) {
            debug!(key = %key, error = %e, "Symbols cached without file watch");
        }
        key
    }

    pub async fn get_symbols(&self, path: impl AsRef<Path>) -> Option<S> {
        self.cache.get(&symbol_key(path.as_ref())).await
    }

    /// The artifact for `path`, only while its symbols are still cached.
    pub fn get_artifact(&self, path: impl AsRef<Path>) -> Option<A> {
        let path = path.as_ref();
        let key = symbol_key(path);
        if !self.cache.has(&key) {
            self.state.artifacts.lock().remove(path);
            return None;
        }
        self.state.artifacts.lock().get(path).cloned()
    }

    /// Records that `dependent`'s value was derived from `dependency`'s.
    pub fn add_dependency(&self, dependent: &str, dependency: &str) {
        self.state.graph.lock().add_dependency(dependent, dependency);
    }

    pub fn remove_dependency(&self, dependent: &str, dependency: &str) -> bool {
        self.state.graph.lock().remove_dependency(dependent, dependency)
    }

    pub fn dependencies_of(&self, key: &str) -> Vec<String> {
        self.state.graph.lock().dependencies_of(key)
    }

    // == Invalidate Dependents ==
    /// Deletes every key that transitively depends on `key`, along with any
    /// artifacts. `key` itself is kept. Edges are kept so a re-cached value
    /// cascades again.
    ///
    /// # Returns
    /// The invalidated keys, nearest first.
    pub fn invalidate_dependents(&self, key: &str) -> Vec<String> {
        self.state.invalidate_dependents(&self.cache, key)
    }

    /// Drops a file's symbols and artifact, then cascades to dependents.
    pub fn invalidate_file(&self, path: impl AsRef<Path>) -> Vec<String> {
        let key = symbol_key(path.as_ref());
        self.cache.delete(&key);
        self.state.drop_artifact(&key);
        self.invalidate_dependents(&key)
    }

    /// Empties the cache and artifacts. Edges are kept.
    pub fn clear(&self) {
        self.cache.clear();
        self.state.artifacts.lock().clear();
    }

    pub fn destroy(&self) {
        self.cache.destroy();
        self.state.artifacts.lock().clear();
        self.state.graph.lock().clear();
    }
}

impl<S, A> Clone for SymbolCache<S, A> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            state: self.state.clone(),
        }
    }
}
