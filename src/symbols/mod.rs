//! Symbols Module
//!
//! Caching for data derived from source files, with cascading invalidation
//! across files that depend on each other.

mod graph;
mod symbol_cache;

pub use graph::DependencyGraph;
pub use symbol_cache::{symbol_key, SymbolCache, SYMBOL_PREFIX};
