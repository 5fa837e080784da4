//! Memoized concretizations of abstract requests.
//!
//! Entries are keyed by the canonical text of the request. The catalog and
//! policy are fixed for the lifetime of a [`crate::Concretizer`], so equal
//! text always concretizes to the same graph.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use spackle_core::ConcreteSpec;

#[derive(Debug, Default)]
pub struct ConcretizationCache {
    entries: DashMap<String, Arc<ConcreteSpec>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
}

impl ConcretizationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a request, counting the hit or miss.
    pub fn get(&self, key: &str) -> Option<Arc<ConcreteSpec>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(entry.value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a result. If another thread stored one first, that one is
    /// kept and returned.
    pub fn insert(&self, key: String, spec: Arc<ConcreteSpec>) -> Arc<ConcreteSpec> {
        Arc::clone(self.entries.entry(key).or_insert(spec).value())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spackle_core::{CompilerSpec, ConcreteNode, ConcreteSpecBuilder, Version};

    fn single(name: &str) -> Arc<ConcreteSpec> {
        let mut builder = ConcreteSpecBuilder::new();
        builder
            .add_node(ConcreteNode::new(
                name,
                Version::parse("1.0").unwrap(),
                CompilerSpec::parse("gcc@12.2.0").unwrap(),
                "linux",
            ))
            .set_root(name);
        Arc::new(builder.build().unwrap())
    }

    #[test]
    fn counts_hits_and_misses() {
        let cache = ConcretizationCache::new();
        assert!(cache.get("zlib").is_none());
        cache.insert("zlib".into(), single("zlib"));
        assert_eq!(cache.get("zlib").unwrap().root().name, "zlib");
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn first_insert_wins() {
        let cache = ConcretizationCache::new();
        let first = cache.insert("k".into(), single("a"));
        let second = cache.insert("k".into(), single("b"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.root().name, "a");
        assert_eq!(cache.len(), 1);
    }
}
