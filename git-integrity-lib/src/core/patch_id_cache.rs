//! Bounded memoization of patch id computations. Computing a patch id spawns
//! a `git show | git patch-id` pipeline, which is by far the most expensive
//! per-commit step of an audit, and the same commit is frequently seen both on
//! the branch and in one or more pull request ranges.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, instrument};

use crate::git::Repo;

/// Default maximum number of cached entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000_000;

/// A concurrency-safe mapping from commit hash to patch id, capped at a
/// configured number of entries.
///
/// The cache is a pure memoization of an idempotent computation, so eviction
/// never affects correctness. When the cache is full, a tenth of its capacity
/// is evicted in arbitrary order; there is no recency signal.
///
/// Empty patch ids are never stored: the empty string is the miss sentinel,
/// and callers substitute the commit hash at their own layer.
pub struct PatchIdCache {
    capacity: usize,
    entries: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for PatchIdCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchIdCache")
            .field("capacity", &self.capacity)
            .field(
                "len",
                &match self.entries.try_read() {
                    Ok(entries) => entries.len().to_string(),
                    Err(_) => "<could not determine>".to_string(),
                },
            )
            .finish()
    }
}

impl PatchIdCache {
    /// Construct a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        PatchIdCache {
            capacity,
            entries: Default::default(),
        }
    }

    /// Look up a cached patch id. Readers may proceed in parallel.
    pub fn get(&self, oid: &str) -> Option<String> {
        let entries = self.entries.read().expect("Poisoned lock for PatchIdCache");
        entries.get(oid).cloned()
    }

    /// Insert a computed patch id, evicting a tenth of the cache first if it
    /// is at capacity. Empty values are not stored.
    pub fn insert(&self, oid: String, patch_id: String) {
        if patch_id.is_empty() {
            return;
        }
        let mut entries = self
            .entries
            .write()
            .expect("Poisoned lock for PatchIdCache");
        if entries.len() >= self.capacity {
            let num_to_evict = (self.capacity / 10).max(1);
            debug!(
                len = entries.len(),
                num_to_evict, "patch id cache at capacity; evicting"
            );
            let doomed: Vec<String> = entries.keys().take(num_to_evict).cloned().collect();
            for key in doomed {
                entries.remove(&key);
            }
        }
        entries.insert(oid, patch_id);
    }

    /// The current number of cached entries.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().expect("Poisoned lock for PatchIdCache");
        entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached patch id for `oid`, or compute it via the repository
    /// and cache the result. An empty result is returned as-is and not
    /// cached.
    #[instrument(skip(self, repo))]
    pub fn lookup_or_compute(&self, repo: &Repo, oid: &str) -> eyre::Result<String> {
        if let Some(patch_id) = self.get(oid) {
            return Ok(patch_id);
        }
        let patch_id = repo.patch_id(oid)?;
        self.insert(oid.to_string(), patch_id.clone());
        Ok(patch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::Repo;
    use crate::testing::make_git;

    fn fake_oid(index: usize) -> String {
        format!("{index:040x}")
    }

    #[test]
    fn test_cache_bound_and_eviction_count() {
        let cache = PatchIdCache::new(100);
        for index in 0..100 {
            cache.insert(fake_oid(index), format!("patch-{index}"));
        }
        assert_eq!(cache.len(), 100);

        // The next insertion triggers the eviction of a tenth of the cache.
        cache.insert(fake_oid(100), "patch-100".to_string());
        assert_eq!(cache.len(), 100 - 10 + 1);
        assert_eq!(cache.get(&fake_oid(100)).as_deref(), Some("patch-100"));

        for index in 101..300 {
            cache.insert(fake_oid(index), format!("patch-{index}"));
            assert!(cache.len() <= 100);
        }
    }

    #[test]
    fn test_cache_never_stores_empty_values() {
        let cache = PatchIdCache::new(10);
        cache.insert(fake_oid(0), String::new());
        assert!(cache.is_empty());
        assert_eq!(cache.get(&fake_oid(0)), None);
    }

    #[test]
    fn test_cache_concurrent_readers_and_writers() {
        let cache = PatchIdCache::new(1000);
        crossbeam::thread::scope(|scope| {
            for thread_index in 0..8 {
                let cache = &cache;
                scope.spawn(move |_| {
                    for index in 0..100 {
                        let oid = fake_oid(thread_index * 100 + index);
                        cache.insert(oid.clone(), format!("patch-{index}"));
                        assert!(cache.get(&oid).is_some());
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(cache.len(), 800);
    }

    #[test]
    fn test_lookup_or_compute_is_idempotent_and_hits_cache() -> eyre::Result<()> {
        let git = make_git()?;
        git.init_repo()?;
        let oid = git.commit_file("change", 1)?;

        let repo = Repo::from_existing(git.git_run_info(), &git.repo_path);
        let cache = PatchIdCache::new(10);

        let first = cache.lookup_or_compute(&repo, &oid)?;
        assert!(!first.is_empty());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&oid).as_deref(), Some(first.as_str()));

        let second = cache.lookup_or_compute(&repo, &oid)?;
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        Ok(())
    }
}
