//! Site lookup for tours.
//!
//! `SiteDirectory` is the capability exposed by site management.
//! `CachedSiteDirectory` wraps one with a time-based cache; build it once at
//! startup and share it by reference (`Arc`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::services::schedule::SiteMap;
use crate::types::Site;

#[async_trait]
pub trait SiteDirectory: Send + Sync {
    /// `Ok(None)` when the site does not exist
    async fn resolve_stop(&self, id: Uuid) -> Result<Option<Site>>;

    /// Resolve several ids, skipping unknown ones
    async fn resolve_many(&self, ids: &[Uuid]) -> Result<SiteMap> {
        let mut sites = SiteMap::with_capacity(ids.len());
        for &id in ids {
            if sites.contains_key(&id) {
                continue;
            }
            if let Some(site) = self.resolve_stop(id).await? {
                sites.insert(id, site);
            }
        }
        Ok(sites)
    }
}

/// Sites held in memory (plan files, tests)
#[derive(Default)]
pub struct InMemorySiteDirectory {
    sites: HashMap<Uuid, Site>,
}

impl InMemorySiteDirectory {
    pub fn new(sites: impl IntoIterator<Item = Site>) -> Self {
        Self {
            sites: sites.into_iter().map(|s| (s.id, s)).collect(),
        }
    }
}

#[async_trait]
impl SiteDirectory for InMemorySiteDirectory {
    async fn resolve_stop(&self, id: Uuid) -> Result<Option<Site>> {
        Ok(self.sites.get(&id).cloned())
    }
}

struct CacheEntry {
    site: Site,
    fetched_at: Instant,
}

/// Time-based cache in front of another directory.
/// Only found sites are cached; misses always go to the inner directory.
/// Expired entries are dropped on lookup and whenever a site is stored.
pub struct CachedSiteDirectory {
    inner: Arc<dyn SiteDirectory>,
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, CacheEntry>>,
}

impl CachedSiteDirectory {
    pub fn new(inner: Arc<dyn SiteDirectory>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drop one cached site (after it was edited)
    pub fn invalidate(&self, id: &Uuid) {
        self.entries.lock().remove(id);
    }

    fn fresh(&self, id: &Uuid) -> Option<Site> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(id) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => return Some(entry.site.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(id);
        }
        None
    }

    fn store(&self, id: Uuid, site: Site) {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| now.duration_since(entry.fetched_at) < ttl);
        entries.insert(id, CacheEntry { site, fetched_at: now });
    }
}

#[async_trait]
impl SiteDirectory for CachedSiteDirectory {
    async fn resolve_stop(&self, id: Uuid) -> Result<Option<Site>> {
        if let Some(site) = self.fresh(&id) {
            return Ok(Some(site));
        }

        debug!("Site cache miss for {}", id);
        let site = self.inner.resolve_stop(id).await?;
        if let Some(site) = &site {
            self.store(id, site.clone());
        }
        Ok(site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::services::testing::site;

    /// Counts lookups reaching the backing directory
    struct CountingDirectory {
        inner: InMemorySiteDirectory,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl SiteDirectory for CountingDirectory {
        async fn resolve_stop(&self, id: Uuid) -> Result<Option<Site>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve_stop(id).await
        }
    }

    fn counting(sites: Vec<Site>) -> Arc<CountingDirectory> {
        Arc::new(CountingDirectory {
            inner: InMemorySiteDirectory::new(sites),
            lookups: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_in_memory_resolve() {
        let depot = site("Depot", 0);
        let directory = InMemorySiteDirectory::new(vec![depot.clone()]);

        let found = tokio_test::block_on(directory.resolve_stop(depot.id)).unwrap();
        assert_eq!(found.map(|s| s.name), Some("Depot".to_string()));

        let missing = tokio_test::block_on(directory.resolve_stop(Uuid::new_v4())).unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_resolve_many_skips_unknown_and_duplicates() {
        let (a, b) = (site("A", 0), site("B", 1));
        let backing = counting(vec![a.clone(), b.clone()]);

        let map = backing.resolve_many(&[a.id, a.id, b.id, Uuid::new_v4()]).await.unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(backing.lookups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_serves_within_ttl() {
        let depot = site("Depot", 0);
        let backing = counting(vec![depot.clone()]);
        let cache = CachedSiteDirectory::new(backing.clone(), Duration::from_secs(300));

        cache.resolve_stop(depot.id).await.unwrap();
        cache.resolve_stop(depot.id).await.unwrap();

        assert_eq!(backing.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refetches() {
        let depot = site("Depot", 0);
        let backing = counting(vec![depot.clone()]);
        let cache = CachedSiteDirectory::new(backing.clone(), Duration::ZERO);

        cache.resolve_stop(depot.id).await.unwrap();
        cache.resolve_stop(depot.id).await.unwrap();

        assert_eq!(backing.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let depot = site("Depot", 0);
        let backing = counting(vec![depot.clone()]);
        let cache = CachedSiteDirectory::new(backing.clone(), Duration::from_secs(300));

        cache.resolve_stop(depot.id).await.unwrap();
        cache.invalidate(&depot.id);
        cache.resolve_stop(depot.id).await.unwrap();

        assert_eq!(backing.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let (a, b) = (site("A", 0), site("B", 1));
        let backing = counting(vec![a.clone(), b.clone()]);
        let cache = CachedSiteDirectory::new(backing.clone(), Duration::ZERO);

        cache.resolve_stop(a.id).await.unwrap();
        cache.resolve_stop(b.id).await.unwrap();
        // Storing B evicted A
        assert_eq!(cache.entries.lock().len(), 1);
        assert!(!cache.entries.lock().contains_key(&a.id));

        // An expired lookup removes the entry it hit
        assert!(cache.fresh(&b.id).is_none());
        assert!(cache.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_misses_are_not_cached() {
        let backing = counting(vec![]);
        let cache = CachedSiteDirectory::new(backing.clone(), Duration::from_secs(300));
        let id = Uuid::new_v4();

        assert!(cache.resolve_stop(id).await.unwrap().is_none());
        assert!(cache.resolve_stop(id).await.unwrap().is_none());

        assert_eq!(backing.lookups.load(Ordering::SeqCst), 2);
    }
}
