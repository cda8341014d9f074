//! Remembered redirections, keyed by method and source URL.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use strata_transport::Method;
use tracing::trace;
use url::Url;

/// HEAD and GET of the same URL share one entry.
fn cache_method(method: Method) -> Method {
    match method {
        Method::Head => Method::Get,
        other => other,
    }
}

#[derive(Debug, Default)]
pub struct RedirectCache {
    entries: Mutex<HashMap<(Method, String), Url>>,
}

impl RedirectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, method: Method, from: &Url, to: &Url) {
        trace!(target: "strata::request", %from, %to, "caching redirection");
        self.lock()
            .insert((cache_method(method), from.to_string()), to.clone());
    }

    /// Final destination of a cached chain starting at `url`, at most
    /// `max_hops` links long.
    pub fn resolve(&self, method: Method, url: &Url, max_hops: u32) -> Option<Url> {
        let entries = self.lock();
        let method = cache_method(method);
        let mut current = entries.get(&(method, url.to_string()))?;
        for _ in 1..max_hops {
            match entries.get(&(method, current.to_string())) {
                Some(next) if next != url => current = next,
                _ => break,
            }
        }
        Some(current.clone())
    }

    /// Forget the chain starting at `url`.
    pub fn remove(&self, method: Method, url: &Url) {
        let mut entries = self.lock();
        let method = cache_method(method);
        let mut key = url.to_string();
        let mut hops = 0;
        while let Some(next) = entries.remove(&(method, key)) {
            hops += 1;
            if hops > 64 {
                break;
            }
            key = next.to_string();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Method, String), Url>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_resolve_follows_chain() {
        let cache = RedirectCache::new();
        cache.insert(Method::Get, &url("http://a/f"), &url("http://b/f"));
        cache.insert(Method::Get, &url("http://b/f"), &url("http://c/f"));
        assert_eq!(
            cache.resolve(Method::Head, &url("http://a/f"), 10),
            Some(url("http://c/f"))
        );
        assert_eq!(
            cache.resolve(Method::Get, &url("http://a/f"), 1),
            Some(url("http://b/f"))
        );
        assert_eq!(cache.resolve(Method::Put, &url("http://a/f"), 10), None);
    }

    #[test]
    fn test_resolve_stops_on_loop() {
        let cache = RedirectCache::new();
        cache.insert(Method::Get, &url("http://a/f"), &url("http://b/f"));
        cache.insert(Method::Get, &url("http://b/f"), &url("http://a/f"));
        assert_eq!(
            cache.resolve(Method::Get, &url("http://a/f"), 10),
            Some(url("http://b/f"))
        );
    }

    #[test]
    fn test_remove_chain() {
        let cache = RedirectCache::new();
        cache.insert(Method::Get, &url("http://a/f"), &url("http://b/f"));
        cache.insert(Method::Get, &url("http://b/f"), &url("http://c/f"));
        cache.insert(Method::Put, &url("http://a/f"), &url("http://d/f"));
        cache.remove(Method::Head, &url("http://a/f"));
        assert_eq!(cache.len(), 1);
        assert!(cache.resolve(Method::Get, &url("http://a/f"), 10).is_none());
    }
}
