//! Mutex-guarded session cache keyed by endpoint and session settings.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};
use url::Url;

use crate::error::Result;
use crate::session::{Session, SessionFactory, SessionKey, SessionOptions};

/// Idle sessions kept per endpoint before extras are dropped.
const MAX_IDLE_PER_KEY: usize = 16;

/// Sessions carry their TLS and timeout settings, so they are only shared
/// between requests asking for the same ones.
type IdleKey = (SessionKey, SessionOptions);
type IdleMap = HashMap<IdleKey, Vec<Box<dyn Session>>>;

struct Inner {
    factory: Arc<dyn SessionFactory>,
    idle: Mutex<IdleMap>,
}

/// Shared cache of idle sessions.
///
/// Cloning is cheap and every clone sees the same cache.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                idle: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Take an idle session for `url`'s endpoint opened with the same
    /// `options`, or open a new one.
    pub fn acquire(&self, url: &Url, options: &SessionOptions) -> Result<PooledSession> {
        let key = SessionKey::from_url(url)?;
        let idle_key = (key, options.clone());
        let cached = self
            .lock()
            .get_mut(&idle_key)
            .and_then(|sessions| sessions.pop());
        let (key, options) = idle_key;

        let session = match cached {
            Some(session) => {
                trace!(target: "strata::transport", %key, "reusing pooled session");
                session
            }
            None => {
                debug!(target: "strata::transport", %key, "opening new session");
                self.inner.factory.create_session(&key, &options)?
            }
        };

        Ok(PooledSession {
            session: Some(session),
            key,
            options,
            pool: self.clone(),
            reusable: false,
        })
    }

    /// Number of idle sessions across all endpoints.
    pub fn idle_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn release(&self, key: IdleKey, session: Box<dyn Session>) {
        let mut idle = self.lock();
        let sessions = idle.entry(key).or_default();
        if sessions.len() < MAX_IDLE_PER_KEY {
            sessions.push(session);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IdleMap> {
        // A panic while holding the lock leaves only idle sessions behind.
        self.inner
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A session checked out of the pool.
///
/// It goes back to the pool on drop only if [`mark_reusable`](Self::mark_reusable)
/// was called, meaning the last response was fully consumed.
pub struct PooledSession {
    session: Option<Box<dyn Session>>,
    key: SessionKey,
    options: SessionOptions,
    pool: SessionPool,
    reusable: bool,
}

impl PooledSession {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn mark_reusable(&mut self) {
        self.reusable = true;
    }
}

impl Deref for PooledSession {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        match &self.session {
            Some(s) => s.as_ref(),
            None => unreachable!("session taken before drop"),
        }
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.session {
            Some(s) => s.as_mut(),
            None => unreachable!("session taken before drop"),
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if self.reusable {
                let key = (self.key.clone(), self.options.clone());
                self.pool.release(key, session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::RequestSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSession;

    impl Session for NullSession {
        fn start_request(&mut self, _request: &RequestSpec) -> Result<()> {
            Ok(())
        }
        fn status_code(&self) -> u16 {
            200
        }
        fn answer_header(&self, _name: &str) -> Option<String> {
            None
        }
        fn answer_headers(&self) -> Vec<(String, String)> {
            Vec::new()
        }
        fn read_block(&mut self, _buf: &mut [u8]) -> std::result::Result<usize, Error> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        verify_tls: Mutex<Vec<bool>>,
    }

    impl SessionFactory for CountingFactory {
        fn create_session(
            &self,
            _key: &SessionKey,
            options: &SessionOptions,
        ) -> Result<Box<dyn Session>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.verify_tls.lock().unwrap().push(options.verify_tls);
            Ok(Box::new(NullSession))
        }
    }

    #[test]
    fn test_clean_session_is_reused() {
        let factory = Arc::new(CountingFactory::default());
        let pool = SessionPool::new(factory.clone());
        let url = Url::parse("http://h/a").unwrap();

        let mut s = pool.acquire(&url, &SessionOptions::default()).unwrap();
        s.mark_reusable();
        drop(s);
        assert_eq!(pool.idle_count(), 1);

        let _s = pool.acquire(&url, &SessionOptions::default()).unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_dirty_session_is_dropped() {
        let factory = Arc::new(CountingFactory::default());
        let pool = SessionPool::new(factory.clone());
        let url = Url::parse("http://h/a").unwrap();

        drop(pool.acquire(&url, &SessionOptions::default()).unwrap());
        assert_eq!(pool.idle_count(), 0);
        drop(pool.acquire(&url, &SessionOptions::default()).unwrap());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sessions_keyed_by_endpoint() {
        let factory = Arc::new(CountingFactory::default());
        let pool = SessionPool::new(factory.clone());

        let mut a = pool
            .acquire(&Url::parse("http://h:80/a").unwrap(), &SessionOptions::default())
            .unwrap();
        a.mark_reusable();
        drop(a);

        let _b = pool
            .acquire(&Url::parse("https://h/a").unwrap(), &SessionOptions::default())
            .unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_sessions_not_shared_across_options() {
        let factory = Arc::new(CountingFactory::default());
        let pool = SessionPool::new(factory.clone());
        let url = Url::parse("https://h/a").unwrap();
        let insecure = SessionOptions {
            verify_tls: false,
            operation_timeout: Some(std::time::Duration::from_millis(50)),
            ..SessionOptions::default()
        };

        let mut s = pool.acquire(&url, &insecure).unwrap();
        s.mark_reusable();
        drop(s);

        let secure = pool.acquire(&url, &SessionOptions::default()).unwrap();
        assert!(secure.options().verify_tls);
        assert_eq!(*factory.verify_tls.lock().unwrap(), vec![false, true]);
        assert_eq!(pool.idle_count(), 1);
        drop(secure);

        let _again = pool.acquire(&url, &insecure).unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }
}
