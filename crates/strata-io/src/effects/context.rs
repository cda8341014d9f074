use std::sync::Arc;
use std::time::Instant;

use strata_transport::{Error, ErrorKind, Method, Result, SessionFactory, SessionPool, scope};
use url::Url;

use super::redirect::RedirectCache;
use super::request::HttpRequest;
use crate::data::{FdHandler, Protocol, RequestParams, VecOptions, normalize_url};

/// Long-lived state shared by every operation: the session pool and the
/// redirect cache.
#[derive(Debug)]
pub struct Context {
    pool: SessionPool,
    redirects: RedirectCache,
}

impl Context {
    /// Context backed by reqwest.
    #[cfg(feature = "reqwest")]
    pub fn new() -> Result<Self> {
        let factory = strata_transport::ReqwestSessionFactory::new()?;
        Ok(Self::with_factory(Arc::new(factory)))
    }

    pub fn with_factory(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            pool: SessionPool::new(factory),
            redirects: RedirectCache::new(),
        }
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn redirect_cache(&self) -> &RedirectCache {
        &self.redirects
    }
}

/// Per-operation state handed down the I/O chain.
#[derive(Debug)]
pub struct IoChainContext<'a> {
    pub context: &'a Context,
    /// Wire URL, scheme already normalized. Fragment parameters are kept
    /// for the links that read them and stripped before sending.
    pub url: Url,
    pub protocol: Protocol,
    pub params: &'a RequestParams,
    pub fd_handler: FdHandler,
    pub deadline: Option<Instant>,
}

impl<'a> IoChainContext<'a> {
    pub fn new(context: &'a Context, url: &Url, params: &'a RequestParams) -> Result<Self> {
        let (wire, implied) = normalize_url(url)?;
        Ok(Self {
            context,
            protocol: params.protocol.resolve(implied, &wire),
            url: wire,
            params,
            fd_handler: FdHandler::default(),
            deadline: params.operation_timeout.map(|t| Instant::now() + t),
        })
    }

    /// Context for a replica of the same resource. Keeps the deadline and
    /// the resume state.
    pub fn for_replica(&self, url: Url) -> Result<Self> {
        let mut replica = Self::new(self.context, &url, self.params)?;
        replica.deadline = self.deadline;
        replica.fd_handler = self.fd_handler;
        Ok(replica)
    }

    pub fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::new(
                scope::CHAIN,
                ErrorKind::OperationTimeout,
                format!("operation on {} timed out", self.url),
            )),
            _ => Ok(()),
        }
    }

    pub fn check_cancel(&self) -> Result<()> {
        if self.params.is_canceled() {
            return Err(Error::new(
                scope::CHAIN,
                ErrorKind::Canceled,
                format!("operation on {} canceled", self.url),
            ));
        }
        Ok(())
    }

    /// Vectored-read tuning, with URL fragment overrides applied.
    pub fn vec_options(&self) -> VecOptions {
        self.params.vec.with_fragment(&self.url)
    }

    /// A request to this context's URL.
    pub fn request(&self, method: Method) -> HttpRequest<'a> {
        self.request_to(method, self.url.clone())
    }

    pub fn request_to(&self, method: Method, url: Url) -> HttpRequest<'a> {
        HttpRequest::new(self.context, self.params, self.deadline, method, url)
    }
}
