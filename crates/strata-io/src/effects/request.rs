//! One logical HTTP exchange on a pooled session, redirects included.

use std::time::Instant;

use strata_transport::{
    Body, Error, ErrorKind, Method, PooledSession, RequestSpec, Result, scope,
};
use tracing::{debug, trace};
use url::Url;

use super::context::Context;
use crate::core::is_redirect;
use crate::data::RequestParams;

/// Request bound to a [`Context`].
///
/// `execute` sends it and follows redirects according to the parameters; the
/// body is then read with `read_block` and friends. A session is returned to
/// the pool only once its body was read to the end or drained by `finish`.
pub struct HttpRequest<'a> {
    context: &'a Context,
    params: &'a RequestParams,
    deadline: Option<Instant>,
    spec: RequestSpec,
    origin: Url,
    session: Option<PooledSession>,
    status: u16,
    headers: Vec<(String, String)>,
    eof: bool,
}

impl<'a> HttpRequest<'a> {
    pub fn new(
        context: &'a Context,
        params: &'a RequestParams,
        deadline: Option<Instant>,
        method: Method,
        mut url: Url,
    ) -> Self {
        url.set_fragment(None);
        let spec = RequestSpec::new(method, url.clone()).headers(params.headers.iter().cloned());
        Self {
            context,
            params,
            deadline,
            spec,
            origin: url,
            session: None,
            status: 0,
            headers: Vec::new(),
            eof: false,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.spec.body = body.into();
        self
    }

    pub fn method(&self) -> Method {
        self.spec.method
    }

    /// URL that answered, after redirects.
    pub fn url(&self) -> &Url {
        &self.spec.url
    }

    pub fn execute(&mut self) -> Result<()> {
        let method = self.spec.method;
        let cached = if self.params.transparent_redirects && self.params.redirect_caching {
            self.context
                .redirect_cache()
                .resolve(method, &self.origin, self.params.max_redirects)
        } else {
            None
        };

        let Some(target) = cached else {
            return self.run(self.origin.clone());
        };
        trace!(target: "strata::request", from = %self.origin, to = %target, "using cached redirection");
        let outcome = self.run(target);
        let stale = match &outcome {
            Err(_) => true,
            Ok(()) => self.status >= 400 && self.status != 416,
        };
        if !stale {
            return outcome;
        }
        debug!(
            target: "strata::request",
            url = %self.origin,
            status = self.status,
            "cached redirection failed, retrying from the original URL"
        );
        self.context.redirect_cache().remove(method, &self.origin);
        self.discard();
        self.run(self.origin.clone())
    }

    fn run(&mut self, start: Url) -> Result<()> {
        let cache = self.params.transparent_redirects && self.params.redirect_caching;
        let mut url = start;
        let mut hops = 0u32;
        loop {
            self.check_deadline()?;
            let mut session = self
                .context
                .pool()
                .acquire(&url, &self.params.session_options())?;
            self.spec.url = url.clone();
            trace!(target: "strata::request", method = %self.spec.method, %url, "sending request");
            session.start_request(&self.spec)?;
            let status = session.status_code();

            if !(self.params.transparent_redirects && is_redirect(status)) {
                debug!(target: "strata::request", method = %self.spec.method, %url, status, "response");
                self.headers = session.answer_headers();
                self.session = Some(session);
                self.status = status;
                self.eof = self.spec.method == Method::Head;
                if self.eof {
                    self.release();
                }
                return Ok(());
            }

            let location = session.answer_header("Location").ok_or_else(|| {
                Error::new(
                    scope::REQUEST,
                    ErrorKind::InvalidServerResponse,
                    format!("redirection {status} from {url} without Location"),
                )
            })?;
            let next = url.join(&location).map_err(|e| {
                Error::new(
                    scope::REQUEST,
                    ErrorKind::InvalidServerResponse,
                    format!("invalid Location {location:?}: {e}"),
                )
            })?;
            session.end_request()?;
            session.mark_reusable();
            drop(session);

            hops += 1;
            if hops > self.params.max_redirects {
                return Err(Error::new(
                    scope::REQUEST,
                    ErrorKind::TooManyRedirects,
                    format!("more than {} redirections from {}", self.params.max_redirects, self.origin),
                ));
            }
            debug!(target: "strata::request", %url, to = %next, status, "following redirection");
            if cache {
                self.context
                    .redirect_cache()
                    .insert(self.spec.method, &url, &next);
            }
            if status == 303 && self.spec.method != Method::Head {
                self.spec.method = Method::Get;
                self.spec.body = Body::Empty;
            }
            url = next;
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// First response header named `name`, case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// Every value of a repeated response header.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Declared body length, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.header_value("Content-Length")?.trim().parse().ok()
    }

    /// Up to `buf.len()` body bytes; 0 at the end of the body.
    pub fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }
        self.check_deadline()?;
        if self.params.is_canceled() {
            return Err(Error::new(scope::REQUEST, ErrorKind::Canceled, "request canceled"));
        }
        let session = self.session.as_mut().ok_or_else(not_started)?;
        let n = session.read_block(buf)?;
        if n == 0 {
            self.eof = true;
            self.release();
        }
        Ok(n)
    }

    /// Fill `buf` unless the body ends first.
    pub fn read_segment(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_block(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Next line including its `\n`, or `None` at the end of the body.
    pub fn read_line(&mut self, max: usize) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.read_block(&mut byte)? == 0 {
                return Ok((!line.is_empty()).then_some(line));
            }
            line.push(byte[0]);
            if byte[0] == b'\n' {
                return Ok(Some(line));
            }
            if line.len() >= max {
                return Err(Error::new(
                    scope::REQUEST,
                    ErrorKind::InvalidServerResponse,
                    format!("line longer than {max} bytes"),
                ));
            }
        }
    }

    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; strata_transport::DEFAULT_CHUNK_SIZE];
        loop {
            let n = self.read_block(&mut chunk)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Body as text, lossily decoded.
    pub fn read_text(&mut self) -> Result<String> {
        let body = self.read_to_end()?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Drain what is left of the body so the session can be reused.
    pub fn finish(&mut self) -> Result<()> {
        if self.eof {
            return Ok(());
        }
        let session = self.session.as_mut().ok_or_else(not_started)?;
        session.end_request()?;
        self.eof = true;
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.mark_reusable();
        }
    }

    fn discard(&mut self) {
        self.session = None;
        self.status = 0;
        self.headers.clear();
        self.eof = false;
    }

    fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::new(
                scope::REQUEST,
                ErrorKind::OperationTimeout,
                format!("request to {} timed out", self.spec.url),
            )),
            _ => Ok(()),
        }
    }
}

fn not_started() -> Error {
    Error::new(
        scope::REQUEST,
        ErrorKind::InvalidArgument,
        "request was not executed",
    )
}
