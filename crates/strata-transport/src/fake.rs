//! In-memory HTTP server for tests.
//!
//! [`FakeServer`] is a [`SessionFactory`] whose sessions answer from a map of
//! resources instead of the network. It understands single and multiple
//! byte ranges, PUT/DELETE/MKCOL/MOVE, scripted responses, redirects and
//! injected failures (including connections dropped mid-body), and logs
//! every request it sees.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use url::Url;

use crate::buffer::ResponseBuffer;
use crate::error::{Error, ErrorKind, Result, scope};
use crate::session::{Body, Method, RequestSpec, Session, SessionFactory, SessionKey, SessionOptions};

pub const FAKE_BOUNDARY: &str = "STRATA_FAKE_BOUNDARY";

/// How the server answers a request carrying several ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultirangeBehavior {
    /// `206` with a well-formed `multipart/byteranges` body.
    #[default]
    Supported,
    /// `200` with the whole entity.
    Ignored,
    /// `206` multipart that stops after the first part, without terminator.
    Truncated,
}

/// A canned response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl FakeResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// A failure served instead of the normal answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Status(u16),
    Error(ErrorKind),
    /// The normal answer, but the connection resets after this many body
    /// bytes.
    CutAfter(usize),
}

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl LoggedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
struct Resource {
    data: Bytes,
    headers: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct State {
    resources: HashMap<String, Resource>,
    routes: HashMap<(Method, String), FakeResponse>,
    scripted: HashMap<(Method, String), VecDeque<FakeResponse>>,
    faults: HashMap<String, VecDeque<Fault>>,
    redirects: HashMap<String, (u16, String)>,
    multirange: MultirangeBehavior,
    log: Vec<LoggedRequest>,
    sessions_created: usize,
}

/// Shared handle to the fake server; clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

/// Resource identity: the URL without query or fragment.
fn resource_key(url: &Url) -> String {
    let mut u = url.clone();
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

fn route_key(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    u.to_string()
}

fn parse_url(url: &str) -> Url {
    match Url::parse(url) {
        Ok(u) => u,
        Err(e) => panic!("invalid fake server URL {url}: {e}"),
    }
}

fn etag_of(data: &[u8]) -> String {
    use std::hash::{DefaultHasher, Hash, Hasher};
    let mut h = DefaultHasher::new();
    data.hash(&mut h);
    format!("\"{:016x}\"", h.finish())
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` at `url`, replacing any previous content.
    pub fn insert(&self, url: &str, data: impl Into<Bytes>) {
        let key = resource_key(&parse_url(url));
        self.lock().resources.insert(
            key,
            Resource {
                data: data.into(),
                headers: Vec::new(),
            },
        );
    }

    /// Extra header returned with GET and HEAD answers for `url`.
    pub fn set_header(&self, url: &str, name: &str, value: &str) {
        let key = resource_key(&parse_url(url));
        if let Some(r) = self.lock().resources.get_mut(&key) {
            r.headers.push((name.to_string(), value.to_string()));
        }
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        let key = resource_key(&parse_url(url));
        self.lock().resources.get(&key).map(|r| r.data.to_vec())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.get(url).is_some()
    }

    /// Answer `method url` with `response` every time. A route with a query
    /// string only matches that query; one without matches any query.
    pub fn route(&self, method: Method, url: &str, response: FakeResponse) {
        let key = route_key(&parse_url(url));
        self.lock().routes.insert((method, key), response);
    }

    /// Answer the next `method url` request with `response`, once. Queued
    /// answers are served in order before any route or resource.
    pub fn respond_once(&self, method: Method, url: &str, response: FakeResponse) {
        let key = resource_key(&parse_url(url));
        let mut state = self.lock();
        state
            .scripted
            .entry((method, key))
            .or_default()
            .push_back(response);
    }

    /// Serve `fault` for the next `times` requests to `url`, any method.
    pub fn fail(&self, url: &str, fault: Fault, times: usize) {
        let key = resource_key(&parse_url(url));
        let mut state = self.lock();
        let queue = state.faults.entry(key).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    pub fn redirect(&self, from: &str, to: &str, status: u16) {
        let key = resource_key(&parse_url(from));
        self.lock().redirects.insert(key, (status, to.to_string()));
    }

    pub fn set_multirange(&self, behavior: MultirangeBehavior) {
        self.lock().multirange = behavior;
    }

    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.lock().log.clone()
    }

    /// Requests whose resource is `url`.
    pub fn requests_to(&self, url: &str) -> Vec<LoggedRequest> {
        let key = resource_key(&parse_url(url));
        self.lock()
            .log
            .iter()
            .filter(|r| resource_key(&r.url) == key)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.lock().log.len()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    pub fn sessions_created(&self) -> usize {
        self.lock().sessions_created
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The answer and, for a [`Fault::CutAfter`], where its body breaks.
    fn handle(&self, request: &RequestSpec) -> Result<(FakeResponse, Option<usize>)> {
        let mut state = self.lock();
        let body = match &request.body {
            Body::Empty => Bytes::new(),
            Body::Bytes(b) => b.clone(),
        };
        state.log.push(LoggedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: body.clone(),
        });

        let key = resource_key(&request.url);
        let mut cut = None;
        match state.faults.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(Fault::Status(code)) => return Ok((FakeResponse::new(code), None)),
            Some(Fault::Error(kind)) => {
                return Err(Error::new(
                    scope::TRANSPORT,
                    kind,
                    format!("injected failure for {key}"),
                ));
            }
            Some(Fault::CutAfter(n)) => cut = Some(n),
            None => {}
        }
        Ok((answer(&mut state, request, key, body), cut))
    }
}

fn answer(state: &mut State, request: &RequestSpec, key: String, body: Bytes) -> FakeResponse {
    if let Some((status, to)) = state.redirects.get(&key) {
        return FakeResponse::new(*status).header("Location", to.clone());
    }

    let scripted = state
        .scripted
        .get_mut(&(request.method, key.clone()))
        .and_then(VecDeque::pop_front);
    if let Some(r) = scripted {
        return r;
    }

    let exact = (request.method, route_key(&request.url));
    let loose = (request.method, key.clone());
    if let Some(r) = state.routes.get(&exact).or_else(|| state.routes.get(&loose)) {
        return r.clone();
    }

    let response = match request.method {
        Method::Get | Method::Head => match state.resources.get(&key) {
            Some(resource) => serve(resource, request, state.multirange),
            None => FakeResponse::new(404),
        },
        Method::Put => {
            let etag = etag_of(&body);
            if request.url.query().is_none() {
                state.resources.insert(
                    key,
                    Resource {
                        data: body,
                        headers: Vec::new(),
                    },
                );
            }
            FakeResponse::new(201).header("ETag", etag)
        }
        Method::Delete => match state.resources.remove(&key) {
            Some(_) => FakeResponse::new(204),
            None => FakeResponse::new(404),
        },
        Method::Mkcol => {
            let dir = if key.ends_with('/') { key } else { format!("{key}/") };
            if state.resources.contains_key(&dir) {
                FakeResponse::new(405)
            } else {
                state.resources.insert(
                    dir,
                    Resource {
                        data: Bytes::new(),
                        headers: Vec::new(),
                    },
                );
                FakeResponse::new(201)
            }
        }
        Method::Move => {
            let destination = request
                .header_value("Destination")
                .and_then(|d| Url::parse(d).ok());
            match (destination, state.resources.remove(&key)) {
                (Some(dest), Some(resource)) => {
                    state.resources.insert(resource_key(&dest), resource);
                    FakeResponse::new(201)
                }
                (None, Some(resource)) => {
                    state.resources.insert(key, resource);
                    FakeResponse::new(400)
                }
                (_, None) => FakeResponse::new(404),
            }
        }
        Method::Propfind | Method::Post => FakeResponse::new(501),
    };
    response
}

enum RangeSpec {
    From(u64, Option<u64>),
    Suffix(u64),
}

fn parse_range_header(value: &str) -> Option<Vec<RangeSpec>> {
    let list = value.trim().strip_prefix("bytes=")?;
    let mut out = Vec::new();
    for part in list.split(',') {
        let (start, end) = part.trim().split_once('-')?;
        if start.is_empty() {
            out.push(RangeSpec::Suffix(end.parse().ok()?));
        } else {
            let start = start.parse().ok()?;
            let end = if end.is_empty() { None } else { Some(end.parse().ok()?) };
            out.push(RangeSpec::From(start, end));
        }
    }
    Some(out)
}

/// Clamp a range spec to the entity; `None` when unsatisfiable.
fn resolve(spec: &RangeSpec, len: u64) -> Option<(u64, u64)> {
    if len == 0 {
        return None;
    }
    match *spec {
        RangeSpec::From(start, end) => {
            if start >= len {
                return None;
            }
            let end = end.map_or(len - 1, |e| e.min(len - 1));
            (end >= start).then_some((start, end))
        }
        RangeSpec::Suffix(n) => (n > 0).then(|| (len.saturating_sub(n), len - 1)),
    }
}

fn serve(resource: &Resource, request: &RequestSpec, multirange: MultirangeBehavior) -> FakeResponse {
    let data = &resource.data;
    let len = data.len() as u64;
    let head = request.method == Method::Head;

    let with_common = |mut r: FakeResponse| {
        r.headers.push(("ETag".into(), etag_of(data)));
        r.headers.push(("Accept-Ranges".into(), "bytes".into()));
        r.headers.extend(resource.headers.iter().cloned());
        let length = r.body.len();
        r.headers.push(("Content-Length".into(), length.to_string()));
        if head {
            r.body = Bytes::new();
        }
        r
    };

    let whole = || FakeResponse::new(200).body(data.clone());

    let specs = match request.header_value("Range").and_then(parse_range_header) {
        Some(specs) if !head => specs,
        _ => return with_common(whole()),
    };

    let ranges: Vec<(u64, u64)> = specs.iter().filter_map(|s| resolve(s, len)).collect();
    if ranges.is_empty() {
        return FakeResponse::new(416).header("Content-Range", format!("bytes */{len}"));
    }

    let slice = |(s, e): (u64, u64)| data.slice(s as usize..=e as usize);

    if specs.len() == 1 || ranges.len() == 1 {
        if specs.len() > 1 && multirange == MultirangeBehavior::Ignored {
            return with_common(whole());
        }
        let r = ranges[0];
        return with_common(
            FakeResponse::new(206)
                .header("Content-Range", format!("bytes {}-{}/{len}", r.0, r.1))
                .body(slice(r)),
        );
    }

    match multirange {
        MultirangeBehavior::Ignored => with_common(whole()),
        MultirangeBehavior::Supported | MultirangeBehavior::Truncated => {
            let mut body = Vec::new();
            let parts = if multirange == MultirangeBehavior::Truncated {
                &ranges[..1]
            } else {
                &ranges[..]
            };
            for &r in parts {
                body.extend_from_slice(b"\r\n--");
                body.extend_from_slice(FAKE_BOUNDARY.as_bytes());
                body.extend_from_slice(b"\r\nContent-Type: application/octet-stream\r\n");
                body.extend_from_slice(
                    format!("Content-Range: bytes {}-{}/{len}\r\n\r\n", r.0, r.1).as_bytes(),
                );
                body.extend_from_slice(&slice(r));
            }
            if multirange == MultirangeBehavior::Supported {
                body.extend_from_slice(b"\r\n--");
                body.extend_from_slice(FAKE_BOUNDARY.as_bytes());
                body.extend_from_slice(b"--\r\n");
            }
            with_common(
                FakeResponse::new(206)
                    .header(
                        "Content-Type",
                        format!("multipart/byteranges; boundary={FAKE_BOUNDARY}"),
                    )
                    .body(body),
            )
        }
    }
}

impl SessionFactory for FakeServer {
    fn create_session(
        &self,
        _key: &SessionKey,
        _options: &SessionOptions,
    ) -> Result<Box<dyn Session>> {
        self.lock().sessions_created += 1;
        Ok(Box::new(FakeSession {
            server: self.clone(),
            status: 0,
            headers: Vec::new(),
            buffer: ResponseBuffer::new(),
            reset_when_drained: false,
        }))
    }
}

struct FakeSession {
    server: FakeServer,
    status: u16,
    headers: Vec<(String, String)>,
    buffer: ResponseBuffer,
    reset_when_drained: bool,
}

impl Session for FakeSession {
    fn start_request(&mut self, request: &RequestSpec) -> Result<()> {
        self.buffer.clear();
        self.status = 0;
        self.headers.clear();
        self.reset_when_drained = false;
        let (response, cut) = self.server.handle(request)?;
        self.status = response.status;
        self.headers = response.headers;
        if request.method != Method::Head {
            match cut {
                Some(n) if n < response.body.len() => {
                    self.buffer.feed(&response.body[..n]);
                    self.reset_when_drained = true;
                }
                _ => self.buffer.feed(&response.body),
            }
        }
        Ok(())
    }

    fn status_code(&self) -> u16 {
        self.status
    }

    fn answer_header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn answer_headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.buffer.consume(buf);
        if n == 0 && self.reset_when_drained && !buf.is_empty() {
            return Err(Error::new(
                scope::TRANSPORT,
                ErrorKind::ConnectionReset,
                "connection reset mid-body",
            ));
        }
        Ok(n)
    }
}
