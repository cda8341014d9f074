//! Blocking [`Session`] on top of the async `reqwest` client.

use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::trace;

use crate::buffer::ResponseBuffer;
use crate::error::{Error, ErrorKind, Result, scope};
use crate::session::{Body, RequestSpec, Session, SessionFactory, SessionKey, SessionOptions};

/// Opens [`ReqwestSession`]s. All of them share one runtime.
pub struct ReqwestSessionFactory {
    runtime: Arc<Runtime>,
}

impl ReqwestSessionFactory {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("strata-http")
            .enable_all()
            .build()
            .map_err(Error::from)?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }
}

impl SessionFactory for ReqwestSessionFactory {
    fn create_session(
        &self,
        key: &SessionKey,
        options: &SessionOptions,
    ) -> Result<Box<dyn Session>> {
        let _guard = self.runtime.enter();
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!options.verify_tls)
            .pool_max_idle_per_host(1);
        if let Some(t) = options.connect_timeout {
            builder = builder.connect_timeout(t);
        }
        if let Some(t) = options.operation_timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().map_err(map_reqwest_error)?;
        trace!(target: "strata::transport", %key, "reqwest session created");

        Ok(Box::new(ReqwestSession {
            client,
            runtime: Arc::clone(&self.runtime),
            response: None,
            status: 0,
            headers: Vec::new(),
            buffer: ResponseBuffer::new(),
        }))
    }
}

/// One `reqwest` client driven synchronously.
pub struct ReqwestSession {
    client: reqwest::Client,
    runtime: Arc<Runtime>,
    response: Option<reqwest::Response>,
    status: u16,
    headers: Vec<(String, String)>,
    buffer: ResponseBuffer,
}

impl Session for ReqwestSession {
    fn start_request(&mut self, request: &RequestSpec) -> Result<()> {
        self.response = None;
        self.buffer.clear();
        self.headers.clear();
        self.status = 0;

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes()).map_err(|e| {
            Error::new(scope::TRANSPORT, ErrorKind::InvalidArgument, e.to_string())
        })?;
        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Body::Bytes(bytes) = &request.body {
            builder = builder.body(bytes.clone());
        }

        let response = self
            .runtime
            .block_on(builder.send())
            .map_err(map_reqwest_error)?;

        self.status = response.status().as_u16();
        self.headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        self.response = Some(response);
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
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.buffer.is_empty() {
                return Ok(self.buffer.consume(buf));
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(0);
            };
            match self
                .runtime
                .block_on(response.chunk())
                .map_err(map_reqwest_error)?
            {
                Some(chunk) => self.buffer.feed(&chunk),
                None => {
                    self.response = None;
                    return Ok(0);
                }
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    let kind = if e.is_timeout() && e.is_connect() {
        ErrorKind::ConnectionTimeout
    } else if e.is_timeout() {
        ErrorKind::OperationTimeout
    } else if e.is_connect() {
        connect_kind(&e)
    } else if e.is_builder() {
        ErrorKind::InvalidArgument
    } else if e.is_body() || e.is_decode() {
        ErrorKind::ConnectionReset
    } else {
        ErrorKind::ConnectionProblem
    };
    Error::new(scope::TRANSPORT, kind, e.to_string())
}

/// Walk the source chain to tell DNS and TLS failures apart from refusals.
fn connect_kind(e: &reqwest::Error) -> ErrorKind {
    let mut source: Option<&dyn std::error::Error> = Some(e);
    while let Some(err) = source {
        let text = err.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("resolve") {
            return ErrorKind::NameResolution;
        }
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return ErrorKind::Tls;
        }
        source = err.source();
    }
    ErrorKind::ConnectionRefused
}
