//! Replica discovery through Metalink and failover on error.

use std::io::Write;

use once_cell::sync::Lazy;
use strata_metalink::{ACCEPT_METALINK, find_metalink_link, is_metalink_content_type};
use strata_transport::{Error, ErrorKind, Method, Result, scope};
use tracing::{debug, info, warn};
use url::Url;

use super::chain::{IoLink, Next};
use super::context::IoChainContext;
use super::request::HttpRequest;
use crate::core::{is_recoverable, is_success};
use crate::data::{IoVec, MetalinkMode, RequestParams, StatInfo};

/// Set `DAVIX_DISABLE_METALINK` to turn failover off process-wide.
pub const DISABLE_METALINK_ENV: &str = "DAVIX_DISABLE_METALINK";

static METALINK_DISABLED: Lazy<bool> =
    Lazy::new(|| std::env::var_os(DISABLE_METALINK_ENV).is_some());

fn failover_enabled(params: &RequestParams) -> bool {
    !*METALINK_DISABLED && params.metalink_mode != MetalinkMode::Disable
}

fn not_supported() -> Error {
    Error::new(
        scope::METALINK,
        ErrorKind::OperationNotSupported,
        "Server does not support Metalink standard",
    )
}

/// Replica URLs announced by the server for `ctx.url`.
///
/// A HEAD without redirects looks for a `Link: <...>; type=application/metalink`
/// header, or a resource that is itself a metalink. The descriptor is then
/// fetched and its URLs resolved against it.
pub fn discover_replicas(ctx: &IoChainContext<'_>) -> Result<Vec<Url>> {
    let probe_params = RequestParams {
        transparent_redirects: false,
        ..ctx.params.clone()
    };
    let mut probe = HttpRequest::new(
        ctx.context,
        &probe_params,
        ctx.deadline,
        Method::Head,
        ctx.url.clone(),
    )
    .header("Accept", ACCEPT_METALINK);
    probe.execute()?;

    let linked = probe
        .header_values("Link")
        .iter()
        .find_map(|value| find_metalink_link(value));
    let metalink_url = match linked {
        Some(target) => ctx.url.join(&target).map_err(|e| {
            Error::new(
                scope::METALINK,
                ErrorKind::InvalidServerResponse,
                format!("invalid metalink location {target:?}: {e}"),
            )
        })?,
        None if probe
            .header_value("Content-Type")
            .is_some_and(|ct| is_metalink_content_type(&ct)) =>
        {
            ctx.url.clone()
        }
        None => return Err(not_supported()),
    };
    debug!(target: "strata::metalink", url = %metalink_url, "fetching metalink");

    let mut fetch = ctx
        .request_to(Method::Get, metalink_url.clone())
        .header("Accept", ACCEPT_METALINK);
    fetch.execute()?;
    if !is_success(fetch.status()) {
        return Err(Error::new(
            scope::METALINK,
            ErrorKind::InvalidServerResponse,
            format!("Unable to get Metalink file, error HTTP {}", fetch.status()),
        ));
    }
    let body = fetch.read_text()?;
    let document = strata_metalink::parse(&body).map_err(|e| {
        Error::new(
            scope::METALINK,
            ErrorKind::InvalidServerResponse,
            format!("invalid metalink {metalink_url}: {e}"),
        )
    })?;

    let replicas: Vec<Url> = document
        .replicas()
        .into_iter()
        .filter_map(|r| match metalink_url.join(&r.url) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(target: "strata::metalink", url = %r.url, error = %e, "skipping replica");
                None
            }
        })
        .collect();
    if replicas.is_empty() {
        return Err(not_supported());
    }
    Ok(replicas)
}

/// Outermost link: on a recoverable failure, discover replicas and try
/// each in turn. When all of them fail the first error is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetalinkLink;

impl MetalinkLink {
    fn run<T>(
        &self,
        ctx: &mut IoChainContext<'_>,
        op: &str,
        mut attempt_fn: impl FnMut(&mut IoChainContext<'_>) -> Result<T>,
    ) -> Result<T> {
        if !failover_enabled(ctx.params) {
            return attempt_fn(ctx);
        }
        let original = match attempt_fn(ctx) {
            Ok(value) => return Ok(value),
            Err(e) if !is_recoverable(e.kind()) => return Err(e),
            Err(e) => e,
        };
        info!(target: "strata::metalink", op, url = %ctx.url, error = %original, "trying replicas");
        match self.failover(ctx, op, &mut attempt_fn) {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!(target: "strata::metalink", op, error = %e, "failover did not succeed");
                Err(original)
            }
        }
    }

    fn failover<T>(
        &self,
        ctx: &mut IoChainContext<'_>,
        op: &str,
        attempt_fn: &mut impl FnMut(&mut IoChainContext<'_>) -> Result<T>,
    ) -> Result<T> {
        ctx.check_deadline()?;
        let replicas = discover_replicas(ctx)?;
        for replica in replicas {
            let mut replica_ctx = match ctx.for_replica(replica.clone()) {
                Ok(c) => c,
                Err(e) => {
                    warn!(target: "strata::metalink", %replica, error = %e, "unusable replica");
                    continue;
                }
            };
            debug!(target: "strata::metalink", op, %replica, "trying replica");
            let result = attempt_fn(&mut replica_ctx);
            ctx.fd_handler = replica_ctx.fd_handler;
            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(target: "strata::metalink", op, %replica, error = %e, "replica failed");
                }
            }
            ctx.check_deadline()?;
        }
        Err(Error::new(
            scope::METALINK,
            ErrorKind::InvalidServerResponse,
            "Impossible to access any of the replicas with success",
        ))
    }
}

impl IoLink for MetalinkLink {
    fn name(&self) -> &'static str {
        "metalink"
    }

    fn get_replicas(&self, ctx: &mut IoChainContext<'_>, _next: Next<'_>) -> Result<Vec<Url>> {
        discover_replicas(ctx)
    }

    fn stat(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<StatInfo> {
        self.run(ctx, "stat", |ctx| next.stat(ctx))
    }

    fn read_full(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<Vec<u8>> {
        self.run(ctx, "read", |ctx| next.read_full(ctx))
    }

    fn read_to_writer(
        &self,
        ctx: &mut IoChainContext<'_>,
        out: &mut dyn Write,
        next: Next<'_>,
    ) -> Result<u64> {
        self.run(ctx, "read_to_writer", |ctx| next.read_to_writer(ctx, &mut *out))
    }

    fn pread(
        &self,
        ctx: &mut IoChainContext<'_>,
        buf: &mut [u8],
        offset: u64,
        next: Next<'_>,
    ) -> Result<usize> {
        self.run(ctx, "pread", |ctx| next.pread(ctx, &mut *buf, offset))
    }

    fn pread_vec(
        &self,
        ctx: &mut IoChainContext<'_>,
        slots: &mut [IoVec<'_>],
        next: Next<'_>,
    ) -> Result<u64> {
        self.run(ctx, "pread_vec", |ctx| next.pread_vec(ctx, &mut *slots))
    }
}
