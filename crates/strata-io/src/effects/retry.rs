use std::io::Write;

use strata_transport::{Error, Result};
use tracing::{debug, warn};

use super::chain::{ContentProvider, IoLink, Next};
use super::context::IoChainContext;
use crate::core::is_recoverable;
use crate::data::{DirEntry, IoVec, StatInfo};

/// Re-runs the rest of the chain on recoverable failures.
///
/// `max_retries` counts attempts after the first. Timeouts, refusals,
/// cancellation and redirections that need the caller are returned at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryLink;

impl RetryLink {
    fn run<T>(
        &self,
        ctx: &mut IoChainContext<'_>,
        op: &str,
        mut attempt_fn: impl FnMut(&mut IoChainContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let max_retries = ctx.params.max_retries;
        let mut attempt = 1u32;
        loop {
            ctx.check_deadline()?;
            ctx.check_cancel()?;
            let err = match attempt_fn(ctx) {
                Ok(value) => return Ok(value),
                Err(e) if !is_recoverable(e.kind()) => return Err(e),
                Err(e) => e,
            };
            if attempt > max_retries {
                warn!(target: "strata::retry", op, attempts = attempt, error = %err, "giving up");
                return Err(Error::new(
                    err.scope().to_string(),
                    err.kind(),
                    format!("Result {err} after {attempt} attempts"),
                ));
            }
            debug!(target: "strata::retry", op, attempt, error = %err, "attempt failed, retrying");
            attempt += 1;
            let delay = ctx.params.retry_delay;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }
}

impl IoLink for RetryLink {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn stat(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<StatInfo> {
        self.run(ctx, "stat", |ctx| next.stat(ctx))
    }

    fn list_collection(
        &self,
        ctx: &mut IoChainContext<'_>,
        next: Next<'_>,
    ) -> Result<Vec<DirEntry>> {
        self.run(ctx, "list", |ctx| next.list_collection(ctx))
    }

    fn checksum(
        &self,
        ctx: &mut IoChainContext<'_>,
        algorithm: &str,
        next: Next<'_>,
    ) -> Result<String> {
        self.run(ctx, "checksum", |ctx| next.checksum(ctx, algorithm))
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

    fn write_from_provider(
        &self,
        ctx: &mut IoChainContext<'_>,
        provider: &mut dyn ContentProvider,
        next: Next<'_>,
    ) -> Result<u64> {
        let mut first = true;
        self.run(ctx, "write", |ctx| {
            if !first {
                provider.rewind()?;
            }
            first = false;
            next.write_from_provider(ctx, &mut *provider)
        })
    }
}
