use std::io::Write;

use strata_transport::{DEFAULT_CHUNK_SIZE, Error, ErrorKind, Method, Result, scope};
use tracing::debug;

use super::chain::{ContentProvider, IoLink, Next, drain_provider};
use super::context::IoChainContext;
use super::vec_io::read_at;
use crate::core::check_status;

/// Plain HTTP data transfer: GET, ranged GET and PUT.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpIoLink;

impl IoLink for HttpIoLink {
    fn name(&self) -> &'static str {
        "http_io"
    }

    fn read_full(&self, ctx: &mut IoChainContext<'_>, _next: Next<'_>) -> Result<Vec<u8>> {
        let mut request = ctx.request(Method::Get);
        request.execute()?;
        check_status(request.status(), "read")?;
        request.read_to_end()
    }

    fn read_to_writer(
        &self,
        ctx: &mut IoChainContext<'_>,
        out: &mut dyn Write,
        _next: Next<'_>,
    ) -> Result<u64> {
        let resume = ctx.fd_handler.bytes_written;
        let mut request = ctx.request(Method::Get);
        if let Some(range) = ctx.fd_handler.resume_range() {
            debug!(target: "strata::io", url = %ctx.url, resume, "resuming transfer");
            request = request.header("Range", range);
        }
        request.execute()?;

        let mut skip = 0u64;
        match request.status() {
            416 if resume > 0 => {
                request.finish()?;
                return Ok(resume);
            }
            206 => {}
            200 => skip = resume,
            status => check_status(status, "read")?,
        }

        let mut chunk = vec![0u8; DEFAULT_CHUNK_SIZE];
        loop {
            let n = request.read_block(&mut chunk)?;
            if n == 0 {
                break;
            }
            let mut data = &chunk[..n];
            if skip > 0 {
                let dropped = skip.min(n as u64) as usize;
                skip -= dropped as u64;
                data = &data[dropped..];
            }
            if data.is_empty() {
                continue;
            }
            out.write_all(data).map_err(|e| {
                Error::new(scope::IO, ErrorKind::Io, format!("writing {}: {e}", ctx.url))
            })?;
            ctx.fd_handler.bytes_written += data.len() as u64;
        }
        Ok(ctx.fd_handler.bytes_written)
    }

    fn pread(
        &self,
        ctx: &mut IoChainContext<'_>,
        buf: &mut [u8],
        offset: u64,
        _next: Next<'_>,
    ) -> Result<usize> {
        read_at(ctx, buf, offset)
    }

    fn write_from_provider(
        &self,
        ctx: &mut IoChainContext<'_>,
        provider: &mut dyn ContentProvider,
        _next: Next<'_>,
    ) -> Result<u64> {
        let body = drain_provider(provider)?;
        let len = body.len() as u64;
        let mut request = ctx.request(Method::Put).body(body);
        request.execute()?;
        let status = request.status();
        request.finish()?;
        check_status(status, "write")?;
        debug!(target: "strata::io", url = %ctx.url, bytes = len, "uploaded");
        Ok(len)
    }
}
