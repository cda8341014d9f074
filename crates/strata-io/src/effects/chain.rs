//! The ordered chain of I/O links.
//!
//! Every link sees every operation. A link either handles it, decorates it
//! (calling further down through [`Next`]) or forwards it untouched, which
//! is what the default trait methods do.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use strata_transport::{Error, ErrorKind, Result, scope};
use url::Url;

use super::context::IoChainContext;
use super::http_io::HttpIoLink;
use super::http_meta::HttpMetaLink;
use super::metalink::MetalinkLink;
use super::protocol::{AzureLink, ObjectStoreLink, SwiftLink, WebDavLink};
use super::retry::RetryLink;
use super::vec_io::VecIoLink;
use crate::data::{DirEntry, IoVec, StatInfo};

/// Source of an upload body.
///
/// `rewind` restarts it from the beginning so a failed upload can be sent
/// again.
pub trait ContentProvider: Send {
    /// Total length, when known up front.
    fn size(&self) -> Option<u64>;

    /// Next bytes into `buf`; 0 at the end.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn rewind(&mut self) -> Result<()>;
}

impl<T: AsRef<[u8]> + Send> ContentProvider for Cursor<T> {
    fn size(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(Read::read(self, buf)?)
    }

    fn rewind(&mut self) -> Result<()> {
        self.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

/// Up to `buf.len()` bytes from the provider, short only at its end.
pub(crate) fn fill_from_provider(
    provider: &mut dyn ContentProvider,
    buf: &mut [u8],
) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = provider.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// The whole provider content.
pub(crate) fn drain_provider(provider: &mut dyn ContentProvider) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(provider.size().unwrap_or(0).min(1 << 26) as usize);
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = provider.read(&mut chunk)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

/// One stage of the chain. Every operation forwards by default.
pub trait IoLink: Send + Sync {
    fn name(&self) -> &'static str;

    fn stat(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<StatInfo> {
        next.stat(ctx)
    }

    /// Replicas of the resource, best first.
    fn get_replicas(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<Vec<Url>> {
        next.get_replicas(ctx)
    }

    fn delete_resource(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<()> {
        next.delete_resource(ctx)
    }

    fn make_collection(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<()> {
        next.make_collection(ctx)
    }

    fn list_collection(
        &self,
        ctx: &mut IoChainContext<'_>,
        next: Next<'_>,
    ) -> Result<Vec<DirEntry>> {
        next.list_collection(ctx)
    }

    fn move_resource(
        &self,
        ctx: &mut IoChainContext<'_>,
        destination: &Url,
        next: Next<'_>,
    ) -> Result<()> {
        next.move_resource(ctx, destination)
    }

    /// Checksum as lowercase hex.
    fn checksum(
        &self,
        ctx: &mut IoChainContext<'_>,
        algorithm: &str,
        next: Next<'_>,
    ) -> Result<String> {
        next.checksum(ctx, algorithm)
    }

    fn read_full(&self, ctx: &mut IoChainContext<'_>, next: Next<'_>) -> Result<Vec<u8>> {
        next.read_full(ctx)
    }

    /// Stream the resource into `out`, resuming after
    /// `ctx.fd_handler.bytes_written`. Returns the total written.
    fn read_to_writer(
        &self,
        ctx: &mut IoChainContext<'_>,
        out: &mut dyn Write,
        next: Next<'_>,
    ) -> Result<u64> {
        next.read_to_writer(ctx, out)
    }

    /// Read at `offset`; fewer bytes than `buf.len()` only at the end.
    fn pread(
        &self,
        ctx: &mut IoChainContext<'_>,
        buf: &mut [u8],
        offset: u64,
        next: Next<'_>,
    ) -> Result<usize> {
        next.pread(ctx, buf, offset)
    }

    /// Fill every slot; returns the sum of the filled counts.
    fn pread_vec(
        &self,
        ctx: &mut IoChainContext<'_>,
        slots: &mut [IoVec<'_>],
        next: Next<'_>,
    ) -> Result<u64> {
        next.pread_vec(ctx, slots)
    }

    fn write_from_provider(
        &self,
        ctx: &mut IoChainContext<'_>,
        provider: &mut dyn ContentProvider,
        next: Next<'_>,
    ) -> Result<u64> {
        next.write_from_provider(ctx, provider)
    }
}

/// The rest of the chain after the current link.
#[derive(Clone, Copy)]
pub struct Next<'n> {
    links: &'n [Box<dyn IoLink>],
}

impl<'n> Next<'n> {
    fn split(self, op: &str) -> Result<(&'n dyn IoLink, Next<'n>)> {
        match self.links.split_first() {
            Some((link, rest)) => Ok((link.as_ref(), Next { links: rest })),
            None => Err(Error::new(
                scope::CHAIN,
                ErrorKind::OperationNotSupported,
                format!("{op}: no link handles this operation"),
            )),
        }
    }

    pub fn stat(self, ctx: &mut IoChainContext<'_>) -> Result<StatInfo> {
        let (link, rest) = self.split("stat")?;
        link.stat(ctx, rest)
    }

    pub fn get_replicas(self, ctx: &mut IoChainContext<'_>) -> Result<Vec<Url>> {
        let (link, rest) = self.split("replicas")?;
        link.get_replicas(ctx, rest)
    }

    pub fn delete_resource(self, ctx: &mut IoChainContext<'_>) -> Result<()> {
        let (link, rest) = self.split("delete")?;
        link.delete_resource(ctx, rest)
    }

    pub fn make_collection(self, ctx: &mut IoChainContext<'_>) -> Result<()> {
        let (link, rest) = self.split("mkdir")?;
        link.make_collection(ctx, rest)
    }

    pub fn list_collection(self, ctx: &mut IoChainContext<'_>) -> Result<Vec<DirEntry>> {
        let (link, rest) = self.split("list")?;
        link.list_collection(ctx, rest)
    }

    pub fn move_resource(self, ctx: &mut IoChainContext<'_>, destination: &Url) -> Result<()> {
        let (link, rest) = self.split("move")?;
        link.move_resource(ctx, destination, rest)
    }

    pub fn checksum(self, ctx: &mut IoChainContext<'_>, algorithm: &str) -> Result<String> {
        let (link, rest) = self.split("checksum")?;
        link.checksum(ctx, algorithm, rest)
    }

    pub fn read_full(self, ctx: &mut IoChainContext<'_>) -> Result<Vec<u8>> {
        let (link, rest) = self.split("read")?;
        link.read_full(ctx, rest)
    }

    pub fn read_to_writer(self, ctx: &mut IoChainContext<'_>, out: &mut dyn Write) -> Result<u64> {
        let (link, rest) = self.split("read_to_writer")?;
        link.read_to_writer(ctx, out, rest)
    }

    pub fn pread(self, ctx: &mut IoChainContext<'_>, buf: &mut [u8], offset: u64) -> Result<usize> {
        let (link, rest) = self.split("pread")?;
        link.pread(ctx, buf, offset, rest)
    }

    pub fn pread_vec(self, ctx: &mut IoChainContext<'_>, slots: &mut [IoVec<'_>]) -> Result<u64> {
        let (link, rest) = self.split("pread_vec")?;
        link.pread_vec(ctx, slots, rest)
    }

    pub fn write_from_provider(
        self,
        ctx: &mut IoChainContext<'_>,
        provider: &mut dyn ContentProvider,
    ) -> Result<u64> {
        let (link, rest) = self.split("write")?;
        link.write_from_provider(ctx, provider, rest)
    }
}

/// An ordered list of links, outermost first.
pub struct IoChain {
    links: Vec<Box<dyn IoLink>>,
}

impl IoChain {
    pub fn new(links: Vec<Box<dyn IoLink>>) -> Self {
        Self { links }
    }

    /// Metalink failover, then retries, then the protocol dialects, then
    /// plain HTTP and the vectored engine.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(MetalinkLink),
            Box::new(RetryLink),
            Box::new(ObjectStoreLink),
            Box::new(SwiftLink),
            Box::new(AzureLink),
            Box::new(WebDavLink),
            Box::new(HttpMetaLink),
            Box::new(HttpIoLink),
            Box::new(VecIoLink),
        ])
    }

    pub fn head(&self) -> Next<'_> {
        Next { links: &self.links }
    }

    pub fn link_names(&self) -> Vec<&'static str> {
        self.links.iter().map(|l| l.name()).collect()
    }
}

impl Default for IoChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for IoChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.link_names()).finish()
    }
}
