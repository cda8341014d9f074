use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use strata_transport::{Error, ErrorKind, Result, SessionFactory, scope};
use url::Url;

use super::chain::{ContentProvider, IoChain, Next};
use super::context::{Context, IoChainContext};
use crate::data::{ClientConfig, DirEntry, IoVec, RequestParams, StatInfo};

/// Entry point: runs operations through the standard I/O chain.
///
/// # Examples
///
/// ```no_run
/// use strata_io::{Client, RequestParams};
/// use url::Url;
///
/// let client = Client::new()?.with_params(RequestParams::default().max_retries(3));
/// let url = Url::parse("davs://storage.example/data/file.bin")?;
/// let info = client.stat(&url)?;
/// let mut head = vec![0u8; 1024.min(info.size as usize)];
/// client.pread(&url, &mut head, 0)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Client {
    context: Context,
    chain: IoChain,
    params: RequestParams,
}

impl Client {
    /// Client over reqwest with default parameters.
    #[cfg(feature = "reqwest")]
    pub fn new() -> Result<Self> {
        Ok(Self::from_context(Context::new()?))
    }

    /// Client over reqwest configured from a TOML or JSON file.
    #[cfg(feature = "reqwest")]
    pub fn from_config_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let config = ClientConfig::from_path(path)?;
        Ok(Self::new()?.with_params(config.into_params()))
    }

    pub fn with_factory(factory: Arc<dyn SessionFactory>) -> Self {
        Self::from_context(Context::with_factory(factory))
    }

    pub fn from_context(context: Context) -> Self {
        Self {
            context,
            chain: IoChain::standard(),
            params: RequestParams::default(),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_chain(mut self, chain: IoChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    fn run<T>(
        &self,
        url: &Url,
        op: impl FnOnce(Next<'_>, &mut IoChainContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut ctx = IoChainContext::new(&self.context, url, &self.params)?;
        op(self.chain.head(), &mut ctx)
    }

    pub fn stat(&self, url: &Url) -> Result<StatInfo> {
        self.run(url, |next, ctx| next.stat(ctx))
    }

    /// The whole resource in memory.
    pub fn get(&self, url: &Url) -> Result<Vec<u8>> {
        self.run(url, |next, ctx| next.read_full(ctx))
    }

    /// Stream the resource into `out`; interrupted transfers resume where
    /// they stopped, on the same server or a replica.
    pub fn get_to_writer(&self, url: &Url, out: &mut dyn Write) -> Result<u64> {
        self.run(url, |next, ctx| next.read_to_writer(ctx, out))
    }

    pub fn pread(&self, url: &Url, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.run(url, |next, ctx| next.pread(ctx, buf, offset))
    }

    /// Vectored read; see [`IoVec`].
    pub fn pread_vec(&self, url: &Url, slots: &mut [IoVec<'_>]) -> Result<u64> {
        self.run(url, |next, ctx| next.pread_vec(ctx, slots))
    }

    pub fn put(&self, url: &Url, data: impl Into<Vec<u8>>) -> Result<u64> {
        let mut provider = Cursor::new(data.into());
        self.put_from(url, &mut provider)
    }

    pub fn put_from(&self, url: &Url, provider: &mut dyn ContentProvider) -> Result<u64> {
        self.run(url, |next, ctx| next.write_from_provider(ctx, provider))
    }

    pub fn delete(&self, url: &Url) -> Result<()> {
        self.run(url, |next, ctx| next.delete_resource(ctx))
    }

    pub fn mkdir(&self, url: &Url) -> Result<()> {
        self.run(url, |next, ctx| next.make_collection(ctx))
    }

    pub fn list(&self, url: &Url) -> Result<Vec<DirEntry>> {
        self.run(url, |next, ctx| next.list_collection(ctx))
    }

    pub fn rename(&self, from: &Url, to: &Url) -> Result<()> {
        self.run(from, |next, ctx| next.move_resource(ctx, to))
    }

    /// Server-side checksum as lowercase hex.
    pub fn checksum(&self, url: &Url, algorithm: &str) -> Result<String> {
        self.run(url, |next, ctx| next.checksum(ctx, algorithm))
    }

    /// Replica URLs published through Metalink.
    pub fn replicas(&self, url: &Url) -> Result<Vec<Url>> {
        self.run(url, |next, ctx| next.get_replicas(ctx))
    }

    pub fn open(&self, url: &Url) -> RemoteFile<'_> {
        RemoteFile {
            client: self,
            url: url.clone(),
            position: 0,
            size: None,
        }
    }
}

/// File-like handle with a cursor, reading with positioned requests.
#[derive(Debug)]
pub struct RemoteFile<'c> {
    client: &'c Client,
    url: Url,
    position: u64,
    size: Option<u64>,
}

impl RemoteFile<'_> {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn stat(&mut self) -> Result<StatInfo> {
        let info = self.client.stat(&self.url)?;
        self.size = Some(info.size);
        Ok(info)
    }

    /// Read at the cursor and advance it.
    pub fn read_at_cursor(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.client.pread(&self.url, buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }

    pub fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.client.pread(&self.url, buf, offset)
    }

    pub fn pread_vec(&self, slots: &mut [IoVec<'_>]) -> Result<u64> {
        self.client.pread_vec(&self.url, slots)
    }

    pub fn read_full(&self) -> Result<Vec<u8>> {
        self.client.get(&self.url)
    }

    pub fn read_to_writer(&self, out: &mut dyn Write) -> Result<u64> {
        self.client.get_to_writer(&self.url, out)
    }

    /// Replace the remote content; the cached size follows the upload.
    pub fn put(&mut self, data: impl Into<Vec<u8>>) -> Result<u64> {
        let written = self.client.put(&self.url, data)?;
        self.size = Some(written);
        Ok(written)
    }

    pub fn delete(&self) -> Result<()> {
        self.client.delete(&self.url)
    }

    pub fn mkdir(&self) -> Result<()> {
        self.client.mkdir(&self.url)
    }

    pub fn list(&self) -> Result<Vec<DirEntry>> {
        self.client.list(&self.url)
    }

    pub fn checksum(&self, algorithm: &str) -> Result<String> {
        self.client.checksum(&self.url, algorithm)
    }

    pub fn replicas(&self) -> Result<Vec<Url>> {
        self.client.replicas(&self.url)
    }

    /// Rename on the server and keep the handle pointing at the new name.
    pub fn move_to(&mut self, to: &Url) -> Result<()> {
        self.client.rename(&self.url, to)?;
        self.url = to.clone();
        Ok(())
    }

    /// Move the cursor. Seeking from the end costs a stat the first time.
    pub fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let size = match self.size {
                    Some(size) => size,
                    None => self.stat()?.size,
                };
                size.checked_add_signed(delta)
            }
        };
        let target = target.ok_or_else(|| {
            Error::new(
                scope::IO,
                ErrorKind::InvalidArgument,
                "seek before the start of the file",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}

impl Read for RemoteFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_at_cursor(buf).map_err(io::Error::other)
    }
}

impl Seek for RemoteFile<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek_to(pos).map_err(io::Error::other)
    }
}
