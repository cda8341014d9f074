use std::fmt;

/// One slot of a vectored read: read `buffer.len()` bytes at `offset`.
///
/// After the read, `filled` holds how many leading bytes of `buffer` are valid.
/// It is smaller than the buffer only at end of file.
#[derive(Debug)]
pub struct IoVec<'a> {
    pub offset: u64,
    pub buffer: &'a mut [u8],
    pub filled: usize,
}

impl<'a> IoVec<'a> {
    pub fn new(offset: u64, buffer: &'a mut [u8]) -> Self {
        Self {
            offset,
            buffer,
            filled: 0,
        }
    }

    /// Bytes actually read.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.filled]
    }

    /// Inclusive end offset, `None` for an empty slot.
    pub fn end(&self) -> Option<u64> {
        (!self.buffer.is_empty()).then(|| self.offset + self.buffer.len() as u64 - 1)
    }
}

/// Outcome of one attempt at a request carrying several ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultirangeResult {
    /// Served as `multipart/byteranges`.
    Success,
    /// The server sent the whole entity and it was sliced locally.
    SuccessButNoMultirange,
    /// Multi-range did not work out; per-range requests must be used.
    NoMultirange,
}

/// Resume state of a transfer to a caller-owned writer.
///
/// Retries and replica failover keep this across attempts and resume with
/// `Range: bytes=<bytes_written>-`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FdHandler {
    pub bytes_written: u64,
}

impl FdHandler {
    /// `Range` value that resumes after what was already written.
    pub fn resume_range(&self) -> Option<String> {
        (self.bytes_written > 0).then(|| format!("bytes={}-", self.bytes_written))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    #[default]
    File,
    Directory,
}

/// Metadata of one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatInfo {
    pub size: u64,
    pub kind: FileKind,
    /// Seconds since the epoch.
    pub mtime: Option<i64>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl StatInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn directory() -> Self {
        Self {
            kind: FileKind::Directory,
            ..Default::default()
        }
    }
}

/// One child of a listed collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub stat: StatInfo,
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stat.is_dir() {
            write!(f, "{}/", self.name)
        } else {
            write!(f, "{} ({} bytes)", self.name, self.stat.size)
        }
    }
}
