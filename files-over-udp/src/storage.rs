//! Local byte sources, byte sinks, and the file store behind the server.
//!
//! Sources are any [`AsyncRead`] and sinks any [`AsyncWrite`]; the protocol
//! never needs more.  The server resolves filenames through a [`FileStore`]:
//! [`DirStore`] maps them into a directory, [`MemoryStore`] keeps them in a
//! shared map that tests can inspect.

use std::collections::HashMap;
use std::future::Future;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Read the next chunk of at most `max_len` bytes.
///
/// Keeps reading until the chunk is full or the source is exhausted, so every
/// chunk but the last is exactly `max_len` bytes.  `Ok(None)` marks EOF.
pub async fn read_chunk<R>(source: &mut R, max_len: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = vec![0u8; max_len];
    let mut filled = 0;
    while filled < max_len {
        let n = source.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    chunk.truncate(filled);
    Ok(Some(chunk))
}

/// Named files the server can read from and write to.
pub trait FileStore: Send + Sync {
    type Reader: AsyncRead + Unpin + Send + Sync;
    type Writer: AsyncWrite + Unpin + Send + Sync;

    /// Open `name` for reading; `Ok(None)` when it does not exist.
    fn open(&self, name: &str) -> impl Future<Output = io::Result<Option<Self::Reader>>> + Send;

    /// Create (or truncate) `name` for writing.
    fn create(&self, name: &str) -> impl Future<Output = io::Result<Self::Writer>> + Send;
}

// ---------------------------------------------------------------------------
// DirStore
// ---------------------------------------------------------------------------

/// Files inside one directory.  Names must be plain file names.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(name)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{name:?} is not a plain file name"),
            )),
        }
    }
}

impl FileStore for DirStore {
    type Reader = File;
    type Writer = File;

    async fn open(&self, name: &str) -> io::Result<Option<File>> {
        match File::open(self.resolve(name)?).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, name: &str) -> io::Result<File> {
        File::create(self.resolve(name)?).await
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

type Files = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// In-memory files shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Files,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, contents: Vec<u8>) {
        lock(&self.files).insert(name.to_string(), contents);
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(name).cloned()
    }
}

impl FileStore for MemoryStore {
    type Reader = Cursor<Vec<u8>>;
    type Writer = MemoryWriter;

    async fn open(&self, name: &str) -> io::Result<Option<Cursor<Vec<u8>>>> {
        Ok(self.get(name).map(Cursor::new))
    }

    async fn create(&self, name: &str) -> io::Result<MemoryWriter> {
        self.insert(name, Vec::new());
        Ok(MemoryWriter {
            files: Arc::clone(&self.files),
            name: name.to_string(),
        })
    }
}

/// Sink appending to one [`MemoryStore`] entry.
#[derive(Debug)]
pub struct MemoryWriter {
    files: Files,
    name: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        lock(&self.files)
            .entry(self.name.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn lock(files: &Files) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
    files.lock().unwrap_or_else(PoisonError::into_inner)
}
