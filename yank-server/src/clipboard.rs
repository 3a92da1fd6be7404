//! On-disk clipboard store.
//!
//! Each entry is a payload file `<dir>/<id>` plus a one-line JSON sidecar
//! `<dir>/<id>:meta`. Payloads are written to a temporary sibling and
//! renamed into place, and the sidecar is only (re)written after the rename
//! commits, so a reader that sees the sidecar sees the final payload. An
//! entry whose sidecar is missing or unreadable is treated as absent.
//!
//! Streaming entries use a named pipe at the payload path: the producer's
//! upload and the consumer's download rendezvous on the pipe and the bytes
//! never touch disk. Both rendezvous opens are non-blocking retry loops so
//! they honor a deadline and request cancellation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::FileMode;

const META_SUFFIX: &str = ":meta";
const WRITE_BUF_SIZE: usize = 64 * 1024;
const LOCK_SHARDS: usize = 16;
const RENDEZVOUS_POLL: Duration = Duration::from_millis(25);

/// Sidecar record stored next to each payload. Absent fields fall back to
/// a writable entry that never expires, so hand-written sidecars work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default = "default_mode")]
    pub mode: FileMode,
    /// Absolute expiry in Unix seconds; 0 = never.
    #[serde(default)]
    pub expires: u64,
}

fn default_mode() -> FileMode {
    FileMode::ReadWrite
}

/// A stored entry as observed at one instant.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: String,
    pub size: u64,
    pub mode: FileMode,
    pub expires: u64,
    /// Payload is a named pipe (one-shot streaming transfer in progress).
    pub streaming: bool,
}

impl Entry {
    pub fn expired(&self, now: u64) -> bool {
        self.expires > 0 && self.expires <= now
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payload exceeds size limit")]
    TooLarge,

    #[error("entry is read-only")]
    ReadOnly,

    #[error("stream rendezvous timed out")]
    RendezvousTimeout,

    #[error("streaming requires a unix target")]
    StreamingUnsupported,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What a completed write changed, so the caller can adjust aggregate stats.
#[derive(Debug, Clone, Copy)]
pub struct WriteReceipt {
    pub size: u64,
    /// Size of the entry this write replaced, if any.
    pub replaced: Option<u64>,
}

/// Filesystem-backed store. Holds no in-memory index; concurrent mutations
/// of the same id are serialized through a small set of sharded locks.
pub struct Clipboard {
    dir: PathBuf,
    locks: Vec<Mutex<()>>,
    tmp_seq: AtomicU64,
}

impl Clipboard {
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        yank_security::secure_dir(dir)?;
        Ok(Clipboard {
            dir: dir.to_path_buf(),
            locks: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn payload_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    pub fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{META_SUFFIX}"))
    }

    fn lock_for(&self, id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.locks[hasher.finish() as usize % LOCK_SHARDS]
    }

    fn tmp_path(&self, id: &str) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(".tmp-{seq}-{id}"))
    }

    /// Store a payload read from `reader`, then commit the sidecar.
    ///
    /// Fails with [`StoreError::ReadOnly`] when an unexpired `ro` entry is
    /// in the way and with [`StoreError::TooLarge`] when the reader yields
    /// more than `limit` bytes; no partial payload survives either failure.
    pub async fn write(
        &self,
        id: &str,
        reader: &mut (impl AsyncRead + Unpin),
        limit: Option<u64>,
        mode: FileMode,
        expires: u64,
        now: u64,
    ) -> Result<WriteReceipt, StoreError> {
        let _guard = self.lock_for(id).lock().await;

        let replaced = self.check_replaceable(id, now).await?;

        let tmp = self.tmp_path(id);
        let written = match self.copy_capped(reader, &tmp, limit).await {
            Ok(n) => n,
            Err(err) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(err);
            }
        };

        fs::rename(&tmp, self.payload_path(id)).await?;
        self.commit_meta(id, mode, expires).await?;

        Ok(WriteReceipt {
            size: written,
            replaced,
        })
    }

    /// Create a zero-byte placeholder that occupies the id until it is
    /// promoted to a streaming transfer or expires.
    pub async fn reserve(
        &self,
        id: &str,
        mode: FileMode,
        expires: u64,
        now: u64,
    ) -> Result<WriteReceipt, StoreError> {
        let mut empty: &[u8] = &[];
        self.write(id, &mut empty, None, mode, expires, now).await
    }

    /// Replace the payload with a named pipe for a one-shot streaming
    /// transfer. An existing placeholder at the id is superseded.
    #[cfg(unix)]
    pub async fn create_pipe(
        &self,
        id: &str,
        mode: FileMode,
        expires: u64,
        now: u64,
    ) -> Result<(), StoreError> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let _guard = self.lock_for(id).lock().await;

        self.check_replaceable(id, now).await?;

        let path = self.payload_path(id);
        let _ = fs::remove_file(&path).await;

        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        // SAFETY: cpath is a valid NUL-terminated path.
        let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o600) };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }

        self.commit_meta(id, mode, expires).await?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub async fn create_pipe(
        &self,
        _id: &str,
        _mode: FileMode,
        _expires: u64,
        _now: u64,
    ) -> Result<(), StoreError> {
        Err(StoreError::StreamingUnsupported)
    }

    /// Producer half of a streaming transfer: open the pipe for writing,
    /// waiting up to `timeout` for the consumer. On timeout the pipe and
    /// sidecar are removed.
    #[cfg(unix)]
    pub async fn open_pipe_writer(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<fs::File, StoreError> {
        use std::os::unix::fs::OpenOptionsExt;

        let path = self.payload_path(id);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&path)
            {
                Ok(file) => {
                    clear_nonblocking(&file)?;
                    return Ok(fs::File::from_std(file));
                }
                // ENXIO: no reader has the pipe open yet.
                Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                    if tokio::time::Instant::now() >= deadline {
                        self.delete(id).await?;
                        return Err(StoreError::RendezvousTimeout);
                    }
                    tokio::time::sleep(RENDEZVOUS_POLL).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Consumer half of a streaming transfer: open the pipe for reading and
    /// wait up to `timeout` for the producer to attach. Returns any bytes
    /// consumed while polling plus the (now blocking) pipe handle. On
    /// timeout the pipe and sidecar are removed.
    ///
    /// The poll loop relies on pipe read semantics to tell the two idle
    /// states apart: `read() == 0` means no producer has attached, while
    /// `EAGAIN` means a producer is attached but has not written yet.
    #[cfg(unix)]
    pub async fn open_pipe_reader(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<(Option<Bytes>, fs::File), StoreError> {
        use std::io::Read;
        use std::os::unix::fs::OpenOptionsExt;

        let path = self.payload_path(id);
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = vec![0u8; WRITE_BUF_SIZE];
        let first = loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    if tokio::time::Instant::now() >= deadline {
                        self.delete(id).await?;
                        return Err(StoreError::RendezvousTimeout);
                    }
                    tokio::time::sleep(RENDEZVOUS_POLL).await;
                }
                Ok(n) => break Some(Bytes::copy_from_slice(&buf[..n])),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break None,
                Err(err) => return Err(err.into()),
            }
        };

        clear_nonblocking(&file)?;
        Ok((first, fs::File::from_std(file)))
    }

    /// Open a regular payload for reading.
    pub async fn open_payload(&self, id: &str) -> io::Result<fs::File> {
        fs::File::open(self.payload_path(id)).await
    }

    /// The entry's current metadata and size, or `None` when the payload or
    /// sidecar is missing or the sidecar does not parse.
    pub async fn stat(&self, id: &str) -> io::Result<Option<Entry>> {
        let payload = match fs::metadata(self.payload_path(id)).await {
            Ok(md) => md,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let meta = match fs::read(self.meta_path(id)).await {
            Ok(raw) => match serde_json::from_slice::<Meta>(&raw) {
                Ok(meta) => meta,
                Err(_) => return Ok(None),
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        Ok(Some(Entry {
            id: id.to_string(),
            size: payload.len(),
            mode: meta.mode,
            expires: meta.expires,
            streaming: is_fifo(&payload),
        }))
    }

    /// Enumerate all entries with a valid sidecar. Stray payloads without
    /// one (or with a corrupt one) are skipped, so a listing after a crash
    /// heals itself once the manager removes the leftovers.
    pub async fn list(&self) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = match item.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.starts_with('.') || name.ends_with(META_SUFFIX) {
                continue;
            }
            if let Some(entry) = self.stat(&name).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Remove payload and sidecar; missing files are not an error.
    pub async fn delete(&self, id: &str) -> io::Result<()> {
        let _guard = self.lock_for(id).lock().await;
        remove_if_exists(&self.payload_path(id)).await?;
        remove_if_exists(&self.meta_path(id)).await?;
        Ok(())
    }

    /// Returns the size of the entry being replaced, or an error when it is
    /// an unexpired read-only entry. An expired entry is simply gone, so
    /// replacing one counts as a fresh write.
    async fn check_replaceable(&self, id: &str, now: u64) -> Result<Option<u64>, StoreError> {
        match self.stat(id).await? {
            Some(existing) if !existing.expired(now) => {
                if existing.mode == FileMode::ReadOnly {
                    return Err(StoreError::ReadOnly);
                }
                Ok(Some(existing.size))
            }
            Some(_) | None => Ok(None),
        }
    }

    async fn copy_capped(
        &self,
        reader: &mut (impl AsyncRead + Unpin),
        dest: &Path,
        limit: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut file = open_private(dest).await?;
        let mut buf = vec![0u8; WRITE_BUF_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if let Some(limit) = limit {
                if written > limit {
                    return Err(StoreError::TooLarge);
                }
            }
            file.write_all(&buf[..n]).await?;
        }

        file.flush().await?;
        Ok(written)
    }

    /// Write the sidecar via a temporary sibling so readers observe either
    /// the previous record or the new one.
    async fn commit_meta(&self, id: &str, mode: FileMode, expires: u64) -> Result<(), StoreError> {
        let meta = Meta { mode, expires };
        let mut line = serde_json::to_vec(&meta)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        line.push(b'\n');

        let tmp = self.tmp_path(id);
        let mut file = open_private(&tmp).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&tmp, self.meta_path(id)).await?;
        Ok(())
    }
}

async fn open_private(path: &Path) -> io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).await
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
fn is_fifo(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_fifo()
}

#[cfg(not(unix))]
fn is_fifo(_metadata: &std::fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn clear_nonblocking(file: &std::fs::File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid open descriptor owned by `file`.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
