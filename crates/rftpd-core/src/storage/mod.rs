//! Contains the [`FilesystemBackend`] trait, the narrow collaborator the data transfer pipeline
//! and the `CWD`/`LIST`/`DELE`/`MKD`/`RMD`/`RNFR`+`RNTO` command handlers drive.
//!
//! Unlike the control-channel dispatcher, which speaks exclusively in terms of an opaque
//! per-session working directory and a `Path` argument string, a `FilesystemBackend`
//! implementation is trusted to resolve client-supplied paths against whatever storage model it
//! embeds (a local directory jail, an object store, a virtual filesystem, ...). The dispatcher
//! never touches `std::fs` directly, and only ever holds the engine-wide backend behind an
//! `Arc<dyn FilesystemBackend>`, so the trait is kept object-safe: a `Handle` is a plain
//! [`PathBuf`] and streams are boxed.
//!
//! ```no_run
//! use async_trait::async_trait;
//! use rftpd_core::storage::{FileStat, FilesystemBackend, Reader, Result, WriteMode, Writer};
//! use std::path::{Path, PathBuf};
//!
//! #[derive(Debug)]
//! struct MemoryBackend;
//!
//! #[async_trait]
//! impl FilesystemBackend for MemoryBackend {
//!     async fn resolve(&self, cwd: &Path, path: &str) -> Result<PathBuf> {
//!         Ok(cwd.join(path))
//!     }
//!
//!     async fn open_read(&self, handle: &Path, offset: u64) -> Result<Reader> {
//!         let _ = (handle, offset);
//!         Ok(Box::new(tokio::io::empty()))
//!     }
//!
//!     async fn open_write(&self, handle: &Path, offset: u64, mode: WriteMode) -> Result<Writer> {
//!         let _ = (handle, offset, mode);
//!         Ok(Box::new(tokio::io::sink()))
//!     }
//!
//!     async fn list(&self, handle: &Path) -> Result<Vec<String>> {
//!         let _ = handle;
//!         Ok(vec![])
//!     }
//!
//!     async fn remove(&self, handle: &Path) -> Result<()> {
//!         let _ = handle;
//!         Ok(())
//!     }
//!
//!     async fn mkdir(&self, handle: &Path) -> Result<()> {
//!         let _ = handle;
//!         Ok(())
//!     }
//!
//!     async fn rmdir(&self, handle: &Path) -> Result<()> {
//!         let _ = handle;
//!         Ok(())
//!     }
//!
//!     async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
//!         let _ = (from, to);
//!         Ok(())
//!     }
//!
//!     async fn stat(&self, handle: &Path) -> Result<FileStat> {
//!         let _ = handle;
//!         Ok(FileStat { is_dir: false, size: 0 })
//!     }
//! }
//! ```

mod error;
pub use error::{ErrorKind, StorageError};

use async_trait::async_trait;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

/// The result type returned by every [`FilesystemBackend`] method.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A boxed stream handed back by [`FilesystemBackend::open_read`].
pub type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// A boxed sink handed back by [`FilesystemBackend::open_write`].
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// How a data connection opened for writing should treat an existing file at the target path.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WriteMode {
    /// `STOR` - truncate and overwrite any existing file.
    Replace,
    /// `APPE` - append to an existing file, creating it if absent.
    Append,
    /// `STOU` - create a new, backend-chosen unique name; reject if the handle already exists.
    Unique,
}

/// A minimal directory-entry/file status payload, enough for `LIST`/`STAT`/`SIZE` replies.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FileStat {
    /// Whether the resolved handle names a directory.
    pub is_dir: bool,
    /// Size in bytes; meaningless (and typically `0`) for directories.
    pub size: u64,
}

/// The narrowed storage collaborator the engine calls into for every command that touches the
/// file namespace (§6 `FilesystemBackend`).
///
/// A handle is the [`PathBuf`] produced by [`resolve`](Self::resolve) from a session's current
/// working directory plus a client-supplied path argument; the engine never interprets it beyond
/// threading it back into subsequent calls (this is how `RNFR` followed by `RNTO` carries its
/// source across two commands).
#[async_trait]
pub trait FilesystemBackend: Debug + Send + Sync {
    /// Resolves `path` (as supplied by the client, possibly relative) against `cwd` into a
    /// backend-specific handle. Does not touch the backing store; existence is only checked by
    /// the method that is eventually called with the handle.
    async fn resolve(&self, cwd: &Path, path: &str) -> Result<PathBuf>;

    /// Opens `handle` for reading, seeked to `offset` (nonzero only after a preceding `REST`).
    async fn open_read(&self, handle: &Path, offset: u64) -> Result<Reader>;

    /// Opens `handle` for writing per `mode`, seeked to `offset` (nonzero only after a preceding
    /// `REST` combined with `STOR`).
    async fn open_write(&self, handle: &Path, offset: u64, mode: WriteMode) -> Result<Writer>;

    /// Lists the immediate contents of the directory named by `handle`, one formatted line per
    /// entry (the engine writes each line to the data channel verbatim, appending `CRLF`).
    async fn list(&self, handle: &Path) -> Result<Vec<String>>;

    /// Deletes the file named by `handle` (`DELE`).
    async fn remove(&self, handle: &Path) -> Result<()>;

    /// Creates the directory named by `handle` (`MKD`).
    async fn mkdir(&self, handle: &Path) -> Result<()>;

    /// Removes the directory named by `handle`, which must be empty (`RMD`).
    async fn rmdir(&self, handle: &Path) -> Result<()>;

    /// Renames `from` to `to` (`RNFR` + `RNTO`).
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Returns status for `handle` (`SIZE`, `MDTM`, `STAT <path>`).
    async fn stat(&self, handle: &Path) -> Result<FileStat>;
}
