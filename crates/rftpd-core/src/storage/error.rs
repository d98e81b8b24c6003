use crate::BoxError;
use derive_more::Display;
use thiserror::Error;

/// The error returned by [`FilesystemBackend`](super::FilesystemBackend) implementations.
///
/// Backend implementations should choose the [`ErrorKind`] carefully since that determines the
/// reply code the dispatcher sends to the FTP client (§7 of the design).
#[derive(Debug, Error)]
#[error("storage error: {kind}")]
pub struct StorageError {
    kind: ErrorKind,
    #[source]
    source: Option<BoxError>,
}

impl StorageError {
    /// Creates a new storage error.
    pub fn new<E>(kind: ErrorKind, error: E) -> StorageError
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StorageError {
            kind,
            source: Some(error.into()),
        }
    }

    /// The kind of failure, used by the dispatcher to pick a reply code.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// A reference to the inner `std::io::Error`, if the backend wrapped one.
    pub fn get_io_error(&self) -> Option<&std::io::Error> {
        self.source.as_ref()?.downcast_ref::<std::io::Error>()
    }
}

impl From<ErrorKind> for StorageError {
    fn from(kind: ErrorKind) -> StorageError {
        StorageError { kind, source: None }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> StorageError {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::PermanentFileNotAvailable,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::LocalError,
        };
        StorageError::new(kind, err)
    }
}

/// The `ErrorKind` variants a [`FilesystemBackend`](super::FilesystemBackend) can return,
/// matching the "Resource local" (451/452) and "Resource permanent" (550/553) categories of §7.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ErrorKind {
    /// 450 - retryable, e.g. the file is temporarily busy.
    #[display("450 Transient file not available")]
    TransientFileNotAvailable,
    /// 550 - the file does not exist or will never become available.
    #[display("550 Permanent file not available")]
    PermanentFileNotAvailable,
    /// 550 - the directory does not exist.
    #[display("550 Permanent directory not available")]
    PermanentDirectoryNotAvailable,
    /// 550 - `RMD` on a non-empty directory.
    #[display("550 The directory is not empty")]
    PermanentDirectoryNotEmpty,
    /// 550 - access denied by the backend's own authorization.
    #[display("550 Permission denied")]
    PermissionDenied,
    /// 426 - the transfer was aborted, by the client or a network issue.
    #[display("426 Connection closed transfer aborted")]
    ConnectionClosed,
    /// 451 - an internal backend error unrelated to the request's validity.
    #[display("451 Local error")]
    LocalError,
    /// 551 - `STRU P` was requested; page structure is not implemented.
    #[display("551 Page type unknown")]
    PageTypeUnknown,
    /// 452 - insufficient storage space in the system.
    #[display("452 Insufficient storage space error")]
    InsufficientStorageSpaceError,
    /// 552 - exceeded storage allocation for the current directory/dataset.
    #[display("552 Exceeded storage allocation error")]
    ExceededStorageAllocationError,
    /// 553 - the requested file name is not allowed.
    #[display("553 File name not allowed error")]
    FileNameNotAllowedError,
    /// 502 - the backend does not implement this operation at all (e.g. no rename support).
    #[display("502 Command not implemented")]
    CommandNotImplemented,
}
