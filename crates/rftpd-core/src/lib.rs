//! External collaborator interfaces used by the `rftpd` control/data engine.
//!
//! The engine crate (`rftpd`) implements the FTP control-channel dispatcher, the sequencing
//! rules, and the data transfer pipeline. It deliberately knows nothing about *how* users are
//! authenticated or *where* files live; those concerns are narrowed to the two traits in this
//! crate, [`auth::AuthBackend`] and [`storage::FilesystemBackend`], which an embedding
//! application implements and hands to the engine.

pub mod auth;
pub mod storage;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
