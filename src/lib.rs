#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

//! rftpd is an extensible, async FTP server library: command parsing and sequencing, the
//! MODE/TYPE/STRU data codec pipeline, and the data-transfer lifecycle, with pluggable
//! authentication and storage backends supplied through `rftpd-core`.
//!
//! It runs on top of the Tokio asynchronous run-time.
//!
//! # Quick Start
//!
//! Add the rftpd and tokio crates to your project's dependencies in Cargo.toml
//!
//! ```toml
//! [dependencies]
//! rftpd = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//! Now you're ready to develop your server! Add the following to src/main.rs:
//!
//! ```ignore
//! #[tokio::main]
//! pub async fn main() {
//!     let server = rftpd::ServerBuilder::new(storage, authenticator)
//!         .greeting("Welcome to my FTP server")
//!         .passive_ports(50000..65535)
//!         .build();
//!
//!     server.listen("127.0.0.1:2121").await.unwrap();
//! }
//! ```
//! You can now run your server with cargo run and connect to localhost:2121 with your favourite FTP client e.g.:
//!
//! ```sh
//! lftp -p 2121 localhost
//! ```
pub(crate) mod metrics;
pub mod notification;
pub(crate) mod server;

pub use rftpd_core::{auth, storage};

pub use crate::server::ftpserver::{error::ServerError, options, Server, ServerBuilder};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
