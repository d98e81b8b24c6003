//! Per-connection session state: the authentication state machine, the working directory, the
//! restart marker, and the command-sequencing memory the dispatcher consults on every line.

use crate::notification::EventMeta;
use crate::server::controlchan::CommandCode;
use crate::server::datachan::{CodecConfig, TransferController};
use rftpd_core::auth::UserDetail;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

/// The authentication state of a session (§3 `Session`).
pub enum AuthState<U: UserDetail> {
    /// No `USER` received yet.
    New,
    /// `USER` received, awaiting `PASS`.
    WaitingPass {
        /// The username supplied to `USER`.
        username: String,
    },
    /// `PASS` accepted, awaiting `ACCT` (only reachable when [`UserDetail::account_required`]).
    WaitingAcct {
        /// The username supplied to `USER`.
        username: String,
        /// The identity handed back by `AuthBackend::check_pass`.
        user: Arc<U>,
    },
    /// Fully authenticated.
    LoggedIn {
        /// The username supplied to `USER`.
        username: String,
        /// The identity handed back by the auth backend.
        user: Arc<U>,
    },
}

impl<U: UserDetail> AuthState<U> {
    /// Whether the session may execute commands gated on being logged in.
    pub fn is_logged_in(&self) -> bool {
        matches!(self, AuthState::LoggedIn { .. })
    }

    /// The username supplied so far, if any.
    pub fn username(&self) -> Option<&str> {
        match self {
            AuthState::New => None,
            AuthState::WaitingPass { username } | AuthState::WaitingAcct { username, .. } | AuthState::LoggedIn { username, .. } => Some(username),
        }
    }
}

/// Per-connection FTP session state.
pub struct Session<U: UserDetail> {
    /// A unique id assigned at accept time, used to scope this session's log lines.
    pub id: Uuid,
    /// The client's control-channel remote address; also the key used to match an inbound
    /// passive data connection back to this session (§6).
    pub remote_addr: SocketAddr,
    /// A logger enriched with `id` and `remote_addr`.
    pub logger: slog::Logger,
    /// The authentication state machine.
    pub auth: AuthState<U>,
    /// The session's current working directory, relative to the filesystem backend's root.
    pub cwd: PathBuf,
    /// The mode/type/structure the data codec pipeline is configured with. Mutated by
    /// successful `MODE`/`TYPE`/`STRU` commands; a fresh [`CodecPipeline`](crate::server::datachan::CodecPipeline)
    /// is built from this value at every data-channel open (see DESIGN.md).
    pub codec_config: CodecConfig,
    /// The byte offset set by a preceding `REST`, consumed by exactly the next transfer command.
    pub restart_marker: Option<u64>,
    /// The tag of the most recently *completed* command, used for §4.2 sequencing.
    pub previous_command: CommandCode,
    /// An override on the successor set for the next command, copied from the previous
    /// [`Command::extra_next`](crate::server::controlchan::Command).
    pub extra_next: Option<CommandCode>,
    /// `RNFR`'s resolved source path, consumed by the following `RNTO`.
    pub rename_from: Option<PathBuf>,
    /// The active data-transfer controller, if a `PORT`/`PASV` has been issued.
    pub transfer: TransferController,
    /// The listener bound by a `PASV`/`EPSV` not yet claimed by a transfer verb.
    pub pending_passive_listener: Option<TcpListener>,
    /// Number of consecutive failed `PASS` attempts, used to close abusive connections early.
    pub failed_logins: u32,
    /// Incremented on every event handed to a [`DataListener`](crate::notification::DataListener)
    /// or [`PresenceListener`](crate::notification::PresenceListener), so subscribers can order
    /// events from a session even when delivery itself doesn't preserve order.
    event_seq: u64,
}

impl<U: UserDetail> Session<U> {
    /// Creates a new session for a freshly accepted control connection.
    pub fn new(remote_addr: SocketAddr, logger: slog::Logger) -> Self {
        let id = Uuid::new_v4();
        Session {
            id,
            remote_addr,
            logger: logger.new(slog::o!("session_id" => id.to_string(), "remote_addr" => remote_addr.to_string())),
            auth: AuthState::New,
            cwd: PathBuf::from("/"),
            codec_config: CodecConfig::default(),
            restart_marker: None,
            previous_command: CommandCode::Connect,
            extra_next: None,
            rename_from: None,
            transfer: TransferController::new(),
            pending_passive_listener: None,
            failed_logins: 0,
            event_seq: 0,
        }
    }

    /// Builds the [`EventMeta`] for the next event raised by this session, or `None` if no
    /// `USER` has been supplied yet (events are only meaningful once a username is known).
    pub fn next_event_meta(&mut self) -> Option<EventMeta> {
        let username = self.auth.username()?.to_string();
        self.event_seq += 1;
        Some(EventMeta {
            username,
            trace_id: self.id.to_string(),
            sequence_number: self.event_seq,
        })
    }

    /// Records that `command` has finished dispatching, rotating the sequencing memory and
    /// clearing the restart marker unless `command` was itself `REST` (which sets it) or a
    /// transfer-starting command (which already consumed it via `Option::take`).
    pub fn record_dispatched(&mut self, command: CommandCode, extra_next: Option<CommandCode>) {
        self.previous_command = command;
        self.extra_next = extra_next;
        if command != CommandCode::Rest {
            self.restart_marker = None;
        }
    }
}
