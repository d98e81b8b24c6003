//! Drives one control channel to completion: decodes commands, sequences them, dispatches each
//! to the storage/auth backends, and streams the resulting reply back to the client.

use super::command::{Command, CommandCode, CommandKind, Opt};
use super::error::{ControlChanError, ControlChanErrorKind};
use super::{FtpCodec, Reply, ReplyCode};
use crate::metrics;
use crate::notification::{DataEvent, DataListener, PresenceEvent, PresenceListener};
use crate::server::datachan::{CodecPipeline, DataBlock, Direction};
use crate::server::ftpserver::options::PassiveHost;
use crate::server::session::{AuthState, Session};
use crate::server::shutdown;

use futures_util::{SinkExt, StreamExt};
use rftpd_core::auth::{AuthBackend, UserDetail};
use rftpd_core::storage::{ErrorKind as StorageErrorKind, FilesystemBackend, StorageError, WriteMode};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// The set of commands admissible before a session is logged in. `ACCT` is included alongside
/// the catalog's USER/PASS/QUIT/FEAT/NOOP set because it is the final step of the login sequence
/// for backends that require it ([`UserDetail::account_required`]); without it an account-gated
/// login could never complete.
const PRE_LOGIN: &[CommandCode] = &[CommandCode::User, CommandCode::Pass, CommandCode::Acct, CommandCode::Quit, CommandCode::Feat, CommandCode::Noop];

/// The parameters a listener hands to every spawned control channel.
pub(crate) struct ControlParams<Storage, User, Auth> {
    /// The filesystem backend shared by every session.
    pub storage: Arc<Storage>,
    /// The authentication backend shared by every session.
    pub authenticator: Arc<Auth>,
    /// The `220` banner sent on connect.
    pub greeting: Arc<str>,
    /// Disconnects a session that has sent nothing for this long.
    pub idle_timeout: Duration,
    /// The port range offered to `PASV`/`EPSV`.
    pub passive_ports: Range<u16>,
    /// How the address in a `PASV` reply is chosen.
    pub passive_host: PassiveHost,
    /// Root logger; per-session fields are added in [`Session::new`].
    pub logger: slog::Logger,
    /// Broadcasts the server-wide shutdown signal; every session subscribes its own
    /// [`shutdown::Listener`] from this.
    pub shutdown: Arc<shutdown::Notifier>,
    /// Receives [`PresenceEvent`]s for login/logout.
    pub presence_listener: Arc<dyn PresenceListener>,
    /// Receives [`DataEvent`]s for storage-mutating commands.
    pub data_listener: Arc<dyn DataListener>,
    #[doc(hidden)]
    pub _user: std::marker::PhantomData<User>,
}

impl<Storage, User, Auth> Clone for ControlParams<Storage, User, Auth> {
    fn clone(&self) -> Self {
        ControlParams {
            storage: self.storage.clone(),
            authenticator: self.authenticator.clone(),
            greeting: self.greeting.clone(),
            idle_timeout: self.idle_timeout,
            passive_ports: self.passive_ports.clone(),
            passive_host: self.passive_host.clone(),
            logger: self.logger.clone(),
            shutdown: self.shutdown.clone(),
            presence_listener: self.presence_listener.clone(),
            data_listener: self.data_listener.clone(),
            _user: std::marker::PhantomData,
        }
    }
}

/// A `RETR`/`STOR`/`LIST`/`NLST` transfer running on its own task, independent of the control
/// channel's read loop so that an `ABOR` (or a shutdown signal) arriving mid-transfer can be
/// observed and acted on without waiting for the transfer to finish on its own.
struct ActiveTransfer {
    handle: tokio::task::JoinHandle<TransferOutcome>,
    /// Notified once to request the task close the data channel and stop.
    abort: Arc<Notify>,
}

impl ActiveTransfer {
    /// Signals the task to stop and waits for it to finish closing the data channel.
    async fn cancel(self) -> TransferOutcome {
        self.abort.notify_one();
        self.handle.await.unwrap_or(TransferOutcome::Aborted)
    }
}

/// What a transfer task ended up doing, reported back to the control loop once it finishes.
enum TransferOutcome {
    /// `RETR` sent `bytes` of `path` to the client.
    Retr { path: String, bytes: u64 },
    /// `STOR`/`APPE`/`STOU` received `bytes` into `path` from the client.
    Stor { path: String, bytes: u64 },
    /// `LIST`/`NLST` sent a directory listing.
    List,
    /// The task observed the abort notification and closed the data channel.
    Aborted,
    /// The task hit an I/O or backend fault; `reply` is the code already chosen for it.
    Failed(Reply),
}

/// Awaits the active transfer's join handle, or never resolves if there isn't one. Safe to
/// reconstruct on every `select!` iteration: recreating this future when `active` is `None`
/// just yields a branch that can't win that iteration.
async fn join_active(active: &mut Option<ActiveTransfer>) -> Result<TransferOutcome, tokio::task::JoinError> {
    match active {
        Some(transfer) => (&mut transfer.handle).await,
        None => std::future::pending().await,
    }
}

/// Applies a finished transfer's outcome to session state and renders the reply it produces.
async fn finish_transfer<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, outcome: TransferOutcome) -> Reply
where
    User: UserDetail,
{
    match outcome {
        TransferOutcome::Retr { path, bytes } => {
            session.transfer.signal_pre_end();
            session.transfer.channel_closed();
            metrics::add_backend_read_metric(bytes);
            notify_data(params, session, DataEvent::Got { path, bytes }).await;
            Reply::new(ReplyCode::ClosingDataConnection, "Transfer complete")
        }
        TransferOutcome::Stor { path, bytes } => {
            session.transfer.signal_pre_end();
            session.transfer.channel_closed();
            metrics::add_backend_write_metric(bytes);
            notify_data(params, session, DataEvent::Put { path, bytes }).await;
            Reply::new(ReplyCode::ClosingDataConnection, "Transfer complete")
        }
        TransferOutcome::List => {
            session.transfer.signal_pre_end();
            session.transfer.channel_closed();
            Reply::new(ReplyCode::ClosingDataConnection, "Directory send OK")
        }
        TransferOutcome::Aborted => {
            session.transfer.abort();
            session.transfer.begin_closing();
            session.transfer.reset();
            Reply::new(ReplyCode::ConnectionClosed, "Connection closed; transfer aborted")
        }
        TransferOutcome::Failed(reply) => {
            session.transfer.abort();
            session.transfer.begin_closing();
            session.transfer.reset();
            reply
        }
    }
}

/// Spawns a task that owns `tcp_stream` for the lifetime of the control channel.
pub(crate) fn spawn_control_channel_loop<Storage, User, Auth>(params: ControlParams<Storage, User, Auth>, tcp_stream: TcpStream, remote_addr: SocketAddr)
where
    Storage: FilesystemBackend + 'static,
    User: UserDetail + 'static,
    Auth: AuthBackend<User> + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = run(params, tcp_stream, remote_addr).await {
            tracing::warn!(error = %e, "control channel ended abnormally");
        }
    });
}

async fn run<Storage, User, Auth>(params: ControlParams<Storage, User, Auth>, tcp_stream: TcpStream, remote_addr: SocketAddr) -> Result<(), ControlChanError>
where
    Storage: FilesystemBackend + 'static,
    User: UserDetail + 'static,
    Auth: AuthBackend<User> + 'static,
{
    let mut framed = Framed::new(tcp_stream, FtpCodec::new());
    let mut session: Session<User> = Session::new(remote_addr, params.logger.clone());
    let mut shutdown_listener = params.shutdown.subscribe().await;

    metrics::inc_session();
    let result = run_loop(&params, &mut framed, &mut session, &mut shutdown_listener).await;
    metrics::dec_session();
    result
}

async fn run_loop<Storage, User, Auth>(
    params: &ControlParams<Storage, User, Auth>,
    framed: &mut Framed<TcpStream, FtpCodec>,
    session: &mut Session<User>,
    shutdown_listener: &mut shutdown::Listener,
) -> Result<(), ControlChanError>
where
    Storage: FilesystemBackend + 'static,
    User: UserDetail + 'static,
    Auth: AuthBackend<User> + 'static,
{
    framed.send(Reply::new_with_string(ReplyCode::ServiceReady, params.greeting.to_string())).await?;

    // A `RETR`/`STOR`/`LIST`/`NLST` in flight, if any. Lives alongside the read loop (rather than
    // inside `session`) so the loop below can `select!` on its completion without fighting the
    // borrow checker over `session`; `session.transfer`'s state machine remains the single source
    // of truth `is_busy()` checks consult.
    let mut active: Option<ActiveTransfer> = None;

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown_listener.listen() => {
                if let Some(transfer) = active.take() {
                    transfer.cancel().await;
                }
                let _ = framed.send(Reply::new(ReplyCode::ServiceNotAvailable, "Service is going down: disconnect")).await;
                return Ok(());
            }
            outcome = join_active(&mut active) => {
                active = None;
                let outcome = outcome.unwrap_or(TransferOutcome::Aborted);
                let reply = finish_transfer(params, session, outcome).await;
                framed.send(reply).await?;
                continue;
            }
            outcome = timeout(params.idle_timeout, framed.next()) => match outcome {
                Ok(Some(Ok(command))) => command,
                Ok(Some(Err(e))) => {
                    metrics::add_error_metric(e.kind());
                    framed.send(Reply::new(e.reply_code(), "Command not understood")).await?;
                    continue;
                }
                Ok(None) => return Ok(()),
                Err(_elapsed) => {
                    metrics::add_error_metric(&ControlChanErrorKind::ControlChannelTimeout);
                    let _ = framed.send(Reply::new(ReplyCode::ServiceNotAvailable, "Control channel timed out")).await;
                    return Err(ControlChanErrorKind::ControlChannelTimeout.into());
                }
            }
        };

        metrics::add_command_metric(&line);

        if !session.previous_command.admits(line.code(), session.extra_next) {
            framed.send(Reply::new(ReplyCode::BadCommandSequence, "Bad sequence of commands")).await?;
            continue;
        }

        if !PRE_LOGIN.contains(&line.code()) && !session.auth.is_logged_in() {
            framed.send(Reply::new(ReplyCode::NotLoggedIn, "Please login with USER and PASS")).await?;
            continue;
        }

        let code = line.code();
        let extra_next = line.extra_next;
        let should_quit = matches!(line.kind, CommandKind::Quit);

        let reply = dispatch(params, session, line, framed, &mut active).await;
        metrics::add_reply_metric(&reply);
        framed.send(reply).await?;

        session.record_dispatched(code, extra_next);
        if should_quit {
            return Ok(());
        }
    }
}

async fn dispatch<Storage, User, Auth>(
    params: &ControlParams<Storage, User, Auth>,
    session: &mut Session<User>,
    command: Command,
    framed: &mut Framed<TcpStream, FtpCodec>,
    active: &mut Option<ActiveTransfer>,
) -> Reply
where
    Storage: FilesystemBackend + 'static,
    User: UserDetail + 'static,
    Auth: AuthBackend<User>,
{
    match command.kind {
        CommandKind::User { username } => handle_user(params, session, username).await,
        CommandKind::Pass { password } => handle_pass(params, session, password).await,
        CommandKind::Acct { account } => handle_acct(params, session, account).await,
        CommandKind::Syst => Reply::new(ReplyCode::SystemType, "UNIX Type: L8"),
        CommandKind::Noop => Reply::new(ReplyCode::CommandOkay, "Doing nothing"),
        CommandKind::Feat => Reply::new_multiline(
            ReplyCode::SystemStatus,
            vec!["Extensions supported:".to_string(), "UTF8".to_string(), "MDTM".to_string(), "SIZE".to_string(), "REST STREAM".to_string(), "END".to_string()],
        ),
        CommandKind::Help => Reply::new(ReplyCode::HelpMessage, "Ask your admin"),
        CommandKind::Pwd => Reply::new_with_string(ReplyCode::DirCreated, format!("\"{}\" is the current directory", session.cwd.display())),
        CommandKind::Cwd { path } => handle_cwd(params, session, path).await,
        CommandKind::Cdup => handle_cwd(params, session, PathBuf::from("..")).await,
        CommandKind::Opts { option: Opt::Utf8 { .. } } => Reply::new(ReplyCode::CommandOkay, "Always in UTF8 mode"),
        CommandKind::Type { param } => {
            session.codec_config.ty = param;
            Reply::new(ReplyCode::CommandOkay, "Type set successfully")
        }
        CommandKind::Stru { structure } => {
            session.codec_config.structure = structure;
            Reply::new(ReplyCode::CommandOkay, "Structure set successfully")
        }
        CommandKind::Mode { mode } => {
            session.codec_config.mode = mode;
            Reply::new(ReplyCode::CommandOkay, "Mode set successfully")
        }
        CommandKind::Rest { offset } => {
            session.restart_marker = Some(offset);
            Reply::new_with_string(ReplyCode::FileActionPending, format!("Restarting at {}. Send STOR/RETR to initiate transfer.", offset))
        }
        CommandKind::Pasv => handle_pasv(params, session).await,
        CommandKind::Epsv => handle_epsv(params, session).await,
        CommandKind::Port { addr } => {
            session.transfer.set_active_endpoint(addr);
            Reply::new(ReplyCode::CommandOkay, "PORT command successful")
        }
        CommandKind::Retr { path } => handle_retr(params, session, path, framed, active).await,
        CommandKind::Stor { path } => handle_stor(params, session, path, WriteMode::Replace, framed, active).await,
        CommandKind::Appe { path } => handle_stor(params, session, path, WriteMode::Append, framed, active).await,
        CommandKind::Stou => {
            let name = unique_name();
            handle_stor(params, session, name, WriteMode::Unique, framed, active).await
        }
        CommandKind::List { path } => handle_list(params, session, path, framed, active).await,
        CommandKind::Nlst { path } => handle_list(params, session, path, framed, active).await,
        CommandKind::Dele { path } => handle_dele(params, session, path).await,
        CommandKind::Rmd { path } => handle_rmd(params, session, path).await,
        CommandKind::Mkd { path } => handle_mkd(params, session, path).await,
        CommandKind::Rnfr { path } => {
            session.rename_from = Some(path);
            Reply::new(ReplyCode::FileActionPending, "Ready for RNTO")
        }
        CommandKind::Rnto { path } => handle_rnto(params, session, path).await,
        CommandKind::Size { path } => handle_size(params, session, path).await,
        CommandKind::Mdtm { .. } => Reply::new(ReplyCode::CommandNotImplementedForParameter, "MDTM not supported by this backend"),
        CommandKind::Allo => Reply::new(ReplyCode::CommandOkay, "Allocating space: done"),
        CommandKind::Abor => handle_abor(session, framed, active).await,
        CommandKind::Quit => {
            if session.auth.is_logged_in() {
                notify_presence(params, session, PresenceEvent::LoggedOut).await;
            }
            Reply::new(ReplyCode::ClosingControlConnection, "Bye")
        }
        CommandKind::Stat { path: None } => Reply::new(ReplyCode::SystemStatus, "Server status OK"),
        CommandKind::Stat { path: Some(_) } => Reply::new(ReplyCode::CommandNotImplementedForParameter, "STAT on a path is not supported"),
        CommandKind::Other { command_name, .. } => Reply::new_with_string(ReplyCode::CommandNotImplemented, format!("Unknown command \"{}\"", command_name)),
    }
}

async fn notify_presence<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, event: PresenceEvent)
where
    User: UserDetail,
{
    if let Some(meta) = session.next_event_meta() {
        params.presence_listener.receive_presence_event(event, meta).await;
    }
}

async fn notify_data<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, event: DataEvent)
where
    User: UserDetail,
{
    if let Some(meta) = session.next_event_meta() {
        params.data_listener.receive_data_event(event, meta).await;
    }
}

async fn handle_user<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, username: bytes::Bytes) -> Reply
where
    User: UserDetail,
    Auth: AuthBackend<User>,
{
    let username = String::from_utf8_lossy(&username).to_string();
    // Queried for its side effect of exercising the backend's lookup path; the reply is always
    // 331 regardless of the outcome so as not to leak which usernames exist.
    let _ = params.authenticator.check_user(&username).await;
    session.auth = AuthState::WaitingPass { username };
    Reply::new(ReplyCode::NeedPassword, "Password required")
}

async fn handle_pass<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, password: bytes::Bytes) -> Reply
where
    User: UserDetail,
    Auth: AuthBackend<User>,
{
    let username = match &session.auth {
        AuthState::WaitingPass { username } => username.clone(),
        _ => return Reply::new(ReplyCode::BadCommandSequence, "Send USER first"),
    };
    let password = String::from_utf8_lossy(&password).to_string();
    match params.authenticator.check_pass(&username, &password).await {
        Ok(user) => {
            let user = Arc::new(user);
            if user.account_required() {
                session.auth = AuthState::WaitingAcct { username, user };
                Reply::new(ReplyCode::NeedAccount, "Account required")
            } else {
                session.auth = AuthState::LoggedIn { username, user };
                session.failed_logins = 0;
                notify_presence(params, session, PresenceEvent::LoggedIn).await;
                Reply::new(ReplyCode::UserLoggedIn, "Login successful")
            }
        }
        Err(_) => {
            session.failed_logins += 1;
            session.auth = AuthState::New;
            metrics::add_auth_failure_metric();
            Reply::new(ReplyCode::NotLoggedIn, "Login incorrect")
        }
    }
}

async fn handle_acct<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, account: bytes::Bytes) -> Reply
where
    User: UserDetail,
    Auth: AuthBackend<User>,
{
    let (username, user) = match &session.auth {
        AuthState::WaitingAcct { username, user } => (username.clone(), user.clone()),
        _ => return Reply::new(ReplyCode::BadCommandSequence, "Not expecting ACCT"),
    };
    let account = String::from_utf8_lossy(&account).to_string();
    match params.authenticator.check_acct(&user, &account).await {
        Ok(()) => {
            session.auth = AuthState::LoggedIn { username, user };
            notify_presence(params, session, PresenceEvent::LoggedIn).await;
            Reply::new(ReplyCode::UserLoggedIn, "Login successful")
        }
        Err(_) => Reply::new(ReplyCode::NotLoggedIn, "Login incorrect"),
    }
}

/// Renders a [`StorageError`] as the reply its [`ErrorKind`](rftpd_core::storage::ErrorKind)
/// maps to, dropping the kind's own three-digit prefix from the message text.
fn storage_reply(e: StorageError) -> Reply {
    let code = match e.kind() {
        StorageErrorKind::TransientFileNotAvailable => ReplyCode::TransientFileError,
        StorageErrorKind::PermanentFileNotAvailable | StorageErrorKind::PermanentDirectoryNotAvailable | StorageErrorKind::PermanentDirectoryNotEmpty => {
            ReplyCode::FileError
        }
        StorageErrorKind::PermissionDenied => ReplyCode::FileError,
        StorageErrorKind::ConnectionClosed => ReplyCode::ConnectionClosed,
        StorageErrorKind::LocalError => ReplyCode::LocalError,
        StorageErrorKind::PageTypeUnknown => ReplyCode::PageTypeUnknown,
        StorageErrorKind::InsufficientStorageSpaceError => ReplyCode::OutOfSpace,
        StorageErrorKind::ExceededStorageAllocationError => ReplyCode::ExceededStorageAllocation,
        StorageErrorKind::FileNameNotAllowedError => ReplyCode::BadFileName,
        StorageErrorKind::CommandNotImplemented => ReplyCode::CommandNotImplemented,
    };
    let text = e.kind().to_string();
    let message = text.splitn(2, ' ').nth(1).unwrap_or(&text).to_string();
    Reply::new_with_string(code, message)
}

async fn handle_cwd<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, path: PathBuf) -> Reply
where
    Storage: FilesystemBackend,
    User: UserDetail,
{
    let resolved = match params.storage.resolve(&session.cwd, &path.to_string_lossy()).await {
        Ok(p) => p,
        Err(e) => return storage_reply(e),
    };
    match params.storage.stat(&resolved).await {
        Ok(stat) if stat.is_dir => {
            session.cwd = resolved;
            Reply::new(ReplyCode::FileActionOkay, "Directory changed")
        }
        Ok(_) => Reply::new(ReplyCode::FileError, "Not a directory"),
        Err(e) => storage_reply(e),
    }
}

async fn handle_pasv<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>) -> Reply
where
    User: UserDetail,
{
    let advertise_ip = match params.passive_host {
        PassiveHost::Ip(ip) => ip,
        _ => Ipv4Addr::new(127, 0, 0, 1),
    };
    for port in params.passive_ports.clone() {
        let bind_addr = SocketAddr::new(IpAddr::V4(advertise_ip), port);
        if let Ok(listener) = TcpListener::bind(bind_addr).await {
            let local_addr = listener.local_addr().expect("bound listener has a local address");
            session.transfer.bind_passive(local_addr);
            session.pending_passive_listener = Some(listener);
            let octets = advertise_ip.octets();
            return Reply::new_with_string(
                ReplyCode::EnteringPassiveMode,
                format!(
                    "Entering Passive Mode ({},{},{},{},{},{})",
                    octets[0],
                    octets[1],
                    octets[2],
                    octets[3],
                    local_addr.port() / 256,
                    local_addr.port() % 256
                ),
            );
        }
    }
    Reply::new(ReplyCode::CantOpenDataConnection, "Could not bind a passive port")
}

async fn handle_epsv<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>) -> Reply
where
    User: UserDetail,
{
    for port in params.passive_ports.clone() {
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        if let Ok(listener) = TcpListener::bind(bind_addr).await {
            let local_addr = listener.local_addr().expect("bound listener has a local address");
            session.transfer.bind_passive(local_addr);
            session.pending_passive_listener = Some(listener);
            return Reply::new_with_string(ReplyCode::EnteringExtendedPassiveMode, format!("Entering Extended Passive Mode (|||{}|)", local_addr.port()));
        }
    }
    Reply::new(ReplyCode::CantOpenDataConnection, "Could not bind a passive port")
}

/// Opens the data connection implied by the session's `PORT`/`PASV` state, honoring whichever
/// was issued most recently.
async fn open_data_connection<User: UserDetail>(session: &mut Session<User>, direction: Direction) -> std::io::Result<TcpStream> {
    if let Some(listener) = session.pending_passive_listener.take() {
        let (stream, _) = listener.accept().await?;
        session.transfer.channel_opened(direction);
        Ok(stream)
    } else if let Some(addr) = session.transfer.endpoint() {
        session.transfer.begin_active_connect(direction);
        let stream = TcpStream::connect(addr).await?;
        session.transfer.channel_opened(direction);
        Ok(stream)
    } else {
        Err(std::io::Error::other("no PORT or PASV issued"))
    }
}

/// Sends the `150` reply directly (the real reply for this command has already gone out, or
/// will be sent by the spawned transfer task's eventual [`TransferOutcome`]), ignoring write
/// failures: a broken control socket will surface on the next `framed.next()`/`framed.send()` in
/// `run_loop` regardless.
async fn send_150(framed: &mut Framed<TcpStream, FtpCodec>, msg: &str) {
    let _ = framed.send(Reply::new(ReplyCode::FileStatusOkay, msg)).await;
}

async fn handle_retr<Storage, User, Auth>(
    params: &ControlParams<Storage, User, Auth>,
    session: &mut Session<User>,
    path: String,
    framed: &mut Framed<TcpStream, FtpCodec>,
    active: &mut Option<ActiveTransfer>,
) -> Reply
where
    Storage: FilesystemBackend,
    User: UserDetail,
{
    if session.transfer.is_busy() {
        return Reply::new(ReplyCode::CantOpenDataConnection, "Another transfer is already in progress");
    }
    let resolved = match params.storage.resolve(&session.cwd, &path).await {
        Ok(p) => p,
        Err(e) => return storage_reply(e),
    };
    let offset = session.restart_marker.take().unwrap_or(0);
    let reader = match params.storage.open_read(&resolved, offset).await {
        Ok(r) => r,
        Err(e) => return storage_reply(e),
    };
    let socket = match open_data_connection(session, Direction::Retrieve).await {
        Ok(s) => s,
        Err(e) => {
            session.transfer.reset();
            return Reply::new_with_string(ReplyCode::CantOpenDataConnection, e.to_string());
        }
    };

    let pipeline = CodecPipeline::new(session.codec_config);
    session.transfer.start_transferring();
    send_150(framed, "Opening data connection for transfer").await;

    let abort = Arc::new(Notify::new());
    let task_abort = abort.clone();
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        let mut sent = 0u64;
        loop {
            tokio::select! {
                _ = task_abort.notified() => {
                    let _ = socket.shutdown().await;
                    return TransferOutcome::Aborted;
                }
                result = reader.read(&mut buf) => match result {
                    Ok(0) => break,
                    Ok(n) => {
                        let wire = pipeline.encode(DataBlock::plain(bytes::Bytes::copy_from_slice(&buf[..n])));
                        if socket.write_all(&wire).await.is_err() {
                            return TransferOutcome::Failed(Reply::new(ReplyCode::ConnectionClosed, "Connection closed; transfer aborted"));
                        }
                        sent += n as u64;
                    }
                    Err(_) => return TransferOutcome::Failed(Reply::new(ReplyCode::LocalError, "Error reading from storage backend")),
                }
            }
        }
        let terminator = pipeline.encode(DataBlock::eof());
        let _ = socket.write_all(&terminator).await;
        let _ = socket.shutdown().await;
        TransferOutcome::Retr { path, bytes: sent }
    });
    *active = Some(ActiveTransfer { handle, abort });
    Reply::None
}

async fn handle_stor<Storage, User, Auth>(
    params: &ControlParams<Storage, User, Auth>,
    session: &mut Session<User>,
    path: String,
    mode: WriteMode,
    framed: &mut Framed<TcpStream, FtpCodec>,
    active: &mut Option<ActiveTransfer>,
) -> Reply
where
    Storage: FilesystemBackend,
    User: UserDetail,
{
    if session.transfer.is_busy() {
        return Reply::new(ReplyCode::CantOpenDataConnection, "Another transfer is already in progress");
    }
    let resolved = match params.storage.resolve(&session.cwd, &path).await {
        Ok(p) => p,
        Err(e) => return storage_reply(e),
    };
    let offset = session.restart_marker.take().unwrap_or(0);
    let writer = match params.storage.open_write(&resolved, offset, mode).await {
        Ok(w) => w,
        Err(e) => return storage_reply(e),
    };
    let socket = match open_data_connection(session, Direction::Store).await {
        Ok(s) => s,
        Err(e) => {
            session.transfer.reset();
            return Reply::new_with_string(ReplyCode::CantOpenDataConnection, e.to_string());
        }
    };

    let pipeline = CodecPipeline::new(session.codec_config);
    session.transfer.start_transferring();
    send_150(framed, "Opening data connection for transfer").await;

    let abort = Arc::new(Notify::new());
    let task_abort = abort.clone();
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        let mut received = 0u64;
        loop {
            tokio::select! {
                _ = task_abort.notified() => return TransferOutcome::Aborted,
                result = socket.read(&mut buf) => match result {
                    Ok(0) => break,
                    Ok(n) => {
                        for block in pipeline.decode(&buf[..n]) {
                            received += block.data.len() as u64;
                            if writer.write_all(&block.data).await.is_err() {
                                return TransferOutcome::Failed(Reply::new(ReplyCode::LocalError, "Error writing to storage backend"));
                            }
                        }
                    }
                    Err(_) => return TransferOutcome::Failed(Reply::new(ReplyCode::ConnectionClosed, "Connection closed; transfer aborted")),
                }
            }
        }
        let _ = writer.flush().await;
        TransferOutcome::Stor { path, bytes: received }
    });
    *active = Some(ActiveTransfer { handle, abort });
    Reply::None
}

async fn handle_list<Storage, User, Auth>(
    params: &ControlParams<Storage, User, Auth>,
    session: &mut Session<User>,
    path: Option<String>,
    framed: &mut Framed<TcpStream, FtpCodec>,
    active: &mut Option<ActiveTransfer>,
) -> Reply
where
    Storage: FilesystemBackend,
    User: UserDetail,
{
    if session.transfer.is_busy() {
        return Reply::new(ReplyCode::CantOpenDataConnection, "Another transfer is already in progress");
    }
    let target = path.unwrap_or_default();
    let resolved = match params.storage.resolve(&session.cwd, &target).await {
        Ok(p) => p,
        Err(e) => return storage_reply(e),
    };
    let entries = match params.storage.list(&resolved).await {
        Ok(e) => e,
        Err(e) => return storage_reply(e),
    };
    let socket = match open_data_connection(session, Direction::List).await {
        Ok(s) => s,
        Err(e) => {
            session.transfer.reset();
            return Reply::new_with_string(ReplyCode::CantOpenDataConnection, e.to_string());
        }
    };
    session.transfer.start_transferring();
    send_150(framed, "Opening data connection for directory listing").await;

    let abort = Arc::new(Notify::new());
    let task_abort = abort.clone();
    let handle = tokio::spawn(async move {
        let mut body = entries.join("\r\n");
        if !entries.is_empty() {
            body.push_str("\r\n");
        }
        tokio::select! {
            _ = task_abort.notified() => {
                let _ = socket.shutdown().await;
                return TransferOutcome::Aborted;
            }
            result = socket.write_all(body.as_bytes()) => {
                if result.is_err() {
                    return TransferOutcome::Failed(Reply::new(ReplyCode::ConnectionClosed, "Connection closed; transfer aborted"));
                }
            }
        }
        let _ = socket.shutdown().await;
        TransferOutcome::List
    });
    *active = Some(ActiveTransfer { handle, abort });
    Reply::None
}

async fn handle_dele<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, path: String) -> Reply
where
    Storage: FilesystemBackend,
    User: UserDetail,
{
    match params.storage.resolve(&session.cwd, &path).await {
        Ok(resolved) => match params.storage.remove(&resolved).await {
            Ok(()) => {
                notify_data(params, session, DataEvent::Deleted { path }).await;
                Reply::new(ReplyCode::FileActionOkay, "File deleted")
            }
            Err(e) => storage_reply(e),
        },
        Err(e) => storage_reply(e),
    }
}

async fn handle_rmd<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, path: String) -> Reply
where
    Storage: FilesystemBackend,
    User: UserDetail,
{
    match params.storage.resolve(&session.cwd, &path).await {
        Ok(resolved) => match params.storage.rmdir(&resolved).await {
            Ok(()) => {
                notify_data(params, session, DataEvent::RemovedDir { path }).await;
                Reply::new(ReplyCode::FileActionOkay, "Directory removed")
            }
            Err(e) => storage_reply(e),
        },
        Err(e) => storage_reply(e),
    }
}

async fn handle_mkd<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, path: PathBuf) -> Reply
where
    Storage: FilesystemBackend,
    User: UserDetail,
{
    match params.storage.resolve(&session.cwd, &path.to_string_lossy()).await {
        Ok(resolved) => match params.storage.mkdir(&resolved).await {
            Ok(()) => {
                let reply = Reply::new_with_string(ReplyCode::DirCreated, format!("\"{}\" created", resolved.display()));
                notify_data(params, session, DataEvent::MadeDir { path: resolved.to_string_lossy().into_owned() }).await;
                reply
            }
            Err(e) => storage_reply(e),
        },
        Err(e) => storage_reply(e),
    }
}

async fn handle_rnto<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, to: PathBuf) -> Reply
where
    Storage: FilesystemBackend,
    User: UserDetail,
{
    let from = match session.rename_from.take() {
        Some(p) => p,
        None => return Reply::new(ReplyCode::BadCommandSequence, "RNFR required first"),
    };
    let resolved_to = match params.storage.resolve(&session.cwd, &to.to_string_lossy()).await {
        Ok(p) => p,
        Err(e) => return storage_reply(e),
    };
    match params.storage.rename(&from, &resolved_to).await {
        Ok(()) => {
            notify_data(
                params,
                session,
                DataEvent::Renamed {
                    from: from.to_string_lossy().into_owned(),
                    to: resolved_to.to_string_lossy().into_owned(),
                },
            )
            .await;
            Reply::new(ReplyCode::FileActionOkay, "Rename successful")
        }
        Err(e) => storage_reply(e),
    }
}

async fn handle_size<Storage, User, Auth>(params: &ControlParams<Storage, User, Auth>, session: &mut Session<User>, path: PathBuf) -> Reply
where
    Storage: FilesystemBackend,
    User: UserDetail,
{
    match params.storage.resolve(&session.cwd, &path.to_string_lossy()).await {
        Ok(resolved) => match params.storage.stat(&resolved).await {
            Ok(stat) => Reply::new_with_string(ReplyCode::FileStatus, stat.size.to_string()),
            Err(e) => storage_reply(e),
        },
        Err(e) => storage_reply(e),
    }
}

/// `ABOR` (§4.4): if a transfer task is running, cancels it, force-closing the data channel,
/// replies `426` for the interrupted transfer and then `226` for `ABOR` itself. With nothing in
/// flight, `ABOR` is a no-op `226`.
async fn handle_abor<User: UserDetail>(session: &mut Session<User>, framed: &mut Framed<TcpStream, FtpCodec>, active: &mut Option<ActiveTransfer>) -> Reply {
    if let Some(transfer) = active.take() {
        transfer.cancel().await;
        session.transfer.abort();
        session.transfer.begin_closing();
        session.transfer.reset();
        let _ = framed.send(Reply::new(ReplyCode::ConnectionClosed, "Connection closed; transfer aborted")).await;
    }
    Reply::new(ReplyCode::ClosingDataConnection, "Abort successful")
}

fn unique_name() -> String {
    format!("STOU.{}", uuid::Uuid::new_v4())
}
