pub mod error;
mod listener;
pub mod options;

use self::error::ServerError;
use self::listener::Listener;
use self::options::{
    PassiveHost, DEFAULT_GREETING, DEFAULT_IDLE_SESSION_TIMEOUT_SECS, DEFAULT_PASSIVE_HOST, DEFAULT_PASSIVE_PORTS, DEFAULT_SHUTDOWN_GRACE_PERIOD_SECS,
};
use crate::notification::{DataListener, NopListener, PresenceListener};
use crate::server::controlchan::ControlParams;
use crate::server::shutdown;
use rftpd_core::auth::{AuthBackend, UserDetail};
use rftpd_core::storage::FilesystemBackend;

use slog::Drain;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// An instance of an FTP server. It aggregates an [`AuthBackend`] implementation used for
/// authentication and a [`FilesystemBackend`] implementation used as the virtual file system.
///
/// The server is started with the [`listen`](Server::listen) method.
pub struct Server<Storage, User, Auth>
where
    Storage: FilesystemBackend,
    User: UserDetail,
    Auth: AuthBackend<User>,
{
    storage: Arc<Storage>,
    authenticator: Arc<Auth>,
    greeting: Arc<str>,
    passive_ports: Range<u16>,
    passive_host: PassiveHost,
    idle_session_timeout: Duration,
    logger: slog::Logger,
    shutdown: Arc<shutdown::Notifier>,
    shutdown_grace_period: Duration,
    presence_listener: Arc<dyn PresenceListener>,
    data_listener: Arc<dyn DataListener>,
    _user: std::marker::PhantomData<User>,
}

/// Used to create [`Server`]s.
pub struct ServerBuilder<Storage, User, Auth>
where
    Storage: FilesystemBackend,
    User: UserDetail,
    Auth: AuthBackend<User>,
{
    storage: Arc<Storage>,
    authenticator: Arc<Auth>,
    greeting: Arc<str>,
    passive_ports: Range<u16>,
    passive_host: PassiveHost,
    idle_session_timeout: Duration,
    logger: slog::Logger,
    shutdown_grace_period: Duration,
    presence_listener: Arc<dyn PresenceListener>,
    data_listener: Arc<dyn DataListener>,
    _user: std::marker::PhantomData<User>,
}

impl<Storage, User, Auth> ServerBuilder<Storage, User, Auth>
where
    Storage: FilesystemBackend + 'static,
    User: UserDetail + 'static,
    Auth: AuthBackend<User> + 'static,
{
    /// Creates a new `ServerBuilder` over the given storage and authentication backends.
    pub fn new(storage: Arc<Storage>, authenticator: Arc<Auth>) -> Self {
        ServerBuilder {
            storage,
            authenticator,
            greeting: Arc::from(DEFAULT_GREETING),
            passive_ports: DEFAULT_PASSIVE_PORTS,
            passive_host: DEFAULT_PASSIVE_HOST,
            idle_session_timeout: Duration::from_secs(DEFAULT_IDLE_SESSION_TIMEOUT_SECS),
            logger: slog::Logger::root(slog_stdlog::StdLog {}.fuse(), slog::o!()),
            shutdown_grace_period: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_PERIOD_SECS),
            presence_listener: Arc::new(NopListener {}),
            data_listener: Arc::new(NopListener {}),
            _user: std::marker::PhantomData,
        }
    }

    /// Sets the greeting sent to the client after connecting.
    pub fn greeting(mut self, greeting: impl Into<Arc<str>>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Sets the range of passive ports offered to `PASV`/`EPSV`.
    pub fn passive_ports(mut self, range: Range<u16>) -> Self {
        self.passive_ports = range;
        self
    }

    /// Sets how the address advertised in a `PASV`/`EPSV` reply is chosen.
    pub fn passive_host<H: Into<PassiveHost>>(mut self, host: H) -> Self {
        self.passive_host = host.into();
        self
    }

    /// Sets the period of inactivity after which a session's control connection is dropped.
    pub fn idle_session_timeout(mut self, timeout: Duration) -> Self {
        self.idle_session_timeout = timeout;
        self
    }

    /// Sets the logger the server and every session it spawns will log through.
    pub fn logger<L: Into<Option<slog::Logger>>>(mut self, logger: L) -> Self {
        if let Some(logger) = logger.into() {
            self.logger = logger;
        }
        self
    }

    /// Sets how long [`Server::listen`] waits for in-flight sessions to finish after a shutdown
    /// signal before returning anyway.
    pub fn shutdown_grace_period(mut self, grace_period: Duration) -> Self {
        self.shutdown_grace_period = grace_period;
        self
    }

    /// Subscribes `listener` to login/logout events.
    pub fn notify_presence<L: PresenceListener + 'static>(mut self, listener: L) -> Self {
        self.presence_listener = Arc::new(listener);
        self
    }

    /// Subscribes `listener` to storage-mutating command events.
    pub fn notify_data<L: DataListener + 'static>(mut self, listener: L) -> Self {
        self.data_listener = Arc::new(listener);
        self
    }

    /// Finalizes the builder into a runnable [`Server`].
    pub fn build(self) -> Server<Storage, User, Auth> {
        Server {
            storage: self.storage,
            authenticator: self.authenticator,
            greeting: self.greeting,
            passive_ports: self.passive_ports,
            passive_host: self.passive_host,
            idle_session_timeout: self.idle_session_timeout,
            logger: self.logger,
            shutdown: Arc::new(shutdown::Notifier::new()),
            shutdown_grace_period: self.shutdown_grace_period,
            presence_listener: self.presence_listener,
            data_listener: self.data_listener,
            _user: std::marker::PhantomData,
        }
    }
}

impl<Storage, User, Auth> Server<Storage, User, Auth>
where
    Storage: FilesystemBackend + 'static,
    User: UserDetail + 'static,
    Auth: AuthBackend<User> + 'static,
{
    /// Runs the server, accepting control connections on `bind_address` until the process is
    /// terminated.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use rftpd::ServerBuilder;
    /// use std::sync::Arc;
    ///
    /// let server = ServerBuilder::new(Arc::new(my_filesystem_backend), Arc::new(my_auth_backend)).build();
    /// server.listen("127.0.0.1:2121").await.unwrap();
    /// ```
    ///
    /// A `ctrl-c` sends every in-flight session a `421 Service is going down: disconnect` and
    /// waits up to the configured grace period for them to close before returning.
    #[tracing_attributes::instrument(skip(self))]
    pub async fn listen<T: Into<String> + Debug>(self, bind_address: T) -> std::result::Result<(), ServerError> {
        let bind_address: SocketAddr = bind_address.into().parse()?;
        let logger = self.logger.clone();
        let shutdown = self.shutdown.clone();
        let grace_period = self.shutdown_grace_period;
        let params = ControlParams {
            storage: self.storage,
            authenticator: self.authenticator,
            greeting: self.greeting,
            idle_timeout: self.idle_session_timeout,
            passive_ports: self.passive_ports,
            passive_host: self.passive_host,
            logger: self.logger.clone(),
            shutdown: shutdown.clone(),
            presence_listener: self.presence_listener,
            data_listener: self.data_listener,
            _user: std::marker::PhantomData,
        };
        let listen_future = Listener {
            bind_address,
            logger: self.logger,
            params,
        }
        .listen();

        tokio::select! {
            result = listen_future => result,
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(e) = ctrl_c {
                    slog::warn!(logger, "Failed to install ctrl-c handler: {:?}", e);
                    return Ok(());
                }
                slog::info!(logger, "Shutdown signal received, waiting up to {:?} for sessions to finish", grace_period);
                shutdown.notify().await;
                match tokio::time::timeout(grace_period, shutdown.linger()).await {
                    Ok(()) => slog::debug!(logger, "Graceful shutdown complete"),
                    Err(_) => slog::warn!(logger, "Shutdown grace period expired with sessions still open"),
                }
                Ok(())
            }
        }
    }

    /// Services a single, already-accepted `TcpStream` as a control connection, returning once
    /// the channel has ended. Use this instead of [`listen`](Server::listen) when the embedding
    /// application wants to accept connections itself.
    pub async fn service(self, tcp_stream: tokio::net::TcpStream, remote_addr: SocketAddr) {
        let params = ControlParams {
            storage: self.storage,
            authenticator: self.authenticator,
            greeting: self.greeting,
            idle_timeout: self.idle_session_timeout,
            passive_ports: self.passive_ports,
            passive_host: self.passive_host,
            logger: self.logger,
            shutdown: self.shutdown,
            presence_listener: self.presence_listener,
            data_listener: self.data_listener,
            _user: std::marker::PhantomData,
        };
        crate::server::controlchan::spawn_control_channel_loop(params, tcp_stream, remote_addr);
    }
}

impl<Storage, User, Auth> Debug for ServerBuilder<Storage, User, Auth>
where
    Storage: FilesystemBackend,
    User: UserDetail,
    Auth: AuthBackend<User>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("greeting", &self.greeting)
            .field("passive_ports", &self.passive_ports)
            .field("passive_host", &self.passive_host)
            .field("idle_session_timeout", &self.idle_session_timeout)
            .finish()
    }
}

impl<Storage, User, Auth> Debug for Server<Storage, User, Auth>
where
    Storage: FilesystemBackend,
    User: UserDetail,
    Auth: AuthBackend<User>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("greeting", &self.greeting)
            .field("passive_ports", &self.passive_ports)
            .field("passive_host", &self.passive_host)
            .field("idle_session_timeout", &self.idle_session_timeout)
            .finish()
    }
}
