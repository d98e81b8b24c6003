//! The plain TCP listener that accepts control connections and hands each one to the
//! control-channel dispatcher.

use super::ServerError;
use crate::server::controlchan::{spawn_control_channel_loop, ControlParams};
use rftpd_core::auth::{AuthBackend, UserDetail};
use rftpd_core::storage::FilesystemBackend;
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub(crate) struct Listener<Storage, User, Auth> {
    pub bind_address: SocketAddr,
    pub logger: slog::Logger,
    pub params: ControlParams<Storage, User, Auth>,
}

impl<Storage, User, Auth> Listener<Storage, User, Auth>
where
    Storage: FilesystemBackend + 'static,
    User: UserDetail + 'static,
    Auth: AuthBackend<User> + 'static,
{
    pub async fn listen(self) -> std::result::Result<(), ServerError> {
        let Listener { logger, bind_address, params } = self;
        let listener = TcpListener::bind(bind_address).await?;
        slog::info!(logger, "Listening for control connections on {:?}", bind_address);
        loop {
            match listener.accept().await {
                Ok((tcp_stream, remote_addr)) => {
                    slog::info!(logger, "Incoming control connection from {:?}", remote_addr);
                    spawn_control_channel_loop(params.clone(), tcp_stream, remote_addr);
                }
                Err(err) => {
                    slog::error!(logger, "Error accepting incoming control connection: {:?}", err);
                }
            }
        }
    }
}
