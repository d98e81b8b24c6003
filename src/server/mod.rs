//! Contains the [`Server`](crate::Server) struct that is used to configure and control an FTP server instance.

pub(crate) mod controlchan;
pub(crate) mod datachan;
pub(crate) mod ftpserver;
pub(crate) mod session;
pub(crate) mod shutdown;

pub(crate) use controlchan::command::Command;
pub(crate) use controlchan::{ControlChanError, ControlChanErrorKind};
pub(crate) use controlchan::{Reply, ReplyCode};
