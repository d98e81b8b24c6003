//! Contains code pertaining to the FTP *control* channel: command parsing, sequencing, and
//! reply encoding.

pub mod command;
pub use command::{Command, CommandCode};

pub(crate) mod control_loop;
pub(crate) use control_loop::{spawn_control_channel_loop, ControlParams};

pub(crate) mod codecs;
pub(crate) use codecs::FtpCodec;

pub(crate) mod reply;
pub use reply::{Reply, ReplyCode};

mod error;
pub(crate) use error::{ControlChanError, ControlChanErrorKind};

mod line_parser;
