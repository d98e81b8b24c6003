//! The FTP *data* channel: the codec pipeline that translates between wire bytes and local
//! file bytes, and the transfer controller that tracks a data connection's lifecycle.

mod codec;
mod transfer;

pub use codec::{CodecConfig, CodecPipeline, DataBlock};
pub use transfer::{Direction, TransferController, TransferState};
