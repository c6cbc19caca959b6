//! Protocol module containing message types, the line codec, and channel halves.

pub mod channel;
pub mod codec;
pub mod messages;

pub use channel::{split_stream, ChannelError, MessageReader, MessageWriter};
pub use codec::{encode_line, DecodeReport, FrameError, LineDecoder, DEFAULT_MAX_LINE_BYTES};
pub use messages::*;
