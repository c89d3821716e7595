#![forbid(unsafe_code)]

pub mod framing;
pub mod message;
pub mod outbound;
pub mod stream;

pub use framing::{
	FramingError, HEADER_LENGTH, MAX_BODY_LENGTH, MAX_HEADER_VALUE, MAX_RECENT_MESSAGES, decode_header, decode_message,
	encode_header, frame_len_from_body_len, try_decode_message_from_buffer,
};
pub use message::ChatMessage;
pub use outbound::OutboundQueue;
pub use stream::{FrameReader, FrameWriter, ReadState, StreamError, read_message, write_message};

/// Protocol version constants.
pub mod version {
	/// Wire format revision. The format has no handshake, so this is only
	/// reported in logs.
	pub const PROTOCOL_VERSION: u32 = 1;
}
