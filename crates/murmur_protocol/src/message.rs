#![forbid(unsafe_code)]

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use crate::framing::{FramingError, HEADER_LENGTH, MAX_BODY_LENGTH, format_header, frame_len_from_body_len};

/// One chat message: a body of at most `MAX_BODY_LENGTH` bytes.
///
/// Cloning is cheap (the body is reference counted), so the same message can
/// sit in the room history and in many outbound queues at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChatMessage {
	body: Bytes,
}

impl ChatMessage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build a message, silently truncating the body to `MAX_BODY_LENGTH`.
	pub fn from_body(body: impl Into<Bytes>) -> Self {
		let mut msg = Self::new();
		msg.set_body(body);
		msg
	}

	/// Build a message, rejecting bodies longer than `MAX_BODY_LENGTH`.
	pub fn try_from_body(body: impl Into<Bytes>) -> Result<Self, FramingError> {
		let body = body.into();
		if body.len() > MAX_BODY_LENGTH {
			return Err(FramingError::BodyTooLarge {
				len: body.len(),
				max: MAX_BODY_LENGTH,
			});
		}
		Ok(Self { body })
	}

	/// Body read off the wire; its length was already validated by the header.
	pub(crate) fn from_wire_body(body: Bytes) -> Self {
		debug_assert!(body.len() <= MAX_BODY_LENGTH);
		Self { body }
	}

	/// Replace the body. Longer input is truncated, not rejected.
	pub fn set_body(&mut self, body: impl Into<Bytes>) {
		let mut body = body.into();
		body.truncate(MAX_BODY_LENGTH);
		self.body = body;
	}

	pub fn body(&self) -> &[u8] {
		&self.body
	}

	pub fn body_length(&self) -> usize {
		self.body.len()
	}

	/// Body as text, with invalid UTF-8 replaced.
	pub fn body_lossy(&self) -> Cow<'_, str> {
		String::from_utf8_lossy(&self.body)
	}

	/// Length of the full frame on the wire.
	pub fn frame_len(&self) -> usize {
		frame_len_from_body_len(self.body.len())
	}

	/// The header bytes for this message.
	pub fn header(&self) -> [u8; HEADER_LENGTH] {
		format_header(self.body.len())
	}

	/// Encode into a standalone frame.
	pub fn encode(&self) -> Bytes {
		let mut buf = BytesMut::with_capacity(self.frame_len());
		self.encode_into(&mut buf);
		buf.freeze()
	}

	/// Append the frame to `buf`.
	pub fn encode_into(&self, buf: &mut BytesMut) {
		buf.reserve(self.frame_len());
		buf.put_slice(&self.header());
		buf.put_slice(&self.body);
	}
}
