#![forbid(unsafe_code)]

use bytes::BytesMut;
use thiserror::Error;

use crate::message::ChatMessage;

/// Width of the ASCII decimal length prefix.
pub const HEADER_LENGTH: usize = 4;

/// Largest body a frame may carry.
pub const MAX_BODY_LENGTH: usize = 70;

/// Number of recently delivered messages replayed to new room members.
pub const MAX_RECENT_MESSAGES: usize = 100;

/// Largest value representable in `HEADER_LENGTH` decimal digits.
pub const MAX_HEADER_VALUE: usize = 10usize.pow(HEADER_LENGTH as u32) - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
	#[error("invalid frame header: {header:?}")]
	InvalidHeader {
		header: String,
	},

	#[error("frame body exceeds maximum size: len={len} max={max}")]
	BodyTooLarge {
		len: usize,
		max: usize,
	},

	#[error("body length {len} does not fit in the frame header")]
	HeaderOverflow {
		len: usize,
	},

	#[error("insufficient data: need={need} have={have}")]
	InsufficientData {
		need: usize,
		have: usize,
	},
}

/// Encode `body_length` as a right-justified, space-padded decimal header.
pub fn encode_header(body_length: usize) -> Result<[u8; HEADER_LENGTH], FramingError> {
	if body_length > MAX_HEADER_VALUE {
		return Err(FramingError::HeaderOverflow { len: body_length });
	}

	Ok(format_header(body_length))
}

/// Caller guarantees `value <= MAX_HEADER_VALUE`.
pub(crate) fn format_header(value: usize) -> [u8; HEADER_LENGTH] {
	let mut out = [b' '; HEADER_LENGTH];
	let mut n = value;

	for slot in out.iter_mut().rev() {
		*slot = b'0' + (n % 10) as u8;
		n /= 10;
		if n == 0 {
			break;
		}
	}

	out
}

/// Parse a header into a body length.
///
/// Leading spaces (and leading zeros) are accepted; anything else that is not
/// an ASCII digit makes the header invalid. Values above `MAX_BODY_LENGTH` are
/// rejected: the stream that produced them cannot be resynchronized.
pub fn decode_header(header: &[u8]) -> Result<usize, FramingError> {
	let invalid = || FramingError::InvalidHeader {
		header: String::from_utf8_lossy(header).into_owned(),
	};

	if header.len() != HEADER_LENGTH {
		return Err(invalid());
	}

	let start = header.iter().position(|b| *b != b' ').unwrap_or(header.len());
	let digits = &header[start..];

	if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
		return Err(invalid());
	}

	let len = digits.iter().fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
	if len > MAX_BODY_LENGTH {
		return Err(FramingError::BodyTooLarge {
			len,
			max: MAX_BODY_LENGTH,
		});
	}

	Ok(len)
}

/// Compute total frame length (header + body).
#[inline]
pub fn frame_len_from_body_len(body_length: usize) -> usize {
	HEADER_LENGTH + body_length
}

/// Decode a single message from the start of `src`.
pub fn decode_message(src: &[u8]) -> Result<(ChatMessage, usize), FramingError> {
	if src.len() < HEADER_LENGTH {
		return Err(FramingError::InsufficientData {
			need: HEADER_LENGTH,
			have: src.len(),
		});
	}

	let body_length = decode_header(&src[..HEADER_LENGTH])?;
	let need = frame_len_from_body_len(body_length);
	if src.len() < need {
		return Err(FramingError::InsufficientData { need, have: src.len() });
	}

	let msg = ChatMessage::from_wire_body(bytes::Bytes::copy_from_slice(&src[HEADER_LENGTH..need]));
	Ok((msg, need))
}

/// Try to decode a single message from a growable buffer.
pub fn try_decode_message_from_buffer(buf: &mut BytesMut) -> Result<Option<ChatMessage>, FramingError> {
	if buf.len() < HEADER_LENGTH {
		return Ok(None);
	}

	let body_length = decode_header(&buf[..HEADER_LENGTH])?;
	let need = frame_len_from_body_len(body_length);
	if buf.len() < need {
		return Ok(None);
	}

	let mut frame = buf.split_to(need);
	let body = frame.split_off(HEADER_LENGTH).freeze();
	Ok(Some(ChatMessage::from_wire_body(body)))
}
