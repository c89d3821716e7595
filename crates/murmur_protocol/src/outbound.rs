#![forbid(unsafe_code)]

use std::collections::VecDeque;

use crate::message::ChatMessage;

/// Per-connection queue of frames that have not been written yet.
///
/// The head stays in place while its write is in flight and is only removed
/// by `complete_head`, so at most one write is outstanding and frames go out
/// in the order they were pushed.
#[derive(Debug, Default)]
pub struct OutboundQueue {
	frames: VecDeque<ChatMessage>,
}

impl OutboundQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a frame. Returns `true` when no write was in progress and the
	/// caller has to start draining.
	pub fn push(&mut self, msg: ChatMessage) -> bool {
		let write_in_progress = !self.frames.is_empty();
		self.frames.push_back(msg);
		!write_in_progress
	}

	/// The frame currently being written.
	pub fn front(&self) -> Option<&ChatMessage> {
		self.frames.front()
	}

	/// Drop the head after its bytes were fully written. Returns whether more
	/// frames are waiting.
	pub fn complete_head(&mut self) -> bool {
		self.frames.pop_front();
		!self.frames.is_empty()
	}

	pub fn is_idle(&self) -> bool {
		self.frames.is_empty()
	}
}
