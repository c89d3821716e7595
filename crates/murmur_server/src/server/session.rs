#![forbid(unsafe_code)]

use std::fmt;

use murmur_protocol::{ChatMessage, FrameReader, FrameWriter, FramingError, StreamError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::server::room::{Participant, SessionId};
use crate::server::room_service::RoomHandle;

/// The room's reference to a session: the sending side of its outbound queue.
///
/// Deliberately not `Clone`. The room holds the only handle, so once the
/// session leaves and its queue drains, the write half shuts down.
#[derive(Debug)]
pub struct SessionHandle {
	id: SessionId,
	outbound: mpsc::UnboundedSender<ChatMessage>,
}

impl SessionHandle {
	pub fn channel(id: SessionId) -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
		let (outbound, rx) = mpsc::unbounded_channel();
		(Self { id, outbound }, rx)
	}
}

impl Participant for SessionHandle {
	fn id(&self) -> SessionId {
		self.id
	}

	fn deliver(&self, msg: &ChatMessage) {
		// A closed queue means the write half already failed and the session
		// is on its way out of the room.
		if self.outbound.send(msg.clone()).is_err() {
			debug!(session_id = %self.id, "deliver to closed session dropped");
		}
	}
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
	pub log_messages: bool,
}

impl Default for SessionSettings {
	fn default() -> Self {
		Self { log_messages: true }
	}
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
	/// Peer closed the stream between frames.
	PeerClosed,
	/// Header did not decode; the stream cannot be resynchronized.
	ProtocolViolation(FramingError),
	ReadFailed(String),
	WriteFailed(String),
	/// The room service is gone.
	RoomClosed,
}

impl fmt::Display for SessionEnd {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SessionEnd::PeerClosed => f.write_str("peer closed"),
			SessionEnd::ProtocolViolation(e) => write!(f, "protocol violation: {e}"),
			SessionEnd::ReadFailed(e) => write!(f, "read failed: {e}"),
			SessionEnd::WriteFailed(e) => write!(f, "write failed: {e}"),
			SessionEnd::RoomClosed => f.write_str("room closed"),
		}
	}
}

/// Summary returned once both halves of a session are finished.
#[derive(Debug)]
pub struct SessionOutcome {
	pub id: SessionId,
	pub end: SessionEnd,
	pub frames_in: u64,
	pub frames_out: u64,
}

struct ActiveSessionGuard;

impl ActiveSessionGuard {
	fn new() -> Self {
		metrics::gauge!("murmur_server_active_sessions").increment(1.0);
		Self
	}
}

impl Drop for ActiveSessionGuard {
	fn drop(&mut self) {
		metrics::gauge!("murmur_server_active_sessions").decrement(1.0);
	}
}

/// Drive one connection until both its halves are done.
///
/// The session joins the room before its first read, so the history replay is
/// queued ahead of any live message. Reading loops header → body → deliver.
/// Any read or write error makes the session leave the room (leaving twice is
/// harmless). Frames already queued keep draining after the leave; the write
/// half closes once the room has dropped its handle and the queue is empty.
pub async fn run_session<S>(id: SessionId, stream: S, room: RoomHandle, settings: SessionSettings) -> SessionOutcome
where
	S: AsyncRead + AsyncWrite + Send + 'static,
{
	let _guard = ActiveSessionGuard::new();

	let (read_half, write_half) = tokio::io::split(stream);
	let (handle, mut outbound_rx) = SessionHandle::channel(id);

	if !room.join(handle) {
		warn!(session_id = %id, "room service unavailable; dropping connection");
		return SessionOutcome {
			id,
			end: SessionEnd::RoomClosed,
			frames_in: 0,
			frames_out: 0,
		};
	}

	let (write_failed_tx, mut write_failed_rx) = oneshot::channel::<String>();
	let writer_room = room.clone();
	let writer = tokio::spawn(async move {
		let mut frame_writer = FrameWriter::new(write_half);
		let res = frame_writer
			.run(&mut outbound_rx, |msg| {
				metrics::counter!("murmur_server_frames_out_total").increment(1);
				debug!(session_id = %id, len = msg.body_length(), "frame written");
			})
			.await;

		if let Err(e) = &res {
			warn!(session_id = %id, error = %e, "write failed; leaving room");
			writer_room.leave(id);
			let _ = write_failed_tx.send(e.to_string());
		}

		(res, frame_writer.frames_written())
	});

	let mut reader = FrameReader::new(read_half);
	let read_end = tokio::select! {
		end = read_loop(id, &mut reader, &room, &settings) => end,
		failed = &mut write_failed_rx => match failed {
			Ok(e) => SessionEnd::WriteFailed(e),
			Err(_) => SessionEnd::RoomClosed,
		},
	};
	let frames_in = reader.frames_read();
	drop(reader);

	room.leave(id);

	let (end, frames_out) = match writer.await {
		Ok((Ok(()), n)) => (read_end, n),
		Ok((Err(e), n)) => match read_end {
			SessionEnd::PeerClosed => (SessionEnd::WriteFailed(e.to_string()), n),
			other => (other, n),
		},
		Err(join_err) => {
			warn!(session_id = %id, error = %join_err, "session writer task failed");
			(read_end, 0)
		}
	};

	SessionOutcome {
		id,
		end,
		frames_in,
		frames_out,
	}
}

async fn read_loop<R>(id: SessionId, reader: &mut FrameReader<R>, room: &RoomHandle, settings: &SessionSettings) -> SessionEnd
where
	R: AsyncRead + Unpin,
{
	loop {
		match reader.next_message().await {
			Ok(Some(msg)) => {
				metrics::counter!("murmur_server_frames_in_total").increment(1);
				if settings.log_messages {
					info!(session_id = %id, len = msg.body_length(), body = %msg.body_lossy(), "message received");
				}

				if !room.deliver(msg) {
					return SessionEnd::RoomClosed;
				}
			}
			Ok(None) => {
				debug!(session_id = %id, "peer closed connection");
				return SessionEnd::PeerClosed;
			}
			Err(StreamError::Framing(e)) => {
				metrics::counter!("murmur_server_decode_errors_total").increment(1);
				warn!(session_id = %id, error = %e, "protocol violation; closing session");
				return SessionEnd::ProtocolViolation(e);
			}
			Err(StreamError::Io(e)) => {
				debug!(session_id = %id, error = %e, "read failed; closing session");
				return SessionEnd::ReadFailed(e.to_string());
			}
		}
	}
}
