#![forbid(unsafe_code)]

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc;
use tracing::debug;

use crate::framing::{FramingError, HEADER_LENGTH, decode_header};
use crate::message::ChatMessage;
use crate::outbound::OutboundQueue;

#[derive(Debug, Error)]
pub enum StreamError {
	#[error("io error: {0}")]
	Io(#[from] io::Error),

	#[error(transparent)]
	Framing(#[from] FramingError),
}

/// Where a `FrameReader` is in the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
	AwaitingHeader,
	AwaitingBody { body_length: usize },
	Closed,
}

/// Read half of the frame protocol: header, then body, then the next header.
#[derive(Debug)]
pub struct FrameReader<R> {
	reader: R,
	state: ReadState,
	frames_read: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
	pub fn new(reader: R) -> Self {
		Self {
			reader,
			state: ReadState::AwaitingHeader,
			frames_read: 0,
		}
	}

	pub fn state(&self) -> ReadState {
		self.state
	}

	pub fn frames_read(&self) -> u64 {
		self.frames_read
	}

	/// Read the next complete message.
	///
	/// `Ok(None)` means the peer closed the stream between frames. Any error
	/// (including EOF inside a frame) leaves the reader `Closed`.
	pub async fn next_message(&mut self) -> Result<Option<ChatMessage>, StreamError> {
		if self.state == ReadState::Closed {
			return Ok(None);
		}

		match self.read_frame().await {
			Ok(Some(msg)) => {
				self.frames_read += 1;
				self.state = ReadState::AwaitingHeader;
				Ok(Some(msg))
			}
			Ok(None) => {
				self.state = ReadState::Closed;
				Ok(None)
			}
			Err(e) => {
				self.state = ReadState::Closed;
				Err(e)
			}
		}
	}

	async fn read_frame(&mut self) -> Result<Option<ChatMessage>, StreamError> {
		let mut header = [0u8; HEADER_LENGTH];
		if !read_header(&mut self.reader, &mut header).await? {
			return Ok(None);
		}

		let body_length = decode_header(&header)?;
		self.state = ReadState::AwaitingBody { body_length };

		let mut body = vec![0u8; body_length];
		self.reader.read_exact(&mut body).await?;

		Ok(Some(ChatMessage::from_wire_body(body.into())))
	}
}

/// Fill `header`, returning `false` on EOF before the first byte.
async fn read_header<R: AsyncRead + Unpin>(reader: &mut R, header: &mut [u8; HEADER_LENGTH]) -> io::Result<bool> {
	let mut filled = 0;

	while filled < header.len() {
		let n = reader.read(&mut header[filled..]).await?;
		if n == 0 {
			if filled == 0 {
				return Ok(false);
			}
			return Err(io::Error::new(
				io::ErrorKind::UnexpectedEof,
				format!("stream closed inside frame header ({filled}/{HEADER_LENGTH} bytes)"),
			));
		}
		filled += n;
	}

	Ok(true)
}

/// Read a single message from `reader`.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<ChatMessage>, StreamError> {
	FrameReader::new(reader).next_message().await
}

/// Write a whole frame and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &ChatMessage) -> io::Result<()> {
	writer.write_all(&msg.encode()).await?;
	writer.flush().await
}

/// Write half of the frame protocol, draining an `OutboundQueue`.
#[derive(Debug)]
pub struct FrameWriter<W> {
	writer: W,
	queue: OutboundQueue,
	frames_written: u64,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
	pub fn new(writer: W) -> Self {
		Self {
			writer,
			queue: OutboundQueue::new(),
			frames_written: 0,
		}
	}

	/// Queue a frame. Returns `true` if the queue was idle.
	pub fn enqueue(&mut self, msg: ChatMessage) -> bool {
		self.queue.push(msg)
	}

	/// Frames fully written so far, including before a failed write.
	pub fn frames_written(&self) -> u64 {
		self.frames_written
	}

	/// Write the head frame in full, then pop it. Returns whether frames remain.
	pub async fn write_head(&mut self) -> io::Result<bool> {
		let Some(head) = self.queue.front() else {
			return Ok(false);
		};

		write_message(&mut self.writer, head).await?;
		self.frames_written += 1;
		Ok(self.queue.complete_head())
	}

	/// Drain frames arriving on `rx` until every sender is gone and the queue
	/// is empty, then shut the writer down.
	///
	/// Frames that arrive while a write is in flight wait in the channel and
	/// are moved into the queue before the next write, so order is preserved.
	/// A failed shutdown after a full drain is logged, not returned.
	pub async fn run<F>(&mut self, rx: &mut mpsc::UnboundedReceiver<ChatMessage>, mut on_written: F) -> io::Result<()>
	where
		F: FnMut(&ChatMessage),
	{
		loop {
			if self.queue.is_idle() {
				match rx.recv().await {
					Some(msg) => {
						self.enqueue(msg);
					}
					None => break,
				}
			}

			while let Ok(msg) = rx.try_recv() {
				self.enqueue(msg);
			}

			let Some(head) = self.queue.front().cloned() else {
				continue;
			};
			self.write_head().await?;
			on_written(&head);
		}

		if let Err(e) = self.writer.shutdown().await {
			debug!(error = %e, frames = self.frames_written, "shutdown after drain failed");
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::pin::Pin;
	use std::task::{Context, Poll};

	use super::*;

	/// Sink that accepts `budget` bytes, then fails writes. Shutdown can be
	/// made to fail too.
	struct LimitedSink {
		budget: usize,
		fail_shutdown: bool,
	}

	impl AsyncWrite for LimitedSink {
		fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
			if self.budget == 0 {
				return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink full")));
			}
			let n = buf.len().min(self.budget);
			self.budget -= n;
			Poll::Ready(Ok(n))
		}

		fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
			Poll::Ready(Ok(()))
		}

		fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
			if self.fail_shutdown {
				Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "already gone")))
			} else {
				Poll::Ready(Ok(()))
			}
		}
	}

	#[tokio::test]
	async fn reader_walks_header_then_body() {
		let (mut client, server) = tokio::io::duplex(64);
		let mut reader = FrameReader::new(server);
		assert_eq!(reader.state(), ReadState::AwaitingHeader);

		client.write_all(b"   2hi").await.expect("write");
		let msg = reader.next_message().await.expect("read").expect("message");
		assert_eq!(msg.body(), b"hi");
		assert_eq!(reader.state(), ReadState::AwaitingHeader);
		assert_eq!(reader.frames_read(), 1);

		drop(client);
		assert!(reader.next_message().await.expect("clean eof").is_none());
		assert_eq!(reader.state(), ReadState::Closed);
	}

	#[tokio::test]
	async fn eof_inside_a_frame_is_an_io_error() {
		let (mut client, server) = tokio::io::duplex(64);
		let mut reader = FrameReader::new(server);

		client.write_all(b"  10abc").await.expect("write");
		drop(client);

		match reader.next_message().await {
			Err(StreamError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
			other => panic!("expected io error, got {other:?}"),
		}
		assert_eq!(reader.state(), ReadState::Closed);
	}

	#[tokio::test]
	async fn invalid_header_closes_the_reader() {
		let (mut client, server) = tokio::io::duplex(64);
		let mut reader = FrameReader::new(server);

		client.write_all(b"  99").await.expect("write");
		match reader.next_message().await {
			Err(StreamError::Framing(FramingError::BodyTooLarge { len: 99, .. })) => {}
			other => panic!("expected framing error, got {other:?}"),
		}
		assert!(reader.next_message().await.expect("closed").is_none());
	}

	#[tokio::test]
	async fn writer_drains_in_enqueue_order_and_stops_when_senders_drop() {
		let (client, mut server) = tokio::io::duplex(256);
		let (tx, mut rx) = mpsc::unbounded_channel();

		tx.send(ChatMessage::from_body("m1")).expect("send");
		tx.send(ChatMessage::from_body("m2")).expect("send");
		tx.send(ChatMessage::from_body("m3")).expect("send");
		drop(tx);

		let mut seen = Vec::new();
		let mut writer = FrameWriter::new(client);
		writer
			.run(&mut rx, |m| seen.push(m.body_lossy().into_owned()))
			.await
			.expect("drain");
		assert_eq!(writer.frames_written(), 3);
		assert_eq!(seen, vec!["m1", "m2", "m3"]);
		drop(writer);

		let mut wire = Vec::new();
		server.read_to_end(&mut wire).await.expect("read");
		assert_eq!(&wire[..], b"   2m1   2m2   2m3");
	}

	#[tokio::test]
	async fn failed_write_keeps_the_count_of_frames_already_sent() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		for body in ["m1", "m2", "m3"] {
			tx.send(ChatMessage::from_body(body)).expect("send");
		}

		// Room for the first frame and half of the second.
		let mut writer = FrameWriter::new(LimitedSink {
			budget: 9,
			fail_shutdown: false,
		});
		let mut seen = 0;
		let err = writer.run(&mut rx, |_| seen += 1).await.expect_err("second frame fails");
		assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
		assert_eq!(writer.frames_written(), 1);
		assert_eq!(seen, 1);
	}

	#[tokio::test]
	async fn shutdown_failure_after_drain_is_not_an_error() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		tx.send(ChatMessage::from_body("last")).expect("send");
		drop(tx);

		let mut writer = FrameWriter::new(LimitedSink {
			budget: 64,
			fail_shutdown: true,
		});
		writer.run(&mut rx, |_| {}).await.expect("drain succeeds");
		assert_eq!(writer.frames_written(), 1);
	}
}
