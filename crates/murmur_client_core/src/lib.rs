#![forbid(unsafe_code)]

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use murmur_protocol::{ChatMessage, FrameReader, FrameWriter, FramingError, MAX_BODY_LENGTH, StreamError};
use murmur_util::endpoint::{DEFAULT_PORT, TcpEndpoint};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod console;

/// Default server endpoint for the standalone client.
pub const DEFAULT_SERVER_ENDPOINT: &str = "tcp://127.0.0.1:18204";

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Remote server host (DNS name or IP literal).
	pub server_host: String,

	/// Remote server TCP port.
	pub server_port: u16,

	/// Resolved remote server address override.
	pub server_addr: Option<SocketAddr>,

	/// Timeout per connect attempt.
	pub connect_timeout: Duration,
}

impl ClientConfig {
	/// Parse a `tcp://host:port` endpoint into `(host, port)`.
	pub fn parse_tcp_endpoint(endpoint: &str) -> Result<(String, u16), ClientCoreError> {
		let e = TcpEndpoint::parse(endpoint)
			.map_err(|msg| ClientCoreError::Connect(format!("invalid endpoint (expected tcp://host:port): {msg}")))?;
		Ok((e.host, e.port))
	}

	/// Convenience: create a config from `tcp://host:port`.
	pub fn from_tcp_endpoint(endpoint: &str) -> Result<Self, ClientCoreError> {
		let (host, port) = Self::parse_tcp_endpoint(endpoint)?;
		Ok(Self {
			server_host: host,
			server_port: port,
			server_addr: None,
			..Self::default()
		})
	}

	pub fn hostport(&self) -> String {
		format!("{}:{}", self.server_host, self.server_port)
	}
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			server_host: "127.0.0.1".to_string(),
			server_port: DEFAULT_PORT,
			server_addr: None,
			connect_timeout: Duration::from_secs(10),
		}
	}
}

/// Errors for client core operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	/// Connection establishment failed.
	#[error("failed to connect: {0}")]
	Connect(String),

	/// Protocol framing error from the server side of the stream.
	#[error(transparent)]
	Framing(#[from] FramingError),

	/// IO error.
	#[error("io error: {0}")]
	Io(String),

	/// The session was closed locally or its writer stopped.
	#[error("session closed")]
	Closed,

	/// Other error.
	#[error("error: {0}")]
	Other(String),
}

impl From<anyhow::Error> for ClientCoreError {
	fn from(e: anyhow::Error) -> Self {
		ClientCoreError::Other(format!("{e:#}"))
	}
}

impl From<StreamError> for ClientCoreError {
	fn from(e: StreamError) -> Self {
		match e {
			StreamError::Io(e) => ClientCoreError::Io(e.to_string()),
			StreamError::Framing(e) => ClientCoreError::Framing(e),
		}
	}
}

/// Write half of a client connection.
///
/// Messages are queued on an unbounded channel and written in order by a
/// dedicated task, one frame at a time.
pub struct ClientSession {
	outbound: Option<mpsc::UnboundedSender<ChatMessage>>,
	writer: Option<JoinHandle<io::Result<u64>>>,
	remote: Option<SocketAddr>,
}

/// Read half of a client connection.
pub struct SessionEvents<R> {
	reader: FrameReader<R>,
}

impl ClientSession {
	/// Resolve, connect and split the stream.
	pub async fn connect(cfg: ClientConfig) -> Result<(Self, SessionEvents<OwnedReadHalf>), ClientCoreError> {
		let hostport = cfg.hostport();
		let connect_timeout = cfg.connect_timeout;

		let candidates: Vec<SocketAddr> = match cfg.server_addr {
			Some(addr) => vec![addr],
			None => {
				let addrs = hostport
					.to_socket_addrs()
					.map_err(|e| ClientCoreError::Connect(format!("failed to resolve {hostport}: {e}")))?;

				let addrs: Vec<SocketAddr> = addrs.collect();
				if addrs.is_empty() {
					return Err(ClientCoreError::Connect(format!(
						"DNS resolution returned no addresses for {hostport}"
					)));
				}
				addrs
			}
		};

		let mut last_err: Option<String> = None;
		let mut stream: Option<TcpStream> = None;

		for server_addr in candidates {
			match tokio::time::timeout(connect_timeout, TcpStream::connect(server_addr)).await {
				Ok(Ok(s)) => {
					stream = Some(s);
					break;
				}
				Ok(Err(e)) => {
					last_err = Some(format!("connect failed (addr={server_addr}): {e}"));
				}
				Err(_) => {
					last_err = Some(format!("connect timeout after {connect_timeout:?} (addr={server_addr})"));
				}
			}
		}

		let stream = stream.ok_or_else(|| {
			ClientCoreError::Connect(last_err.unwrap_or_else(|| format!("connect failed (no addresses attempted) ({hostport})")))
		})?;

		if let Err(e) = stream.set_nodelay(true) {
			debug!(error = %e, "set_nodelay failed");
		}
		let remote = stream.peer_addr().ok();
		info!(remote = ?remote, "connected");

		let (read_half, write_half) = stream.into_split();
		let mut session = Self::spawn_writer(write_half);
		session.remote = remote;

		Ok((
			session,
			SessionEvents {
				reader: FrameReader::new(read_half),
			},
		))
	}

	/// Build a session over any byte stream (used with in-memory pipes).
	pub fn from_stream<S>(stream: S) -> (Self, SessionEvents<ReadHalf<S>>)
	where
		S: AsyncRead + AsyncWrite + Send + 'static,
	{
		let (read_half, write_half) = tokio::io::split(stream);
		(
			Self::spawn_writer(write_half),
			SessionEvents {
				reader: FrameReader::new(read_half),
			},
		)
	}

	fn spawn_writer<W>(write_half: W) -> Self
	where
		W: AsyncWrite + Unpin + Send + 'static,
	{
		let (tx, mut rx) = mpsc::unbounded_channel::<ChatMessage>();
		let writer = tokio::spawn(async move {
			let mut frame_writer = FrameWriter::new(write_half);
			let res = frame_writer
				.run(&mut rx, |msg| debug!(len = msg.body_length(), "frame sent"))
				.await;
			if let Err(e) = &res {
				warn!(error = %e, frames = frame_writer.frames_written(), "write failed; closing session");
			}
			res.map(|()| frame_writer.frames_written())
		});

		Self {
			outbound: Some(tx),
			writer: Some(writer),
			remote: None,
		}
	}

	pub fn remote_addr(&self) -> Option<SocketAddr> {
		self.remote
	}

	/// Queue a message for the write task.
	pub fn write(&self, msg: ChatMessage) -> Result<(), ClientCoreError> {
		let tx = self.outbound.as_ref().ok_or(ClientCoreError::Closed)?;
		tx.send(msg).map_err(|_| ClientCoreError::Closed)
	}

	/// Queue `text`, truncated to the body limit. Returns whether it was cut.
	pub fn write_text(&self, text: &str) -> Result<bool, ClientCoreError> {
		let truncated = text.len() > MAX_BODY_LENGTH;
		self.write(ChatMessage::from_body(text.as_bytes().to_vec()))?;
		Ok(truncated)
	}

	/// Stop accepting writes. Queued frames still go out, then the write half
	/// shuts down.
	pub fn close(&mut self) {
		if self.outbound.take().is_some() {
			debug!("client session closing");
		}
	}

	/// Close and wait for the write task. Returns frames written.
	pub async fn finish(mut self) -> Result<u64, ClientCoreError> {
		self.close();
		let Some(writer) = self.writer.take() else {
			return Ok(0);
		};
		match writer.await {
			Ok(Ok(n)) => Ok(n),
			Ok(Err(e)) => Err(ClientCoreError::Io(e.to_string())),
			Err(e) => Err(ClientCoreError::Other(format!("writer task failed: {e}"))),
		}
	}

	pub fn is_closed(&self) -> bool {
		match &self.outbound {
			Some(tx) => tx.is_closed(),
			None => true,
		}
	}
}

impl<R: AsyncRead + Unpin> SessionEvents<R> {
	/// Next message, or `None` once the server closed the stream.
	pub async fn next_message(&mut self) -> Result<Option<ChatMessage>, ClientCoreError> {
		Ok(self.reader.next_message().await?)
	}

	/// Run the receive loop until EOF or error.
	pub async fn run_events_loop<F>(&mut self, mut on_message: F) -> Result<(), ClientCoreError>
	where
		F: FnMut(ChatMessage),
	{
		while let Some(msg) = self.next_message().await? {
			debug!(len = msg.body_length(), "message received");
			on_message(msg);
		}

		info!(frames = self.reader.frames_read(), "server closed the stream");
		Ok(())
	}
}
