#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::room::SessionId;
use crate::server::room_service::RoomHandle;
use crate::server::session::{SessionEnd, SessionSettings, run_session};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Process-wide session id source; shared by every listener.
#[derive(Debug, Clone)]
pub struct SessionIdAllocator {
	next: Arc<AtomicU64>,
}

impl Default for SessionIdAllocator {
	fn default() -> Self {
		Self {
			next: Arc::new(AtomicU64::new(1)),
		}
	}
}

impl SessionIdAllocator {
	pub fn next_id(&self) -> SessionId {
		SessionId::new(self.next.fetch_add(1, Ordering::Relaxed))
	}
}

/// A bound TCP listener that feeds accepted sockets into the room.
pub struct Listener {
	listener: TcpListener,
	local_addr: SocketAddr,
	room: RoomHandle,
	ids: SessionIdAllocator,
	settings: SessionSettings,
}

impl Listener {
	/// Bind `hostport` (`host:port`; DNS names are resolved by tokio).
	pub async fn bind(
		hostport: &str,
		room: RoomHandle,
		ids: SessionIdAllocator,
		settings: SessionSettings,
	) -> anyhow::Result<Self> {
		let listener = TcpListener::bind(hostport)
			.await
			.with_context(|| format!("bind tcp listener on {hostport}"))?;
		let local_addr = listener.local_addr().context("read listener local address")?;

		Ok(Self {
			listener,
			local_addr,
			room,
			ids,
			settings,
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	/// Accept forever. Each socket gets its own session task.
	pub async fn run(self) {
		info!(addr = %self.local_addr, "listening");

		loop {
			let (stream, remote) = match self.listener.accept().await {
				Ok(accepted) => accepted,
				Err(e) => {
					warn!(addr = %self.local_addr, error = %e, "accept failed");
					tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
					continue;
				}
			};

			metrics::counter!("murmur_server_connections_total").increment(1);
			if let Err(e) = stream.set_nodelay(true) {
				debug!(%remote, error = %e, "set_nodelay failed");
			}

			let id = self.ids.next_id();
			info!(session_id = %id, %remote, "accepted connection");

			let room = self.room.clone();
			let settings = self.settings.clone();
			tokio::spawn(async move {
				let outcome = run_session(id, stream, room, settings).await;
				match &outcome.end {
					SessionEnd::PeerClosed => info!(
						session_id = %outcome.id,
						%remote,
						frames_in = outcome.frames_in,
						frames_out = outcome.frames_out,
						"session closed"
					),
					end => warn!(
						session_id = %outcome.id,
						%remote,
						frames_in = outcome.frames_in,
						frames_out = outcome.frames_out,
						reason = %end,
						"session closed with error"
					),
				}
			});
		}
	}

	pub fn spawn(self) -> ListenerHandle {
		let addr = self.local_addr;
		ListenerHandle {
			addr,
			task: tokio::spawn(self.run()),
		}
	}
}

/// A running accept loop.
#[derive(Debug)]
pub struct ListenerHandle {
	addr: SocketAddr,
	task: JoinHandle<()>,
}

impl ListenerHandle {
	pub fn local_addr(&self) -> SocketAddr {
		self.addr
	}

	/// Stop accepting. Sessions already running are left alone.
	pub fn stop(self) {
		self.task.abort();
		info!(addr = %self.addr, "listener stopped");
	}

	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}
