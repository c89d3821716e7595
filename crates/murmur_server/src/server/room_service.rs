#![forbid(unsafe_code)]

use murmur_protocol::ChatMessage;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::server::room::{Participant as _, Room, RoomConfig, SessionId};
use crate::server::session::SessionHandle;

/// Requests handled by the room loop, in arrival order.
#[derive(Debug)]
pub enum RoomCommand {
	Join(SessionHandle),
	Leave(SessionId),
	Deliver(ChatMessage),
	Stats(oneshot::Sender<RoomStats>),
}

/// Point-in-time view of the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStats {
	pub members: Vec<SessionId>,
	pub history_len: usize,
	pub history_capacity: usize,
	pub delivered_total: u64,
}

/// Cloneable handle that submits work to the room loop.
///
/// Every mutation of membership and history goes through here, so the room
/// itself is only ever touched by one task.
#[derive(Debug, Clone)]
pub struct RoomHandle {
	tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
	/// Returns `false` if the room loop has stopped.
	pub fn join(&self, handle: SessionHandle) -> bool {
		self.tx.send(RoomCommand::Join(handle)).is_ok()
	}

	pub fn leave(&self, id: SessionId) -> bool {
		self.tx.send(RoomCommand::Leave(id)).is_ok()
	}

	pub fn deliver(&self, msg: ChatMessage) -> bool {
		self.tx.send(RoomCommand::Deliver(msg)).is_ok()
	}

	pub async fn stats(&self) -> Option<RoomStats> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.tx.send(RoomCommand::Stats(reply_tx)).ok()?;
		reply_rx.await.ok()
	}
}

/// Owner of the process-wide `Room`.
#[derive(Debug)]
pub struct RoomService {
	room: Room<SessionHandle>,
	rx: mpsc::UnboundedReceiver<RoomCommand>,
	delivered_total: u64,
}

impl RoomService {
	pub fn new(cfg: RoomConfig) -> (Self, RoomHandle) {
		let (tx, rx) = mpsc::unbounded_channel();
		let service = Self {
			room: Room::new(&cfg),
			rx,
			delivered_total: 0,
		};
		(service, RoomHandle { tx })
	}

	/// Process commands until every `RoomHandle` is dropped.
	pub async fn run(mut self) {
		info!(history_capacity = self.room.history_capacity(), "room service started");

		while let Some(cmd) = self.rx.recv().await {
			self.handle(cmd);
		}

		info!(
			members = self.room.member_count(),
			delivered = self.delivered_total,
			"room service exiting (all handles dropped)"
		);
	}

	fn handle(&mut self, cmd: RoomCommand) {
		match cmd {
			RoomCommand::Join(handle) => {
				let id = handle.id();
				let replayed = self.room.history_len();
				if self.room.join(handle) {
					info!(session_id = %id, replayed, members = self.room.member_count(), "joined room");
				} else {
					debug!(session_id = %id, "duplicate join ignored");
				}
			}
			RoomCommand::Leave(id) => {
				if self.room.leave(id) {
					info!(session_id = %id, members = self.room.member_count(), "left room");
				} else {
					debug!(session_id = %id, "leave for non-member ignored");
				}
			}
			RoomCommand::Deliver(msg) => {
				debug!(
					len = msg.body_length(),
					members = self.room.member_count(),
					"broadcasting message"
				);
				self.room.deliver(msg);
				self.delivered_total += 1;
				metrics::counter!("murmur_server_messages_delivered_total").increment(1);
			}
			RoomCommand::Stats(reply) => {
				let _ = reply.send(RoomStats {
					members: self.room.member_ids(),
					history_len: self.room.history_len(),
					history_capacity: self.room.history_capacity(),
					delivered_total: self.delivered_total,
				});
			}
		}

		metrics::gauge!("murmur_server_room_members").set(self.room.member_count() as f64);
		metrics::gauge!("murmur_server_history_len").set(self.room.history_len() as f64);
	}
}

/// Spawn the room loop on the current runtime.
pub fn spawn_room_service(cfg: RoomConfig) -> (RoomHandle, JoinHandle<()>) {
	let (service, handle) = RoomService::new(cfg);
	let task = tokio::spawn(service.run());
	(handle, task)
}
