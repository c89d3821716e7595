#![forbid(unsafe_code)]

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use murmur_protocol::{ChatMessage, MAX_RECENT_MESSAGES};

/// Stable identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
	pub const fn new(raw: u64) -> Self {
		Self(raw)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "s{}", self.0)
	}
}

/// Anything the room can fan messages out to.
pub trait Participant {
	fn id(&self) -> SessionId;

	/// Hand a message to the participant. Must not block.
	fn deliver(&self, msg: &ChatMessage);
}

/// Configuration for `Room`.
#[derive(Debug, Clone)]
pub struct RoomConfig {
	/// Messages kept for replay, clamped to `1..=MAX_RECENT_MESSAGES`.
	pub history_capacity: usize,
}

impl Default for RoomConfig {
	fn default() -> Self {
		Self {
			history_capacity: MAX_RECENT_MESSAGES,
		}
	}
}

/// The broadcast domain: current members plus a bounded history.
#[derive(Debug)]
pub struct Room<P> {
	members: BTreeMap<SessionId, P>,
	history: VecDeque<ChatMessage>,
	history_capacity: usize,
}

impl<P: Participant> Room<P> {
	pub fn new(cfg: &RoomConfig) -> Self {
		let history_capacity = cfg.history_capacity.clamp(1, MAX_RECENT_MESSAGES);
		Self {
			members: BTreeMap::new(),
			history: VecDeque::with_capacity(history_capacity),
			history_capacity,
		}
	}

	/// Add a member and replay the history to it, oldest first.
	///
	/// Joining twice with the same id is a no-op (no second replay); the
	/// duplicate participant is dropped. Returns whether the member was added.
	pub fn join(&mut self, participant: P) -> bool {
		let id = participant.id();
		if self.members.contains_key(&id) {
			return false;
		}

		for msg in &self.history {
			participant.deliver(msg);
		}

		self.members.insert(id, participant);
		true
	}

	/// Remove a member and drop its participant. Returns `false` for absent ids.
	pub fn leave(&mut self, id: SessionId) -> bool {
		self.members.remove(&id).is_some()
	}

	/// Record `msg` in the history and hand it to every member, sender included.
	pub fn deliver(&mut self, msg: ChatMessage) {
		self.history.push_back(msg.clone());
		while self.history.len() > self.history_capacity {
			self.history.pop_front();
		}

		for member in self.members.values() {
			member.deliver(&msg);
		}
	}

	pub fn contains(&self, id: SessionId) -> bool {
		self.members.contains_key(&id)
	}

	pub fn member_count(&self) -> usize {
		self.members.len()
	}

	pub fn member_ids(&self) -> Vec<SessionId> {
		self.members.keys().copied().collect()
	}

	pub fn history(&self) -> impl Iterator<Item = &ChatMessage> {
		self.history.iter()
	}

	pub fn history_len(&self) -> usize {
		self.history.len()
	}

	pub fn history_capacity(&self) -> usize {
		self.history_capacity
	}
}
