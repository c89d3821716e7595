#![forbid(unsafe_code)]

use std::net::SocketAddr;

use murmur_protocol::{ChatMessage, MAX_BODY_LENGTH};
use murmur_util::endpoint::{TcpEndpoint, parse_port};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _};
use tracing::{info, warn};

use crate::server::health::HealthState;
use crate::server::listener::{Listener, ListenerHandle, SessionIdAllocator};
use crate::server::room_service::RoomHandle;
use crate::server::session::SessionSettings;

pub const CONSOLE_HELP: &str = "Commands available:\n\
\thelp            This help message\n\
\tsetPort <port>  Set the port used by the next start\n\
\tstart           Start a listener\n\
\tstop            Stop all listeners\n\
\tstatus          Show listeners and room state\n\
\tsay <text>      Broadcast an operator message\n\
\texit            Quit the server";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
	Help,
	SetPort(u16),
	Start,
	Stop,
	Status,
	Say(String),
	Exit,
	Empty,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
	let line = line.trim();
	let (cmd, rest) = match line.split_once(char::is_whitespace) {
		Some((cmd, rest)) => (cmd, rest.trim()),
		None => (line, ""),
	};

	match cmd {
		"" => Ok(ConsoleCommand::Empty),
		"help" => Ok(ConsoleCommand::Help),
		"setPort" | "setport" => {
			if rest.is_empty() {
				return Err("usage: setPort <port>".to_string());
			}
			parse_port(rest).map(ConsoleCommand::SetPort)
		}
		"start" => Ok(ConsoleCommand::Start),
		"stop" => Ok(ConsoleCommand::Stop),
		"status" => Ok(ConsoleCommand::Status),
		"say" => {
			if rest.is_empty() {
				return Err("usage: say <text>".to_string());
			}
			Ok(ConsoleCommand::Say(rest.to_string()))
		}
		"exit" | "quit" => Ok(ConsoleCommand::Exit),
		other => Err(format!("unknown command: {other} (try `help`)")),
	}
}

/// Operator-facing control over listeners and the room.
pub struct ServerControl {
	room: RoomHandle,
	ids: SessionIdAllocator,
	settings: SessionSettings,
	endpoint: TcpEndpoint,
	listeners: Vec<ListenerHandle>,
	health: HealthState,
}

impl ServerControl {
	pub fn new(room: RoomHandle, settings: SessionSettings, endpoint: TcpEndpoint, health: HealthState) -> Self {
		Self {
			room,
			ids: SessionIdAllocator::default(),
			settings,
			endpoint,
			listeners: Vec::new(),
			health,
		}
	}

	pub fn endpoint(&self) -> &TcpEndpoint {
		&self.endpoint
	}

	pub fn set_port(&mut self, port: u16) {
		self.endpoint = self.endpoint.with_port(port);
	}

	/// Bind a listener on the current endpoint and start accepting.
	pub async fn start(&mut self) -> anyhow::Result<SocketAddr> {
		let listener = Listener::bind(
			&self.endpoint.hostport(),
			self.room.clone(),
			self.ids.clone(),
			self.settings.clone(),
		)
		.await?;
		let addr = listener.local_addr();
		self.listeners.push(listener.spawn());
		self.health.set_listeners(self.listeners.len());
		Ok(addr)
	}

	/// Stop every listener; returns how many were running.
	pub fn stop(&mut self) -> usize {
		let n = self.listeners.len();
		for listener in self.listeners.drain(..) {
			listener.stop();
		}
		self.health.set_listeners(0);
		n
	}

	/// Addresses of listeners whose accept loop is still running.
	pub fn listener_addrs(&self) -> Vec<SocketAddr> {
		self.listeners
			.iter()
			.filter(|l| !l.is_finished())
			.map(ListenerHandle::local_addr)
			.collect()
	}

	/// Broadcast through the room as if a member had sent it.
	pub fn say(&self, text: &str) -> bool {
		if text.len() > MAX_BODY_LENGTH {
			warn!(len = text.len(), max = MAX_BODY_LENGTH, "operator message truncated");
		}
		self.room.deliver(ChatMessage::from_body(text.as_bytes().to_vec()))
	}

	pub async fn status(&self) -> String {
		let addrs = self.listener_addrs();
		let listeners = if addrs.is_empty() {
			"none".to_string()
		} else {
			addrs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
		};

		match self.room.stats().await {
			Some(stats) => format!(
				"endpoint: {}\nlisteners: {}\nmembers: {}\nhistory: {}/{}\ndelivered: {}",
				self.endpoint,
				listeners,
				stats.members.len(),
				stats.history_len,
				stats.history_capacity,
				stats.delivered_total
			),
			None => format!("endpoint: {}\nlisteners: {}\nroom: stopped", self.endpoint, listeners),
		}
	}

	/// Run one command. Returns the text to show, or `None` on `exit`.
	pub async fn execute(&mut self, cmd: ConsoleCommand) -> Option<String> {
		let reply = match cmd {
			ConsoleCommand::Empty => String::new(),
			ConsoleCommand::Help => CONSOLE_HELP.to_string(),
			ConsoleCommand::SetPort(port) => {
				self.set_port(port);
				info!(endpoint = %self.endpoint, "console: port changed");
				format!("Server will be on port {port}")
			}
			ConsoleCommand::Start => match self.start().await {
				Ok(addr) => format!("Server started on {addr}"),
				Err(e) => {
					warn!(error = %e, "console: start failed");
					format!("start failed: {e:#}")
				}
			},
			ConsoleCommand::Stop => match self.stop() {
				0 => "Server is not running".to_string(),
				n => format!("Stopped {n} listener(s)"),
			},
			ConsoleCommand::Status => self.status().await,
			ConsoleCommand::Say(text) => {
				if self.say(&text) {
					"sent".to_string()
				} else {
					"room is not running".to_string()
				}
			}
			ConsoleCommand::Exit => return None,
		};
		Some(reply)
	}
}

/// Why the console loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
	Requested,
	InputClosed,
}

/// Read commands line by line until `exit` or end of input.
pub async fn run_console<R>(control: &mut ServerControl, input: R) -> std::io::Result<ConsoleExit>
where
	R: AsyncBufRead + Unpin,
{
	let mut lines = input.lines();
	println!("{CONSOLE_HELP}");

	while let Some(line) = lines.next_line().await? {
		let cmd = match parse_command(&line) {
			Ok(cmd) => cmd,
			Err(e) => {
				println!("{e}");
				continue;
			}
		};

		match control.execute(cmd).await {
			Some(reply) if reply.is_empty() => {}
			Some(reply) => println!("{reply}"),
			None => return Ok(ConsoleExit::Requested),
		}
	}

	Ok(ConsoleExit::InputClosed)
}
