#![forbid(unsafe_code)]

use murmur_client_core::console::{CLIENT_HELP, ClientCommand, parse_client_command};
use murmur_client_core::{ClientConfig, ClientSession, DEFAULT_SERVER_ENDPOINT};
use murmur_protocol::MAX_BODY_LENGTH;
use tokio::io::AsyncBufReadExt as _;
use tokio::task::JoinHandle;
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: murmur_client [--connect tcp://host:port]\n\
\n\
Options:\n\
\t--connect   Server endpoint (alias: --endpoint) (default: {DEFAULT_SERVER_ENDPOINT})\n\
\t            Format: tcp://host:port\n\
\t--help      Show this help\n\
\n\
Examples:\n\
\tmurmur_client --connect tcp://127.0.0.1:18204\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,murmur_client_core=debug".to_string());
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

fn parse_args() -> ClientConfig {
	let mut endpoint = DEFAULT_SERVER_ENDPOINT.to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--connect" | "--endpoint" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--connect must be non-empty (expected tcp://host:port)");
					usage_and_exit();
				}
				endpoint = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	ClientConfig::from_tcp_endpoint(&endpoint).unwrap_or_else(|e| {
		eprintln!("Invalid --connect value: {endpoint}\n{e}");
		usage_and_exit();
	})
}

/// A live connection: the write half plus the task printing what arrives.
struct Connection {
	session: ClientSession,
	events_task: JoinHandle<()>,
}

impl Connection {
	fn is_alive(&self) -> bool {
		!self.events_task.is_finished() && !self.session.is_closed()
	}
}

async fn connect(cfg: &ClientConfig) -> anyhow::Result<Connection> {
	let (session, mut events) = ClientSession::connect(cfg.clone()).await?;

	let events_task = tokio::spawn(async move {
		let res = events
			.run_events_loop(|msg| {
				println!("{}", msg.body_lossy());
			})
			.await;
		match res {
			Ok(()) => println!("Disconnected: server closed the connection"),
			Err(e) => {
				warn!(error = %e, "receive loop failed");
				println!("Disconnected: {e}");
			}
		}
	});

	Ok(Connection { session, events_task })
}

fn send(conn: Option<&Connection>, cfg: &ClientConfig, text: &str) {
	let Some(conn) = conn.filter(|c| c.is_alive()) else {
		println!("Not connected (use `connect`)");
		return;
	};

	match conn.session.write_text(text) {
		Ok(truncated) => {
			if truncated {
				println!("warning: message truncated to {MAX_BODY_LENGTH} bytes");
			}
			println!("Message sent to {} with data: {text}", cfg.hostport());
		}
		Err(e) => println!("send failed: {e}"),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let cfg = parse_args();

	println!("{CLIENT_HELP}");

	let mut conn: Option<Connection> = None;
	let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

	while let Some(line) = lines.next_line().await? {
		let cmd = match parse_client_command(&line) {
			Ok(cmd) => cmd,
			Err(e) => {
				println!("{e}");
				continue;
			}
		};

		match cmd {
			ClientCommand::Empty => {}
			ClientCommand::Help => println!("{CLIENT_HELP}"),
			ClientCommand::Connect => {
				if conn.as_ref().is_some_and(Connection::is_alive) {
					println!("Already connected to {}", cfg.hostport());
					continue;
				}
				println!("Connecting to {}", cfg.hostport());
				match connect(&cfg).await {
					Ok(c) => {
						info!(server = %cfg.hostport(), "connected");
						println!("Connected!");
						conn = Some(c);
					}
					Err(e) => println!("connect failed: {e:#}"),
				}
			}
			ClientCommand::Send(Some(text)) => send(conn.as_ref(), &cfg, &text),
			ClientCommand::Send(None) => match lines.next_line().await? {
				Some(text) => send(conn.as_ref(), &cfg, &text),
				None => break,
			},
			ClientCommand::Exit => break,
		}
	}

	if let Some(conn) = conn {
		conn.events_task.abort();
		if let Err(e) = conn.session.finish().await {
			warn!(error = %e, "error while closing session");
		}
	}

	Ok(())
}
