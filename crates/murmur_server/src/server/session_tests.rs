#![forbid(unsafe_code)]

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::Duration;

use murmur_client_core::{ClientConfig, ClientSession, SessionEvents};
use murmur_protocol::{ChatMessage, FramingError, read_message, write_message};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, ReadBuf};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;

use crate::server::listener::{Listener, SessionIdAllocator};
use crate::server::room::{RoomConfig, SessionId};
use crate::server::room_service::{RoomHandle, spawn_room_service};
use crate::server::session::{SessionEnd, SessionSettings, run_session};

const WAIT: Duration = Duration::from_secs(2);

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("MURMUR_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

async fn start_server(cfg: RoomConfig) -> (RoomHandle, SocketAddr) {
	init_test_logging();
	let (room, _task) = spawn_room_service(cfg);
	let listener = Listener::bind(
		"127.0.0.1:0",
		room.clone(),
		SessionIdAllocator::default(),
		SessionSettings::default(),
	)
	.await
	.expect("bind listener");
	let addr = listener.local_addr();
	let _handle = listener.spawn();
	(room, addr)
}

async fn connect_client(addr: SocketAddr) -> (ClientSession, SessionEvents<OwnedReadHalf>) {
	let cfg = ClientConfig {
		server_addr: Some(addr),
		..ClientConfig::default()
	};
	ClientSession::connect(cfg).await.expect("client connect")
}

async fn wait_for_members(room: &RoomHandle, n: usize) {
	timeout(WAIT, async {
		loop {
			let stats = room.stats().await.expect("room running");
			if stats.members.len() == n {
				return;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("room never reached {n} member(s)"));
}

async fn recv_text<R: AsyncRead + Unpin>(events: &mut SessionEvents<R>) -> String {
	timeout(WAIT, events.next_message())
		.await
		.expect("expected a message within timeout")
		.expect("read ok")
		.expect("stream open")
		.body_lossy()
		.into_owned()
}

/// Test stream that fails reads and/or writes; otherwise reads never complete
/// and writes are swallowed. With `fail_writes`, the first `write_budget`
/// bytes are still accepted.
struct FaultyStream {
	fail_reads: bool,
	fail_writes: bool,
	write_budget: usize,
}

impl AsyncRead for FaultyStream {
	fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
		if self.fail_reads {
			Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "injected read failure")))
		} else {
			Poll::Pending
		}
	}
}

impl AsyncWrite for FaultyStream {
	fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
		if !self.fail_writes {
			return Poll::Ready(Ok(buf.len()));
		}
		if self.write_budget == 0 {
			return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure")));
		}
		let n = buf.len().min(self.write_budget);
		self.write_budget -= n;
		Poll::Ready(Ok(n))
	}

	fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Poll::Ready(Ok(()))
	}

	fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Poll::Ready(Ok(()))
	}
}

#[tokio::test]
async fn hi_reaches_both_clients_including_sender() {
	let (room, addr) = start_server(RoomConfig::default()).await;

	let (a, mut a_events) = connect_client(addr).await;
	let (_b, mut b_events) = connect_client(addr).await;
	wait_for_members(&room, 2).await;

	a.write_text("hi").expect("queue write");

	assert_eq!(recv_text(&mut a_events).await, "hi");
	assert_eq!(recv_text(&mut b_events).await, "hi");

	let stats = room.stats().await.expect("room running");
	assert_eq!(stats.history_len, 1);
}

#[tokio::test]
async fn late_joiner_gets_history_before_live_messages() {
	let (room, addr) = start_server(RoomConfig::default()).await;

	let (a, mut a_events) = connect_client(addr).await;
	wait_for_members(&room, 1).await;
	for text in ["one", "two", "three"] {
		a.write_text(text).expect("queue write");
	}
	for expected in ["one", "two", "three"] {
		assert_eq!(recv_text(&mut a_events).await, expected);
	}

	let (_c, mut c_events) = connect_client(addr).await;
	wait_for_members(&room, 2).await;
	a.write_text("four").expect("queue write");

	for expected in ["one", "two", "three", "four"] {
		assert_eq!(recv_text(&mut c_events).await, expected);
	}
}

#[tokio::test]
async fn sender_sees_its_own_messages_in_send_order() {
	let (room, addr) = start_server(RoomConfig::default()).await;
	let (a, mut a_events) = connect_client(addr).await;
	wait_for_members(&room, 1).await;

	let sent: Vec<String> = (0..50).map(|i| format!("msg-{i}")).collect();
	for text in &sent {
		a.write_text(text).expect("queue write");
	}

	let mut got = Vec::new();
	for _ in 0..sent.len() {
		got.push(recv_text(&mut a_events).await);
	}
	assert_eq!(got, sent);
}

#[tokio::test]
async fn protocol_violation_closes_only_the_offender() {
	let (room, addr) = start_server(RoomConfig::default()).await;

	let (b, mut b_events) = connect_client(addr).await;
	let mut bad = TcpStream::connect(addr).await.expect("raw connect");
	wait_for_members(&room, 2).await;

	bad.write_all(b"ab12").await.expect("write garbage header");

	let mut buf = [0u8; 16];
	let closed = timeout(WAIT, bad.read(&mut buf)).await.expect("server should close the offender");
	assert!(matches!(closed, Ok(0) | Err(_)), "expected EOF, got {closed:?}");

	wait_for_members(&room, 1).await;
	b.write_text("still here").expect("queue write");
	assert_eq!(recv_text(&mut b_events).await, "still here");
}

#[tokio::test]
async fn oversized_header_is_a_protocol_violation() {
	init_test_logging();
	let (room, _task) = spawn_room_service(RoomConfig::default());
	let (client_side, server_side) = tokio::io::duplex(256);

	let session = tokio::spawn(run_session(
		SessionId::new(1),
		server_side,
		room.clone(),
		SessionSettings::default(),
	));

	let (mut client_read, mut client_write) = tokio::io::split(client_side);
	client_write.write_all(b"  71").await.expect("write header");

	let outcome = timeout(WAIT, session).await.expect("session ends").expect("no panic");
	assert!(matches!(
		outcome.end,
		SessionEnd::ProtocolViolation(FramingError::BodyTooLarge { len: 71, .. })
	));
	assert!(read_message(&mut client_read).await.expect("clean close").is_none());
	wait_for_members(&room, 0).await;
}

#[tokio::test]
async fn peer_close_drains_queued_frames_first() {
	init_test_logging();
	let (room, _task) = spawn_room_service(RoomConfig::default());
	let (client_side, server_side) = tokio::io::duplex(1024);

	let session = tokio::spawn(run_session(
		SessionId::new(1),
		server_side,
		room.clone(),
		SessionSettings { log_messages: false },
	));

	let (mut client_read, mut client_write) = tokio::io::split(client_side);
	write_message(&mut client_write, &ChatMessage::from_body("bye"))
		.await
		.expect("write frame");
	client_write.shutdown().await.expect("half close");

	let echoed = timeout(WAIT, read_message(&mut client_read))
		.await
		.expect("echo within timeout")
		.expect("read ok")
		.expect("frame before close");
	assert_eq!(echoed.body(), b"bye");

	let outcome = timeout(WAIT, session).await.expect("session ends").expect("no panic");
	assert!(matches!(outcome.end, SessionEnd::PeerClosed));
	assert_eq!(outcome.frames_in, 1);
	assert_eq!(outcome.frames_out, 1);
	assert!(read_message(&mut client_read).await.expect("clean close").is_none());
}

#[tokio::test]
async fn read_failure_leaves_the_room() {
	init_test_logging();
	let (room, _task) = spawn_room_service(RoomConfig::default());

	let outcome = timeout(
		WAIT,
		run_session(
			SessionId::new(9),
			FaultyStream {
				fail_reads: true,
				fail_writes: false,
				write_budget: 0,
			},
			room.clone(),
			SessionSettings::default(),
		),
	)
	.await
	.expect("session ends");

	assert!(matches!(outcome.end, SessionEnd::ReadFailed(_)));
	wait_for_members(&room, 0).await;
}

#[tokio::test]
async fn write_failure_leaves_the_room_and_spares_others() {
	init_test_logging();
	let (room, _task) = spawn_room_service(RoomConfig::default());
	room.deliver(ChatMessage::from_body("in history"));

	let (peer_client, peer_server) = tokio::io::duplex(1024);
	let peer = tokio::spawn(run_session(
		SessionId::new(1),
		peer_server,
		room.clone(),
		SessionSettings::default(),
	));
	let (mut peer_read, mut peer_write) = tokio::io::split(peer_client);
	let replayed = timeout(WAIT, read_message(&mut peer_read))
		.await
		.expect("replay within timeout")
		.expect("read ok")
		.expect("frame");
	assert_eq!(replayed.body(), b"in history");

	// Joining replays history, which triggers the failing write.
	let outcome = timeout(
		WAIT,
		run_session(
			SessionId::new(2),
			FaultyStream {
				fail_reads: false,
				fail_writes: true,
				write_budget: 0,
			},
			room.clone(),
			SessionSettings::default(),
		),
	)
	.await
	.expect("session ends");
	assert!(matches!(outcome.end, SessionEnd::WriteFailed(_)));
	assert_eq!(outcome.frames_out, 0);

	wait_for_members(&room, 1).await;
	room.deliver(ChatMessage::from_body("after"));
	let got = timeout(WAIT, read_message(&mut peer_read))
		.await
		.expect("live message within timeout")
		.expect("read ok")
		.expect("frame");
	assert_eq!(got.body(), b"after");

	peer_write.shutdown().await.expect("half close");
	let peer_outcome = timeout(WAIT, peer).await.expect("peer ends").expect("no panic");
	assert!(matches!(peer_outcome.end, SessionEnd::PeerClosed));
}

#[tokio::test]
async fn write_failure_counts_frames_sent_before_it() {
	init_test_logging();
	let (room, _task) = spawn_room_service(RoomConfig::default());
	for text in ["first", "second", "third"] {
		room.deliver(ChatMessage::from_body(text));
	}

	// "   5first" fits, the replay of "second" does not.
	let outcome = timeout(
		WAIT,
		run_session(
			SessionId::new(3),
			FaultyStream {
				fail_reads: false,
				fail_writes: true,
				write_budget: 12,
			},
			room.clone(),
			SessionSettings::default(),
		),
	)
	.await
	.expect("session ends");

	assert!(matches!(outcome.end, SessionEnd::WriteFailed(_)));
	assert_eq!(outcome.frames_out, 1);
	wait_for_members(&room, 0).await;
}

#[tokio::test]
async fn room_closed_rejects_new_sessions() {
	let (room, task) = spawn_room_service(RoomConfig::default());
	task.abort();
	let _ = task.await;

	let (_client, server_side) = tokio::io::duplex(64);
	let outcome = run_session(SessionId::new(1), server_side, room, SessionSettings::default()).await;
	assert!(matches!(outcome.end, SessionEnd::RoomClosed));
}

#[tokio::test]
async fn many_clients_all_receive_one_broadcast() {
	let (room, addr) = start_server(RoomConfig::default()).await;

	let clients = futures::future::join_all((0..5).map(|_| connect_client(addr))).await;
	wait_for_members(&room, clients.len()).await;

	let mut clients = clients;
	clients[0].0.write_text("all hands").expect("queue write");

	let received = futures::future::join_all(clients.iter_mut().map(|(_, events)| recv_text(events))).await;
	assert!(received.iter().all(|t| t == "all hands"), "got {received:?}");
}
