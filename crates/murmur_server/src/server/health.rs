#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

/// Readiness follows the number of running chat listeners.
#[derive(Clone, Default)]
pub struct HealthState {
	listeners: Arc<AtomicUsize>,
}

impl HealthState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_listeners(&self, n: usize) {
		self.listeners.store(n, Ordering::Relaxed);
	}

	pub fn listeners(&self) -> usize {
		self.listeners.load(Ordering::Relaxed)
	}

	pub fn is_ready(&self) -> bool {
		self.listeners() > 0
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	Ok(route(req.method(), req.uri().path(), &state))
}

fn route(method: &Method, path: &str, state: &HealthState) -> Response<Full<Bytes>> {
	if method != Method::GET {
		return text_response(StatusCode::METHOD_NOT_ALLOWED, "");
	}

	match path {
		"/healthz" => text_response(StatusCode::OK, "ok"),
		"/readyz" if state.is_ready() => text_response(StatusCode::OK, format!("ready listeners={}", state.listeners())),
		"/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not-ready"),
		_ => text_response(StatusCode::NOT_FOUND, ""),
	}
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body.into()));
	*resp.status_mut() = status;
	resp
}
