#![forbid(unsafe_code)]

mod config;
mod server;

use std::path::PathBuf;

use murmur_protocol::version::PROTOCOL_VERSION;
use murmur_util::endpoint::{DEFAULT_PORT, TcpEndpoint};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::console::{ConsoleExit, ServerControl, run_console};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::room_service::spawn_room_service;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: murmur_server [--bind tcp://host:port] [--config path] [--no-console]\n\
\n\
Options:\n\
\t--bind        Bind endpoint (default: tcp://127.0.0.1:{DEFAULT_PORT})\n\
\t             Format: tcp://host:port (port 0 picks a free port)\n\
\t--config      Config file (default: ~/.murmur/config.toml)\n\
\t--no-console  Do not read commands from stdin; run until Ctrl-C\n\
\t--help        Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct Args {
	bind: Option<TcpEndpoint>,
	config: Option<PathBuf>,
	no_console: bool,
}

fn parse_args() -> Args {
	let mut args = Args::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let endpoint = TcpEndpoint::parse_bind(&v).unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				});
				args.bind = Some(endpoint);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			"--no-console" => args.no_console = true,
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,murmur_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("murmur_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let endpoint = args
		.bind
		.or_else(|| server_cfg.server.bind.clone())
		.unwrap_or_else(|| TcpEndpoint::new("127.0.0.1", DEFAULT_PORT));

	let (room, room_task) = spawn_room_service(server_cfg.room.room_config());
	let mut control = ServerControl::new(
		room,
		server_cfg.room.session_settings(),
		endpoint,
		health_state,
	);

	info!(
		endpoint = %control.endpoint(),
		protocol_version = PROTOCOL_VERSION,
		history_capacity = server_cfg.room.history_capacity,
		"murmur_server ready"
	);

	if server_cfg.server.autostart {
		let addr = control.start().await?;
		println!("Server started on {addr}");
	}

	let console_exit = if args.no_console {
		ConsoleExit::InputClosed
	} else {
		let stdin = tokio::io::BufReader::new(tokio::io::stdin());
		run_console(&mut control, stdin).await?
	};

	if console_exit == ConsoleExit::InputClosed {
		info!("no console input; running until Ctrl-C");
		tokio::signal::ctrl_c().await?;
	}

	let stopped = control.stop();
	info!(listeners = stopped, "shutting down");

	drop(control);
	room_task.abort();

	Ok(())
}
