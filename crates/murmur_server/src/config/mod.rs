#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use murmur_protocol::MAX_RECENT_MESSAGES;
use murmur_util::endpoint::TcpEndpoint;
use murmur_util::env::{non_empty_var, parse_env_bool};
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::room::RoomConfig;
use crate::server::session::SessionSettings;

/// Default config path: `~/.murmur/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".murmur").join("config.toml"))
}

/// Load the server config from TOML (if present) and apply env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg)?;

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub room: RoomSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Listener endpoint; `None` falls back to the CLI default.
	pub bind: Option<TcpEndpoint>,
	/// Start a listener at boot instead of waiting for `start`.
	pub autostart: bool,
	/// Optional Prometheus exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			bind: None,
			autostart: true,
			metrics_bind: None,
			health_bind: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct RoomSettings {
	pub history_capacity: usize,
	pub log_messages: bool,
}

impl Default for RoomSettings {
	fn default() -> Self {
		Self {
			history_capacity: MAX_RECENT_MESSAGES,
			log_messages: true,
		}
	}
}

impl RoomSettings {
	pub fn room_config(&self) -> RoomConfig {
		RoomConfig {
			history_capacity: self.history_capacity,
		}
	}

	pub fn session_settings(&self) -> SessionSettings {
		SessionSettings {
			log_messages: self.log_messages,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	room: FileRoomSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	bind: Option<String>,
	autostart: Option<bool>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileRoomSettings {
	history_capacity: Option<usize>,
	log_messages: Option<bool>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let bind = match file.server.bind.filter(|s| !s.trim().is_empty()) {
			Some(s) => Some(TcpEndpoint::parse_bind(&s).map_err(|e| anyhow!(e)).context("server.bind")?),
			None => None,
		};

		let defaults = RoomSettings::default();
		Ok(Self {
			server: ServerSettings {
				bind,
				autostart: file.server.autostart.unwrap_or(true),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
			},
			room: RoomSettings {
				history_capacity: clamp_history_capacity(
					file.room.history_capacity.unwrap_or(defaults.history_capacity),
				),
				log_messages: file.room.log_messages.unwrap_or(defaults.log_messages),
			},
		})
	}
}

fn clamp_history_capacity(requested: usize) -> usize {
	let clamped = requested.clamp(1, MAX_RECENT_MESSAGES);
	if clamped != requested {
		warn!(
			requested,
			clamped, "room config: history_capacity out of range (1..=100); clamped"
		);
	}
	clamped
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => parse_toml(&s).map(Some),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn parse_toml(s: &str) -> anyhow::Result<FileConfig> {
	toml::from_str(s).context("parse TOML")
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Some(v) = non_empty_var("MURMUR_BIND") {
		match TcpEndpoint::parse_bind(&v) {
			Ok(ep) => {
				info!(bind = %ep, "server config: bind overridden by env");
				cfg.server.bind = Some(ep);
			}
			Err(e) => warn!(error = %e, "server config: ignoring invalid MURMUR_BIND"),
		}
	}

	if let Some(v) = non_empty_var("MURMUR_AUTOSTART")
		&& let Some(autostart) = parse_env_bool(&v)
	{
		cfg.server.autostart = autostart;
		info!(autostart, "server config: autostart overridden by env");
	}

	if let Some(v) = non_empty_var("MURMUR_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = non_empty_var("MURMUR_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = non_empty_var("MURMUR_HISTORY_CAPACITY")
		&& let Ok(capacity) = v.parse::<usize>()
	{
		cfg.room.history_capacity = clamp_history_capacity(capacity);
		info!(
			capacity = cfg.room.history_capacity,
			"room config: history_capacity overridden by env"
		);
	}

	if let Some(v) = non_empty_var("MURMUR_LOG_MESSAGES")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.room.log_messages = enabled;
		info!(enabled, "room config: log_messages overridden by env");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn from_toml(s: &str) -> anyhow::Result<ServerConfig> {
		ServerConfig::from_file(parse_toml(s)?)
	}

	#[test]
	fn empty_file_gives_defaults() {
		let cfg = from_toml("").unwrap();
		assert!(cfg.server.bind.is_none());
		assert!(cfg.server.autostart);
		assert_eq!(cfg.room.history_capacity, MAX_RECENT_MESSAGES);
		assert!(cfg.room.log_messages);
	}

	#[test]
	fn parses_all_sections() {
		let cfg = from_toml(
			r#"
[server]
bind = "tcp://0.0.0.0:4000"
autostart = false
metrics_bind = "127.0.0.1:9100"
health_bind = "  "

[room]
history_capacity = 10
log_messages = false
"#,
		)
		.unwrap();

		assert_eq!(cfg.server.bind, Some(TcpEndpoint::new("0.0.0.0", 4000)));
		assert!(!cfg.server.autostart);
		assert_eq!(cfg.server.metrics_bind.as_deref(), Some("127.0.0.1:9100"));
		assert!(cfg.server.health_bind.is_none());
		assert_eq!(cfg.room.history_capacity, 10);
		assert_eq!(cfg.room.room_config().history_capacity, 10);
		assert!(!cfg.room.session_settings().log_messages);
	}

	#[test]
	fn history_capacity_is_clamped() {
		let cfg = from_toml("[room]\nhistory_capacity = 1000\n").unwrap();
		assert_eq!(cfg.room.history_capacity, MAX_RECENT_MESSAGES);

		let cfg = from_toml("[room]\nhistory_capacity = 0\n").unwrap();
		assert_eq!(cfg.room.room_config().history_capacity, 1);
	}

	#[test]
	fn invalid_bind_is_an_error() {
		let err = from_toml("[server]\nbind = \"quic://127.0.0.1:4000\"\n").unwrap_err();
		assert!(format!("{err:#}").contains("server.bind"));
	}

	#[test]
	fn bind_accepts_ephemeral_port() {
		let cfg = from_toml("[server]\nbind = \"tcp://127.0.0.1:0\"\n").unwrap();
		assert_eq!(cfg.server.bind, Some(TcpEndpoint::new("127.0.0.1", 0)));
	}

	#[test]
	fn missing_file_is_not_an_error() {
		let path = std::env::temp_dir().join("murmur-config-does-not-exist").join("config.toml");
		assert!(read_toml_if_exists(&path).unwrap().is_none());
	}
}
