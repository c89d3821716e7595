#![forbid(unsafe_code)]

pub mod endpoint {
	/// Default port for both the server listener and the client.
	pub const DEFAULT_PORT: u16 = 18204;

	/// Parsed `tcp://host:port` endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct TcpEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl TcpEndpoint {
		pub fn new(host: impl Into<String>, port: u16) -> Self {
			Self {
				host: host.into(),
				port,
			}
		}

		/// Returns `host:port` (host preserved, IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Same endpoint on another port.
		pub fn with_port(&self, port: u16) -> Self {
			Self {
				host: self.host.clone(),
				port,
			}
		}

		/// Parse `tcp://host:port`; the scheme may be omitted.
		pub fn parse(s: &str) -> Result<Self, String> {
			Self::parse_with(s, false)
		}

		/// Like [`TcpEndpoint::parse`], but port 0 (ephemeral) is allowed.
		/// Use this for listener addresses only.
		pub fn parse_bind(s: &str) -> Result<Self, String> {
			Self::parse_with(s, true)
		}

		fn parse_with(s: &str, allow_ephemeral: bool) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected tcp://host:port)".to_string());
			}

			let rest = s.strip_prefix("tcp://").unwrap_or(s);
			if rest.contains("://") {
				return Err(format!("unsupported endpoint scheme (expected tcp://host:port): {s}"));
			}

			if rest.contains('/') || rest.contains('?') || rest.contains('#') {
				return Err(format!(
					"invalid endpoint (expected tcp://host:port without path/query/fragment): {s}"
				));
			}

			let (host, port_str) = rest
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port, expected tcp://host:port): {s}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected tcp://host:port): {s}"));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!(
					"invalid endpoint host (IPv6 must be bracketed like tcp://[::1]:18204): {s}"
				));
			}

			let port = if allow_ephemeral {
				port_str
					.trim()
					.parse::<u16>()
					.map_err(|_| format!("invalid endpoint port (expected 0..=65535): {s}"))?
			} else {
				parse_port(port_str).map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?
			};

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

	impl std::fmt::Display for TcpEndpoint {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			write!(f, "tcp://{}:{}", self.host, self.port)
		}
	}

	/// Parse a non-zero TCP port.
	pub fn parse_port(s: &str) -> Result<u16, String> {
		let port: u16 = s
			.trim()
			.parse()
			.map_err(|_| format!("invalid port (expected 1..=65535): {s}"))?;

		if port == 0 {
			return Err(format!("invalid port (expected 1..=65535): {s}"));
		}

		Ok(port)
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn parses_dns_hostname() {
			let e = TcpEndpoint::parse("tcp://chat.example.com:4000").unwrap();
			assert_eq!(e.host, "chat.example.com");
			assert_eq!(e.port, 4000);
			assert_eq!(e.hostport(), "chat.example.com:4000");
		}

		#[test]
		fn scheme_is_optional() {
			let e = TcpEndpoint::parse("127.0.0.1:18204").unwrap();
			assert_eq!(e, TcpEndpoint::new("127.0.0.1", 18204));
			assert_eq!(e.to_string(), "tcp://127.0.0.1:18204");
		}

		#[test]
		fn parses_bracketed_ipv6() {
			let e = TcpEndpoint::parse("tcp://[::1]:18204").unwrap();
			assert_eq!(e.host, "[::1]");
			assert_eq!(e.hostport(), "[::1]:18204");
		}

		#[test]
		fn rejects_other_schemes_and_bad_hosts() {
			assert!(TcpEndpoint::parse("quic://127.0.0.1:18204").is_err());
			let err = TcpEndpoint::parse("tcp://::1:18204").unwrap_err();
			assert!(err.to_lowercase().contains("ipv6"));
			assert!(TcpEndpoint::parse("tcp://:18204").is_err());
		}

		#[test]
		fn rejects_path_query_fragment() {
			assert!(TcpEndpoint::parse("tcp://127.0.0.1:18204/").is_err());
			assert!(TcpEndpoint::parse("tcp://127.0.0.1:18204?x=y").is_err());
			assert!(TcpEndpoint::parse("tcp://127.0.0.1:18204#frag").is_err());
		}

		#[test]
		fn rejects_port_zero_and_missing_port() {
			assert!(TcpEndpoint::parse("tcp://127.0.0.1:0").is_err());
			assert!(TcpEndpoint::parse("tcp://127.0.0.1").is_err());
			assert!(parse_port("70000").is_err());
			assert_eq!(parse_port(" 4000 ").unwrap(), 4000);
		}

		#[test]
		fn bind_endpoint_allows_ephemeral_port() {
			let e = TcpEndpoint::parse_bind("tcp://127.0.0.1:0").unwrap();
			assert_eq!(e, TcpEndpoint::new("127.0.0.1", 0));
			assert_eq!(e.hostport(), "127.0.0.1:0");
			assert_eq!(TcpEndpoint::parse_bind("[::1]:18204").unwrap().port, 18204);

			assert!(TcpEndpoint::parse_bind("tcp://127.0.0.1:65536").is_err());
			assert!(TcpEndpoint::parse_bind("tcp://127.0.0.1").is_err());
			assert!(TcpEndpoint::parse_bind("quic://127.0.0.1:0").is_err());
			assert!(TcpEndpoint::parse("tcp://127.0.0.1:0").is_err());
		}

		#[test]
		fn with_port_keeps_host() {
			let e = TcpEndpoint::new("0.0.0.0", 1).with_port(9000);
			assert_eq!(e.hostport(), "0.0.0.0:9000");
		}
	}
}

pub mod env {
	/// Parse the usual spellings of a boolean environment value.
	pub fn parse_env_bool(v: &str) -> Option<bool> {
		match v.trim().to_ascii_lowercase().as_str() {
			"1" | "true" | "yes" | "on" => Some(true),
			"0" | "false" | "no" | "off" => Some(false),
			_ => None,
		}
	}

	/// Read a trimmed, non-empty environment variable.
	pub fn non_empty_var(name: &str) -> Option<String> {
		std::env::var(name).ok().and_then(|v| {
			let v = v.trim().to_string();
			(!v.is_empty()).then_some(v)
		})
	}

}
