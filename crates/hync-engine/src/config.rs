//! Layered engine configuration.
//!
//! Re-expresses the original system's ambient global configuration (API
//! credentials read from the environment at arbitrary points) as a single
//! typed record built once at startup and passed down by value, mirroring
//! the editor broker's `BrokerConfig` (`idle_lease` passed into
//! `BrokerRuntime::new` rather than read from a global). Layering order:
//! built-in defaults, then an optional TOML file, then `HYNC_*` environment
//! variables — each layer only overrides what it actually sets.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Fully resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Address the WebSocket listener binds.
	pub listen_addr: SocketAddr,
	/// Origins accepted on the WebSocket upgrade handshake.
	pub allowed_origins: Vec<String>,
	/// How long a session may go without receiving a successful ping before
	/// being torn down.
	pub idle_lease: Duration,
	/// Interval between idle keepalive pings sent to each client.
	pub ping_interval: Duration,
	/// Capacity of a session's bounded outbound sink.
	pub outbound_sink_capacity: usize,
	/// How long an outbound enqueue may block before the session is
	/// terminated with `request-timeout`.
	pub outbound_enqueue_timeout: Duration,
	/// Capacity of the store's read-through cache, in entries.
	pub cache_capacity: usize,
	/// Address of the external notification service (secondary transport).
	pub notify_addr: SocketAddr,
	/// Timeout for a single external notification call.
	pub notify_timeout: Duration,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			listen_addr: "0.0.0.0:7777".parse().expect("valid default addr"),
			allowed_origins: Vec::new(),
			idle_lease: Duration::from_secs(60),
			ping_interval: Duration::from_secs(30),
			outbound_sink_capacity: 16,
			outbound_enqueue_timeout: Duration::from_secs(3),
			cache_capacity: 4096,
			notify_addr: "127.0.0.1:7778".parse().expect("valid default addr"),
			notify_timeout: Duration::from_secs(5),
		}
	}
}

/// Every field the on-disk file layer may set; absent fields leave the layer
/// below (defaults, or an earlier file) untouched. Durations and addresses
/// are plain strings here, parsed the same lenient way `with_env_overrides`
/// parses its own variables, so an operator typo degrades to "ignored"
/// rather than a startup panic.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileConfig {
	listen_addr: Option<String>,
	allowed_origins: Option<Vec<String>>,
	idle_lease_secs: Option<u64>,
	ping_interval_secs: Option<u64>,
	outbound_sink_capacity: Option<usize>,
	outbound_enqueue_timeout_secs: Option<u64>,
	cache_capacity: Option<usize>,
	notify_addr: Option<String>,
	notify_timeout_secs: Option<u64>,
}

/// Failure loading the optional TOML configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// The file couldn't be read.
	#[error("reading config file: {0}")]
	Io(#[from] std::io::Error),
	/// The file's contents weren't valid TOML, or didn't match the expected shape.
	#[error("parsing config file: {0}")]
	Toml(#[from] toml::de::Error),
}

impl EngineConfig {
	/// Layers an optional TOML file's settings on top of `self`. A field the
	/// file doesn't set, or sets to an unparseable value, leaves `self`'s
	/// value for that field untouched.
	///
	/// # Errors
	///
	/// Returns [`ConfigError`] if `path` can't be read or isn't valid TOML.
	pub fn with_file_overrides(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path)?;
		let file: FileConfig = toml::from_str(&contents)?;

		if let Some(v) = file.listen_addr.and_then(|s| s.parse().ok()) {
			self.listen_addr = v;
		}
		if let Some(v) = file.allowed_origins {
			self.allowed_origins = v;
		}
		if let Some(secs) = file.idle_lease_secs {
			self.idle_lease = Duration::from_secs(secs);
		}
		if let Some(secs) = file.ping_interval_secs {
			self.ping_interval = Duration::from_secs(secs);
		}
		if let Some(v) = file.outbound_sink_capacity {
			self.outbound_sink_capacity = v;
		}
		if let Some(secs) = file.outbound_enqueue_timeout_secs {
			self.outbound_enqueue_timeout = Duration::from_secs(secs);
		}
		if let Some(v) = file.cache_capacity {
			self.cache_capacity = v;
		}
		if let Some(v) = file.notify_addr.and_then(|s| s.parse().ok()) {
			self.notify_addr = v;
		}
		if let Some(secs) = file.notify_timeout_secs {
			self.notify_timeout = Duration::from_secs(secs);
		}

		Ok(self)
	}

	/// Applies `HYNC_*` environment variable overrides on top of `self`.
	///
	/// Unset variables leave the corresponding field untouched. Malformed
	/// values are ignored (the default/file value wins) rather than panicking
	/// the process over an operator typo.
	#[must_use]
	pub fn with_env_overrides(mut self) -> Self {
		if let Ok(v) = std::env::var("HYNC_LISTEN_ADDR") {
			if let Ok(parsed) = v.parse() {
				self.listen_addr = parsed;
			}
		}
		if let Ok(v) = std::env::var("HYNC_ALLOWED_ORIGINS") {
			self.allowed_origins = v.split(',').map(str::to_owned).collect();
		}
		if let Ok(v) = std::env::var("HYNC_IDLE_LEASE_SECS") {
			if let Ok(secs) = v.parse() {
				self.idle_lease = Duration::from_secs(secs);
			}
		}
		if let Ok(v) = std::env::var("HYNC_NOTIFY_ADDR") {
			if let Ok(parsed) = v.parse() {
				self.notify_addr = parsed;
			}
		}
		self
	}

	/// Whether `origin` is accepted on a WebSocket upgrade. An empty
	/// allow-list accepts any origin (useful for local development).
	#[must_use]
	pub fn origin_allowed(&self, origin: &str) -> bool {
		self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == origin)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_allow_list_accepts_any_origin() {
		let cfg = EngineConfig::default();
		assert!(cfg.origin_allowed("https://anything.example"));
	}

	#[test]
	fn non_empty_allow_list_rejects_unlisted_origin() {
		let mut cfg = EngineConfig::default();
		cfg.allowed_origins = vec!["https://notes.example".to_string()];
		assert!(cfg.origin_allowed("https://notes.example"));
		assert!(!cfg.origin_allowed("https://evil.example"));
	}

	#[test]
	fn file_overrides_only_touch_fields_the_file_sets() {
		let dir = std::env::temp_dir().join(format!("hync-config-test-{}", std::process::id()));
		std::fs::create_dir_all(&dir).expect("create temp dir");
		let path = dir.join("hync.toml");
		std::fs::write(
			&path,
			r#"
			cache-capacity = 64
			allowed-origins = ["https://notes.example"]
			"#,
		)
		.expect("write config file");

		let cfg = EngineConfig::default().with_file_overrides(&path).expect("load file");
		assert_eq!(cfg.cache_capacity, 64);
		assert_eq!(cfg.allowed_origins, vec!["https://notes.example".to_string()]);
		// untouched field keeps its default
		assert_eq!(cfg.idle_lease, Duration::from_secs(60));

		std::fs::remove_dir_all(&dir).ok();
	}

	#[test]
	fn missing_file_is_reported_as_an_error() {
		let err = EngineConfig::default().with_file_overrides("/no/such/hync.toml").unwrap_err();
		assert!(matches!(err, ConfigError::Io(_)));
	}
}
