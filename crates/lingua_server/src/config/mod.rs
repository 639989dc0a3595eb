#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use lingua_translate::SecretString;
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::rate_limit::{ActionBudget, RateLimitSettings};

/// Default config path: `~/.linguachat/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".linguachat").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
#[allow(dead_code)]
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub limits: LimitSettings,
	pub translation: TranslationSettings,
	pub persistence: PersistenceSettings,
}

/// Server settings loaded by the server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Maximum message length in characters.
	pub max_message_len: usize,
	/// Outbound queue capacity per connection.
	pub subscriber_queue_capacity: usize,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			metrics_bind: None,
			health_bind: None,
			max_message_len: 2000,
			subscriber_queue_capacity: 256,
		}
	}
}

/// Per-action rate limit budgets.
#[derive(Debug, Clone)]
pub struct LimitSettings {
	pub join_limit: u32,
	pub join_window_secs: u64,
	pub create_room_limit: u32,
	pub create_room_window_secs: u64,
	pub send_message_limit: u32,
	pub send_message_window_secs: u64,
	pub reaction_limit: u32,
	pub reaction_window_secs: u64,
}

impl Default for LimitSettings {
	fn default() -> Self {
		Self {
			join_limit: 20,
			join_window_secs: 60,
			create_room_limit: 3,
			create_room_window_secs: 60,
			send_message_limit: 20,
			send_message_window_secs: 10,
			reaction_limit: 60,
			reaction_window_secs: 60,
		}
	}
}

impl LimitSettings {
	pub fn to_rate_limit_settings(&self) -> RateLimitSettings {
		RateLimitSettings {
			join: ActionBudget {
				limit: self.join_limit,
				window: Duration::from_secs(self.join_window_secs),
			},
			create_room: ActionBudget {
				limit: self.create_room_limit,
				window: Duration::from_secs(self.create_room_window_secs),
			},
			send_message: ActionBudget {
				limit: self.send_message_limit,
				window: Duration::from_secs(self.send_message_window_secs),
			},
			reaction: ActionBudget {
				limit: self.reaction_limit,
				window: Duration::from_secs(self.reaction_window_secs),
			},
		}
	}
}

/// Translation provider settings.
#[derive(Debug, Clone)]
pub struct TranslationSettings {
	/// Provider API key; translation is disabled when absent.
	pub api_key: Option<SecretString>,
	/// Provider base URL.
	pub base_url: String,
	/// Bound on concurrently in-flight provider calls.
	pub max_in_flight: usize,
	/// Attempts per locale.
	pub max_attempts: u32,
	pub cache_max_entries: usize,
	pub cache_ttl_secs: u64,
}

impl Default for TranslationSettings {
	fn default() -> Self {
		Self {
			api_key: None,
			base_url: lingua_translate::lingo::DEFAULT_BASE_URL.to_string(),
			max_in_flight: 4,
			max_attempts: 3,
			cache_max_entries: 1000,
			cache_ttl_secs: 60 * 60,
		}
	}
}

/// Persistence settings loaded by the server.
#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Enable the sqlx-backed store; in-memory otherwise.
	pub enabled: bool,
	/// Database URL (sqlite: or postgres:).
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	limits: FileLimitSettings,

	#[serde(default)]
	translation: FileTranslationSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	max_message_len: Option<usize>,
	subscriber_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileLimitSettings {
	join_limit: Option<u32>,
	join_window_secs: Option<u64>,
	create_room_limit: Option<u32>,
	create_room_window_secs: Option<u64>,
	send_message_limit: Option<u32>,
	send_message_window_secs: Option<u64>,
	reaction_limit: Option<u32>,
	reaction_window_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTranslationSettings {
	api_key: Option<String>,
	base_url: Option<String>,
	max_in_flight: Option<usize>,
	max_attempts: Option<u32>,
	cache_max_entries: Option<usize>,
	cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let limit_defaults = LimitSettings::default();
		let translation_defaults = TranslationSettings::default();
		let server_defaults = ServerSettings::default();

		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				max_message_len: file.server.max_message_len.unwrap_or(server_defaults.max_message_len),
				subscriber_queue_capacity: file
					.server
					.subscriber_queue_capacity
					.unwrap_or(server_defaults.subscriber_queue_capacity),
			},
			limits: LimitSettings {
				join_limit: file.limits.join_limit.unwrap_or(limit_defaults.join_limit),
				join_window_secs: file.limits.join_window_secs.unwrap_or(limit_defaults.join_window_secs),
				create_room_limit: file.limits.create_room_limit.unwrap_or(limit_defaults.create_room_limit),
				create_room_window_secs: file
					.limits
					.create_room_window_secs
					.unwrap_or(limit_defaults.create_room_window_secs),
				send_message_limit: file
					.limits
					.send_message_limit
					.unwrap_or(limit_defaults.send_message_limit),
				send_message_window_secs: file
					.limits
					.send_message_window_secs
					.unwrap_or(limit_defaults.send_message_window_secs),
				reaction_limit: file.limits.reaction_limit.unwrap_or(limit_defaults.reaction_limit),
				reaction_window_secs: file
					.limits
					.reaction_window_secs
					.unwrap_or(limit_defaults.reaction_window_secs),
			},
			translation: TranslationSettings {
				api_key: file
					.translation
					.api_key
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				base_url: file
					.translation
					.base_url
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(translation_defaults.base_url),
				max_in_flight: file
					.translation
					.max_in_flight
					.unwrap_or(translation_defaults.max_in_flight),
				max_attempts: file.translation.max_attempts.unwrap_or(translation_defaults.max_attempts),
				cache_max_entries: file
					.translation
					.cache_max_entries
					.unwrap_or(translation_defaults.cache_max_entries),
				cache_ttl_secs: file
					.translation
					.cache_ttl_secs
					.unwrap_or(translation_defaults.cache_ttl_secs),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("LINGUA_TRANSLATE_API_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.translation.api_key = Some(SecretString::new(v));
			info!("translation config: api_key overridden by env");
		}
	}

	if let Ok(v) = std::env::var("LINGUA_TRANSLATE_BASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.translation.base_url = v;
			info!("translation config: base_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("LINGUA_TRANSLATE_MAX_IN_FLIGHT")
		&& let Ok(n) = v.trim().parse::<usize>()
	{
		cfg.translation.max_in_flight = n.max(1);
		info!(max_in_flight = cfg.translation.max_in_flight, "translation config: max_in_flight overridden by env");
	}

	if let Ok(v) = std::env::var("LINGUA_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("LINGUA_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("LINGUA_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("LINGUA_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("LINGUA_SEND_MESSAGE_LIMIT")
		&& let Ok(limit) = v.trim().parse::<u32>()
	{
		cfg.limits.send_message_limit = limit;
		info!(limit, "limits: send_message_limit overridden by env");
	}

	if let Ok(v) = std::env::var("LINGUA_SEND_MESSAGE_WINDOW_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.limits.send_message_window_secs = secs;
		info!(secs, "limits: send_message_window_secs overridden by env");
	}

	if cfg.translation.api_key.is_none() {
		warn!("translation config: no api_key configured; translation disabled (pass-through mode)");
	}

	if cfg.persistence.enabled && cfg.persistence.database_url.is_none() {
		warn!("persistence enabled but no database_url configured; falling back to in-memory store");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_config_fills_defaults() {
		let cfg = ServerConfig::from_file(toml::from_str("").unwrap());
		assert_eq!(cfg.limits.send_message_limit, 20);
		assert_eq!(cfg.limits.send_message_window_secs, 10);
		assert_eq!(cfg.server.max_message_len, 2000);
		assert_eq!(cfg.translation.cache_max_entries, 1000);
		assert!(cfg.translation.api_key.is_none());
	}

	#[test]
	fn file_config_overrides_defaults() {
		let toml_str = r#"
			[server]
			max_message_len = 500

			[limits]
			send_message_limit = 5

			[translation]
			api_key = "key-123"
			base_url = "https://translate.example.com"

			[persistence]
			enabled = true
			database_url = "sqlite::memory:"
		"#;
		let cfg = ServerConfig::from_file(toml::from_str(toml_str).unwrap());
		assert_eq!(cfg.server.max_message_len, 500);
		assert_eq!(cfg.limits.send_message_limit, 5);
		assert_eq!(cfg.translation.api_key.as_ref().map(|k| k.expose()), Some("key-123"));
		assert_eq!(cfg.translation.base_url, "https://translate.example.com");
		assert!(cfg.persistence.enabled);
	}

	#[test]
	fn empty_strings_are_treated_as_absent() {
		let toml_str = r#"
			[translation]
			api_key = "   "

			[server]
			metrics_bind = ""
		"#;
		let cfg = ServerConfig::from_file(toml::from_str(toml_str).unwrap());
		assert!(cfg.translation.api_key.is_none());
		assert!(cfg.server.metrics_bind.is_none());
	}
}
