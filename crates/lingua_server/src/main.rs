#![forbid(unsafe_code)]

mod config;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lingua_domain::ConnectionId;
use lingua_store::{InMemoryMessageStore, MessageStore, SqlMessageStore};
use lingua_translate::cache::spawn_cache_pruner;
use lingua_translate::{CacheConfig, GatewayConfig, LingoClient, TranslationCache, TranslationGateway};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::engine::{ChatEngine, EngineConfig};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::identity::{DevIdentityProvider, IdentityProvider};
use crate::server::rate_limit::{ActionRateLimiter, spawn_rate_limit_sweeper};
use crate::server::room_hub::{RoomHub, RoomHubConfig};
use crate::server::rooms::InMemoryRoomDirectory;

/// Sweep interval for rate-limit windows and the translation cache.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: lingua_server [--bind host:port]\n\
\n\
Options:\n\
\t--bind    Websocket bind address (default: 127.0.0.1:7380)\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind = "127.0.0.1:7380".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				bind = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	bind.parse::<SocketAddr>().unwrap_or_else(|e| {
		eprintln!("invalid bind address {bind}: {e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,lingua_server=debug".to_string());

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
				let tracer = tracer_provider.tracer("lingua_server");
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

	let bind_addr = parse_args();

	let config_path = crate::config::default_config_path()?;
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

	let store: Arc<dyn MessageStore> = if server_cfg.persistence.enabled {
		match server_cfg.persistence.database_url.as_deref() {
			Some(database_url) => {
				let sql = SqlMessageStore::connect(database_url).await?;
				info!("message store: sqlx backend connected");
				Arc::new(sql)
			}
			None => {
				warn!("persistence enabled without database_url; using in-memory store");
				Arc::new(InMemoryMessageStore::new())
			}
		}
	} else {
		Arc::new(InMemoryMessageStore::new())
	};

	let cache = Arc::new(TranslationCache::new(CacheConfig {
		max_entries: server_cfg.translation.cache_max_entries,
		ttl: Duration::from_secs(server_cfg.translation.cache_ttl_secs),
	}));
	let _cache_pruner = spawn_cache_pruner(Arc::clone(&cache), SWEEP_INTERVAL);

	let gateway = match server_cfg.translation.api_key.clone() {
		Some(api_key) => {
			let provider = LingoClient::new(server_cfg.translation.base_url.clone(), api_key);
			info!(base_url = %server_cfg.translation.base_url, "translation provider configured");
			Arc::new(TranslationGateway::new(
				Arc::new(provider),
				cache,
				GatewayConfig {
					max_attempts: server_cfg.translation.max_attempts,
					max_in_flight: server_cfg.translation.max_in_flight,
					..GatewayConfig::default()
				},
			))
		}
		None => Arc::new(TranslationGateway::disabled(cache)),
	};

	let limiter = Arc::new(ActionRateLimiter::new(server_cfg.limits.to_rate_limit_settings()));
	let _limit_sweeper = spawn_rate_limit_sweeper(Arc::clone(&limiter), SWEEP_INTERVAL);

	let hub = RoomHub::new(RoomHubConfig {
		subscriber_queue_capacity: server_cfg.server.subscriber_queue_capacity,
		debug_logs: false,
	});

	let engine = Arc::new(ChatEngine::new(
		hub,
		Arc::new(InMemoryRoomDirectory::new()),
		store,
		gateway,
		limiter,
		EngineConfig {
			max_message_len: server_cfg.server.max_message_len,
			..EngineConfig::default()
		},
	));

	let identity_provider: Arc<dyn IdentityProvider> = Arc::new(DevIdentityProvider::new());
	let conn_settings = ConnectionSettings::default();

	let listener = tokio::net::TcpListener::bind(bind_addr).await?;
	info!(%bind_addr, "lingua_server: websocket endpoint ready");
	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = listener.accept().await?;

		let conn_id = ConnectionId(next_conn_id);
		next_conn_id += 1;
		metrics::counter!("lingua_server_connections_total").increment(1);
		info!(%conn_id, %remote, "accepted connection");

		let engine = Arc::clone(&engine);
		let identity_provider = Arc::clone(&identity_provider);
		let conn_settings = conn_settings.clone();

		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, engine, identity_provider, conn_settings).await {
				warn!(%conn_id, error = %e, "connection handler exited with error");
			}
		});
	}
}
