#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, anyhow};
use futures_util::{SinkExt, StreamExt};
use lingua_domain::ConnectionId;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{debug, info, warn};

use crate::server::engine::ChatEngine;
use crate::server::events::{ClientEvent, ServerEvent};
use crate::server::identity::IdentityProvider;

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: usize,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: 64 * 1024,
		}
	}
}

/// Drive one websocket connection: resolve identity from the handshake
/// token, pump inbound events into the engine, and drain the connection's
/// outbound queue.
pub async fn handle_connection(
	connection_id: ConnectionId,
	stream: TcpStream,
	engine: Arc<ChatEngine>,
	identity_provider: Arc<dyn IdentityProvider>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("lingua_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("lingua_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let mut token = String::new();
	let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
		if let Some(query) = req.uri().query() {
			for pair in query.split('&') {
				if let Some(value) = pair.strip_prefix("token=") {
					token = value.to_string();
				}
			}
		}
		Ok(resp)
	})
	.await
	.context("websocket handshake")?;

	// Identity is resolved before any event is processed.
	let identity = match identity_provider.authenticate(&token).await {
		Ok(identity) => identity,
		Err(e) => {
			warn!(%connection_id, error = %e, "unauthorized: rejecting connection");
			metrics::counter!("lingua_server_unauthorized_total").increment(1);
			let ev = ServerEvent::ErrorEvent {
				message: "unauthorized".to_string(),
			};
			if let Ok(json) = serde_json::to_string(&ev) {
				let _ = ws.send(Message::text(json)).await;
			}
			let _ = ws.close(None).await;
			return Err(anyhow!("unauthorized connection"));
		}
	};

	info!(%connection_id, user = %identity.username, "connection authenticated");

	let mut outbound = engine.connect(connection_id, identity).await;
	let (mut sink, mut source) = ws.split();

	loop {
		tokio::select! {
			event = outbound.recv() => {
				let Some(event) = event else {
					break;
				};

				let json = match serde_json::to_string(&event) {
					Ok(json) => json,
					Err(e) => {
						warn!(%connection_id, error = %e, "failed to encode server event");
						continue;
					}
				};

				metrics::counter!("lingua_server_events_out_total").increment(1);
				if sink.send(Message::text(json)).await.is_err() {
					break;
				}
			}

			frame = source.next() => {
				let Some(frame) = frame else {
					break;
				};

				let msg = match frame {
					Ok(msg) => msg,
					Err(e) => {
						debug!(%connection_id, error = %e, "websocket read failed");
						break;
					}
				};

				match msg {
					Message::Text(text) => {
						metrics::counter!("lingua_server_events_in_total").increment(1);

						if text.len() > settings.max_frame_bytes {
							metrics::counter!("lingua_server_oversized_frames_total").increment(1);
							send_error(&mut sink, "payload too large").await;
							continue;
						}

						match serde_json::from_str::<ClientEvent>(text.as_str()) {
							Ok(event) => engine.handle_event(connection_id, event).await,
							Err(e) => {
								metrics::counter!("lingua_server_decode_errors_total").increment(1);
								debug!(%connection_id, error = %e, "failed to decode client event");
								send_error(&mut sink, "invalid payload").await;
							}
						}
					}
					Message::Binary(_) => {
						send_error(&mut sink, "binary frames not supported").await;
					}
					Message::Close(_) => break,
					_ => {}
				}
			}
		}
	}

	engine.disconnect(connection_id).await;
	info!(%connection_id, "connection closed");
	Ok(())
}

async fn send_error<S>(sink: &mut S, message: &str)
where
	S: SinkExt<Message> + Unpin,
{
	let ev = ServerEvent::ErrorEvent {
		message: message.to_string(),
	};
	if let Ok(json) = serde_json::to_string(&ev) {
		let _ = sink.send(Message::text(json)).await;
	}
}
