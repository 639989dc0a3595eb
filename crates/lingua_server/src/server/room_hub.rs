#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use lingua_domain::{ConnectionId, RoomName};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::server::events::ServerEvent;

/// Per-room hub that fans engine events out to subscribed connections.
#[derive(Debug, Clone)]
pub struct RoomHub {
	inner: Arc<Mutex<Inner>>,
	cfg: RoomHubConfig,
}

/// Configuration for `RoomHub`.
#[derive(Debug, Clone)]
pub struct RoomHubConfig {
	/// Maximum number of queued events per connection.
	pub subscriber_queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for RoomHubConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 256,
			debug_logs: false,
		}
	}
}

#[derive(Debug, Default)]
struct Inner {
	/// Outbound queue per connection, registered at connection open.
	direct: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,

	/// Room membership for whole-room publishes.
	rooms: HashMap<RoomName, RoomEntry>,
}

#[derive(Debug, Default)]
struct RoomEntry {
	subscribers: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
}

impl RoomHub {
	pub fn new(cfg: RoomHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Register a connection's outbound queue and return its receiving end.
	pub async fn register_connection(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerEvent> {
		let (tx, rx) = mpsc::channel(self.cfg.subscriber_queue_capacity);
		let mut inner = self.inner.lock().await;
		inner.direct.insert(connection_id, tx);

		if self.cfg.debug_logs {
			debug!(%connection_id, conns = inner.direct.len(), "room hub: connection registered");
		}

		rx
	}

	/// Remove a connection from its room subscriptions and the direct index.
	pub async fn unregister_connection(&self, connection_id: ConnectionId) {
		let mut inner = self.inner.lock().await;
		inner.direct.remove(&connection_id);

		inner.rooms.retain(|_, entry| {
			entry.subscribers.remove(&connection_id);
			!entry.subscribers.is_empty()
		});
	}

	/// Subscribe a registered connection to a room.
	pub async fn subscribe(&self, room: RoomName, connection_id: ConnectionId) {
		let mut inner = self.inner.lock().await;
		let Some(tx) = inner.direct.get(&connection_id).cloned() else {
			return;
		};

		let entry = inner.rooms.entry(room.clone()).or_default();
		prune_closed_subscribers(entry);
		entry.subscribers.insert(connection_id, tx);

		if self.cfg.debug_logs {
			debug!(%room, %connection_id, subs = entry.subscribers.len(), "room hub: subscribed");
		}
	}

	pub async fn unsubscribe(&self, room: &RoomName, connection_id: ConnectionId) {
		let mut inner = self.inner.lock().await;
		if let Some(entry) = inner.rooms.get_mut(room) {
			entry.subscribers.remove(&connection_id);
			prune_closed_subscribers(entry);

			if entry.subscribers.is_empty() {
				inner.rooms.remove(room);
			}
		}
	}

	/// Deliver an event to one connection. Returns `false` when the
	/// connection is gone or its queue is full.
	pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
		let mut inner = self.inner.lock().await;
		let Some(tx) = inner.direct.get(&connection_id) else {
			return false;
		};

		match tx.try_send(event) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(_)) => {
				metrics::counter!("lingua_server_hub_dropped_total").increment(1);
				debug!(%connection_id, "room hub: dropped event (full connection queue)");
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				inner.direct.remove(&connection_id);
				false
			}
		}
	}

	/// Publish an event to every subscriber of a room.
	pub async fn publish_room(&self, room: &RoomName, event: ServerEvent) {
		self.publish_filtered(room, event, None).await;
	}

	/// Publish to a room, excluding one connection (typing relays).
	pub async fn publish_room_except(&self, room: &RoomName, except: ConnectionId, event: ServerEvent) {
		self.publish_filtered(room, event, Some(except)).await;
	}

	async fn publish_filtered(&self, room: &RoomName, event: ServerEvent, except: Option<ConnectionId>) {
		let mut inner = self.inner.lock().await;
		let Some(entry) = inner.rooms.get_mut(room) else {
			return;
		};

		prune_closed_subscribers(entry);
		if entry.subscribers.is_empty() {
			inner.rooms.remove(room);
			return;
		}

		let mut dropped_total: u64 = 0;
		for (conn, tx) in entry.subscribers.iter() {
			if Some(*conn) == except {
				continue;
			}

			match tx.try_send(event.clone()) {
				Ok(()) => {}
				Err(mpsc::error::TrySendError::Full(_)) => dropped_total += 1,
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		prune_closed_subscribers(entry);
		if entry.subscribers.is_empty() {
			inner.rooms.remove(room);
		}

		if dropped_total > 0 {
			metrics::counter!("lingua_server_hub_dropped_total").increment(dropped_total);
			if self.cfg.debug_logs {
				debug!(%room, dropped = dropped_total, "room hub: dropped due to full subscriber queues");
			}
		}
	}

	/// Snapshot of subscriber counts per room.
	pub async fn room_subscriber_counts(&self) -> HashMap<RoomName, usize> {
		let inner = self.inner.lock().await;
		inner
			.rooms
			.iter()
			.map(|(k, v)| (k.clone(), v.subscribers.values().filter(|s| !s.is_closed()).count()))
			.collect()
	}
}

fn prune_closed_subscribers(entry: &mut RoomEntry) {
	entry.subscribers.retain(|_, tx| !tx.is_closed());
}
