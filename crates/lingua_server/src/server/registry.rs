#![forbid(unsafe_code)]

use std::collections::HashMap;

use lingua_domain::{ConnectionId, Identity, Locale, RoomName};
use tokio::sync::Mutex;
use tracing::debug;

/// Live session state for one connection.
#[derive(Debug, Clone)]
struct Session {
	identity: Identity,
	room: Option<RoomName>,
	locale: Locale,
}

/// Read-only view of a session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
	pub identity: Identity,
	pub room: Option<RoomName>,
	pub locale: Locale,
}

/// Presence entry returned by `members_of`.
#[derive(Debug, Clone)]
pub struct MemberInfo {
	pub connection_id: ConnectionId,
	pub username: String,
	pub locale: Locale,
	pub online: bool,
}

/// Result of a `join`: the room vacated by the implicit leave, if any.
#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
	pub left: Option<RoomName>,
}

/// Tracks live session → room/language/identity mappings.
///
/// Every mutation runs under one lock so concurrent join/leave/disconnect on
/// different connections never interleave, and `members_of` snapshots are
/// always consistent.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
	inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	sessions: HashMap<ConnectionId, Session>,
}

impl ConnectionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Install a session for an authenticated connection.
	pub async fn register(&self, connection_id: ConnectionId, identity: Identity) {
		let mut inner = self.inner.lock().await;
		debug!(%connection_id, user = %identity.username, "registry: session registered");
		inner.sessions.insert(
			connection_id,
			Session {
				identity,
				room: None,
				locale: Locale::english(),
			},
		);
	}

	pub async fn session(&self, connection_id: ConnectionId) -> Option<SessionSnapshot> {
		let inner = self.inner.lock().await;
		inner.sessions.get(&connection_id).map(|s| SessionSnapshot {
			identity: s.identity.clone(),
			room: s.room.clone(),
			locale: s.locale.clone(),
		})
	}

	/// Move a session into `room`, implicitly leaving its previous room.
	/// Returns `None` when the connection has no registered session.
	pub async fn join(&self, connection_id: ConnectionId, room: RoomName, locale: Locale) -> Option<JoinOutcome> {
		let mut inner = self.inner.lock().await;
		let session = inner.sessions.get_mut(&connection_id)?;

		let left = match session.room.take() {
			Some(prev) if prev != room => Some(prev),
			_ => None,
		};
		session.room = Some(room);
		session.locale = locale;

		Some(JoinOutcome { left })
	}

	/// Update a session's language. Returns the room whose membership list
	/// should be rebroadcast, if the session is in one.
	pub async fn set_language(&self, connection_id: ConnectionId, locale: Locale) -> Option<RoomName> {
		let mut inner = self.inner.lock().await;
		let session = inner.sessions.get_mut(&connection_id)?;
		session.locale = locale;
		session.room.clone()
	}

	/// Leave the current room without dropping the session.
	pub async fn leave(&self, connection_id: ConnectionId) -> Option<RoomName> {
		let mut inner = self.inner.lock().await;
		inner.sessions.get_mut(&connection_id)?.room.take()
	}

	/// Consistent snapshot of a room's members.
	pub async fn members_of(&self, room: &RoomName) -> Vec<MemberInfo> {
		let inner = self.inner.lock().await;
		let mut members: Vec<MemberInfo> = inner
			.sessions
			.iter()
			.filter(|(_, s)| s.room.as_ref() == Some(room))
			.map(|(id, s)| MemberInfo {
				connection_id: *id,
				username: s.identity.username.clone(),
				locale: s.locale.clone(),
				online: true,
			})
			.collect();
		members.sort_by_key(|m| m.connection_id);
		members
	}

	/// Connections currently in a room, with their identities.
	pub async fn connections_in(&self, room: &RoomName) -> Vec<(ConnectionId, Identity)> {
		let inner = self.inner.lock().await;
		inner
			.sessions
			.iter()
			.filter(|(_, s)| s.room.as_ref() == Some(room))
			.map(|(id, s)| (*id, s.identity.clone()))
			.collect()
	}

	/// Distinct member languages of a room (the fan-out target set).
	pub async fn locales_of(&self, room: &RoomName) -> Vec<String> {
		let inner = self.inner.lock().await;
		let mut locales: Vec<String> = inner
			.sessions
			.values()
			.filter(|s| s.room.as_ref() == Some(room))
			.map(|s| s.locale.as_str().to_string())
			.collect();
		locales.sort();
		locales.dedup();
		locales
	}

	/// Remove every session from `room` (room deletion). Returns the evicted
	/// connections.
	pub async fn evict_room(&self, room: &RoomName) -> Vec<ConnectionId> {
		let mut inner = self.inner.lock().await;
		let mut evicted = Vec::new();
		for (id, session) in inner.sessions.iter_mut() {
			if session.room.as_ref() == Some(room) {
				session.room = None;
				evicted.push(*id);
			}
		}
		evicted
	}

	/// Drop the session. Returns the room it occupied, for a membership
	/// rebroadcast.
	pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<RoomName> {
		let mut inner = self.inner.lock().await;
		let session = inner.sessions.remove(&connection_id)?;
		debug!(%connection_id, "registry: session removed");
		session.room
	}

	pub async fn session_count(&self) -> usize {
		self.inner.lock().await.sessions.len()
	}
}
