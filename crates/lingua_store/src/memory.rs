#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use lingua_domain::{MsgId, RoomName};
use tokio::sync::Mutex;

use crate::{MessageStore, NewMessage, ReactionMap, StoreError, StoredMessage};

/// In-memory message store.
///
/// Messages live in an arena keyed by `msg_id` with a per-room insertion-order
/// index, so concurrent reaction/translation updates touch one entry under one
/// lock instead of a shared object graph.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
	inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	by_id: HashMap<MsgId, StoredMessage>,
	order_by_room: HashMap<RoomName, Vec<MsgId>>,
}

impl InMemoryMessageStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of stored messages across all rooms.
	pub async fn len(&self) -> usize {
		self.inner.lock().await.by_id.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.inner.lock().await.by_id.is_empty()
	}
}

#[async_trait::async_trait]
impl MessageStore for InMemoryMessageStore {
	async fn create_fast(&self, msg: NewMessage) -> Result<StoredMessage, StoreError> {
		let mut inner = self.inner.lock().await;

		if let Some(existing) = inner.by_id.get(&msg.msg_id) {
			return Ok(existing.clone());
		}

		let stored = msg.into_stored(Utc::now());
		inner
			.order_by_room
			.entry(stored.room.clone())
			.or_default()
			.push(stored.msg_id.clone());
		inner.by_id.insert(stored.msg_id.clone(), stored.clone());
		Ok(stored)
	}

	async fn merge_translations(
		&self,
		_room: &RoomName,
		msg_id: &MsgId,
		partial: BTreeMap<String, String>,
	) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		let entry = inner.by_id.get_mut(msg_id).ok_or_else(|| StoreError::NotFound(msg_id.clone()))?;

		for (locale, text) in partial {
			if text.is_empty() {
				continue;
			}
			entry.translations.entry(locale).or_insert(text);
		}

		Ok(())
	}

	async fn history(&self, room: &RoomName, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
		let inner = self.inner.lock().await;
		let Some(order) = inner.order_by_room.get(room) else {
			return Ok(Vec::new());
		};

		let start = order.len().saturating_sub(limit);
		let mut out = Vec::with_capacity(order.len() - start);
		for id in &order[start..] {
			if let Some(msg) = inner.by_id.get(id) {
				out.push(msg.clone());
			}
		}
		Ok(out)
	}

	async fn find_by_msg_id(&self, room: &RoomName, msg_id: &MsgId) -> Result<Option<StoredMessage>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.by_id.get(msg_id).filter(|m| &m.room == room).cloned())
	}

	async fn toggle_reaction(
		&self,
		_room: &RoomName,
		msg_id: &MsgId,
		emoji: &str,
		username: &str,
	) -> Result<ReactionMap, StoreError> {
		let mut inner = self.inner.lock().await;
		let entry = inner.by_id.get_mut(msg_id).ok_or_else(|| StoreError::NotFound(msg_id.clone()))?;

		let users = entry.reactions.entry(emoji.to_string()).or_default();
		if !users.remove(username) {
			users.insert(username.to_string());
		}
		if users.is_empty() {
			entry.reactions.remove(emoji);
		}

		Ok(entry.reactions.clone())
	}

	async fn delete_room_messages(&self, room: &RoomName) -> Result<u64, StoreError> {
		let mut inner = self.inner.lock().await;
		let Some(order) = inner.order_by_room.remove(room) else {
			return Ok(0);
		};

		let mut removed = 0u64;
		for id in order {
			if inner.by_id.remove(&id).is_some() {
				removed += 1;
			}
		}
		Ok(removed)
	}
}

#[cfg(test)]
mod tests {
	use lingua_domain::Locale;

	use super::*;

	fn room(name: &str) -> RoomName {
		RoomName::new(name).expect("valid room name")
	}

	fn new_msg(room_name: &str, msg_id: &str, text: &str) -> NewMessage {
		NewMessage {
			room: room(room_name),
			author: "alice".to_string(),
			original: text.to_string(),
			source_locale: Locale::new("en").unwrap(),
			msg_id: MsgId::new(msg_id).unwrap(),
			reply_to: None,
		}
	}

	#[tokio::test]
	async fn create_fast_is_idempotent_on_msg_id() {
		let store = InMemoryMessageStore::new();

		let first = store.create_fast(new_msg("lobby", "m1", "hello")).await.unwrap();
		let second = store.create_fast(new_msg("lobby", "m1", "hello again")).await.unwrap();

		assert_eq!(first.original, "hello");
		assert_eq!(second.original, "hello", "duplicate msg_id must return the stored message");
		assert_eq!(store.len().await, 1);
	}

	#[tokio::test]
	async fn merge_translations_is_additive_and_never_clobbers() {
		let store = InMemoryMessageStore::new();
		store.create_fast(new_msg("lobby", "m1", "hello")).await.unwrap();

		let r = room("lobby");
		let id = MsgId::new("m1").unwrap();

		store
			.merge_translations(&r, &id, BTreeMap::from([("es".to_string(), "hola".to_string())]))
			.await
			.unwrap();
		store
			.merge_translations(
				&r,
				&id,
				BTreeMap::from([
					("es".to_string(), "OVERWRITTEN".to_string()),
					("fr".to_string(), "bonjour".to_string()),
				]),
			)
			.await
			.unwrap();

		let msg = store.find_by_msg_id(&r, &id).await.unwrap().unwrap();
		assert_eq!(msg.translations.get("es").map(String::as_str), Some("hola"));
		assert_eq!(msg.translations.get("fr").map(String::as_str), Some("bonjour"));
	}

	#[tokio::test]
	async fn toggle_reaction_is_self_inverse() {
		let store = InMemoryMessageStore::new();
		store.create_fast(new_msg("lobby", "m1", "hello")).await.unwrap();

		let r = room("lobby");
		let id = MsgId::new("m1").unwrap();

		let after_add = store.toggle_reaction(&r, &id, "👍", "bob").await.unwrap();
		assert!(after_add.get("👍").is_some_and(|users| users.contains("bob")));

		let after_remove = store.toggle_reaction(&r, &id, "👍", "bob").await.unwrap();
		assert!(after_remove.get("👍").is_none());
	}

	#[tokio::test]
	async fn history_returns_last_n_oldest_first() {
		let store = InMemoryMessageStore::new();
		for i in 0..60 {
			store
				.create_fast(new_msg("lobby", &format!("m{i}"), &format!("msg {i}")))
				.await
				.unwrap();
		}

		let history = store.history(&room("lobby"), 50).await.unwrap();
		assert_eq!(history.len(), 50);
		assert_eq!(history.first().unwrap().original, "msg 10");
		assert_eq!(history.last().unwrap().original, "msg 59");
	}

	#[tokio::test]
	async fn history_is_scoped_per_room() {
		let store = InMemoryMessageStore::new();
		store.create_fast(new_msg("lobby", "m1", "one")).await.unwrap();
		store.create_fast(new_msg("dev", "m2", "two")).await.unwrap();

		let history = store.history(&room("lobby"), 50).await.unwrap();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].original, "one");
	}

	#[tokio::test]
	async fn delete_room_messages_cascades() {
		let store = InMemoryMessageStore::new();
		store.create_fast(new_msg("lobby", "m1", "one")).await.unwrap();
		store.create_fast(new_msg("lobby", "m2", "two")).await.unwrap();
		store.create_fast(new_msg("dev", "m3", "three")).await.unwrap();

		let removed = store.delete_room_messages(&room("lobby")).await.unwrap();
		assert_eq!(removed, 2);
		assert_eq!(store.len().await, 1);
		assert!(store.history(&room("lobby"), 50).await.unwrap().is_empty());
	}
}
