#![forbid(unsafe_code)]

pub mod memory;
pub mod sql;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lingua_domain::{Locale, MsgId, RoomName};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryMessageStore;
pub use sql::SqlMessageStore;

/// Reply preview embedded in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
	pub msg_id: MsgId,
	pub author: String,
	pub message: String,
}

/// Per-emoji reaction state: emoji -> set of usernames.
pub type ReactionMap = BTreeMap<String, BTreeSet<String>>;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
	pub room: RoomName,
	pub author: String,
	pub original: String,
	pub source_locale: Locale,
	pub msg_id: MsgId,

	/// Locale -> translated text. Additive only; never overwritten.
	pub translations: BTreeMap<String, String>,

	pub reactions: ReactionMap,

	pub reply_to: Option<ReplyRef>,

	pub created_at: DateTime<Utc>,
}

/// Input for `create_fast`: a message before persistence.
#[derive(Debug, Clone)]
pub struct NewMessage {
	pub room: RoomName,
	pub author: String,
	pub original: String,
	pub source_locale: Locale,
	pub msg_id: MsgId,
	pub reply_to: Option<ReplyRef>,
}

impl NewMessage {
	pub(crate) fn into_stored(self, created_at: DateTime<Utc>) -> StoredMessage {
		StoredMessage {
			room: self.room,
			author: self.author,
			original: self.original,
			source_locale: self.source_locale,
			msg_id: self.msg_id,
			translations: BTreeMap::new(),
			reactions: ReactionMap::new(),
			reply_to: self.reply_to,
			created_at,
		}
	}
}

/// Message store errors.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("message not found: {0}")]
	NotFound(MsgId),

	#[error(transparent)]
	Backend(#[from] anyhow::Error),
}

/// Default history snapshot size.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Persistence contract consumed by the chat engine.
///
/// `create_fast` is idempotent on `msg_id`; `merge_translations` and
/// `toggle_reaction` are safe under concurrent calls for the same message.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
	/// Persist a message with empty translations. A second call with the same
	/// `msg_id` returns the already-stored message without creating a
	/// duplicate.
	async fn create_fast(&self, msg: NewMessage) -> Result<StoredMessage, StoreError>;

	/// Additively merge translated locales into a message. Locales already
	/// present are left untouched.
	async fn merge_translations(
		&self,
		room: &RoomName,
		msg_id: &MsgId,
		partial: BTreeMap<String, String>,
	) -> Result<(), StoreError>;

	/// Last `limit` messages of a room, oldest first.
	async fn history(&self, room: &RoomName, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;

	async fn find_by_msg_id(&self, room: &RoomName, msg_id: &MsgId) -> Result<Option<StoredMessage>, StoreError>;

	/// Atomically toggle `username` in `reactions[emoji]` and return the
	/// updated reaction map.
	async fn toggle_reaction(
		&self,
		room: &RoomName,
		msg_id: &MsgId,
		emoji: &str,
		username: &str,
	) -> Result<ReactionMap, StoreError>;

	/// Delete every message of a room (cascading room deletion).
	async fn delete_room_messages(&self, room: &RoomName) -> Result<u64, StoreError>;
}
