#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use lingua_domain::{Locale, MsgId, RoomName};

use crate::{MessageStore, NewMessage, ReactionMap, ReplyRef, StoreError, StoredMessage};

/// `sqlx`-backed message store (sqlite or postgres, selected by URL scheme).
#[derive(Clone)]
pub struct SqlMessageStore {
	backend: Backend,
}

#[derive(Clone)]
enum Backend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
}

/// Row shape shared by both backends: JSON columns for the nested maps,
/// unix-millisecond timestamps written by the application.
type MessageRow = (String, String, String, String, String, String, String, Option<String>, i64);

fn decode_row(row: MessageRow) -> Result<StoredMessage, StoreError> {
	let (room, author, original, source_locale, msg_id, translations, reactions, reply_to, created_at_ms) = row;

	let room = RoomName::new(room).map_err(|e| StoreError::Backend(anyhow!(e).context("decode room")))?;
	let source_locale =
		Locale::new(source_locale).map_err(|e| StoreError::Backend(anyhow!(e).context("decode source_locale")))?;
	let msg_id = MsgId::new(msg_id).map_err(|e| StoreError::Backend(anyhow!(e).context("decode msg_id")))?;

	let translations: BTreeMap<String, String> =
		serde_json::from_str(&translations).context("decode translations json")?;
	let reactions: ReactionMap = serde_json::from_str(&reactions).context("decode reactions json")?;
	let reply_to: Option<ReplyRef> = match reply_to {
		Some(raw) => Some(serde_json::from_str(&raw).context("decode reply_to json")?),
		None => None,
	};

	let created_at = DateTime::<Utc>::from_timestamp_millis(created_at_ms)
		.ok_or_else(|| StoreError::Backend(anyhow!("created_at out of range: {created_at_ms}")))?;

	Ok(StoredMessage {
		room,
		author,
		original,
		source_locale,
		msg_id,
		translations,
		reactions,
		reply_to,
		created_at,
	})
}

const SELECT_COLS: &str = "room, author, original, source_locale, msg_id, translations, reactions, reply_to, created_at_ms";

impl SqlMessageStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
			sqlx::migrate!("migrations/sqlite")
				.run(&pool)
				.await
				.context("run sqlite migrations")?;

			Ok(Self {
				backend: Backend::Sqlite(pool),
			})
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			sqlx::migrate!("migrations/postgres")
				.run(&pool)
				.await
				.context("run postgres migrations")?;

			Ok(Self {
				backend: Backend::Postgres(pool),
			})
		} else {
			Err(anyhow!("unsupported database_url (use sqlite: or postgres:)"))
		}
	}

	async fn fetch_by_msg_id(&self, msg_id: &MsgId) -> Result<Option<StoredMessage>, StoreError> {
		let row: Option<MessageRow> = match &self.backend {
			Backend::Sqlite(pool) => {
				sqlx::query_as(&format!("SELECT {SELECT_COLS} FROM messages WHERE msg_id = ?"))
					.bind(msg_id.as_str())
					.fetch_optional(pool)
					.await
					.context("select message (sqlite)")?
			}
			Backend::Postgres(pool) => {
				sqlx::query_as(&format!("SELECT {SELECT_COLS} FROM messages WHERE msg_id = $1"))
					.bind(msg_id.as_str())
					.fetch_optional(pool)
					.await
					.context("select message (postgres)")?
			}
		};

		row.map(decode_row).transpose()
	}
}

#[async_trait::async_trait]
impl MessageStore for SqlMessageStore {
	async fn create_fast(&self, msg: NewMessage) -> Result<StoredMessage, StoreError> {
		let created_at_ms = Utc::now().timestamp_millis();
		let reply_to = msg
			.reply_to
			.as_ref()
			.map(|r| serde_json::to_string(r).context("encode reply_to json"))
			.transpose()?;

		match &self.backend {
			Backend::Sqlite(pool) => {
				sqlx::query(
					"INSERT INTO messages (room, author, original, source_locale, msg_id, translations, reactions, reply_to, created_at_ms) \
					VALUES (?, ?, ?, ?, ?, '{}', '{}', ?, ?) \
					ON CONFLICT(msg_id) DO NOTHING",
				)
				.bind(msg.room.as_str())
				.bind(&msg.author)
				.bind(&msg.original)
				.bind(msg.source_locale.as_str())
				.bind(msg.msg_id.as_str())
				.bind(reply_to)
				.bind(created_at_ms)
				.execute(pool)
				.await
				.context("insert message (sqlite)")?;
			}
			Backend::Postgres(pool) => {
				sqlx::query(
					"INSERT INTO messages (room, author, original, source_locale, msg_id, translations, reactions, reply_to, created_at_ms) \
					VALUES ($1, $2, $3, $4, $5, '{}', '{}', $6, $7) \
					ON CONFLICT (msg_id) DO NOTHING",
				)
				.bind(msg.room.as_str())
				.bind(&msg.author)
				.bind(&msg.original)
				.bind(msg.source_locale.as_str())
				.bind(msg.msg_id.as_str())
				.bind(reply_to)
				.bind(created_at_ms)
				.execute(pool)
				.await
				.context("insert message (postgres)")?;
			}
		}

		self.fetch_by_msg_id(&msg.msg_id)
			.await?
			.ok_or_else(|| StoreError::Backend(anyhow!("message missing after idempotent insert: {}", msg.msg_id)))
	}

	async fn merge_translations(
		&self,
		_room: &RoomName,
		msg_id: &MsgId,
		partial: BTreeMap<String, String>,
	) -> Result<(), StoreError> {
		if partial.is_empty() {
			return Ok(());
		}

		match &self.backend {
			Backend::Sqlite(pool) => {
				let mut tx = pool.begin().await.context("begin sqlite tx")?;
				let row: Option<(String,)> = sqlx::query_as("SELECT translations FROM messages WHERE msg_id = ?")
					.bind(msg_id.as_str())
					.fetch_optional(&mut *tx)
					.await
					.context("select translations (sqlite)")?;

				let (raw,) = row.ok_or_else(|| StoreError::NotFound(msg_id.clone()))?;
				let mut translations: BTreeMap<String, String> =
					serde_json::from_str(&raw).context("decode translations json")?;
				for (locale, text) in partial {
					if !text.is_empty() {
						translations.entry(locale).or_insert(text);
					}
				}

				sqlx::query("UPDATE messages SET translations = ? WHERE msg_id = ?")
					.bind(serde_json::to_string(&translations).context("encode translations json")?)
					.bind(msg_id.as_str())
					.execute(&mut *tx)
					.await
					.context("update translations (sqlite)")?;
				tx.commit().await.context("commit sqlite tx")?;
			}
			Backend::Postgres(pool) => {
				let mut tx = pool.begin().await.context("begin postgres tx")?;
				let row: Option<(String,)> =
					sqlx::query_as("SELECT translations FROM messages WHERE msg_id = $1 FOR UPDATE")
						.bind(msg_id.as_str())
						.fetch_optional(&mut *tx)
						.await
						.context("select translations (postgres)")?;

				let (raw,) = row.ok_or_else(|| StoreError::NotFound(msg_id.clone()))?;
				let mut translations: BTreeMap<String, String> =
					serde_json::from_str(&raw).context("decode translations json")?;
				for (locale, text) in partial {
					if !text.is_empty() {
						translations.entry(locale).or_insert(text);
					}
				}

				sqlx::query("UPDATE messages SET translations = $1 WHERE msg_id = $2")
					.bind(serde_json::to_string(&translations).context("encode translations json")?)
					.bind(msg_id.as_str())
					.execute(&mut *tx)
					.await
					.context("update translations (postgres)")?;
				tx.commit().await.context("commit postgres tx")?;
			}
		}

		Ok(())
	}

	async fn history(&self, room: &RoomName, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
		let rows: Vec<MessageRow> = match &self.backend {
			Backend::Sqlite(pool) => sqlx::query_as(&format!(
				"SELECT {SELECT_COLS} FROM messages WHERE room = ? ORDER BY seq DESC LIMIT ?"
			))
			.bind(room.as_str())
			.bind(limit as i64)
			.fetch_all(pool)
			.await
			.context("select history (sqlite)")?,
			Backend::Postgres(pool) => sqlx::query_as(&format!(
				"SELECT {SELECT_COLS} FROM messages WHERE room = $1 ORDER BY seq DESC LIMIT $2"
			))
			.bind(room.as_str())
			.bind(limit as i64)
			.fetch_all(pool)
			.await
			.context("select history (postgres)")?,
		};

		let mut out = rows.into_iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
		out.reverse();
		Ok(out)
	}

	async fn find_by_msg_id(&self, room: &RoomName, msg_id: &MsgId) -> Result<Option<StoredMessage>, StoreError> {
		Ok(self.fetch_by_msg_id(msg_id).await?.filter(|m| &m.room == room))
	}

	async fn toggle_reaction(
		&self,
		_room: &RoomName,
		msg_id: &MsgId,
		emoji: &str,
		username: &str,
	) -> Result<ReactionMap, StoreError> {
		let toggled = |raw: String| -> Result<ReactionMap, StoreError> {
			let mut reactions: ReactionMap = serde_json::from_str(&raw).context("decode reactions json")?;
			let users = reactions.entry(emoji.to_string()).or_default();
			if !users.remove(username) {
				users.insert(username.to_string());
			}
			if users.is_empty() {
				reactions.remove(emoji);
			}
			Ok(reactions)
		};

		match &self.backend {
			Backend::Sqlite(pool) => {
				let mut tx = pool.begin().await.context("begin sqlite tx")?;
				let row: Option<(String,)> = sqlx::query_as("SELECT reactions FROM messages WHERE msg_id = ?")
					.bind(msg_id.as_str())
					.fetch_optional(&mut *tx)
					.await
					.context("select reactions (sqlite)")?;

				let (raw,) = row.ok_or_else(|| StoreError::NotFound(msg_id.clone()))?;
				let reactions = toggled(raw)?;

				sqlx::query("UPDATE messages SET reactions = ? WHERE msg_id = ?")
					.bind(serde_json::to_string(&reactions).context("encode reactions json")?)
					.bind(msg_id.as_str())
					.execute(&mut *tx)
					.await
					.context("update reactions (sqlite)")?;
				tx.commit().await.context("commit sqlite tx")?;
				Ok(reactions)
			}
			Backend::Postgres(pool) => {
				let mut tx = pool.begin().await.context("begin postgres tx")?;
				let row: Option<(String,)> = sqlx::query_as("SELECT reactions FROM messages WHERE msg_id = $1 FOR UPDATE")
					.bind(msg_id.as_str())
					.fetch_optional(&mut *tx)
					.await
					.context("select reactions (postgres)")?;

				let (raw,) = row.ok_or_else(|| StoreError::NotFound(msg_id.clone()))?;
				let reactions = toggled(raw)?;

				sqlx::query("UPDATE messages SET reactions = $1 WHERE msg_id = $2")
					.bind(serde_json::to_string(&reactions).context("encode reactions json")?)
					.bind(msg_id.as_str())
					.execute(&mut *tx)
					.await
					.context("update reactions (postgres)")?;
				tx.commit().await.context("commit postgres tx")?;
				Ok(reactions)
			}
		}
	}

	async fn delete_room_messages(&self, room: &RoomName) -> Result<u64, StoreError> {
		let affected = match &self.backend {
			Backend::Sqlite(pool) => sqlx::query("DELETE FROM messages WHERE room = ?")
				.bind(room.as_str())
				.execute(pool)
				.await
				.context("delete room messages (sqlite)")?
				.rows_affected(),
			Backend::Postgres(pool) => sqlx::query("DELETE FROM messages WHERE room = $1")
				.bind(room.as_str())
				.execute(pool)
				.await
				.context("delete room messages (postgres)")?
				.rows_affected(),
		};
		Ok(affected)
	}
}
