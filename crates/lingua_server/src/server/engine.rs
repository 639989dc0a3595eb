#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use lingua_domain::{ConnectionId, Identity, Locale, MsgId, RoomMode, RoomName};
use lingua_store::{MessageStore, NewMessage, ReplyRef, StoreError, StoredMessage};
use lingua_translate::TranslationGateway;
use lingua_translate::gateway::OnEach;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::events::{
	ClientEvent, DeliveryStatus, PresenceStatus, RoomUser, SendMessagePayload, ServerEvent, WireMessage,
};
use crate::server::rate_limit::{ActionKind, ActionRateLimiter};
use crate::server::registry::ConnectionRegistry;
use crate::server::room_hub::RoomHub;
use crate::server::rooms::RoomDirectory;

/// Engine limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Maximum message length in characters, after trimming.
	pub max_message_len: usize,

	/// History snapshot size delivered on join.
	pub history_limit: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			max_message_len: 2000,
			history_limit: lingua_store::DEFAULT_HISTORY_LIMIT,
		}
	}
}

/// Orchestrates the message lifecycle: validate, rate-limit, persist,
/// broadcast the original, then stream per-locale translations.
///
/// Every collaborator is an injected instance, so isolated engines can exist
/// side by side in tests.
pub struct ChatEngine {
	registry: ConnectionRegistry,
	hub: RoomHub,
	directory: Arc<dyn RoomDirectory>,
	store: Arc<dyn MessageStore>,
	gateway: Arc<TranslationGateway>,
	limiter: Arc<ActionRateLimiter>,
	cfg: EngineConfig,
}

impl ChatEngine {
	pub fn new(
		hub: RoomHub,
		directory: Arc<dyn RoomDirectory>,
		store: Arc<dyn MessageStore>,
		gateway: Arc<TranslationGateway>,
		limiter: Arc<ActionRateLimiter>,
		cfg: EngineConfig,
	) -> Self {
		Self {
			registry: ConnectionRegistry::new(),
			hub,
			directory,
			store,
			gateway,
			limiter,
			cfg,
		}
	}

	/// Install a connection: outbound queue plus registry session. The
	/// identity must already be validated by the identity provider.
	pub async fn connect(&self, connection_id: ConnectionId, identity: Identity) -> mpsc::Receiver<ServerEvent> {
		let rx = self.hub.register_connection(connection_id).await;
		self.registry.register(connection_id, identity).await;
		rx
	}

	/// Tear down a connection and rebroadcast membership of its room.
	pub async fn disconnect(&self, connection_id: ConnectionId) {
		self.hub.unregister_connection(connection_id).await;
		self.limiter.forget_connection(connection_id);

		if let Some(room) = self.registry.disconnect(connection_id).await {
			self.broadcast_room_users(&room).await;
		}
	}

	pub async fn handle_event(&self, connection_id: ConnectionId, event: ClientEvent) {
		match event {
			ClientEvent::JoinRoom { room, lang } => self.join_room(connection_id, room, lang).await,
			ClientEvent::SetLanguage { lang, .. } => self.set_language(connection_id, lang).await,
			ClientEvent::SendMessage(payload) => self.send_message(connection_id, payload).await,
			ClientEvent::CreateRoom { name, mode } => self.create_room(connection_id, name, mode).await,
			ClientEvent::UpdateRoomMode { room, mode } => self.update_room_mode(connection_id, room, mode).await,
			ClientEvent::AddReaction { room, msg_id, emoji } => {
				self.add_reaction(connection_id, room, msg_id, emoji).await
			}
			ClientEvent::LeaveRoom { room } => self.leave_room(connection_id, room).await,
			ClientEvent::TypingStart { room, .. } => self.typing(connection_id, room, true).await,
			ClientEvent::TypingStop { room, .. } => self.typing(connection_id, room, false).await,
			ClientEvent::DeleteRoom { room } => self.delete_room(connection_id, room).await,
		}
	}

	async fn error_to(&self, connection_id: ConnectionId, message: impl Into<String>) {
		let _ = self
			.hub
			.send_to(
				connection_id,
				ServerEvent::ErrorEvent {
					message: message.into(),
				},
			)
			.await;
	}

	async fn broadcast_room_users(&self, room: &RoomName) {
		let users = self
			.registry
			.members_of(room)
			.await
			.into_iter()
			.map(|m| RoomUser {
				id: m.connection_id.to_string(),
				username: m.username,
				lang: m.locale.into_string(),
				status: PresenceStatus::Online,
			})
			.collect();
		self.hub.publish_room(room, ServerEvent::RoomUsers { users }).await;
	}

	async fn join_room(&self, connection_id: ConnectionId, room: String, lang: String) {
		let Some(session) = self.registry.session(connection_id).await else {
			return self.error_to(connection_id, "unauthorized").await;
		};
		let Ok(room) = RoomName::new(room) else {
			return self.error_to(connection_id, "invalid room name").await;
		};
		if self.limiter.hit(connection_id, ActionKind::Join) {
			return self.error_to(connection_id, "rate limited: join").await;
		}
		let Some(room_info) = self.directory.get(&room).await else {
			return self.error_to(connection_id, "room not found").await;
		};

		let locale = Locale::new(lang).unwrap_or_else(|_| Locale::english());
		let Some(outcome) = self.registry.join(connection_id, room.clone(), locale.clone()).await else {
			return;
		};

		if let Some(left) = outcome.left {
			self.hub.unsubscribe(&left, connection_id).await;
			self.broadcast_room_users(&left).await;
		}
		self.hub.subscribe(room.clone(), connection_id).await;

		if let Err(e) = self.directory.add_member(&room, session.identity.user_id.clone()).await {
			warn!(%room, error = %e, "failed to record room membership");
		}

		let is_admin = room_info.is_admin(&session.identity.user_id);
		self.hub
			.send_to(
				connection_id,
				ServerEvent::RoomInfo {
					name: room.to_string(),
					mode: room_info.mode,
					is_admin,
				},
			)
			.await;

		match self.store.history(&room, self.cfg.history_limit).await {
			Ok(mut history) => {
				if room_info.mode == RoomMode::Global {
					self.backfill_history(&room, &mut history, &locale).await;
				}

				let messages = history.into_iter().map(WireMessage::from).collect();
				self.hub
					.send_to(connection_id, ServerEvent::RoomHistory { messages })
					.await;
			}
			Err(e) => {
				warn!(%room, error = %e, "failed to fetch room history");
				self.error_to(connection_id, "Failed to fetch room history").await;
			}
		}

		self.broadcast_room_users(&room).await;
		info!(%connection_id, %room, user = %session.identity.username, lang = %locale, "joined room");
	}

	/// Translate history entries missing the joiner's locale, persisting each
	/// result. Failures fall back to the original text per entry.
	async fn backfill_history(&self, room: &RoomName, history: &mut [StoredMessage], locale: &Locale) {
		let lang = locale.as_str();
		for msg in history.iter_mut() {
			if msg.source_locale.as_str() == lang || msg.translations.contains_key(lang) {
				continue;
			}

			let Some(translated) = self
				.gateway
				.translate_single(&msg.original, msg.source_locale.as_str(), lang)
				.await
			else {
				continue;
			};

			let partial = BTreeMap::from([(lang.to_string(), translated.clone())]);
			if let Err(e) = self.store.merge_translations(room, &msg.msg_id, partial).await {
				warn!(%room, msg_id = %msg.msg_id, error = %e, "failed to persist history translation");
				continue;
			}
			msg.translations.insert(lang.to_string(), translated);
		}
	}

	async fn set_language(&self, connection_id: ConnectionId, lang: String) {
		if self.registry.session(connection_id).await.is_none() {
			return self.error_to(connection_id, "unauthorized").await;
		}
		let Ok(locale) = Locale::new(lang) else {
			return self.error_to(connection_id, "invalid language code").await;
		};

		if let Some(room) = self.registry.set_language(connection_id, locale).await {
			self.broadcast_room_users(&room).await;
		}
	}

	async fn send_message(&self, connection_id: ConnectionId, payload: SendMessagePayload) {
		let Some(session) = self.registry.session(connection_id).await else {
			return self.error_to(connection_id, "unauthorized").await;
		};

		if self.limiter.hit(connection_id, ActionKind::SendMessage) {
			return match payload.msg_id.as_deref() {
				Some(msg_id) => {
					self.hub
						.send_to(
							connection_id,
							ServerEvent::MessageStatus {
								msg_id: msg_id.to_string(),
								status: DeliveryStatus::Failed,
								error: Some("rate limited".to_string()),
							},
						)
						.await;
				}
				None => self.error_to(connection_id, "rate limited: send_message").await,
			};
		}

		let Ok(room) = RoomName::new(payload.room) else {
			return self.error_to(connection_id, "room must not be empty").await;
		};
		if session.room.as_ref() != Some(&room) {
			return self.error_to(connection_id, "join the room before sending").await;
		}

		let trimmed = payload.message.trim();
		if trimmed.is_empty() {
			return self.error_to(connection_id, "message text is empty").await;
		}
		if trimmed.chars().count() > self.cfg.max_message_len {
			return self
				.error_to(
					connection_id,
					format!("message exceeds maximum length of {} characters", self.cfg.max_message_len),
				)
				.await;
		}

		let Some(msg_id) = payload.msg_id.and_then(|id| MsgId::new(id).ok()) else {
			return self.error_to(connection_id, "missing msg_id").await;
		};

		let Some(room_info) = self.directory.get(&room).await else {
			return self.error_to(connection_id, "room not found").await;
		};

		let source_locale = payload
			.source_locale
			.as_deref()
			.and_then(|s| Locale::new(s).ok())
			.unwrap_or_else(|| session.locale.clone());

		let reply_to = payload.reply_to.and_then(|r| {
			let reply_id = MsgId::new(r.msg_id).ok()?;
			Some(ReplyRef {
				msg_id: reply_id,
				author: r.author,
				message: sanitize_markup(&r.message),
			})
		});

		let new_msg = NewMessage {
			room: room.clone(),
			author: session.identity.username.clone(),
			original: sanitize_markup(trimmed),
			source_locale,
			msg_id: msg_id.clone(),
			reply_to,
		};

		// A message is never broadcast unless it was durably recorded.
		let stored = match self.store.create_fast(new_msg).await {
			Ok(stored) => stored,
			Err(e) => {
				warn!(%room, %msg_id, error = %e, "message persistence failed");
				metrics::counter!("lingua_server_persist_failures_total").increment(1);
				self.hub
					.send_to(
						connection_id,
						ServerEvent::MessageStatus {
							msg_id: msg_id.into_string(),
							status: DeliveryStatus::Failed,
							error: Some("failed to save message".to_string()),
						},
					)
					.await;
				return;
			}
		};

		metrics::counter!("lingua_server_messages_total").increment(1);
		self.hub
			.send_to(
				connection_id,
				ServerEvent::MessageStatus {
					msg_id: stored.msg_id.to_string(),
					status: DeliveryStatus::Sent,
					error: None,
				},
			)
			.await;

		self.hub
			.publish_room(&room, ServerEvent::ReceiveMessage(WireMessage::from(stored.clone())))
			.await;

		if room_info.mode == RoomMode::Global {
			let targets = self.registry.locales_of(&room).await;
			self.spawn_translation_fanout(room, stored, targets);
		}
	}

	/// Fan out per-locale translations, merging and broadcasting each as it
	/// arrives. Fire-and-forget: an abandoned room still completes and
	/// persists.
	fn spawn_translation_fanout(&self, room: RoomName, stored: StoredMessage, targets: Vec<String>) {
		let store = Arc::clone(&self.store);
		let hub = self.hub.clone();
		let gateway = Arc::clone(&self.gateway);

		tokio::spawn(async move {
			metrics::counter!("lingua_server_translation_fanouts_total").increment(1);

			let (tx, mut rx) = mpsc::unbounded_channel::<(String, String)>();
			let on_each: OnEach = Arc::new(move |lang: &str, text: &str| {
				let _ = tx.send((lang.to_string(), text.to_string()));
			});

			let consumer = {
				let store = Arc::clone(&store);
				let hub = hub.clone();
				let room = room.clone();
				let msg_id = stored.msg_id.clone();
				tokio::spawn(async move {
					while let Some((lang, text)) = rx.recv().await {
						let partial = BTreeMap::from([(lang, text)]);
						if let Err(e) = store.merge_translations(&room, &msg_id, partial.clone()).await {
							warn!(%room, %msg_id, error = %e, "failed to merge translation");
							continue;
						}

						hub.publish_room(
							&room,
							ServerEvent::TranslationsReady {
								msg_id: msg_id.to_string(),
								translations: partial,
							},
						)
						.await;
					}
				})
			};

			let outcome = gateway
				.translate_many(&stored.original, stored.source_locale.as_str(), &targets, on_each)
				.await;

			// All on_each clones are gone once translate_many returns, so the
			// consumer drains the remaining updates and exits.
			if let Err(e) = consumer.await {
				warn!(error = %e, "translation consumer task failed");
			}

			if !outcome.failed.is_empty() {
				debug!(%room, failed = ?outcome.failed, "translation degraded");
				hub.publish_room(
					&room,
					ServerEvent::ErrorEvent {
						message: "Translation unavailable for some languages; showing original text.".to_string(),
					},
				)
				.await;
			}
		});
	}

	async fn add_reaction(&self, connection_id: ConnectionId, room: String, msg_id: String, emoji: String) {
		let Some(session) = self.registry.session(connection_id).await else {
			return self.error_to(connection_id, "unauthorized").await;
		};
		let Ok(room) = RoomName::new(room) else {
			return self.error_to(connection_id, "invalid room name").await;
		};
		if session.room.as_ref() != Some(&room) {
			return self.error_to(connection_id, "join the room before reacting").await;
		}
		if self.limiter.hit(connection_id, ActionKind::Reaction) {
			return self.error_to(connection_id, "rate limited: reaction").await;
		}

		let emoji = emoji.trim();
		if emoji.is_empty() {
			return self.error_to(connection_id, "missing emoji").await;
		}
		let Ok(msg_id) = MsgId::new(msg_id) else {
			return self.error_to(connection_id, "missing msg_id").await;
		};

		match self
			.store
			.toggle_reaction(&room, &msg_id, emoji, &session.identity.username)
			.await
		{
			Ok(reactions) => {
				self.hub
					.publish_room(
						&room,
						ServerEvent::ReactionUpdate {
							msg_id: msg_id.into_string(),
							reactions,
						},
					)
					.await;
			}
			Err(StoreError::NotFound(_)) => self.error_to(connection_id, "message not found").await,
			Err(e) => {
				warn!(%room, %msg_id, error = %e, "reaction toggle failed");
				self.error_to(connection_id, "failed to update reaction").await;
			}
		}
	}

	async fn create_room(&self, connection_id: ConnectionId, name: String, mode: RoomMode) {
		let Some(session) = self.registry.session(connection_id).await else {
			return self.error_to(connection_id, "unauthorized").await;
		};
		if self.limiter.hit(connection_id, ActionKind::CreateRoom) {
			return self.error_to(connection_id, "rate limited: create_room").await;
		}
		let Ok(name) = RoomName::new(name) else {
			return self.error_to(connection_id, "invalid room name").await;
		};

		match self.directory.create(name, session.identity.user_id.clone(), mode).await {
			Ok(room_info) => {
				info!(room = %room_info.name, owner = %session.identity.username, %mode, "room created");
				metrics::counter!("lingua_server_rooms_created_total").increment(1);
				self.hub
					.send_to(
						connection_id,
						ServerEvent::RoomCreated {
							name: room_info.name.into_string(),
						},
					)
					.await;
			}
			Err(e) => self.error_to(connection_id, e.to_string()).await,
		}
	}

	async fn update_room_mode(&self, connection_id: ConnectionId, room: String, mode: RoomMode) {
		let Some(session) = self.registry.session(connection_id).await else {
			return self.error_to(connection_id, "unauthorized").await;
		};
		let Ok(room) = RoomName::new(room) else {
			return self.error_to(connection_id, "invalid room name").await;
		};
		let Some(room_info) = self.directory.get(&room).await else {
			return self.error_to(connection_id, "Room not found").await;
		};
		if !room_info.is_admin(&session.identity.user_id) {
			return self.error_to(connection_id, "only room admins can change the room mode").await;
		}

		match self.directory.update_mode(&room, mode).await {
			Ok(updated) => {
				info!(%room, %mode, by = %session.identity.username, "room mode updated");

				// Each member gets their own is_admin flag.
				for (member_conn, identity) in self.registry.connections_in(&room).await {
					self.hub
						.send_to(
							member_conn,
							ServerEvent::RoomInfo {
								name: room.to_string(),
								mode: updated.mode,
								is_admin: updated.is_admin(&identity.user_id),
							},
						)
						.await;
				}
			}
			Err(e) => self.error_to(connection_id, e.to_string()).await,
		}
	}

	async fn leave_room(&self, connection_id: ConnectionId, room: String) {
		let Some(session) = self.registry.session(connection_id).await else {
			return self.error_to(connection_id, "unauthorized").await;
		};
		let Ok(room) = RoomName::new(room) else {
			return self.error_to(connection_id, "invalid room name").await;
		};
		if session.room.as_ref() != Some(&room) {
			return self.error_to(connection_id, "not in that room").await;
		}

		self.registry.leave(connection_id).await;
		self.hub.unsubscribe(&room, connection_id).await;
		self.broadcast_room_users(&room).await;
	}

	async fn typing(&self, connection_id: ConnectionId, room: String, is_typing: bool) {
		let Some(session) = self.registry.session(connection_id).await else {
			return;
		};
		let Ok(room) = RoomName::new(room) else {
			return;
		};
		if session.room.as_ref() != Some(&room) {
			return;
		}

		self.hub
			.publish_room_except(
				&room,
				connection_id,
				ServerEvent::UserTyping {
					author: session.identity.username,
					is_typing,
				},
			)
			.await;
	}

	async fn delete_room(&self, connection_id: ConnectionId, room: String) {
		let Some(session) = self.registry.session(connection_id).await else {
			return self.error_to(connection_id, "unauthorized").await;
		};
		let Ok(room) = RoomName::new(room) else {
			return self.error_to(connection_id, "invalid room name").await;
		};

		match self.directory.delete(&room, &session.identity.user_id).await {
			Ok(_) => {
				if let Err(e) = self.store.delete_room_messages(&room).await {
					warn!(%room, error = %e, "failed to cascade room message deletion");
				}

				self.hub
					.publish_room(&room, ServerEvent::RoomDeleted { name: room.to_string() })
					.await;

				for evicted in self.registry.evict_room(&room).await {
					self.hub.unsubscribe(&room, evicted).await;
				}
				info!(%room, by = %session.identity.username, "room deleted");
			}
			Err(e) => self.error_to(connection_id, e.to_string()).await,
		}
	}
}

/// Escape markup characters so injected markup never renders as live content.
pub fn sanitize_markup(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#x27;"),
			other => out.push(other),
		}
	}
	out
}
