#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lingua_domain::RoomMode;
use lingua_store::{ReactionMap, ReplyRef, StoredMessage};
use serde::{Deserialize, Serialize};

/// Reply preview carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
	pub msg_id: String,
	pub author: String,
	pub message: String,
}

impl From<ReplyRef> for ReplyPreview {
	fn from(r: ReplyRef) -> Self {
		Self {
			msg_id: r.msg_id.into_string(),
			author: r.author,
			message: r.message,
		}
	}
}

/// `send_message` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessagePayload {
	pub room: String,
	pub author: String,
	pub message: String,

	#[serde(default)]
	pub source_locale: Option<String>,

	#[serde(default)]
	pub msg_id: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<ReplyPreview>,
}

/// Client → engine events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
	JoinRoom { room: String, lang: String },
	SetLanguage { room: String, lang: String },
	SendMessage(SendMessagePayload),
	CreateRoom { name: String, mode: RoomMode },
	UpdateRoomMode { room: String, mode: RoomMode },
	AddReaction { room: String, msg_id: String, emoji: String },
	LeaveRoom { room: String },
	TypingStart { room: String, author: String },
	TypingStop { room: String, author: String },
	DeleteRoom { room: String },
}

/// Presence entry in a `room_users` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomUser {
	pub id: String,
	pub username: String,
	pub lang: String,
	pub status: PresenceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
	Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
	Sent,
	Failed,
}

/// A message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
	pub author: String,
	pub message: String,
	pub original: String,
	pub time: DateTime<Utc>,
	pub msg_id: String,
	pub lang: String,
	pub translations: BTreeMap<String, String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<ReplyPreview>,

	pub reactions: ReactionMap,
}

impl From<StoredMessage> for WireMessage {
	fn from(m: StoredMessage) -> Self {
		Self {
			author: m.author,
			message: m.original.clone(),
			original: m.original,
			time: m.created_at,
			msg_id: m.msg_id.into_string(),
			lang: m.source_locale.into_string(),
			translations: m.translations,
			reply_to: m.reply_to.map(ReplyPreview::from),
			reactions: m.reactions,
		}
	}
}

/// Engine → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
	RoomHistory {
		messages: Vec<WireMessage>,
	},

	RoomUsers {
		users: Vec<RoomUser>,
	},

	ReceiveMessage(WireMessage),

	MessageStatus {
		msg_id: String,
		status: DeliveryStatus,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<String>,
	},

	/// Incremental per-locale translation delivery, scoped to the locales
	/// present in `translations`.
	TranslationsReady {
		msg_id: String,
		translations: BTreeMap<String, String>,
	},

	ReactionUpdate {
		msg_id: String,
		reactions: ReactionMap,
	},

	RoomInfo {
		name: String,
		mode: RoomMode,
		is_admin: bool,
	},

	RoomCreated {
		name: String,
	},

	RoomDeleted {
		name: String,
	},

	ErrorEvent {
		message: String,
	},

	UserTyping {
		author: String,
		is_typing: bool,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_events_decode_from_snake_case_tags() {
		let ev: ClientEvent = serde_json::from_str(r#"{"type":"join_room","room":"lobby","lang":"es"}"#).unwrap();
		match ev {
			ClientEvent::JoinRoom { room, lang } => {
				assert_eq!(room, "lobby");
				assert_eq!(lang, "es");
			}
			other => panic!("expected JoinRoom, got: {other:?}"),
		}

		let ev: ClientEvent = serde_json::from_str(
			r#"{"type":"send_message","room":"lobby","author":"alice","message":"hi","source_locale":"en","msg_id":"m1"}"#,
		)
		.unwrap();
		match ev {
			ClientEvent::SendMessage(p) => {
				assert_eq!(p.msg_id.as_deref(), Some("m1"));
				assert_eq!(p.source_locale.as_deref(), Some("en"));
				assert!(p.reply_to.is_none());
			}
			other => panic!("expected SendMessage, got: {other:?}"),
		}
	}

	#[test]
	fn room_mode_uses_original_wire_spelling() {
		let ev: ClientEvent = serde_json::from_str(r#"{"type":"create_room","name":"dev","mode":"Global"}"#).unwrap();
		match ev {
			ClientEvent::CreateRoom { mode, .. } => assert_eq!(mode, RoomMode::Global),
			other => panic!("expected CreateRoom, got: {other:?}"),
		}
	}

	#[test]
	fn server_events_tag_with_snake_case() {
		let json = serde_json::to_string(&ServerEvent::RoomCreated {
			name: "dev".to_string(),
		})
		.unwrap();
		assert!(json.contains(r#""type":"room_created""#));

		let json = serde_json::to_string(&ServerEvent::MessageStatus {
			msg_id: "m1".to_string(),
			status: DeliveryStatus::Sent,
			error: None,
		})
		.unwrap();
		assert!(json.contains(r#""status":"sent""#));
		assert!(!json.contains("error"), "absent error must be omitted");
	}
}
