#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delivery mode of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomMode {
	/// Auto-translate: every message fans out per-recipient-language translations.
	Global,
	/// Pass-through: originals only, no translation pipeline.
	Native,
}

impl RoomMode {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			RoomMode::Global => "Global",
			RoomMode::Native => "Native",
		}
	}
}

impl fmt::Display for RoomMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown room mode: {0}")]
	UnknownMode(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

impl FromStr for RoomMode {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"global" => Ok(RoomMode::Global),
			"native" => Ok(RoomMode::Native),
			other => Err(ParseIdError::UnknownMode(other.to_string())),
		}
	}
}

/// Unique room name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
	/// Create a non-empty `RoomName` (surrounding whitespace trimmed).
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		let trimmed = name.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(trimmed.to_string()))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomName::new(s)
	}
}

/// Language code used for translation targets and sources.
///
/// Short codes (`en`, `es`) and full provider locales (`es-ES`) are both
/// accepted; mapping to provider locales happens at the translation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
	/// Create a non-empty `Locale`.
	pub fn new(code: impl Into<String>) -> Result<Self, ParseIdError> {
		let code = code.into();
		let trimmed = code.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(trimmed.to_string()))
	}

	/// Fallback locale used when a client supplies none.
	pub fn english() -> Self {
		Self("en".to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for Locale {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Locale {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Locale::new(s)
	}
}

/// Client-generated message identifier; the idempotency key for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(String);

impl MsgId {
	/// Create a non-empty `MsgId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for MsgId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for MsgId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		MsgId::new(s.to_string())
	}
}

/// Server-assigned connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "conn-{}", self.0)
	}
}

/// Identity-provider-assigned user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Role attached to a validated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
	User,
	Moderator,
	Admin,
}

impl UserRole {
	pub const fn as_str(self) -> &'static str {
		match self {
			UserRole::User => "user",
			UserRole::Moderator => "moderator",
			UserRole::Admin => "admin",
		}
	}
}

impl fmt::Display for UserRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Validated identity supplied by the identity provider before any event is
/// processed for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub user_id: UserId,
	pub username: String,
	pub role: UserRole,
	#[serde(default)]
	pub display_avatar: Option<String>,
}

impl Identity {
	pub fn new(user_id: UserId, username: impl Into<String>, role: UserRole) -> Self {
		Self {
			user_id,
			username: username.into(),
			role,
			display_avatar: None,
		}
	}
}

/// Generate an opaque message id (used by tooling/tests; clients normally
/// supply their own).
pub fn new_msg_id() -> MsgId {
	MsgId(uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn room_mode_parse_and_display() {
		assert_eq!("global".parse::<RoomMode>().unwrap(), RoomMode::Global);
		assert_eq!("Native".parse::<RoomMode>().unwrap(), RoomMode::Native);
		assert_eq!(RoomMode::Global.to_string(), "Global");
		assert!("room".parse::<RoomMode>().is_err());
	}

	#[test]
	fn room_name_trims_and_rejects_empty() {
		let name = RoomName::new("  lobby  ").unwrap();
		assert_eq!(name.as_str(), "lobby");
		assert!(RoomName::new("   ").is_err());
	}

	#[test]
	fn locale_rejects_empty() {
		assert!(Locale::new("").is_err());
		assert_eq!(Locale::new("es").unwrap().as_str(), "es");
		assert_eq!(Locale::english().as_str(), "en");
	}

	#[test]
	fn msg_id_roundtrip() {
		let id = "alice-17".parse::<MsgId>().unwrap();
		assert_eq!(id.to_string(), "alice-17");
		assert!("  ".parse::<MsgId>().is_err());
	}

	#[test]
	fn generated_msg_ids_are_unique() {
		assert_ne!(new_msg_id(), new_msg_id());
	}
}
