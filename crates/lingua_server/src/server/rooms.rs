#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use lingua_domain::{RoomMode, RoomName, UserId};
use thiserror::Error;
use tokio::sync::Mutex;

/// Room metadata supplied by the room directory.
///
/// Invariant: `owner_id ∈ admin_ids ⊆ member_ids`.
#[derive(Debug, Clone)]
pub struct RoomInfo {
	pub name: RoomName,
	pub mode: RoomMode,
	pub owner_id: UserId,
	pub admin_ids: HashSet<UserId>,
	pub member_ids: HashSet<UserId>,
	pub created_at: DateTime<Utc>,
}

impl RoomInfo {
	pub fn is_admin(&self, user: &UserId) -> bool {
		self.owner_id == *user || self.admin_ids.contains(user)
	}

	pub fn is_owner(&self, user: &UserId) -> bool {
		self.owner_id == *user
	}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
	#[error("Room name already exists")]
	AlreadyExists,

	#[error("Room not found")]
	NotFound,

	#[error("Only the room owner can delete this room")]
	NotOwner,

	#[error("invalid room name: {0}")]
	InvalidName(String),
}

/// Room-directory collaborator. Created rooms are read-only to the engine
/// except membership additions on join and admin-gated mode updates.
#[async_trait::async_trait]
pub trait RoomDirectory: Send + Sync {
	async fn create(&self, name: RoomName, owner: UserId, mode: RoomMode) -> Result<RoomInfo, DirectoryError>;

	async fn get(&self, name: &RoomName) -> Option<RoomInfo>;

	async fn add_member(&self, name: &RoomName, user: UserId) -> Result<(), DirectoryError>;

	async fn update_mode(&self, name: &RoomName, mode: RoomMode) -> Result<RoomInfo, DirectoryError>;

	/// Owner-gated deletion. Returns the deleted room's info.
	async fn delete(&self, name: &RoomName, requester: &UserId) -> Result<RoomInfo, DirectoryError>;
}

const ROOM_NAME_MIN: usize = 3;
const ROOM_NAME_MAX: usize = 50;

fn validate_room_name(name: &RoomName) -> Result<(), DirectoryError> {
	let len = name.as_str().chars().count();
	if !(ROOM_NAME_MIN..=ROOM_NAME_MAX).contains(&len) {
		return Err(DirectoryError::InvalidName(format!(
			"expected {ROOM_NAME_MIN}..={ROOM_NAME_MAX} characters, got {len}"
		)));
	}
	Ok(())
}

/// In-memory room directory.
#[derive(Debug, Default)]
pub struct InMemoryRoomDirectory {
	inner: Mutex<HashMap<RoomName, RoomInfo>>,
}

impl InMemoryRoomDirectory {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
	async fn create(&self, name: RoomName, owner: UserId, mode: RoomMode) -> Result<RoomInfo, DirectoryError> {
		validate_room_name(&name)?;

		let mut inner = self.inner.lock().await;
		if inner.contains_key(&name) {
			return Err(DirectoryError::AlreadyExists);
		}

		let info = RoomInfo {
			name: name.clone(),
			mode,
			owner_id: owner.clone(),
			admin_ids: HashSet::from([owner.clone()]),
			member_ids: HashSet::from([owner]),
			created_at: Utc::now(),
		};
		inner.insert(name, info.clone());
		Ok(info)
	}

	async fn get(&self, name: &RoomName) -> Option<RoomInfo> {
		self.inner.lock().await.get(name).cloned()
	}

	async fn add_member(&self, name: &RoomName, user: UserId) -> Result<(), DirectoryError> {
		let mut inner = self.inner.lock().await;
		let info = inner.get_mut(name).ok_or(DirectoryError::NotFound)?;
		info.member_ids.insert(user);
		Ok(())
	}

	async fn update_mode(&self, name: &RoomName, mode: RoomMode) -> Result<RoomInfo, DirectoryError> {
		let mut inner = self.inner.lock().await;
		let info = inner.get_mut(name).ok_or(DirectoryError::NotFound)?;
		info.mode = mode;
		Ok(info.clone())
	}

	async fn delete(&self, name: &RoomName, requester: &UserId) -> Result<RoomInfo, DirectoryError> {
		let mut inner = self.inner.lock().await;

		let is_owner = inner
			.get(name)
			.map(|info| info.is_owner(requester))
			.ok_or(DirectoryError::NotFound)?;
		if !is_owner {
			return Err(DirectoryError::NotOwner);
		}

		inner.remove(name).ok_or(DirectoryError::NotFound)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn room(name: &str) -> RoomName {
		RoomName::new(name).expect("valid room name")
	}

	fn user(id: &str) -> UserId {
		UserId::new(id).expect("valid user id")
	}

	#[tokio::test]
	async fn create_enforces_unique_names_and_invariant() {
		let dir = InMemoryRoomDirectory::new();
		let info = dir.create(room("lobby"), user("u1"), RoomMode::Global).await.unwrap();

		assert!(info.admin_ids.contains(&info.owner_id));
		assert!(info.member_ids.is_superset(&info.admin_ids));

		let err = dir.create(room("lobby"), user("u2"), RoomMode::Native).await.unwrap_err();
		assert_eq!(err, DirectoryError::AlreadyExists);
	}

	#[tokio::test]
	async fn create_bounds_room_name_length() {
		let dir = InMemoryRoomDirectory::new();
		assert!(matches!(
			dir.create(room("ab"), user("u1"), RoomMode::Global).await,
			Err(DirectoryError::InvalidName(_))
		));
		assert!(matches!(
			dir.create(room(&"x".repeat(51)), user("u1"), RoomMode::Global).await,
			Err(DirectoryError::InvalidName(_))
		));
	}

	#[tokio::test]
	async fn delete_is_owner_gated() {
		let dir = InMemoryRoomDirectory::new();
		dir.create(room("lobby"), user("u1"), RoomMode::Global).await.unwrap();

		assert_eq!(
			dir.delete(&room("lobby"), &user("u2")).await.unwrap_err(),
			DirectoryError::NotOwner
		);
		assert!(dir.delete(&room("lobby"), &user("u1")).await.is_ok());
		assert!(dir.get(&room("lobby")).await.is_none());
	}

	#[tokio::test]
	async fn membership_grows_on_join() {
		let dir = InMemoryRoomDirectory::new();
		dir.create(room("lobby"), user("u1"), RoomMode::Global).await.unwrap();
		dir.add_member(&room("lobby"), user("u2")).await.unwrap();

		let info = dir.get(&room("lobby")).await.unwrap();
		assert!(info.member_ids.contains(&user("u2")));
		assert!(!info.is_admin(&user("u2")));
	}
}
