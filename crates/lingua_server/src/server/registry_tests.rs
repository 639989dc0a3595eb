#![forbid(unsafe_code)]

use lingua_domain::{ConnectionId, Identity, Locale, RoomName, UserId, UserRole};

use crate::server::registry::ConnectionRegistry;

fn identity(id: &str, name: &str) -> Identity {
	Identity::new(UserId::new(id).expect("valid user id"), name, UserRole::User)
}

fn room(name: &str) -> RoomName {
	RoomName::new(name).expect("valid room name")
}

fn locale(code: &str) -> Locale {
	Locale::new(code).expect("valid locale")
}

#[tokio::test]
async fn join_implicitly_leaves_the_previous_room() {
	let registry = ConnectionRegistry::new();
	let conn = ConnectionId(1);
	registry.register(conn, identity("u1", "alice")).await;

	let first = registry.join(conn, room("alpha"), locale("en")).await.unwrap();
	assert!(first.left.is_none());

	let second = registry.join(conn, room("beta"), locale("en")).await.unwrap();
	assert_eq!(second.left, Some(room("alpha")));

	assert!(registry.members_of(&room("alpha")).await.is_empty());
	assert_eq!(registry.members_of(&room("beta")).await.len(), 1);
}

#[tokio::test]
async fn rejoining_the_same_room_reports_no_vacated_room() {
	let registry = ConnectionRegistry::new();
	let conn = ConnectionId(1);
	registry.register(conn, identity("u1", "alice")).await;

	registry.join(conn, room("alpha"), locale("en")).await.unwrap();
	let rejoin = registry.join(conn, room("alpha"), locale("es")).await.unwrap();

	assert!(rejoin.left.is_none());
	let members = registry.members_of(&room("alpha")).await;
	assert_eq!(members.len(), 1);
	assert_eq!(members[0].locale, locale("es"), "rejoin updates the language");
}

#[tokio::test]
async fn join_without_registration_is_refused() {
	let registry = ConnectionRegistry::new();
	assert!(registry.join(ConnectionId(9), room("alpha"), locale("en")).await.is_none());
}

#[tokio::test]
async fn members_of_returns_a_consistent_sorted_snapshot() {
	let registry = ConnectionRegistry::new();
	for (i, name) in ["alice", "bob", "carol"].iter().enumerate() {
		let conn = ConnectionId(i as u64 + 1);
		registry.register(conn, identity(&format!("u{i}"), name)).await;
		registry.join(conn, room("alpha"), locale("en")).await.unwrap();
	}

	let members = registry.members_of(&room("alpha")).await;
	assert_eq!(members.len(), 3);
	let usernames: Vec<&str> = members.iter().map(|m| m.username.as_str()).collect();
	assert_eq!(usernames, ["alice", "bob", "carol"]);
	assert!(members.iter().all(|m| m.online));
}

#[tokio::test]
async fn set_language_updates_session_and_reports_room() {
	let registry = ConnectionRegistry::new();
	let conn = ConnectionId(1);
	registry.register(conn, identity("u1", "alice")).await;

	assert_eq!(registry.set_language(conn, locale("fr")).await, None, "not in a room yet");

	registry.join(conn, room("alpha"), locale("en")).await.unwrap();
	assert_eq!(registry.set_language(conn, locale("fr")).await, Some(room("alpha")));

	let session = registry.session(conn).await.unwrap();
	assert_eq!(session.locale, locale("fr"));
}

#[tokio::test]
async fn locales_of_deduplicates_member_languages() {
	let registry = ConnectionRegistry::new();
	for (i, lang) in ["en", "es", "en", "fr"].iter().enumerate() {
		let conn = ConnectionId(i as u64 + 1);
		registry.register(conn, identity(&format!("u{i}"), &format!("user{i}"))).await;
		registry.join(conn, room("alpha"), locale(lang)).await.unwrap();
	}

	assert_eq!(registry.locales_of(&room("alpha")).await, vec!["en", "es", "fr"]);
}

#[tokio::test]
async fn disconnect_removes_the_session_and_reports_its_room() {
	let registry = ConnectionRegistry::new();
	let conn = ConnectionId(1);
	registry.register(conn, identity("u1", "alice")).await;
	registry.join(conn, room("alpha"), locale("en")).await.unwrap();

	assert_eq!(registry.disconnect(conn).await, Some(room("alpha")));
	assert!(registry.session(conn).await.is_none());
	assert_eq!(registry.session_count().await, 0);

	assert_eq!(registry.disconnect(conn).await, None, "double disconnect is a no-op");
}

#[tokio::test]
async fn evict_room_clears_membership_but_keeps_sessions() {
	let registry = ConnectionRegistry::new();
	for i in 1..=2 {
		let conn = ConnectionId(i);
		registry.register(conn, identity(&format!("u{i}"), &format!("user{i}"))).await;
		registry.join(conn, room("alpha"), locale("en")).await.unwrap();
	}

	let evicted = registry.evict_room(&room("alpha")).await;
	assert_eq!(evicted.len(), 2);
	assert!(registry.members_of(&room("alpha")).await.is_empty());
	assert_eq!(registry.session_count().await, 2, "sessions survive room eviction");
}
