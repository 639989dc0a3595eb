#![forbid(unsafe_code)]

use anyhow::anyhow;
use lingua_domain::{Identity, UserId, UserRole};

/// External identity collaborator: resolves a connection's handshake token
/// into a validated identity before any event is processed.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
	async fn authenticate(&self, token: &str) -> anyhow::Result<Identity>;
}

/// Development provider accepting `user_id:username[:role]` tokens.
///
/// Stands in for the real credential service, which issues and verifies
/// tokens outside this process.
#[derive(Debug, Default, Clone)]
pub struct DevIdentityProvider;

impl DevIdentityProvider {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait::async_trait]
impl IdentityProvider for DevIdentityProvider {
	async fn authenticate(&self, token: &str) -> anyhow::Result<Identity> {
		let token = token.trim();
		if token.is_empty() {
			return Err(anyhow!("missing auth token"));
		}

		let mut parts = token.splitn(3, ':');
		let user_id = parts.next().unwrap_or_default().trim();
		let username = parts.next().unwrap_or_default().trim();
		let role = parts.next().map(str::trim);

		if user_id.is_empty() || username.is_empty() {
			return Err(anyhow!("invalid token format (expected user_id:username[:role])"));
		}

		let role = match role {
			None | Some("") | Some("user") => UserRole::User,
			Some("moderator") => UserRole::Moderator,
			Some("admin") => UserRole::Admin,
			Some(other) => return Err(anyhow!("unknown role: {other}")),
		};

		Ok(Identity::new(UserId::new(user_id)?, username, role))
	}
}
