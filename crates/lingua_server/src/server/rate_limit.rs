#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lingua_domain::ConnectionId;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Rate-limited action kinds; each carries an independent budget so abuse on
/// one action cannot starve another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
	Join,
	CreateRoom,
	SendMessage,
	Reaction,
}

impl ActionKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			ActionKind::Join => "join",
			ActionKind::CreateRoom => "create_room",
			ActionKind::SendMessage => "send_message",
			ActionKind::Reaction => "reaction",
		}
	}
}

/// `limit` actions per `window`. A zero limit disables the budget.
#[derive(Debug, Clone, Copy)]
pub struct ActionBudget {
	pub limit: u32,
	pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
	pub join: ActionBudget,
	pub create_room: ActionBudget,
	pub send_message: ActionBudget,
	pub reaction: ActionBudget,
}

impl Default for RateLimitSettings {
	fn default() -> Self {
		Self {
			join: ActionBudget {
				limit: 20,
				window: Duration::from_secs(60),
			},
			create_room: ActionBudget {
				limit: 3,
				window: Duration::from_secs(60),
			},
			send_message: ActionBudget {
				limit: 20,
				window: Duration::from_secs(10),
			},
			reaction: ActionBudget {
				limit: 60,
				window: Duration::from_secs(60),
			},
		}
	}
}

impl RateLimitSettings {
	fn budget(&self, action: ActionKind) -> ActionBudget {
		match action {
			ActionKind::Join => self.join,
			ActionKind::CreateRoom => self.create_room,
			ActionKind::SendMessage => self.send_message,
			ActionKind::Reaction => self.reaction,
		}
	}
}

#[derive(Debug)]
struct Window {
	count: u32,
	reset_at: Instant,
}

/// Fixed-window counters per `(connection, action)`.
#[derive(Debug)]
pub struct ActionRateLimiter {
	windows: Mutex<HashMap<(ConnectionId, ActionKind), Window>>,
	settings: RateLimitSettings,
}

impl ActionRateLimiter {
	pub fn new(settings: RateLimitSettings) -> Self {
		Self {
			windows: Mutex::new(HashMap::new()),
			settings,
		}
	}

	/// Record one action. Returns `true` when the action exceeds its budget.
	pub fn hit(&self, connection_id: ConnectionId, action: ActionKind) -> bool {
		let budget = self.settings.budget(action);
		if budget.limit == 0 {
			return false;
		}

		let now = Instant::now();
		let mut windows = self.windows.lock();
		let window = windows.entry((connection_id, action)).or_insert_with(|| Window {
			count: 0,
			reset_at: now + budget.window,
		});

		if now >= window.reset_at {
			window.count = 1;
			window.reset_at = now + budget.window;
			return false;
		}

		window.count += 1;
		let limited = window.count > budget.limit;
		if limited {
			metrics::counter!("lingua_server_rate_limited_total", "action" => action.as_str()).increment(1);
		}
		limited
	}

	/// Delete expired windows to bound memory across long-lived connections.
	pub fn sweep(&self) {
		let now = Instant::now();
		let mut windows = self.windows.lock();
		let before = windows.len();
		windows.retain(|_, w| w.reset_at > now);
		let removed = before - windows.len();
		if removed > 0 {
			debug!(removed, "rate limiter: swept expired windows");
		}
	}

	/// Drop every window of a disconnected connection.
	pub fn forget_connection(&self, connection_id: ConnectionId) {
		let mut windows = self.windows.lock();
		windows.retain(|(conn, _), _| *conn != connection_id);
	}

	pub fn window_count(&self) -> usize {
		self.windows.lock().len()
	}
}

/// Spawn the periodic sweep. Owned by the caller; aborting the handle stops
/// the task, keeping isolated engine instances self-contained.
pub fn spawn_rate_limit_sweeper(limiter: Arc<ActionRateLimiter>, interval: Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		loop {
			interval.tick().await;
			limiter.sweep();
		}
	})
}
