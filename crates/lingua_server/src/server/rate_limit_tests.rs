#![forbid(unsafe_code)]

use std::time::Duration;

use lingua_domain::ConnectionId;

use crate::server::rate_limit::{ActionBudget, ActionKind, ActionRateLimiter, RateLimitSettings};

fn settings(limit: u32, window: Duration) -> RateLimitSettings {
	let budget = ActionBudget { limit, window };
	RateLimitSettings {
		join: budget,
		create_room: budget,
		send_message: budget,
		reaction: budget,
	}
}

#[tokio::test(start_paused = true)]
async fn allows_up_to_limit_then_rejects() {
	let limiter = ActionRateLimiter::new(settings(3, Duration::from_secs(60)));
	let conn = ConnectionId(1);

	for i in 0..3 {
		assert!(!limiter.hit(conn, ActionKind::SendMessage), "hit {i} should be allowed");
	}
	assert!(limiter.hit(conn, ActionKind::SendMessage), "4th hit must be rejected");
}

#[tokio::test(start_paused = true)]
async fn counter_resets_after_window_elapses() {
	let limiter = ActionRateLimiter::new(settings(2, Duration::from_secs(10)));
	let conn = ConnectionId(1);

	assert!(!limiter.hit(conn, ActionKind::Join));
	assert!(!limiter.hit(conn, ActionKind::Join));
	assert!(limiter.hit(conn, ActionKind::Join));

	tokio::time::advance(Duration::from_secs(11)).await;

	assert!(!limiter.hit(conn, ActionKind::Join), "expired window must reset the counter");
}

#[tokio::test(start_paused = true)]
async fn budgets_are_independent_per_action() {
	let limiter = ActionRateLimiter::new(settings(1, Duration::from_secs(60)));
	let conn = ConnectionId(1);

	assert!(!limiter.hit(conn, ActionKind::SendMessage));
	assert!(limiter.hit(conn, ActionKind::SendMessage));

	// Exhausting send_message must not starve other actions.
	assert!(!limiter.hit(conn, ActionKind::Reaction));
	assert!(!limiter.hit(conn, ActionKind::Join));
}

#[tokio::test(start_paused = true)]
async fn budgets_are_independent_per_connection() {
	let limiter = ActionRateLimiter::new(settings(1, Duration::from_secs(60)));

	assert!(!limiter.hit(ConnectionId(1), ActionKind::SendMessage));
	assert!(limiter.hit(ConnectionId(1), ActionKind::SendMessage));

	assert!(!limiter.hit(ConnectionId(2), ActionKind::SendMessage));
}

#[tokio::test(start_paused = true)]
async fn zero_limit_disables_the_budget() {
	let limiter = ActionRateLimiter::new(settings(0, Duration::from_secs(60)));
	let conn = ConnectionId(1);

	for _ in 0..100 {
		assert!(!limiter.hit(conn, ActionKind::CreateRoom));
	}
	assert_eq!(limiter.window_count(), 0, "disabled budgets must not allocate windows");
}

#[tokio::test(start_paused = true)]
async fn sweep_deletes_expired_windows() {
	let limiter = ActionRateLimiter::new(settings(5, Duration::from_secs(10)));

	limiter.hit(ConnectionId(1), ActionKind::SendMessage);
	limiter.hit(ConnectionId(2), ActionKind::Reaction);
	assert_eq!(limiter.window_count(), 2);

	tokio::time::advance(Duration::from_secs(11)).await;
	limiter.sweep();

	assert_eq!(limiter.window_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn forget_connection_drops_only_its_windows() {
	let limiter = ActionRateLimiter::new(settings(5, Duration::from_secs(60)));

	limiter.hit(ConnectionId(1), ActionKind::SendMessage);
	limiter.hit(ConnectionId(1), ActionKind::Join);
	limiter.hit(ConnectionId(2), ActionKind::SendMessage);

	limiter.forget_connection(ConnectionId(1));
	assert_eq!(limiter.window_count(), 1);
}
