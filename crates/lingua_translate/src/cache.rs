#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Cache sizing and expiry.
#[derive(Debug, Clone)]
pub struct CacheConfig {
	/// Maximum number of entries before oldest-eviction.
	pub max_entries: usize,

	/// Entry time-to-live.
	pub ttl: Duration,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			max_entries: 1000,
			ttl: Duration::from_secs(60 * 60),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
	text: String,
	source: String,
	target: String,
}

#[derive(Debug)]
struct CacheEntry {
	value: String,
	expires_at: Instant,
}

/// Bounded TTL cache for `(text, source_locale, target_locale)` translations.
#[derive(Debug)]
pub struct TranslationCache {
	inner: Mutex<Inner>,
	cfg: CacheConfig,
}

#[derive(Debug, Default)]
struct Inner {
	entries: HashMap<CacheKey, CacheEntry>,

	/// Insertion order for oldest-eviction. May carry stale keys for entries
	/// already evicted or re-inserted; eviction skips those.
	order: VecDeque<CacheKey>,
}

impl TranslationCache {
	pub fn new(cfg: CacheConfig) -> Self {
		Self {
			inner: Mutex::new(Inner::default()),
			cfg,
		}
	}

	fn key(text: &str, source: Option<&str>, target: &str) -> CacheKey {
		CacheKey {
			text: text.to_string(),
			source: source.unwrap_or("auto").to_string(),
			target: target.to_string(),
		}
	}

	/// Look up a translation; expired entries are dropped on access.
	pub fn get(&self, text: &str, source: Option<&str>, target: &str) -> Option<String> {
		let key = Self::key(text, source, target);
		let mut inner = self.inner.lock();

		let expired = match inner.entries.get(&key) {
			Some(entry) if entry.expires_at > Instant::now() => {
				metrics::counter!("lingua_translate_cache_hits_total").increment(1);
				return Some(entry.value.clone());
			}
			Some(_) => true,
			None => false,
		};

		if expired {
			inner.entries.remove(&key);
		}
		None
	}

	pub fn insert(&self, text: &str, source: Option<&str>, target: &str, translated: impl Into<String>) {
		let key = Self::key(text, source, target);
		let entry = CacheEntry {
			value: translated.into(),
			expires_at: Instant::now() + self.cfg.ttl,
		};

		let mut inner = self.inner.lock();
		if inner.entries.insert(key.clone(), entry).is_none() {
			inner.order.push_back(key);
		}

		while inner.entries.len() > self.cfg.max_entries {
			let Some(oldest) = inner.order.pop_front() else {
				break;
			};
			inner.entries.remove(&oldest);
		}
	}

	/// Drop expired entries.
	pub fn prune(&self) {
		let now = Instant::now();
		let mut inner = self.inner.lock();
		inner.entries.retain(|_, entry| entry.expires_at > now);

		let entries = &inner.entries;
		let retained: VecDeque<CacheKey> = inner.order.iter().filter(|k| entries.contains_key(*k)).cloned().collect();
		inner.order = retained;
	}

	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().entries.is_empty()
	}
}

/// Spawn a periodic prune task owned by the caller; dropping the handle (or
/// aborting it) stops the sweep, so isolated instances tear down cleanly.
pub fn spawn_cache_pruner(cache: Arc<TranslationCache>, interval: Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		loop {
			interval.tick().await;
			cache.prune();
		}
	})
}
