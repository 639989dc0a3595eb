#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::cache::TranslationCache;
use crate::{ProviderError, TranslationProvider, resolve_locale};

/// Retry, timeout, and concurrency budget for provider calls.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
	/// Attempts per locale (first try included).
	pub max_attempts: u32,

	/// First retry delay; doubles each attempt.
	pub base_backoff: Duration,

	/// Hard per-attempt timeout, counted against the retry budget.
	pub attempt_timeout: Duration,

	/// Bound on concurrently in-flight provider calls.
	pub max_in_flight: usize,
}

impl Default for GatewayConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_backoff: Duration::from_millis(1500),
			attempt_timeout: Duration::from_secs(30),
			max_in_flight: 4,
		}
	}
}

/// Result of a fan-out: translated locales, locales omitted after retry
/// exhaustion, and whether the caller should surface a degraded warning.
#[derive(Debug, Clone, Default)]
pub struct TranslationOutcome {
	/// Requested language code -> translated text.
	pub translations: BTreeMap<String, String>,

	/// Language codes omitted after exhausting the retry budget.
	pub failed: Vec<String>,

	pub degraded: bool,
}

/// Streaming observer: invoked with `(lang, translated)` as each locale
/// resolves, never waiting for slower locales.
pub type OnEach = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Cache-first adapter in front of the external translation provider.
///
/// Locales are translated as independent concurrent tasks bounded by a
/// semaphore; a fatal provider error (bad credentials) disables translation
/// for the remainder of the process lifetime while chat continues in
/// pass-through mode.
pub struct TranslationGateway {
	provider: Option<Arc<dyn TranslationProvider>>,
	cache: Arc<TranslationCache>,
	limiter: Arc<Semaphore>,
	disabled: Arc<AtomicBool>,
	cfg: GatewayConfig,
}

impl TranslationGateway {
	pub fn new(provider: Arc<dyn TranslationProvider>, cache: Arc<TranslationCache>, cfg: GatewayConfig) -> Self {
		Self {
			provider: Some(provider),
			limiter: Arc::new(Semaphore::new(cfg.max_in_flight.max(1))),
			cache,
			disabled: Arc::new(AtomicBool::new(false)),
			cfg,
		}
	}

	/// Gateway with no provider configured: every request degrades to the
	/// original text.
	pub fn disabled(cache: Arc<TranslationCache>) -> Self {
		let cfg = GatewayConfig::default();
		Self {
			provider: None,
			limiter: Arc::new(Semaphore::new(1)),
			cache,
			disabled: Arc::new(AtomicBool::new(true)),
			cfg,
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.provider.is_some() && !self.disabled.load(Ordering::Relaxed)
	}

	/// Translate `text` into every language in `targets`, skipping the source
	/// language, streaming each result through `on_each` as soon as it is
	/// ready.
	pub async fn translate_many(
		&self,
		text: &str,
		source_lang: &str,
		targets: &[String],
		on_each: OnEach,
	) -> TranslationOutcome {
		let source = resolve_locale(source_lang);
		let mut outcome = TranslationOutcome::default();

		let mut seen = HashSet::new();
		let mut pending: Vec<(String, String)> = Vec::new();
		for raw in targets {
			let target = resolve_locale(raw).unwrap_or_else(|| raw.clone());
			if source.as_deref() == Some(target.as_str()) {
				continue;
			}
			if seen.insert(target.clone()) {
				pending.push((raw.clone(), target));
			}
		}

		if pending.is_empty() {
			return outcome;
		}

		let enabled_provider = self.provider.clone().filter(|_| self.is_enabled());
		let Some(provider) = enabled_provider else {
			outcome.failed = pending.into_iter().map(|(raw, _)| raw).collect();
			outcome.degraded = true;
			return outcome;
		};

		let mut tasks = JoinSet::new();
		for (raw, target) in pending {
			if let Some(hit) = self.cache.get(text, source.as_deref(), &target) {
				debug!(lang = %raw, "translation cache hit");
				on_each(&raw, &hit);
				outcome.translations.insert(raw, hit);
				continue;
			}

			let provider = Arc::clone(&provider);
			let cache = Arc::clone(&self.cache);
			let limiter = Arc::clone(&self.limiter);
			let disabled = Arc::clone(&self.disabled);
			let cfg = self.cfg.clone();
			let on_each = Arc::clone(&on_each);
			let text = text.to_string();
			let source = source.clone();

			tasks.spawn(async move {
				let Ok(_permit) = limiter.acquire_owned().await else {
					return (raw, None);
				};

				if disabled.load(Ordering::Relaxed) {
					return (raw, None);
				}

				match localize_with_retry(&provider, &disabled, &cfg, &text, source.as_deref(), &target).await {
					Ok(translated) => {
						cache.insert(&text, source.as_deref(), &target, translated.clone());
						on_each(&raw, &translated);
						(raw, Some(translated))
					}
					Err(e) => {
						metrics::counter!("lingua_translate_provider_failures_total").increment(1);
						warn!(lang = %raw, error = %e, "translation failed; original text stands in");
						(raw, None)
					}
				}
			});
		}

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((raw, Some(translated))) => {
					outcome.translations.insert(raw, translated);
				}
				Ok((raw, None)) => outcome.failed.push(raw),
				Err(e) => {
					error!(error = %e, "translation task panicked");
					outcome.degraded = true;
				}
			}
		}

		outcome.failed.sort();
		outcome.degraded = outcome.degraded || !outcome.failed.is_empty();
		outcome
	}

	/// Single on-the-fly translation (history backfill). Returns `None` when
	/// no translation is needed or available; the caller falls back to the
	/// original text.
	pub async fn translate_single(&self, text: &str, source_lang: &str, target_lang: &str) -> Option<String> {
		let source = resolve_locale(source_lang);
		let target = resolve_locale(target_lang).unwrap_or_else(|| target_lang.trim().to_string());
		if target.is_empty() || source.as_deref() == Some(target.as_str()) {
			return None;
		}

		if let Some(hit) = self.cache.get(text, source.as_deref(), &target) {
			return Some(hit);
		}

		if !self.is_enabled() {
			return None;
		}
		let provider = self.provider.clone()?;

		let _permit = self.limiter.clone().acquire_owned().await.ok()?;
		match localize_with_retry(&provider, &self.disabled, &self.cfg, text, source.as_deref(), &target).await {
			Ok(translated) => {
				self.cache.insert(text, source.as_deref(), &target, translated.clone());
				Some(translated)
			}
			Err(e) => {
				warn!(lang = %target_lang, error = %e, "history backfill translation failed");
				None
			}
		}
	}
}

fn backoff_delay(attempt: u32, base: Duration) -> Duration {
	let pow = attempt.min(16);
	let ms = base.as_millis().saturating_mul(1u128 << pow);
	Duration::from_millis(ms.min(u64::MAX as u128) as u64)
}

async fn localize_with_retry(
	provider: &Arc<dyn TranslationProvider>,
	disabled: &Arc<AtomicBool>,
	cfg: &GatewayConfig,
	text: &str,
	source: Option<&str>,
	target: &str,
) -> Result<String, ProviderError> {
	let mut last_err = ProviderError::InvalidResponse("no attempts made".to_string());

	for attempt in 0..cfg.max_attempts.max(1) {
		metrics::counter!("lingua_translate_provider_calls_total").increment(1);

		let result = match timeout(cfg.attempt_timeout, provider.localize(text, source, target)).await {
			Ok(r) => r,
			Err(_) => Err(ProviderError::Timeout),
		};

		match result {
			Ok(translated) => return Ok(translated),
			Err(e) if e.is_fatal() => {
				if !disabled.swap(true, Ordering::Relaxed) {
					metrics::counter!("lingua_translate_disabled_total").increment(1);
					error!(error = %e, "fatal provider error; disabling translation for process lifetime");
				}
				return Err(e);
			}
			Err(e) if e.is_transient() && attempt + 1 < cfg.max_attempts => {
				let delay = backoff_delay(attempt, cfg.base_backoff);
				metrics::counter!("lingua_translate_provider_retries_total").increment(1);
				warn!(
					%target,
					attempt = attempt + 1,
					delay_ms = delay.as_millis() as u64,
					error = %e,
					"transient provider error; retrying"
				);
				sleep(delay).await;
				last_err = e;
			}
			Err(e) => return Err(e),
		}
	}

	Err(last_err)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_doubles_per_attempt() {
		let base = Duration::from_millis(1500);
		assert_eq!(backoff_delay(0, base), Duration::from_millis(1500));
		assert_eq!(backoff_delay(1, base), Duration::from_millis(3000));
		assert_eq!(backoff_delay(2, base), Duration::from_millis(6000));
	}
}
