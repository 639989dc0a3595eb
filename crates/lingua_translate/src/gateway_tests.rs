#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::{CacheConfig, TranslationCache};
use crate::gateway::{GatewayConfig, OnEach, TranslationGateway};
use crate::{ProviderError, TranslationProvider};

/// Scripted provider: per-target step queues, optional per-target latency,
/// and a call counter. Unscripted calls succeed with `"<text> [<target>]"`.
#[derive(Default)]
struct FakeProvider {
	calls: AtomicUsize,
	steps: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
	delays: HashMap<String, Duration>,
}

impl FakeProvider {
	fn new() -> Self {
		Self::default()
	}

	fn script(self, target: &str, steps: Vec<Result<String, ProviderError>>) -> Self {
		self.steps.lock().insert(target.to_string(), steps.into());
		self
	}

	fn delay(mut self, target: &str, delay: Duration) -> Self {
		self.delays.insert(target.to_string(), delay);
		self
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait::async_trait]
impl TranslationProvider for FakeProvider {
	async fn localize(&self, text: &str, _source: Option<&str>, target: &str) -> Result<String, ProviderError> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		if let Some(delay) = self.delays.get(target) {
			tokio::time::sleep(*delay).await;
		}

		let scripted = self.steps.lock().get_mut(target).and_then(VecDeque::pop_front);
		match scripted {
			Some(step) => step,
			None => Ok(format!("{text} [{target}]")),
		}
	}
}

fn test_cfg() -> GatewayConfig {
	GatewayConfig {
		max_attempts: 3,
		base_backoff: Duration::from_millis(1),
		attempt_timeout: Duration::from_secs(1),
		max_in_flight: 4,
	}
}

fn cache() -> Arc<TranslationCache> {
	Arc::new(TranslationCache::new(CacheConfig::default()))
}

fn gateway(provider: Arc<FakeProvider>) -> TranslationGateway {
	TranslationGateway::new(provider, cache(), test_cfg())
}

fn recording_on_each() -> (OnEach, Arc<Mutex<Vec<String>>>) {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let seen_clone = Arc::clone(&seen);
	let on_each: OnEach = Arc::new(move |lang: &str, _text: &str| {
		seen_clone.lock().push(lang.to_string());
	});
	(on_each, seen)
}

#[tokio::test]
async fn translates_each_target_and_skips_source() {
	let provider = Arc::new(FakeProvider::new());
	let gw = gateway(Arc::clone(&provider));
	let (on_each, _) = recording_on_each();

	let outcome = gw
		.translate_many("hello", "en", &["en".to_string(), "es".to_string(), "fr".to_string()], on_each)
		.await;

	assert_eq!(outcome.translations.len(), 2);
	assert!(outcome.translations.contains_key("es"));
	assert!(outcome.translations.contains_key("fr"));
	assert!(!outcome.translations.contains_key("en"), "source locale must be skipped");
	assert!(!outcome.degraded);
	assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn streams_faster_locales_before_slow_ones_complete() {
	let provider = Arc::new(
		FakeProvider::new()
			.delay("es-ES", Duration::from_millis(5))
			.delay("fr-FR", Duration::from_millis(120)),
	);
	let gw = gateway(provider);
	let (on_each, seen) = recording_on_each();

	let outcome = gw
		.translate_many("hello", "en", &["fr".to_string(), "es".to_string()], on_each)
		.await;

	assert_eq!(outcome.translations.len(), 2);
	let order = seen.lock().clone();
	assert_eq!(order, vec!["es".to_string(), "fr".to_string()], "fast locale must not wait for the slow one");
}

#[tokio::test]
async fn cache_prevents_second_provider_call_within_ttl() {
	let provider = Arc::new(FakeProvider::new());
	let gw = gateway(Arc::clone(&provider));

	let (on_each, _) = recording_on_each();
	let first = gw.translate_many("hello", "en", &["es".to_string()], on_each).await;
	assert_eq!(provider.calls(), 1);

	let (on_each, seen) = recording_on_each();
	let second = gw.translate_many("hello", "en", &["es".to_string()], on_each).await;

	assert_eq!(provider.calls(), 1, "second request must be served from cache");
	assert_eq!(first.translations, second.translations);
	assert_eq!(seen.lock().as_slice(), ["es".to_string()], "cache hits still stream through on_each");
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
	let provider = Arc::new(FakeProvider::new().script(
		"es-ES",
		vec![
			Err(ProviderError::Server(503)),
			Err(ProviderError::Timeout),
			Ok("hola".to_string()),
		],
	));
	let gw = gateway(Arc::clone(&provider));
	let (on_each, _) = recording_on_each();

	let outcome = gw.translate_many("hello", "en", &["es".to_string()], on_each).await;

	assert_eq!(outcome.translations.get("es").map(String::as_str), Some("hola"));
	assert!(!outcome.degraded);
	assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn retry_exhaustion_omits_locale_and_flags_degraded() {
	let provider = Arc::new(FakeProvider::new().script(
		"es-ES",
		vec![
			Err(ProviderError::Server(502)),
			Err(ProviderError::Server(502)),
			Err(ProviderError::Server(502)),
		],
	));
	let gw = gateway(Arc::clone(&provider));
	let (on_each, seen) = recording_on_each();

	let outcome = gw
		.translate_many("hello", "en", &["es".to_string(), "fr".to_string()], on_each)
		.await;

	assert_eq!(outcome.failed, vec!["es".to_string()]);
	assert!(outcome.degraded);
	assert!(!outcome.translations.contains_key("es"));
	assert!(outcome.translations.contains_key("fr"));
	assert_eq!(seen.lock().as_slice(), ["fr".to_string()]);
	assert_eq!(provider.calls(), 4, "three attempts for es, one for fr");
}

#[tokio::test]
async fn definitive_rejection_is_not_retried() {
	let provider = Arc::new(FakeProvider::new().script(
		"es-ES",
		vec![Err(ProviderError::Rejected {
			status: 422,
			detail: "unsupported".to_string(),
		})],
	));
	let gw = gateway(Arc::clone(&provider));
	let (on_each, _) = recording_on_each();

	let outcome = gw.translate_many("hello", "en", &["es".to_string()], on_each).await;

	assert_eq!(outcome.failed, vec!["es".to_string()]);
	assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn fatal_error_disables_translation_for_process_lifetime() {
	let provider = Arc::new(FakeProvider::new().script("es-ES", vec![Err(ProviderError::Auth("bad key".to_string()))]));
	let gw = gateway(Arc::clone(&provider));

	let (on_each, _) = recording_on_each();
	let first = gw.translate_many("hello", "en", &["es".to_string()], on_each).await;
	assert!(first.degraded);
	assert!(!gw.is_enabled());
	let calls_after_first = provider.calls();

	let (on_each, _) = recording_on_each();
	let second = gw.translate_many("hello again", "en", &["es".to_string()], on_each).await;
	assert!(second.degraded);
	assert_eq!(second.failed, vec!["es".to_string()]);
	assert_eq!(provider.calls(), calls_after_first, "disabled gateway must not call the provider");
}

#[tokio::test]
async fn disabled_gateway_reports_all_targets_failed() {
	let gw = TranslationGateway::disabled(cache());
	let (on_each, seen) = recording_on_each();

	let outcome = gw
		.translate_many("hello", "en", &["es".to_string(), "fr".to_string()], on_each)
		.await;

	assert!(outcome.degraded);
	assert_eq!(outcome.failed.len(), 2);
	assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn translate_single_caches_and_falls_back_on_failure() {
	let provider = Arc::new(FakeProvider::new());
	let gw = gateway(Arc::clone(&provider));

	let translated = gw.translate_single("hello", "en", "es").await;
	assert_eq!(translated.as_deref(), Some("hello [es-ES]"));
	assert_eq!(provider.calls(), 1);

	let cached = gw.translate_single("hello", "en", "es").await;
	assert_eq!(cached.as_deref(), Some("hello [es-ES]"));
	assert_eq!(provider.calls(), 1);

	assert_eq!(gw.translate_single("hello", "en", "en").await, None, "same locale needs no translation");
}
