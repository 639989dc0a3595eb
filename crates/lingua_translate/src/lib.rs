#![forbid(unsafe_code)]

pub mod cache;
pub mod gateway;
pub mod lingo;

#[cfg(test)]
mod gateway_tests;

use core::fmt;

use thiserror::Error;

pub use cache::{CacheConfig, TranslationCache};
pub use gateway::{GatewayConfig, TranslationGateway, TranslationOutcome};
pub use lingo::LingoClient;

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// Provider call errors, classified for the retry policy.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
	#[error("request timed out")]
	Timeout,

	#[error("transport error: {0}")]
	Transport(String),

	#[error("server error (status {0})")]
	Server(u16),

	/// Credential failures; disable translation for the process lifetime.
	#[error("unauthorized: {0}")]
	Auth(String),

	/// Definitive rejection (non-auth 4xx); not retried.
	#[error("rejected (status {status}): {detail}")]
	Rejected { status: u16, detail: String },

	#[error("invalid response: {0}")]
	InvalidResponse(String),
}

impl ProviderError {
	/// Transient failures are retried within the backoff budget.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Timeout | Self::Transport(_) | Self::Server(_))
	}

	/// Fatal failures flip the gateway's process-lifetime kill switch.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::Auth(_))
	}
}

/// External translation provider: one call, one target locale.
#[async_trait::async_trait]
pub trait TranslationProvider: Send + Sync {
	/// Translate `text` into `target`. `source = None` requests auto-detection.
	async fn localize(&self, text: &str, source: Option<&str>, target: &str) -> Result<String, ProviderError>;
}

/// Map a short language code onto the provider's locale identifier.
///
/// Unknown codes pass through unchanged; `auto`/empty resolve to `None`
/// (provider-side auto-detection).
pub fn resolve_locale(code: &str) -> Option<String> {
	let code = code.trim();
	if code.is_empty() || code.eq_ignore_ascii_case("auto") {
		return None;
	}

	let mapped = match code {
		"en" => "en",
		"hi" => "hi-IN",
		"bn" => "bn-IN",
		"es" => "es-ES",
		"fr" => "fr-FR",
		"de" => "de-DE",
		"ja" => "ja-JP",
		other => other,
	};
	Some(mapped.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolve_locale_maps_known_codes() {
		assert_eq!(resolve_locale("es").as_deref(), Some("es-ES"));
		assert_eq!(resolve_locale("en").as_deref(), Some("en"));
		assert_eq!(resolve_locale("pt-BR").as_deref(), Some("pt-BR"));
	}

	#[test]
	fn resolve_locale_auto_detects() {
		assert_eq!(resolve_locale("auto"), None);
		assert_eq!(resolve_locale("  "), None);
	}

	#[test]
	fn provider_error_classification() {
		assert!(ProviderError::Timeout.is_transient());
		assert!(ProviderError::Server(503).is_transient());
		assert!(!ProviderError::Auth("bad key".into()).is_transient());
		assert!(ProviderError::Auth("bad key".into()).is_fatal());
		assert!(
			!ProviderError::Rejected {
				status: 422,
				detail: "nope".into()
			}
			.is_transient()
		);
	}

	#[test]
	fn secret_string_redacts() {
		let s = SecretString::new("api-key");
		assert_eq!(format!("{s}"), "<redacted>");
		assert_eq!(format!("{s:?}"), "SecretString(<redacted>)");
		assert_eq!(s.expose(), "api-key");
	}
}
