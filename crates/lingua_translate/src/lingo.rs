#![forbid(unsafe_code)]

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{ProviderError, SecretString, TranslationProvider};

/// Default hosted translation engine endpoint.
pub const DEFAULT_BASE_URL: &str = "https://engine.lingo.dev";

/// Client for the hosted `/i18n` translation endpoint.
#[derive(Debug, Clone)]
pub struct LingoClient {
	base_url: String,
	api_key: SecretString,
	client: reqwest::Client,
}

impl LingoClient {
	pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(30))
			.pool_max_idle_per_host(5)
			.build()
			.unwrap_or_default();

		Self {
			base_url: base_url.into(),
			api_key,
			client,
		}
	}

	fn endpoint(&self) -> String {
		format!("{}/i18n", self.base_url.trim_end_matches('/'))
	}
}

#[derive(Debug, Serialize)]
struct LocalizeRequest<'a> {
	params: LocalizeParams,
	locale: LocalizeLocale<'a>,
	data: LocalizeData<'a>,
}

#[derive(Debug, Serialize)]
struct LocalizeParams {
	fast: bool,
}

#[derive(Debug, Serialize)]
struct LocalizeLocale<'a> {
	source: &'a str,
	target: &'a str,
}

#[derive(Debug, Serialize)]
struct LocalizeData<'a> {
	text: &'a str,
}

#[derive(Debug, Deserialize)]
struct LocalizeResponse {
	#[serde(default)]
	data: Option<LocalizeResponseData>,
}

#[derive(Debug, Deserialize)]
struct LocalizeResponseData {
	#[serde(default)]
	text: Option<String>,
}

fn classify_reqwest_error(e: reqwest::Error) -> ProviderError {
	if e.is_timeout() {
		ProviderError::Timeout
	} else {
		ProviderError::Transport(e.to_string())
	}
}

#[async_trait::async_trait]
impl TranslationProvider for LingoClient {
	async fn localize(&self, text: &str, source: Option<&str>, target: &str) -> Result<String, ProviderError> {
		let body = LocalizeRequest {
			params: LocalizeParams { fast: true },
			locale: LocalizeLocale {
				source: source.unwrap_or("auto"),
				target,
			},
			data: LocalizeData { text },
		};

		let resp = self
			.client
			.post(self.endpoint())
			.header("Authorization", format!("Bearer {}", self.api_key.expose()))
			.json(&body)
			.send()
			.await
			.map_err(classify_reqwest_error)?;

		let status = resp.status();
		match status {
			s if s.is_success() => {}
			StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
				let detail = resp.text().await.unwrap_or_default();
				return Err(ProviderError::Auth(truncate(&detail, 200)));
			}
			s if s.is_server_error() => return Err(ProviderError::Server(s.as_u16())),
			s => {
				let detail = resp.text().await.unwrap_or_default();
				return Err(ProviderError::Rejected {
					status: s.as_u16(),
					detail: truncate(&detail, 200),
				});
			}
		}

		let parsed: LocalizeResponse = resp
			.json()
			.await
			.map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

		// The engine occasionally returns an empty payload; fall back to the
		// input so downstream consumers always see non-empty text.
		let translated = parsed.data.and_then(|d| d.text).filter(|t| !t.is_empty());
		Ok(translated.unwrap_or_else(|| text.to_string()))
	}
}

fn truncate(s: &str, max: usize) -> String {
	if s.len() <= max {
		s.to_string()
	} else {
		let mut end = max;
		while end > 0 && !s.is_char_boundary(end) {
			end -= 1;
		}
		s[..end].to_string()
	}
}
