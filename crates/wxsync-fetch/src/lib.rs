//! HTTP fetch of current weather observations, one request per city.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use wxsync_core::{CityId, RawObservation};

pub const CRATE_NAME: &str = "wxsync-fetch";

pub const DEFAULT_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Connection settings for the weather provider.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub units: String,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            units: "metric".to_string(),
            timeout_secs: 2,
            user_agent: Some(concat!("wxsync/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("units", &self.units)
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Failure to obtain a document for a single city. Never fatal for a batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unable to reach weather api: {0}")]
    Request(#[source] reqwest::Error),
    #[error("unexpected response: http status {status}")]
    HttpStatus { status: u16 },
    #[error("no data received from server")]
    EmptyBody,
    #[error("response body is not valid json: {0}")]
    Decode(#[source] serde_json::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // The request url carries the api key in its query string.
        FetchError::Request(err.without_url())
    }
}

/// Anything that can produce the raw observation for one city.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch_one(&self, city_id: CityId) -> Result<RawObservation, FetchError>;
}

#[derive(Debug)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    config: ApiConfig,
}

impl OpenWeatherClient {
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout());

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }
}

#[async_trait]
impl ObservationSource for OpenWeatherClient {
    async fn fetch_one(&self, city_id: CityId) -> Result<RawObservation, FetchError> {
        let span = info_span!("http_fetch", %city_id, url = %self.config.base_url);
        async {
            let resp = self
                .client
                .get(&self.config.base_url)
                .query(&[
                    ("id", city_id.get().to_string()),
                    ("appid", self.config.api_key.clone()),
                    ("units", self.config.units.clone()),
                ])
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                });
            }

            let body = resp.bytes().await?;
            parse_observation_body(city_id, &body)
        }
        .instrument(span)
        .await
    }
}

/// Turn a successful response body into a raw observation.
///
/// An empty body, a JSON `null`, or an empty object/array count as "no data".
pub fn parse_observation_body(city_id: CityId, body: &[u8]) -> Result<RawObservation, FetchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(FetchError::EmptyBody);
    }
    let document: JsonValue = serde_json::from_slice(body).map_err(FetchError::Decode)?;
    let empty = match &document {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        _ => false,
    };
    if empty {
        return Err(FetchError::EmptyBody);
    }
    Ok(RawObservation::new(city_id, document))
}

pub fn is_server_error(err: &FetchError) -> bool {
    matches!(err, FetchError::HttpStatus { status } if StatusCode::from_u16(*status).map(|s| s.is_server_error()).unwrap_or(false))
}

/// Fetch every city in order, one request at a time.
///
/// A failing city is logged and skipped; the returned observations keep the
/// input order and may be fewer than requested.
pub async fn fetch_all(source: &dyn ObservationSource, ids: &[CityId]) -> Vec<RawObservation> {
    let mut out = Vec::with_capacity(ids.len());
    for &city_id in ids {
        match source.fetch_one(city_id).await {
            Ok(observation) => out.push(observation),
            Err(err) => {
                warn!(%city_id, error = %err, server_error = is_server_error(&err), "skipping city after fetch failure");
            }
        }
    }
    info!(requested = ids.len(), fetched = out.len(), "collected weather documents");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StubSource {
        docs: HashMap<i64, JsonValue>,
    }

    #[async_trait]
    impl ObservationSource for StubSource {
        async fn fetch_one(&self, city_id: CityId) -> Result<RawObservation, FetchError> {
            match self.docs.get(&city_id.get()) {
                Some(doc) => Ok(RawObservation::new(city_id, doc.clone())),
                None => Err(FetchError::HttpStatus { status: 404 }),
            }
        }
    }

    #[test]
    fn empty_and_null_bodies_are_no_data() {
        for body in [&b""[..], b"   \n", b"null", b"{}", b"[]"] {
            let err = parse_observation_body(CityId(1), body).unwrap_err();
            assert!(matches!(err, FetchError::EmptyBody), "body {body:?}");
        }
    }

    #[test]
    fn garbage_body_is_decode_error() {
        let err = parse_observation_body(CityId(1), b"<html>oops</html>").unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn document_body_keeps_requested_id() {
        let obs = parse_observation_body(CityId(7), br#"{"id": 7, "name": "X"}"#).unwrap();
        assert_eq!(obs.requested_id, CityId(7));
        assert_eq!(obs.document["name"], "X");
    }

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let config = ApiConfig {
            api_key: "super-secret".into(),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn server_errors_are_flagged() {
        assert!(is_server_error(&FetchError::HttpStatus { status: 503 }));
        assert!(!is_server_error(&FetchError::HttpStatus { status: 401 }));
        assert!(!is_server_error(&FetchError::EmptyBody));
    }

    #[tokio::test]
    async fn partial_failures_are_skipped_in_order() {
        let source = StubSource {
            docs: HashMap::from([
                (1, serde_json::json!({"id": 1})),
                (3, serde_json::json!({"id": 3})),
                (4, serde_json::json!({"id": 4})),
            ]),
        };
        let ids = [CityId(4), CityId(2), CityId(1), CityId(3)];
        let got = fetch_all(&source, &ids).await;
        let order: Vec<_> = got.iter().map(|o| o.requested_id.get()).collect();
        assert_eq!(order, vec![4, 1, 3]);
    }

    #[tokio::test]
    async fn all_failures_yield_empty_batch() {
        let source = StubSource {
            docs: HashMap::new(),
        };
        let got = fetch_all(&source, &[CityId(1), CityId(2)]).await;
        assert!(got.is_empty());
    }
}
