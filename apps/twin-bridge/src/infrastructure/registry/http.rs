//! Registry HTTP client with retry logic.
//!
//! CRUD on things, features and policies through the registry's API v2.
//! Transport errors and 408/429/5xx responses are retried with exponential
//! backoff; any other non-2xx response is decoded into
//! [`RegistryClientError::Api`].

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::auth::RegistryAuth;
use super::error::RegistryClientError;
use super::models::{Feature, FeatureProperties, Policy, RegistryErrorBody, SearchResult, Thing};
use crate::infrastructure::config::DittoSettings;

/// Request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry settings for registry requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Delay cap.
    pub max_backoff: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// HTTP client for the registry API.
#[derive(Debug, Clone)]
pub struct RegistryHttpClient {
    client: Client,
    base_url: String,
    auth: RegistryAuth,
    retry: RetryConfig,
}

impl RegistryHttpClient {
    /// Create a client for `<settings.url>/api/2`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` for a non-HTTP(S) URL and `Http` if the client
    /// cannot be built.
    pub fn new(settings: &DittoSettings) -> Result<Self, RegistryClientError> {
        Self::with_retry(settings, RetryConfig::default())
    }

    /// Create a client with custom retry settings.
    ///
    /// # Errors
    ///
    /// See [`RegistryHttpClient::new`].
    pub fn with_retry(
        settings: &DittoSettings,
        retry: RetryConfig,
    ) -> Result<Self, RegistryClientError> {
        let url = settings.url.trim_end_matches('/');
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(RegistryClientError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{url}/api/2"),
            auth: RegistryAuth::from_settings(settings),
            retry,
        })
    }

    // =========================================================================
    // Things
    // =========================================================================

    /// Create a thing. The policy id defaults to `<thingId>:policy`.
    pub async fn create_thing(&self, thing: &Thing) -> Result<Thing, RegistryClientError> {
        let mut thing = thing.clone();
        if thing.policy_id.is_empty() && !thing.thing_id.is_empty() {
            thing.policy_id = format!("{}:policy", thing.thing_id);
        }
        self.json(Method::POST, "/things", &[], Some(&thing)).await
    }

    /// Fetch a thing.
    pub async fn get_thing(&self, thing_id: &str) -> Result<Thing, RegistryClientError> {
        self.json(Method::GET, &format!("/things/{thing_id}"), &[], None::<&()>)
            .await
    }

    /// Replace a thing.
    pub async fn update_thing(&self, thing: &Thing) -> Result<(), RegistryClientError> {
        self.empty(
            Method::PUT,
            &format!("/things/{}", thing.thing_id),
            Some(thing),
        )
        .await
    }

    /// Delete a thing.
    pub async fn delete_thing(&self, thing_id: &str) -> Result<(), RegistryClientError> {
        self.empty(Method::DELETE, &format!("/things/{thing_id}"), None::<&()>)
            .await
    }

    /// Search things by RQL filter and namespaces.
    pub async fn search_things(
        &self,
        filter: Option<&str>,
        namespaces: &[String],
    ) -> Result<Vec<Thing>, RegistryClientError> {
        let mut query = Vec::new();
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            query.push(("filter", filter.to_string()));
        }
        if !namespaces.is_empty() {
            query.push(("namespaces", namespaces.join(",")));
        }
        let result: SearchResult = self
            .json(Method::GET, "/search/things", &query, None::<&()>)
            .await?;
        Ok(result.items)
    }

    // =========================================================================
    // Features
    // =========================================================================

    /// Create or replace a feature.
    pub async fn put_feature(
        &self,
        thing_id: &str,
        feature_id: &str,
        feature: &Feature,
    ) -> Result<(), RegistryClientError> {
        self.empty(
            Method::PUT,
            &format!("/things/{thing_id}/features/{feature_id}"),
            Some(feature),
        )
        .await
    }

    /// Fetch a feature.
    pub async fn get_feature(
        &self,
        thing_id: &str,
        feature_id: &str,
    ) -> Result<Feature, RegistryClientError> {
        self.json(
            Method::GET,
            &format!("/things/{thing_id}/features/{feature_id}"),
            &[],
            None::<&()>,
        )
        .await
    }

    /// Delete a feature.
    pub async fn delete_feature(
        &self,
        thing_id: &str,
        feature_id: &str,
    ) -> Result<(), RegistryClientError> {
        self.empty(
            Method::DELETE,
            &format!("/things/{thing_id}/features/{feature_id}"),
            None::<&()>,
        )
        .await
    }

    /// Replace a feature's properties.
    pub async fn put_feature_properties(
        &self,
        thing_id: &str,
        feature_id: &str,
        properties: &FeatureProperties,
    ) -> Result<(), RegistryClientError> {
        self.empty(
            Method::PUT,
            &format!("/things/{thing_id}/features/{feature_id}/properties"),
            Some(properties),
        )
        .await
    }

    /// Fetch a feature's properties.
    pub async fn get_feature_properties(
        &self,
        thing_id: &str,
        feature_id: &str,
    ) -> Result<FeatureProperties, RegistryClientError> {
        self.json(
            Method::GET,
            &format!("/things/{thing_id}/features/{feature_id}/properties"),
            &[],
            None::<&()>,
        )
        .await
    }

    // =========================================================================
    // Policies
    // =========================================================================

    /// Create a policy.
    pub async fn create_policy(&self, policy: &Policy) -> Result<Policy, RegistryClientError> {
        self.json(Method::POST, "/policies", &[], Some(policy)).await
    }

    /// Fetch a policy.
    pub async fn get_policy(&self, policy_id: &str) -> Result<Policy, RegistryClientError> {
        self.json(
            Method::GET,
            &format!("/policies/{policy_id}"),
            &[],
            None::<&()>,
        )
        .await
    }

    /// Replace a policy.
    pub async fn update_policy(&self, policy: &Policy) -> Result<(), RegistryClientError> {
        self.empty(
            Method::PUT,
            &format!("/policies/{}", policy.policy_id),
            Some(policy),
        )
        .await
    }

    /// Delete a policy.
    pub async fn delete_policy(&self, policy_id: &str) -> Result<(), RegistryClientError> {
        self.empty(
            Method::DELETE,
            &format!("/policies/{policy_id}"),
            None::<&()>,
        )
        .await
    }

    // =========================================================================
    // Request Plumbing
    // =========================================================================

    async fn json<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, RegistryClientError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        let text = self.request(method, path, query, body).await?;
        let text = if text.is_empty() { "null" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }

    async fn empty<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), RegistryClientError>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.request(method, path, &[], body).await.map(drop)
    }

    /// Send with retries; returns the success body.
    async fn request<B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<String, RegistryClientError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = format!("{}{path}", self.base_url);
        let mut backoff = ExponentialBackoff::new(&self.retry);

        loop {
            let mut request = self.client.request(method.clone(), &url);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(value) = self.auth.header_value() {
                request = request.header(reqwest::header::AUTHORIZATION, value);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            error = %e,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Registry request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response.text().await?);
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();

            let delay = match categorize_status(status) {
                ErrorCategory::RateLimited => backoff
                    .next_backoff()
                    .map(|delay| retry_after.map_or(delay, Duration::from_secs)),
                ErrorCategory::Retryable => backoff.next_backoff(),
                ErrorCategory::NonRetryable => {
                    return Err(RegistryClientError::Api {
                        status: status.as_u16(),
                        body: decode_error_body(status, &text),
                    });
                }
            };

            match delay {
                Some(delay) => {
                    tracing::warn!(
                        status = status.as_u16(),
                        %method,
                        path,
                        delay_ms = delay.as_millis(),
                        "Retryable registry response, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(RegistryClientError::RetriesExhausted {
                        attempts: backoff.attempt,
                        status: status.as_u16(),
                    });
                }
            }
        }
    }
}

fn decode_error_body(status: StatusCode, text: &str) -> RegistryErrorBody {
    serde_json::from_str::<RegistryErrorBody>(text).unwrap_or_else(|_| RegistryErrorBody {
        status: status.as_u16(),
        error: status.canonical_reason().unwrap_or("unknown").to_string(),
        message: text.to_string(),
        description: None,
        href: None,
    })
}

/// Error category for determining retry behavior.
enum ErrorCategory {
    RateLimited,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Exponential backoff calculator.
struct ExponentialBackoff {
    attempt: u32,
    max_attempts: u32,
    current_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    const fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            current_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let backoff = self.current_backoff;
        self.current_backoff = Duration::from_secs_f64(
            (self.current_backoff.as_secs_f64() * self.multiplier)
                .min(self.max_backoff.as_secs_f64()),
        );

        Some(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_rate_limited() {
        assert!(matches!(
            categorize_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorCategory::RateLimited
        ));
    }

    #[test]
    fn categorize_retryable() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            assert!(matches!(categorize_status(status), ErrorCategory::Retryable));
        }
    }

    #[test]
    fn categorize_non_retryable() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::CONFLICT,
            StatusCode::UNAUTHORIZED,
        ] {
            assert!(matches!(
                categorize_status(status),
                ErrorCategory::NonRetryable
            ));
        }
    }

    #[test]
    fn three_attempts_starting_at_200ms() {
        let mut backoff = ExponentialBackoff::new(&RetryConfig::default());

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn unparseable_error_body_keeps_text() {
        let body = decode_error_body(StatusCode::BAD_REQUEST, "nope");
        assert_eq!(body.status, 400);
        assert_eq!(body.error, "Bad Request");
        assert_eq!(body.message, "nope");
    }

    #[test]
    fn rejects_non_http_url() {
        let settings = DittoSettings {
            url: "ditto:8080".to_string(),
            ..DittoSettings::default()
        };
        assert!(matches!(
            RegistryHttpClient::new(&settings),
            Err(RegistryClientError::InvalidUrl(_))
        ));
    }
}
