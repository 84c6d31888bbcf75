//! # Collector Sinks
//!
//! Transport-only abstractions over the collector API, plus the reqwest
//! implementation.
//!
//! ## Collector API
//! ```text
//! ┌──────────┬───────────────────────────────┬──────────────────────────────┐
//! │ Method   │ Path (under {scheme}://host/) │ Body (inside the envelope)   │
//! ├──────────┼───────────────────────────────┼──────────────────────────────┤
//! │ POST     │ v1/users/{install_id}/event   │ {"events": [Event, ...]}     │
//! │ PUT      │ v1/users/{install_id}         │ DeviceProfile (with hints)   │
//! │ POST     │ v1/users/{install_id}/errors/ │ {"error": "..."}             │
//! └──────────┴───────────────────────────────┴──────────────────────────────┘
//!
//! Every body is sent as {"payload": encode(json)}. Any 2xx is success.
//! ```

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use beacon_core::{DeviceProfile, ErrorReport, Event};

use crate::codec::{Envelope, PayloadEncoder};
use crate::config::CollectorSettings;
use crate::device::DeviceInfoSource;
use crate::error::{TelemetryError, TelemetryResult};

// =============================================================================
// Endpoint
// =============================================================================

/// Collector location supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorEndpoint {
    /// Host name, optionally with port.
    pub host: String,

    /// https when true, http otherwise.
    pub secure: bool,
}

impl CollectorEndpoint {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        CollectorEndpoint {
            host: host.into(),
            secure,
        }
    }

    /// `{scheme}://{host}/{api_version}/`
    pub fn base_url(&self, api_version: &str) -> TelemetryResult<Url> {
        let host = self.host.trim();
        if host.is_empty()
            || host.contains("://")
            || host.contains('/')
            || host.chars().any(char::is_whitespace)
        {
            return Err(TelemetryError::InvalidUrl(format!(
                "collector host must be a bare host[:port], got: '{}'",
                self.host
            )));
        }

        let scheme = if self.secure { "https" } else { "http" };
        let url = Url::parse(&format!(
            "{}://{}/{}/",
            scheme,
            host,
            api_version.trim_matches('/')
        ))?;
        Ok(url)
    }
}

// =============================================================================
// Sink Traits
// =============================================================================

/// Uploads one batch of events.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn send_batch(&self, batch: &[Event]) -> TelemetryResult<()>;
}

/// Profile upserts and best-effort error reports.
#[async_trait]
pub trait ProfileSink: Send + Sync {
    async fn push_profile(&self, profile: &DeviceProfile) -> TelemetryResult<()>;

    async fn report_error(&self, report: &ErrorReport) -> TelemetryResult<()>;
}

// =============================================================================
// HTTP Collector
// =============================================================================

#[derive(Serialize)]
struct EventsBody<'a> {
    events: &'a [Event],
}

/// reqwest-backed collector client implementing both sinks.
pub struct HttpCollector {
    client: Client,
    base_url: Url,
    timeout_ms: u64,
    identity: Arc<dyn DeviceInfoSource>,
    encoder: Arc<dyn PayloadEncoder>,
}

impl HttpCollector {
    pub fn new(
        endpoint: &CollectorEndpoint,
        settings: &CollectorSettings,
        identity: Arc<dyn DeviceInfoSource>,
        encoder: Arc<dyn PayloadEncoder>,
    ) -> TelemetryResult<Self> {
        let base_url = endpoint.base_url(&settings.api_version)?;

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .connect_timeout(settings.connect_timeout())
            .build()
            .map_err(|e| TelemetryError::Transport(format!("http client build failed: {e}")))?;

        Ok(HttpCollector {
            client,
            base_url,
            timeout_ms: settings.request_timeout_ms,
            identity,
            encoder,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn user_url(&self, suffix: &str) -> TelemetryResult<Url> {
        let install_id = self.identity.install_id().await?;
        Ok(self.base_url.join(&format!("users/{}{}", install_id, suffix))?)
    }

    async fn send<T: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        body: &T,
    ) -> TelemetryResult<()> {
        let envelope = Envelope::seal(self.encoder.as_ref(), body)?;

        debug!(%method, %url, "Collector request");
        let response = self
            .client
            .request(method, url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TelemetryError::Timeout(self.timeout_ms)
                } else {
                    e.into()
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::DeliveryFailed {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl DeliverySink for HttpCollector {
    async fn send_batch(&self, batch: &[Event]) -> TelemetryResult<()> {
        let url = self.user_url("/event").await?;
        self.send(Method::POST, url, &EventsBody { events: batch }).await
    }
}

#[async_trait]
impl ProfileSink for HttpCollector {
    async fn push_profile(&self, profile: &DeviceProfile) -> TelemetryResult<()> {
        let url = self.user_url("").await?;
        self.send(Method::PUT, url, profile).await
    }

    async fn report_error(&self, report: &ErrorReport) -> TelemetryResult<()> {
        let url = self.user_url("/errors/").await?;
        self.send(Method::POST, url, report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_scheme() {
        let secure = CollectorEndpoint::new("collector.example.com", true);
        assert_eq!(
            secure.base_url("v1").unwrap().as_str(),
            "https://collector.example.com/v1/"
        );

        let plain = CollectorEndpoint::new("10.0.0.2:8080", false);
        assert_eq!(plain.base_url("/v1/").unwrap().as_str(), "http://10.0.0.2:8080/v1/");
    }

    #[test]
    fn test_base_url_rejects_urls() {
        for bad in ["", "   ", "https://x.com", "x.com/path", "x .com"] {
            assert!(
                CollectorEndpoint::new(bad, true).base_url("v1").is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_endpoint_json() {
        let endpoint = CollectorEndpoint::new("c.example.com", false);
        let json = serde_json::to_string(&endpoint).unwrap();
        let parsed: CollectorEndpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, endpoint);
    }
}
