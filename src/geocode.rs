//! Reverse geocoding for the viewer's address line.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::ResolveError;
use crate::models::location::Coordinates;
use crate::models::view::UNKNOWN_ADDRESS;

/// Turns coordinates into a short human-readable place name.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, coords: Coordinates) -> Result<String, ResolveError>;
}

/// OpenStreetMap Nominatim reverse lookup. One request per call, no retries.
pub struct NominatimResolver {
    client: reqwest::Client,
    reverse_url: Url,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

impl NominatimResolver {
    pub fn new(base_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        let reverse_url = Url::parse(base_url)
            .and_then(|base| base.join("reverse"))
            .with_context(|| format!("invalid geocoder url: {}", base_url))?;
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, reverse_url })
    }
}

#[async_trait]
impl AddressResolver for NominatimResolver {
    async fn resolve(&self, coords: Coordinates) -> Result<String, ResolveError> {
        let response: ReverseResponse = self
            .client
            .get(self.reverse_url.clone())
            .query(&[
                ("format", "json".to_string()),
                ("lat", coords.lat.to_string()),
                ("lon", coords.lng.to_string()),
                ("zoom", "18".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("Reverse lookup for {}, {}: {:?}", coords.lat, coords.lng, response.display_name);
        Ok(response
            .display_name
            .as_deref()
            .map(shorten_address)
            .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string()))
    }
}

/// Keeps the first three comma-separated parts of a full place name.
pub fn shorten_address(display_name: &str) -> String {
    display_name
        .split(',')
        .take(3)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
pub mod stub {
    use super::*;
    use std::sync::Mutex;

    /// Resolver answering from a fixed table, recording every call.
    pub struct StubResolver {
        answer: Option<String>,
        delay: Duration,
        pub calls: Mutex<Vec<Coordinates>>,
    }

    impl StubResolver {
        pub fn answering(answer: &str) -> Self {
            Self {
                answer: Some(answer.to_string()),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                answer: None,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AddressResolver for StubResolver {
        async fn resolve(&self, coords: Coordinates) -> Result<String, ResolveError> {
            self.calls.lock().unwrap().push(coords);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.answer.clone().ok_or(ResolveError::NoMatch)
        }
    }
}
