use std::time::Duration;

use async_trait::async_trait;
use common_types::TimestampMicros;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BackfillError;

/// The most recent tick the historical store knows for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestTick {
    pub price: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub observed_at: Option<TimestampMicros>,
}

impl LatestTick {
    /// A backfilled price is held to the same bar as one from the payload.
    pub fn usable_price(&self) -> Option<f64> {
        (self.price.is_finite() && self.price > 0.0).then_some(self.price)
    }
}

/// Lookup of the last known tick for an instrument, used to fill in a missing price.
///
/// Implementations do their own timeouts; callers never retry.
#[async_trait]
pub trait BackfillResolver: Send + Sync {
    async fn get_latest_tick(&self, instrument_id: &str)
        -> Result<Option<LatestTick>, BackfillError>;
}

/// Resolves against the historical store's HTTP API:
/// `GET {base_url}/instruments/{instrument_id}/latest`.
pub struct HttpBackfillResolver {
    client: Client,
    base_url: Url,
}

impl HttpBackfillResolver {
    pub fn new(base_url: &str, deadline: Option<Duration>) -> Result<Self, BackfillError> {
        let invalid = |reason: String| BackfillError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };
        let parsed = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }

        let mut builder = Client::builder();
        if let Some(deadline) = deadline {
            builder = builder.timeout(deadline);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: parsed,
        })
    }

    // The id goes in as a single escaped path segment, so `/`, `?` or `#` in it can't
    // address another resource.
    fn latest_url(&self, instrument_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["instruments", instrument_id, "latest"]);
        }
        url
    }
}

#[async_trait]
impl BackfillResolver for HttpBackfillResolver {
    async fn get_latest_tick(
        &self,
        instrument_id: &str,
    ) -> Result<Option<LatestTick>, BackfillError> {
        let url = self.latest_url(instrument_id);
        debug!(instrument_id, url = %url, "looking up latest tick");

        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                serde_json::from_slice(&body)
                    .map(Some)
                    .map_err(|e| BackfillError::Decode {
                        instrument_id: instrument_id.to_string(),
                        reason: e.to_string(),
                    })
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(BackfillError::Status {
                instrument_id: instrument_id.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}
