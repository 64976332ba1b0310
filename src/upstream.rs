use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{config::Settings, error::UpstreamError};

/// Shared HTTP plumbing for the third-party market-data services. One request
/// policy everywhere: per-request timeout, bounded retries with exponential
/// backoff, retry only on network-level failures or 5xx, never on 4xx.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    max_retries: usize,
    retry_base: Duration,
}

impl UpstreamClient {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.upstream_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            max_retries: settings.upstream_max_retries,
            retry_base: Duration::from_millis(settings.upstream_retry_base_ms),
        })
    }

    pub async fn get_json(
        &self,
        upstream: &'static str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<JsonValue, UpstreamError> {
        let mut attempt = 0usize;
        loop {
            match self.get_json_once(upstream, url, query).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !e.is_retryable() || attempt >= self.max_retries {
                        return Err(e);
                    }
                    let delay = retry_delay(self.retry_base, attempt);
                    log::warn!(
                        "upstream.retry upstream={} attempt={} delay_ms={} err={}",
                        upstream,
                        attempt + 1,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn get_json_once(
        &self,
        upstream: &'static str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<JsonValue, UpstreamError> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| classify_transport(upstream, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Http {
                upstream,
                status: status.as_u16(),
            });
        }

        resp.json::<JsonValue>().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout { upstream }
            } else {
                UpstreamError::Network {
                    upstream,
                    message: format!("invalid response body: {e}"),
                }
            }
        })
    }
}

fn classify_transport(upstream: &'static str, e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout { upstream }
    } else {
        UpstreamError::Network {
            upstream,
            message: e.to_string(),
        }
    }
}

/// base * 2^attempt. The poller adds jitter on top for scheduled refreshes;
/// within one request the plain doubling is enough.
pub fn retry_delay(base: Duration, attempt: usize) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16) as u32)
}

// ---- Candle aggregator ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Clone)]
pub struct CandleClient {
    base_url: String,
    client: UpstreamClient,
}

pub const CANDLES_UPSTREAM: &str = "candle provider";

impl CandleClient {
    pub fn new(settings: &Settings, client: UpstreamClient) -> Self {
        Self {
            base_url: settings.candles_base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub async fn fetch(
        &self,
        pair: &str,
        seconds: u64,
        limit: usize,
    ) -> Result<Vec<Candle>, UpstreamError> {
        let url = format!("{}/v1/candles", self.base_url);
        let body = self
            .client
            .get_json(
                CANDLES_UPSTREAM,
                &url,
                &[
                    ("pair", pair.to_string()),
                    ("seconds", seconds.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let candles = body.get("candles").cloned().unwrap_or(JsonValue::Array(vec![]));
        serde_json::from_value(candles).map_err(|e| UpstreamError::Network {
            upstream: CANDLES_UPSTREAM,
            message: format!("unexpected candle shape: {e}"),
        })
    }
}

// ---- Wallet net-worth service ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetWorthPoint {
    pub ts: u64,
    pub total_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetWorth {
    pub address: String,
    pub chain_id: u64,
    pub total_usd: f64,
    /// 24h curve; empty when the history endpoint was unavailable. Partial
    /// data must not fail the whole response.
    pub history_24h: Vec<NetWorthPoint>,
}

#[derive(Clone)]
pub struct NetWorthClient {
    base_url: String,
    client: UpstreamClient,
}

pub const NET_WORTH_UPSTREAM: &str = "net-worth service";

impl NetWorthClient {
    pub fn new(settings: &Settings, client: UpstreamClient) -> Self {
        Self {
            base_url: settings.net_worth_base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// The primary point is required; a history failure degrades to an empty
    /// curve rather than failing the call.
    pub async fn fetch(&self, address: &str, chain_id: u64) -> Result<NetWorth, UpstreamError> {
        let query = [
            ("address", address.to_string()),
            ("chain_id", chain_id.to_string()),
        ];

        let url = format!("{}/v1/net-worth", self.base_url);
        let primary = self
            .client
            .get_json(NET_WORTH_UPSTREAM, &url, &query)
            .await?;
        let total_usd = primary
            .get("total_usd")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| UpstreamError::Network {
                upstream: NET_WORTH_UPSTREAM,
                message: "response missing total_usd".to_string(),
            })?;

        let history_url = format!("{}/v1/net-worth/history", self.base_url);
        let history_24h = match self
            .client
            .get_json(NET_WORTH_UPSTREAM, &history_url, &query)
            .await
        {
            Ok(body) => serde_json::from_value(
                body.get("points").cloned().unwrap_or(JsonValue::Array(vec![])),
            )
            .unwrap_or_default(),
            Err(e) => {
                log::warn!("net_worth.history_unavailable address={} err={}", address, e);
                Vec::new()
            }
        };

        Ok(NetWorth {
            address: address.to_string(),
            chain_id,
            total_usd,
            history_24h,
        })
    }
}

// ---- Orderbook / pricing microservice ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookQuote {
    pub base_symbol: String,
    pub quote_symbol: String,
    pub chain_id: u64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid: Option<f64>,
    pub ts: u64,
}

#[derive(Clone)]
pub struct OrderbookClient {
    base_url: String,
    client: UpstreamClient,
}

pub const ORDERBOOK_UPSTREAM: &str = "orderbook service";

impl OrderbookClient {
    pub fn new(settings: &Settings, client: UpstreamClient) -> Self {
        Self {
            base_url: settings.orderbook_base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub async fn fetch_quote(
        &self,
        base: &str,
        quote: &str,
        chain_id: u64,
    ) -> Result<OrderbookQuote, UpstreamError> {
        let url = format!("{}/v1/quote", self.base_url);
        let body = self
            .client
            .get_json(
                ORDERBOOK_UPSTREAM,
                &url,
                &[
                    ("base", base.to_string()),
                    ("quote", quote.to_string()),
                    ("chain_id", chain_id.to_string()),
                ],
            )
            .await?;
        serde_json::from_value(body).map_err(|e| UpstreamError::Network {
            upstream: ORDERBOOK_UPSTREAM,
            message: format!("unexpected quote shape: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles() {
        let base = Duration::from_millis(250);
        assert_eq!(retry_delay(base, 0), Duration::from_millis(250));
        assert_eq!(retry_delay(base, 1), Duration::from_millis(500));
        assert_eq!(retry_delay(base, 2), Duration::from_millis(1000));
    }

    #[test]
    fn candle_wire_shape() {
        let body = serde_json::json!({
            "candles": [
                { "ts": 1_700_000_000u64, "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5, "volume": 100.0 }
            ]
        });
        let candles: Vec<Candle> =
            serde_json::from_value(body.get("candles").cloned().unwrap()).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 1.5);
    }
}
