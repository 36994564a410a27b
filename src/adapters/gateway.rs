//! HTTP clients for the research gateway.
//!
//! The gateway is a separate service that drives the actual marketplace
//! sessions (browser navigation, HTML extraction, login state) and exposes
//! the results as JSON. These clients only do transport, status mapping and
//! lenient decoding; normalization lives in the collector.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{CrossMarketSearch, ImageFetcher, ListingSource, RawDetail, RawSummary};
use crate::config::GatewayConfig;
use crate::error::{ResearchError, Result};
use crate::models::CandidateListing;

const USER_AGENT: &str = "SourceScout/0.1";

/// Marker string the gateway injects when the upstream served a bot check
/// instead of a result page.
const AUTOMATION_MARKER: &str = "automation_challenge";

#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::USER_AGENT, USER_AGENT.parse()?);
        if let Some(key) = &config.api_key {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", key)
                    .parse()
                    .context("invalid gateway api key")?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()
            .context("failed to build gateway HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a GET and map the status line onto the error taxonomy.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| ResearchError::Transport(format!("GET {} failed: {}", path, e)))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(ResearchError::NotFound);
        }
        if status.as_u16() == 429 {
            return Err(ResearchError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 403 && body.contains(AUTOMATION_MARKER) {
                return Err(ResearchError::AutomationDetected);
            }
            return Err(ResearchError::Transport(format!(
                "GET {} returned {}: {}",
                path, status, body
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ResearchError::Transport(format!("GET {} body read failed: {}", path, e)))?;
        debug!(path, body_len = body.len(), "gateway response received");

        serde_json::from_str(&body).map_err(|e| {
            warn!(
                path,
                error = %e,
                body_preview = %body.chars().take(300).collect::<String>(),
                "gateway JSON parse failed"
            );
            ResearchError::Validation(format!("GET {} parse failed: {}", path, e))
        })
    }
}

#[async_trait]
impl ListingSource for GatewayClient {
    async fn search(&self, query: &str, page: u32) -> Result<Vec<RawSummary>> {
        let resp: SearchResponse = self
            .get_json(
                "/listings/search",
                &[("q", query.to_string()), ("page", page.to_string())],
            )
            .await?;
        Ok(resp.results)
    }

    async fn detail(&self, id: &str) -> Result<RawDetail> {
        let wire: WireDetail = self
            .get_json("/listings/detail", &[("id", id.to_string())])
            .await?;
        Ok(wire.into_raw(id))
    }
}

#[async_trait]
impl CrossMarketSearch for GatewayClient {
    async fn search_by_image(
        &self,
        image_url: &str,
        max_results: usize,
    ) -> Result<Vec<CandidateListing>> {
        let resp: ImageSearchResponse = self
            .get_json(
                "/crossmarket/image-search",
                &[
                    ("image_url", image_url.to_string()),
                    ("limit", max_results.to_string()),
                ],
            )
            .await?;
        let candidates = resp
            .results
            .into_iter()
            .take(max_results)
            .filter_map(WireCandidate::into_candidate)
            .collect();
        Ok(candidates)
    }
}

#[async_trait]
impl ImageFetcher for GatewayClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResearchError::Transport(format!("image fetch failed: {}", e)))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(ResearchError::NotFound);
        }
        if status.as_u16() == 429 {
            return Err(ResearchError::RateLimited);
        }
        if !status.is_success() {
            return Err(ResearchError::Transport(format!(
                "image fetch returned {}",
                status
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ResearchError::Transport(format!("image body read failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawSummary>,
}

/// Detail record as the gateway emits it. Marketplace extractors are sloppy
/// about numeric types, so price/rank/reviews accept numbers or strings.
#[derive(Debug, Deserialize)]
struct WireDetail {
    #[serde(default)]
    title: String,
    #[serde(deserialize_with = "de_lenient_i64")]
    price: i64,
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    category: String,
    #[serde(default, deserialize_with = "de_lenient_i64_opt")]
    rank: Option<i64>,
    #[serde(default, deserialize_with = "de_lenient_i64")]
    review_count: i64,
    #[serde(default)]
    platform_fulfilled: bool,
    #[serde(default)]
    url: String,
}

impl WireDetail {
    fn into_raw(self, id: &str) -> RawDetail {
        RawDetail {
            id: id.to_string(),
            title: self.title,
            price: self.price,
            image_url: self.image_url,
            category: self.category,
            rank: self.rank,
            review_count: self.review_count,
            platform_fulfilled: self.platform_fulfilled,
            url: self.url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageSearchResponse {
    #[serde(default)]
    results: Vec<WireCandidate>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    #[serde(default, deserialize_with = "de_lenient_f64_opt")]
    price_cny: Option<f64>,
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    shop_name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_i64_opt")]
    min_order: Option<i64>,
}

impl WireCandidate {
    /// Candidates without a usable price or image cannot be matched or
    /// costed; drop them here rather than carrying dead weight downstream.
    fn into_candidate(self) -> Option<CandidateListing> {
        let price_cny = self.price_cny.filter(|p| *p > 0.0)?;
        if self.image_url.is_empty() {
            return None;
        }
        Some(CandidateListing {
            price_cny,
            image_url: self.image_url,
            url: self.url,
            shop_name: self.shop_name,
            min_order: self.min_order.and_then(|m| u32::try_from(m).ok()),
        })
    }
}

fn de_lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(de_lenient_i64_opt(deserializer)?.unwrap_or(0))
}

fn de_lenient_i64_opt<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))),
        Value::String(s) => {
            // Extractors sometimes leave thousands separators in.
            let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
            if cleaned.is_empty() {
                Ok(None)
            } else {
                Ok(cleaned.parse::<i64>().ok().or(Some(i64::MIN)))
            }
        }
        _ => Ok(None),
    }
}

fn de_lenient_f64_opt<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => {
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(s.trim().parse::<f64>().ok())
            }
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_detail_accepts_string_numbers() {
        let json = r#"{
            "title": "Silicone Sink Mat",
            "price": "1,980",
            "image_url": "https://img.example/a.jpg",
            "category": "home_kitchen",
            "rank": "12000",
            "review_count": 7,
            "platform_fulfilled": true,
            "url": "https://market.example/dp/A1"
        }"#;
        let wire: WireDetail = serde_json::from_str(json).unwrap();
        let raw = wire.into_raw("A1");
        assert_eq!(raw.price, 1980);
        assert_eq!(raw.rank, Some(12000));
        assert_eq!(raw.review_count, 7);
        assert!(raw.platform_fulfilled);
    }

    #[test]
    fn test_wire_detail_unparseable_price_is_sentinel() {
        let json = r#"{ "title": "x", "price": "n/a", "review_count": 0 }"#;
        let wire: WireDetail = serde_json::from_str(json).unwrap();
        // Sentinel stays negative so collector validation rejects it.
        assert!(wire.price < 0);
    }

    #[test]
    fn test_candidate_without_price_is_dropped() {
        let json = r#"{ "image_url": "https://img.example/c.jpg", "url": "u" }"#;
        let wire: WireCandidate = serde_json::from_str(json).unwrap();
        assert!(wire.into_candidate().is_none());
    }

    #[test]
    fn test_candidate_string_price_parses() {
        let json = r#"{
            "price_cny": "12.80",
            "image_url": "https://img.example/c.jpg",
            "url": "https://target.example/offer/9",
            "min_order": "2"
        }"#;
        let wire: WireCandidate = serde_json::from_str(json).unwrap();
        let c = wire.into_candidate().unwrap();
        assert!((c.price_cny - 12.80).abs() < f64::EPSILON);
        assert_eq!(c.min_order, Some(2));
    }
}
