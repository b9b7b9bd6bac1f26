//! HTTP client for the dashboard's time-series query service.
//!
//! The service reports interconnection flows import-positive (the grid
//! operator's convention); this client flips them so that `FlowEntry`
//! carries exports as positive megawatts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use common::config::DataServiceConfig;
use common::{
    DataService, Error, FlowEntry, FuelType, GeneratorEntry, PriceEntry, PriceMarket,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::rate_limit::RequestBudget;

const FLOWS_AT_PATH: &str = "/api/interties/flows";
const FLOWS_LATEST_PATH: &str = "/api/interties/flows/latest";
const PRICES_AT_PATH: &str = "/api/prices/zonal";
const GENERATORS_AT_PATH: &str = "/api/generators/output";

/// Data service client with connection pooling and a shared request budget.
#[derive(Debug, Clone)]
pub struct GridDataClient {
    client: reqwest::Client,
    base_url: String,
    budget: RequestBudget,
}

// ── Wire types ────────────────────────────────────────────────────────

/// Response body of both flow endpoints.
#[derive(Debug, Deserialize)]
pub struct FlowsResponse {
    #[serde(default)]
    pub flows: Vec<FlowRow>,
}

#[derive(Debug, Deserialize)]
pub struct FlowRow {
    pub intertie: String,
    /// Import-positive net flow.
    #[serde(default)]
    pub actual_mw: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PricesResponse {
    #[serde(default)]
    pub prices: Vec<PriceRow>,
}

#[derive(Debug, Deserialize)]
pub struct PriceRow {
    pub zone: String,
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub market: PriceMarket,
}

#[derive(Debug, Deserialize)]
pub struct GeneratorsResponse {
    #[serde(default)]
    pub generators: Vec<GeneratorRow>,
}

#[derive(Debug, Deserialize)]
pub struct GeneratorRow {
    pub generator: String,
    #[serde(default)]
    pub fuel_type: Option<String>,
    pub output_mw: Option<f64>,
    pub capability_mw: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl FlowRow {
    fn into_entry(self) -> FlowEntry {
        FlowEntry {
            group_key: self.intertie.trim().to_ascii_uppercase(),
            megawatts: -self.actual_mw,
            observed_at: self.timestamp,
        }
    }
}

impl PriceRow {
    /// Rows without a price (service gaps) are dropped.
    fn into_entry(self) -> Option<PriceEntry> {
        Some(PriceEntry {
            zone: self.zone.trim().to_ascii_uppercase(),
            price: self.price?,
            observed_at: self.timestamp,
            market: self.market,
        })
    }
}

impl GeneratorRow {
    /// Rows reporting neither output nor capability are dropped.
    fn into_entry(self) -> Option<GeneratorEntry> {
        if self.output_mw.is_none() && self.capability_mw.is_none() {
            return None;
        }
        Some(GeneratorEntry {
            generator: self.generator.trim().to_string(),
            fuel_type: self
                .fuel_type
                .as_deref()
                .map_or(FuelType::Other, FuelType::parse),
            output_mw: self.output_mw.unwrap_or(0.0),
            capability_mw: self.capability_mw.unwrap_or(0.0),
            observed_at: self.timestamp,
        })
    }
}

// ── Implementation ────────────────────────────────────────────────────

impl GridDataClient {
    pub fn new(config: &DataServiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("grid-overlay/0.1")
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build data service HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            budget: RequestBudget::per_second(config.max_requests_per_sec),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = format!("{}{}", self.base_url, path);
        self.budget.acquire().await;

        debug!("GET {} {:?}", url, query);

        let resp = self
            .client
            .get(&url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Http(format!("{}: {}", url, e)))?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(1000, |secs| secs * 1000);
            return Err(Error::RateLimited { retry_after_ms });
        }
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::DataService {
                status,
                message: body.chars().take(500).collect(),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::Http(format!("{}: {}", url, e)))?;
        Ok(serde_json::from_str(&body)?)
    }

    fn at_param(at: DateTime<Utc>) -> (&'static str, String) {
        ("at", at.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

#[async_trait]
impl DataService for GridDataClient {
    async fn fetch_flow_at_time(&self, at: DateTime<Utc>) -> Result<Vec<FlowEntry>, Error> {
        let resp: FlowsResponse = self.get_json(FLOWS_AT_PATH, &[Self::at_param(at)]).await?;
        debug!("Got {} flow rows for {}", resp.flows.len(), at);
        Ok(flow_entries(resp))
    }

    async fn fetch_flow_now(&self) -> Result<Vec<FlowEntry>, Error> {
        let resp: FlowsResponse = self.get_json(FLOWS_LATEST_PATH, &[]).await?;
        debug!("Got {} latest flow rows", resp.flows.len());
        Ok(flow_entries(resp))
    }

    async fn fetch_prices_at_time(&self, at: DateTime<Utc>) -> Result<Vec<PriceEntry>, Error> {
        let resp: PricesResponse = self.get_json(PRICES_AT_PATH, &[Self::at_param(at)]).await?;
        debug!("Got {} price rows for {}", resp.prices.len(), at);
        Ok(price_entries(resp))
    }

    async fn fetch_generators_at_time(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<GeneratorEntry>, Error> {
        let resp: GeneratorsResponse =
            self.get_json(GENERATORS_AT_PATH, &[Self::at_param(at)]).await?;
        debug!("Got {} generator rows for {}", resp.generators.len(), at);
        Ok(generator_entries(resp))
    }
}

fn flow_entries(resp: FlowsResponse) -> Vec<FlowEntry> {
    resp.flows.into_iter().map(FlowRow::into_entry).collect()
}

fn price_entries(resp: PricesResponse) -> Vec<PriceEntry> {
    resp.prices.into_iter().filter_map(PriceRow::into_entry).collect()
}

fn generator_entries(resp: GeneratorsResponse) -> Vec<GeneratorEntry> {
    resp.generators
        .into_iter()
        .filter_map(GeneratorRow::into_entry)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flows_flip_to_export_positive() {
        let parsed: FlowsResponse = serde_json::from_str(
            r#"{
                "flows": [
                    {"intertie": "Quebec", "actual_mw": -812.5, "timestamp": "2026-03-01T14:00:00Z"},
                    {"intertie": "MICHIGAN", "actual_mw": 340.0, "timestamp": "2026-03-01T14:00:00Z"}
                ]
            }"#,
        )
        .expect("flows should deserialize");

        let entries = flow_entries(parsed);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].group_key, "QUEBEC");
        assert!(
            (entries[0].megawatts - 812.5).abs() < 1e-9,
            "import-negative becomes export-positive"
        );
        assert!((entries[1].megawatts + 340.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_rows_without_price_are_dropped() {
        let parsed: PricesResponse = serde_json::from_str(
            r#"{
                "prices": [
                    {"zone": "toronto", "price": 38.2, "timestamp": "2026-03-01T14:05:00Z", "market": "rt"},
                    {"zone": "OTTAWA", "price": null, "timestamp": "2026-03-01T14:05:00Z", "market": "rt"},
                    {"zone": "EAST", "price": 41.0, "timestamp": "2026-03-01T14:00:00Z", "market": "da"}
                ]
            }"#,
        )
        .expect("prices should deserialize");

        let entries = price_entries(parsed);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].zone, "TORONTO");
        assert_eq!(entries[1].market, PriceMarket::DayAhead);
    }

    #[test]
    fn test_generator_rows() {
        let parsed: GeneratorsResponse = serde_json::from_str(
            r#"{
                "generators": [
                    {"generator": "BRUCEA-G1", "fuel_type": "NUCLEAR", "output_mw": 790.0,
                     "capability_mw": 800.0, "timestamp": "2026-03-01T14:00:00Z"},
                    {"generator": "PORTLANDS-G1", "output_mw": 120.0, "capability_mw": null,
                     "timestamp": "2026-03-01T14:00:00Z"},
                    {"generator": "GONE-G9", "fuel_type": "GAS", "output_mw": null,
                     "capability_mw": null, "timestamp": "2026-03-01T14:00:00Z"}
                ]
            }"#,
        )
        .expect("generators should deserialize");

        let entries = generator_entries(parsed);
        assert_eq!(entries.len(), 2, "rows without any reading are dropped");
        assert_eq!(entries[0].fuel_type, FuelType::Nuclear);
        assert_eq!(entries[1].fuel_type, FuelType::Other);
        assert_eq!(entries[1].capability_mw, 0.0);
        assert_eq!(entries[1].utilization(), None);
    }

    #[test]
    fn test_empty_body_defaults() {
        let parsed: FlowsResponse = serde_json::from_str("{}").expect("empty object is valid");
        assert!(parsed.flows.is_empty());
    }

    #[test]
    fn test_at_param_is_utc_seconds() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T09:30:00-05:00")
            .expect("valid instant")
            .with_timezone(&Utc);
        let (name, value) = GridDataClient::at_param(at);
        assert_eq!(name, "at");
        assert_eq!(value, "2026-03-01T14:30:00Z");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let cfg = DataServiceConfig {
            base_url: "http://grid.local:8080/".into(),
            ..DataServiceConfig::default()
        };
        let client = GridDataClient::new(&cfg);
        assert_eq!(client.base_url, "http://grid.local:8080");
    }
}
