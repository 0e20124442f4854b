//! HTTP client for an OSRM-compatible routing service.

use std::future::Future;

use anyhow::{Context, Result};
use geo::Coord;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::RoutingConfig;

/// Failure of a single routing attempt
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("routing request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("routing service answered {0}")]
    Status(StatusCode),
    #[error("malformed routing response: {0}")]
    Decode(String),
    #[error("cannot build routing URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("route cannot be measured: {0}")]
    Geometry(String),
}

impl RouteError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouteError::Transport(_) | RouteError::Status(_) | RouteError::Decode(_)
        )
    }
}

/// Source of driving routes between two (lon, lat) points.
///
/// `Ok(None)` means the service answered but found no route.
pub trait RouteProvider {
    fn route(
        &self,
        origin: Coord<f64>,
        destination: Coord<f64>,
    ) -> impl Future<Output = Result<Option<Vec<Coord<f64>>>, RouteError>>;
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

/// OSRM codes meaning "answered, but nothing connects these points"
const NO_ROUTE_CODES: [&str; 2] = ["NoRoute", "NoSegment"];

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Routing client issuing `GET {base}{lon},{lat};{lon},{lat}?overview=full&geometries=geojson`
pub struct OsrmClient {
    client: Client,
    base_url: Url,
}

impl OsrmClient {
    pub fn new(config: &RoutingConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .with_context(|| format!("Invalid routing base URL '{}'", config.base_url))?;

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Request URL for one origin/destination pair
    pub fn route_url(&self, origin: Coord<f64>, destination: Coord<f64>) -> Result<Url, RouteError> {
        let mut url = self.base_url.join(&format!(
            "{},{};{},{}",
            origin.x, origin.y, destination.x, destination.y
        ))?;
        url.query_pairs_mut()
            .append_pair("overview", "full")
            .append_pair("geometries", "geojson");
        Ok(url)
    }
}

impl RouteProvider for OsrmClient {
    async fn route(
        &self,
        origin: Coord<f64>,
        destination: Coord<f64>,
    ) -> Result<Option<Vec<Coord<f64>>>, RouteError> {
        let url = self.route_url(origin, destination)?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        // OSRM answers unroutable requests with a 4xx and a code in the body
        if !status.is_success() {
            let code = serde_json::from_slice::<OsrmResponse>(&body)
                .ok()
                .and_then(|r| r.code);
            return match code.as_deref() {
                Some(code) if NO_ROUTE_CODES.contains(&code) => {
                    debug!("Routing service answered {} ({})", status, code);
                    Ok(None)
                }
                _ => Err(RouteError::Status(status)),
            };
        }

        let data: OsrmResponse =
            serde_json::from_slice(&body).map_err(|e| RouteError::Decode(e.to_string()))?;

        Ok(data.routes.into_iter().next().map(|route| {
            route
                .geometry
                .coordinates
                .into_iter()
                .map(|[lon, lat]| Coord { x: lon, y: lat })
                .collect()
        }))
    }
}
