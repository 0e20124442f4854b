use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_ROUTING_URL: &str =
    "https://routing.openstreetmap.de/routed-car/route/v1/driving/";

/// Run configuration. Every field has a default, so an empty TOML file is valid.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Radius of the disk drawn around each address, in planar units (meters)
    pub buffer_m: f64,
    /// Distance at or below which a route qualifies, in meters
    pub threshold_m: f64,
    /// Emit a progress record every N pairs
    pub log_every: usize,
    pub routing: RoutingConfig,
    pub measure: MeasureConfig,
    pub fields: FieldConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RoutingConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Skip TLS certificate verification for the routing service
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(default)]
pub struct MeasureConfig {
    pub metric: SegmentMetric,
    pub mode: ThresholdMode,
}

/// How a route segment between two lon/lat vertices is measured
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMetric {
    /// Planar length after projecting both vertices to EPSG:3857
    #[default]
    WebMercator,
    /// Great-circle length
    Haversine,
}

/// What gets compared against the threshold while walking a route
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Any single segment at or below the threshold qualifies the pair
    #[default]
    Segment,
    /// The running total of segment lengths must stay at or below the threshold
    Cumulative,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FieldConfig {
    /// Address identifier attribute
    pub address_key: String,
    /// Gate category attribute
    pub gate_category: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    /// Appended to the dataset and layer names of the output
    pub suffix: String,
    pub qualified_column: String,
    pub distance_column: String,
    /// Pair-level dump, relative to the base directory
    pub pairs_csv: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_m: 300.0,
            threshold_m: 300.0,
            log_every: 1000,
            routing: RoutingConfig::default(),
            measure: MeasureConfig::default(),
            fields: FieldConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ROUTING_URL.to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            backoff_ms: 2000,
            accept_invalid_certs: false,
            user_agent: concat!("gatereach/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            address_key: "CIVKEY".to_string(),
            gate_category: "TIPO_GATE".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            suffix: "300".to_string(),
            qualified_column: "is_300".to_string(),
            distance_column: "distanza_m".to_string(),
            pairs_csv: PathBuf::from("gdf_gate_civici.csv"),
        }
    }
}

impl RoutingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.buffer_m.is_finite() && self.buffer_m > 0.0) {
            bail!("buffer_m must be a positive distance, got {}", self.buffer_m);
        }
        if !(self.threshold_m.is_finite() && self.threshold_m > 0.0) {
            bail!(
                "threshold_m must be a positive distance, got {}",
                self.threshold_m
            );
        }
        if self.routing.max_attempts == 0 {
            bail!("routing.max_attempts must be at least 1");
        }
        Url::parse(&self.routing.base_url)
            .with_context(|| format!("Invalid routing.base_url '{}'", self.routing.base_url))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.buffer_m, 300.0);
        assert_eq!(config.threshold_m, 300.0);
        assert_eq!(config.routing.max_attempts, 3);
        assert_eq!(config.routing.backoff(), Duration::from_secs(2));
        assert_eq!(config.routing.timeout(), Duration::from_secs(30));
        assert_eq!(config.measure.mode, ThresholdMode::Segment);
        assert_eq!(config.fields.address_key, "CIVKEY");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            r#"
            threshold_m = 150.0

            [routing]
            base_url = "http://localhost:5000/route/v1/driving/"
            max_attempts = 5

            [measure]
            metric = "haversine"
            mode = "cumulative"
        "#,
        )
        .unwrap();
        assert_eq!(config.threshold_m, 150.0);
        assert_eq!(config.buffer_m, 300.0);
        assert_eq!(config.routing.max_attempts, 5);
        assert_eq!(config.routing.timeout_secs, 30);
        assert_eq!(config.measure.metric, SegmentMetric::Haversine);
        assert_eq!(config.measure.mode, ThresholdMode::Cumulative);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.buffer_m = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.routing.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.routing.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatereach.toml");
        fs::write(&path, "buffer_m = 250.0\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.buffer_m, 250.0);
    }
}
