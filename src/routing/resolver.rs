//! Per-pair route resolution with retries and the one-pair lookback skip.

use std::time::Duration;

use geo::Coord;
use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use super::{classify_route, RouteError, RouteProvider};
use crate::config::{Config, MeasureConfig};
use crate::models::{CandidatePair, PairOutcome, PairResult};

/// Counts of terminal states over one resolution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub within: usize,
    pub not_within: usize,
    pub no_route: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ResolveStats {
    pub fn record(&mut self, outcome: &PairOutcome) {
        match outcome {
            PairOutcome::Within { .. } => self.within += 1,
            PairOutcome::NotWithin => self.not_within += 1,
            PairOutcome::NoRoute => self.no_route += 1,
            PairOutcome::Failed { .. } => self.failed += 1,
            PairOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.within + self.not_within + self.no_route + self.failed + self.skipped
    }
}

/// State carried from one pair to the next.
///
/// Only the immediately preceding evaluated pair is remembered, so an address
/// that qualified against an earlier, non-adjacent gate is evaluated again.
#[derive(Debug, Clone, Copy, Default)]
struct Lookback {
    address_row: Option<usize>,
    qualified: bool,
}

impl Lookback {
    fn skips(&self, pair: &CandidatePair) -> bool {
        self.qualified && self.address_row == Some(pair.address_row)
    }

    fn advance(self, pair: &CandidatePair, outcome: &PairOutcome) -> Self {
        match outcome {
            // A skipped pair leaves the verdict of the pair before it in place
            PairOutcome::Skipped => self,
            other => Self {
                address_row: Some(pair.address_row),
                qualified: other.is_within(),
            },
        }
    }
}

/// Resolves candidate pairs one by one against a [`RouteProvider`]
pub struct RouteResolver<'a, P> {
    provider: &'a P,
    threshold_m: f64,
    measure: MeasureConfig,
    max_attempts: u32,
    backoff: Duration,
    log_every: usize,
}

impl<'a, P: RouteProvider> RouteResolver<'a, P> {
    pub fn new(provider: &'a P, config: &Config) -> Self {
        Self {
            provider,
            threshold_m: config.threshold_m,
            measure: config.measure,
            max_attempts: config.routing.max_attempts.max(1),
            backoff: config.routing.backoff(),
            log_every: config.log_every.max(1),
        }
    }

    /// Resolve every pair in order. One result per pair, in input order.
    pub async fn resolve_all(
        &self,
        pairs: Vec<CandidatePair>,
        progress: &ProgressBar,
    ) -> (Vec<PairResult>, ResolveStats) {
        let total = pairs.len();
        info!("Resolving route distances for {} pairs...", total);

        let mut results = Vec::with_capacity(total);
        let mut stats = ResolveStats::default();
        let mut lookback = Lookback::default();

        for (i, pair) in pairs.into_iter().enumerate() {
            if i % self.log_every == 0 {
                info!(
                    "Processing pairs {} to {}...",
                    i,
                    (i + self.log_every).min(total)
                );
            }

            let outcome = if lookback.skips(&pair) {
                debug!(
                    "Skipping address '{}' / gate {}: previous pair already qualified",
                    pair.address_key, pair.gate_fid
                );
                PairOutcome::Skipped
            } else {
                self.resolve_pair(&pair).await
            };

            lookback = lookback.advance(&pair, &outcome);
            stats.record(&outcome);
            results.push(PairResult { pair, outcome });
            progress.inc(1);
        }

        progress.finish_and_clear();
        info!(
            "Resolved {} pairs: {} within, {} not within, {} no route, {} failed, {} skipped",
            stats.total(),
            stats.within,
            stats.not_within,
            stats.no_route,
            stats.failed,
            stats.skipped
        );

        (results, stats)
    }

    /// Resolve a single pair. Never fails: every error becomes an outcome.
    pub async fn resolve_pair(&self, pair: &CandidatePair) -> PairOutcome {
        debug!(
            "Processing pair: address '{}' - gate {}",
            pair.address_key, pair.gate_fid
        );

        let route = match self.fetch_with_retry(pair.origin, pair.destination).await {
            Ok(Some(route)) => route,
            Ok(None) => {
                warn!(
                    "No route found for address '{}' - gate {}",
                    pair.address_key, pair.gate_fid
                );
                return PairOutcome::NoRoute;
            }
            Err(e) => {
                warn!(
                    "Routing failed for address '{}' - gate {}: {}",
                    pair.address_key, pair.gate_fid, e
                );
                return PairOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        match classify_route(&route, self.threshold_m, self.measure) {
            Ok(Some(distance_m)) => PairOutcome::Within { distance_m },
            Ok(None) => PairOutcome::NotWithin,
            Err(e) => {
                warn!(
                    "Distance computation failed for address '{}' - gate {}: {}",
                    pair.address_key, pair.gate_fid, e
                );
                PairOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Call the provider up to `max_attempts` times with a fixed pause between attempts
    async fn fetch_with_retry(
        &self,
        origin: Coord<f64>,
        destination: Coord<f64>,
    ) -> Result<Option<Vec<Coord<f64>>>, RouteError> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.provider.route(origin, destination).await {
                Ok(route) => return Ok(route),
                Err(e) if e.is_retryable() && attempts < self.max_attempts => {
                    warn!(
                        "Routing request failed (attempt {}/{}): {}",
                        attempts, self.max_attempts, e
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::web_merc_to_lat_lng;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Reply = Result<Option<Vec<Coord<f64>>>, RouteError>;

    /// Replays canned replies in order, then answers with `fallback`
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Reply>>,
        fallback: fn() -> Reply,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Reply>, fallback: fn() -> Reply) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RouteProvider for ScriptedProvider {
        async fn route(&self, _origin: Coord<f64>, _destination: Coord<f64>) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(self.fallback)
        }
    }

    fn route_at(xs: &[f64]) -> Vec<Coord<f64>> {
        xs.iter()
            .map(|x| {
                let (lon, lat) = web_merc_to_lat_lng(*x, 0.0);
                Coord { x: lon, y: lat }
            })
            .collect()
    }

    fn short_route() -> Reply {
        Ok(Some(route_at(&[0.0, 500.0, 700.0, 750.0])))
    }

    fn long_route() -> Reply {
        Ok(Some(route_at(&[0.0, 1000.0, 2000.0])))
    }

    fn unavailable() -> Reply {
        Err(RouteError::Status(StatusCode::SERVICE_UNAVAILABLE))
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.routing.backoff_ms = 1;
        config
    }

    fn pair(gate_fid: usize, address_row: usize) -> CandidatePair {
        CandidatePair {
            gate_fid,
            gate_category: String::new(),
            address_row,
            address_key: format!("CIV{}", address_row),
            origin: Coord { x: 0.0, y: 0.0 },
            destination: Coord { x: 0.001, y: 0.0 },
        }
    }

    #[tokio::test]
    async fn test_within_records_segment_distance() {
        let provider = ScriptedProvider::new(vec![], short_route);
        let config = test_config();
        let resolver = RouteResolver::new(&provider, &config);

        let outcome = resolver.resolve_pair(&pair(0, 0)).await;
        let d = outcome.distance_m().unwrap();
        assert!((d - 200.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_two_failures_then_success() {
        let provider = ScriptedProvider::new(vec![unavailable(), unavailable()], short_route);
        let config = test_config();
        let resolver = RouteResolver::new(&provider, &config);

        let outcome = resolver.resolve_pair(&pair(0, 0)).await;
        assert!(outcome.is_within());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let provider = ScriptedProvider::new(vec![], unavailable);
        let config = test_config();
        let resolver = RouteResolver::new(&provider, &config);

        let outcome = resolver.resolve_pair(&pair(0, 0)).await;
        assert!(matches!(outcome, PairOutcome::Failed { .. }));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_no_route_is_not_retried() {
        let provider = ScriptedProvider::new(vec![], || Ok(None));
        let config = test_config();
        let resolver = RouteResolver::new(&provider, &config);

        assert_eq!(resolver.resolve_pair(&pair(0, 0)).await, PairOutcome::NoRoute);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_osrm_no_route_reply_is_not_retried() {
        use crate::routing::OsrmClient;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"code": "NoRoute"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut config = test_config();
        config.routing.base_url = format!("{}/route/v1/driving", server.uri());
        let client = OsrmClient::new(&config.routing).unwrap();
        let resolver = RouteResolver::new(&client, &config);

        assert_eq!(resolver.resolve_pair(&pair(0, 0)).await, PairOutcome::NoRoute);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_geometry_error_is_not_retried() {
        let provider = ScriptedProvider::new(
            vec![Err(RouteError::Geometry("bad vertex".into()))],
            short_route,
        );
        let config = test_config();
        let resolver = RouteResolver::new(&provider, &config);

        assert!(matches!(
            resolver.resolve_pair(&pair(0, 0)).await,
            PairOutcome::Failed { .. }
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_consecutive_pair_for_qualified_address_is_skipped() {
        let provider = ScriptedProvider::new(vec![], short_route);
        let config = test_config();
        let resolver = RouteResolver::new(&provider, &config);

        let pairs = vec![pair(0, 7), pair(1, 7), pair(2, 7), pair(3, 8)];
        let (results, stats) = resolver.resolve_all(pairs, &ProgressBar::hidden()).await;

        let labels: Vec<&str> = results.iter().map(|r| r.outcome.label()).collect();
        assert_eq!(labels, vec!["within", "skipped", "skipped", "within"]);
        assert_eq!(provider.calls(), 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.total(), 4);
    }

    #[tokio::test]
    async fn test_shared_key_on_different_rows_is_not_skipped() {
        let provider = ScriptedProvider::new(vec![], short_route);
        let config = test_config();
        let resolver = RouteResolver::new(&provider, &config);

        let mut first = pair(0, 1);
        let mut second = pair(1, 2);
        first.address_key = "DUP".into();
        second.address_key = "DUP".into();
        let (results, _) = resolver
            .resolve_all(vec![first, second], &ProgressBar::hidden())
            .await;

        let labels: Vec<&str> = results.iter().map(|r| r.outcome.label()).collect();
        assert_eq!(labels, vec!["within", "within"]);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_lookback_is_one_pair_only() {
        let provider = ScriptedProvider::new(vec![short_route(), long_route()], short_route);
        let config = test_config();
        let resolver = RouteResolver::new(&provider, &config);

        // Address 1 qualifies, address 2 intervenes, address 1 comes back
        let pairs = vec![pair(0, 1), pair(0, 2), pair(1, 1)];
        let (results, _) = resolver.resolve_all(pairs, &ProgressBar::hidden()).await;

        let labels: Vec<&str> = results.iter().map(|r| r.outcome.label()).collect();
        assert_eq!(labels, vec!["within", "not_within", "within"]);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_pair_does_not_abort_batch() {
        let provider = ScriptedProvider::new(
            vec![unavailable(), unavailable(), unavailable()],
            long_route,
        );
        let config = test_config();
        let resolver = RouteResolver::new(&provider, &config);

        let (results, stats) = resolver
            .resolve_all(vec![pair(0, 0), pair(1, 1)], &ProgressBar::hidden())
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.not_within, 1);
    }
}
