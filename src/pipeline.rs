//! One full pass: read, normalize, buffer, join, route, aggregate, write.

use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::aggregate::aggregate;
use crate::config::Config;
use crate::dataset::{
    dataset_path, load_addresses, load_gates, read_layer, report_duplicates, suffixed,
    write_pair_dump, write_results,
};
use crate::models::AddressResult;
use crate::routing::{ResolveStats, RouteProvider, RouteResolver};
use crate::spatial::{apply_buffer, candidate_join, into_candidate_pairs, normalize};

/// What to process and where
#[derive(Debug, Clone)]
pub struct Job {
    /// Directory holding the datasets, and receiving the outputs
    pub base_dir: PathBuf,
    pub address_dataset: String,
    pub gate_dataset: String,
    pub address_layer: String,
    pub gate_layer: String,
    pub show_progress: bool,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub addresses: usize,
    pub gates: usize,
    pub pairs: usize,
    pub qualified: usize,
    pub stats: ResolveStats,
    pub output_dataset: PathBuf,
    pub output_layer: String,
    pub pair_dump: PathBuf,
    pub results: Vec<AddressResult>,
}

fn progress_bar(len: usize, visible: bool) -> Result<ProgressBar> {
    if !visible {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pairs ({per_sec})",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Run the whole pipeline once. Pair-scoped failures are absorbed; anything
/// returned as an error is fatal for the run.
pub async fn run<P: RouteProvider>(config: &Config, job: &Job, provider: &P) -> Result<RunSummary> {
    config.validate()?;

    // Inputs
    let address_path = dataset_path(&job.base_dir, &job.address_dataset);
    let gate_path = dataset_path(&job.base_dir, &job.gate_dataset);

    let addresses = load_addresses(
        read_layer(&address_path, &job.address_layer).await?,
        &config.fields.address_key,
    )
    .context("Failed to load addresses")?;
    let mut gates = load_gates(
        read_layer(&gate_path, &job.gate_layer).await?,
        &config.fields.gate_category,
    );
    info!(
        "Loaded {} addresses ({} without geometry) and {} gates ({} without geometry)",
        addresses.len(),
        addresses.missing_positions(),
        gates.len(),
        gates.missing_positions()
    );

    // Identifier checks are warnings only
    report_duplicates(
        &config.fields.address_key,
        addresses.features.iter().map(|a| a.key.as_str()),
    );
    // Gate fids are assigned from row positions, so this only confirms uniqueness
    let fids: Vec<String> = gates.features.iter().map(|g| g.fid.to_string()).collect();
    report_duplicates("fid", fids.iter().map(String::as_str));

    // 1. Geometry normalizer
    normalize(&addresses, &mut gates)?;

    // 2. Buffer generator, 3. candidate join
    let buffers = apply_buffer(&addresses, config.buffer_m);
    let hits = candidate_join(&gates, buffers);
    let pairs = into_candidate_pairs(&hits, addresses.crs);
    let pair_count = pairs.len();

    // 4. Route distance resolver
    let progress = progress_bar(pair_count, job.show_progress)?;
    let resolver = RouteResolver::new(provider, config);
    let (pair_results, stats) = resolver.resolve_all(pairs, &progress).await;

    let pair_dump = job.base_dir.join(&config.output.pairs_csv);
    write_pair_dump(&pair_dump, &pair_results)?;

    // 5. Aggregator
    let results = aggregate(&addresses.features, &pair_results);

    let output_dataset = dataset_path(
        &job.base_dir,
        &suffixed(&job.address_dataset, &config.output.suffix),
    );
    let output_layer = suffixed(&job.address_layer, &config.output.suffix);
    write_results(
        &output_dataset,
        &output_layer,
        &addresses,
        &results,
        &config.output,
    )
    .await?;

    let summary = RunSummary {
        addresses: addresses.len(),
        gates: gates.len(),
        pairs: pair_count,
        qualified: results.iter().filter(|r| r.qualified).count(),
        stats,
        output_dataset,
        output_layer,
        pair_dump,
        results,
    };

    info!(
        "Run complete: {} addresses, {} gates, {} candidate pairs, {} qualified",
        summary.addresses, summary.gates, summary.pairs, summary.qualified
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::{web_merc_to_lat_lng, Crs};
    use crate::dataset::{write_layer, RawFeature, RawLayer};
    use crate::routing::RouteError;
    use geo::Coord;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Straight line from origin to destination, with a long detour for
    /// destinations east of `detour_east_of` (lon)
    struct StraightLineProvider {
        detour_east_of: f64,
        calls: AtomicUsize,
    }

    impl RouteProvider for StraightLineProvider {
        async fn route(
            &self,
            origin: Coord<f64>,
            destination: Coord<f64>,
        ) -> Result<Option<Vec<Coord<f64>>>, RouteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if destination.x > self.detour_east_of {
                let far = Coord {
                    x: origin.x,
                    y: origin.y + 0.01,
                };
                Ok(Some(vec![origin, far, destination]))
            } else {
                Ok(Some(vec![origin, destination]))
            }
        }
    }

    fn lon_lat(x: f64) -> (f64, f64) {
        web_merc_to_lat_lng(x, 0.0)
    }

    fn point(position: Option<(f64, f64)>, properties: serde_json::Value) -> RawFeature {
        RawFeature {
            position: position.map(|(x, y)| Coord { x, y }),
            properties: properties.as_object().cloned().unwrap_or_default(),
        }
    }

    /// Addresses in Web Mercator, gates in lon/lat
    async fn fixture(base: &Path) {
        let addresses = RawLayer {
            name: "civici_layer".into(),
            crs: Some(Crs::WebMercator),
            features: vec![
                point(Some((0.0, 0.0)), json!({"CIVKEY": "A"})),
                point(Some((5000.0, 0.0)), json!({"CIVKEY": "B"})),
                point(Some((10000.0, 0.0)), json!({"CIVKEY": "C"})),
                point(Some((20000.0, 0.0)), json!({"CIVKEY": "D"})),
                point(None, json!({"CIVKEY": "E"})),
            ],
        };
        write_layer(&base.join("civici.gpkg"), &addresses)
            .await
            .unwrap();

        let gates = RawLayer {
            name: "gate_layer".into(),
            crs: Some(Crs::Wgs84),
            features: vec![
                point(Some(lon_lat(150.0)), json!({"TIPO_GATE": "carraio"})),
                point(Some(lon_lat(5250.0)), json!({"TIPO_GATE": "pedonale"})),
                point(Some(lon_lat(10200.0)), json!({"TIPO_GATE": "carraio"})),
                point(Some(lon_lat(-50000.0)), json!({"TIPO_GATE": "carraio"})),
            ],
        };
        write_layer(&base.join("gate.gpkg"), &gates).await.unwrap();
    }

    fn job(base: &Path) -> Job {
        Job {
            base_dir: base.to_path_buf(),
            address_dataset: "civici".into(),
            gate_dataset: "gate".into(),
            address_layer: "civici_layer".into(),
            gate_layer: "gate_layer".into(),
            show_progress: false,
        }
    }

    fn provider() -> StraightLineProvider {
        // Detour only towards the gate near address C
        let (lon, _) = web_merc_to_lat_lng(8000.0, 0.0);
        StraightLineProvider {
            detour_east_of: lon,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path()).await;
        let provider = provider();

        let summary = run(&Config::default(), &job(dir.path()), &provider)
            .await
            .unwrap();

        assert_eq!(summary.addresses, 5);
        assert_eq!(summary.gates, 4);
        assert_eq!(summary.pairs, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(summary.stats.within, 2);
        assert_eq!(summary.stats.not_within, 1);
        assert_eq!(summary.qualified, 2);

        let r = &summary.results;
        assert_eq!(r.len(), 5);
        assert!(r[0].qualified);
        assert!((r[0].distance_m.unwrap() - 150.0).abs() < 1e-3);
        assert!(r[1].qualified);
        assert!((r[1].distance_m.unwrap() - 250.0).abs() < 1e-3);
        for unqualified in &r[2..] {
            assert!(!unqualified.qualified);
            assert_eq!(unqualified.distance_m, None);
        }

        assert_eq!(summary.output_dataset, dir.path().join("civici_300.gpkg"));
        assert_eq!(summary.output_layer, "civici_layer_300");
        let written = read_layer(&summary.output_dataset, &summary.output_layer)
            .await
            .unwrap();
        assert_eq!(written.crs, Some(Crs::WebMercator));
        assert_eq!(written.features.len(), 5);
        assert_eq!(written.features[0].properties["is_300"], json!(true));
        assert_eq!(written.features[0].properties["CIVKEY"], json!("A"));
        assert_eq!(written.features[4].properties["is_300"], json!(false));
        assert_eq!(written.features[4].properties["distanza_m"], json!(null));
        assert_eq!(written.features[4].position, None);

        let dump = fs::read_to_string(&summary.pair_dump).unwrap();
        assert_eq!(dump.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_rerun_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path()).await;

        let first = run(&Config::default(), &job(dir.path()), &provider())
            .await
            .unwrap();
        let second = run(&Config::default(), &job(dir.path()), &provider())
            .await
            .unwrap();

        assert_eq!(first.results, second.results);
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&Config::default(), &job(dir.path()), &provider())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read dataset layer"));
    }

    #[tokio::test]
    async fn test_smaller_buffer_drops_pairs() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path()).await;
        let config = Config {
            buffer_m: 200.0,
            ..Config::default()
        };
        let provider = provider();

        let summary = run(&config, &job(dir.path()), &provider).await.unwrap();

        // Only the 150 m gate is still inside a buffer
        assert_eq!(summary.pairs, 1);
        assert_eq!(summary.qualified, 1);
        assert!(summary.results[0].qualified);
    }
}
