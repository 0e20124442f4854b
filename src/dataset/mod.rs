//! Reading and writing the vector datasets and the pair-level dump.
//!
//! A dataset is a GeoPackage `<name>.gpkg` under the base path, holding named
//! feature layers. A layer's reference system is the `gpkg_spatial_ref_sys`
//! entry its geometry column points to.

mod layer;
mod report;

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use tracing::{info, warn};

pub use layer::{
    load_addresses, load_gates, read_layer, write_layer, write_results, RawFeature, RawLayer,
};
pub use report::{write_pair_dump, PairRecord};

const DATASET_EXTENSION: &str = "gpkg";

/// Location of a dataset: `<base>/<name>.gpkg`
pub fn dataset_path(base: &Path, name: &str) -> PathBuf {
    base.join(format!("{}.{}", name, DATASET_EXTENSION))
}

/// Output naming: both the dataset and the layer get `_<suffix>`
pub fn suffixed(name: &str, suffix: &str) -> String {
    format!("{}_{}", name, suffix)
}

/// Log a warning for every identifier used more than once.
///
/// Returns the number of distinct duplicated identifiers.
pub fn report_duplicates<'a>(label: &str, keys: impl IntoIterator<Item = &'a str>) -> usize {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }

    let mut duplicated: Vec<(&str, usize)> = counts.into_iter().filter(|(_, n)| *n > 1).collect();
    duplicated.sort_unstable();

    if duplicated.is_empty() {
        info!("OK: '{}' is unique", label);
    } else {
        warn!(
            "Duplicate values in '{}': {} identifiers used more than once",
            label,
            duplicated.len()
        );
        for (key, n) in &duplicated {
            warn!("  '{}' appears {} times", key, n);
        }
    }

    duplicated.len()
}
