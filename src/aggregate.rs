//! Fold pair results back onto addresses.

use hashbrown::HashMap;
use tracing::{info, warn};

use crate::models::{Address, AddressResult, PairResult};

/// One result per address, in address order.
///
/// An address qualifies when any of its pairs is within threshold; its
/// distance is the one of the first qualifying pair in processing order.
/// Addresses without pairs, or whose pairs all failed, are not qualified.
pub fn aggregate(addresses: &[Address], results: &[PairResult]) -> Vec<AddressResult> {
    let mut first_within: HashMap<usize, f64> = HashMap::new();
    let mut with_pairs: HashMap<usize, usize> = HashMap::new();

    for result in results {
        *with_pairs.entry(result.pair.address_row).or_default() += 1;
        if let Some(distance) = result.outcome.distance_m() {
            first_within
                .entry(result.pair.address_row)
                .or_insert(distance);
        }
    }

    let without_pairs = addresses
        .iter()
        .filter(|a| !with_pairs.contains_key(&a.row))
        .count();
    if without_pairs > 0 {
        warn!(
            "{} of {} addresses have no gate within their buffer",
            without_pairs,
            addresses.len()
        );
    }

    let aggregated: Vec<AddressResult> = addresses
        .iter()
        .map(|address| {
            let distance_m = first_within.get(&address.row).copied();
            AddressResult {
                row: address.row,
                key: address.key.clone(),
                qualified: distance_m.is_some(),
                distance_m,
            }
        })
        .collect();

    info!(
        "{} of {} addresses qualified",
        aggregated.iter().filter(|r| r.qualified).count(),
        aggregated.len()
    );

    aggregated
}
