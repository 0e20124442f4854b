//! Containment join between gates and buffered addresses.

use geo::Coord;
use tracing::{debug, info, warn};

use super::{BufferIndex, BufferedAddress};
use crate::crs::Crs;
use crate::models::{Address, CandidatePair, Gate, PointLayer};

/// A gate found inside an address buffer
#[derive(Debug, Clone, Copy)]
pub struct JoinHit<'a> {
    pub gate: &'a Gate,
    pub address: &'a Address,
}

/// Every (gate, address) where the gate lies strictly inside the address buffer.
///
/// Output is ordered by gate fid; hits for the same gate keep address row order.
/// Gates outside every buffer produce nothing.
pub fn candidate_join<'a>(
    gates: &'a PointLayer<Gate>,
    buffers: Vec<BufferedAddress<'a>>,
) -> Vec<JoinHit<'a>> {
    let index = BufferIndex::build(buffers);

    let mut hits = Vec::new();
    let mut unmatched_gates = 0usize;

    for gate in &gates.features {
        let Some(position) = gate.position else {
            debug!("Gate {} has no geometry, skipped", gate.fid);
            continue;
        };

        let found = index.lookup(position);
        if found.is_empty() {
            unmatched_gates += 1;
            continue;
        }

        hits.extend(found.into_iter().map(|b| JoinHit {
            gate,
            address: b.address,
        }));
    }

    // Stable, so ties keep join order
    hits.sort_by_key(|h| h.gate.fid);

    info!(
        "Candidate join: {} pairs from {} gates ({} gates outside every buffer)",
        hits.len(),
        gates.len(),
        unmatched_gates
    );

    hits
}

/// Turn join hits into routable pairs with (lon, lat) endpoints.
///
/// `crs` is the system both layers share after normalization. When it is None
/// the coordinates are assumed to be lon/lat already. Pairs whose endpoints
/// cannot be expressed in lon/lat are discarded with a warning.
pub fn into_candidate_pairs(hits: &[JoinHit<'_>], crs: Option<Crs>) -> Vec<CandidatePair> {
    if crs.is_none() {
        warn!("No reference system declared, treating coordinates as lon/lat for routing");
    }

    let to_lon_lat = |c: Coord<f64>| match crs {
        Some(crs) => crs.to_wgs84(c).ok(),
        None => Some(c),
    };

    let mut discarded = 0usize;
    let pairs: Vec<CandidatePair> = hits
        .iter()
        .filter_map(|hit| {
            let origin = hit.address.position.and_then(to_lon_lat);
            let destination = hit.gate.position.and_then(to_lon_lat);
            match (origin, destination) {
                (Some(origin), Some(destination)) => Some(CandidatePair {
                    gate_fid: hit.gate.fid,
                    gate_category: hit.gate.category.clone(),
                    address_row: hit.address.row,
                    address_key: hit.address.key.clone(),
                    origin,
                    destination,
                }),
                _ => {
                    warn!(
                        "Discarding pair gate {} / address '{}': no usable lon/lat position",
                        hit.gate.fid, hit.address.key
                    );
                    discarded += 1;
                    None
                }
            }
        })
        .collect();

    if discarded > 0 {
        warn!("{} candidate pairs discarded", discarded);
    }

    pairs
}
