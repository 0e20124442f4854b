//! Candidate pairs and the results derived from them.

use std::fmt;

use geo::Coord;
use serde::Serialize;

/// One (gate, address) pair produced by the candidate join.
///
/// `origin` and `destination` are (lon, lat) degrees, ready for the routing
/// service: the address is the origin, the gate the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePair {
    pub gate_fid: usize,
    pub gate_category: String,
    pub address_row: usize,
    pub address_key: String,
    pub origin: Coord<f64>,
    pub destination: Coord<f64>,
}

/// Terminal state of a pair after route resolution
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    /// Qualified, with the measured distance in meters
    Within { distance_m: f64 },
    /// Route walked to the end without qualifying
    NotWithin,
    /// The routing service answered with no route
    NoRoute,
    /// Retries exhausted or the route could not be measured
    Failed { reason: String },
    /// Not evaluated, the previous pair already qualified this address
    Skipped,
}

impl PairOutcome {
    pub fn is_within(&self) -> bool {
        matches!(self, PairOutcome::Within { .. })
    }

    pub fn distance_m(&self) -> Option<f64> {
        match self {
            PairOutcome::Within { distance_m } => Some(*distance_m),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PairOutcome::Within { .. } => "within",
            PairOutcome::NotWithin => "not_within",
            PairOutcome::NoRoute => "no_route",
            PairOutcome::Failed { .. } => "failed",
            PairOutcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairOutcome::Within { distance_m } => write!(f, "within ({:.1} m)", distance_m),
            PairOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// A pair together with its outcome, written once per pair
#[derive(Debug, Clone, PartialEq)]
pub struct PairResult {
    pub pair: CandidatePair,
    pub outcome: PairOutcome,
}

/// Final per-address verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressResult {
    pub row: usize,
    pub key: String,
    pub qualified: bool,
    pub distance_m: Option<f64>,
}
