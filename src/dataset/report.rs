use anyhow::{Context, Result};
use csv::Writer;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::models::PairResult;

/// One row of the pair-level dump
#[derive(Debug, Serialize)]
pub struct PairRecord<'a> {
    pub id_gate: usize,
    pub gate_category: &'a str,
    pub id_civico: &'a str,
    pub address_row: usize,
    pub origin_lon: f64,
    pub origin_lat: f64,
    pub destination_lon: f64,
    pub destination_lat: f64,
    pub outcome: &'static str,
    pub within: bool,
    pub distance_m: Option<f64>,
}

impl<'a> From<&'a PairResult> for PairRecord<'a> {
    fn from(result: &'a PairResult) -> Self {
        let pair = &result.pair;
        Self {
            id_gate: pair.gate_fid,
            gate_category: &pair.gate_category,
            id_civico: &pair.address_key,
            address_row: pair.address_row,
            origin_lon: pair.origin.x,
            origin_lat: pair.origin.y,
            destination_lon: pair.destination.x,
            destination_lat: pair.destination.y,
            outcome: result.outcome.label(),
            within: result.outcome.is_within(),
            distance_m: result.outcome.distance_m(),
        }
    }
}

/// Write every pair and its outcome, in processing order, as CSV
pub fn write_pair_dump(path: &Path, results: &[PairResult]) -> Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create pair dump {}", path.display()))?;

    for result in results {
        writer.serialize(PairRecord::from(result))?;
    }
    writer.flush()?;

    info!("Wrote {} pairs to {}", results.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidatePair, PairOutcome};
    use geo::Coord;

    #[test]
    fn test_dump_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");

        let pair = CandidatePair {
            gate_fid: 4,
            gate_category: "pedonale".into(),
            address_row: 2,
            address_key: "CIV-2".into(),
            origin: Coord { x: 9.5, y: 45.5 },
            destination: Coord { x: 9.25, y: 45.25 },
        };
        let results = vec![
            PairResult {
                pair: pair.clone(),
                outcome: PairOutcome::Within { distance_m: 12.5 },
            },
            PairResult {
                pair,
                outcome: PairOutcome::NoRoute,
            },
        ];
        write_pair_dump(&path, &results).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "id_gate,gate_category,id_civico,address_row,origin_lon,origin_lat,destination_lon,destination_lat,outcome,within,distance_m"
        );
        assert_eq!(lines[1], "4,pedonale,CIV-2,2,9.5,45.5,9.25,45.25,within,true,12.5");
        assert_eq!(lines[2], "4,pedonale,CIV-2,2,9.5,45.5,9.25,45.25,no_route,false,");
    }
}
