//! Gatereach - routed-distance proximity between address points and gates
//!
//! This library provides the pipeline components used by the `gatereach` binary:
//! spatial pre-filtering, route retrieval and classification, and aggregation.

pub mod aggregate;
pub mod config;
pub mod crs;
pub mod dataset;
pub mod models;
pub mod pipeline;
pub mod routing;
pub mod spatial;

pub use config::Config;
pub use models::{Address, AddressResult, CandidatePair, Gate, PairOutcome, PairResult};
pub use pipeline::{run, Job, RunSummary};
