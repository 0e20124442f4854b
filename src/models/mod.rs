//! Core data models for the proximity pipeline.

pub mod pair;
pub mod point;

pub use pair::{AddressResult, CandidatePair, PairOutcome, PairResult};
pub use point::{Address, Gate, Located, PointLayer, Properties};
