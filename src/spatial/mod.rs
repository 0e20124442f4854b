//! Spatial pre-filtering: reference-system alignment, address buffers and
//! the containment join that turns gates × addresses into candidate pairs.

mod buffer;
mod index;
mod join;
mod normalize;

pub use buffer::{apply_buffer, BufferedAddress, Disk};
pub use index::BufferIndex;
pub use join::{candidate_join, into_candidate_pairs, JoinHit};
pub use normalize::{normalize, reproject_layer};
