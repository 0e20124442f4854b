//! Spatial index for fast buffer lookups.

use geo::Coord;
use rstar::{RTree, RTreeObject, AABB};
use tracing::info;

use super::BufferedAddress;

/// Wrapper for R-tree indexing of address buffers
#[derive(Clone)]
struct IndexedBuffer<'a> {
    buffer: BufferedAddress<'a>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedBuffer<'_> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl<'a> IndexedBuffer<'a> {
    fn new(buffer: BufferedAddress<'a>) -> Self {
        let rect = buffer.disk.bounding_rect();
        Self {
            buffer,
            envelope: AABB::from_corners(
                [rect.min().x, rect.min().y],
                [rect.max().x, rect.max().y],
            ),
        }
    }
}

/// Spatial index over address buffers using an R-tree
pub struct BufferIndex<'a> {
    tree: RTree<IndexedBuffer<'a>>,
}

impl<'a> BufferIndex<'a> {
    /// Build spatial index from address buffers
    pub fn build(buffers: Vec<BufferedAddress<'a>>) -> Self {
        let indexed: Vec<IndexedBuffer> = buffers.into_iter().map(IndexedBuffer::new).collect();
        let tree = RTree::bulk_load(indexed);
        info!("Spatial index built with {} buffers", tree.size());
        Self { tree }
    }

    /// Find all buffers strictly containing a point, in address row order
    pub fn lookup(&self, point: Coord<f64>) -> Vec<BufferedAddress<'a>> {
        let query_envelope = AABB::from_point([point.x, point.y]);

        // Envelope intersection first, exact containment second
        let mut hits: Vec<BufferedAddress<'a>> = self
            .tree
            .locate_in_envelope_intersecting(&query_envelope)
            .filter(|ib| ib.buffer.disk.contains(point))
            .map(|ib| ib.buffer)
            .collect();

        hits.sort_by_key(|b| b.address.row);
        hits
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
