//! Disk-shaped tolerance regions around address points.

use geo::{Coord, Rect};
use tracing::{info, warn};

use crate::models::{Address, PointLayer};

/// A disk in planar coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Disk {
    pub center: Coord<f64>,
    pub radius: f64,
}

impl Disk {
    pub fn new(center: Coord<f64>, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Strict interior test: a point on the rim is not contained
    pub fn contains(&self, point: Coord<f64>) -> bool {
        let d = point - self.center;
        d.x.hypot(d.y) < self.radius
    }

    pub fn bounding_rect(&self) -> Rect<f64> {
        let r = Coord {
            x: self.radius,
            y: self.radius,
        };
        Rect::new(self.center - r, self.center + r)
    }
}

/// An address with its buffer. The address itself is borrowed, so every
/// attribute and the source identifier stay reachable.
#[derive(Debug, Clone, Copy)]
pub struct BufferedAddress<'a> {
    pub address: &'a Address,
    pub disk: Disk,
}

/// Replace each address point with a disk of `distance` around it.
///
/// Distances are planar, so the layer is expected to be in a metric system.
/// Addresses without a position get no buffer.
pub fn apply_buffer(addresses: &PointLayer<Address>, distance: f64) -> Vec<BufferedAddress<'_>> {
    if let Some(crs) = addresses.crs {
        if !crs.is_planar() {
            warn!(
                "Layer '{}' is in geographic {}; a {} buffer is in degrees, not meters",
                addresses.name, crs, distance
            );
        }
    }

    let buffers: Vec<BufferedAddress> = addresses
        .features
        .iter()
        .filter_map(|address| {
            address.position.map(|center| BufferedAddress {
                address,
                disk: Disk::new(center, distance),
            })
        })
        .collect();

    info!(
        "Applied a {} buffer to {} addresses ({} without geometry)",
        distance,
        buffers.len(),
        addresses.len() - buffers.len()
    );

    buffers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Properties;

    #[test]
    fn test_disk_contains() {
        let disk = Disk::new(Coord { x: 100.0, y: 100.0 }, 300.0);
        assert!(disk.contains(Coord { x: 250.0, y: 100.0 }));
        assert!(!disk.contains(Coord { x: 401.0, y: 100.0 }));
        assert!(!disk.contains(Coord { x: 400.0, y: 100.0 }));
    }

    #[test]
    fn test_bounding_rect() {
        let rect = Disk::new(Coord { x: 10.0, y: -5.0 }, 2.0).bounding_rect();
        assert_eq!(rect.min(), Coord { x: 8.0, y: -7.0 });
        assert_eq!(rect.max(), Coord { x: 12.0, y: -3.0 });
    }

    #[test]
    fn test_buffer_keeps_identity_and_skips_missing() {
        let mut props = Properties::new();
        props.insert("VIA".into(), "Roma".into());
        let addresses = PointLayer::new(
            "civici",
            None,
            vec![
                Address {
                    row: 0,
                    key: "A".into(),
                    position: Some(Coord { x: 0.0, y: 0.0 }),
                    properties: props,
                },
                Address {
                    row: 1,
                    key: "B".into(),
                    position: None,
                    properties: Properties::new(),
                },
            ],
        );

        let buffers = apply_buffer(&addresses, 300.0);
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].address.key, "A");
        assert_eq!(buffers[0].address.properties["VIA"], "Roma");
        assert_eq!(buffers[0].disk.radius, 300.0);
    }
}
