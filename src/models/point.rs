//! Point entities read from the input datasets.

use geo::Coord;

use crate::crs::Crs;

/// Non-geometric attributes of a feature, kept verbatim for the output layer
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Anything carrying an optional planar/geographic position
pub trait Located {
    fn position(&self) -> Option<Coord<f64>>;
    fn position_mut(&mut self) -> &mut Option<Coord<f64>>;
}

/// An address point ("civico"), keyed by its CIVKEY
#[derive(Debug, Clone)]
pub struct Address {
    /// Row position in the input layer; the identity used for joining and aggregation
    pub row: usize,
    /// CIVKEY value. Expected unique, duplicates are only warned about.
    pub key: String,
    /// None when the feature had no usable geometry
    pub position: Option<Coord<f64>>,
    pub properties: Properties,
}

/// A gate (controlled access point)
#[derive(Debug, Clone)]
pub struct Gate {
    /// Synthetic sequential identifier (row position)
    pub fid: usize,
    pub category: String,
    pub position: Option<Coord<f64>>,
}

impl Located for Address {
    fn position(&self) -> Option<Coord<f64>> {
        self.position
    }

    fn position_mut(&mut self) -> &mut Option<Coord<f64>> {
        &mut self.position
    }
}

impl Located for Gate {
    fn position(&self) -> Option<Coord<f64>> {
        self.position
    }

    fn position_mut(&mut self) -> &mut Option<Coord<f64>> {
        &mut self.position
    }
}

/// A named collection of points sharing one reference system
#[derive(Debug, Clone)]
pub struct PointLayer<T> {
    pub name: String,
    /// Declared reference system, None when the dataset does not declare one
    pub crs: Option<Crs>,
    pub features: Vec<T>,
}

impl<T: Located> PointLayer<T> {
    pub fn new(name: impl Into<String>, crs: Option<Crs>, features: Vec<T>) -> Self {
        Self {
            name: name.into(),
            crs,
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of features without a position
    pub fn missing_positions(&self) -> usize {
        self.features
            .iter()
            .filter(|f| f.position().is_none())
            .count()
    }
}
