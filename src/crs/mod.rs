//! Coordinate reference systems understood by the pipeline.
//!
//! Only the handful of systems that show up in address/gate datasets are
//! supported: geographic WGS84, Web Mercator and the UTM families. Everything
//! else is rejected at parse time so a bad dataset aborts the run early.

mod mercator;
mod utm;

use std::fmt;

use anyhow::{bail, Result};
use geo::Coord;

pub use mercator::{lat_lng_to_web_merc, web_merc_to_lat_lng};
use utm::TransverseMercator;

/// A declared reference system
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crs {
    /// EPSG:4326 / OGC CRS84, coordinates are (lon, lat) in degrees
    Wgs84,
    /// EPSG:3857
    WebMercator,
    /// UTM zone on the WGS84 ellipsoid (ETRS89 and RDN2008 zones map here too)
    Utm { epsg: u32, zone: u8, north: bool },
}

impl Crs {
    /// Parse an authority string such as `EPSG:32632`,
    /// `urn:ogc:def:crs:EPSG::3857` or `urn:ogc:def:crs:OGC:1.3:CRS84`.
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper.ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }

        let code = upper
            .rsplit(':')
            .next()
            .filter(|_| upper.contains("EPSG"))
            .and_then(|c| c.parse::<u32>().ok());

        let Some(code) = code else {
            bail!("Unsupported reference system '{}'", trimmed);
        };

        Self::from_epsg(code)
    }

    /// Build from a bare EPSG code
    pub fn from_epsg(code: u32) -> Result<Self> {
        let crs = match code {
            4326 => Crs::Wgs84,
            3857 | 900913 => Crs::WebMercator,
            32601..=32660 => Crs::Utm {
                epsg: code,
                zone: (code - 32600) as u8,
                north: true,
            },
            32701..=32760 => Crs::Utm {
                epsg: code,
                zone: (code - 32700) as u8,
                north: false,
            },
            25828..=25838 => Crs::Utm {
                epsg: code,
                zone: (code - 25800) as u8,
                north: true,
            },
            7791..=7793 => Crs::Utm {
                epsg: code,
                zone: (code - 7791 + 32) as u8,
                north: true,
            },
            _ => bail!("Unsupported reference system EPSG:{}", code),
        };
        Ok(crs)
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::Utm { epsg, .. } => *epsg,
        }
    }

    /// Whether planar distances in this system are in meters
    pub fn is_planar(&self) -> bool {
        !matches!(self, Crs::Wgs84)
    }

    /// Convert a coordinate in this system to (lon, lat) degrees
    pub fn to_wgs84(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        let out = match self {
            Crs::Wgs84 => c,
            Crs::WebMercator => {
                let (lon, lat) = web_merc_to_lat_lng(c.x, c.y);
                Coord { x: lon, y: lat }
            }
            Crs::Utm { zone, north, .. } => TransverseMercator::utm(*zone, *north).inverse(c),
        };
        ensure_finite(out, self)
    }

    /// Convert (lon, lat) degrees into this system
    pub fn from_wgs84(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        if !(-90.0..=90.0).contains(&c.y) {
            bail!("Latitude {} out of range", c.y);
        }
        let out = match self {
            Crs::Wgs84 => c,
            Crs::WebMercator => {
                let (x, y) = lat_lng_to_web_merc(c.x, c.y);
                Coord { x, y }
            }
            Crs::Utm { zone, north, .. } => TransverseMercator::utm(*zone, *north).forward(c),
        };
        ensure_finite(out, self)
    }

    /// Reproject a coordinate from `self` into `target`
    pub fn transform(&self, target: &Crs, c: Coord<f64>) -> Result<Coord<f64>> {
        if self == target {
            return Ok(c);
        }
        target.from_wgs84(self.to_wgs84(c)?)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

fn ensure_finite(c: Coord<f64>, crs: &Crs) -> Result<Coord<f64>> {
    if !c.x.is_finite() || !c.y.is_finite() {
        bail!("Coordinate cannot be expressed in {}", crs);
    }
    Ok(c)
}
