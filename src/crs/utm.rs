//! Transverse Mercator on the WGS84 ellipsoid (Krüger series, third order).
//!
//! Third order keeps the projection error well under a millimetre inside a
//! UTM zone, far below the buffer and threshold tolerances we work with.

use geo::Coord;

const WGS84_A: f64 = 6378137.0;
const WGS84_F: f64 = 1.0 / 298.257223563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Parameters of one transverse Mercator projection
#[derive(Debug, Clone, Copy)]
pub struct TransverseMercator {
    central_meridian: f64,
    false_northing: f64,
    /// k0 * rectifying radius
    scale: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
    /// 2√n / (1 + n), the first eccentricity
    ecc: f64,
}

impl TransverseMercator {
    /// Projection for a UTM zone (1-60)
    pub fn utm(zone: u8, north: bool) -> Self {
        let central_meridian = (f64::from(zone) * 6.0 - 183.0).to_radians();
        let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };

        let n = WGS84_F / (2.0 - WGS84_F);
        let n2 = n * n;
        let n3 = n2 * n;

        let rectifying = WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0);

        Self {
            central_meridian,
            false_northing,
            scale: UTM_K0 * rectifying,
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
            ecc: 2.0 * n.sqrt() / (1.0 + n),
        }
    }

    /// (lon, lat) degrees to (easting, northing) meters
    pub fn forward(&self, c: Coord<f64>) -> Coord<f64> {
        let lat = c.y.to_radians();
        let dlon = c.x.to_radians() - self.central_meridian;

        let sin_lat = lat.sin();
        let t = (sin_lat.atanh() - self.ecc * (self.ecc * sin_lat).atanh()).sinh();
        let xi_p = t.atan2(dlon.cos());
        let eta_p = (dlon.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        Coord {
            x: UTM_FALSE_EASTING + self.scale * eta,
            y: self.false_northing + self.scale * xi,
        }
    }

    /// (easting, northing) meters to (lon, lat) degrees
    pub fn inverse(&self, c: Coord<f64>) -> Coord<f64> {
        let xi = (c.y - self.false_northing) / self.scale;
        let eta = (c.x - UTM_FALSE_EASTING) / self.scale;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, b) in self.beta.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi_p -= b * (k * xi).sin() * (k * eta).cosh();
            eta_p -= b * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut lat = chi;
        for (j, d) in self.delta.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            lat += d * (k * chi).sin();
        }
        let lon = self.central_meridian + eta_p.sinh().atan2(xi_p.cos());

        Coord {
            x: lon.to_degrees(),
            y: lat.to_degrees(),
        }
    }
}
