// Spherical Web Mercator (EPSG:3857) on the WGS84 semi-major axis.

pub const EARTH_RADIUS: f64 = 6378137.0;

/// Convert lat/lng (EPSG:4326) to Web Mercator (EPSG:3857)
/// Input: (longitude, latitude) in degrees
/// Output: (x, y) in meters
pub fn lat_lng_to_web_merc(lon: f64, lat: f64) -> (f64, f64) {
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * ((std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan()).ln();
    (x, y)
}

/// Convert Web Mercator (EPSG:3857) to lat/lng (EPSG:4326)
/// Input: (x, y) in meters
/// Output: (longitude, latitude) in degrees
pub fn web_merc_to_lat_lng(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin() {
        let (x, y) = lat_lng_to_web_merc(0.0, 0.0);
        assert!(x.abs() < 1e-9);
        assert!(y.abs() < 1e-9);
    }

    #[test]
    fn test_known_point() {
        // Antimeridian on the equator sits at half the projected world width
        let (x, _) = lat_lng_to_web_merc(180.0, 0.0);
        assert!((x - 20_037_508.342_789_244).abs() < 1e-6);

        let (lon, lat) = web_merc_to_lat_lng(1_000_000.0, 5_000_000.0);
        let (x, y) = lat_lng_to_web_merc(lon, lat);
        assert!((x - 1_000_000.0).abs() < 1e-6);
        assert!((y - 5_000_000.0).abs() < 1e-6);
    }
}
