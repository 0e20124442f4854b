//! Segment measurement and threshold classification of a route.

use geo::{Coord, Distance, Haversine, Point};

use super::RouteError;
use crate::config::{MeasureConfig, SegmentMetric, ThresholdMode};
use crate::crs::lat_lng_to_web_merc;

/// Length in meters of the segment between two (lon, lat) vertices
pub fn segment_length(metric: SegmentMetric, a: Coord<f64>, b: Coord<f64>) -> f64 {
    match metric {
        SegmentMetric::WebMercator => {
            let (ax, ay) = lat_lng_to_web_merc(a.x, a.y);
            let (bx, by) = lat_lng_to_web_merc(b.x, b.y);
            (bx - ax).hypot(by - ay)
        }
        SegmentMetric::Haversine => Haversine.distance(Point::from(a), Point::from(b)),
    }
}

/// Walk a route vertex by vertex and decide whether it qualifies.
///
/// Returns the qualifying distance, or `None` when the route does not qualify.
/// Walking stops as soon as the outcome is known:
/// - [`ThresholdMode::Segment`]: the first segment no longer than `threshold`
///   qualifies and its own length is the distance.
/// - [`ThresholdMode::Cumulative`]: the running total must stay within
///   `threshold` to the last vertex; the walk stops once it is exceeded.
///
/// Routes with fewer than two vertices never qualify.
pub fn classify_route(
    route: &[Coord<f64>],
    threshold: f64,
    measure: MeasureConfig,
) -> Result<Option<f64>, RouteError> {
    if route.len() < 2 {
        return Ok(None);
    }

    let mut total = 0.0;
    for (i, w) in route.windows(2).enumerate() {
        let length = segment_length(measure.metric, w[0], w[1]);
        if !length.is_finite() {
            return Err(RouteError::Geometry(format!(
                "segment {} between {:?} and {:?} has no finite length",
                i, w[0], w[1]
            )));
        }

        match measure.mode {
            ThresholdMode::Segment => {
                if length <= threshold {
                    return Ok(Some(length));
                }
            }
            ThresholdMode::Cumulative => {
                total += length;
                if total > threshold {
                    return Ok(None);
                }
            }
        }
    }

    match measure.mode {
        ThresholdMode::Segment => Ok(None),
        ThresholdMode::Cumulative => Ok(Some(total)),
    }
}
