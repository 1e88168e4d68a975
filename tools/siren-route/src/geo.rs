use geo::Point;
use rstar::{primitives::GeomWithData, RTree};

/// Great-circle distance in meters between two (lat, lon) pairs
#[allow(deprecated)]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    use geo::HaversineDistance;

    let p1 = Point::new(lon1, lat1);
    let p2 = Point::new(lon2, lat2);
    p1.haversine_distance(&p2)
}

/// Initial bearing in degrees [0, 360) from the first point towards the second,
/// 0 = North, clockwise. `None` when the points coincide.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    if (lat1 - lat2).abs() < 1e-12 && (lon1 - lon2).abs() < 1e-12 {
        return None;
    }

    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let delta_lambda = (lon2 - lon1).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    Some(y.atan2(x).to_degrees().rem_euclid(360.0))
}

/// Signed turn angle from an incoming to an outgoing bearing, wrapped to (-180, 180].
/// Positive = right turn, negative = left turn.
pub fn turn_angle(from_bearing: f64, to_bearing: f64) -> f64 {
    let mut delta = to_bearing - from_bearing;
    while delta > 180.0 {
        delta -= 360.0;
    }
    while delta <= -180.0 {
        delta += 360.0;
    }
    delta
}

/// Fast nearest node search using R-tree - O(log n) complexity
pub fn nearest_node_spatial(
    target: (f64, f64),
    rtree: &RTree<GeomWithData<[f64; 2], u32>>,
) -> Option<u32> {
    rtree
        .nearest_neighbor(&[target.1, target.0]) // [lon, lat]
        .map(|point| point.data)
}
