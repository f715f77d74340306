//! Distance on the WGS-84 ellipsoid and simple aggregates over point sets.
//!
//! Thin adapters over the `geo` crate. `geo` works in `(x, y)` order, so
//! points go in as `(longitude, latitude)`.

use geo::{BoundingRect, Centroid, Distance, Geodesic, MultiPoint, Point};

use crate::models::{Bounds, GeoPoint};

fn to_point(p: GeoPoint) -> Point<f64> {
    Point::new(p.longitude, p.latitude)
}

fn multi_point(points: &[GeoPoint]) -> MultiPoint<f64> {
    points.iter().copied().map(to_point).collect()
}

/// Geodesic distance between two points on the WGS-84 ellipsoid, in
/// kilometres.
pub fn great_circle_distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    Geodesic::distance(to_point(a), to_point(b)) / 1000.0
}

/// Unweighted mean of latitudes and longitudes. `None` for an empty set.
pub fn mean_location(points: &[GeoPoint]) -> Option<GeoPoint> {
    let centroid = multi_point(points).centroid()?;
    Some(GeoPoint::new(centroid.y(), centroid.x()))
}

/// Bounding box of all points. `None` for an empty set.
pub fn bounds(points: &[GeoPoint]) -> Option<Bounds> {
    let rect = multi_point(points).bounding_rect()?;
    Some(Bounds {
        south_west: GeoPoint::new(rect.min().y, rect.min().x),
        north_east: GeoPoint::new(rect.max().y, rect.max().x),
    })
}
