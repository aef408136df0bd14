//! Coarse "is this longitude/latitude?" heuristic.

use crate::shape::FeatureCollection;

/// Absolute coordinate values below this look like degrees rather than
/// projected units.
pub const DEFAULT_GEOGRAPHIC_THRESHOLD: f64 = 10_000.;

pub fn is_coordinate_geographic(value: f64, threshold: f64) -> bool {
    value.abs() < threshold
}

/// Samples the x component of the first coordinate of the first feature.
///
/// The answer applies to the whole collection; mixed projections are not
/// detected. Empty collections (or an empty first geometry) are treated as
/// already projected, so nothing gets reprojected.
pub fn is_collection_geographic(collection: &FeatureCollection, threshold: f64) -> bool {
    collection
        .features
        .first()
        .and_then(|feature| feature.shape.first_coord())
        .map(|c| is_coordinate_geographic(c.x, threshold))
        .unwrap_or(false)
}
