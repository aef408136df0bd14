/// Failures of a request as a whole; the worker reports these as `error` events.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Tried to parse an invalid or unsupported shape type: {0}. Supported types: Point, MultiPoint, LineString, MultiLineString, Polygon, or MultiPolygon.")]
    UnsupportedGeometryType(String),

    #[error("Expected an array of features or a FeatureCollection, found {0}")]
    InvalidShapesInput(&'static str),

    #[error("Invalid feature at index {index}: {source}")]
    InvalidFeature {
        index: usize,
        source: serde_json::Error,
    },

    #[error("Invalid GeoJSON geometry: {0}")]
    GeoJson(#[from] geojson::Error),
}

/// Failures of the geometry primitives (simplify, union, buffer).
///
/// These never reach the caller: the engines fall back to the unmodified or
/// buffered geometry when one occurs.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("{op} produced a degenerate ring ({coords} coordinates)")]
    Degenerate { op: &'static str, coords: usize },

    #[error("{op} produced an empty result from non-empty input")]
    EmptyResult { op: &'static str },

    #[error("{op} panicked: {message}")]
    Panicked { op: &'static str, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
