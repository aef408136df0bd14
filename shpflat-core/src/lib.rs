//! Shapefile ingestion and flattening.
//!
//! Uploaded archives are decoded into GeoJSON-like features (reprojected to
//! Web Mercator when they look geographic), and batches of features can be
//! merged and simplified down to a single shape under a vertex budget.

#[cfg(test)]
#[macro_use]
extern crate approx;

pub mod classify;
pub mod config;
pub mod decode;
pub mod error;
pub mod flatten;
pub mod ingest;
pub mod merge;
pub mod protocol;
pub mod reproject;
pub mod shape;
pub mod simplify;
pub mod worker;

pub use config::Config;
pub use decode::{ArchiveDecoder, DecodeError, ZipShapefileDecoder};
pub use error::{ConfigError, Error, GeometryError};
pub use flatten::{FlattenParams, Flattener};
pub use ingest::{FileSource, Ingestor, MemoryFile};
pub use merge::{Cleanup, GeoOverlay, Overlay};
pub use protocol::{Event, EventSink, Request, RequestId};
pub use reproject::{Reprojector, WebMercator};
pub use shape::{Feature, FeatureCollection, Shape};
pub use simplify::{DouglasPeucker, SimplifyParams, Simplifier};
pub use worker::Worker;

/// Parse a log level string into LevelFilter.
pub fn parse_log_level(level: Option<&str>) -> Result<log::LevelFilter, ConfigError> {
    Ok(match level {
        Some("error") => log::LevelFilter::Error,
        Some("warn") => log::LevelFilter::Warn,
        Some("info") | Some("") | None => log::LevelFilter::Info,
        Some("debug") => log::LevelFilter::Debug,
        Some("trace") => log::LevelFilter::Trace,
        Some(level) => return Err(ConfigError::InvalidLogLevel(level.to_string())),
    })
}
