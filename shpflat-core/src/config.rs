//! Runtime configuration, deserialized from JSON with a default for every
//! field.

use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{
    classify::DEFAULT_GEOGRAPHIC_THRESHOLD,
    error::ConfigError,
    flatten::DEFAULT_VERTEX_CUTOFF,
    merge::{Cleanup, DEFAULT_BUFFER_DISTANCE},
    simplify::SimplifyParams,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestConfig {
    /// Failed decode attempts allowed per file before giving up on it
    pub max_retries: u32,
    /// Coordinates with a smaller magnitude are taken to be degrees
    pub geographic_threshold: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            geographic_threshold: DEFAULT_GEOGRAPHIC_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase", default)]
pub struct FlattenConfig {
    /// Simplification applied to each multi-polygon part before merging
    pub parts: SimplifyParams,
    pub cleanup: Cleanup,
    /// Outward buffer applied to both operands when a union fails
    pub buffer_distance: f64,
    /// Used when a request carries no `vertexCutoff`
    pub default_vertex_cutoff: usize,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            parts: SimplifyParams::default(),
            cleanup: Cleanup::default(),
            buffer_distance: DEFAULT_BUFFER_DISTANCE,
            default_vertex_cutoff: DEFAULT_VERTEX_CUTOFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub log_level: Option<String>,
    /// Also report progress diagnostics as `log` events
    pub emit_log_events: bool,
    pub ingest: IngestConfig,
    pub flatten: FlattenConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            emit_log_events: true,
            ingest: IngestConfig::default(),
            flatten: FlattenConfig::default(),
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        crate::parse_log_level(config.log_level.as_deref())?;
        Ok(config)
    }
}
