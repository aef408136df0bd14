//! Shapefile archive decoding.
//!
//! [`ZipShapefileDecoder`] opens a zip, finds every `.shp` layer, pairs it with
//! the `.dbf` of the same stem when there is one, and converts the records into
//! [`Feature`]s. A bare `.shp` byte stream (no zip) is accepted too.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};

use itertools::Itertools;
use log::{debug, info};
use serde_json::{Number, Value as JsonValue};
use shapefile::dbase::{self, FieldValue};

use crate::shape::{Feature, FeatureCollection, Shape};

const MISSING_BUFFER: &str = "forgot to pass buffer";
const UNKNOWN_SHP_TYPE: &str = "I don't know that shp type";
const NO_LAYERS: &str = "no layers founds";
const NOT_A_ZIP: &str = "Can't find end of central directory";
const SYNTAX: &str = "SyntaxError";
const INVALID_URL: &str = "Failed to execute 'open' on 'XMLHttpRequest': Invalid URL";

/// `.shp` files start with the big-endian file code 9994.
const SHP_FILE_CODE: [u8; 4] = [0x00, 0x00, 0x27, 0x0a];

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("forgot to pass buffer")]
    MissingBuffer,

    #[error("I don't know that shp type: {0}")]
    UnknownShapeType(String),

    #[error("no layers founds")]
    NoLayers,

    #[error("Can't find end of central directory : is this a zip file ? ({0})")]
    NotAZip(String),

    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// Spurious failure of the decoding environment; retrying may succeed.
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

impl DecodeError {
    /// Maps a decoder's failure message onto a variant, for decoders that only
    /// report text.
    pub fn from_message(message: &str) -> Self {
        match message {
            MISSING_BUFFER => DecodeError::MissingBuffer,
            NO_LAYERS => DecodeError::NoLayers,
            INVALID_URL => DecodeError::Transient(message.to_string()),
            m if m.starts_with(UNKNOWN_SHP_TYPE) => DecodeError::UnknownShapeType(m.to_string()),
            m if m.starts_with(NOT_A_ZIP) => DecodeError::NotAZip(m.to_string()),
            m if m.starts_with(SYNTAX) => DecodeError::Syntax(m.to_string()),
            m => DecodeError::Other(m.to_string()),
        }
    }
}

impl From<shapefile::Error> for DecodeError {
    fn from(e: shapefile::Error) -> Self {
        match e {
            shapefile::Error::InvalidShapeType(code) => DecodeError::UnknownShapeType(format!("shape type {}", code)),
            shapefile::Error::IoError(e) => DecodeError::Syntax(e.to_string()),
            e => DecodeError::Other(e.to_string()),
        }
    }
}

/// Bytes → one feature collection per layer.
pub trait ArchiveDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<FeatureCollection>, DecodeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipShapefileDecoder;

/// The `.shp` and `.dbf` bytes sharing one stem.
#[derive(Debug, Default)]
struct Layer {
    shp: Option<Vec<u8>>,
    dbf: Option<Vec<u8>>,
}

fn field_to_json(value: FieldValue) -> JsonValue {
    match value {
        FieldValue::Character(Some(s)) => JsonValue::String(s.trim_end().to_string()),
        FieldValue::Memo(s) => JsonValue::String(s),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            Number::from_f64(n).map(JsonValue::Number).unwrap_or(JsonValue::Null)
        }
        FieldValue::Float(Some(f)) => Number::from_f64(f as f64).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        FieldValue::Integer(i) => JsonValue::from(i),
        FieldValue::Logical(Some(b)) => JsonValue::Bool(b),
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => JsonValue::Null,
        other => JsonValue::String(format!("{:?}", other)),
    }
}

/// `None` for a null record; its dbf row is consumed alongside it.
fn to_feature(shape: shapefile::Shape, record: Option<dbase::Record>) -> Result<Option<Feature>, DecodeError> {
    if let shapefile::Shape::NullShape = shape {
        debug!("skipping null record");
        return Ok(None);
    }
    let kind = shape.shapetype();
    let geometry = geo_types::Geometry::<f64>::try_from(shape)
        .map_err(|_| DecodeError::UnknownShapeType(format!("{:?}", kind)))?;
    let shape = match geometry {
        geo_types::Geometry::Point(g) => Shape::Point(g),
        geo_types::Geometry::LineString(g) => Shape::LineString(g),
        geo_types::Geometry::Polygon(g) => Shape::Polygon(g),
        geo_types::Geometry::MultiPoint(g) => Shape::MultiPoint(g),
        geo_types::Geometry::MultiLineString(g) => Shape::MultiLineString(g),
        geo_types::Geometry::MultiPolygon(g) => Shape::from_multi_polygon(g),
        _ => return Err(DecodeError::UnknownShapeType(format!("{:?}", kind))),
    };
    let mut feature = Feature::new(shape);
    if let Some(record) = record {
        feature.properties = HashMap::<String, FieldValue>::from(record)
            .into_iter()
            .map(|(name, value)| (name, field_to_json(value)))
            .collect();
    }
    Ok(Some(feature))
}

impl ZipShapefileDecoder {
    fn decode_layer(&self, name: Option<String>, layer: Layer) -> Result<FeatureCollection, DecodeError> {
        let shp = layer.shp.ok_or(DecodeError::NoLayers)?;
        let mut shape_reader = shapefile::ShapeReader::new(Cursor::new(shp))?;
        let features = match layer.dbf {
            Some(dbf) => {
                let dbf_reader = dbase::Reader::new(Cursor::new(dbf))
                    .map_err(|e| DecodeError::Syntax(e.to_string()))?;
                let mut reader = shapefile::Reader::new(shape_reader, dbf_reader);
                reader
                    .iter_shapes_and_records()
                    .filter_map(|r| match r {
                        Ok((shape, record)) => to_feature(shape, Some(record)).transpose(),
                        Err(e) => Some(Err(e.into())),
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                debug!("layer {:?} has no .dbf, features get empty properties", name);
                shape_reader
                    .iter_shapes()
                    .filter_map(|r| match r {
                        Ok(shape) => to_feature(shape, None).transpose(),
                        Err(e) => Some(Err(e.into())),
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(FeatureCollection { name, features })
    }

    fn read_layers(&self, bytes: &[u8]) -> Result<BTreeMap<String, Layer>, DecodeError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| DecodeError::NotAZip(e.to_string()))?;
        let names = archive.file_names().map(str::to_string).collect_vec();
        let by_stem = names
            .into_iter()
            .filter(|n| !n.starts_with("__MACOSX/"))
            .filter_map(|n| {
                let (stem, ext) = n.rsplit_once('.')?;
                Some((stem.to_string(), ext.to_ascii_lowercase(), n.clone()))
            })
            .filter(|(_, ext, _)| ext == "shp" || ext == "dbf")
            .into_group_map_by(|(stem, _, _)| stem.clone());

        let mut layers = BTreeMap::new();
        for (stem, entries) in by_stem {
            let mut layer = Layer::default();
            for (_, ext, entry_name) in entries {
                let mut file = archive
                    .by_name(&entry_name)
                    .map_err(|e| DecodeError::Syntax(e.to_string()))?;
                let mut buf = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut buf).map_err(|e| DecodeError::Syntax(e.to_string()))?;
                match ext.as_str() {
                    "shp" => layer.shp = Some(buf),
                    _ => layer.dbf = Some(buf),
                }
            }
            if layer.shp.is_some() {
                layers.insert(stem, layer);
            }
        }
        Ok(layers)
    }
}

impl ArchiveDecoder for ZipShapefileDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<FeatureCollection>, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::MissingBuffer);
        }
        if bytes.starts_with(&SHP_FILE_CODE) {
            let layer = Layer { shp: Some(bytes.to_vec()), dbf: None };
            return Ok(vec![self.decode_layer(None, layer)?]);
        }
        let layers = self.read_layers(bytes)?;
        if layers.is_empty() {
            return Err(DecodeError::NoLayers);
        }
        info!("decoding {} layer(s): {}", layers.len(), layers.keys().join(", "));
        layers
            .into_iter()
            .map(|(stem, layer)| {
                let name = stem.rsplit('/').next().map(str::to_string);
                self.decode_layer(name, layer)
            })
            .collect()
    }
}
