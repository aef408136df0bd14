use std::fmt::Display;

use derive_more::From;
use geo::MapCoords;
use geo_types::{Coord, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use geojson::{feature::Id, JsonObject};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The geometry kinds the pipeline understands.
///
/// GeoJSON input is converted into this closed set at the edges; anything else
/// (e.g. a `GeometryCollection`) is rejected with
/// [`Error::UnsupportedGeometryType`].
#[derive(Debug, Clone, From, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "geojson::Geometry", into = "geojson::Geometry")]
pub enum Shape {
    Point(Point),
    LineString(LineString),
    Polygon(Polygon),
    MultiPoint(MultiPoint),
    MultiLineString(MultiLineString),
    MultiPolygon(MultiPolygon),
}

fn rings_len(polygon: &Polygon) -> usize {
    polygon.exterior().0.len() + polygon.interiors().iter().map(|r| r.0.len()).sum::<usize>()
}

impl Shape {
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Point(_) => "Point",
            Shape::LineString(_) => "LineString",
            Shape::Polygon(_) => "Polygon",
            Shape::MultiPoint(_) => "MultiPoint",
            Shape::MultiLineString(_) => "MultiLineString",
            Shape::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Vertex count used to drive simplification.
    ///
    /// Polygons count their outer ring only, multi-polygons count every ring of
    /// every member. Non-areal shapes count as 0 and are never simplified.
    pub fn vertex_count(&self) -> usize {
        match self {
            Shape::Polygon(p) => p.exterior().0.len(),
            Shape::MultiPolygon(mp) => mp.0.iter().map(rings_len).sum(),
            Shape::Point(_)
            | Shape::LineString(_)
            | Shape::MultiPoint(_)
            | Shape::MultiLineString(_) => 0,
        }
    }

    /// First coordinate in GeoJSON order (first point, first vertex of the
    /// first line, first vertex of the first outer ring).
    pub fn first_coord(&self) -> Option<Coord> {
        match self {
            Shape::Point(p) => Some(p.0),
            Shape::LineString(ls) => ls.0.first().copied(),
            Shape::Polygon(p) => p.exterior().0.first().copied(),
            Shape::MultiPoint(mp) => mp.0.first().map(|p| p.0),
            Shape::MultiLineString(mls) => mls.0.first().and_then(|ls| ls.0.first().copied()),
            Shape::MultiPolygon(mp) => mp.0.first().and_then(|p| p.exterior().0.first().copied()),
        }
    }

    pub fn map_coords(&self, f: impl Fn(Coord) -> Coord + Copy) -> Shape {
        match self {
            Shape::Point(g) => Shape::Point(g.map_coords(f)),
            Shape::LineString(g) => Shape::LineString(g.map_coords(f)),
            Shape::Polygon(g) => Shape::Polygon(g.map_coords(f)),
            Shape::MultiPoint(g) => Shape::MultiPoint(g.map_coords(f)),
            Shape::MultiLineString(g) => Shape::MultiLineString(g.map_coords(f)),
            Shape::MultiPolygon(g) => Shape::MultiPolygon(g.map_coords(f)),
        }
    }

    /// Areal shapes as a multi-polygon; `None` for points and lines.
    pub fn to_multi_polygon(&self) -> Option<MultiPolygon> {
        match self {
            Shape::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
            Shape::MultiPolygon(mp) => Some(mp.clone()),
            _ => None,
        }
    }

    /// Collapses a single-member multi-polygon to a plain polygon.
    pub fn from_multi_polygon(mut mp: MultiPolygon) -> Shape {
        if mp.0.len() == 1 {
            Shape::Polygon(mp.0.remove(0))
        } else {
            Shape::MultiPolygon(mp)
        }
    }
}

impl TryFrom<geojson::Geometry> for Shape {
    type Error = Error;

    fn try_from(geometry: geojson::Geometry) -> Result<Self, Error> {
        use geojson::Value;
        let shape = match geometry.value {
            Value::GeometryCollection(_) => {
                return Err(Error::UnsupportedGeometryType("GeometryCollection".to_string()))
            }
            value @ Value::Point(_) => Shape::Point(value.try_into()?),
            value @ Value::LineString(_) => Shape::LineString(value.try_into()?),
            value @ Value::Polygon(_) => Shape::Polygon(value.try_into()?),
            value @ Value::MultiPoint(_) => Shape::MultiPoint(value.try_into()?),
            value @ Value::MultiLineString(_) => Shape::MultiLineString(value.try_into()?),
            value @ Value::MultiPolygon(_) => Shape::MultiPolygon(value.try_into()?),
        };
        Ok(shape)
    }
}

impl From<Shape> for geojson::Geometry {
    fn from(shape: Shape) -> Self {
        let value = match &shape {
            Shape::Point(g) => geojson::Value::from(g),
            Shape::LineString(g) => geojson::Value::from(g),
            Shape::Polygon(g) => geojson::Value::from(g),
            Shape::MultiPoint(g) => geojson::Value::from(g),
            Shape::MultiLineString(g) => geojson::Value::from(g),
            Shape::MultiPolygon(g) => geojson::Value::from(g),
        };
        geojson::Geometry::new(value)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{} vertices]", self.kind(), self.vertex_count())
    }
}

/// A shape plus its property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "geojson::Feature", into = "geojson::Feature")]
pub struct Feature {
    pub shape: Shape,
    pub properties: JsonObject,
    pub id: Option<Id>,
}

impl Feature {
    pub fn new(shape: impl Into<Shape>) -> Self {
        Feature {
            shape: shape.into(),
            properties: JsonObject::new(),
            id: None,
        }
    }

    /// Same properties and id, different shape.
    pub fn with_shape(&self, shape: Shape) -> Self {
        Feature {
            shape,
            properties: self.properties.clone(),
            id: self.id.clone(),
        }
    }
}

impl TryFrom<geojson::Feature> for Feature {
    type Error = Error;

    fn try_from(feature: geojson::Feature) -> Result<Self, Error> {
        let geometry = feature
            .geometry
            .ok_or_else(|| Error::UnsupportedGeometryType("null".to_string()))?;
        Ok(Feature {
            shape: geometry.try_into()?,
            properties: feature.properties.unwrap_or_default(),
            id: feature.id,
        })
    }
}

impl From<Feature> for geojson::Feature {
    fn from(feature: Feature) -> Self {
        geojson::Feature {
            bbox: None,
            geometry: Some(feature.shape.into()),
            id: feature.id,
            properties: Some(feature.properties),
            foreign_members: None,
        }
    }
}

/// Features decoded from one layer of an archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    pub name: Option<String>,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn into_geojson(self) -> geojson::FeatureCollection {
        geojson::FeatureCollection {
            bbox: None,
            features: self.features.into_iter().map(geojson::Feature::from).collect(),
            foreign_members: None,
        }
    }
}
