//! Reduces a batch of features to one simplified shape.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tsify::Tsify;

use crate::{
    config::FlattenConfig,
    error::Error,
    merge::{decompose, GeoOverlay, Merger, Overlay},
    shape::Feature,
    simplify::{simplify_shape, DouglasPeucker, SimplifyParams, Simplifier},
};

pub const DEFAULT_VERTEX_CUTOFF: usize = 5000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase", default)]
pub struct FlattenParams {
    /// Vertex count the flattened shape should stay below; the flattener's
    /// configured default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex_cutoff: Option<usize>,
}

impl FlattenParams {
    pub fn with_cutoff(vertex_cutoff: usize) -> Self {
        Self { vertex_cutoff: Some(vertex_cutoff) }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Accepts a plain array of features or a FeatureCollection-shaped object.
pub fn normalize_shapes(shapes: JsonValue) -> Result<Vec<Feature>, Error> {
    let items = match shapes {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut obj) => match obj.remove("features") {
            Some(JsonValue::Array(items)) => items,
            Some(other) => return Err(Error::InvalidShapesInput(json_kind(&other))),
            None => return Err(Error::InvalidShapesInput("an object without features")),
        },
        other => return Err(Error::InvalidShapesInput(json_kind(&other))),
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| serde_json::from_value(item).map_err(|source| Error::InvalidFeature { index, source }))
        .collect()
}

pub struct Flattener {
    simplifier: Box<dyn Simplifier>,
    overlay: Box<dyn Overlay>,
    config: FlattenConfig,
}

impl Flattener {
    pub fn new(config: FlattenConfig) -> Self {
        Self {
            simplifier: Box::new(DouglasPeucker),
            overlay: Box::new(GeoOverlay),
            config,
        }
    }

    pub fn with_simplifier(mut self, simplifier: impl Simplifier + 'static) -> Self {
        self.simplifier = Box::new(simplifier);
        self
    }

    pub fn with_overlay(mut self, overlay: impl Overlay + 'static) -> Self {
        self.overlay = Box::new(overlay);
        self
    }

    /// Merges `features` and simplifies the result below `params.vertex_cutoff`
    /// (or the configured default cutoff).
    ///
    /// A single feature skips the merge; multi-polygons are split into parts
    /// and each part simplified before merging.
    pub fn flatten_features(&self, features: Vec<Feature>, params: &FlattenParams) -> Option<Feature> {
        let merged = match features.len() {
            0 => return None,
            1 => features.into_iter().next()?,
            n => {
                let parts = decompose(features, &self.config.parts, self.simplifier.as_ref());
                info!("merging {} features ({} parts)", n, parts.len());
                Merger::new(self.overlay.as_ref(), self.config.cleanup)
                    .with_buffer_distance(self.config.buffer_distance)
                    .merge(parts)?
            }
        };
        let cutoff = params.vertex_cutoff.unwrap_or(self.config.default_vertex_cutoff);
        let final_params = SimplifyParams::with_limit(cutoff);
        let shape = simplify_shape(merged.shape.clone(), &final_params, self.simplifier.as_ref());
        debug!("flattened to {}", shape);
        Some(merged.with_shape(shape))
    }

    pub fn flatten(&self, shapes: JsonValue, params: &FlattenParams) -> Result<Option<Feature>, Error> {
        let features = normalize_shapes(shapes)?;
        Ok(self.flatten_features(features, params))
    }
}

impl Default for Flattener {
    fn default() -> Self {
        Self::new(FlattenConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use geo_types::polygon;
    use serde_json::json;

    use super::*;
    use crate::{merge::Cleanup, shape::Shape, simplify::tests::circle};

    fn square_json(x: f64, y: f64) -> JsonValue {
        json!({
            "type": "Feature",
            "properties": { "x": x },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x, y], [x + 1., y], [x + 1., y + 1.], [x, y + 1.], [x, y]]]
            }
        })
    }

    #[test]
    fn collection_and_array_flatten_identically() {
        let features = vec![square_json(0., 0.), square_json(0.5, 0.5), square_json(3., 3.)];
        let flattener = Flattener::default();
        let params = FlattenParams::default();
        let from_array = flattener.flatten(JsonValue::Array(features.clone()), &params).unwrap();
        let from_collection = flattener
            .flatten(json!({ "type": "FeatureCollection", "features": features }), &params)
            .unwrap();
        assert!(from_array.is_some());
        assert_eq!(from_array, from_collection);
    }

    #[test]
    fn empty_input_flattens_to_nothing() {
        let out = Flattener::default().flatten(json!([]), &FlattenParams::default()).unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn non_array_input_is_rejected() {
        let err = Flattener::default().flatten(json!(42), &FlattenParams::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidShapesInput("a number")));
        let err = Flattener::default()
            .flatten(json!({ "type": "FeatureCollection", "features": "nope" }), &FlattenParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShapesInput("a string")));
    }

    #[test]
    fn malformed_features_are_reported_by_index() {
        let err = Flattener::default()
            .flatten(json!([square_json(0., 0.), { "type": "Feature" }]), &FlattenParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFeature { index: 1, .. }));
    }

    #[test]
    fn single_feature_is_only_simplified() {
        let feature = Feature::new(circle(0., 0., 1000., 2000));
        let shapes = serde_json::to_value(vec![feature]).unwrap();
        let out = Flattener::default()
            .flatten(shapes, &FlattenParams::with_cutoff(1000))
            .unwrap()
            .unwrap();
        assert_eq!(out.shape.kind(), "Polygon");
        assert!(out.shape.vertex_count() < 1000);
    }

    #[test]
    fn small_single_feature_passes_through() {
        let feature = Feature::new(polygon![(x: 0., y: 0.), (x: 1., y: 0.), (x: 1., y: 1.), (x: 0., y: 0.)]);
        let out = Flattener::default()
            .flatten_features(vec![feature.clone()], &FlattenParams::default())
            .unwrap();
        assert_eq!(out, feature);
    }

    #[test]
    fn unset_cutoff_uses_configured_default() {
        let feature = Feature::new(circle(0., 0., 1000., 2000));
        let flattener = Flattener::new(FlattenConfig {
            default_vertex_cutoff: 1000,
            ..FlattenConfig::default()
        });
        let out = flattener
            .flatten_features(vec![feature.clone()], &FlattenParams::default())
            .unwrap();
        assert!(out.shape.vertex_count() < 1000);

        let out = flattener
            .flatten_features(vec![feature], &FlattenParams::with_cutoff(5000))
            .unwrap();
        assert_eq!(out.shape.vertex_count(), 2001);
    }

    #[test_log::test]
    fn multi_polygons_are_split_merged_and_cut() {
        let many = Shape::MultiPolygon(geo_types::MultiPolygon::new(vec![
            circle(0., 0., 1000., 1500),
            circle(1500., 0., 1000., 1500),
        ]));
        let features = vec![Feature::new(many), Feature::new(circle(3000., 0., 1000., 1500))];
        let flattener = Flattener::new(FlattenConfig {
            cleanup: Cleanup::Skip,
            ..FlattenConfig::default()
        });
        let out = flattener
            .flatten_features(features, &FlattenParams::with_cutoff(1200))
            .unwrap();
        // three overlapping discs merge into one outline
        assert_eq!(out.shape.kind(), "Polygon");
        assert!(out.shape.vertex_count() < 1200);
    }
}
