//! Combines many features into one by repeated boolean union.
//!
//! A failed union is retried once with both operands buffered outward by a
//! small distance; if that fails too the incoming feature is dropped and the
//! accumulator carries on unchanged. Nothing here is surfaced as an error.

use std::panic::{catch_unwind, UnwindSafe};

use geo::BooleanOps;
use geo_types::MultiPolygon;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{
    error::GeometryError,
    shape::{Feature, Shape},
    simplify::{simplify_shape, SimplifyParams, Simplifier},
};

pub const DEFAULT_BUFFER_DISTANCE: f64 = 0.1;

/// Whether to resolve self-intersections before merging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub enum Cleanup {
    #[default]
    Remove,
    Skip,
}

/// Polygon boolean primitives.
pub trait Overlay: Send + Sync {
    fn union(&self, a: &MultiPolygon, b: &MultiPolygon) -> Result<MultiPolygon, GeometryError>;
    fn buffer(&self, shape: &MultiPolygon, distance: f64) -> Result<MultiPolygon, GeometryError>;
    /// Rewrites `shape` without self-intersections.
    fn clean(&self, shape: &MultiPolygon) -> Result<MultiPolygon, GeometryError>;
}

/// [`geo::BooleanOps`] for union and cleanup, `geo-buf` for buffering.
///
/// Panics from either crate are turned into [`GeometryError::Panicked`] only
/// where unwinding is available; on `wasm32-unknown-unknown` a panic aborts
/// the instance. Buffer inputs are screened for degenerate rings and
/// non-finite coordinates before reaching `geo-buf` for that reason.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoOverlay;

fn guarded<T>(op: &'static str, f: impl FnOnce() -> T + UnwindSafe) -> Result<T, GeometryError> {
    catch_unwind(f).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        GeometryError::Panicked { op, message }
    })
}

fn check_buffer_input(shape: &MultiPolygon) -> Result<(), GeometryError> {
    let rings = shape
        .0
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()));
    for ring in rings {
        if ring.0.len() < 4 || ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(GeometryError::Degenerate { op: "buffer", coords: ring.0.len() });
        }
    }
    Ok(())
}

fn non_empty(op: &'static str, input_empty: bool, result: MultiPolygon) -> Result<MultiPolygon, GeometryError> {
    if result.0.is_empty() && !input_empty {
        Err(GeometryError::EmptyResult { op })
    } else {
        Ok(result)
    }
}

impl Overlay for GeoOverlay {
    fn union(&self, a: &MultiPolygon, b: &MultiPolygon) -> Result<MultiPolygon, GeometryError> {
        let result = guarded("union", || a.union(b))?;
        non_empty("union", a.0.is_empty() && b.0.is_empty(), result)
    }

    fn buffer(&self, shape: &MultiPolygon, distance: f64) -> Result<MultiPolygon, GeometryError> {
        check_buffer_input(shape)?;
        let result = guarded("buffer", || geo_buf::buffer_multi_polygon(shape, distance))?;
        non_empty("buffer", shape.0.is_empty(), result)
    }

    fn clean(&self, shape: &MultiPolygon) -> Result<MultiPolygon, GeometryError> {
        let empty = MultiPolygon::new(vec![]);
        let result = guarded("clean", || shape.union(&empty))?;
        non_empty("clean", shape.0.is_empty(), result)
    }
}

/// Splits multi-polygon features into one feature per member polygon and
/// simplifies each part. Other features pass through as-is.
pub fn decompose(features: Vec<Feature>, params: &SimplifyParams, simplifier: &dyn Simplifier) -> Vec<Feature> {
    let mut parts = Vec::with_capacity(features.len());
    for feature in features {
        match &feature.shape {
            Shape::MultiPolygon(mp) => {
                debug!("decomposing multi-polygon with {} members", mp.0.len());
                for polygon in &mp.0 {
                    let part = simplify_shape(Shape::Polygon(polygon.clone()), params, simplifier);
                    parts.push(feature.with_shape(part));
                }
            }
            _ => parts.push(feature),
        }
    }
    parts
}

pub struct Merger<'a> {
    overlay: &'a dyn Overlay,
    cleanup: Cleanup,
    buffer_distance: f64,
}

impl<'a> Merger<'a> {
    pub fn new(overlay: &'a dyn Overlay, cleanup: Cleanup) -> Self {
        Self {
            overlay,
            cleanup,
            buffer_distance: DEFAULT_BUFFER_DISTANCE,
        }
    }

    pub fn with_buffer_distance(mut self, distance: f64) -> Self {
        self.buffer_distance = distance;
        self
    }

    fn cleaned(&self, mp: MultiPolygon) -> MultiPolygon {
        match self.cleanup {
            Cleanup::Skip => mp,
            Cleanup::Remove => match self.overlay.clean(&mp) {
                Ok(cleaned) => cleaned,
                Err(e) => {
                    debug!("cleanup failed, keeping input: {}", e);
                    mp
                }
            },
        }
    }

    fn union_with_fallback(&self, acc: &MultiPolygon, next: &MultiPolygon) -> Option<MultiPolygon> {
        let err = match self.overlay.union(acc, next) {
            Ok(merged) => return Some(merged),
            Err(e) => e,
        };
        debug!("union failed ({}), retrying with {} buffer", err, self.buffer_distance);
        let buffered = self
            .overlay
            .buffer(acc, self.buffer_distance)
            .and_then(|a| Ok((a, self.overlay.buffer(next, self.buffer_distance)?)))
            .and_then(|(a, b)| self.overlay.union(&a, &b));
        match buffered {
            Ok(merged) => Some(merged),
            Err(e) => {
                warn!("buffered union failed ({}), dropping feature", e);
                None
            }
        }
    }

    /// Merges `features` into one feature carrying the properties of the
    /// first polygonal feature. `None` for empty input.
    pub fn merge(&self, features: Vec<Feature>) -> Option<Feature> {
        let mut features = features.into_iter();
        let first = features.next()?;
        let rest: Vec<Feature> = features.collect();

        if rest.is_empty() {
            return Some(match first.shape.to_multi_polygon() {
                Some(mp) if self.cleanup == Cleanup::Remove => {
                    first.with_shape(Shape::from_multi_polygon(self.cleaned(mp)))
                }
                _ => first,
            });
        }

        let mut polygonal = Vec::with_capacity(rest.len() + 1);
        for feature in std::iter::once(&first).chain(rest.iter()) {
            match feature.shape.to_multi_polygon() {
                Some(mp) => polygonal.push((feature, mp)),
                None => warn!("cannot union a {}, dropping it", feature.shape.kind()),
            }
        }
        let mut polygonal = polygonal.into_iter();
        let Some((seed_feature, seed)) = polygonal.next() else {
            return Some(first);
        };

        let mut acc = self.cleaned(seed);
        for (idx, (_, next)) in polygonal.enumerate() {
            if let Some(merged) = self.union_with_fallback(&acc, &next) {
                acc = merged;
            } else {
                debug!("feature {} left out of the merge", idx + 1);
            }
        }
        Some(seed_feature.with_shape(Shape::from_multi_polygon(acc)))
    }
}
