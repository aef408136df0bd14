//! Iterative vertex reduction with stall detection.
//!
//! Each pass hands the current shape to a [`Simplifier`] and feeds the result
//! back in, scaling the tolerance by `growth` between passes. The loop stops on
//! the first of:
//! - the iteration budget running out,
//! - the vertex count repeating for [`STALL_LIMIT`] consecutive passes,
//! - the vertex count dropping below `limit`.
//!
//! A failing primitive ends the loop with the last good shape.

use geo::Simplify;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{error::GeometryError, shape::Shape};

/// Consecutive identical vertex counts after which further passes are futile.
pub const STALL_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase", default)]
pub struct SimplifyParams {
    /// Target: stop once the vertex count is below this
    pub limit: usize,
    /// Maximum number of simplification passes
    pub iterations: usize,
    /// Tolerance for the first pass
    pub tolerance: f64,
    /// Multiplier applied to the tolerance after each pass
    pub growth: f64,
}

impl Default for SimplifyParams {
    fn default() -> Self {
        Self {
            limit: 1000,
            iterations: 100,
            tolerance: 0.1,
            growth: 0.1,
        }
    }
}

impl SimplifyParams {
    pub fn with_limit(limit: usize) -> Self {
        Self { limit, ..Self::default() }
    }
}

/// A single (shape, tolerance) → shape simplification pass.
pub trait Simplifier: Send + Sync {
    fn simplify(&self, shape: &Shape, tolerance: f64) -> Result<Shape, GeometryError>;
}

/// Ramer–Douglas–Peucker via [`geo::Simplify`].
///
/// Fails when a ring collapses below four coordinates, rather than returning a
/// polygon that can no longer be drawn or unioned.
#[derive(Debug, Clone, Copy, Default)]
pub struct DouglasPeucker;

fn check_rings(shape: &Shape) -> Result<(), GeometryError> {
    let polygons = match shape {
        Shape::Polygon(p) => std::slice::from_ref(p),
        Shape::MultiPolygon(mp) => mp.0.as_slice(),
        _ => return Ok(()),
    };
    for ring in polygons.iter().flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors())) {
        if ring.0.len() < 4 {
            return Err(GeometryError::Degenerate {
                op: "simplify",
                coords: ring.0.len(),
            });
        }
    }
    Ok(())
}

impl Simplifier for DouglasPeucker {
    fn simplify(&self, shape: &Shape, tolerance: f64) -> Result<Shape, GeometryError> {
        let simplified = match shape {
            Shape::LineString(g) => Shape::LineString(g.simplify(&tolerance)),
            Shape::MultiLineString(g) => Shape::MultiLineString(g.simplify(&tolerance)),
            Shape::Polygon(g) => Shape::Polygon(g.simplify(&tolerance)),
            Shape::MultiPolygon(g) => Shape::MultiPolygon(g.simplify(&tolerance)),
            Shape::Point(_) | Shape::MultiPoint(_) => shape.clone(),
        };
        check_rings(&simplified)?;
        Ok(simplified)
    }
}

/// Working state of one simplification run.
#[derive(Debug, Clone)]
struct SimplificationState {
    shape: Shape,
    remaining: usize,
    tolerance: f64,
    last_count: Option<usize>,
    repeats: usize,
}

/// Reduces `shape` toward `params.limit` vertices.
///
/// Shapes already below the limit come back untouched, without the primitive
/// being called. The vertex count never increases from pass to pass.
pub fn simplify_shape(shape: Shape, params: &SimplifyParams, simplifier: &dyn Simplifier) -> Shape {
    let mut state = SimplificationState {
        shape,
        remaining: params.iterations,
        tolerance: params.tolerance,
        last_count: None,
        repeats: 0,
    };
    loop {
        if state.remaining == 0 {
            debug!("simplify: iteration budget exhausted at {}", state.shape);
            return state.shape;
        }
        let count = state.shape.vertex_count();
        if state.last_count == Some(count) {
            state.repeats += 1;
        } else {
            state.repeats = 0;
        }
        if state.repeats >= STALL_LIMIT {
            debug!("simplify: stalled at {} vertices", count);
            return state.shape;
        }
        if count < params.limit {
            return state.shape;
        }
        let next = match simplifier.simplify(&state.shape, state.tolerance) {
            Ok(next) => next,
            Err(e) => {
                debug!("simplify: {}, keeping {}", e, state.shape);
                return state.shape;
            }
        };
        // A pass may not add vertices; treat that as a failed pass
        if next.vertex_count() > count {
            debug!("simplify: pass grew {} → {} vertices, keeping previous", count, next.vertex_count());
            return state.shape;
        }
        trace!(
            "simplify: tolerance {} took {} → {} vertices",
            state.tolerance,
            count,
            next.vertex_count()
        );
        state = SimplificationState {
            shape: next,
            remaining: state.remaining - 1,
            tolerance: state.tolerance * params.growth,
            last_count: Some(count),
            repeats: state.repeats,
        };
    }
}
