//! Geographic → planar reprojection.

use std::f64::consts::FRAC_PI_4;

use geo_types::{coord, Coord};

use crate::shape::FeatureCollection;

/// Converts a collection from longitude/latitude into planar units.
pub trait Reprojector: Send + Sync {
    fn reproject(&self, collection: FeatureCollection) -> FeatureCollection;
}

/// Spherical ("web") Mercator, EPSG:3857.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl WebMercator {
    pub const RADIUS: f64 = 6_378_137.;
    /// Half the projected world width; results are clamped to ±this.
    pub const EXTENT: f64 = 20_037_508.342_789_244;

    pub fn project(c: Coord) -> Coord {
        // Wrap longitudes past the antimeridian back into [-180, 180]
        let lng = if c.x.abs() <= 180. { c.x } else { c.x - c.x.signum() * 360. };
        let x = Self::RADIUS * lng.to_radians();
        let y = Self::RADIUS * (FRAC_PI_4 + 0.5 * c.y.to_radians()).tan().ln();
        coord! {
            x: x.clamp(-Self::EXTENT, Self::EXTENT),
            y: y.clamp(-Self::EXTENT, Self::EXTENT),
        }
    }
}

impl Reprojector for WebMercator {
    fn reproject(&self, collection: FeatureCollection) -> FeatureCollection {
        let features = collection
            .features
            .into_iter()
            .map(|f| {
                let shape = f.shape.map_coords(Self::project);
                f.with_shape(shape)
            })
            .collect();
        FeatureCollection {
            name: collection.name,
            features,
        }
    }
}
