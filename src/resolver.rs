use serde::Serialize;
use tracing::{trace, warn};

use crate::chrome::ChromeOffset;
use crate::error::{DemoError, Result};
use crate::geometry::ScreenGeometry;
use crate::page::{BoundingBox, WindowOrigin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinateSource {
    ElementDerived,
    ExternallySupplied,
}

/// Absolute pointer position in the space the pointer backend consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenCoordinate {
    pub x: i32,
    pub y: i32,
    pub source: CoordinateSource,
}

/// Turns page geometry into pointer coordinates.
///
/// Offsets are added first, then scale is applied as a separate step. Scaling
/// is a configuration switch: some display backends already report positions
/// in the pointer's space and must not be scaled twice.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateResolver {
    scaling_enabled: bool,
}

impl CoordinateResolver {
    pub fn new(scaling_enabled: bool) -> Self {
        Self { scaling_enabled }
    }

    pub fn scaling_enabled(&self) -> bool {
        self.scaling_enabled
    }

    /// Unscaled screen point of the element's center.
    pub fn pre_scale_point(
        element: &BoundingBox,
        window: WindowOrigin,
        chrome: &ChromeOffset,
        geometry: &ScreenGeometry,
    ) -> (f64, f64) {
        let (cx, cy) = element.center();
        let sx = window.x as f64 + cx;
        let sy = window.y as f64 + chrome.pixels as f64 + cy;
        let (mx, my) = geometry.origin();
        (sx + mx as f64, sy + my as f64)
    }

    pub fn resolve(
        &self,
        element: &BoundingBox,
        window: WindowOrigin,
        chrome: &ChromeOffset,
        geometry: &ScreenGeometry,
    ) -> Result<ScreenCoordinate> {
        let (sx, sy) = Self::pre_scale_point(element, window, chrome, geometry);
        let coordinate = self.finish(sx, sy, geometry, CoordinateSource::ElementDerived)?;
        trace!(?element, ?window, chrome = chrome.pixels, ?coordinate, "resolved element");
        Ok(coordinate)
    }

    /// Accepts a point produced outside the page (e.g. a vision model guess).
    /// Only kept for compatibility; element-derived points are preferred.
    pub fn accept_external(&self, x: f64, y: f64, geometry: &ScreenGeometry) -> Result<ScreenCoordinate> {
        warn!(x, y, "using externally supplied coordinate");
        self.finish(x, y, geometry, CoordinateSource::ExternallySupplied)
    }

    fn finish(
        &self,
        x: f64,
        y: f64,
        geometry: &ScreenGeometry,
        source: CoordinateSource,
    ) -> Result<ScreenCoordinate> {
        let (x, y) = if self.scaling_enabled {
            (x * geometry.scale_x, y * geometry.scale_y)
        } else {
            (x, y)
        };

        let bounds = geometry.bounds();
        let (x, y) = (x.round() as i64, y.round() as i64);
        if !bounds.contains(x, y) {
            return Err(DemoError::CoordinateOutOfBounds { x, y, bounds });
        }
        Ok(ScreenCoordinate {
            x: x as i32,
            y: y as i32,
            source,
        })
    }
}
