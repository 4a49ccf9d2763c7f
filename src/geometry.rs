use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DemoError, Result};

/// Axis-aligned screen rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Half-open containment: `[x, x + width) × [y, y + height)`.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x as i64 && x < self.right() && y >= self.y as i64 && y < self.bottom()
    }

    /// Parses `"x,y,width,height"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(DemoError::Configuration(format!(
                "region `{raw}` must be `x,y,width,height`"
            )));
        }
        let bad = |what: &str| DemoError::Configuration(format!("region `{raw}`: invalid {what}"));
        let x = parts[0].parse::<i32>().map_err(|_| bad("x"))?;
        let y = parts[1].parse::<i32>().map_err(|_| bad("y"))?;
        let width = parts[2].parse::<u32>().map_err(|_| bad("width"))?;
        let height = parts[3].parse::<u32>().map_err(|_| bad("height"))?;
        if width == 0 || height == 0 {
            return Err(DemoError::Configuration(format!(
                "region `{raw}` has an empty area"
            )));
        }
        Ok(Self::new(x, y, width, height))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})x[{}, {})",
            self.x,
            self.right(),
            self.y,
            self.bottom()
        )
    }
}

/// One display as reported by the operating system. `width`/`height` are in
/// logical pixels; `scale_factor` maps them to panel pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayInfo {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub scale_factor: f32,
    pub is_primary: bool,
}

pub trait DisplaySource: Send + Sync {
    fn displays(&self) -> anyhow::Result<Vec<DisplayInfo>>;
}

/// Display enumeration through `xcap`.
pub struct XcapDisplays;

impl DisplaySource for XcapDisplays {
    fn displays(&self) -> anyhow::Result<Vec<DisplayInfo>> {
        let monitors = xcap::Monitor::all()?;
        let mut out = Vec::with_capacity(monitors.len());
        for mon in monitors {
            out.push(DisplayInfo {
                name: mon.name()?,
                x: mon.x()?,
                y: mon.y()?,
                width: mon.width()?,
                height: mon.height()?,
                scale_factor: mon.scale_factor()?,
                is_primary: mon.is_primary()?,
            });
        }
        Ok(out)
    }
}

/// Operator-supplied geometry. Zero means "auto-detect" for every dimension
/// and scale factor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryConfig {
    pub target_monitor: usize,
    pub physical_width: u32,
    pub physical_height: u32,
    pub logical_width: u32,
    pub logical_height: u32,
    pub scale_x: f64,
    pub scale_y: f64,
    pub capture_region: Option<Region>,
}

/// Resolved, immutable description of the monitor the demonstration runs on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreenGeometry {
    pub physical_width: u32,
    pub physical_height: u32,
    pub logical_width: u32,
    pub logical_height: u32,
    pub scale_x: f64,
    pub scale_y: f64,
    pub target_monitor: usize,
    pub monitor_x: i32,
    pub monitor_y: i32,
    pub capture_region: Option<Region>,
}

impl ScreenGeometry {
    /// Physical bounds of the active monitor; an explicit capture region wins.
    pub fn bounds(&self) -> Region {
        self.capture_region.unwrap_or(Region::new(
            self.monitor_x,
            self.monitor_y,
            self.physical_width,
            self.physical_height,
        ))
    }

    pub fn origin(&self) -> (i32, i32) {
        let b = self.bounds();
        (b.x, b.y)
    }
}

/// Primary display first, the rest ordered by origin so indices are stable
/// across runs.
pub fn order_displays(mut displays: Vec<DisplayInfo>) -> Vec<DisplayInfo> {
    displays.sort_by(|a, b| {
        b.is_primary
            .cmp(&a.is_primary)
            .then(a.x.cmp(&b.x))
            .then(a.y.cmp(&b.y))
    });
    displays
}

fn pick(configured: u32, detected: u32) -> u32 {
    if configured > 0 { configured } else { detected }
}

fn scale_factor(axis: &str, manual: f64, physical: u32, logical: u32) -> Result<f64> {
    if manual.is_nan() || manual < 0.0 {
        return Err(DemoError::Configuration(format!(
            "manual {axis} scale factor must be positive, got {manual}"
        )));
    }
    if manual > 0.0 {
        return Ok(manual);
    }
    Ok(physical as f64 / logical as f64)
}

/// Combines configuration with the detected displays into a geometry snapshot.
pub fn resolve_geometry(config: &GeometryConfig, displays: Vec<DisplayInfo>) -> Result<ScreenGeometry> {
    let displays = order_displays(displays);
    if displays.is_empty() {
        return Err(DemoError::Configuration("no displays detected".into()));
    }
    let target = displays.get(config.target_monitor).ok_or_else(|| {
        DemoError::Configuration(format!(
            "target_monitor {} has no display ({} detected)",
            config.target_monitor,
            displays.len()
        ))
    })?;

    let native_scale = if target.scale_factor > 0.0 {
        target.scale_factor as f64
    } else {
        1.0
    };
    let logical_width = pick(config.logical_width, target.width);
    let logical_height = pick(config.logical_height, target.height);
    let physical_width = pick(
        config.physical_width,
        (target.width as f64 * native_scale).round() as u32,
    );
    let physical_height = pick(
        config.physical_height,
        (target.height as f64 * native_scale).round() as u32,
    );

    if logical_width == 0 || logical_height == 0 || physical_width == 0 || physical_height == 0 {
        return Err(DemoError::Configuration(format!(
            "display dimensions must be non-zero (physical {physical_width}x{physical_height}, logical {logical_width}x{logical_height})"
        )));
    }
    if logical_width > physical_width || logical_height > physical_height {
        return Err(DemoError::Configuration(format!(
            "logical resolution {logical_width}x{logical_height} exceeds physical {physical_width}x{physical_height}"
        )));
    }

    let scale_x = scale_factor("x", config.scale_x, physical_width, logical_width)?;
    let scale_y = scale_factor("y", config.scale_y, physical_height, logical_height)?;

    let geometry = ScreenGeometry {
        physical_width,
        physical_height,
        logical_width,
        logical_height,
        scale_x,
        scale_y,
        target_monitor: config.target_monitor,
        monitor_x: target.x,
        monitor_y: target.y,
        capture_region: config.capture_region,
    };
    debug!(display = %target.name, ?geometry, "resolved screen geometry");
    Ok(geometry)
}

/// Resolves [`ScreenGeometry`] from configuration and the OS, caching the
/// snapshot for the session.
pub struct GeometryProvider<S: DisplaySource> {
    config: GeometryConfig,
    source: S,
    cached: Mutex<Option<ScreenGeometry>>,
}

impl<S: DisplaySource> GeometryProvider<S> {
    pub fn new(config: GeometryConfig, source: S) -> Self {
        Self {
            config,
            source,
            cached: Mutex::new(None),
        }
    }

    /// Fresh query, bypassing the cache.
    pub fn resolve(&self) -> Result<ScreenGeometry> {
        let displays = self.source.displays().map_err(|e| {
            DemoError::Configuration(format!("display enumeration failed: {e:#}"))
        })?;
        resolve_geometry(&self.config, displays)
    }

    pub fn current(&self) -> Result<ScreenGeometry> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(geometry) = *cached {
            return Ok(geometry);
        }
        let geometry = self.resolve()?;
        info!(
            monitor = geometry.target_monitor,
            bounds = %geometry.bounds(),
            scale_x = geometry.scale_x,
            scale_y = geometry.scale_y,
            "screen geometry ready"
        );
        *cached = Some(geometry);
        Ok(geometry)
    }

    /// Re-queries the displays and swaps in a new snapshot. Values handed out
    /// earlier are unaffected.
    pub fn recalibrate(&self) -> Result<ScreenGeometry> {
        let geometry = self.resolve()?;
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = Some(geometry);
        info!(bounds = %geometry.bounds(), "screen geometry recalibrated");
        Ok(geometry)
    }
}
