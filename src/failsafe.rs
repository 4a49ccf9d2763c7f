use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::actuators::PointerControl;
use crate::error::{DemoError, Result};
use crate::geometry::Region;

/// Screen area that stops a run when the pointer enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortRegion {
    Off,
    /// Any corner of the monitor, within `margin` pixels.
    Corners { margin: u32 },
    Rect(Region),
}

impl Default for AbortRegion {
    fn default() -> Self {
        AbortRegion::Corners { margin: 5 }
    }
}

impl AbortRegion {
    /// Accepts `off`, `corners`, `corners:<margin>` or `x,y,width,height`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("off") || raw.eq_ignore_ascii_case("none") {
            return Ok(AbortRegion::Off);
        }
        if raw.eq_ignore_ascii_case("corners") {
            return Ok(AbortRegion::default());
        }
        if let Some(margin) = raw.strip_prefix("corners:") {
            let margin = margin.trim().parse::<u32>().map_err(|_| {
                DemoError::Configuration(format!("fail-safe margin `{margin}` is not a number"))
            })?;
            return Ok(AbortRegion::Corners { margin });
        }
        Region::parse(raw).map(AbortRegion::Rect)
    }

    pub fn contains(&self, x: i32, y: i32, screen: &Region) -> bool {
        let (x, y) = (x as i64, y as i64);
        match self {
            AbortRegion::Off => false,
            AbortRegion::Rect(region) => region.contains(x, y),
            AbortRegion::Corners { margin } => {
                let m = *margin as i64;
                let near_left = x <= screen.x as i64 + m;
                let near_right = x >= screen.right() - 1 - m;
                let near_top = y <= screen.y as i64 + m;
                let near_bottom = y >= screen.bottom() - 1 - m;
                (near_left || near_right) && (near_top || near_bottom)
            }
        }
    }
}

/// Shared stop flag. The first trip wins and records why.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    reason: Arc<OnceLock<String>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.reason.set(reason.clone()).is_ok() {
            warn!(%reason, "emergency stop requested");
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    pub fn is_tripped(&self) -> bool {
        self.reason.get().is_some()
    }
}

/// Polled before every step transition and between lookup retries.
#[derive(Debug, Clone)]
pub struct FailSafe {
    region: AbortRegion,
    screen: Region,
    handle: AbortHandle,
}

impl FailSafe {
    pub fn new(region: AbortRegion, screen: Region, handle: AbortHandle) -> Self {
        Self {
            region,
            screen,
            handle,
        }
    }

    pub fn handle(&self) -> &AbortHandle {
        &self.handle
    }

    /// `Some(reason)` once the run must stop.
    pub fn check(&self, pointer: &dyn PointerControl) -> Option<String> {
        if let Some(reason) = self.handle.reason() {
            return Some(reason.to_string());
        }
        if self.region == AbortRegion::Off {
            return None;
        }
        match pointer.position() {
            Ok((x, y)) if self.region.contains(x, y, &self.screen) => {
                self.handle.trip(format!("pointer entered abort region at ({x}, {y})"));
                self.handle.reason().map(String::from)
            }
            Ok(_) => None,
            Err(e) => {
                debug!("pointer position unavailable: {e:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: Region = Region {
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
    };

    #[test]
    fn corners_hit_only_near_corners() {
        let corners = AbortRegion::Corners { margin: 5 };
        assert!(corners.contains(0, 0, &SCREEN));
        assert!(corners.contains(1919, 1079, &SCREEN));
        assert!(corners.contains(1915, 3, &SCREEN));
        assert!(!corners.contains(960, 0, &SCREEN));
        assert!(!corners.contains(0, 540, &SCREEN));
    }

    #[test]
    fn parse_variants() {
        assert_eq!(AbortRegion::parse("off").unwrap(), AbortRegion::Off);
        assert_eq!(
            AbortRegion::parse("corners:12").unwrap(),
            AbortRegion::Corners { margin: 12 }
        );
        assert_eq!(
            AbortRegion::parse("0,0,10,10").unwrap(),
            AbortRegion::Rect(Region::new(0, 0, 10, 10))
        );
        assert!(AbortRegion::parse("corners:x").is_err());
    }

    #[test]
    fn first_trip_reason_is_kept() {
        let handle = AbortHandle::new();
        assert!(!handle.is_tripped());
        handle.trip("hotkey");
        handle.trip("corner");
        assert_eq!(handle.reason(), Some("hotkey"));
    }
}
