use serde::Serialize;
use tracing::{debug, warn};

use crate::page::PageQuery;

/// Largest chrome height accepted from a live measurement.
pub const DEFAULT_MAX_CHROME_OFFSET: u32 = 200;

/// Where the viewport-top offset comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromeMode {
    /// Operator-configured constant; no measurement is taken.
    Fixed(u32),
    /// Measure `outerHeight - innerHeight`; use `fallback` when the result is
    /// negative or larger than `max`.
    Dynamic { fallback: u32, max: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OffsetSource {
    Fixed,
    Measured,
    /// Dynamic measurement rejected; `reason` says why.
    Fallback { reason: String },
}

/// Vertical distance in pixels from the window's outer top to the viewport top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChromeOffset {
    pub pixels: u32,
    pub source: OffsetSource,
}

impl ChromeOffset {
    pub fn fixed(pixels: u32) -> Self {
        Self {
            pixels,
            source: OffsetSource::Fixed,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, OffsetSource::Fallback { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChromeCalibrator {
    mode: ChromeMode,
}

impl ChromeCalibrator {
    pub fn new(mode: ChromeMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ChromeMode {
        self.mode
    }

    pub async fn calibrate(&self, page: &dyn PageQuery) -> ChromeOffset {
        let (fallback, max) = match self.mode {
            ChromeMode::Fixed(pixels) => return ChromeOffset::fixed(pixels),
            ChromeMode::Dynamic { fallback, max } => (fallback, max),
        };

        let reason = match page.window_metrics().await {
            Ok(metrics) => {
                let diff = metrics.outer_height - metrics.inner_height;
                if diff < 0 {
                    format!("measured negative chrome height {diff}px")
                } else if diff > max as i64 {
                    format!("measured chrome height {diff}px exceeds {max}px")
                } else {
                    debug!(
                        outer = metrics.outer_height,
                        inner = metrics.inner_height,
                        offset = diff,
                        "measured browser chrome"
                    );
                    return ChromeOffset {
                        pixels: diff as u32,
                        source: OffsetSource::Measured,
                    };
                }
            }
            Err(e) => format!("window metrics unavailable: {e:#}"),
        };

        warn!(fallback, %reason, "chrome calibration fell back to configured offset");
        ChromeOffset {
            pixels: fallback,
            source: OffsetSource::Fallback { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{BoundingBox, Selector, WindowMetrics, WindowOrigin};
    use async_trait::async_trait;

    struct Metrics(Option<WindowMetrics>);

    #[async_trait]
    impl PageQuery for Metrics {
        async fn find_element(&self, _: &Selector) -> anyhow::Result<Option<BoundingBox>> {
            Ok(None)
        }
        async fn window_origin(&self) -> anyhow::Result<WindowOrigin> {
            Ok(WindowOrigin::default())
        }
        async fn window_metrics(&self) -> anyhow::Result<WindowMetrics> {
            self.0.ok_or_else(|| anyhow::anyhow!("page closed"))
        }
    }

    fn metrics(outer: i64, inner: i64) -> Metrics {
        Metrics(Some(WindowMetrics {
            outer_height: outer,
            inner_height: inner,
        }))
    }

    const DYNAMIC: ChromeMode = ChromeMode::Dynamic {
        fallback: 70,
        max: DEFAULT_MAX_CHROME_OFFSET,
    };

    #[tokio::test]
    async fn fixed_mode_never_measures() {
        let offset = ChromeCalibrator::new(ChromeMode::Fixed(35))
            .calibrate(&Metrics(None))
            .await;
        assert_eq!(offset, ChromeOffset::fixed(35));
    }

    #[tokio::test]
    async fn dynamic_mode_uses_difference() {
        let offset = ChromeCalibrator::new(DYNAMIC).calibrate(&metrics(900, 815)).await;
        assert_eq!(offset.pixels, 85);
        assert_eq!(offset.source, OffsetSource::Measured);
    }

    #[tokio::test]
    async fn negative_measurement_falls_back() {
        let offset = ChromeCalibrator::new(DYNAMIC).calibrate(&metrics(700, 800)).await;
        assert_eq!(offset.pixels, 70);
        assert!(offset.is_fallback());
    }

    #[tokio::test]
    async fn implausible_measurement_falls_back() {
        let offset = ChromeCalibrator::new(DYNAMIC).calibrate(&metrics(1200, 900)).await;
        assert!(offset.is_fallback());
        assert_eq!(offset.pixels, 70);
    }

    #[tokio::test]
    async fn measurement_error_falls_back() {
        let offset = ChromeCalibrator::new(DYNAMIC).calibrate(&Metrics(None)).await;
        match offset.source {
            OffsetSource::Fallback { reason } => assert!(reason.contains("page closed")),
            other => panic!("expected fallback, got {other:?}"),
        }
    }
}
