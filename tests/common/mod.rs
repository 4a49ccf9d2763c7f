#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use calc_demo::{
    AbortHandle, BoundingBox, ExecutorConfig, NarrationSink, PageQuery, PointerControl,
    ScreenCoordinate, ScreenGeometry, Selector, WindowMetrics, WindowOrigin,
};

/// Shared, ordered record of everything the fakes were asked to do.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakePage {
    elements: HashMap<String, BoundingBox>,
    pub origin: WindowOrigin,
    pub metrics: Option<WindowMetrics>,
    pub lookups: AtomicUsize,
    /// Tripped on the first lookup, to simulate an emergency stop mid-retry.
    pub trip_on_lookup: Option<AbortHandle>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
            origin: WindowOrigin::default(),
            metrics: None,
            lookups: AtomicUsize::new(0),
            trip_on_lookup: None,
        }
    }

    pub fn with(mut self, selector: &str, bounds: BoundingBox) -> Self {
        self.elements.insert(selector.to_string(), bounds);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageQuery for FakePage {
    async fn find_element(&self, selector: &Selector) -> anyhow::Result<Option<BoundingBox>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = &self.trip_on_lookup {
            handle.trip("stop pressed");
        }
        Ok(self.elements.get(selector.as_str()).copied())
    }

    async fn window_origin(&self) -> anyhow::Result<WindowOrigin> {
        Ok(self.origin)
    }

    async fn window_metrics(&self) -> anyhow::Result<WindowMetrics> {
        self.metrics
            .ok_or_else(|| anyhow::anyhow!("metrics unavailable"))
    }
}

pub struct FakePointer {
    journal: Journal,
    pub position: Mutex<(i32, i32)>,
    pub fail_clicks: bool,
}

impl FakePointer {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            position: Mutex::new((960, 540)),
            fail_clicks: false,
        }
    }
}

impl PointerControl for FakePointer {
    fn move_to(&self, target: ScreenCoordinate) -> anyhow::Result<()> {
        *self.position.lock().unwrap() = (target.x, target.y);
        self.journal.push(format!("move:{},{}", target.x, target.y));
        Ok(())
    }

    fn move_and_click(&self, target: ScreenCoordinate) -> anyhow::Result<()> {
        if self.fail_clicks {
            anyhow::bail!("input device unavailable");
        }
        *self.position.lock().unwrap() = (target.x, target.y);
        self.journal.push(format!("click:{},{}", target.x, target.y));
        Ok(())
    }

    fn type_text(&self, text: &str) -> anyhow::Result<()> {
        self.journal.push(format!("type:{text}"));
        Ok(())
    }

    fn position(&self) -> anyhow::Result<(i32, i32)> {
        Ok(*self.position.lock().unwrap())
    }
}

pub struct FakeNarrator {
    journal: Journal,
    pub trip_on_speak: Option<AbortHandle>,
}

impl FakeNarrator {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            trip_on_speak: None,
        }
    }
}

#[async_trait]
impl NarrationSink for FakeNarrator {
    async fn speak(&self, text: &str) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.journal.push(format!("say:{text}"));
        if let Some(handle) = &self.trip_on_speak {
            handle.trip("stop pressed");
        }
        Ok(())
    }
}

pub fn screen(width: u32, height: u32) -> ScreenGeometry {
    ScreenGeometry {
        physical_width: width,
        physical_height: height,
        logical_width: width,
        logical_height: height,
        scale_x: 1.0,
        scale_y: 1.0,
        target_monitor: 0,
        monitor_x: 0,
        monitor_y: 0,
        capture_region: None,
    }
}

pub fn fast_config(retries: u32) -> ExecutorConfig {
    ExecutorConfig {
        lookup_retries: retries,
        lookup_backoff: Duration::from_millis(1),
        settle_delay: Duration::from_millis(1),
        default_pause: Duration::from_millis(1),
    }
}
