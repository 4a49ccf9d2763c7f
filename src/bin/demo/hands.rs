use anyhow::{Result, anyhow};
use async_trait::async_trait;
use enigo::{Button, Coordinate, Direction, Enigo, Keyboard, Mouse};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use calc_demo::{
    AbortHandle, BoundingBox, PageQuery, PointerControl, ScreenCoordinate, Selector,
    WindowMetrics, WindowOrigin,
};

use crate::dom;

const DEBUG_ENDPOINT: &str = "http://127.0.0.1:9222";
const TYPE_INTERVAL: Duration = Duration::from_millis(50);
const PRE_CLICK_PAUSE: Duration = Duration::from_millis(80);

/// Browser showing the calculator. Attaches to a Chrome started with
/// `--remote-debugging-port=9222` when there is one, otherwise launches a
/// visible Chrome on a dedicated profile.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn open(url: &str) -> Result<Self> {
        let (browser, tab) = match Browser::connect(DEBUG_ENDPOINT.to_string()) {
            Ok(browser) => {
                info!(endpoint = DEBUG_ENDPOINT, "attached to running Chrome");
                let existing = browser
                    .get_tabs()
                    .lock()
                    .map_err(|_| anyhow!("tab list lock poisoned"))?
                    .first()
                    .cloned();
                let tab = match existing {
                    Some(tab) => tab,
                    None => browser.new_tab()?,
                };
                (browser, tab)
            }
            Err(e) => {
                debug!("no Chrome on {DEBUG_ENDPOINT}: {e}");
                let browser = launch()?;
                let tab = browser.new_tab()?;
                (browser, tab)
            }
        };

        if !tab.get_url().starts_with(url) {
            info!(%url, "opening calculator");
            tab.navigate_to(url)?.wait_until_navigated()?;
        }
        tab.wait_for_element("body")?;

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

fn profile_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| anyhow!("no data directory for the browser profile"))?;
    let dir = base.join("calc-demo").join("chrome-profile");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn launch() -> Result<Browser> {
    let profile = profile_dir()?;
    info!(profile = %profile.display(), "launching Chrome");
    let options = LaunchOptions {
        headless: false,
        user_data_dir: Some(profile),
        window_size: Some((1280, 900)),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-infobars"),
        ],
        idle_browser_timeout: Duration::from_secs(600),
        ..Default::default()
    };
    Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))
}

/// `PageQuery` over a live tab. Every call runs the blocking CDP round trip
/// on the blocking pool.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    async fn with_tab<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Arc<Tab>) -> Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| anyhow!("page task panicked: {e}"))?
    }
}

#[async_trait]
impl PageQuery for ChromePage {
    async fn find_element(&self, selector: &Selector) -> Result<Option<BoundingBox>> {
        let selector = selector.clone();
        self.with_tab(move |tab| dom::element_box(tab, &selector)).await
    }

    async fn window_origin(&self) -> Result<WindowOrigin> {
        self.with_tab(dom::window_origin).await
    }

    async fn window_metrics(&self) -> Result<WindowMetrics> {
        self.with_tab(dom::window_metrics).await
    }
}

/// Quadratic Bézier from `from` to `to` through a control point pushed
/// sideways by `bend` times the distance. Endpoints are exact.
pub fn curved_path(from: (i32, i32), to: (i32, i32), points: usize, bend: f64) -> Vec<(i32, i32)> {
    let points = points.max(2);
    let (sx, sy) = (from.0 as f64, from.1 as f64);
    let (ex, ey) = (to.0 as f64, to.1 as f64);
    let (dx, dy) = (ex - sx, ey - sy);
    let distance = dx.hypot(dy);

    let (mut cx, mut cy) = (sx + dx / 2.0, sy + dy / 2.0);
    if distance > 0.0 {
        cx += -dy / distance * bend * distance;
        cy += dx / distance * bend * distance;
    }

    (0..points)
        .map(|i| {
            let t = i as f64 / (points - 1) as f64;
            let u = 1.0 - t;
            let x = u * u * sx + 2.0 * u * t * cx + t * t * ex;
            let y = u * u * sy + 2.0 * u * t * cy + t * t * ey;
            (x.round() as i32, y.round() as i32)
        })
        .collect()
}

/// Real pointer and keyboard via `enigo`. Moves glide along a slightly
/// curved path over `move_duration`.
pub struct EnigoPointer {
    enigo: Mutex<Enigo>,
    move_duration: Duration,
}

impl EnigoPointer {
    pub fn new(move_duration: Duration) -> Result<Self> {
        let enigo = Enigo::new(&enigo::Settings::default())
            .map_err(|e| anyhow!("input device unavailable: {e:?}"))?;
        Ok(Self {
            enigo: Mutex::new(enigo),
            move_duration,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Enigo>> {
        self.enigo.lock().map_err(|_| anyhow!("input device lock poisoned"))
    }

    fn glide(&self, enigo: &mut Enigo, target: ScreenCoordinate) -> Result<()> {
        let from = enigo.location().map_err(|e| anyhow!("{e:?}"))?;
        let to = (target.x, target.y);
        if self.move_duration.is_zero() || from == to {
            return enigo
                .move_mouse(to.0, to.1, Coordinate::Abs)
                .map_err(|e| anyhow!("{e:?}"));
        }

        let points = ((self.move_duration.as_secs_f64() * 60.0) as usize).max(10);
        let side = if rand::random::<bool>() { 1.0 } else { -1.0 };
        let bend = side * (0.05 + rand::random::<f64>() * 0.1);
        let per_point = self.move_duration.as_secs_f64() / points as f64;

        for (x, y) in curved_path(from, to, points, bend) {
            enigo
                .move_mouse(x, y, Coordinate::Abs)
                .map_err(|e| anyhow!("{e:?}"))?;
            let jitter = 0.8 + rand::random::<f64>() * 0.4;
            std::thread::sleep(Duration::from_secs_f64(per_point * jitter));
        }
        Ok(())
    }
}

impl PointerControl for EnigoPointer {
    fn move_to(&self, target: ScreenCoordinate) -> Result<()> {
        let mut enigo = self.lock()?;
        self.glide(&mut enigo, target)
    }

    fn move_and_click(&self, target: ScreenCoordinate) -> Result<()> {
        let mut enigo = self.lock()?;
        self.glide(&mut enigo, target)?;
        std::thread::sleep(PRE_CLICK_PAUSE);
        enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| anyhow!("click failed: {e:?}"))
    }

    fn type_text(&self, text: &str) -> Result<()> {
        let mut enigo = self.lock()?;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            enigo
                .text(ch.encode_utf8(&mut buf))
                .map_err(|e| anyhow!("type failed: {e:?}"))?;
            std::thread::sleep(TYPE_INTERVAL);
        }
        Ok(())
    }

    fn position(&self) -> Result<(i32, i32)> {
        self.lock()?.location().map_err(|e| anyhow!("{e:?}"))
    }
}

/// Registers Ctrl+Shift+Escape as the emergency stop. The returned manager
/// must stay alive for the hotkey to remain registered.
pub fn arm_stop_hotkey(abort: AbortHandle) -> Result<GlobalHotKeyManager> {
    let hotkey = HotKey::new(Some(Modifiers::CONTROL | Modifiers::SHIFT), Code::Escape);
    let manager = GlobalHotKeyManager::new().map_err(|e| anyhow!("hotkey manager: {e}"))?;
    manager
        .register(hotkey)
        .map_err(|e| anyhow!("register Ctrl+Shift+Escape: {e}"))?;

    let id = hotkey.id();
    std::thread::spawn(move || {
        let receiver = GlobalHotKeyEvent::receiver();
        while let Ok(event) = receiver.recv() {
            if event.id() == id && event.state() == HotKeyState::Pressed {
                abort.trip("emergency-stop hotkey pressed");
            }
        }
    });
    info!("emergency stop armed on Ctrl+Shift+Escape");
    Ok(manager)
}

/// Best effort: a desktop without a hotkey service still has the pointer
/// fail-safe.
pub fn try_arm_stop_hotkey(abort: AbortHandle) -> Option<GlobalHotKeyManager> {
    match arm_stop_hotkey(abort) {
        Ok(manager) => Some(manager),
        Err(e) => {
            warn!("emergency-stop hotkey unavailable: {e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_hits_both_endpoints() {
        let path = curved_path((10, 20), (500, 300), 25, 0.12);
        assert_eq!(path.len(), 25);
        assert_eq!(path.first(), Some(&(10, 20)));
        assert_eq!(path.last(), Some(&(500, 300)));
    }

    #[test]
    fn straight_when_not_bent() {
        let path = curved_path((0, 0), (100, 0), 11, 0.0);
        assert!(path.iter().all(|&(_, y)| y == 0));
        assert_eq!(path[5], (50, 0));
    }

    #[test]
    fn bend_pushes_the_midpoint_sideways() {
        let left = curved_path((0, 0), (200, 0), 3, 0.1);
        let right = curved_path((0, 0), (200, 0), 3, -0.1);
        // Control point sits 20px off the line; the curve reaches half of it.
        assert_eq!(left[1], (100, 10));
        assert_eq!(right[1], (100, -10));
    }

    #[test]
    fn zero_distance_is_a_single_spot() {
        let path = curved_path((7, 7), (7, 7), 4, 0.3);
        assert!(path.iter().all(|&p| p == (7, 7)));
    }
}
