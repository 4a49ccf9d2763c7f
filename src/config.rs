//! Runtime settings, read from the environment (and `.env` via `dotenvy` in
//! the binary). Unset or empty variables take their defaults; unparsable ones
//! are configuration errors.

use std::str::FromStr;
use std::time::Duration;

use crate::chrome::{ChromeMode, DEFAULT_MAX_CHROME_OFFSET};
use crate::error::{DemoError, Result};
use crate::executor::ExecutorConfig;
use crate::failsafe::AbortRegion;
use crate::geometry::{GeometryConfig, Region};

pub const DEFAULT_CALCULATOR_URL: &str = "https://baiiplus.com/";
pub const DEFAULT_PLANNER_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CHROME_OFFSET: u32 = 70;

#[derive(Debug, Clone)]
pub struct Settings {
    pub geometry: GeometryConfig,
    pub scaling_enabled: bool,
    pub chrome: ChromeMode,
    pub executor: ExecutorConfig,
    pub abort_region: AbortRegion,
    pub pointer_move: Duration,
    pub calculator_url: String,
    pub narration_command: Option<String>,
    pub planner_model: String,
    pub log_level: String,
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v
                .parse::<T>()
                .map_err(|_| DemoError::Configuration(format!("{key}=`{v}` is not valid"))),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(DemoError::Configuration(format!(
                    "{key}=`{v}` is not a boolean"
                ))),
            },
        }
    }

    fn millis(&self, key: &str, default: u64) -> Result<Duration> {
        self.parse(key, default).map(Duration::from_millis)
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup };

        let capture_region = env
            .raw("MONITOR_CAPTURE_REGION")
            .map(|raw| Region::parse(&raw))
            .transpose()?;

        let geometry = GeometryConfig {
            target_monitor: env.parse("TARGET_MONITOR", 0)?,
            physical_width: env.parse("PHYSICAL_SCREEN_WIDTH", 0)?,
            physical_height: env.parse("PHYSICAL_SCREEN_HEIGHT", 0)?,
            logical_width: env.parse("LOGICAL_SCREEN_WIDTH", 0)?,
            logical_height: env.parse("LOGICAL_SCREEN_HEIGHT", 0)?,
            scale_x: env.parse("MANUAL_SCALE_FACTOR_X", 0.0)?,
            scale_y: env.parse("MANUAL_SCALE_FACTOR_Y", 0.0)?,
            capture_region,
        };
        for (axis, scale) in [("X", geometry.scale_x), ("Y", geometry.scale_y)] {
            if !(scale >= 0.0) || !scale.is_finite() {
                return Err(DemoError::Configuration(format!(
                    "MANUAL_SCALE_FACTOR_{axis} must be >= 0, got {scale}"
                )));
            }
        }

        let offset: u32 = env.parse("BROWSER_CHROME_HEIGHT_OFFSET", DEFAULT_CHROME_OFFSET)?;
        let chrome = if env.flag("ENABLE_DYNAMIC_CHROME_CALCULATION", true)? {
            ChromeMode::Dynamic {
                fallback: offset,
                max: env.parse("CHROME_OFFSET_MAX", DEFAULT_MAX_CHROME_OFFSET)?,
            }
        } else {
            ChromeMode::Fixed(offset)
        };

        let defaults = ExecutorConfig::default();
        let executor = ExecutorConfig {
            lookup_retries: env.parse("ELEMENT_LOOKUP_RETRIES", defaults.lookup_retries)?,
            lookup_backoff: env.millis(
                "ELEMENT_LOOKUP_BACKOFF_MS",
                defaults.lookup_backoff.as_millis() as u64,
            )?,
            settle_delay: env.millis("SETTLE_DELAY_MS", defaults.settle_delay.as_millis() as u64)?,
            default_pause: env.millis("PAUSE_DEFAULT_MS", defaults.default_pause.as_millis() as u64)?,
        };

        let abort_region = match env.raw("FAILSAFE_REGION") {
            Some(raw) => AbortRegion::parse(&raw)?,
            None => AbortRegion::default(),
        };

        Ok(Self {
            geometry,
            scaling_enabled: env.flag("ENABLE_COORDINATE_SCALING", true)?,
            chrome,
            executor,
            abort_region,
            pointer_move: env.millis("POINTER_MOVE_MS", 400)?,
            calculator_url: env
                .raw("CALCULATOR_URL")
                .unwrap_or_else(|| DEFAULT_CALCULATOR_URL.to_string()),
            narration_command: env.raw("NARRATION_COMMAND"),
            planner_model: env
                .raw("PLANNER_MODEL")
                .unwrap_or_else(|| DEFAULT_PLANNER_MODEL.to_string()),
            log_level: env
                .raw("LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string())
                .to_ascii_lowercase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.geometry, GeometryConfig::default());
        assert!(s.scaling_enabled);
        assert_eq!(
            s.chrome,
            ChromeMode::Dynamic {
                fallback: DEFAULT_CHROME_OFFSET,
                max: DEFAULT_MAX_CHROME_OFFSET
            }
        );
        assert_eq!(s.executor.lookup_retries, 3);
        assert_eq!(s.abort_region, AbortRegion::Corners { margin: 5 });
        assert_eq!(s.calculator_url, DEFAULT_CALCULATOR_URL);
    }

    #[test]
    fn fixed_chrome_when_dynamic_disabled() {
        let s = settings(&[
            ("ENABLE_DYNAMIC_CHROME_CALCULATION", "false"),
            ("BROWSER_CHROME_HEIGHT_OFFSET", "35"),
        ])
        .unwrap();
        assert_eq!(s.chrome, ChromeMode::Fixed(35));
    }

    #[test]
    fn geometry_and_region() {
        let s = settings(&[
            ("TARGET_MONITOR", "1"),
            ("PHYSICAL_SCREEN_WIDTH", "3840"),
            ("LOGICAL_SCREEN_WIDTH", "2560"),
            ("MANUAL_SCALE_FACTOR_Y", "1.5"),
            ("MONITOR_CAPTURE_REGION", "0,0,1920,1080"),
            ("ENABLE_COORDINATE_SCALING", "FALSE"),
            ("FAILSAFE_REGION", "off"),
        ])
        .unwrap();
        assert_eq!(s.geometry.target_monitor, 1);
        assert_eq!(s.geometry.physical_width, 3840);
        assert_eq!(s.geometry.logical_width, 2560);
        assert_eq!(s.geometry.scale_y, 1.5);
        assert_eq!(s.geometry.capture_region, Some(Region::new(0, 0, 1920, 1080)));
        assert!(!s.scaling_enabled);
        assert_eq!(s.abort_region, AbortRegion::Off);
    }

    #[test]
    fn empty_values_mean_default() {
        let s = settings(&[("MONITOR_CAPTURE_REGION", ""), ("TARGET_MONITOR", " ")]).unwrap();
        assert_eq!(s.geometry.capture_region, None);
        assert_eq!(s.geometry.target_monitor, 0);
    }

    #[test]
    fn bad_values_are_configuration_errors() {
        for pair in [
            ("TARGET_MONITOR", "-1"),
            ("ENABLE_COORDINATE_SCALING", "maybe"),
            ("MANUAL_SCALE_FACTOR_X", "-2"),
            ("BROWSER_CHROME_HEIGHT_OFFSET", "-10"),
            ("MONITOR_CAPTURE_REGION", "1,2"),
        ] {
            let err = settings(&[pair]).unwrap_err();
            assert!(matches!(err, DemoError::Configuration(_)), "{pair:?}");
        }
    }
}
