use calc_demo::geometry::{DisplayInfo, DisplaySource};
use calc_demo::{
    BoundingBox, ChromeOffset, CoordinateResolver, DemoError, GeometryConfig, GeometryProvider,
    Settings, WindowOrigin,
};
use std::collections::HashMap;

struct Desk(Vec<DisplayInfo>);

impl DisplaySource for Desk {
    fn displays(&self) -> anyhow::Result<Vec<DisplayInfo>> {
        Ok(self.0.clone())
    }
}

fn laptop_and_monitor() -> Desk {
    Desk(vec![
        DisplayInfo {
            name: "external".into(),
            x: 1440,
            y: 0,
            width: 1920,
            height: 1080,
            scale_factor: 1.0,
            is_primary: false,
        },
        DisplayInfo {
            name: "built-in".into(),
            x: 0,
            y: 0,
            width: 1440,
            height: 900,
            scale_factor: 2.0,
            is_primary: true,
        },
    ])
}

fn settings(pairs: &[(&str, &str)]) -> Settings {
    let map: HashMap<&str, &str> = pairs.iter().copied().collect();
    Settings::from_lookup(|k| map.get(k).map(|v| v.to_string())).unwrap()
}

#[test]
fn retina_primary_from_environment() {
    let s = settings(&[
        ("PHYSICAL_SCREEN_WIDTH", "3840"),
        ("PHYSICAL_SCREEN_HEIGHT", "2160"),
        ("LOGICAL_SCREEN_WIDTH", "2560"),
        ("LOGICAL_SCREEN_HEIGHT", "1440"),
    ]);
    let geometry = GeometryProvider::new(s.geometry, laptop_and_monitor())
        .current()
        .unwrap();
    assert_eq!((geometry.scale_x, geometry.scale_y), (1.5, 1.5));

    let c = CoordinateResolver::new(s.scaling_enabled)
        .resolve(
            &BoundingBox::new(400.0, 600.0, 0.0, 0.0),
            WindowOrigin::default(),
            &ChromeOffset::fixed(0),
            &geometry,
        )
        .unwrap();
    assert_eq!((c.x, c.y), (600, 900));
}

#[test]
fn scaling_disabled_ignores_mismatch() {
    let s = settings(&[
        ("PHYSICAL_SCREEN_WIDTH", "3840"),
        ("PHYSICAL_SCREEN_HEIGHT", "2160"),
        ("LOGICAL_SCREEN_WIDTH", "2560"),
        ("LOGICAL_SCREEN_HEIGHT", "1440"),
        ("ENABLE_COORDINATE_SCALING", "false"),
    ]);
    let geometry = GeometryProvider::new(s.geometry, laptop_and_monitor())
        .current()
        .unwrap();
    let resolver = CoordinateResolver::new(s.scaling_enabled);
    for (x, y) in [(0.0, 0.0), (400.0, 600.0), (2559.0, 1439.0), (3000.0, 2000.0)] {
        let c = resolver
            .resolve(
                &BoundingBox::new(x, y, 0.0, 0.0),
                WindowOrigin::default(),
                &ChromeOffset::fixed(0),
                &geometry,
            )
            .unwrap();
        assert_eq!((c.x as f64, c.y as f64), (x, y));
    }
}

#[test]
fn every_center_stays_inside_or_errors() {
    let geometry = GeometryProvider::new(GeometryConfig::default(), laptop_and_monitor())
        .current()
        .unwrap();
    let bounds = geometry.bounds();
    let resolver = CoordinateResolver::new(true);
    for step in 0..40 {
        let x = step as f64 * 97.0 - 200.0;
        let y = step as f64 * 61.0 - 100.0;
        let b = BoundingBox::new(x, y, 30.0, 18.0);
        match resolver.resolve(&b, WindowOrigin { x: 20, y: 40 }, &ChromeOffset::fixed(70), &geometry) {
            Ok(c) => assert!(bounds.contains(c.x as i64, c.y as i64), "{c:?} outside {bounds}"),
            Err(DemoError::CoordinateOutOfBounds { x, y, .. }) => {
                assert!(!bounds.contains(x, y))
            }
            Err(other) => panic!("unexpected {other}"),
        }
    }
}

#[test]
fn second_monitor_adds_its_origin() {
    let config = GeometryConfig {
        target_monitor: 1,
        ..Default::default()
    };
    let geometry = GeometryProvider::new(config, laptop_and_monitor())
        .current()
        .unwrap();
    assert_eq!(geometry.origin(), (1440, 0));

    let c = CoordinateResolver::new(true)
        .resolve(
            &BoundingBox::new(200.0, 10.0, 50.0, 20.0),
            WindowOrigin { x: 100, y: 50 },
            &ChromeOffset::fixed(35),
            &geometry,
        )
        .unwrap();
    assert_eq!((c.x, c.y), (1440 + 325, 105));
}

#[test]
fn missing_monitor_fails_at_startup() {
    let config = GeometryConfig {
        target_monitor: 3,
        ..Default::default()
    };
    let err = GeometryProvider::new(config, laptop_and_monitor())
        .current()
        .unwrap_err();
    assert!(matches!(err, DemoError::Configuration(_)));
}
