//! Drives a web calculator on the operator's screen from a declarative list of
//! narration and interaction steps.
//!
//! The pipeline is: [`plan::ExecutionPlan::parse`] validates the planner's raw
//! steps, [`executor::PlanExecutor`] walks them in order, and for every
//! interaction [`resolver::CoordinateResolver`] maps the element's page box to
//! a physical pointer position using the session's
//! [`geometry::ScreenGeometry`] and [`chrome::ChromeOffset`].

pub mod actuators;
pub mod chrome;
pub mod config;
pub mod error;
pub mod executor;
pub mod failsafe;
pub mod geometry;
pub mod page;
pub mod plan;
pub mod resolver;

pub use actuators::{NarrationSink, PlanSource, PointerControl};
pub use chrome::{ChromeCalibrator, ChromeMode, ChromeOffset, OffsetSource};
pub use config::Settings;
pub use error::{DemoError, ErrorKind};
pub use executor::{ExecutionEvent, ExecutionResult, ExecutorConfig, PlanExecutor, RunState};
pub use failsafe::{AbortHandle, AbortRegion, FailSafe};
pub use geometry::{GeometryConfig, GeometryProvider, Region, ScreenGeometry, XcapDisplays};
pub use page::{
    BoundingBox, ElementLocation, PageQuery, Selector, SelectorKind, WindowMetrics, WindowOrigin,
};
pub use plan::{ExecutionPlan, PlanStep, TimingHint, parse_plan_text};
pub use resolver::{CoordinateResolver, CoordinateSource, ScreenCoordinate};
