use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::actuators::{NarrationSink, PointerControl};
use crate::chrome::{ChromeCalibrator, ChromeMode, ChromeOffset};
use crate::config::Settings;
use crate::error::{DemoError, Result};
use crate::failsafe::{AbortHandle, AbortRegion, FailSafe};
use crate::geometry::ScreenGeometry;
use crate::page::{ElementLocation, PageQuery, Selector};
use crate::plan::{ExecutionPlan, Interaction, InteractionStep, PlanStep, TimingHint, VoiceStep};
use crate::resolver::CoordinateResolver;

/// Longest uninterrupted sleep; the fail-safe is polled between slices.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Extra lookups after the first one fails.
    pub lookup_retries: u32,
    /// Linear backoff unit: the n-th retry waits `n * lookup_backoff`.
    pub lookup_backoff: Duration,
    /// Pause around interactions for `before_`/`after_interaction` hints.
    pub settle_delay: Duration,
    /// `pause` length when the step gives no `duration`.
    pub default_pause: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            lookup_retries: 3,
            lookup_backoff: Duration::from_millis(250),
            settle_delay: Duration::from_millis(500),
            default_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Aborted)
    }
}

#[derive(Debug)]
pub struct StepFailure {
    pub index: usize,
    pub error: DemoError,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub index: usize,
    pub kind: &'static str,
    /// Offset from the start of the run.
    pub started_at: Duration,
    pub elapsed: Duration,
    pub completed: bool,
}

#[derive(Debug)]
pub struct ExecutionResult {
    pub state: RunState,
    /// Steps fully dispatched. Their effects on the calculator are not undone.
    pub steps_completed: usize,
    pub failure: Option<StepFailure>,
    pub timings: Vec<StepTiming>,
    pub chrome_offset: Option<ChromeOffset>,
}

impl ExecutionResult {
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn failed_index(&self) -> Option<usize> {
        self.failure.as_ref().map(|f| f.index)
    }
}

/// Progress notifications for observers such as the live console.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted {
        steps: usize,
    },
    StepStarted {
        index: usize,
        total: usize,
        summary: String,
    },
    Narration {
        index: usize,
        text: String,
    },
    StepCompleted {
        index: usize,
        elapsed_ms: u64,
    },
    RunFinished {
        state: RunState,
        steps_completed: usize,
        failed_index: Option<usize>,
        error: Option<String>,
    },
}

/// Bookkeeping for one run; enforces that terminal states are final.
struct Run {
    state: RunState,
    started: Instant,
    steps_completed: usize,
    timings: Vec<StepTiming>,
    narrations: Vec<JoinHandle<()>>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: RunState::Pending,
            started: Instant::now(),
            steps_completed: 0,
            timings: Vec::new(),
            narrations: Vec::new(),
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.state.is_terminal() {
            warn!(from = ?self.state, to = ?next, "ignoring transition out of terminal state");
            return;
        }
        debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }
}

/// Walks a validated plan one step at a time against the live screen.
pub struct PlanExecutor {
    page: Arc<dyn PageQuery>,
    pointer: Arc<dyn PointerControl>,
    narrator: Arc<dyn NarrationSink>,
    geometry: ScreenGeometry,
    resolver: CoordinateResolver,
    calibrator: ChromeCalibrator,
    failsafe: FailSafe,
    config: ExecutorConfig,
    events: Option<broadcast::Sender<ExecutionEvent>>,
}

impl PlanExecutor {
    pub fn new(
        page: Arc<dyn PageQuery>,
        pointer: Arc<dyn PointerControl>,
        narrator: Arc<dyn NarrationSink>,
        geometry: ScreenGeometry,
    ) -> Self {
        Self {
            page,
            pointer,
            narrator,
            geometry,
            resolver: CoordinateResolver::new(true),
            calibrator: ChromeCalibrator::new(ChromeMode::Fixed(0)),
            failsafe: FailSafe::new(AbortRegion::Off, geometry.bounds(), AbortHandle::new()),
            config: ExecutorConfig::default(),
            events: None,
        }
    }

    /// Executor wired the way `settings` describe, sharing `abort` with any
    /// other emergency-stop source.
    pub fn from_settings(
        settings: &Settings,
        geometry: ScreenGeometry,
        page: Arc<dyn PageQuery>,
        pointer: Arc<dyn PointerControl>,
        narrator: Arc<dyn NarrationSink>,
        abort: AbortHandle,
    ) -> Self {
        Self::new(page, pointer, narrator, geometry)
            .with_resolver(CoordinateResolver::new(settings.scaling_enabled))
            .with_calibrator(ChromeCalibrator::new(settings.chrome))
            .with_failsafe(FailSafe::new(settings.abort_region, geometry.bounds(), abort))
            .with_config(settings.executor.clone())
    }

    pub fn with_resolver(mut self, resolver: CoordinateResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_calibrator(mut self, calibrator: ChromeCalibrator) -> Self {
        self.calibrator = calibrator;
        self
    }

    pub fn with_failsafe(mut self, failsafe: FailSafe) -> Self {
        self.failsafe = failsafe;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<ExecutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn geometry(&self) -> &ScreenGeometry {
        &self.geometry
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub async fn execute(&self, plan: ExecutionPlan) -> ExecutionResult {
        let mut run = Run::new();
        run.transition(RunState::Running);
        let total = plan.len();
        info!(steps = total, "executing demonstration plan");
        self.emit(ExecutionEvent::RunStarted { steps: total });

        let chrome = self.calibrator.calibrate(self.page.as_ref()).await;
        debug!(?chrome, "chrome offset for this run");

        let mut failure = None;
        // `after_interaction` narration seen before any interaction, spoken
        // once the next interaction has been issued.
        let mut held: Vec<(usize, &PlanStep)> = Vec::new();
        let mut interacted = false;
        // Delay owed by the previous step, paid on the way into the next one.
        let mut owed = Duration::ZERO;

        for (index, step) in plan.iter().enumerate() {
            if let Err(error) = self.wait(std::mem::take(&mut owed)).await {
                failure = Some(StepFailure { index, error });
                break;
            }

            if let PlanStep::Voice(voice) = step {
                if voice.timing == TimingHint::AfterInteraction && !interacted {
                    debug!(step = index, "narration held until the next interaction");
                    held.push((index, step));
                    continue;
                }
            }

            match self.dispatch(index, step, &chrome, total, &mut run).await {
                Ok(trailing) => owed = trailing,
                Err(error) => {
                    failure = Some(StepFailure { index, error });
                    break;
                }
            }

            if let PlanStep::ElementInteraction(_) = step {
                interacted = true;
                if let Err(f) = self.release_held(&mut held, &chrome, total, &mut run).await {
                    failure = Some(f);
                    break;
                }
            }
        }

        // No interaction followed; the held narration is still spoken, last.
        if failure.is_none() {
            if let Err(f) = self.release_held(&mut held, &chrome, total, &mut run).await {
                failure = Some(f);
            }
        }

        let state = match &failure {
            None => RunState::Completed,
            Some(StepFailure {
                error: DemoError::ExecutionAborted(_),
                ..
            }) => RunState::Aborted,
            Some(_) => RunState::Failed,
        };
        run.transition(state);

        if state == RunState::Completed {
            for handle in run.narrations.drain(..) {
                let _ = handle.await;
            }
        } else {
            for handle in run.narrations.drain(..) {
                handle.abort();
            }
        }

        match &failure {
            None => info!(steps = run.steps_completed, "demonstration completed"),
            Some(f) => error!(
                step = f.index,
                completed = run.steps_completed,
                state = ?state,
                "demonstration stopped: {}",
                f.error
            ),
        }
        self.emit(ExecutionEvent::RunFinished {
            state,
            steps_completed: run.steps_completed,
            failed_index: failure.as_ref().map(|f| f.index),
            error: failure.as_ref().map(|f| f.error.to_string()),
        });

        ExecutionResult {
            state: run.state,
            steps_completed: run.steps_completed,
            failure,
            timings: run.timings,
            chrome_offset: Some(chrome),
        }
    }

    /// Runs one step and records it. A step counts as completed once its
    /// narration or input has been issued; the returned delay is owed before
    /// the next step starts.
    async fn dispatch(
        &self,
        index: usize,
        step: &PlanStep,
        chrome: &ChromeOffset,
        total: usize,
        run: &mut Run,
    ) -> Result<Duration> {
        let summary = step.summary();
        info!(step = index + 1, total, "{summary}");
        self.emit(ExecutionEvent::StepStarted {
            index,
            total,
            summary,
        });

        let started = Instant::now();
        let outcome = match step {
            PlanStep::Voice(voice) => self.run_voice(index, voice, run).await,
            PlanStep::ElementInteraction(action) => self.run_interaction(index, action, chrome).await,
        };
        let elapsed = started.elapsed();
        run.timings.push(StepTiming {
            index,
            kind: step.kind(),
            started_at: started.duration_since(run.started),
            elapsed,
            completed: outcome.is_ok(),
        });

        if outcome.is_ok() {
            run.steps_completed += 1;
            self.emit(ExecutionEvent::StepCompleted {
                index,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        outcome
    }

    async fn release_held(
        &self,
        held: &mut Vec<(usize, &PlanStep)>,
        chrome: &ChromeOffset,
        total: usize,
        run: &mut Run,
    ) -> std::result::Result<(), StepFailure> {
        for (index, step) in std::mem::take(held) {
            if let Err(error) = self.dispatch(index, step, chrome, total, run).await {
                return Err(StepFailure { index, error });
            }
        }
        Ok(())
    }

    /// Sleeps cooperatively, giving up as soon as the fail-safe trips.
    async fn wait(&self, duration: Duration) -> Result<()> {
        // `None` when the deadline is beyond what `Instant` can represent.
        let deadline = Instant::now().checked_add(duration);
        loop {
            if let Some(reason) = self.failsafe.check(self.pointer.as_ref()) {
                return Err(DemoError::ExecutionAborted(reason));
            }
            let now = Instant::now();
            let slice = match deadline {
                Some(deadline) if now >= deadline => return Ok(()),
                Some(deadline) => (deadline - now).min(SLEEP_SLICE),
                None => SLEEP_SLICE,
            };
            tokio::time::sleep(slice).await;
        }
    }

    async fn speak(&self, text: &str) {
        if let Err(e) = self.narrator.speak(text).await {
            warn!("narration failed: {e:#}");
        }
    }

    /// Speaks one narration line. Returns the pause owed after it.
    async fn run_voice(&self, index: usize, voice: &VoiceStep, run: &mut Run) -> Result<Duration> {
        if voice.text.trim().is_empty() {
            debug!(step = index, "empty narration skipped");
            return Ok(Duration::ZERO);
        }
        self.emit(ExecutionEvent::Narration {
            index,
            text: voice.text.clone(),
        });

        match voice.timing {
            TimingHint::BeforeInteraction => self.speak(&voice.text).await,
            TimingHint::AfterInteraction => {
                self.wait(self.config.settle_delay).await?;
                self.speak(&voice.text).await;
            }
            TimingHint::Pause => {
                self.speak(&voice.text).await;
                return Ok(voice.pause.unwrap_or(self.config.default_pause));
            }
            TimingHint::Immediate => {
                let narrator = Arc::clone(&self.narrator);
                let text = voice.text.clone();
                run.narrations.push(tokio::spawn(async move {
                    if let Err(e) = narrator.speak(&text).await {
                        warn!("narration failed: {e:#}");
                    }
                }));
            }
        }
        Ok(Duration::ZERO)
    }

    /// Issues one click or typed value. Returns the settle time owed after it.
    async fn run_interaction(
        &self,
        index: usize,
        step: &InteractionStep,
        chrome: &ChromeOffset,
    ) -> Result<Duration> {
        if step.timing == TimingHint::BeforeInteraction {
            self.wait(self.config.settle_delay).await?;
        }

        let location = self.locate(&step.selector).await?;
        let window = self
            .page
            .window_origin()
            .await
            .map_err(|e| DemoError::collaborator("page query", e))?;
        let target = self
            .resolver
            .resolve(&location.bounds, window, chrome, &self.geometry)?;
        debug!(
            step = index,
            selector = %location.selector,
            x = target.x,
            y = target.y,
            tooltip = step.tooltip.as_deref().unwrap_or(""),
            "pointer target"
        );

        // Pointer motion blocks for the whole glide; keep it off the async workers.
        let pointer = Arc::clone(&self.pointer);
        let interaction = step.interaction.clone();
        let issued = tokio::task::spawn_blocking(move || match interaction {
            Interaction::Click => pointer.move_and_click(target),
            Interaction::Type { value } => pointer
                .move_to(target)
                .and_then(|()| pointer.type_text(&value)),
        })
        .await
        .map_err(|e| anyhow::anyhow!("pointer task panicked: {e}"))
        .and_then(|issued| issued);
        issued.map_err(|e| DemoError::collaborator("pointer", e))?;

        Ok(match step.timing {
            TimingHint::AfterInteraction => self.config.settle_delay,
            TimingHint::Pause => step.pause.unwrap_or(self.config.default_pause),
            TimingHint::BeforeInteraction | TimingHint::Immediate => Duration::ZERO,
        })
    }

    /// Looks the element up, retrying with linear backoff. An abort during
    /// backoff wins over further retries.
    async fn locate(&self, selector: &Selector) -> Result<ElementLocation> {
        let attempts = self.config.lookup_retries + 1;
        for attempt in 1..=attempts {
            match self.page.find_element(selector).await {
                Ok(Some(bounds)) => {
                    return Ok(ElementLocation {
                        selector: selector.clone(),
                        bounds,
                    });
                }
                Ok(None) => debug!(%selector, attempt, "element not found"),
                Err(e) => warn!(%selector, attempt, "element lookup failed: {e:#}"),
            }
            if attempt < attempts {
                self.wait(self.config.lookup_backoff * attempt).await?;
            }
        }
        Err(DemoError::ElementNotFound {
            selector: selector.to_string(),
            attempts,
        })
    }
}
