mod brain;
mod dom;
mod face;
mod hands;
mod voice;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use global_hotkey::GlobalHotKeyManager;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use calc_demo::{
    AbortHandle, ChromeCalibrator, CoordinateResolver, ExecutionEvent, ExecutionPlan,
    ExecutionResult, GeometryProvider, NarrationSink, PageQuery, PlanExecutor, PlanSource,
    RunState, ScreenGeometry, Selector, Settings, XcapDisplays, parse_plan_text,
};

use face::ConsoleEvent;

#[derive(Parser)]
#[command(
    name = "calc-demo",
    version,
    about = "Narrated demonstrations on a web calculator, driven with the real mouse"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a plan file (a JSON array of steps)
    Run { plan: PathBuf },
    /// Ask the planner for a plan and execute it
    Demo { instruction: String },
    /// Serve the live console and demonstrate whatever it is asked
    Serve,
    /// Print the detected geometry and chrome offset, optionally resolving one selector
    Calibrate {
        #[arg(long)]
        selector: Option<String>,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::from_env();
    init_tracing(settings.as_ref().map_or("info", |s| s.log_level.as_str()));
    let settings = settings?;

    let geometry = GeometryProvider::new(settings.geometry.clone(), XcapDisplays).current()?;
    info!(
        physical = %format!("{}x{}", geometry.physical_width, geometry.physical_height),
        logical = %format!("{}x{}", geometry.logical_width, geometry.logical_height),
        scale_x = geometry.scale_x,
        scale_y = geometry.scale_y,
        monitor = geometry.target_monitor,
        "screen geometry"
    );

    match cli.command {
        Command::Run { plan } => {
            let text = std::fs::read_to_string(&plan)
                .with_context(|| format!("reading {}", plan.display()))?;
            // Reject a bad plan before touching the browser or the pointer.
            let plan = parse_plan_text(&text)?;
            let rig = Rig::start(&settings, geometry, None).await?;
            Ok(report(&rig.executor.execute(plan).await))
        }
        Command::Demo { instruction } => {
            let rig = Rig::start(&settings, geometry, None).await?;
            let brain = brain::Brain::new(&settings.planner_model, rig.session.tab.clone())?;
            let plan = plan_for(&brain, &instruction).await?;
            Ok(report(&rig.executor.execute(plan).await))
        }
        Command::Serve => {
            serve(&settings, geometry).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Calibrate { selector } => calibrate(&settings, geometry, selector).await,
    }
}

/// Everything a run needs on the live desktop.
struct Rig {
    session: hands::BrowserSession,
    executor: PlanExecutor,
    _stop_hotkey: Option<GlobalHotKeyManager>,
}

impl Rig {
    async fn start(
        settings: &Settings,
        geometry: ScreenGeometry,
        events: Option<broadcast::Sender<ExecutionEvent>>,
    ) -> Result<Self> {
        let session = open_browser(&settings.calculator_url).await?;
        let page = Arc::new(hands::ChromePage::new(session.tab.clone()));
        let pointer = Arc::new(hands::EnigoPointer::new(settings.pointer_move)?);
        let narrator = narrator(settings)?;

        let abort = AbortHandle::new();
        let stop_hotkey = hands::try_arm_stop_hotkey(abort.clone());

        let mut executor =
            PlanExecutor::from_settings(settings, geometry, page, pointer, narrator, abort);
        if let Some(tx) = events {
            executor = executor.with_events(tx);
        }

        Ok(Self {
            session,
            executor,
            _stop_hotkey: stop_hotkey,
        })
    }
}

async fn open_browser(url: &str) -> Result<hands::BrowserSession> {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || hands::BrowserSession::open(&url))
        .await
        .map_err(|e| anyhow!("browser launch panicked: {e}"))?
}

fn narrator(settings: &Settings) -> Result<Arc<dyn NarrationSink>> {
    Ok(match &settings.narration_command {
        Some(command) => Arc::new(voice::CommandNarrator::parse(command)?),
        None => Arc::new(voice::LogNarrator::new()),
    })
}

async fn plan_for(planner: &dyn PlanSource, instruction: &str) -> Result<ExecutionPlan> {
    let raw = planner.raw_steps(instruction).await?;
    let plan = ExecutionPlan::parse(&raw)?;
    info!(steps = plan.len(), "plan accepted");
    Ok(plan)
}

fn report(result: &ExecutionResult) -> ExitCode {
    if let Some(offset) = &result.chrome_offset {
        println!("chrome offset: {}px ({:?})", offset.pixels, offset.source);
    }
    for timing in &result.timings {
        println!(
            "  step {:>3} {:<20} {:>7.2}s {}",
            timing.index + 1,
            timing.kind,
            timing.elapsed.as_secs_f64(),
            if timing.completed { "ok" } else { "stopped" }
        );
    }

    match (&result.state, &result.failure) {
        (RunState::Completed, _) => {
            println!("completed {} steps", result.steps_completed);
            ExitCode::SUCCESS
        }
        (state, failure) => {
            let detail = failure
                .as_ref()
                .map(|f| format!(" at step {}: {}", f.index + 1, f.error))
                .unwrap_or_default();
            println!(
                "{state:?} after {} steps{detail}",
                result.steps_completed
            );
            if *state == RunState::Aborted {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn serve(settings: &Settings, geometry: ScreenGeometry) -> Result<()> {
    let (mut commands, console) = face::start_server().await?;

    let (exec_tx, exec_rx) = broadcast::channel(128);
    face::relay(exec_rx, console.clone());
    let rig = Rig::start(settings, geometry, Some(exec_tx)).await?;
    let brain = brain::Brain::new(&settings.planner_model, rig.session.tab.clone())?;

    info!("waiting for instructions from the console");
    let _ = console.send(ConsoleEvent::Ready);

    while let Some(instruction) = commands.recv().await {
        info!(%instruction, "received instruction");
        let _ = console.send(ConsoleEvent::Planning {
            instruction: instruction.clone(),
        });

        match plan_for(&brain, &instruction).await {
            Ok(plan) => {
                let result = rig.executor.execute(plan).await;
                if result.state == RunState::Aborted {
                    warn!("emergency stop engaged; restart to demonstrate again");
                    break;
                }
            }
            Err(e) => {
                error!("planning failed: {e:#}");
                let _ = console.send(ConsoleEvent::PlanRejected {
                    message: format!("{e:#}"),
                });
            }
        }
        let _ = console.send(ConsoleEvent::Ready);
    }
    Ok(())
}

async fn calibrate(
    settings: &Settings,
    geometry: ScreenGeometry,
    selector: Option<String>,
) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(&geometry)?);
    println!("bounds: {}", geometry.bounds());

    let session = open_browser(&settings.calculator_url).await?;
    let tab = session.tab.clone();
    let title = tokio::task::spawn_blocking(move || dom::page_title(&tab))
        .await
        .map_err(|e| anyhow!("page task panicked: {e}"))??;
    println!("page: {title}");

    let page = hands::ChromePage::new(session.tab.clone());
    let chrome = ChromeCalibrator::new(settings.chrome).calibrate(&page).await;
    println!("chrome offset: {}px ({:?})", chrome.pixels, chrome.source);

    let Some(raw) = selector else {
        return Ok(ExitCode::SUCCESS);
    };
    let selector =
        Selector::parse(&raw).map_err(|reason| anyhow!("selector `{raw}` {reason}"))?;
    let Some(bounds) = page.find_element(&selector).await? else {
        println!("{selector}: not found");
        return Ok(ExitCode::FAILURE);
    };
    let origin = page.window_origin().await?;
    let point = CoordinateResolver::new(settings.scaling_enabled)
        .resolve(&bounds, origin, &chrome, &geometry)?;
    println!(
        "{selector}: box {bounds:?}, window at ({}, {}) -> screen ({}, {})",
        origin.x, origin.y, point.x, point.y
    );
    Ok(ExitCode::SUCCESS)
}
