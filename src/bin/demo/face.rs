use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info};

use calc_demo::ExecutionEvent;

/// What the live console shows: executor progress plus the planning phase
/// around it.
#[derive(Clone, Debug)]
pub enum ConsoleEvent {
    Planning { instruction: String },
    PlanRejected { message: String },
    Execution(ExecutionEvent),
    Ready,
}

impl ConsoleEvent {
    fn name(&self) -> &'static str {
        match self {
            ConsoleEvent::Planning { .. } => "planning",
            ConsoleEvent::PlanRejected { .. } => "plan_rejected",
            ConsoleEvent::Ready => "ready",
            ConsoleEvent::Execution(event) => match event {
                ExecutionEvent::RunStarted { .. } => "run_started",
                ExecutionEvent::StepStarted { .. } => "step_started",
                ExecutionEvent::Narration { .. } => "narration",
                ExecutionEvent::StepCompleted { .. } => "step_completed",
                ExecutionEvent::RunFinished { .. } => "run_finished",
            },
        }
    }

    fn to_sse_event(&self) -> Event {
        let data = match self {
            ConsoleEvent::Planning { instruction } => {
                serde_json::json!({ "instruction": instruction }).to_string()
            }
            ConsoleEvent::PlanRejected { message } => {
                serde_json::json!({ "message": message }).to_string()
            }
            ConsoleEvent::Execution(event) => {
                serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
            }
            ConsoleEvent::Ready => "{}".to_string(),
        };
        Event::default().event(self.name()).data(data)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<String>,
    pub event_tx: broadcast::Sender<ConsoleEvent>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Serve the console on the first free port in 3000..3010.
pub async fn start_server() -> Result<(mpsc::Receiver<String>, broadcast::Sender<ConsoleEvent>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let (event_tx, _) = broadcast::channel::<ConsoleEvent>(128);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut bound = None;
    for port in 3000..3010 {
        if let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            bound = Some((listener, port));
            break;
        }
    }
    let (listener, port) =
        bound.ok_or_else(|| anyhow!("no free port in 3000-3009 for the console"))?;

    info!("console running at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("console server stopped: {e}");
        }
    });

    Ok((cmd_rx, event_tx))
}

/// Forward executor events into the console stream.
pub fn relay(mut from: broadcast::Receiver<ExecutionEvent>, to: broadcast::Sender<ConsoleEvent>) {
    tokio::spawn(async move {
        loop {
            match from.recv().await {
                Ok(event) => {
                    let _ = to.send(ConsoleEvent::Execution(event));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => debug!("console skipped {n} events"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> &'static str {
    debug!(command = %payload.command, "console command");
    match state.cmd_tx.try_send(payload.command) {
        Ok(()) => "ok",
        Err(_) => "busy",
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<ConsoleEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Calculator demo console</title>
<style>
  body { margin: 0; background: #101014; color: #ddd; font: 14px system-ui, sans-serif; display: flex; flex-direction: column; height: 100vh; }
  header { padding: 16px 24px; border-bottom: 1px solid #222; font-weight: 600; }
  #log { flex: 1; overflow-y: auto; padding: 16px 24px; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; background: #17171d; border-left: 3px solid #444; }
  .say { border-color: #a78bfa; font-style: italic; }
  .step { border-color: #3b82f6; font-family: monospace; }
  .ok { border-color: #22c55e; color: #86efac; }
  .bad { border-color: #ef4444; color: #fca5a5; }
  form { display: flex; gap: 8px; padding: 16px 24px; border-top: 1px solid #222; }
  input { flex: 1; background: #17171d; color: #fff; border: 1px solid #333; border-radius: 6px; padding: 10px; }
  button { background: #6366f1; color: #fff; border: 0; border-radius: 6px; padding: 10px 18px; }
  button:disabled, input:disabled { opacity: 0.5; }
</style>
</head>
<body>
<header>Calculator demo console</header>
<div id="log"></div>
<form id="f">
  <input id="cmd" placeholder="e.g. show how to compute the NPV of these cash flows" autofocus>
  <button id="go">Demonstrate</button>
</form>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const go = document.getElementById('go');
  const esc = s => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');
  const add = (cls, text) => {
    const d = document.createElement('div');
    d.className = 'entry ' + cls;
    d.innerHTML = text;
    log.appendChild(d);
    log.scrollTop = log.scrollHeight;
  };
  const busy = b => { cmd.disabled = b; go.disabled = b; if (!b) cmd.focus(); };

  document.getElementById('f').addEventListener('submit', async e => {
    e.preventDefault();
    const text = cmd.value.trim();
    if (!text) return;
    cmd.value = '';
    busy(true);
    await fetch('/command', { method: 'POST', headers: { 'Content-Type': 'application/json' }, body: JSON.stringify({ command: text }) });
  });

  const es = new EventSource('/events');
  const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data)));
  on('planning', d => add('', 'Planning: ' + esc(d.instruction)));
  on('plan_rejected', d => { add('bad', 'Plan rejected: ' + esc(d.message)); });
  on('run_started', d => add('', 'Running ' + d.steps + ' steps'));
  on('step_started', d => add('step', (d.index + 1) + '/' + d.total + ' ' + esc(d.summary)));
  on('narration', d => add('say', '“' + esc(d.text) + '”'));
  on('run_finished', d => add(d.state === 'completed' ? 'ok' : 'bad',
      esc(d.state) + ' after ' + d.steps_completed + ' steps' + (d.error ? ': ' + esc(d.error) : '')));
  on('ready', () => busy(false));
  add('ok', 'Ready. Describe a calculation to demonstrate.');
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use calc_demo::RunState;

    #[test]
    fn execution_events_keep_their_names() {
        let finished = ConsoleEvent::Execution(ExecutionEvent::RunFinished {
            state: RunState::Aborted,
            steps_completed: 2,
            failed_index: Some(2),
            error: Some("stop".into()),
        });
        assert_eq!(finished.name(), "run_finished");
        assert_eq!(ConsoleEvent::Ready.name(), "ready");
        assert_eq!(
            ConsoleEvent::PlanRejected {
                message: "bad".into()
            }
            .name(),
            "plan_rejected"
        );
    }
}
