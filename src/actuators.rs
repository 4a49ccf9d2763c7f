//! Side-effecting collaborators the executor drives: the physical pointer and
//! keyboard, the narration output, and the planner that produces raw steps.

use async_trait::async_trait;
use serde_json::Value;

use crate::resolver::ScreenCoordinate;

/// Pointer and keyboard on the operator's screen. Calls block until the OS
/// has accepted the input.
pub trait PointerControl: Send + Sync {
    fn move_to(&self, target: ScreenCoordinate) -> anyhow::Result<()>;

    fn move_and_click(&self, target: ScreenCoordinate) -> anyhow::Result<()>;

    fn type_text(&self, text: &str) -> anyhow::Result<()>;

    /// Current pointer position, polled by the fail-safe.
    fn position(&self) -> anyhow::Result<(i32, i32)>;
}

#[async_trait]
pub trait NarrationSink: Send + Sync {
    /// Resolves once the narration has finished playing.
    async fn speak(&self, text: &str) -> anyhow::Result<()>;
}

/// Produces the untyped step list for an instruction.
#[async_trait]
pub trait PlanSource: Send + Sync {
    async fn raw_steps(&self, instruction: &str) -> anyhow::Result<Vec<Value>>;
}
