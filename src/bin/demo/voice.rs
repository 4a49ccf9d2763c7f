use anyhow::{Result, bail};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use calc_demo::NarrationSink;

/// Writes narration to the log and holds for roughly the time it would take
/// to say it, so timing hints still pace the demonstration.
pub struct LogNarrator {
    words_per_minute: u32,
}

impl LogNarrator {
    pub fn new() -> Self {
        Self {
            words_per_minute: 170,
        }
    }

    fn speaking_time(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as u64;
        Duration::from_millis(words * 60_000 / self.words_per_minute.max(1) as u64)
    }
}

#[async_trait]
impl NarrationSink for LogNarrator {
    async fn speak(&self, text: &str) -> Result<()> {
        info!(target: "narration", "🔊 {text}");
        tokio::time::sleep(self.speaking_time(text)).await;
        Ok(())
    }
}

/// Speaks through an external TTS program (`say`, `espeak -s 160`, ...).
/// The narration text is passed as the final argument.
pub struct CommandNarrator {
    program: String,
    args: Vec<String>,
}

impl CommandNarrator {
    pub fn parse(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let Some(program) = parts.next() else {
            bail!("NARRATION_COMMAND is empty");
        };
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl NarrationSink for CommandNarrator {
    async fn speak(&self, text: &str) -> Result<()> {
        debug!(program = %self.program, "speaking");
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .kill_on_drop(true)
            .status()
            .await?;
        if !status.success() {
            bail!("{} exited with {status}", self.program);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_split_into_program_and_args() {
        let narrator = CommandNarrator::parse("espeak -s 160").unwrap();
        assert_eq!(narrator.program, "espeak");
        assert_eq!(narrator.args, ["-s", "160"]);
        assert!(CommandNarrator::parse("   ").is_err());
    }

    #[test]
    fn speaking_time_scales_with_words() {
        let narrator = LogNarrator::new();
        assert_eq!(narrator.speaking_time(""), Duration::ZERO);
        assert_eq!(
            narrator.speaking_time("one two three four five six seven eight nine ten"),
            Duration::from_millis(10 * 60_000 / 170)
        );
    }
}
