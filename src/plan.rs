use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{DemoError, Result};
use crate::page::Selector;

/// When a step's effect happens relative to its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingHint {
    BeforeInteraction,
    AfterInteraction,
    #[default]
    Immediate,
    Pause,
}

impl TimingHint {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "before_interaction" => Some(Self::BeforeInteraction),
            "after_interaction" => Some(Self::AfterInteraction),
            "immediate" => Some(Self::Immediate),
            "pause" => Some(Self::Pause),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeInteraction => "before_interaction",
            Self::AfterInteraction => "after_interaction",
            Self::Immediate => "immediate",
            Self::Pause => "pause",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Click,
    Type { value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceStep {
    pub text: String,
    pub timing: TimingHint,
    pub pause: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionStep {
    pub interaction: Interaction,
    pub selector: Selector,
    pub timing: TimingHint,
    pub pause: Option<Duration>,
    pub description: Option<String>,
    pub tooltip: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    Voice(VoiceStep),
    ElementInteraction(InteractionStep),
}

impl PlanStep {
    pub fn timing(&self) -> TimingHint {
        match self {
            PlanStep::Voice(v) => v.timing,
            PlanStep::ElementInteraction(i) => i.timing,
        }
    }

    /// Explicit `duration` of a `pause` step, if the planner gave one.
    pub fn pause(&self) -> Option<Duration> {
        match self {
            PlanStep::Voice(v) => v.pause,
            PlanStep::ElementInteraction(i) => i.pause,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlanStep::Voice(_) => "voice",
            PlanStep::ElementInteraction(_) => "element_interaction",
        }
    }

    /// One-line description for logs and the console.
    pub fn summary(&self) -> String {
        match self {
            PlanStep::Voice(v) => format!("say \"{}\"", v.text),
            PlanStep::ElementInteraction(i) => match &i.interaction {
                Interaction::Click => format!("click {}", i.selector),
                Interaction::Type { value } => format!("type \"{value}\" at {}", i.selector),
            },
        }
    }
}

/// Validated, ordered steps. Build one with [`ExecutionPlan::parse`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// All-or-nothing: the first invalid record rejects the whole plan.
    pub fn parse(raw: &[Value]) -> Result<Self> {
        let steps = raw
            .iter()
            .enumerate()
            .map(|(index, record)| parse_step(index, record))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter()
    }
}

/// Strips Markdown code fences a model may wrap around JSON.
pub fn strip_code_fences(content: &str) -> &str {
    content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parses planner output: a JSON array of step records, optionally fenced.
pub fn parse_plan_text(content: &str) -> Result<ExecutionPlan> {
    let raw = raw_steps_from_text(content)?;
    ExecutionPlan::parse(&raw)
}

/// Splits planner output into untyped records without validating them.
pub fn raw_steps_from_text(content: &str) -> Result<Vec<Value>> {
    let cleaned = strip_code_fences(content);
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| DemoError::MalformedPlan(format!("not valid JSON: {e}")))?;
    match value {
        Value::Array(steps) => Ok(steps),
        other => Err(DemoError::MalformedPlan(format!(
            "expected a JSON array of steps, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn required_str<'a>(index: usize, record: &'a Map<String, Value>, field: &'static str) -> Result<&'a str> {
    match record.get(field) {
        None | Some(Value::Null) => Err(DemoError::invalid(index, field, "is missing")),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(DemoError::invalid(
            index,
            field,
            format!("must be a string, got {}", json_type(other)),
        )),
    }
}

fn optional_text(record: &Map<String, Value>, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn parse_timing(index: usize, record: &Map<String, Value>) -> Result<TimingHint> {
    match record.get("timing") {
        None | Some(Value::Null) => Ok(TimingHint::default()),
        Some(Value::String(s)) => TimingHint::parse(s)
            .ok_or_else(|| DemoError::invalid(index, "timing", format!("unknown timing hint `{s}`"))),
        Some(other) => Err(DemoError::invalid(
            index,
            "timing",
            format!("must be a string, got {}", json_type(other)),
        )),
    }
}

fn parse_pause(index: usize, record: &Map<String, Value>) -> Result<Option<Duration>> {
    match record.get("duration") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            value
                .as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .map(Some)
                .ok_or_else(|| {
                    DemoError::invalid(index, "duration", "must be a non-negative number of seconds")
                })
        }
    }
}

fn parse_step(index: usize, record: &Value) -> Result<PlanStep> {
    let record = record.as_object().ok_or_else(|| {
        DemoError::invalid(index, "type", format!("step must be an object, got {}", json_type(record)))
    })?;

    let step_type = required_str(index, record, "type")?;
    let timing = parse_timing(index, record)?;
    let pause = parse_pause(index, record)?;

    match step_type {
        "voice" => {
            let text = required_str(index, record, "content")?;
            Ok(PlanStep::Voice(VoiceStep {
                text: text.to_string(),
                timing,
                pause,
            }))
        }
        "element_interaction" => {
            let action = required_str(index, record, "action")?;
            if action != "click" && action != "type" {
                return Err(DemoError::invalid(
                    index,
                    "action",
                    format!("unknown action `{action}`"),
                ));
            }

            let raw_selector = required_str(index, record, "element_selector")?;
            let selector = Selector::parse(raw_selector)
                .map_err(|reason| DemoError::invalid(index, "element_selector", reason))?;

            let interaction = if action == "type" {
                let value = match record.get("value") {
                    None | Some(Value::Null) => {
                        return Err(DemoError::invalid(index, "value", "is required for `type`"));
                    }
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    Some(other) => {
                        return Err(DemoError::invalid(
                            index,
                            "value",
                            format!("must be a string, got {}", json_type(other)),
                        ));
                    }
                };
                Interaction::Type { value }
            } else {
                Interaction::Click
            };

            Ok(PlanStep::ElementInteraction(InteractionStep {
                interaction,
                selector,
                timing,
                pause,
                description: optional_text(record, "description"),
                tooltip: optional_text(record, "tooltip_text"),
            }))
        }
        other => Err(DemoError::invalid(
            index,
            "type",
            format!("unknown step type `{other}`"),
        )),
    }
}
