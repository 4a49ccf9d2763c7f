use anyhow::{Result, anyhow};
use async_trait::async_trait;
use headless_chrome::Tab;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use calc_demo::PlanSource;
use calc_demo::plan::raw_steps_from_text;

use crate::dom::{self, CalculatorKey};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = r#"You plan narrated demonstrations on a web financial calculator. A presenter will speak your voice lines while a real mouse presses the calculator keys.

Reply with ONLY a JSON array of steps. No markdown, no explanation.

Step shapes:
- {"type":"voice","content":"what to say","timing":"before_interaction"}
- {"type":"voice","content":"what to say","timing":"after_interaction"}
- {"type":"voice","content":"what to say","timing":"pause","duration":1.5}
- {"type":"element_interaction","action":"click","element_selector":"<selector>","description":"why this key"}
- {"type":"element_interaction","action":"type","element_selector":"<selector>","value":"1000"}

Rules:
1. Only use selectors from the key list you are given. Copy them exactly.
2. Put a short before_interaction voice line ahead of each meaningful key press and an after_interaction line when the display shows something worth explaining.
3. Enter multi-digit numbers one key at a time.
4. Keep narration plain and brief, one sentence per voice step.
5. Finish with a voice step stating the result."#;

/// Asks a chat-completions model for a demonstration plan, grounded in the
/// keys currently visible on the calculator page.
pub struct Brain {
    client: Client,
    api_key: String,
    model: String,
    tab: Arc<Tab>,
}

impl Brain {
    pub fn new(model: &str, tab: Arc<Tab>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY not set in environment"))?;
        Ok(Self {
            client: Client::new(),
            api_key,
            model: model.to_string(),
            tab,
        })
    }

    async fn visible_keys(&self) -> Vec<CalculatorKey> {
        let tab = self.tab.clone();
        match tokio::task::spawn_blocking(move || dom::calculator_keys(&tab)).await {
            Ok(Ok(keys)) => keys,
            Ok(Err(e)) => {
                warn!("could not list calculator keys: {e:#}");
                Vec::new()
            }
            Err(e) => {
                warn!("key discovery panicked: {e}");
                Vec::new()
            }
        }
    }

    async fn complete(&self, user: String) -> Result<String> {
        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.2,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown API error");
            return Err(anyhow!("planner API error ({status}): {message}"));
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| anyhow!("no content in planner response: {body}"))
    }
}

pub fn user_prompt(instruction: &str, keys: &[CalculatorKey]) -> String {
    let mut prompt = format!("Demonstrate: {instruction}\n\nKeys on the page:\n");
    if keys.is_empty() {
        prompt.push_str("(none detected; use :has-text('<label>') selectors on button)\n");
    }
    for key in keys {
        prompt.push_str(&format!("- {} => {}\n", key.label, key.selector));
    }
    prompt
}

#[async_trait]
impl PlanSource for Brain {
    async fn raw_steps(&self, instruction: &str) -> Result<Vec<Value>> {
        let keys = self.visible_keys().await;
        info!(keys = keys.len(), model = %self.model, "asking planner");
        let content = self.complete(user_prompt(instruction, &keys)).await?;
        debug!("planner replied: {content}");
        Ok(raw_steps_from_text(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_every_key() {
        let keys = vec![
            CalculatorKey {
                label: "7".into(),
                selector: "button.btn-number:has-text('7')".into(),
            },
            CalculatorKey {
                label: "CPT".into(),
                selector: "button.btn-operator:has-text('CPT')".into(),
            },
        ];
        let prompt = user_prompt("compute 7 percent", &keys);
        assert!(prompt.starts_with("Demonstrate: compute 7 percent"));
        assert!(prompt.contains("- 7 => button.btn-number:has-text('7')"));
        assert!(prompt.contains("- CPT => button.btn-operator:has-text('CPT')"));
    }

    #[test]
    fn prompt_without_keys_says_so() {
        assert!(user_prompt("add", &[]).contains("none detected"));
    }
}
