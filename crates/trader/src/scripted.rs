//! Decision maker that replays canned responses.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use perp_guard_core::DecisionMaker;
use std::collections::VecDeque;

/// Replays responses in order, one per call.
///
/// Once the script runs out, the last response repeats when `repeat_last` is set; otherwise
/// the call fails like an unreachable model would. Prompts seen are kept for inspection.
#[derive(Debug, Default)]
pub struct ScriptedDecisionMaker {
    name: String,
    script: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<String>>,
    repeat_last: bool,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedDecisionMaker {
    #[must_use]
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "scripted".to_string(),
            script: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Keeps answering with the final response after the script is exhausted.
    #[must_use]
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Queues a call failure with `message`.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.script.lock().push_back(Err(message.into()));
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.script.lock().push_back(Ok(response.into()));
    }

    /// Number of calls answered so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// System and user prompt of the most recent call.
    #[must_use]
    pub fn last_prompts(&self) -> Option<(String, String)> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl DecisionMaker for ScriptedDecisionMaker {
    async fn decide(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .push((system_prompt.to_string(), user_prompt.to_string()));

        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(response)) => {
                *self.last.lock() = Some(response.clone());
                Ok(response)
            }
            Some(Err(message)) => bail!("{message}"),
            None => match self.last.lock().clone() {
                Some(response) if self.repeat_last => Ok(response),
                _ => bail!("{} has no scripted response left", self.name),
            },
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
