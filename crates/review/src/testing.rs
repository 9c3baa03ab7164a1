//! Scripted [`LanguageModel`] for tests in this and dependent crates.

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::model::LanguageModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub system: String,
    pub prompt: String,
}

/// Answers every prompt with `review of: {prompt}` and records each call.
#[derive(Default)]
pub struct ScriptedModel {
    fail_on: Option<usize>,
    panic_on: Option<usize>,
    gate: Option<Arc<Notify>>,
    calls: Mutex<Vec<Completion>>,
}

impl ScriptedModel {
    pub fn echo() -> Self { Self::default() }

    /// Fail the `n`th call (1-based).
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Panic on the `n`th call (1-based).
    pub fn panicking_on(mut self, n: usize) -> Self {
        self.panic_on = Some(n);
        self
    }

    /// Hold every answer until `gate` is notified once per call.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Completion> { self.calls.lock().unwrap().clone() }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str { "scripted-model" }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Completion { system: system.to_string(), prompt: prompt.to_string() });
            calls.len()
        };
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_on == Some(n) {
            bail!("model overloaded");
        }
        if self.panic_on == Some(n) {
            panic!("model client panicked");
        }
        Ok(format!("review of: {prompt}"))
    }
}
