//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use inkwell_core::models::{Message, Role};
use inkwell_core::{Completion, CompletionClient, CompletionError, StructuredOutput};
use tokio::sync::Semaphore;

type Responder =
    dyn Fn(&[Message], Option<&StructuredOutput>) -> Result<Completion, CompletionError> + Send + Sync;

/// A `CompletionClient` that answers from a closure and records every
/// transcript it was called with.
pub struct ScriptedClient {
    responder: Box<Responder>,
    calls: Mutex<Vec<Vec<Message>>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[Message], Option<&StructuredOutput>) -> Result<Completion, CompletionError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Every call waits for (and consumes) one permit of `gate` first.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Beats whose content names the last user message, so branches are
    /// distinguishable. Never sets `is_over` on its own.
    pub fn storyteller() -> Self {
        Self::new(|messages, _schema| {
            let n = messages.len();
            Ok(Completion::Structured(serde_json::json!({
                "content": format!("after: {}", last_user(messages)),
                "choice_A": format!("left {}", n),
                "choice_B": format!("right {}", n),
                "is_over": false
            })))
        })
    }

    /// Pages numbered by how many user turns the transcript holds.
    pub fn web_designer() -> Self {
        Self::new(|messages, _schema| {
            let version = user_turns(messages) - 1;
            Ok(Completion::Text(page_reply(version)))
        })
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        transcript: &[Message],
        schema: Option<&StructuredOutput>,
    ) -> Result<Completion, CompletionError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.calls.lock().unwrap().push(transcript.to_vec());
        (self.responder)(transcript, schema)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn last_user(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

pub fn user_turns(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.role == Role::User).count()
}

pub fn page_reply(version: usize) -> String {
    format!("Here it is:\n```html\n<p>v{}</p>\n```\nEnjoy!", version)
}

pub fn page_html(version: usize) -> String {
    format!("\n<p>v{}</p>\n", version)
}
