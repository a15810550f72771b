use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::message::Message;

/// Number of scripted refinement passes after the initial page.
pub const REFINEMENT_COUNT: u32 = 5;

/// Generated page versions plus the conversation that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteSession {
    pub website_versions: BTreeMap<u32, String>,
    pub transcript: Vec<Message>,
    pub most_recent_iteration: u32,
}

impl WebsiteSession {
    /// Iteration 0: `messages` is the prompt, `reply` the raw assistant text.
    pub fn initial(html: String, messages: Vec<Message>, reply: String) -> Self {
        Self {
            website_versions: BTreeMap::new(),
            transcript: Vec::new(),
            most_recent_iteration: 0,
        }
        .record_iteration(0, html, messages, reply)
    }

    pub fn record_iteration(
        mut self,
        iteration: u32,
        html: String,
        mut messages: Vec<Message>,
        reply: String,
    ) -> Self {
        messages.push(Message::assistant(reply));
        self.transcript = messages;
        self.website_versions.insert(iteration, html);
        self.most_recent_iteration = iteration;
        self
    }

    /// The version served for `cursor`: the cursor's own slot when it has
    /// been generated, otherwise the latest one available.
    pub fn version_for(&self, cursor: u32) -> Option<(u32, &str)> {
        let slot = cursor.min(self.most_recent_iteration);
        self.website_versions
            .get(&slot)
            .map(|html| (slot, html.as_str()))
    }
}

/// How many versions a client has fetched so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub interaction_cursor: u32,
}

impl InteractionRecord {
    pub fn advanced(self) -> Self {
        Self {
            interaction_cursor: self.interaction_cursor.saturating_add(1),
        }
    }
}
