//! Website subsystem — single-page site generation with scripted refinement
//!
//! `generate` produces iteration 0 synchronously; `iterate` then walks the
//! refinement script one prompt at a time in the background, each step
//! extending the transcript the previous step stored. `fetch_current` lets a
//! polling client step through versions as they land.

use std::sync::Arc;

use inkwell_core::models::{InteractionRecord, Message, WebsiteSession, REFINEMENT_COUNT};
use inkwell_core::store::{self, interaction_key, website_key, StoreError};
use inkwell_core::{CompletionClient, CompletionError, InkwellError, TranscriptStore};
use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;

use crate::sessions::SessionLocks;
use crate::subsystems::prompts;

type Result<T> = std::result::Result<T, InkwellError>;

const HTML_FENCE: &str = "```html";
const FENCE: &str = "```";

/// A version handed to a polling client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedVersion {
    pub iteration: u32,
    pub cursor: u32,
    pub website: String,
}

/// The text between the first ```` ```html ```` marker and the next ```` ``` ````.
pub fn extract_html(reply: &str) -> std::result::Result<String, CompletionError> {
    let (_, after_open) = reply
        .split_once(HTML_FENCE)
        .ok_or(CompletionError::MissingHtmlBlock)?;
    let (html, _) = after_open
        .split_once(FENCE)
        .ok_or(CompletionError::MissingHtmlBlock)?;
    Ok(html.to_string())
}

#[derive(Clone)]
pub struct WebsiteEngine {
    store: Arc<dyn TranscriptStore>,
    client: Arc<dyn CompletionClient>,
    locks: SessionLocks,
}

impl WebsiteEngine {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        client: Arc<dyn CompletionClient>,
        locks: SessionLocks,
    ) -> Self {
        Self {
            store,
            client,
            locks,
        }
    }

    /// Generate iteration 0 and reset the fetch cursor.
    pub async fn generate(&self, session_id: &str) -> Result<String> {
        // Theme and type are intentionally left blank.
        let messages = vec![
            Message::system(prompts::WEBSITE_PERSONA),
            Message::user(prompts::website_request("", "")),
        ];
        let (reply, html) = self.generate_page(&messages).await?;

        // The two records are written separately. The cursor goes first so a
        // new iteration 0 is never paired with an old cursor.
        {
            let key = interaction_key(session_id);
            let _guard = self.locks.acquire(&key).await;
            store::save(self.store.as_ref(), &key, &InteractionRecord::default()).await?;
        }
        {
            let key = website_key(session_id);
            let _guard = self.locks.acquire(&key).await;
            let site = WebsiteSession::initial(html.clone(), messages, reply);
            store::save(self.store.as_ref(), &key, &site).await?;
        }

        tracing::info!(session_id, bytes = html.len(), "Website generated");
        Ok(html)
    }

    /// Run the full refinement script. Steps are strictly sequential: each
    /// one reads the transcript the previous one stored.
    pub async fn iterate(&self, session_id: &str) -> Result<u32> {
        for (i, refinement) in prompts::REFINEMENTS.iter().enumerate() {
            self.refine(session_id, i as u32 + 1, refinement).await?;
        }
        Ok(REFINEMENT_COUNT)
    }

    /// Serve the version under the cursor and advance the cursor.
    pub async fn fetch_current(&self, session_id: &str) -> Result<FetchedVersion> {
        let key = interaction_key(session_id);
        let _guard = self.locks.acquire(&key).await;

        let interaction: InteractionRecord = self.load(session_id, &key).await?;
        let site: WebsiteSession = self.load(session_id, &website_key(session_id)).await?;

        let cursor = interaction.interaction_cursor;
        let (iteration, html) = site
            .version_for(cursor)
            .ok_or_else(|| InkwellError::SessionNotFound(session_id.to_string()))?;
        let fetched = FetchedVersion {
            iteration,
            cursor,
            website: html.to_string(),
        };

        store::save(self.store.as_ref(), &key, &interaction.advanced()).await?;
        tracing::debug!(session_id, cursor, iteration, "Served website version");
        Ok(fetched)
    }

    /// Spawn `iterate` in the background. Failures are logged and the
    /// session keeps whatever iterations were stored before the failure.
    pub fn spawn_iterate(&self, session_id: &str) -> JoinHandle<()> {
        let engine = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            match engine.iterate(&session_id).await {
                Ok(n) => tracing::info!(session_id = %session_id, iterations = n, "Website refinement completed"),
                Err(e) => tracing::error!(session_id = %session_id, error = %e, "Website refinement failed"),
            }
        })
    }

    async fn refine(&self, session_id: &str, iteration: u32, refinement: &str) -> Result<()> {
        let key = website_key(session_id);
        let _guard = self.locks.acquire(&key).await;

        let site: WebsiteSession = self.load(session_id, &key).await?;
        let mut messages = site.transcript.clone();
        messages.push(Message::user(refinement));

        let (reply, html) = self.generate_page(&messages).await?;
        let site = site.record_iteration(iteration, html, messages, reply);
        store::save(self.store.as_ref(), &key, &site).await?;

        tracing::info!(session_id, iteration, "Website iteration stored");
        Ok(())
    }

    async fn generate_page(&self, messages: &[Message]) -> Result<(String, String)> {
        let reply = self.client.complete(messages, None).await?.into_text()?;
        let html = extract_html(&reply)?;
        Ok((reply, html))
    }

    async fn load<T: DeserializeOwned>(&self, session_id: &str, key: &str) -> Result<T> {
        match store::load(self.store.as_ref(), key).await {
            Err(StoreError::NotFound(_)) => {
                Err(InkwellError::SessionNotFound(session_id.to_string()))
            }
            other => Ok(other?),
        }
    }
}
