//! inkwell-cli — terminal client for the Inkwell HTTP API
//!
//! # Subcommands
//! - `play [--id <id>]`                       — interactive story in the terminal
//! - `story --id <id> [--choice A|B] [--json]` — a single story step
//! - `website --id <id>`                      — generate a website, print its HTML
//! - `fetch --id <id>`                        — fetch the next website iteration
//! - `status`                                 — show server health

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "inkwell-cli", version, about = "Play Inkwell stories and drive website generation")]
struct Cli {
    /// Inkwell HTTP server URL (overrides INKWELL_HTTP_URL env var)
    #[arg(long, env = "INKWELL_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Play a story interactively until it ends
    Play {
        /// Story session id; a fresh one is generated when omitted
        #[arg(long)]
        id: Option<String>,
    },

    /// Take a single story step
    Story {
        #[arg(long)]
        id: String,

        /// "A" or "B"; omit to start the story
        #[arg(long)]
        choice: Option<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Generate a website and queue its refinements
    Website {
        #[arg(long)]
        id: String,
    },

    /// Fetch the next available website iteration
    Fetch {
        #[arg(long)]
        id: String,
    },

    /// Show Inkwell server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BeatView {
    pub content: String,
    #[serde(rename = "choice_A")]
    pub choice_a: String,
    #[serde(rename = "choice_B")]
    pub choice_b: String,
    pub is_over: bool,
}

/// Response body of POST /story
#[derive(Debug, Deserialize)]
pub struct StoryResponse {
    pub story_id: String,
    pub sequence_index: i64,
    pub source: Option<String>,
    pub beat: BeatView,
}

/// Response body of GET /website/:id
#[derive(Debug, Deserialize)]
pub struct FetchResponse {
    pub iteration: u32,
    pub cursor: Option<u32>,
    pub website: String,
}

// ============================================================================
// Rendering
// ============================================================================

/// Human-readable card for a beat.
pub fn render_beat(beat: &BeatView) -> String {
    if beat.is_over {
        return format!("{}\n\n  ~ The End ~", beat.content);
    }
    format!(
        "{}\n\n  [A] {}\n  [B] {}",
        beat.content, beat.choice_a, beat.choice_b
    )
}

/// Normalize a reader's input to "A" or "B".
pub fn parse_choice(input: &str) -> Option<&'static str> {
    match input.trim() {
        "a" | "A" => Some("A"),
        "b" | "B" => Some("B"),
        _ => None,
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Read a response body as JSON, turning non-2xx replies into errors.
fn json_body(resp: reqwest::blocking::Response) -> anyhow::Result<serde_json::Value> {
    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        let msg = body["error"].as_str().unwrap_or("no error message");
        bail!("server returned {}: {}", status, msg);
    }
    Ok(body)
}

fn story_step(
    http: &reqwest::blocking::Client,
    server: &str,
    id: &str,
    choice: Option<&str>,
) -> anyhow::Result<serde_json::Value> {
    let url = format!("{}/story", server);
    let body = serde_json::json!({ "story_id": id, "choice": choice });
    let resp = http
        .post(&url)
        .json(&body)
        .send()
        .with_context(|| format!("connection failed to {}", url))?;
    json_body(resp)
}

fn do_story(server: &str, id: &str, choice: Option<&str>, json_output: bool) -> anyhow::Result<()> {
    let http = client(120)?;
    let body = story_step(&http, server, id, choice)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }
    let step: StoryResponse =
        serde_json::from_value(body).context("failed to parse story response")?;
    println!("{}", render_beat(&step.beat));
    Ok(())
}

fn do_play(server: &str, id: Option<String>) -> anyhow::Result<()> {
    let http = client(120)?;
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    eprintln!("Story session: {}\n", id);

    let mut choice: Option<&'static str> = None;
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        let body = story_step(&http, server, &id, choice)?;
        let step: StoryResponse =
            serde_json::from_value(body).context("failed to parse story response")?;
        println!("{}\n", render_beat(&step.beat));
        if step.beat.is_over {
            return Ok(());
        }

        choice = loop {
            print!("Choose A or B > ");
            io::stdout().flush()?;
            let line = match lines.next() {
                Some(line) => line?,
                None => return Ok(()),
            };
            match parse_choice(&line) {
                Some(c) => break Some(c),
                None => eprintln!("Please type A or B."),
            }
        };
    }
}

fn do_website(server: &str, id: &str) -> anyhow::Result<()> {
    let http = client(300)?;
    let url = format!("{}/website", server);
    let resp = http
        .post(&url)
        .json(&serde_json::json!({ "website_id": id }))
        .send()
        .with_context(|| format!("connection failed to {}", url))?;
    let body = json_body(resp)?;
    println!("{}", body["website"].as_str().unwrap_or_default());
    Ok(())
}

fn do_fetch(server: &str, id: &str) -> anyhow::Result<()> {
    let http = client(30)?;
    let url = format!("{}/website/{}", server, id);
    let resp = http
        .get(&url)
        .send()
        .with_context(|| format!("connection failed to {}", url))?;
    let fetched: FetchResponse = serde_json::from_value(json_body(resp)?)
        .context("failed to parse website response")?;
    eprintln!("Iteration {}", fetched.iteration);
    println!("{}", fetched.website);
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let http = client(10)?;
    let url = format!("{}/health", server);
    let resp = http
        .get(&url)
        .send()
        .with_context(|| format!("cannot reach {}", url))?;
    let body = json_body(resp)?;
    println!("Inkwell server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
    println!("Store:          {}", body["store"].as_str().unwrap_or("?"));
    println!("Store detail:   {}", body["store_detail"].as_str().unwrap_or("?"));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Play { id } => do_play(&server, id),
        Commands::Story { id, choice, json } => do_story(&server, &id, choice.as_deref(), json),
        Commands::Website { id } => do_website(&server, &id),
        Commands::Fetch { id } => do_fetch(&server, &id),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("inkwell-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
