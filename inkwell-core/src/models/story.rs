//! Story session record and its state transitions.
//!
//! Transitions are pure: they consume a snapshot and return the next one.
//! Writing the result back to the store is the caller's single explicit step.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::completion::{CompletionError, StructuredOutput};
use crate::error::InkwellError;
use crate::models::message::Message;

/// Label both choices carry once the story has concluded.
pub const TERMINATION_LABEL: &str = "End the story...";

/// One of the two branches offered after every beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
}

impl Choice {
    pub const ALL: [Choice; 2] = [Choice::A, Choice::B];

    pub fn as_str(self) -> &'static str {
        match self {
            Choice::A => "A",
            Choice::B => "B",
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Choice {
    type Err = InkwellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Choice::A),
            "B" => Ok(Choice::B),
            other => Err(InkwellError::InvalidChoice(other.to_string())),
        }
    }
}

/// A generated story step: narrative text plus the two ways forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    pub content: String,
    #[serde(rename = "choice_A")]
    pub choice_a: String,
    #[serde(rename = "choice_B")]
    pub choice_b: String,
    pub is_over: bool,
}

impl Beat {
    pub const SCHEMA_NAME: &'static str = "play_story";

    /// Structured-output schema every story completion is forced through.
    pub fn schema() -> StructuredOutput {
        StructuredOutput {
            name: Self::SCHEMA_NAME.to_string(),
            description: "Emit the next story flashcard: a short passage and two ways to continue."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "The next passage of the story, 25 words or fewer."
                    },
                    "choice_A": {
                        "type": "string",
                        "description": "First way to continue, a short action of at most 4 words."
                    },
                    "choice_B": {
                        "type": "string",
                        "description": "Second way to continue, a short action of at most 4 words."
                    },
                    "is_over": {
                        "type": "boolean",
                        "description": "Whether this passage concludes the story."
                    }
                },
                "required": ["content", "choice_A", "choice_B", "is_over"]
            }),
        }
    }

    /// Parse the structured arguments of a completion into a beat.
    pub fn from_arguments(arguments: serde_json::Value) -> Result<Self, CompletionError> {
        for field in ["content", "choice_A", "choice_B", "is_over"] {
            if arguments.get(field).is_none() {
                return Err(CompletionError::MissingField(field.to_string()));
            }
        }
        serde_json::from_value(arguments)
            .map_err(|e| CompletionError::InvalidArguments(e.to_string()))
    }

    pub fn choice_text(&self, choice: Choice) -> &str {
        match choice {
            Choice::A => &self.choice_a,
            Choice::B => &self.choice_b,
        }
    }

    /// Force the beat into the shape of a story ending.
    pub fn concluded(mut self) -> Self {
        self.is_over = true;
        self.choice_a = TERMINATION_LABEL.to_string();
        self.choice_b = TERMINATION_LABEL.to_string();
        self
    }

    /// The assistant turn recorded in the transcript for this beat.
    pub fn to_message(&self) -> Message {
        let body = serde_json::json!({
            "content": self.content,
            "choice_A": self.choice_a,
            "choice_B": self.choice_b,
            "is_over": self.is_over,
        });
        Message::assistant(body.to_string())
    }
}

/// Beats left before the story must conclude. `999` means no ending has
/// been scheduled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndHorizon(pub u32);

impl EndHorizon {
    pub const UNBOUNDED: EndHorizon = EndHorizon(999);

    pub fn is_unbounded(self) -> bool {
        self == Self::UNBOUNDED
    }

    pub fn count_down(self) -> Self {
        if self.is_unbounded() {
            self
        } else {
            EndHorizon(self.0.saturating_sub(1))
        }
    }
}

impl Default for EndHorizon {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySession {
    pub transcript: Vec<Message>,
    pub beats: Vec<Beat>,
    pub sequence_index: i64,
    pub end_horizon: EndHorizon,
    #[serde(default)]
    pub precomputed_branches: BTreeMap<Choice, Beat>,
    #[serde(default)]
    pub precomputed_branch_index: BTreeMap<Choice, i64>,
}

impl Default for StorySession {
    fn default() -> Self {
        Self {
            transcript: Vec::new(),
            beats: Vec::new(),
            sequence_index: -1,
            end_horizon: EndHorizon::UNBOUNDED,
            precomputed_branches: BTreeMap::new(),
            precomputed_branch_index: BTreeMap::new(),
        }
    }
}

impl StorySession {
    pub fn last_beat(&self) -> Option<&Beat> {
        self.beats.last()
    }

    pub fn is_over(&self) -> bool {
        self.last_beat().is_some_and(|b| b.is_over)
    }

    /// Append a beat. `messages` is the prompt transcript the beat was
    /// generated from; the assistant turn is added here.
    pub fn commit(
        mut self,
        beat: Beat,
        mut messages: Vec<Message>,
        end_horizon_override: Option<EndHorizon>,
    ) -> Self {
        messages.push(beat.to_message());
        self.transcript = messages;
        self.beats.push(beat);
        self.sequence_index += 1;
        self.precomputed_branches.clear();
        if let Some(horizon) = end_horizon_override {
            self.end_horizon = horizon;
        }
        self
    }

    /// The precomputed branch for `choice`, if it was computed for the
    /// current state.
    pub fn fresh_branch(&self, choice: Choice) -> Option<&Beat> {
        let target = self.precomputed_branch_index.get(&choice)?;
        if *target > self.sequence_index {
            self.precomputed_branches.get(&choice)
        } else {
            None
        }
    }

    /// Record both precomputed branches, targeting the next index.
    pub fn with_branches(mut self, branch_a: Beat, branch_b: Beat) -> Self {
        let target = self.sequence_index + 1;
        for (choice, beat) in [(Choice::A, branch_a), (Choice::B, branch_b)] {
            self.precomputed_branches.insert(choice, beat);
            self.precomputed_branch_index.insert(choice, target);
        }
        self
    }
}
