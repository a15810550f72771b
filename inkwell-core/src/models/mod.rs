pub mod message;
pub mod story;
pub mod website;

pub use message::{Message, Role};
pub use story::{Beat, Choice, EndHorizon, StorySession, TERMINATION_LABEL};
pub use website::{InteractionRecord, WebsiteSession, REFINEMENT_COUNT};
