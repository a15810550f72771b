pub mod prompts;
pub mod story;
pub mod website;
