pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use completion::{
    Completion, CompletionClient, CompletionError, OpenAiClient, StructuredOutput,
};
pub use config::InkwellConfig;
pub use error::InkwellError;
pub use store::{MemoryStore, PgStore, StoreError, TranscriptStore};
