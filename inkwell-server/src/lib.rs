pub mod http;
pub mod sessions;
pub mod subsystems;

pub use sessions::SessionLocks;
pub use subsystems::story::{StoryEngine, StoryStep};
pub use subsystems::website::{FetchedVersion, WebsiteEngine};
