#![doc = include_str!("../README.md")]

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod progress;
pub mod resume;
pub mod scene;
pub mod session;
pub mod store;
pub mod types;

mod refresh;

// Re-exports for convenient access
pub use client::{
    ApiClient, BookDetail, CategorySummary, CharacterSummary, CompletionResult, StorySummary,
    Viewpoint,
};
pub use config::ApiConfig;
pub use error::Error;
pub use events::{ProgressEvent, ProgressEvents, SessionEvent, SessionEvents};
pub use progress::{AffinityRecord, ProgressMode, ProgressModel, ServerCompletion};
pub use resume::compute_highlight_index;
pub use scene::{CompletionSink, ContentGraph, Reaction, Scene, SceneDriver, SceneState};
pub use session::SessionController;
pub use store::{KeyValueStore, MemoryStore, StoreChange, TokenStore};
pub use types::{
    Affinity, BookId, CategoryId, CharacterId, ContentId, Profile, SceneId, StoryId, TokenPair,
};
