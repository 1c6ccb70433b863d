//! Scene transition driver: a small state machine over one story/character
//! content graph.
//!
//! The graph is consumed read-only; the driver only decides which scene is
//! presented next and invokes the completion seam exactly once when a
//! terminal reaction is chosen.

use std::collections::HashMap;
use std::future::Future;

use serde::Deserialize;

use crate::error::Error;
use crate::types::{Affinity, CharacterId, SceneId, StoryId};

/// Scene/choice/transition structure for one story+character pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentGraph {
    #[serde(default)]
    pub story_title: Option<String>,
    /// Designated entry when no explicit scene id is given.
    pub start_scene_id: SceneId,
    pub scenes: HashMap<SceneId, Scene>,
    /// Affinity increment implied by completing this story. Only the guest
    /// ledger applies it; the server computes its own.
    #[serde(default)]
    pub affinity_reward: i64,
}

/// Display payload plus outgoing edges for one scene.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub background_image: Option<String>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

/// One choice edge. `next_id: None` is the terminal "story complete"
/// transition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub text: String,
    #[serde(default)]
    pub next_id: Option<SceneId>,
}

/// Where completion credit goes when a terminal reaction is chosen.
///
/// Implemented by the progress model (guest ledger) and by the
/// server-authoritative completion path; the driver does not know which.
pub trait CompletionSink: Send + Sync {
    /// Record completion of `story` from `character`'s viewpoint and return
    /// the resulting affinity.
    fn story_completed(
        &self,
        story: &StoryId,
        character: &CharacterId,
        reward: i64,
    ) -> impl Future<Output = Result<Affinity, Error>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneState {
    /// Entry scene id resolved but not yet presented.
    Loading(SceneId),
    Presenting(SceneId),
    /// Terminal for this story/character pair. Re-entry re-derives progress
    /// from the progress model; it never replays the completion increment.
    Completed,
    /// The named scene id is missing from the graph. Terminal for the view;
    /// session and progress state are untouched.
    Failed(SceneId),
}

pub struct SceneDriver {
    graph: ContentGraph,
    story: StoryId,
    character: CharacterId,
    state: SceneState,
}

impl SceneDriver {
    /// Entry without an explicit scene id resolves via the graph's
    /// designated start scene.
    #[must_use]
    pub fn new(
        graph: ContentGraph,
        story: StoryId,
        character: CharacterId,
        entry: Option<SceneId>,
    ) -> Self {
        let entry = entry.unwrap_or_else(|| graph.start_scene_id.clone());
        Self {
            graph,
            story,
            character,
            state: SceneState::Loading(entry),
        }
    }

    /// Resolve the pending entry scene into `Presenting` (or `Failed` when
    /// the id is missing from the graph).
    pub fn begin(&mut self) -> &SceneState {
        if let SceneState::Loading(id) = self.state.clone() {
            self.state = if self.graph.scenes.contains_key(&id) {
                SceneState::Presenting(id)
            } else {
                tracing::warn!(scene = %id, story = %self.story, "entry scene missing from graph");
                SceneState::Failed(id)
            };
        }
        &self.state
    }

    #[must_use]
    pub fn state(&self) -> &SceneState {
        &self.state
    }

    #[must_use]
    pub fn graph(&self) -> &ContentGraph {
        &self.graph
    }

    /// The scene currently presented, if any.
    #[must_use]
    pub fn current_scene(&self) -> Option<&Scene> {
        match &self.state {
            SceneState::Presenting(id) => self.graph.scenes.get(id),
            _ => None,
        }
    }

    /// Apply the user's chosen reaction.
    ///
    /// A reaction with a `next_id` advances to that scene (`Failed` when the
    /// target is missing). A terminal reaction invokes the completion sink
    /// once and enters `Completed`. Outside `Presenting`, and for an
    /// out-of-range index, this is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates the completion sink's error; the driver then stays in
    /// `Presenting` so the user can retry the choice.
    pub async fn choose(
        &mut self,
        reaction: usize,
        sink: &impl CompletionSink,
    ) -> Result<&SceneState, Error> {
        let SceneState::Presenting(current) = self.state.clone() else {
            return Ok(&self.state);
        };
        let Some(scene) = self.graph.scenes.get(&current) else {
            return Err(Error::SceneNotFound(current));
        };
        let Some(reaction) = scene.reactions.get(reaction) else {
            return Ok(&self.state);
        };

        match reaction.next_id.clone() {
            Some(next) => {
                self.state = if self.graph.scenes.contains_key(&next) {
                    SceneState::Presenting(next)
                } else {
                    tracing::warn!(scene = %next, story = %self.story, "reaction points at missing scene");
                    SceneState::Failed(next)
                };
            }
            None => {
                let affinity = sink
                    .story_completed(&self.story, &self.character, self.graph.affinity_reward)
                    .await?;
                tracing::debug!(
                    story = %self.story,
                    character = %self.character,
                    affinity = %affinity,
                    "story completed"
                );
                self.state = SceneState::Completed;
            }
        }
        Ok(&self.state)
    }
}
