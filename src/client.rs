//! HTTP client with the auth interceptor and the typed REST surface.
//!
//! Retry mechanics stay inside this layer: callers see either a healed
//! response or a terminal error, never the refresh machinery.

use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::config::ApiConfig;
use crate::error::Error;
use crate::events::SessionEvents;
use crate::refresh::TokenRefresher;
use crate::scene::ContentGraph;
use crate::store::{KeyValueStore, TokenStore};
use crate::types::{Affinity, BookId, CategoryId, CharacterId, ContentId, Profile, StoryId, TokenPair};

/// Book metadata from `GET /api/books/{bookId}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BookDetail {
    pub id: BookId,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One entry of a book's ordered story list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySummary {
    pub id: StoryId,
    pub title: String,
    #[serde(default)]
    pub locked: bool,
}

impl StorySummary {
    #[must_use]
    pub fn new(id: impl Into<StoryId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            locked: false,
        }
    }

    #[must_use]
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }
}

/// One entry of a book's character list. `affinity` is the
/// server-authoritative closeness value.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CharacterSummary {
    pub id: CharacterId,
    pub name: String,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub affinity: Affinity,
}

/// A character-specific entry point into a story, from
/// `GET /api/stories/{storyId}/intro`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Viewpoint {
    pub character_id: CharacterId,
    #[serde(default)]
    pub character_name: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub start_content_id: Option<ContentId>,
}

/// Result of the story completion endpoint: the current affinity (ground
/// truth, no client-side accumulation) plus the narrative summary for the
/// end screen.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CompletionResult {
    pub affinity: Affinity,
    #[serde(default)]
    pub summary: Option<String>,
}

/// One entry of the user's category list. Locked categories are shown but
/// not browsable.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct CategorySummary {
    #[serde(rename = "categoryId")]
    pub id: CategoryId,
    #[serde(rename = "categoryName")]
    pub name: String,
    #[serde(default)]
    pub unlocked: bool,
}

/// The category endpoint answers with either a bare array or an object
/// wrapping it; both shapes occur in the wild.
#[derive(Deserialize)]
#[serde(untagged)]
enum CategoriesBody {
    Wrapped { categories: Vec<CategorySummary> },
    Bare(Vec<CategorySummary>),
}

#[derive(Deserialize)]
struct NicknameAvailability {
    available: bool,
}

/// Configured request pipeline for the Nebula API.
///
/// Attaches `Authorization: Bearer` to every request except the auth
/// endpoints, and heals transient 401s through the single-flight refresh
/// machine with at most one replay per request. Cheap to clone; clones share
/// the connection pool, credential store and refresh state.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ApiConfig>,
    tokens: TokenStore,
    refresher: Arc<TokenRefresher>,
    session_events: SessionEvents,
}

impl ApiClient {
    #[must_use]
    pub fn new(config: ApiConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let http = reqwest::Client::new();
        let tokens = TokenStore::new(store);
        let session_events = SessionEvents::new();
        let refresher = Arc::new(TokenRefresher::new(
            http.clone(),
            config.refresh_url(),
            tokens.clone(),
            session_events.clone(),
        ));
        Self {
            http,
            config: Arc::new(config),
            tokens,
            refresher,
            session_events,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    #[must_use]
    pub fn session_events(&self) -> &SessionEvents {
        &self.session_events
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    // ── Auth endpoints (never carry a bearer header) ───────────────────

    /// Exchange an OAuth authorization code for a credential pair.
    ///
    /// The returned pair is not stored; [`SessionController::login_with_code`]
    /// owns persisting it.
    ///
    /// [`SessionController::login_with_code`]: crate::session::SessionController::login_with_code
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or [`Error::Api`] on a
    /// non-2xx response.
    pub async fn exchange_code(&self, authorization_code: &str) -> Result<TokenPair, Error> {
        let response = self
            .http
            .post(self.config.code_exchange_url())
            .json(&serde_json::json!({ "authorizationCode": authorization_code }))
            .send()
            .await?;
        let response = Self::ensure_success(response, "code exchange").await?;
        Ok(response.json().await?)
    }

    /// Server-side session invalidation. Callers treat failures as
    /// best-effort; local cleanup never waits on this.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] or [`Error::Api`]; see above.
    pub async fn logout(&self) -> Result<(), Error> {
        let response = self.http.post(self.config.logout_url()).send().await?;
        Self::ensure_success(response, "logout").await?;
        Ok(())
    }

    // ── Profile ────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] on terminal auth failure,
    /// [`Error::Api`] on other non-2xx responses.
    pub async fn me(&self) -> Result<Profile, Error> {
        self.get_json(self.config.me_url(), "profile load").await
    }

    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn update_nickname(&self, nickname: &str) -> Result<Profile, Error> {
        let request = self
            .http
            .put(self.config.nickname_url())
            .json(&serde_json::json!({ "nickname": nickname }))
            .build()?;
        let response = self.execute_authorized(request).await?;
        let response = Self::ensure_success(response, "nickname update").await?;
        Ok(response.json().await?)
    }

    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn check_nickname(&self, nickname: &str) -> Result<bool, Error> {
        let availability: NicknameAvailability = self
            .get_json(self.config.nickname_check_url(nickname), "nickname check")
            .await?;
        Ok(availability.available)
    }

    // ── Catalog ────────────────────────────────────────────────────────

    /// The user's category shelf.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn categories(&self) -> Result<Vec<CategorySummary>, Error> {
        let body: CategoriesBody = self
            .get_json(self.config.categories_url(), "category list load")
            .await?;
        Ok(match body {
            CategoriesBody::Wrapped { categories } | CategoriesBody::Bare(categories) => categories,
        })
    }

    /// Books shelved under one category.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn category_books(&self, category: &CategoryId) -> Result<Vec<BookDetail>, Error> {
        self.get_json(
            self.config.category_books_url(category),
            "category book list load",
        )
        .await
    }

    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn book(&self, book: &BookId) -> Result<BookDetail, Error> {
        self.get_json(self.config.book_url(book), "book load").await
    }

    /// Ordered story list for a book; the order is what the resume
    /// navigator scans.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn book_stories(&self, book: &BookId) -> Result<Vec<StorySummary>, Error> {
        self.get_json(self.config.book_stories_url(book), "story list load")
            .await
    }

    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn book_characters(&self, book: &BookId) -> Result<Vec<CharacterSummary>, Error> {
        self.get_json(self.config.book_characters_url(book), "character list load")
            .await
    }

    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn story_intro(&self, story: &StoryId) -> Result<Vec<Viewpoint>, Error> {
        self.get_json(self.config.story_intro_url(story), "viewpoint load")
            .await
    }

    // ── Narrative content & progress ───────────────────────────────────

    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn scene_content(
        &self,
        story: &StoryId,
        character: &CharacterId,
        content: &ContentId,
    ) -> Result<ContentGraph, Error> {
        self.get_json(
            self.config.scene_content_url(story, character, content),
            "scene content load",
        )
        .await
    }

    /// Report story completion. The server owns not double-crediting; the
    /// returned affinity is ground truth.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::me`].
    pub async fn complete_story(
        &self,
        story: &StoryId,
        character: &CharacterId,
    ) -> Result<CompletionResult, Error> {
        let request = self
            .http
            .post(self.config.story_complete_url(story, character))
            .build()?;
        let response = self.execute_authorized(request).await?;
        let response = Self::ensure_success(response, "story completion").await?;
        Ok(response.json().await?)
    }

    // ── Pipeline internals ─────────────────────────────────────────────

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        operation: &'static str,
    ) -> Result<T, Error> {
        let request = self.http.get(url).build()?;
        let response = self.execute_authorized(request).await?;
        let response = Self::ensure_success(response, operation).await?;
        Ok(response.json().await?)
    }

    /// Send with a bearer credential when one is stored; on 401 while a
    /// session credential exists, refresh (single-flight) and replay the
    /// request exactly once with the rotated credential. The replay is an
    /// up-front clone, not a mutation of the in-flight request.
    async fn execute_authorized(
        &self,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Response, Error> {
        let replay = request.try_clone();

        if let Some(token) = self.tokens.access_token() {
            request
                .headers_mut()
                .insert(AUTHORIZATION, bearer_value(&token)?);
        }

        let response = self.http.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // 401 without any session credential is a plain API error for the
        // caller, not a refresh trigger.
        if !self.tokens.has_credentials() {
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            // Streaming bodies cannot be replayed; surface the 401.
            return Err(Error::Unauthorized);
        };

        let token = Arc::clone(&self.refresher).fresh_access_token().await?;
        replay
            .headers_mut()
            .insert(AUTHORIZATION, bearer_value(&token)?);

        let response = self.http.execute(replay).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // Retry ceiling: one replay per request, never a second refresh.
            return Err(Error::Unauthorized);
        }
        Ok(response)
    }

    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        Err(Error::Api {
            operation,
            status,
            detail,
        })
    }
}

fn bearer_value(token: &str) -> Result<HeaderValue, Error> {
    HeaderValue::try_from(format!("Bearer {token}")).map_err(|e| Error::Credential(e.to_string()))
}
