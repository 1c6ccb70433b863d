use url::Url;

use crate::types::{BookId, CategoryId, CharacterId, ContentId, StoryId};

/// Nebula API configuration.
///
/// Required fields are constructor parameters — no runtime "missing field"
/// errors.
///
/// ```rust,ignore
/// use nebula_reader::ApiConfig;
///
/// let config = ApiConfig::new("https://api.nebula.example".parse()?);
/// // Optional overrides via chaining:
/// let config = config.with_provider("kakao");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ApiConfig {
    pub(crate) base_url: Url,
    pub(crate) provider: String,
}

impl ApiConfig {
    /// Create a new API configuration against a base URL.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            provider: "kakao".into(),
        }
    }

    /// Override the OAuth provider segment of the code-exchange path
    /// (default: `kakao`).
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn at(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    pub(crate) fn code_exchange_url(&self) -> Url {
        self.at(&format!("/api/auth/{}/callback", self.provider))
    }

    pub(crate) fn refresh_url(&self) -> Url {
        self.at("/api/auth/refresh")
    }

    pub(crate) fn logout_url(&self) -> Url {
        self.at("/api/auth/logout")
    }

    pub(crate) fn me_url(&self) -> Url {
        self.at("/api/profile/me")
    }

    pub(crate) fn nickname_url(&self) -> Url {
        self.at("/api/profile/nickname")
    }

    pub(crate) fn nickname_check_url(&self, nickname: &str) -> Url {
        let mut url = self.at("/api/profile/nickname/check");
        url.query_pairs_mut().append_pair("nickname", nickname);
        url
    }

    pub(crate) fn categories_url(&self) -> Url {
        self.at("/api/categories/me")
    }

    pub(crate) fn category_books_url(&self, category: &CategoryId) -> Url {
        self.at(&format!("/api/categories/{category}/books"))
    }

    pub(crate) fn book_url(&self, book: &BookId) -> Url {
        self.at(&format!("/api/books/{book}"))
    }

    pub(crate) fn book_stories_url(&self, book: &BookId) -> Url {
        self.at(&format!("/api/books/{book}/stories"))
    }

    pub(crate) fn book_characters_url(&self, book: &BookId) -> Url {
        self.at(&format!("/api/books/{book}/characters"))
    }

    pub(crate) fn story_intro_url(&self, story: &StoryId) -> Url {
        self.at(&format!("/api/stories/{story}/intro"))
    }

    pub(crate) fn scene_content_url(
        &self,
        story: &StoryId,
        character: &CharacterId,
        content: &ContentId,
    ) -> Url {
        self.at(&format!(
            "/api/stories/{story}/characters/{character}/contents/{content}"
        ))
    }

    pub(crate) fn story_complete_url(&self, story: &StoryId, character: &CharacterId) -> Url {
        self.at(&format!(
            "/api/stories/{story}/characters/{character}/complete"
        ))
    }
}
