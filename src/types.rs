use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

id_type!(
    /// Book identifier.
    BookId
);
id_type!(
    /// Category identifier for browsing the catalog by shelf.
    CategoryId
);
id_type!(
    /// Story identifier. Also one half of the completion-mark idempotence key
    /// and the value of the resume pointer.
    StoryId
);
id_type!(
    /// Character identifier (a viewpoint into a story).
    CharacterId
);
id_type!(
    /// Scene identifier inside one story/character content graph.
    SceneId
);
id_type!(
    /// Content identifier for fetching scene content from the server.
    ContentId
);

/// Closeness score between the user and a character.
///
/// Guaranteed in `[0, 100]` by construction: every way to make or combine an
/// `Affinity` clamps. Holding one proves the range invariant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(from = "i64", into = "u8")]
pub struct Affinity(u8);

impl Affinity {
    pub const MIN: Affinity = Affinity(0);
    pub const MAX: Affinity = Affinity(100);

    /// Clamps any integer into the valid range.
    #[must_use]
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, 100) as u8)
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Additive increment, clamped at both ends. Negative increments are
    /// permitted but not expected in normal operation.
    #[must_use]
    pub fn increased_by(self, increment: i64) -> Self {
        Self::clamped(i64::from(self.0) + increment)
    }
}

impl From<i64> for Affinity {
    fn from(value: i64) -> Self {
        Self::clamped(value)
    }
}

impl From<Affinity> for u8 {
    fn from(a: Affinity) -> Self {
        a.0
    }
}

/// User profile as returned by `GET /api/profile/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Profile {
    pub nickname: String,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub age_range: Option<String>,
}

impl Profile {
    #[must_use]
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            profile_image: None,
            gender: None,
            age_range: None,
        }
    }
}

/// Access/refresh credential pair returned by the code exchange and refresh
/// endpoints. Both tokens are opaque to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_clamps_low_and_high() {
        assert_eq!(Affinity::clamped(-5), Affinity::MIN);
        assert_eq!(Affinity::clamped(0).value(), 0);
        assert_eq!(Affinity::clamped(100).value(), 100);
        assert_eq!(Affinity::clamped(250), Affinity::MAX);
    }

    #[test]
    fn affinity_increment_saturates() {
        let a = Affinity::clamped(90);
        assert_eq!(a.increased_by(20).value(), 100);
        assert_eq!(a.increased_by(-100).value(), 0);
        assert_eq!(a.increased_by(5).value(), 95);
    }

    #[test]
    fn affinity_deserializes_out_of_range_values_clamped() {
        let a: Affinity = serde_json::from_str("180").unwrap();
        assert_eq!(a, Affinity::MAX);
        let b: Affinity = serde_json::from_str("-3").unwrap();
        assert_eq!(b, Affinity::MIN);
    }

    #[test]
    fn profile_tolerates_missing_optional_fields() {
        let p: Profile = serde_json::from_str(r#"{"nickname":"mira"}"#).unwrap();
        assert_eq!(p.nickname, "mira");
        assert!(p.profile_image.is_none());
        assert!(p.age_range.is_none());
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = StoryId::new("story-3");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""story-3""#);
    }
}
