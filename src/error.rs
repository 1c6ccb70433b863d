use crate::types::SceneId;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Transport-level failure (connection refused, TLS, decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from a data endpoint. Not retried automatically;
    /// the calling view owns user-facing messaging.
    #[error("API error during {operation}: status {status}: {detail}")]
    Api {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    /// A request was replayed once with a rotated credential and was
    /// rejected again. The retry ceiling stops here.
    #[error("unauthorized after credential refresh")]
    Unauthorized,

    /// Terminal auth failure: the refresh call failed or no refresh
    /// credential exists. Local credentials have already been cleared and
    /// the session-expired signal broadcast by the time this surfaces.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// A stored credential could not be encoded into a request header.
    #[error("invalid stored credential: {0}")]
    Credential(String),

    /// Scene id not present in the content graph. Terminal for the
    /// affected view; session and progress state are untouched.
    #[error("scene not found: {0}")]
    SceneNotFound(SceneId),
}

impl Error {
    /// Whether this error means the session is gone and the user must
    /// re-authenticate.
    #[must_use]
    pub fn is_auth_terminal(&self) -> bool {
        matches!(self, Error::SessionExpired(_) | Error::Unauthorized)
    }
}
