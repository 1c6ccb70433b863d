//! Session controller: owns the current-user state and its lifecycle.

use std::sync::RwLock;

use tokio::sync::broadcast;

use crate::client::ApiClient;
use crate::error::Error;
use crate::events::SessionEvent;
use crate::types::Profile;

/// Owner of the authenticated session.
///
/// Invariant: a user is only held while an access credential is stored —
/// every path that drops the credential also drops the user.
///
/// `restore_session` must fully resolve before dependent UI renders content
/// gated on authentication. Later `login`/`logout`/`reload_user` calls are
/// not mutually exclusive; the user slot is last-writer-wins.
pub struct SessionController {
    client: ApiClient,
    user: RwLock<Option<Profile>>,
}

impl SessionController {
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            user: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    #[must_use]
    pub fn current_user(&self) -> Option<Profile> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn set_user(&self, user: Option<Profile>) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = user;
    }

    /// Startup session restoration.
    ///
    /// No stored access credential resolves immediately with an empty
    /// session. A terminal auth failure (refresh already attempted
    /// transparently and failed) performs logout and resolves empty. Other
    /// errors propagate without forcing logout, so a flaky network does not
    /// destroy a valid session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`]/[`Error::Http`] for non-auth failures of the
    /// profile fetch.
    pub async fn restore_session(&self) -> Result<Option<Profile>, Error> {
        if self.client.tokens().access_token().is_none() {
            return Ok(None);
        }
        match self.client.me().await {
            Ok(profile) => {
                self.set_user(Some(profile.clone()));
                Ok(Some(profile))
            }
            Err(e) if e.is_auth_terminal() => {
                tracing::info!(error = %e, "stored session no longer valid, logging out");
                self.logout().await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Populate the session after an external credential exchange has
    /// already stored an access credential.
    ///
    /// # Errors
    ///
    /// On any failure the session is logged out locally and the error
    /// re-raised.
    pub async fn login(&self) -> Result<Profile, Error> {
        match self.client.me().await {
            Ok(profile) => {
                self.set_user(Some(profile.clone()));
                Ok(profile)
            }
            Err(e) => {
                self.logout().await;
                Err(e)
            }
        }
    }

    /// Full login entry point: exchange the OAuth authorization code, store
    /// the credential pair, then load the profile.
    ///
    /// # Errors
    ///
    /// See [`SessionController::login`]; exchange failures propagate without
    /// touching stored credentials.
    pub async fn login_with_code(&self, authorization_code: &str) -> Result<Profile, Error> {
        let pair = self.client.exchange_code(authorization_code).await?;
        self.client.tokens().store_pair(&pair);
        self.login().await
    }

    /// Logout: best-effort server-side invalidation, then unconditional
    /// local cleanup. Emits [`SessionEvent::LoggedOut`] when cleanup is
    /// done; hosts redirect to the unauthenticated entry point on it.
    pub async fn logout(&self) {
        if let Err(e) = self.client.logout().await {
            tracing::warn!(error = %e, "server-side logout failed, continuing local cleanup");
        }
        self.client.tokens().clear();
        self.set_user(None);
        self.client.session_events().emit(SessionEvent::LoggedOut);
    }

    /// Re-fetch the profile on demand (e.g. after a nickname change
    /// elsewhere), replacing the in-memory user.
    ///
    /// # Errors
    ///
    /// Propagates fetch errors; the previous user is kept on failure.
    pub async fn reload_user(&self) -> Result<Profile, Error> {
        let profile = self.client.me().await?;
        self.set_user(Some(profile.clone()));
        Ok(profile)
    }

    /// Change the nickname and refresh the in-memory user from the
    /// server's response.
    ///
    /// # Errors
    ///
    /// Propagates the update failure; the previous user is kept.
    pub async fn rename(&self, nickname: &str) -> Result<Profile, Error> {
        let profile = self.client.update_nickname(nickname).await?;
        self.set_user(Some(profile.clone()));
        Ok(profile)
    }

    /// # Errors
    ///
    /// Propagates the availability check failure.
    pub async fn nickname_available(&self, nickname: &str) -> Result<bool, Error> {
        self.client.check_nickname(nickname).await
    }

    /// Reacts to the process-wide session-expired signal with a logout,
    /// once per signal, for as long as this future is polled. Hosts spawn
    /// it at mount and drop it at teardown.
    pub async fn run_expiry_listener(&self) {
        let mut rx = self.client.session_events().subscribe();
        loop {
            match rx.recv().await {
                Ok(SessionEvent::Expired) => self.logout().await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
