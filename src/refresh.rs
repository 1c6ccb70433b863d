//! Single-flight token refresh.
//!
//! At most one refresh call is in flight process-wide. The flight flag is a
//! `std::sync::Mutex` checked synchronously and never held across an await
//! point; ordering (refresh completion strictly precedes every replay) falls
//! out of the waiter queue, not out of locks.

use std::mem;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::oneshot;
use url::Url;

use crate::error::Error;
use crate::events::{SessionEvent, SessionEvents};
use crate::store::TokenStore;
use crate::types::TokenPair;

/// Waiters receive the rotated access token, or the refresh error rendered
/// to a string (the error itself is not cloneable across the queue).
type WaiterResult = Result<String, String>;

enum Flight {
    Idle,
    Refreshing { waiters: Vec<oneshot::Sender<WaiterResult>> },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

pub(crate) struct TokenRefresher {
    http: reqwest::Client,
    refresh_url: Url,
    tokens: TokenStore,
    events: SessionEvents,
    flight: Mutex<Flight>,
}

impl TokenRefresher {
    pub(crate) fn new(
        http: reqwest::Client,
        refresh_url: Url,
        tokens: TokenStore,
        events: SessionEvents,
    ) -> Self {
        Self {
            http,
            refresh_url,
            tokens,
            events,
            flight: Mutex::new(Flight::Idle),
        }
    }

    /// Obtain a usable access token after a 401, refreshing if necessary.
    ///
    /// Every caller enqueues as a FIFO waiter; the caller that finds the
    /// machine `Idle` additionally spawns the one refresh flight. The flight
    /// runs to completion even if every caller is cancelled, so a dropped
    /// view cannot wedge the machine mid-refresh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] when the refresh fails or no
    /// refresh credential is stored. By then stored credentials are cleared
    /// and [`SessionEvent::Expired`] has been broadcast.
    pub(crate) async fn fresh_access_token(self: Arc<Self>) -> Result<String, Error> {
        let (rx, leads) = {
            let mut flight = self.flight.lock().unwrap_or_else(|e| e.into_inner());
            let (tx, rx) = oneshot::channel();
            match &mut *flight {
                Flight::Refreshing { waiters } => {
                    waiters.push(tx);
                    (rx, false)
                }
                Flight::Idle => {
                    *flight = Flight::Refreshing { waiters: vec![tx] };
                    (rx, true)
                }
            }
        };

        if leads {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.drive_refresh().await });
        }

        match rx.await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(detail)) => Err(Error::SessionExpired(detail)),
            Err(_) => Err(Error::SessionExpired("refresh flight aborted".into())),
        }
    }

    async fn drive_refresh(&self) {
        let outcome = self.run_refresh().await;

        let waiters = {
            let mut flight = self.flight.lock().unwrap_or_else(|e| e.into_inner());
            match mem::replace(&mut *flight, Flight::Idle) {
                Flight::Refreshing { waiters } => waiters,
                Flight::Idle => Vec::new(),
            }
        };

        match outcome {
            Ok(token) => {
                for waiter in waiters {
                    let _ = waiter.send(Ok(token.clone()));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "credential refresh failed, session expired");
                let detail = e.to_string();
                self.tokens.clear();
                self.events.emit(SessionEvent::Expired);
                for waiter in waiters {
                    let _ = waiter.send(Err(detail.clone()));
                }
            }
        }
    }

    async fn run_refresh(&self) -> Result<String, Error> {
        // No stored refresh credential short-circuits straight to the
        // failure path without calling the server.
        let Some(refresh_token) = self.tokens.refresh_token() else {
            return Err(Error::SessionExpired("no refresh credential stored".into()));
        };

        // The access credential is known expired; drop it up front so no
        // request keeps presenting it while the flight is pending.
        self.tokens.clear_access_token();

        tracing::debug!("refreshing access credential");
        // Refresh carries its credential in the body, never as a bearer
        // header, to avoid a circular auth dependency.
        let response = self
            .http
            .post(self.refresh_url.clone())
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                operation: "token refresh",
                status,
                detail,
            });
        }

        let pair: TokenPair = response.json().await?;
        self.tokens.store_pair(&pair);
        Ok(pair.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refresher(server_uri: &str) -> (Arc<TokenRefresher>, TokenStore, SessionEvents) {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        let events = SessionEvents::new();
        let url: Url = format!("{server_uri}/api/auth/refresh").parse().unwrap();
        let r = Arc::new(TokenRefresher::new(
            reqwest::Client::new(),
            url,
            tokens.clone(),
            events.clone(),
        ));
        (r, tokens, events)
    }

    #[tokio::test]
    async fn refresh_rotates_both_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(body_json(serde_json::json!({ "refreshToken": "r1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "fresh",
                "refreshToken": "r2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (refresher, tokens, _events) = refresher(&server.uri());
        tokens.store_pair(&TokenPair::new("stale", "r1"));

        let token = refresher.clone().fresh_access_token().await.unwrap();
        assert_eq!(token, "fresh");
        assert_eq!(tokens.access_token(), Some("fresh".into()));
        assert_eq!(tokens.refresh_token(), Some("r2".into()));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "accessToken": "fresh",
                        "refreshToken": "r2"
                    }))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (refresher, tokens, _events) = refresher(&server.uri());
        tokens.store_pair(&TokenPair::new("stale", "r1"));

        let (a, b, c) = tokio::join!(
            refresher.clone().fresh_access_token(),
            refresher.clone().fresh_access_token(),
            refresher.clone().fresh_access_token(),
        );
        assert_eq!(a.unwrap(), "fresh");
        assert_eq!(b.unwrap(), "fresh");
        assert_eq!(c.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn failure_rejects_all_waiters_clears_and_broadcasts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (refresher, tokens, events) = refresher(&server.uri());
        tokens.store_pair(&TokenPair::new("stale", "r1"));
        let mut rx = events.subscribe();

        let (a, b) = tokio::join!(refresher.clone().fresh_access_token(), refresher.clone().fresh_access_token());
        assert!(matches!(a, Err(Error::SessionExpired(_))));
        assert!(matches!(b, Err(Error::SessionExpired(_))));

        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token(), None);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn missing_refresh_credential_fails_without_calling_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (refresher, _tokens, events) = refresher(&server.uri());
        let mut rx = events.subscribe();

        let result = refresher.clone().fresh_access_token().await;
        assert!(matches!(result, Err(Error::SessionExpired(_))));
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn machine_returns_to_idle_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let (refresher, tokens, _events) = refresher(&server.uri());

        tokens.store_pair(&TokenPair::new("stale", "r1"));
        assert!(refresher.clone().fresh_access_token().await.is_err());

        // A later session can refresh again; the flight is not wedged.
        tokens.store_pair(&TokenPair::new("stale2", "r2"));
        assert!(refresher.clone().fresh_access_token().await.is_err());
    }
}
