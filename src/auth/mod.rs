//! Auth Backend (C3): per-flow token acquisition/refresh, with coalesced
//! concurrent refreshes.
//!
//! One `GrantRequest` tagged variant plus one `exchange()` function is the
//! shared refresh code path (design notes, "Two ambient-grant flows sharing
//! a token endpoint"); each flow-specific method on [`AuthBackend`] only
//! builds the variant appropriate to it.

mod state;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use url::Url;

use crate::error::{AuthFailureKind, Error, Result};
use crate::events::{Event, EventBus, RefreshReason};
use crate::token::{PkcePair, Token};
use crate::token_store::TokenStore;
use crate::transport::{HttpTransport, RawRequest};

use state::AuthState;

/// Below this many seconds until expiry, a cache hit also emits
/// `Event::TokenExpiring` so observers can pre-warm a refresh out of band.
/// This is telemetry only: it does not affect the refresh decision itself,
/// which stays skew-free per spec §4.1.
const EXPIRING_SOON_SECONDS: i64 = 300;

/// Which OAuth 2.0 grant flow this backend was constructed for (spec §3).
#[derive(Debug, Clone)]
pub enum AuthConfig {
    Pkce {
        client_id: String,
        scopes: Vec<String>,
        redirect_uri: String,
    },
    AuthorizationCode {
        client_id: String,
        client_secret: String,
        scopes: Vec<String>,
        redirect_uri: String,
    },
    ClientCredentials {
        client_id: String,
        client_secret: String,
        scopes: Vec<String>,
    },
}

impl AuthConfig {
    fn client_id(&self) -> &str {
        match self {
            AuthConfig::Pkce { client_id, .. }
            | AuthConfig::AuthorizationCode { client_id, .. }
            | AuthConfig::ClientCredentials { client_id, .. } => client_id,
        }
    }

    fn scopes(&self) -> &[String] {
        match self {
            AuthConfig::Pkce { scopes, .. }
            | AuthConfig::AuthorizationCode { scopes, .. }
            | AuthConfig::ClientCredentials { scopes, .. } => scopes,
        }
    }
}

/// One request body shape to exchange at the token endpoint (design notes:
/// a single tagged variant covers every flow and every refresh).
enum GrantRequest<'a> {
    PkceCodeExchange {
        code: &'a str,
        code_verifier: &'a str,
        redirect_uri: &'a str,
    },
    AuthCodeExchange {
        code: &'a str,
        redirect_uri: &'a str,
    },
    Refresh {
        refresh_token: &'a str,
        client_id_in_body: bool,
    },
    ClientCredentials,
}

/// Per-flow OAuth 2.0 token lifecycle: grant exchange, refresh, and
/// coalesced concurrent `access_token` calls (spec §4.1).
pub struct AuthBackend {
    config: AuthConfig,
    token_endpoint: String,
    authorize_endpoint: String,
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn HttpTransport>,
    events: Arc<EventBus>,
    request_timeout: Duration,
    state: AuthState,
}

const DEFAULT_AUTHORIZE_ENDPOINT: &str = "https://accounts.melodia.example.com/authorize";
const DEFAULT_TOKEN_ENDPOINT: &str = "https://accounts.melodia.example.com/api/token";

impl AuthBackend {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn HttpTransport>,
        events: Arc<EventBus>,
    ) -> Self {
        AuthBackend {
            config,
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            authorize_endpoint: DEFAULT_AUTHORIZE_ENDPOINT.to_string(),
            store,
            transport,
            events,
            request_timeout: Duration::from_secs(10),
            state: AuthState::new(),
        }
    }

    /// Overrides the token endpoint (spec §4.1: "Token endpoint path is
    /// configurable").
    pub fn with_token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.token_endpoint = url.into();
        self
    }

    pub fn with_authorize_endpoint(mut self, url: impl Into<String>) -> Self {
        self.authorize_endpoint = url.into();
        self
    }

    /// Loads a persisted token without refreshing it, for startup and tests.
    pub async fn load_persisted_tokens(&self) -> Result<Option<Token>> {
        self.store.load().await
    }

    /// Returns a non-expired token, refreshing if necessary. Concurrent
    /// callers observing an expired (or force-invalidated) cache share a
    /// single outbound refresh call (spec §4.1, §8 scenario 4).
    #[tracing::instrument(skip(self))]
    pub async fn access_token(&self, invalidate_previous: bool) -> Result<Token> {
        let decision = self.state.decide(invalidate_previous).await?;
        match decision {
            state::Decision::UseCached(token) => {
                let remaining = token.seconds_until_expiration();
                if remaining <= EXPIRING_SOON_SECONDS {
                    self.events
                        .emit(Event::TokenExpiring {
                            seconds_until_expiration: remaining,
                        })
                        .await;
                }
                Ok(token)
            }
            state::Decision::Await(mut rx) => {
                rx.wait_for_result().await
            }
            state::Decision::LeadRefresh(lead) => self.run_refresh(lead, RefreshReason::Automatic).await,
        }
    }

    async fn run_refresh(&self, lead: state::RefreshLead, reason: RefreshReason) -> Result<Token> {
        let seconds_until_expiration = lead
            .previous
            .as_ref()
            .map(|t| t.seconds_until_expiration())
            .unwrap_or(0);

        self.events
            .emit(Event::TokenRefreshWillStart {
                reason,
                seconds_until_expiration,
            })
            .await;

        let outcome = if matches!(self.config, AuthConfig::ClientCredentials { .. }) {
            // App-only tokens carry no refresh_token; they are renewed by
            // re-running the grant, not by refreshing (spec §4.1).
            self.exchange(GrantRequest::ClientCredentials).await
        } else {
            match &lead.previous {
                Some(prev) => match &prev.refresh_token {
                    Some(refresh_token) => self.refresh(refresh_token).await,
                    None => Err(Error::AuthFailure {
                        kind: AuthFailureKind::MissingRefreshToken,
                    }),
                },
                None => self.load_or_fail().await,
            }
        };

        match &outcome {
            Ok(token) => {
                tracing::info!(expires_at = %token.expires_at, "token refresh succeeded");
                self.events
                    .emit(Event::TokenRefreshDidSucceed {
                        new_token: token.clone(),
                    })
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                self.events
                    .emit(Event::TokenRefreshDidFail {
                        error: e.to_string(),
                    })
                    .await;
            }
        }

        self.state.finish(lead, &outcome).await;
        outcome
    }

    /// There is no cached token yet. A client-credentials backend can
    /// always mint its own app-only token; every other flow must fall back
    /// to whatever was last persisted, or fail if nothing was.
    async fn load_or_fail(&self) -> Result<Token> {
        if matches!(self.config, AuthConfig::ClientCredentials { .. }) {
            return self.exchange(GrantRequest::ClientCredentials).await;
        }
        if let Some(token) = self.store.load().await? {
            return Ok(token);
        }
        Err(Error::AuthFailure {
            kind: AuthFailureKind::MissingRefreshToken,
        })
    }

    /// Builds the authorization URL for the PKCE or Authorization Code
    /// flow, returning it together with the [`PkcePair`] the caller must
    /// hold onto until `handle_callback` (spec §4.1).
    pub fn build_authorization_url(&self, show_dialog: bool) -> Result<(Url, PkcePair)> {
        let pkce = PkcePair::generate();
        let mut url = Url::parse(&self.authorize_endpoint)?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", self.config.client_id());
            pairs.append_pair("scope", &self.config.scopes().join(" "));
            pairs.append_pair("state", &pkce.state);

            match &self.config {
                AuthConfig::Pkce { redirect_uri, .. } => {
                    pairs.append_pair("redirect_uri", redirect_uri);
                    pairs.append_pair("code_challenge", &pkce.challenge);
                    pairs.append_pair("code_challenge_method", "S256");
                }
                AuthConfig::AuthorizationCode { redirect_uri, .. } => {
                    pairs.append_pair("redirect_uri", redirect_uri);
                }
                AuthConfig::ClientCredentials { .. } => {
                    return Err(Error::InvalidConfiguration {
                        kind: "client credentials flow has no authorization URL".into(),
                    });
                }
            }

            if show_dialog {
                pairs.append_pair("show_dialog", "true");
            }
        }

        Ok((url, pkce))
    }

    /// Parses the redirect callback URL, verifies `state`, and exchanges
    /// `code` for a token (spec §4.1).
    pub async fn handle_callback(&self, callback_url: &str, pkce: &PkcePair) -> Result<Token> {
        let url = Url::parse(callback_url).map_err(|_| Error::AuthFailure {
            kind: AuthFailureKind::InvalidCallback,
        })?;
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        if let Some(error) = params.get("error") {
            return Err(Error::AuthFailure {
                kind: AuthFailureKind::AuthorizationDenied {
                    code: error.clone(),
                    description: params.get("error_description").cloned(),
                },
            });
        }

        let state = params.get("state").ok_or(Error::AuthFailure {
            kind: AuthFailureKind::InvalidCallback,
        })?;
        if state != &pkce.state {
            return Err(Error::AuthFailure {
                kind: AuthFailureKind::InvalidCallback,
            });
        }

        let code = params.get("code").ok_or(Error::AuthFailure {
            kind: AuthFailureKind::InvalidCallback,
        })?;

        let grant = match &self.config {
            AuthConfig::Pkce { redirect_uri, .. } => GrantRequest::PkceCodeExchange {
                code,
                code_verifier: &pkce.verifier,
                redirect_uri,
            },
            AuthConfig::AuthorizationCode { redirect_uri, .. } => GrantRequest::AuthCodeExchange {
                code,
                redirect_uri,
            },
            AuthConfig::ClientCredentials { .. } => {
                return Err(Error::InvalidConfiguration {
                    kind: "client credentials flow has no callback".into(),
                });
            }
        };

        let token = self.exchange(grant).await?;
        self.store
            .save(&token)
            .await
            .map_err(|e| Error::TokenStorageError(e.to_string()))?;
        self.state.seed(token.clone()).await;
        Ok(token)
    }

    /// Exchanges a refresh token for a new access token (spec §4.1, §6).
    #[tracing::instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let client_id_in_body = matches!(self.config, AuthConfig::Pkce { .. });
        let token = self
            .exchange(GrantRequest::Refresh {
                refresh_token,
                client_id_in_body,
            })
            .await?;
        self.store
            .save(&token)
            .await
            .map_err(|e| Error::TokenStorageError(e.to_string()))?;
        Ok(token)
    }

    /// Exchanges client credentials for an app-only access token. Such
    /// tokens never carry a refresh token (spec §4.1).
    pub async fn client_credentials(&self) -> Result<Token> {
        if !matches!(self.config, AuthConfig::ClientCredentials { .. }) {
            return Err(Error::InvalidConfiguration {
                kind: "client_credentials() requires a ClientCredentials AuthConfig".into(),
            });
        }
        let token = self.exchange(GrantRequest::ClientCredentials).await?;
        self.store
            .save(&token)
            .await
            .map_err(|e| Error::TokenStorageError(e.to_string()))?;
        self.state.seed(token.clone()).await;
        Ok(token)
    }

    /// Clears cached and persisted tokens, returning the backend to its
    /// `Uninitialized` state (spec §4.1 state machine).
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        self.state.clear().await;
        Ok(())
    }

    /// The shared token-endpoint exchange, parameterized by [`GrantRequest`].
    /// HTTP Basic auth is used whenever the flow has a client secret;
    /// otherwise the client id travels in the form body (spec §4.1, §6).
    async fn exchange(&self, grant: GrantRequest<'_>) -> Result<Token> {
        let mut form: Vec<(&str, &str)> = Vec::new();
        let mut basic_auth: Option<(String, String)> = None;

        match (&self.config, &grant) {
            (AuthConfig::Pkce { client_id, .. }, GrantRequest::PkceCodeExchange {
                code,
                code_verifier,
                redirect_uri,
            }) => {
                form.push(("grant_type", "authorization_code"));
                form.push(("client_id", client_id));
                form.push(("code", code));
                form.push(("code_verifier", code_verifier));
                form.push(("redirect_uri", redirect_uri));
            }
            (
                AuthConfig::AuthorizationCode {
                    client_id,
                    client_secret,
                    ..
                },
                GrantRequest::AuthCodeExchange { code, redirect_uri },
            ) => {
                form.push(("grant_type", "authorization_code"));
                form.push(("code", code));
                form.push(("redirect_uri", redirect_uri));
                basic_auth = Some((client_id.clone(), client_secret.clone()));
            }
            (
                AuthConfig::Pkce { client_id, .. },
                GrantRequest::Refresh {
                    refresh_token,
                    client_id_in_body,
                },
            ) => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", refresh_token));
                if *client_id_in_body {
                    form.push(("client_id", client_id));
                }
            }
            (
                AuthConfig::AuthorizationCode {
                    client_id,
                    client_secret,
                    ..
                },
                GrantRequest::Refresh { refresh_token, .. },
            ) => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", refresh_token));
                basic_auth = Some((client_id.clone(), client_secret.clone()));
            }
            (
                AuthConfig::ClientCredentials {
                    client_id,
                    client_secret,
                    ..
                },
                GrantRequest::ClientCredentials,
            ) => {
                form.push(("grant_type", "client_credentials"));
                basic_auth = Some((client_id.clone(), client_secret.clone()));
            }
            _ => {
                return Err(Error::InvalidConfiguration {
                    kind: "grant request does not match this backend's auth flow".into(),
                });
            }
        }

        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter())
            .finish();

        let mut headers = std::collections::HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        if let Some((id, secret)) = &basic_auth {
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
            headers.insert("authorization".to_string(), format!("Basic {encoded}"));
        }

        let request = RawRequest {
            method: "POST".to_string(),
            url: self.token_endpoint.clone(),
            headers,
            body: Some(bytes::Bytes::from(body)),
        };

        let response = self.transport.execute(request, self.request_timeout).await?;

        if !response.is_success() {
            let body = String::from_utf8_lossy(&response.body).to_string();
            return Err(Error::AuthFailure {
                kind: AuthFailureKind::TokenEndpointHttp {
                    status: response.status,
                    body,
                },
            });
        }

        let parsed: TokenEndpointResponse =
            serde_json::from_slice(&response.body).map_err(|_| Error::UnexpectedResponse)?;

        Ok(Token::from_token_response(
            parsed.access_token,
            parsed.token_type,
            parsed.expires_in,
            parsed.refresh_token,
            parsed.scope,
        ))
    }
}

#[derive(serde::Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    token_type: String,
    expires_in: u64,
    refresh_token: Option<String>,
    scope: Option<String>,
}
