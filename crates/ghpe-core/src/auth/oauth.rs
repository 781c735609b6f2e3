use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::{Config, ConfigError};

use super::{AuthError, TokenStatus};

/// REST API version pinned on every request to the GitHub API.
pub const GITHUB_API_VERSION: &str = "2022-11-28";

const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const GITHUB_JSON: &str = "application/vnd.github+json";
const DEFAULT_USER_AGENT: &str = concat!("ghpe/", env!("CARGO_PKG_VERSION"));

/// Token pair issued by the code exchange or refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub refresh_token_expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// Performs OAuth exchanges with GitHub on behalf of one GitHub App.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    config: Config,
}

impl OAuthClient {
    /// Build a client whose requests are bounded by the configured timeout.
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let http = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(config.http_timeout)
            .connect_timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// URL the operator opens in a browser to authorize the app.
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.config.oauth_login_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.callback_uri)
            .append_pair("scope", &self.config.scope)
            .append_pair("state", state);
        url
    }

    /// Exchange an authorization code for the initial access/refresh token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AuthError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.callback_uri.as_str()),
        ];

        debug!(url = %self.config.token_url, "exchanging authorization code");
        let response = self
            .http
            .post(self.config.token_url.clone())
            .header(ACCEPT, "application/json")
            .form(&form[..])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint { status, body });
        }
        let token = parse_token_response(response).await?;
        info!("authorization code exchanged");
        Ok(token)
    }

    /// Ask GitHub whether `access_token` is still valid.
    pub async fn check_token(&self, access_token: &str) -> Result<TokenStatus, AuthError> {
        #[derive(Serialize)]
        struct CheckRequest<'a> {
            access_token: &'a str,
        }

        let url = self.introspection_url()?;
        debug!(url = %url, "checking token status");
        let response = self
            .http
            .post(url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(ACCEPT, GITHUB_JSON)
            .header(API_VERSION_HEADER, GITHUB_API_VERSION)
            .json(&CheckRequest { access_token })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_failure(response).await);
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|err| AuthError::MalformedResponse(err.to_string()))
    }

    /// Trade a refresh token for a new access/refresh token pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        #[derive(Serialize)]
        struct RefreshRequest<'a> {
            refresh_token: &'a str,
            grant_type: &'static str,
        }

        debug!(url = %self.config.token_url, "refreshing access token");
        let response = self
            .http
            .post(self.config.token_url.clone())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(ACCEPT, GITHUB_JSON)
            .header(API_VERSION_HEADER, GITHUB_API_VERSION)
            .json(&RefreshRequest {
                refresh_token,
                grant_type: "refresh_token",
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_failure(response).await);
        }
        let token = parse_token_response(response).await?;
        info!("access token refreshed");
        Ok(token)
    }

    fn introspection_url(&self) -> Result<Url, AuthError> {
        let mut url = self.config.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AuthError::Config(ConfigError::InvalidValue {
                    field: "github_api_url",
                    reason: format!("'{}' cannot carry a path", self.config.api_url),
                })
            })?
            .pop_if_empty()
            .extend(["applications", self.config.client_id.as_str(), "token"]);
        Ok(url)
    }
}

async fn api_failure(response: Response) -> AuthError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => AuthError::TokenNotFound,
        StatusCode::UNPROCESSABLE_ENTITY => AuthError::ValidationFailed { body },
        _ => AuthError::TokenEndpoint { status, body },
    }
}

async fn parse_token_response(response: Response) -> Result<TokenResponse, AuthError> {
    let body = response.text().await?;
    let raw: RawTokenResponse =
        serde_json::from_str(&body).map_err(|err| AuthError::MalformedResponse(err.to_string()))?;
    raw.into_token_response()
}

// GitHub answers OAuth failures with 200 and an `error` field.
#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token_expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl RawTokenResponse {
    fn into_token_response(self) -> Result<TokenResponse, AuthError> {
        if let Some(error) = self.error {
            return Err(AuthError::OAuthRejected {
                error,
                description: self.error_description,
            });
        }
        let missing = |field: &str| AuthError::MalformedResponse(format!("missing {field}"));
        Ok(TokenResponse {
            access_token: self.access_token.ok_or_else(|| missing("access_token"))?,
            refresh_token: self.refresh_token.ok_or_else(|| {
                AuthError::MalformedResponse(
                    "missing refresh_token; is user-token expiration enabled for the GitHub App?"
                        .into(),
                )
            })?,
            expires_in: match self.expires_in {
                Some(secs) if secs > 0 => secs,
                Some(secs) => {
                    return Err(AuthError::MalformedResponse(format!(
                        "non-positive expires_in {secs}"
                    )))
                }
                None => return Err(missing("expires_in")),
            },
            refresh_token_expires_in: self.refresh_token_expires_in,
            token_type: self.token_type,
            scope: self.scope,
        })
    }
}
