use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

pub const EXIT_UNEXPECTED: u8 = 1;
pub const EXIT_TRANSPORT: u8 = 3;
pub const EXIT_TOKEN_NOT_FOUND: u8 = 4;
pub const EXIT_VALIDATION: u8 = 5;
pub const EXIT_PROTOCOL: u8 = 6;
pub const EXIT_CREDENTIALS: u8 = 7;
pub const EXIT_PRIVILEGE: u8 = 8;
pub const EXIT_AUTHORIZATION: u8 = 9;

/// Errors surfaced by the token lifecycle and credential management routines.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("resource not found: the token has expired or doesn't exist (HTTP 404)")]
    TokenNotFound,
    #[error("validation failed, or the endpoint has been spammed (HTTP 422): {body}")]
    ValidationFailed { body: String },
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: StatusCode, body: String },
    #[error("GitHub rejected the OAuth request: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    OAuthRejected {
        error: String,
        description: Option<String>,
    },
    #[error("malformed response from GitHub: {0}")]
    MalformedResponse(String),
    #[error("credential file not found at '{}'", .0.display())]
    CredentialMissing(PathBuf),
    #[error("failed to read credential file '{}': {source}", .path.display())]
    CredentialRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential file '{}' does not contain valid UTF-8 text", .0.display())]
    CredentialUnreadable(PathBuf),
    #[error("failed to write credential file '{}': {source}", .path.display())]
    CredentialWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("expiry file '{}' holds '{value}', expected a Unix timestamp", .path.display())]
    InvalidExpiry { path: PathBuf, value: String },
    #[error("user '{0}' does not exist on this host")]
    UnknownUser(String),
    #[error("group '{0}' does not exist on this host")]
    UnknownGroup(String),
    #[error("failed to look up account '{name}': {source}")]
    AccountLookup {
        name: String,
        #[source]
        source: nix::Error,
    },
    #[error("failed to set ownership or permissions on '{}': {source}", .path.display())]
    Ownership {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("this command must be run as root (try sudo)")]
    InsufficientPrivilege,
    #[error("authorization request denied ({0})")]
    AccessDenied(String),
    #[error("authorization response missing code parameter")]
    MissingAuthorizationCode,
    #[error("authorization state mismatch")]
    StateMismatch,
    #[error("pending authorization expired; generate a new authorization URL")]
    AuthorizationExpired,
    #[error("no pending authorization to verify the returned state against")]
    NoPendingAuthorization,
    #[error("pending authorization file '{}' is not accessible (run as root or set state_file): {source}", .path.display())]
    PendingState {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid authorization response: {0}")]
    InvalidAuthorizationResponse(String),
    #[error("failed to launch system browser: {0}")]
    BrowserLaunch(String),
}

impl AuthError {
    /// Process exit status for this class of failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            AuthError::Config(err) => err.exit_code(),
            AuthError::Http(_) => EXIT_TRANSPORT,
            AuthError::TokenNotFound => EXIT_TOKEN_NOT_FOUND,
            AuthError::ValidationFailed { .. } => EXIT_VALIDATION,
            AuthError::TokenEndpoint { .. }
            | AuthError::OAuthRejected { .. }
            | AuthError::MalformedResponse(_) => EXIT_PROTOCOL,
            AuthError::Io(_)
            | AuthError::CredentialMissing(_)
            | AuthError::CredentialRead { .. }
            | AuthError::CredentialUnreadable(_)
            | AuthError::CredentialWrite { .. }
            | AuthError::InvalidExpiry { .. }
            | AuthError::UnknownUser(_)
            | AuthError::UnknownGroup(_)
            | AuthError::AccountLookup { .. }
            | AuthError::Ownership { .. } => EXIT_CREDENTIALS,
            AuthError::InsufficientPrivilege => EXIT_PRIVILEGE,
            AuthError::AccessDenied(_)
            | AuthError::MissingAuthorizationCode
            | AuthError::StateMismatch
            | AuthError::AuthorizationExpired
            | AuthError::NoPendingAuthorization
            | AuthError::PendingState { .. }
            | AuthError::InvalidAuthorizationResponse(_) => EXIT_AUTHORIZATION,
            AuthError::Serde(_) | AuthError::BrowserLaunch(_) => EXIT_UNEXPECTED,
        }
    }
}
