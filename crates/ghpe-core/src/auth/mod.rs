mod credential_store;
mod error;
mod introspection;
mod manual;
mod oauth;
mod orchestrator;
mod pending;
mod record;
pub mod utils;

pub use credential_store::{
    read_secret, write_secret, CredentialPaths, CredentialStore, FileCredentialStore,
    FileOwnership,
};
pub use error::{
    AuthError, EXIT_AUTHORIZATION, EXIT_CREDENTIALS, EXIT_PRIVILEGE, EXIT_PROTOCOL,
    EXIT_TOKEN_NOT_FOUND, EXIT_TRANSPORT, EXIT_UNEXPECTED, EXIT_VALIDATION,
};
pub use introspection::{TokenApp, TokenStatus, TokenUser};
pub use manual::{parse_authorization_input, AuthorizationResponse};
pub use oauth::{OAuthClient, TokenResponse, GITHUB_API_VERSION};
pub use orchestrator::{PrivilegeCheck, RefreshOutcome, TokenManager};
pub use pending::{
    verify_state, PendingAuthorization, PendingAuthorizationStore, PENDING_AUTHORIZATION_TTL_SECS,
};
pub use record::CredentialRecord;

#[cfg(test)]
pub(crate) use credential_store::current_account_for_tests;
