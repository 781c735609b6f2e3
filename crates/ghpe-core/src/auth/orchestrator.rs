use chrono::{Duration, Utc};
use tracing::{info, warn};
use url::Url;

use super::manual::parse_authorization_input;
use super::pending::{verify_state, PendingAuthorization, PendingAuthorizationStore};
use super::{utils, AuthError, CredentialRecord, CredentialStore, OAuthClient, TokenStatus};
use crate::privilege;

/// Check run before any step that writes owner-restricted credential files.
pub type PrivilegeCheck = fn() -> Result<(), AuthError>;

/// Result of a refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(CredentialRecord),
    /// The stored token outlives the requested window, so nothing was sent.
    Skipped(CredentialRecord),
}

impl RefreshOutcome {
    pub fn record(&self) -> &CredentialRecord {
        match self {
            RefreshOutcome::Refreshed(record) | RefreshOutcome::Skipped(record) => record,
        }
    }
}

/// Sequences the OAuth exchanges with credential persistence.
pub struct TokenManager<S> {
    store: S,
    oauth: OAuthClient,
    pending: PendingAuthorizationStore,
    privilege: PrivilegeCheck,
}

impl<S> TokenManager<S>
where
    S: CredentialStore,
{
    pub fn new(store: S, oauth: OAuthClient, pending: PendingAuthorizationStore) -> Self {
        Self {
            store,
            oauth,
            pending,
            privilege: privilege::ensure_superuser,
        }
    }

    /// Replace the superuser check guarding code exchange and refresh.
    pub fn with_privilege_check(mut self, check: PrivilegeCheck) -> Self {
        self.privilege = check;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Generate the authorization URL and remember its state for the exchange step.
    pub fn begin_authorization(&self, open_browser: bool) -> Result<Url, AuthError> {
        let state = utils::random_state(self.oauth.config().state_length);
        let url = self.oauth.authorization_url(&state);
        self.pending.save(&PendingAuthorization::new(state))?;
        info!(state_file = %self.pending.path().display(), "pending authorization recorded");

        if open_browser {
            open::that(url.as_str()).map_err(|err| AuthError::BrowserLaunch(err.to_string()))?;
        }
        Ok(url)
    }

    /// Exchange a pasted code or redirect URL and persist the initial credentials.
    pub async fn complete_authorization(&self, input: &str) -> Result<CredentialRecord, AuthError> {
        (self.privilege)()?;
        let response = parse_authorization_input(input)?;
        match response.state.as_deref() {
            Some(returned) => {
                let pending = self.pending.load()?;
                verify_state(pending.as_ref(), returned, Utc::now())?;
            }
            None => warn!("authorization code supplied without state; anti-forgery check skipped"),
        }

        let token = self.oauth.exchange_code(&response.code).await?;
        let record = CredentialRecord::from_response(&token, Utc::now())?;
        self.store.save(&record)?;
        info!(expires_at = record.expires_at, "initial credentials stored");

        if let Err(err) = self.pending.clear() {
            warn!(error = %err, "failed to clear pending authorization");
        }
        Ok(record)
    }

    /// Replace the stored credentials using the stored refresh token.
    ///
    /// With `min_remaining`, the exchange is skipped while the stored token
    /// stays valid for longer than that window.
    pub async fn refresh(&self, min_remaining: Option<Duration>) -> Result<RefreshOutcome, AuthError> {
        (self.privilege)()?;
        if let Some(window) = min_remaining {
            match self.store.load() {
                Ok(record) if !record.will_expire_within(window) => {
                    info!(expires_at = record.expires_at, "token still valid; refresh skipped");
                    return Ok(RefreshOutcome::Skipped(record));
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "stored expiry unavailable; refreshing"),
            }
        }

        let refresh_token = self.store.refresh_token()?;
        let token = self.oauth.refresh(&refresh_token).await?;
        let record = CredentialRecord::from_response(&token, Utc::now())?;
        self.store.save(&record)?;
        info!(
            expires_at = record.expires_at,
            refresh_token_expires_in = token.refresh_token_expires_in,
            "refreshed credentials stored"
        );
        Ok(RefreshOutcome::Refreshed(record))
    }

    /// Introspect the stored access token without touching any credential file.
    pub async fn check_status(&self) -> Result<TokenStatus, AuthError> {
        let access_token = self.store.access_token()?;
        self.oauth.check_token(&access_token).await
    }

    pub fn stored_record(&self) -> Result<CredentialRecord, AuthError> {
        self.store.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FileCredentialStore;
    use crate::config::Config;
    use httpmock::prelude::*;
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const TOKEN_PATH: &str = "/login/oauth/access_token";
    const CHECK_PATH: &str = "/applications/client-id/token";

    #[derive(Clone, Default)]
    struct MemoryStore {
        inner: Arc<Mutex<Option<CredentialRecord>>>,
        saves: Arc<Mutex<usize>>,
    }

    impl MemoryStore {
        fn with(record: CredentialRecord) -> Self {
            let store = Self::default();
            *store.inner.lock().unwrap() = Some(record);
            store
        }

        fn current(&self) -> Option<CredentialRecord> {
            self.inner.lock().unwrap().clone()
        }

        fn save_count(&self) -> usize {
            *self.saves.lock().unwrap()
        }

        fn missing() -> AuthError {
            AuthError::CredentialMissing("memory".into())
        }
    }

    impl CredentialStore for MemoryStore {
        fn access_token(&self) -> Result<String, AuthError> {
            self.current()
                .map(|record| record.access_token)
                .ok_or_else(Self::missing)
        }

        fn refresh_token(&self) -> Result<String, AuthError> {
            self.current()
                .map(|record| record.refresh_token)
                .ok_or_else(Self::missing)
        }

        fn load(&self) -> Result<CredentialRecord, AuthError> {
            self.current().ok_or_else(Self::missing)
        }

        fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
            *self.inner.lock().unwrap() = Some(record.clone());
            *self.saves.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn manager<S: CredentialStore>(store: S, base_url: &str, root: &Path) -> TokenManager<S> {
        let config = Config::for_tests(base_url, root);
        let pending = PendingAuthorizationStore::new(config.state_file());
        TokenManager::new(store, OAuthClient::new(&config).unwrap(), pending)
            .with_privilege_check(|| Ok(()))
    }

    fn file_manager(base_url: &str, root: &Path) -> TokenManager<FileCredentialStore> {
        let config = Config::for_tests(base_url, root);
        manager(FileCredentialStore::from_config(&config), base_url, root)
    }

    fn read(root: &Path, name: &str) -> String {
        fs::read_to_string(root.join(name)).unwrap()
    }

    #[test]
    fn begin_authorization_persists_state_from_url() {
        let dir = TempDir::new().unwrap();
        let manager = manager(MemoryStore::default(), "http://localhost", dir.path());
        let url = manager.begin_authorization(false).unwrap();

        let state = url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        assert_eq!(state.len(), 20);
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
        let pending = manager.pending.load().unwrap().unwrap();
        assert_eq!(pending.state, state);
    }

    #[tokio::test]
    async fn complete_authorization_verifies_state_and_persists() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(TOKEN_PATH).body_contains("code=abc");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "A",
                    "refresh_token": "R",
                    "expires_in": 28800,
                    "token_type": "bearer"
                }));
            })
            .await;

        let dir = TempDir::new().unwrap();
        let manager = file_manager(&server.base_url(), dir.path());
        let url = manager.begin_authorization(false).unwrap();
        let state = url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap();

        let before = Utc::now().timestamp();
        let record = manager
            .complete_authorization(&format!("https://example.com/callback?code=abc&state={state}"))
            .await
            .unwrap();
        let after = Utc::now().timestamp();

        mock.assert_async().await;
        assert_eq!(read(dir.path(), "token"), "A");
        assert_eq!(read(dir.path(), "refresh_token"), "R");
        assert!((before + 28800..=after + 28800).contains(&record.expires_at));
        assert_eq!(read(dir.path(), "token_expiry"), record.expires_at.to_string());
        assert!(manager.pending.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_authorization_rejects_forged_state() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(TOKEN_PATH);
                then.status(200).json_body(serde_json::json!({
                    "access_token": "A",
                    "refresh_token": "R",
                    "expires_in": 3600
                }));
            })
            .await;

        let dir = TempDir::new().unwrap();
        let store = MemoryStore::default();
        let manager = manager(store.clone(), &server.base_url(), dir.path());
        manager.begin_authorization(false).unwrap();

        let err = manager
            .complete_authorization("https://example.com/callback?code=abc&state=forged")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
        mock.assert_hits_async(0).await;
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn complete_authorization_accepts_bare_code() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(TOKEN_PATH).body_contains("code=raw-code");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "A",
                    "refresh_token": "R",
                    "expires_in": 3600
                }));
            })
            .await;

        let dir = TempDir::new().unwrap();
        let store = MemoryStore::default();
        let manager = manager(store.clone(), &server.base_url(), dir.path());
        let record = manager.complete_authorization("raw-code").await.unwrap();
        assert_eq!(record.access_token, "A");
        assert_eq!(store.current(), Some(record));
    }

    #[tokio::test]
    async fn refresh_persists_new_record_at_issue_time_plus_lifetime() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(TOKEN_PATH)
                    .json_body(serde_json::json!({
                        "refresh_token": "old-refresh",
                        "grant_type": "refresh_token"
                    }));
                then.status(200).json_body(serde_json::json!({
                    "access_token": "A",
                    "refresh_token": "R",
                    "expires_in": 3600
                }));
            })
            .await;

        let dir = TempDir::new().unwrap();
        let manager = file_manager(&server.base_url(), dir.path());
        manager
            .store()
            .save(&CredentialRecord::new("old".into(), "old-refresh".into(), 1))
            .unwrap();

        let before = Utc::now().timestamp();
        let outcome = manager.refresh(None).await.unwrap();
        let after = Utc::now().timestamp();

        mock.assert_async().await;
        let RefreshOutcome::Refreshed(record) = outcome else {
            panic!("expected a refresh");
        };
        assert_eq!(read(dir.path(), "token"), "A");
        assert_eq!(read(dir.path(), "refresh_token"), "R");
        let expiry: i64 = read(dir.path(), "token_expiry").parse().unwrap();
        assert_eq!(expiry, record.expires_at);
        assert!((before + 3600..=after + 3600).contains(&expiry));
    }

    #[tokio::test]
    async fn refresh_failure_leaves_files_untouched() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(TOKEN_PATH);
                then.status(422).body("Validation Failed");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let manager = file_manager(&server.base_url(), dir.path());
        let previous = CredentialRecord::new("old".into(), "old-refresh".into(), 42);
        manager.store().save(&previous).unwrap();

        let err = manager.refresh(None).await.unwrap_err();
        assert!(matches!(err, AuthError::ValidationFailed { .. }));
        assert_eq!(manager.stored_record().unwrap(), previous);
        assert_eq!(read(dir.path(), "token_expiry"), "42");
    }

    #[tokio::test]
    async fn refresh_skipped_while_token_outlives_window() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(TOKEN_PATH);
                then.status(200).json_body(serde_json::json!({
                    "access_token": "A",
                    "refresh_token": "R",
                    "expires_in": 3600
                }));
            })
            .await;

        let dir = TempDir::new().unwrap();
        let fresh = CredentialRecord::new(
            "current".into(),
            "refresh".into(),
            Utc::now().timestamp() + 7200,
        );
        let store = MemoryStore::with(fresh.clone());
        let manager = manager(store.clone(), &server.base_url(), dir.path());

        let outcome = manager.refresh(Some(Duration::hours(1))).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Skipped(fresh));
        mock.assert_hits_async(0).await;

        let outcome = manager.refresh(Some(Duration::hours(3))).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
        assert_eq!(outcome.record().access_token, "A");
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn refresh_without_stored_refresh_token_fails_before_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(TOKEN_PATH);
                then.status(200);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let manager = file_manager(&server.base_url(), dir.path());
        let err = manager.refresh(None).await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialMissing(_)));
        mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn expired_token_check_is_classified_and_writes_nothing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(CHECK_PATH);
                then.status(404).json_body(serde_json::json!({ "message": "Not Found" }));
            })
            .await;

        let dir = TempDir::new().unwrap();
        let store = MemoryStore::with(CredentialRecord::new("gone".into(), "r".into(), 0));
        let manager = manager(store.clone(), &server.base_url(), dir.path());

        for _ in 0..2 {
            let err = manager.check_status().await.unwrap_err();
            assert!(matches!(err, AuthError::TokenNotFound));
        }
        assert_eq!(store.save_count(), 0);
        assert!(!dir.path().join("token").exists());
    }

    #[tokio::test]
    async fn valid_token_check_is_repeatable() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(CHECK_PATH)
                    .json_body(serde_json::json!({ "access_token": "live" }));
                then.status(200).json_body(serde_json::json!({
                    "id": 9,
                    "user": { "login": "pe-machine-user" }
                }));
            })
            .await;

        let dir = TempDir::new().unwrap();
        let store = MemoryStore::with(CredentialRecord::new("live".into(), "r".into(), 0));
        let manager = manager(store.clone(), &server.base_url(), dir.path());

        let first = manager.check_status().await.unwrap();
        let second = manager.check_status().await.unwrap();
        assert_eq!(first, second);
        mock.assert_hits_async(2).await;
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn unprivileged_exchange_and_refresh_stop_before_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(TOKEN_PATH);
                then.status(200).json_body(serde_json::json!({
                    "access_token": "A",
                    "refresh_token": "R",
                    "expires_in": 3600
                }));
            })
            .await;

        let dir = TempDir::new().unwrap();
        let store = MemoryStore::with(CredentialRecord::new("old".into(), "old-refresh".into(), 0));
        let manager = manager(store.clone(), &server.base_url(), dir.path())
            .with_privilege_check(|| Err(AuthError::InsufficientPrivilege));

        let err = manager.refresh(None).await.unwrap_err();
        assert!(matches!(err, AuthError::InsufficientPrivilege));
        assert_eq!(err.exit_code(), crate::auth::EXIT_PRIVILEGE);

        let err = manager.complete_authorization("raw-code").await.unwrap_err();
        assert!(matches!(err, AuthError::InsufficientPrivilege));

        mock.assert_hits_async(0).await;
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn default_privilege_check_follows_effective_uid() {
        let dir = TempDir::new().unwrap();
        let config = Config::for_tests("http://localhost", dir.path());
        let manager = TokenManager::new(
            MemoryStore::default(),
            OAuthClient::new(&config).unwrap(),
            PendingAuthorizationStore::new(config.state_file()),
        );
        assert_eq!(
            (manager.privilege)().is_ok(),
            crate::privilege::is_superuser()
        );
    }
}
