use chrono::{DateTime, Duration, Utc};

use super::{AuthError, TokenResponse};

/// Credentials persisted after a code exchange or refresh.
///
/// Always written as a whole: a refresh replaces every field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry as a Unix timestamp in seconds.
    pub expires_at: i64,
}

impl CredentialRecord {
    pub fn new(access_token: String, refresh_token: String, expires_at: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Build a record from a token response received at `issued_at`.
    pub fn from_response(
        response: &TokenResponse,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let expires_at = issued_at
            .timestamp()
            .checked_add(response.expires_in)
            .ok_or_else(|| {
                AuthError::MalformedResponse(format!(
                    "expires_in {} overflows the expiry timestamp",
                    response.expires_in
                ))
            })?;
        Ok(Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at,
        })
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }

    pub fn remaining(&self) -> Duration {
        Duration::seconds(self.expires_at - Utc::now().timestamp())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at
    }

    pub fn will_expire_within(&self, window: Duration) -> bool {
        (Utc::now() + window).timestamp() >= self.expires_at
    }
}
