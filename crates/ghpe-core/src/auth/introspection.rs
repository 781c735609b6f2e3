use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata returned by `POST /applications/{client_id}/token`.
///
/// The echoed `token` field is not captured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenStatus {
    pub id: Option<u64>,
    pub url: Option<String>,
    pub token_last_eight: Option<String>,
    pub hashed_token: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub note: Option<String>,
    pub fingerprint: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub app: Option<TokenApp>,
    pub user: Option<TokenUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenApp {
    pub name: Option<String>,
    pub url: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUser {
    pub login: String,
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl TokenStatus {
    pub fn login(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.login.as_str())
    }
}
