use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_FILE_OWNER: &str = "pe-puppet";
pub const DEFAULT_FILE_GROUP: &str = "pe-puppet";
pub const DEFAULT_FILE_MODE: u32 = 0o600;
pub const DEFAULT_STATE_LENGTH: usize = 20;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Exit status reported for every configuration failure. Kept off 2, which
/// clap uses for usage errors.
pub const EXIT_CONFIG: u8 = 10;

const PENDING_AUTHORIZATION_FILE: &str = ".pending-authorization.json";

/// Settings for one GitHub App and the machine user's credential files.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub oauth_login_url: Url,
    pub token_url: Url,
    pub callback_uri: String,
    pub scope: String,
    pub token_file: PathBuf,
    pub token_expiry_file: PathBuf,
    pub refresh_token_file: PathBuf,
    pub api_url: Url,
    pub file_owner: String,
    pub file_group: String,
    pub file_mode: u32,
    pub state_file: Option<PathBuf>,
    pub state_length: usize,
    pub http_timeout: Duration,
}

impl Config {
    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject(path.to_path_buf()));
        }
        let raw: RawConfig =
            serde_json::from_value(value).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        raw.validate()
    }

    /// Location of the pending authorization record.
    ///
    /// Defaults to a hidden file beside the access token, so the path does not
    /// depend on the invoking user's home directory.
    pub fn state_file(&self) -> PathBuf {
        match &self.state_file {
            Some(path) => path.clone(),
            None => {
                let dir = self
                    .token_file
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                dir.join(PENDING_AUTHORIZATION_FILE)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(base_url: &str, root: &Path) -> Self {
        let (owner, group) = crate::auth::current_account_for_tests();
        Self {
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            oauth_login_url: Url::parse("https://github.com/login/oauth/authorize").unwrap(),
            token_url: Url::parse(&format!("{base_url}/login/oauth/access_token")).unwrap(),
            callback_uri: "https://example.com/callback".into(),
            scope: "repo".into(),
            token_file: root.join("token"),
            token_expiry_file: root.join("token_expiry"),
            refresh_token_file: root.join("refresh_token"),
            api_url: Url::parse(base_url).unwrap(),
            file_owner: owner,
            file_group: group,
            file_mode: DEFAULT_FILE_MODE,
            state_file: Some(root.join("state.json")),
            state_length: DEFAULT_STATE_LENGTH,
            http_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    github_client_id: Option<String>,
    github_client_secret: Option<String>,
    github_oauth_login_url: Option<String>,
    github_token_url: Option<String>,
    callback_uri: Option<String>,
    scope: Option<String>,
    token_file: Option<String>,
    token_expiry_file: Option<String>,
    refresh_token_file: Option<String>,
    github_api_url: Option<String>,
    file_owner: Option<String>,
    file_group: Option<String>,
    file_mode: Option<String>,
    state_file: Option<String>,
    state_length: Option<usize>,
    http_timeout_secs: Option<u64>,
}

impl RawConfig {
    fn validate(self) -> Result<Config, ConfigError> {
        let oauth_login_url = parse_url(
            required(self.github_oauth_login_url, "github_oauth_login_url")?,
            "github_oauth_login_url",
        )?;
        let token_url = parse_url(
            required(self.github_token_url, "github_token_url")?,
            "github_token_url",
        )?;
        let api_url = parse_url(
            optional(self.github_api_url).unwrap_or_else(|| DEFAULT_API_URL.to_owned()),
            "github_api_url",
        )?;
        if api_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                field: "github_api_url",
                reason: format!("'{api_url}' cannot carry a path"),
            });
        }
        let file_mode = match optional(self.file_mode) {
            Some(mode) => parse_mode(&mode)?,
            None => DEFAULT_FILE_MODE,
        };

        let state_length = self.state_length.unwrap_or(DEFAULT_STATE_LENGTH);
        if state_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "state_length",
                reason: "must be greater than zero".into(),
            });
        }
        let timeout_secs = self.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Config {
            client_id: required(self.github_client_id, "github_client_id")?,
            client_secret: required(self.github_client_secret, "github_client_secret")?,
            oauth_login_url,
            token_url,
            callback_uri: required(self.callback_uri, "callback_uri")?,
            scope: required(self.scope, "scope")?,
            token_file: required(self.token_file, "token_file")?.into(),
            token_expiry_file: required(self.token_expiry_file, "token_expiry_file")?.into(),
            refresh_token_file: required(self.refresh_token_file, "refresh_token_file")?.into(),
            api_url,
            file_owner: optional(self.file_owner).unwrap_or_else(|| DEFAULT_FILE_OWNER.to_owned()),
            file_group: optional(self.file_group).unwrap_or_else(|| DEFAULT_FILE_GROUP.to_owned()),
            file_mode,
            state_file: optional(self.state_file).map(PathBuf::from),
            state_length,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    optional(value).ok_or(ConfigError::MissingField(field))
}

fn optional(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_url(value: String, field: &'static str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl { field, source })
}

fn parse_mode(value: &str) -> Result<u32, ConfigError> {
    let digits = value.trim().trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(ConfigError::InvalidValue {
            field: "file_mode",
            reason: format!("'{value}' is not an octal permission mode"),
        }),
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at '{}'", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read configuration file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in configuration file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration file '{}' does not contain a JSON object at the top level", .0.display())]
    NotAnObject(PathBuf),
    #[error("configuration is missing required key '{0}'")]
    MissingField(&'static str),
    #[error("configuration key '{field}' is not a valid URL: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("configuration key '{field}' is invalid: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn exit_code(&self) -> u8 {
        EXIT_CONFIG
    }
}
