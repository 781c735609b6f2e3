//! Core library for the GitHub App user-token lifecycle used by the `ghpe` CLI.
//!
//! Credentials are persisted as three flat files (access token, expiry, refresh
//! token) owned by a service account, so every invocation starts from disk.

#[cfg(not(unix))]
compile_error!("ghpe-core manages POSIX file ownership and only supports Unix targets");

pub mod auth;
pub mod config;
pub mod privilege;
