use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{chown, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{Group, User};
use tracing::debug;

use crate::config::Config;

use super::{AuthError, CredentialRecord};

/// Persistence abstraction for the machine user's credentials.
pub trait CredentialStore {
    fn access_token(&self) -> Result<String, AuthError>;
    fn refresh_token(&self) -> Result<String, AuthError>;
    fn load(&self) -> Result<CredentialRecord, AuthError>;
    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError>;
}

/// Owner, group and permission bits applied to every credential file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOwnership {
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

impl FileOwnership {
    pub fn new(owner: impl Into<String>, group: impl Into<String>, mode: u32) -> Self {
        Self {
            owner: owner.into(),
            group: group.into(),
            mode,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.file_owner, &config.file_group, config.file_mode)
    }

    fn resolve(&self) -> Result<(u32, u32), AuthError> {
        let user = User::from_name(&self.owner)
            .map_err(|source| AuthError::AccountLookup {
                name: self.owner.clone(),
                source,
            })?
            .ok_or_else(|| AuthError::UnknownUser(self.owner.clone()))?;
        let group = Group::from_name(&self.group)
            .map_err(|source| AuthError::AccountLookup {
                name: self.group.clone(),
                source,
            })?
            .ok_or_else(|| AuthError::UnknownGroup(self.group.clone()))?;
        Ok((user.uid.as_raw(), group.gid.as_raw()))
    }
}

/// Locations of the three credential files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    pub access_token: PathBuf,
    pub expiry: PathBuf,
    pub refresh_token: PathBuf,
}

impl CredentialPaths {
    pub fn from_config(config: &Config) -> Self {
        Self {
            access_token: config.token_file.clone(),
            expiry: config.token_expiry_file.clone(),
            refresh_token: config.refresh_token_file.clone(),
        }
    }
}

/// Write `value` verbatim to `path`, then apply the ownership triple.
///
/// The owner and group are resolved before the file is touched, so an unknown
/// account never truncates an existing credential.
pub fn write_secret(value: &str, path: &Path, ownership: &FileOwnership) -> Result<(), AuthError> {
    let (uid, gid) = ownership.resolve()?;
    let write_err = |source| AuthError::CredentialWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(ownership.mode)
        .open(path)
        .map_err(write_err)?;
    file.write_all(value.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    let ownership_err = |source| AuthError::Ownership {
        path: path.to_path_buf(),
        source,
    };
    chown(path, Some(uid), Some(gid)).map_err(ownership_err)?;
    fs::set_permissions(path, fs::Permissions::from_mode(ownership.mode))
        .map_err(ownership_err)?;
    debug!(
        path = %path.display(),
        owner = %ownership.owner,
        group = %ownership.group,
        mode = %format!("{:o}", ownership.mode),
        "credential file written"
    );
    Ok(())
}

/// Read a credential file and strip surrounding whitespace.
pub fn read_secret(path: &Path) -> Result<String, AuthError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw.trim().to_owned()),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            Err(AuthError::CredentialMissing(path.to_path_buf()))
        }
        Err(err) if err.kind() == ErrorKind::InvalidData => {
            Err(AuthError::CredentialUnreadable(path.to_path_buf()))
        }
        Err(source) => Err(AuthError::CredentialRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Credential files on local disk, owned by the configured service account.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    paths: CredentialPaths,
    ownership: FileOwnership,
}

impl FileCredentialStore {
    pub fn new(paths: CredentialPaths, ownership: FileOwnership) -> Self {
        Self { paths, ownership }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            CredentialPaths::from_config(config),
            FileOwnership::from_config(config),
        )
    }

    pub fn paths(&self) -> &CredentialPaths {
        &self.paths
    }

    fn staging_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}.tmp"))
    }

    fn discard(staged: &[(PathBuf, &PathBuf)]) {
        for (staging, _) in staged {
            let _ = fs::remove_file(staging);
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn access_token(&self) -> Result<String, AuthError> {
        read_secret(&self.paths.access_token)
    }

    fn refresh_token(&self) -> Result<String, AuthError> {
        read_secret(&self.paths.refresh_token)
    }

    fn load(&self) -> Result<CredentialRecord, AuthError> {
        let raw_expiry = read_secret(&self.paths.expiry)?;
        let expires_at = raw_expiry
            .parse::<i64>()
            .map_err(|_| AuthError::InvalidExpiry {
                path: self.paths.expiry.clone(),
                value: raw_expiry.clone(),
            })?;
        Ok(CredentialRecord::new(
            self.access_token()?,
            self.refresh_token()?,
            expires_at,
        ))
    }

    /// Stage all three files next to their targets, then rename them into place.
    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        let expiry = record.expires_at.to_string();
        let entries = [
            (record.access_token.as_str(), &self.paths.access_token),
            (expiry.as_str(), &self.paths.expiry),
            (record.refresh_token.as_str(), &self.paths.refresh_token),
        ];

        let mut staged: Vec<(PathBuf, &PathBuf)> = Vec::with_capacity(entries.len());
        for (value, target) in entries {
            let staging = Self::staging_path(target);
            if let Err(err) = write_secret(value, &staging, &self.ownership) {
                let _ = fs::remove_file(&staging);
                Self::discard(&staged);
                return Err(err);
            }
            staged.push((staging, target));
        }

        for (index, (staging, target)) in staged.iter().enumerate() {
            if let Err(source) = fs::rename(staging, target) {
                Self::discard(&staged[index..]);
                return Err(AuthError::CredentialWrite {
                    path: (*target).clone(),
                    source,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn current_account_for_tests() -> (String, String) {
    use nix::unistd::{getgid, getuid};
    let user = User::from_uid(getuid()).unwrap().expect("current user has a passwd entry");
    let group = Group::from_gid(getgid()).unwrap().expect("current group has a group entry");
    (user.name, group.name)
}
