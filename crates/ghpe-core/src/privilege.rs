use nix::unistd::geteuid;

use crate::auth::AuthError;

/// Whether the process runs with an effective uid of 0.
pub fn is_superuser() -> bool {
    geteuid().is_root()
}

/// Fail early when credential files cannot be chowned by this process.
pub fn ensure_superuser() -> Result<(), AuthError> {
    if is_superuser() {
        Ok(())
    } else {
        Err(AuthError::InsufficientPrivilege)
    }
}
