//! Form checks run on the device before anything is sent.

use crate::password::validate_password_policy;

/// Which field of the password-change form is wrong, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordChangeError {
    CurrentPassword(&'static str),
    NewPassword(&'static str),
    ConfirmPassword(&'static str),
}

impl PasswordChangeError {
    pub fn message(&self) -> &'static str {
        match self {
            PasswordChangeError::CurrentPassword(msg)
            | PasswordChangeError::NewPassword(msg)
            | PasswordChangeError::ConfirmPassword(msg) => msg,
        }
    }
}

/// Check a password-change form. Unlike the server, this also requires the
/// new password to differ from the current one.
pub fn validate_password_change(
    current: &str,
    new: &str,
    confirm: &str,
) -> Result<(), PasswordChangeError> {
    if current.is_empty() {
        return Err(PasswordChangeError::CurrentPassword(
            "Current password is required",
        ));
    }
    if new.is_empty() {
        return Err(PasswordChangeError::NewPassword("New password is required"));
    }
    if new == current {
        return Err(PasswordChangeError::NewPassword(
            "New password must be different from current password",
        ));
    }
    validate_password_policy(new).map_err(PasswordChangeError::NewPassword)?;
    if confirm.is_empty() {
        return Err(PasswordChangeError::ConfirmPassword(
            "Please confirm your new password",
        ));
    }
    if confirm != new {
        return Err(PasswordChangeError::ConfirmPassword("Passwords do not match"));
    }
    Ok(())
}
