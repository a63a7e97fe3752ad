//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted username, in characters.
pub const MAX_USERNAME_LEN: usize = 64;

/// Validates that a username is 1 to 64 characters with no whitespace or control characters.
///
/// # Examples
///
/// ```ignore
/// validate_username("alice")     // Ok
/// validate_username("")          // Err - empty
/// validate_username("ali ce")    // Err - whitespace
/// ```
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let len = username.chars().count();
    if len == 0 || len > MAX_USERNAME_LEN {
        let mut err = ValidationError::new("username_length");
        err.message = Some(
            format!("Username must be between 1 and {MAX_USERNAME_LEN} characters (got {len})")
                .into(),
        );
        return Err(err);
    }

    if username
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        let mut err = ValidationError::new("username_format");
        err.message = Some("Username must not contain whitespace or control characters".into());
        return Err(err);
    }

    Ok(())
}
