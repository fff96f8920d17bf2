//! Room and user name rules.

use thiserror::Error;

/// Room used when a client does not name one.
pub const DEFAULT_ROOM: &str = "general";

/// Display name used when a client does not supply one.
pub const DEFAULT_USERNAME: &str = "anonymous";

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 128;

/// Maximum username length.
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Name validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// The name has no characters.
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// The name exceeds its character limit.
    #[error("{0} too long (max {1} characters)")]
    TooLong(&'static str, usize),

    /// The name contains control characters.
    #[error("{0} contains control characters")]
    InvalidCharacters(&'static str),
}

fn validate(what: &'static str, name: &str, max: usize) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty(what));
    }
    if name.chars().count() > max {
        return Err(NameError::TooLong(what, max));
    }
    if name.chars().any(char::is_control) {
        return Err(NameError::InvalidCharacters(what));
    }
    Ok(())
}

/// Validate a room name.
///
/// # Errors
///
/// Returns an error if the name is empty, too long, or contains control characters.
pub fn validate_room_name(name: &str) -> Result<(), NameError> {
    validate("Room name", name, MAX_ROOM_NAME_LENGTH)
}

/// Validate a display name.
///
/// # Errors
///
/// Returns an error if the name is empty, too long, or contains control characters.
pub fn validate_username(name: &str) -> Result<(), NameError> {
    validate("Username", name, MAX_USERNAME_LENGTH)
}
