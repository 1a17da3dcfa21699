//! Channel naming rules.
//!
//! Private channels are access-controlled and carry a reserved prefix.

/// Prefix that marks a private channel.
pub const PRIVATE_CHANNEL_PREFIX: &str = "$";

/// Maximum channel name length in bytes.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 255;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name == PRIVATE_CHANNEL_PREFIX {
        return Err("Private channel name cannot be empty");
    }
    if name.chars().any(char::is_control) {
        return Err("Channel name contains control characters");
    }
    Ok(())
}

/// Check whether a channel name is marked private.
#[must_use]
pub fn is_private_channel(name: &str) -> bool {
    name.starts_with(PRIVATE_CHANNEL_PREFIX)
}

/// Normalize a name to its private form.
///
/// The prefix is added at most once, so already-private names come back unchanged.
#[must_use]
pub fn private_channel_name(name: &str) -> String {
    if is_private_channel(name) {
        name.to_string()
    } else {
        format!("{PRIVATE_CHANNEL_PREFIX}{name}")
    }
}
