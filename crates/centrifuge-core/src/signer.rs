//! HMAC-SHA256 token signing.
//!
//! Tokens are normally issued by the application backend, which holds the
//! secret. These helpers exist for backends and tools written in Rust.

use centrifuge_protocol::Credentials;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign `input` with `secret`, returning the lower-case hex digest.
#[must_use]
pub fn sign(input: &str, secret: &str) -> String {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Connection token over `user`, `timestamp` and `info`, concatenated.
#[must_use]
pub fn connection_token(secret: &str, user: &str, timestamp: &str, info: &str) -> String {
    sign(&format!("{user}{timestamp}{info}"), secret)
}

/// Signature for a private channel subscription, over the connection's
/// `client` id, the channel name and the channel `info`.
#[must_use]
pub fn channel_sign(secret: &str, client: &str, channel: &str, info: &str) -> String {
    sign(&format!("{client}{channel}{info}"), secret)
}

/// Build credentials carrying a freshly signed connection token.
#[must_use]
pub fn signed_credentials(
    secret: &str,
    user: &str,
    timestamp: &str,
    info: Option<&str>,
) -> Credentials {
    let token = connection_token(secret, user, timestamp, info.unwrap_or_default());
    let credentials = Credentials::new(user, timestamp, token);
    match info {
        Some(info) => credentials.with_info(info),
        None => credentials,
    }
}
