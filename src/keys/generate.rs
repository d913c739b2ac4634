// SPDX-License-Identifier: AGPL-3.0-or-later

//! API key derivation.
//!
//! Keys are opaque tokens derived with HMAC-SHA256 over the master secret,
//! the owner id, the issuance timestamp, and a random UUID nonce. The
//! 32-byte digest is truncated to 24 bytes (192 bits of entropy surface)
//! and base64url-encoded with a `cg_` prefix so keys are recognizable in
//! logs and support tickets without revealing anything about the owner.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

/// Number of digest bytes kept in the encoded key.
const KEY_BYTES: usize = 24;

/// Prefix identifying credit-gate API keys.
pub const KEY_PREFIX: &str = "cg_";

/// Derive a new opaque API key for `owner_id`.
///
/// Each call produces a distinct key: the UUID nonce alone contributes 122
/// random bits, so collisions are negligible even for one owner issuing
/// many keys at the same timestamp.
pub fn derive_key(secret: &[u8], owner_id: &str, issued_at: DateTime<Utc>) -> String {
    let nonce = Uuid::new_v4();
    // HMAC-SHA256 accepts key material of any length.
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .expect("HMAC-SHA256 accepts any key length");
    mac.update(owner_id.as_bytes());
    mac.update(&issued_at.timestamp_micros().to_be_bytes());
    mac.update(nonce.as_bytes());
    let digest = mac.finalize().into_bytes();

    format!(
        "{KEY_PREFIX}{}",
        Base64UrlUnpadded::encode_string(&digest[..KEY_BYTES])
    )
}
