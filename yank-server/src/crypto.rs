//! Shared-secret key handling and request signatures.
//!
//! The server key is a PBKDF2-HMAC-SHA256 derivation of the instance
//! password; clients either present the password itself (HTTP Basic, we
//! re-derive and compare) or sign individual requests with HMAC-SHA256
//! over `timestamp:ttl:method:path`.
//!
//! ## Signature header
//!
//! ```text
//! Authorization: HMAC v1 <timestamp> <ttl_seconds> <base64 mac>
//! ```
//!
//! A `ttl_seconds` of 0 means the signature does not expire.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derived key length in bytes.
pub const KEY_LEN: usize = 32;
/// PBKDF2 iteration count.
pub const KEY_DERIVATION_ROUNDS: u32 = 10_000;
/// Salt length for freshly generated keys.
pub const SALT_LEN: usize = 16;
/// How far in the future a signature timestamp may lie before rejection.
pub const MAX_CLOCK_SKEW_SECS: u64 = 60;

const HMAC_SCHEME: &str = "HMAC";
const HMAC_VERSION: &str = "v1";

/// The instance's shared secret: the derivation salt plus the derived bytes.
#[derive(Debug, Clone)]
pub struct Key {
    pub salt: Vec<u8>,
    pub bytes: Vec<u8>,
}

/// Derive a key from a password and salt.
pub fn derive_key(password: &[u8], salt: &[u8]) -> Key {
    let mut bytes = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, KEY_DERIVATION_ROUNDS, &mut bytes);
    Key {
        salt: salt.to_vec(),
        bytes: bytes.to_vec(),
    }
}

/// Derive a key from a password with a newly generated random salt.
pub fn derive_key_with_random_salt(password: &[u8]) -> Key {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    derive_key(password, &salt)
}

/// Produce the value of an `Authorization` header signing `method path`,
/// valid for `ttl` (zero = no expiry).
pub fn sign_request(key: &[u8], method: &str, path: &str, ttl: Duration) -> String {
    let timestamp = now_secs();
    let ttl = ttl.as_secs();
    let mac = compute_mac(key, timestamp, ttl, method, path);
    format!(
        "{} {} {} {} {}",
        HMAC_SCHEME,
        HMAC_VERSION,
        timestamp,
        ttl,
        BASE64.encode(mac)
    )
}

/// Validate an `HMAC v1 ...` authorization value against the given key,
/// method and path. The MAC comparison is constant-time; the timestamp
/// must be within the signed ttl window and at most [`MAX_CLOCK_SKEW_SECS`]
/// in the future.
pub fn verify_request(key: &[u8], value: &str, method: &str, path: &str) -> bool {
    let mut fields = value.split(' ');
    if fields.next() != Some(HMAC_SCHEME) || fields.next() != Some(HMAC_VERSION) {
        return false;
    }
    let (timestamp, ttl, mac_b64) = match (fields.next(), fields.next(), fields.next()) {
        (Some(t), Some(l), Some(m)) => (t, l, m),
        _ => return false,
    };
    if fields.next().is_some() {
        return false;
    }

    let timestamp: u64 = match timestamp.parse() {
        Ok(v) => v,
        Err(_) => return false,
    };
    let ttl: u64 = match ttl.parse() {
        Ok(v) => v,
        Err(_) => return false,
    };
    let presented = match BASE64.decode(mac_b64) {
        Ok(v) => v,
        Err(_) => return false,
    };

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(signing_input(timestamp, ttl, method, path).as_bytes());
    if mac.verify_slice(&presented).is_err() {
        return false;
    }

    let now = now_secs();
    if timestamp > now + MAX_CLOCK_SKEW_SECS {
        return false;
    }
    if ttl > 0 && now.saturating_sub(timestamp) > ttl {
        return false;
    }
    true
}

fn signing_input(timestamp: u64, ttl: u64, method: &str, path: &str) -> String {
    format!("{}:{}:{}:{}", timestamp, ttl, method, path)
}

fn compute_mac(key: &[u8], timestamp: u64, ttl: u64, method: &str, path: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(signing_input(timestamp, ttl, method, path).as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
