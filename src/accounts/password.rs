//! Salted PBKDF2-HMAC-SHA256 password hashes.
//!
//! Stored form: `pbkdf2_sha256$<iterations>$<salt b64>$<hash b64>`. The
//! iteration count travels with the hash so it can be raised without
//! invalidating existing accounts.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use hmac::Hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::id::new_uuid_v4;
use crate::{AppError, AppResult};

pub const ALGORITHM: &str = "pbkdf2_sha256";
pub const DEFAULT_ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 32;

fn derive(password: &[u8], salt: &[u8], iterations: u32) -> AppResult<[u8; KEY_LEN]> {
    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out)
        .map_err(|err| AppError::new("CRYPTO/KEY_LENGTH", err.to_string()))?;
    Ok(out)
}

pub fn hash_password(password: &str, iterations: u32) -> AppResult<String> {
    let salt = new_uuid_v4();
    let iterations = iterations.max(1);
    let derived = derive(password.as_bytes(), salt.as_bytes(), iterations)?;
    Ok(format!(
        "{ALGORITHM}${iterations}${}${}",
        STANDARD_NO_PAD.encode(salt.as_bytes()),
        STANDARD_NO_PAD.encode(derived)
    ))
}

/// Malformed stored hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(algorithm), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if algorithm != ALGORITHM {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(hash))
    else {
        return false;
    };
    let Ok(derived) = derive(password.as_bytes(), &salt, iterations) else {
        return false;
    };
    derived.as_slice().ct_eq(expected.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn matches_rfc7914_test_vector() {
        // PBKDF2-HMAC-SHA256 ("passwd", "salt", c=1), first 32 bytes.
        let derived = derive(b"passwd", b"salt", 1).unwrap();
        assert_eq!(
            hex(&derived),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn hash_then_verify() {
        let stored = hash_password("correct horse", 1_000).unwrap();
        assert!(stored.starts_with("pbkdf2_sha256$1000$"));
        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("correct horse!", &stored));
    }

    #[test]
    fn salts_differ_per_hash() {
        let a = hash_password("same", 10).unwrap();
        let b = hash_password("same", 10).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hashes_never_verify() {
        for stored in [
            "",
            "plaintext",
            "md5$1$abc$def",
            "pbkdf2_sha256$0$AAAA$AAAA",
            "pbkdf2_sha256$x$AAAA$AAAA",
            "pbkdf2_sha256$10$!!!$AAAA",
            "pbkdf2_sha256$10$AAAA$AAAA$extra",
            "pbkdf2_sha256$10$AAAA$AAA",
        ] {
            assert!(!verify_password("anything", stored), "{stored}");
        }
    }
}
