//! Session identifier minting and validation.

use rand::rngs::OsRng;
use rand::RngCore;

use super::error::{Result, SessionError};

/// Identifiers shorter than this are rejected by every provider.
pub const MIN_SESSION_ID_LEN: usize = 2;

/// Default number of random bytes in a minted identifier (32 hex chars).
pub const DEFAULT_SESSION_ID_LENGTH: usize = 16;

/// Mint a new identifier: `prefix` followed by `byte_len` random bytes from
/// the OS CSPRNG, hex encoded.
pub fn generate_session_id(prefix: &str, byte_len: usize) -> Result<String> {
    let mut bytes = vec![0u8; byte_len.max(1)];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SessionError::backend("rng", e))?;
    Ok(format!("{prefix}{}", hex::encode(bytes)))
}

/// Reject identifiers that no backend can safely key on.
pub fn validate_session_id(sid: &str) -> Result<()> {
    if sid.len() < MIN_SESSION_ID_LEN {
        return Err(SessionError::InvalidSessionId(format!(
            "length {} is below the minimum of {MIN_SESSION_ID_LEN}",
            sid.len()
        )));
    }
    if sid.starts_with('.') {
        return Err(SessionError::InvalidSessionId(
            "must not start with '.'".into(),
        ));
    }
    if let Some(c) = sid
        .chars()
        .find(|c| matches!(c, '/' | '\\') || c.is_control() || c.is_whitespace())
    {
        return Err(SessionError::InvalidSessionId(format!(
            "contains forbidden character {c:?}"
        )));
    }
    Ok(())
}

/// Redact an identifier for logging: first 4 chars + `***`.
pub fn redact(sid: &str) -> String {
    match sid.char_indices().nth(4) {
        Some((idx, _)) => format!("{}***", &sid[..idx]),
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_hex_with_prefix() {
        let sid = generate_session_id("app_", 16).unwrap();
        assert_eq!(sid.len(), 4 + 32);
        assert!(sid.starts_with("app_"));
        assert!(sid[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_do_not_repeat() {
        let a = generate_session_id("", DEFAULT_SESSION_ID_LENGTH).unwrap();
        let b = generate_session_id("", DEFAULT_SESSION_ID_LENGTH).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn zero_length_still_yields_valid_id() {
        let sid = generate_session_id("", 0).unwrap();
        assert!(validate_session_id(&sid).is_ok());
    }

    #[test]
    fn short_ids_are_rejected() {
        assert!(validate_session_id("").unwrap_err().is_invalid_session_id());
        assert!(validate_session_id("1").unwrap_err().is_invalid_session_id());
        assert!(validate_session_id("S1").is_ok());
    }

    #[test]
    fn path_like_ids_are_rejected() {
        for bad in ["../etc", "a/b", "a\\b", ".hidden", "a b", "ab\n"] {
            assert!(validate_session_id(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_session_id("Session_id_new").is_ok());
        assert!(validate_session_id("prefix:abc-123").is_ok());
    }

    #[test]
    fn redact_hides_most_of_id() {
        assert_eq!(redact("abcdefgh"), "abcd***");
        assert_eq!(redact("ab"), "***");
        assert_eq!(redact(""), "***");
    }
}
