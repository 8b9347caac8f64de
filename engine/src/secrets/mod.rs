//! Credential handling
//!
//! Backend API keys are read from environment variables named in the
//! configuration and kept in [`SecretString`] so they never reach logs,
//! error messages or serialized output.

pub mod string;

pub use string::SecretString;

/// Read a secret from the named environment variable
///
/// Unset and blank variables both count as absent.
pub fn from_env(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

/// Replace every occurrence of `secret` in `text` with `[REDACTED]`
///
/// Provider error bodies sometimes echo the credential that was sent; this is
/// applied before such text is logged or stored in an error.
pub fn scrub(text: &str, secret: &SecretString) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret.unsecure(), "[REDACTED]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_redacts_debug_and_display() {
        let secret = SecretString::new("gsk_live_abcdef");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(secret.unsecure(), "gsk_live_abcdef");
    }

    #[test]
    fn test_scrub_in_error_message() {
        let secret = SecretString::new("sk-1234567890abcdefghij");
        let scrubbed = scrub("Invalid key sk-1234567890abcdefghij provided", &secret);
        assert_eq!(scrubbed, "Invalid key [REDACTED] provided");
    }

    #[test]
    fn test_scrub_empty_secret_is_noop() {
        let secret = SecretString::new("");
        assert_eq!(scrub("nothing to hide", &secret), "nothing to hide");
    }

    #[test]
    fn test_from_env_missing_variable() {
        assert!(from_env("CADENCE_TEST_DEFINITELY_UNSET_VARIABLE").is_none());
    }
}
