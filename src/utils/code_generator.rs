//! Short code generation and custom alias validation.

use crate::error::AppError;
use base64::Engine as _;
use serde_json::json;

/// Random bytes per code; 9 bytes encode to 12 URL-safe characters.
const CODE_LENGTH_BYTES: usize = 9;

const ALIAS_MIN_LEN: usize = 8;
const ALIAS_MAX_LEN: usize = 15;

/// Paths served by the service itself.
const RESERVED_ALIASES: &[&str] = &["health", "metrics", "api", "admin"];

/// Generates a random 12-character URL-safe short code.
///
/// # Errors
///
/// Returns [`AppError::Internal`] if the system RNG is unavailable.
pub fn generate_code() -> Result<String, AppError> {
    let mut buffer = [0u8; CODE_LENGTH_BYTES];
    getrandom::fill(&mut buffer).map_err(|e| {
        AppError::internal("Random source unavailable", json!({ "reason": e.to_string() }))
    })?;

    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buffer))
}

/// Validates a user-chosen alias.
///
/// Aliases are 8-15 characters of lowercase letters, digits and inner
/// hyphens, and may not shadow a reserved path.
///
/// # Errors
///
/// Returns [`AppError::Validation`] naming the violated rule.
pub fn validate_alias(alias: &str) -> Result<(), AppError> {
    if !(ALIAS_MIN_LEN..=ALIAS_MAX_LEN).contains(&alias.len()) {
        return Err(AppError::bad_request(
            "Alias must be 8-15 characters",
            json!({ "provided_length": alias.len() }),
        ));
    }

    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
    if !alias.chars().all(allowed) {
        return Err(AppError::bad_request(
            "Alias can only contain lowercase letters, digits, and hyphens",
            json!({ "alias": alias }),
        ));
    }

    if alias.starts_with('-') || alias.ends_with('-') {
        return Err(AppError::bad_request(
            "Alias cannot start or end with a hyphen",
            json!({ "alias": alias }),
        ));
    }

    if RESERVED_ALIASES.contains(&alias) {
        return Err(AppError::bad_request(
            "This alias is reserved",
            json!({ "alias": alias }),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_code_shape() {
        let code = generate_code().unwrap();

        assert_eq!(code.len(), 12);
        assert!(
            code.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_generate_code_is_random() {
        let codes: HashSet<String> = (0..500).map(|_| generate_code().unwrap()).collect();
        assert_eq!(codes.len(), 500);
    }

    #[test]
    fn test_validate_alias_accepts_bounds() {
        assert!(validate_alias("abcd1234").is_ok());
        assert!(validate_alias("abcd-1234-xyz-0").is_ok());
    }

    #[test]
    fn test_validate_alias_length() {
        let err = validate_alias("short").unwrap_err();
        assert!(err.to_string().contains("8-15 characters"));
        assert!(validate_alias("much-too-long-alias").is_err());
    }

    #[test]
    fn test_validate_alias_charset() {
        let err = validate_alias("My_Alias1").unwrap_err();
        assert!(err.to_string().contains("lowercase"));
    }

    #[test]
    fn test_validate_alias_hyphen_edges() {
        assert!(validate_alias("-myalias1").is_err());
        assert!(validate_alias("myalias1-").is_err());
    }
}
