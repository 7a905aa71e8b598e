//! Input validation for lock protocol requests

use validator::ValidationError;

use crate::error::LdlmError;

/// Maximum length for a lock name, in bytes
pub const MAX_LOCK_NAME_LENGTH: usize = 1024;

/// Maximum length for a session id, in bytes
pub const MAX_SESSION_ID_LENGTH: usize = 128;

/// Validate a lock name.
///
/// Names are opaque and case-sensitive; any characters are allowed as long as
/// the name is non-empty and within `MAX_LOCK_NAME_LENGTH`.
pub fn validate_lock_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::new("lock_name_empty"));
    }
    if name.len() > MAX_LOCK_NAME_LENGTH {
        return Err(ValidationError::new("lock_name_too_long"));
    }
    Ok(())
}

/// Validate a client-supplied session id before it is looked up.
pub fn validate_session_id(session_id: &str) -> Result<(), ValidationError> {
    if session_id.is_empty() {
        return Err(ValidationError::new("session_id_empty"));
    }
    if session_id.len() > MAX_SESSION_ID_LENGTH {
        return Err(ValidationError::new("session_id_too_long"));
    }
    Ok(())
}

/// Run a validator and convert its failure into `LdlmError::IllegalArgument`.
pub fn check(result: Result<(), ValidationError>) -> Result<(), LdlmError> {
    result.map_err(|e| LdlmError::IllegalArgument(e.code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_validate_lock_name() {
        assert!(validate_lock_name("db1").is_ok());
        assert!(validate_lock_name("jobs/nightly:reindex").is_ok());
        assert!(validate_lock_name("").is_err());
        assert!(validate_lock_name(&"a".repeat(MAX_LOCK_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("7c9e6679-7425-40de-944b-e07fc1f90ae7").is_ok());
        assert!(validate_session_id("").is_err());
    }

    #[test]
    fn test_check_maps_to_illegal_argument() {
        let err = check(validate_lock_name("")).unwrap_err();
        assert_eq!(err, LdlmError::IllegalArgument("lock_name_empty".to_string()));
    }

    proptest! {
        #[test]
        fn prop_bounded_names_are_accepted(name in ".{1,256}") {
            prop_assert!(validate_lock_name(&name).is_ok());
        }
    }
}
