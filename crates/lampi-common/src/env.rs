//! Environment variable helpers
//!
//! Every task reads its settings from the process environment. These helpers
//! keep the "required", "optional" and "parsed with default" cases uniform so
//! that a missing variable always names itself in the error.

use crate::error::{LampiError, Result};
use std::str::FromStr;

/// Read a variable that must be present.
pub fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| LampiError::MissingEnv(name.to_string()))
}

/// Read a variable that may be absent. Empty values count as absent.
pub fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse a variable that must be present.
pub fn require_parsed<T: FromStr>(name: &str) -> Result<T> {
    let value = require_env(name)?;
    parse_value(name, value)
}

/// Read and parse a variable, falling back to `default` when it is absent.
///
/// A present but unparsable value is an error rather than a silent fallback.
pub fn parsed_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match optional_env(name) {
        Some(value) => parse_value(name, value),
        None => Ok(default),
    }
}

/// Read the first present variable out of `names`.
pub fn first_of(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| optional_env(name))
}

fn parse_value<T: FromStr>(name: &str, value: String) -> Result<T> {
    value.trim().parse().map_err(|_| LampiError::InvalidEnv {
        name: name.to_string(),
        value,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_require_env_missing() {
        std::env::remove_var("LAMPI_TEST_MISSING");
        let err = require_env("LAMPI_TEST_MISSING").unwrap_err();
        assert_eq!(err.to_string(), "Missing env variable LAMPI_TEST_MISSING");
    }

    #[test]
    #[serial]
    fn test_parsed_or_default_and_value() {
        std::env::remove_var("LAMPI_TEST_PORT");
        assert_eq!(parsed_or("LAMPI_TEST_PORT", 5432u16).unwrap(), 5432);

        std::env::set_var("LAMPI_TEST_PORT", " 6543 ");
        assert_eq!(parsed_or("LAMPI_TEST_PORT", 5432u16).unwrap(), 6543);

        std::env::set_var("LAMPI_TEST_PORT", "not-a-port");
        assert!(matches!(
            parsed_or("LAMPI_TEST_PORT", 5432u16),
            Err(LampiError::InvalidEnv { .. })
        ));
        std::env::remove_var("LAMPI_TEST_PORT");
    }

    #[test]
    #[serial]
    fn test_optional_env_treats_empty_as_absent() {
        std::env::set_var("LAMPI_TEST_EMPTY", "  ");
        assert_eq!(optional_env("LAMPI_TEST_EMPTY"), None);
        std::env::remove_var("LAMPI_TEST_EMPTY");
    }

    #[test]
    #[serial]
    fn test_first_of_prefers_earlier_names() {
        std::env::set_var("LAMPI_TEST_A", "a");
        std::env::set_var("LAMPI_TEST_B", "b");
        assert_eq!(first_of(&["LAMPI_TEST_A", "LAMPI_TEST_B"]), Some("a".to_string()));
        std::env::remove_var("LAMPI_TEST_A");
        assert_eq!(first_of(&["LAMPI_TEST_A", "LAMPI_TEST_B"]), Some("b".to_string()));
        std::env::remove_var("LAMPI_TEST_B");
    }
}
