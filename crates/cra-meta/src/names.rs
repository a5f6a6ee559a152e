//! Vertex-definition name validation.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::MetaError;

/// DNS-style definition names: lowercase alphanumerics and hyphens,
/// 3-63 characters, no leading or trailing hyphen. The artifact store
/// requires this shape for its container entries. `$root` is the one
/// reserved exception.
static DEFINITION_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[a-z0-9][-a-z0-9]{1,61}[a-z0-9]|\$root)$").expect("valid pattern"));

/// Validates a vertex-definition name.
pub fn validate_definition_name(name: &str) -> Result<(), MetaError> {
    if DEFINITION_NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(MetaError::InvalidDefinitionName(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_style_names() {
        for name in ["ab-cd", "a1b2c3", "abc", "echo", "$root"] {
            assert!(validate_definition_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for name in ["", "AB", "a", "ab", "-abc", "abc-", "a_b_c", "$other"] {
            assert!(validate_definition_name(name).is_err(), "{name:?}");
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let max = format!("a{}a", "b".repeat(61));
        assert_eq!(max.len(), 63);
        assert!(validate_definition_name(&max).is_ok());

        let too_long = format!("a{}a", "b".repeat(62));
        assert!(validate_definition_name(&too_long).is_err());
    }
}
