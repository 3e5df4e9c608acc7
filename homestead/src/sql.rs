//! Identifier validation and quoting for remote SQL and shell pipelines
//!
//! Every operation that embeds user-supplied values into a remote command
//! (database administration, backup, restore) goes through this module, so
//! the quoting rules live in exactly one place.

use std::sync::LazyLock;

use regex::Regex;

use homestead_common::{Error, Result};

static IDENT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").unwrap());

/// Validate a SQL identifier (database or role name).
///
/// Identifiers are embedded unquoted into DDL statements, so anything
/// outside `[a-zA-Z0-9_]+` is rejected before a remote call is made.
pub fn validate_ident(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::config(format!("{what} cannot be empty")));
    }

    if !IDENT_REGEX.is_match(value) {
        return Err(Error::config(format!(
            "{what} '{value}' may only contain alphanumeric characters and underscores"
        )));
    }

    Ok(())
}

/// Quote a value as a SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a value for safe embedding in a POSIX shell command line.
pub fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_ident("database name", "myapp").is_ok());
        assert!(validate_ident("database name", "my_app_2").is_ok());
        assert!(validate_ident("user name", "APP_USER").is_ok());
    }

    #[test]
    fn test_identifier_with_space_rejected() {
        let err = validate_ident("database name", "my db").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("my db"));
    }

    #[test]
    fn test_injection_attempts_rejected() {
        assert!(validate_ident("database name", "db;DROP TABLE users").is_err());
        assert!(validate_ident("user name", "user'--").is_err());
        assert!(validate_ident("database name", "db-name").is_err());
        assert!(validate_ident("database name", "").is_err());
    }

    #[test]
    fn test_quote_literal_escapes_single_quotes() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
        assert_eq!(quote_literal("''"), "''''''");
    }

    #[test]
    fn test_sh_quote_escapes_single_quotes() {
        assert_eq!(sh_quote("plain"), "'plain'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }
}
