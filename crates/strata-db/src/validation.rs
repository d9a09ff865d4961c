use strata_common::{Error, Result};

const MAX_IDENTIFIER_LEN: usize = 64;

/// Validation for the table, column, and index names that end up in DDL.
pub struct IdentifierValidator;

impl IdentifierValidator {
    /// Accept plain SQL identifiers: a letter or underscore followed by
    /// letters, digits, or underscores.
    pub fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidIdentifier(name.to_string()));
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::InvalidIdentifier(name.to_string()));
        }

        let mut chars = name.chars();
        let leading_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !leading_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidIdentifier(name.to_string()));
        }

        // sqlite reserves this prefix for its own tables
        if name.to_ascii_lowercase().starts_with("sqlite_") {
            return Err(Error::InvalidIdentifier(name.to_string()));
        }
        Ok(())
    }

    /// Validate `name` and wrap it in double quotes for use in a statement.
    pub fn quote(name: &str) -> Result<String> {
        Self::validate(name)?;
        Ok(format!("\"{name}\""))
    }
}

#[cfg(test)]
mod tests {
    use super::IdentifierValidator;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(IdentifierValidator::validate("articles").is_ok());
        assert!(IdentifierValidator::validate("_private").is_ok());
        assert!(IdentifierValidator::validate("account_id2").is_ok());
    }

    #[test]
    fn rejects_malformed_identifiers() {
        assert!(IdentifierValidator::validate("").is_err());
        assert!(IdentifierValidator::validate("2fast").is_err());
        assert!(IdentifierValidator::validate("drop table; --").is_err());
        assert!(IdentifierValidator::validate("with\"quote").is_err());
        assert!(IdentifierValidator::validate("sqlite_master").is_err());

        let too_long = "a".repeat(65);
        assert!(IdentifierValidator::validate(&too_long).is_err());
    }

    #[test]
    fn quotes_valid_names() {
        assert_eq!(IdentifierValidator::quote("title").unwrap(), "\"title\"");
    }
}
