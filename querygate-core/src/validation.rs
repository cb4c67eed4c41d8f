//! Pre-execution screening of caller operations.
//!
//! The default [`DenylistValidator`] rejects any operation whose text
//! contains a destructive keyword, case-insensitively. It is a substring
//! screen, not a SQL parser: it over-rejects identifiers such as `dropout`
//! and can be bypassed by obfuscated statements. It runs before any
//! credential is decrypted, so a rejected request never reaches the vault or
//! the network. Stricter screening plugs in through [`QueryValidator`].

/// Keywords the default validator refuses.
pub const DEFAULT_DENYLIST: &[&str] = &["DROP", "DELETE", "TRUNCATE", "ALTER", "GRANT"];

/// Why an operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// The denylisted keyword that matched
    pub keyword: String,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation contains forbidden keyword {}", self.keyword)
    }
}

/// Static check run on every operation before execution.
pub trait QueryValidator: Send + Sync {
    /// Accepts or rejects the operation text.
    ///
    /// # Errors
    /// Returns the reason when the operation must not run.
    fn validate(&self, operation: &str) -> Result<(), Rejection>;
}

/// Case-insensitive substring denylist.
#[derive(Debug, Clone)]
pub struct DenylistValidator {
    keywords: Vec<String>,
}

impl DenylistValidator {
    /// Creates a validator over the given keywords.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_uppercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Keywords this validator refuses (uppercased).
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for DenylistValidator {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST)
    }
}

impl QueryValidator for DenylistValidator {
    fn validate(&self, operation: &str) -> Result<(), Rejection> {
        let upper = operation.to_uppercase();
        match self.keywords.iter().find(|k| upper.contains(k.as_str())) {
            Some(keyword) => Err(Rejection {
                keyword: keyword.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_destructive_statements_any_case() {
        let validator = DenylistValidator::default();

        let rejection = validator.validate("DROP TABLE users").unwrap_err();
        assert_eq!(rejection.keyword, "DROP");
        assert!(validator.validate("drop table users").is_err());
        assert!(validator.validate("Delete From orders").is_err());
        assert!(validator.validate("truncate logs").is_err());
        assert!(validator.validate("ALTER TABLE t ADD c INT").is_err());
        assert!(validator.validate("grant all on *.* to x").is_err());
    }

    #[test]
    fn test_accepts_reads() {
        let validator = DenylistValidator::default();
        assert!(validator.validate("SELECT * FROM users").is_ok());
        assert!(validator.validate("SELECT 1").is_ok());
        assert!(validator.validate("orders").is_ok());
    }

    #[test]
    fn test_substring_matching_over_rejects() {
        // Known limitation of substring screening.
        let validator = DenylistValidator::default();
        assert!(validator.validate("SELECT dropout FROM students").is_err());
        assert!(validator.validate("SELECT * FROM deleted_items").is_err());
    }

    #[test]
    fn test_custom_keywords() {
        let validator = DenylistValidator::new(["update", ""]);
        assert_eq!(validator.keywords(), ["UPDATE".to_string()]);
        assert!(validator.validate("update t set a = 1").is_err());
        assert!(validator.validate("DROP TABLE t").is_ok());
    }

    #[test]
    fn test_validator_is_object_safe() {
        let validator: Box<dyn QueryValidator> = Box::new(DenylistValidator::default());
        assert!(validator.validate("SELECT 1").is_ok());
    }
}
