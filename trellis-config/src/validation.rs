// Configuration validation

use crate::{ConfigError, Result};
use std::fmt::Display;

/// Checked after a configuration value has been deserialized
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable field rules
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!("{} cannot be empty", field)));
        }
        Ok(())
    }

    /// Validate that a number is within `min..=max`
    pub fn in_range<T: PartialOrd + Display>(value: T, min: T, max: T, field: &str) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate that a value is one of `allowed`
    pub fn one_of<F>(value: &str, allowed: &[&str], field: &str, matches: F) -> Result<()>
    where
        F: Fn(&str, &str) -> bool,
    {
        if !allowed.iter().any(|candidate| matches(value, candidate)) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be one of [{}], got '{}'",
                field,
                allowed.join(", "),
                value
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_validation() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("", "field").is_err());
        assert!(ConfigValidator::not_empty("  ", "field").is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(ConfigValidator::in_range(5, 1, 10, "field").is_ok());
        assert!(ConfigValidator::in_range(0, 1, 10, "field").is_err());

        let err = ConfigValidator::in_range(11, 1, 10, "workers").unwrap_err();
        assert_eq!(err.to_string(), "Validation error: workers must be between 1 and 10, got 11");
    }

    #[test]
    fn test_one_of_validation() {
        let allowed = ["json", "plain"];
        let ignore_case = |a: &str, b: &str| a.eq_ignore_ascii_case(b);

        assert!(ConfigValidator::one_of("JSON", &allowed, "format", ignore_case).is_ok());
        assert!(ConfigValidator::one_of("JSON", &allowed, "format", |a, b| a == b).is_err());
        assert!(ConfigValidator::one_of("xml", &allowed, "format", ignore_case).is_err());
    }
}
