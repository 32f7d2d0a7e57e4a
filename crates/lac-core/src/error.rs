//! # Core Errors
//!
//! Conversion and parsing failures for the foundational types. Higher
//! crates wrap these in their own error enums via `#[from]`.

use thiserror::Error;

/// Errors raised while converting or parsing foundational values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    /// A date string did not match any accepted format.
    #[error("invalid date: \"{value}\" (expected YYYY-MM-DD or RFC 3339)")]
    InvalidDate {
        /// The string that failed to parse.
        value: String,
    },

    /// A value could not be interpreted as a number.
    #[error("expected a number, found {type_name} ({value})")]
    NotNumeric {
        /// Type name of the offending value.
        type_name: &'static str,
        /// Rendered offending value.
        value: String,
    },

    /// A value could not be interpreted as a date.
    #[error("expected a date, found {type_name} ({value})")]
    NotADate {
        /// Type name of the offending value.
        type_name: &'static str,
        /// Rendered offending value.
        value: String,
    },

    /// JSON conversion failed.
    #[error("JSON conversion failed: {0}")]
    Json(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_date_display_names_input() {
        let err = ValueError::InvalidDate {
            value: "2024-13-45".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("2024-13-45"));
        assert!(msg.contains("YYYY-MM-DD"));
    }

    #[test]
    fn not_numeric_display_names_type() {
        let err = ValueError::NotNumeric {
            type_name: "string",
            value: "abc".to_string(),
        };
        assert!(format!("{err}").contains("string"));
    }
}
