//! Branch name type
//!
//! Branches have dual identity:
//! - **BranchId**: Internal, immutable UUID assigned by the system
//! - **BranchName**: User-facing, semantic identifier set by the user
//!
//! BranchName is the "what" (semantic purpose), BranchId is the "which" (unique instance).
//!
//! ## Examples
//!
//! - BranchName: "training-gpt-v3-2024"
//! - BranchId: 550e8400-e29b-41d4-a716-446655440000
//!
//! ## Validation
//!
//! Branch names must:
//! - Be 1-256 characters
//! - Contain only alphanumeric, dash, underscore, dot
//! - Not start with a dash or dot

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a branch name
pub const MAX_BRANCH_NAME_LENGTH: usize = 256;

/// User-facing semantic identifier for a branch
///
/// BranchName is the human-readable, meaningful name for a branch.
/// Unlike BranchId (which is a UUID), BranchName captures the semantic
/// purpose of the branch.
///
/// ## Validation Rules
///
/// - Length: 1-256 characters
/// - Characters: `[a-zA-Z0-9_.-]`
/// - Cannot start with `-` or `.`
///
/// ## Examples
///
/// Valid names:
/// - "training-run-1"
/// - "experiment.v2"
/// - "prod_agent_2024"
///
/// Invalid names:
/// - "" (empty)
/// - "-starts-with-dash"
/// - ".hidden"
/// - "has spaces"
/// - "has@special"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchName(String);

/// Error when validating a branch name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchNameError {
    /// Name is empty
    Empty,
    /// Name exceeds maximum length
    TooLong {
        /// Actual length of the name
        length: usize,
        /// Maximum allowed length
        max: usize,
    },
    /// Name contains invalid character
    InvalidChar {
        /// The invalid character
        char: char,
        /// Position of the invalid character
        position: usize,
    },
    /// Name starts with invalid character
    InvalidStart {
        /// The invalid starting character
        char: char,
    },
}

impl std::fmt::Display for BranchNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchNameError::Empty => write!(f, "branch name cannot be empty"),
            BranchNameError::TooLong { length, max } => {
                write!(f, "branch name too long: {} chars (max {})", length, max)
            }
            BranchNameError::InvalidChar { char, position } => {
                write!(
                    f,
                    "invalid character '{}' at position {} (only alphanumeric, dash, underscore, dot allowed)",
                    char, position
                )
            }
            BranchNameError::InvalidStart { char } => {
                write!(
                    f,
                    "branch name cannot start with '{}' (must start with alphanumeric or underscore)",
                    char
                )
            }
        }
    }
}

impl std::error::Error for BranchNameError {}

impl BranchName {
    /// Create a new BranchName, validating the input
    ///
    /// # Errors
    ///
    /// Returns `BranchNameError` if the name is invalid.
    pub fn new(name: impl Into<String>) -> Result<Self, BranchNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(BranchName(name))
    }

    /// Create a BranchName without validation
    ///
    /// # Safety
    ///
    /// The caller must ensure the name is valid. Use `new()` for untrusted input.
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        BranchName(name.into())
    }

    /// Validate a branch name
    pub fn validate(name: &str) -> Result<(), BranchNameError> {
        // Check empty
        if name.is_empty() {
            return Err(BranchNameError::Empty);
        }

        // Check length
        if name.len() > MAX_BRANCH_NAME_LENGTH {
            return Err(BranchNameError::TooLong {
                length: name.len(),
                max: MAX_BRANCH_NAME_LENGTH,
            });
        }

        // Check first character
        let first = name.chars().next().unwrap();
        if !first.is_ascii_alphanumeric() && first != '_' {
            return Err(BranchNameError::InvalidStart { char: first });
        }

        // Check all characters
        for (pos, ch) in name.chars().enumerate() {
            if !Self::is_valid_char(ch) {
                return Err(BranchNameError::InvalidChar {
                    char: ch,
                    position: pos,
                });
            }
        }

        Ok(())
    }

    /// Check if a character is valid in a branch name
    #[inline]
    fn is_valid_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
    }

    /// Get the name as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Check if this name matches a pattern (simple prefix match)
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Check if this name matches a pattern (simple suffix match)
    pub fn ends_with(&self, suffix: &str) -> bool {
        self.0.ends_with(suffix)
    }

    /// Check if this name contains a substring
    pub fn contains(&self, substr: &str) -> bool {
        self.0.contains(substr)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = BranchNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BranchName::new(value)
    }
}

impl TryFrom<&str> for BranchName {
    type Error = BranchNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        BranchName::new(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
