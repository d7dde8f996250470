//! Pattern compile errors.

use std::fmt;

/// A malformed pattern, reported with the byte offset of the problem.
///
/// The display format is `"{offset}: {message}"`.
#[derive(Debug, Clone)]
pub struct PatternError {
    message: String,
    offset: usize,
}

impl PatternError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        PatternError {
            message: message.into(),
            offset,
        }
    }

    /// Human-readable reason, such as `"Illegal escape sequence"`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Byte offset into the pattern text where the problem was
    /// detected.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.offset, self.message)
    }
}

impl std::error::Error for PatternError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_leads_with_the_offset() {
        let err = PatternError::new("Unterminated group", 7);
        assert_eq!(err.to_string(), "7: Unterminated group");
        assert_eq!(err.message(), "Unterminated group");
        assert_eq!(err.offset(), 7);
    }
}
