//! # pegboard-pattern
//!
//! Compact pattern strings compiled to pegboard syntax definitions.
//!
//! The surface syntax is a small matching language over raw bytes:
//!
//! | Construct | Meaning |
//! |---|---|
//! | `#` | any byte |
//! | `*` | greedy any-run |
//! | `^` `$` | begin / end of input |
//! | plain byte | itself |
//! | `\n \r \t \f \xHH` | escapes; any other `\c` is `c` itself |
//! | `[a..b]` `[^a..b]` | byte range, inverted byte range |
//! | `[a..]` `[..b]` | open-ended range |
//! | `[abc]` `[^abc]` | byte set, inverted byte set |
//! | `{min,max}` `{n,}` `{,n}` | repeat the previous atom; a `?` (lazy) or `~` (plain) modifier goes before the closing brace |
//! | `(…)` | group |
//! | `\|` | ordered alternation |
//!
//! Patterns compile into the same grammar-node representation that
//! hand-built definitions use, so a [`Pattern`] matches with identical
//! semantics and cost.
//!
//! # Example
//!
//! ```
//! use pegboard_pattern::Pattern;
//!
//! let word = Pattern::new("[a..z]{1,}").unwrap();
//! let m = word.match_at(b"hello9", 0).unwrap();
//! assert_eq!(m.span(), pegboard_pattern::Span::new(0, 5));
//!
//! let err = Pattern::new("(ab").unwrap_err();
//! assert_eq!(err.to_string(), "3: Unterminated group");
//! ```

mod compiler;
mod error;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use pegboard_syntax::{Definition, Match, NoMatch};

pub use error::PatternError;
pub use pegboard_base::Span;

/// A compiled, linked pattern.
pub struct Pattern {
    def: Definition,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern").field("definition", &self.def).finish()
    }
}

impl Pattern {
    /// Compiles `text` into a pattern.
    pub fn new(text: &str) -> Result<Pattern, PatternError> {
        compiler::compile(text.as_bytes()).map(|def| Pattern { def })
    }

    /// The underlying syntax definition, for token introspection or
    /// import into larger grammars.
    pub fn definition(&self) -> &Definition {
        &self.def
    }

    /// Matches the pattern against `text` at `start`.
    pub fn match_at(&self, text: &[u8], start: usize) -> Result<Match, NoMatch> {
        self.def.match_at(text, start)
    }

    /// Like [`match_at`](Self::match_at), cancelable from another
    /// thread.
    pub fn match_cancelable(
        &self,
        text: &[u8],
        start: usize,
        cancel: Arc<AtomicBool>,
    ) -> Result<Match, NoMatch> {
        self.def.match_cancelable(text, start, cancel)
    }

    /// Scans forward from `start` for the first position the pattern
    /// matches at.
    pub fn find_at(&self, text: &[u8], start: usize) -> Result<Match, NoMatch> {
        self.def.find_at(text, start)
    }
}

/// Compiles `text` into a [`Pattern`].
pub fn compile(text: &str) -> Result<Pattern, PatternError> {
    Pattern::new(text)
}
