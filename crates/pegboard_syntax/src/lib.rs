//! # pegboard-syntax
//!
//! A parsing-expression-grammar engine with stateful extensions.
//!
//! Grammars are assembled as trees of immutable nodes, collected into
//! named rules inside a [`Definition`], and run against raw byte input
//! to produce a token tree. Beyond the classic PEG algebra (ordered
//! choice, sequences, greedy and lazy quantifiers, look-around), the
//! engine carries per-match state: named boolean flags, named capture
//! ranges that can be replayed, failure hints, and a finalize bit that
//! aborts backtracking.
//!
//! ## Quick Start
//!
//! ```
//! use pegboard_syntax::Builder;
//!
//! let mut b = Builder::named("word");
//! let letter = b.range(b'a', b'z');
//! let letters = b.repeat_min(1, letter);
//! b.define("word", letters);
//! b.entry("word");
//! let word = b.link();
//!
//! let m = word.match_at(b"hello9", 0).unwrap();
//! assert_eq!(m.end(), 5);
//!
//! let token = m.root().unwrap();
//! assert_eq!(m.tokens()[token].rule(), word.rule_id("word").unwrap());
//! ```
//!
//! ## Architecture
//!
//! 1. **Assembly** ([`Builder`]) — node constructors allocate grammar
//!    nodes in an arena; `define` registers named rules; `import` makes
//!    other definitions addressable as `"scope::rule"`.
//!
//! 2. **Linking** ([`Builder::link`]) — one pass binds every symbolic
//!    reference to a concrete rule and freezes the result into a
//!    [`Definition`]. Definitions are immutable and `Send + Sync`.
//!
//! 3. **Matching** ([`Definition::match_at`], [`Definition::find_at`])
//!    — a per-match [`State`] tracks flags, captures, the hint and the
//!    finalize bit while nodes consume input and append [`Token`]s.
//!    Token side effects are rolled back on failure; flag and capture
//!    changes stick.
//!
//! ## Composition
//!
//! A linked definition wrapped in an [`std::sync::Arc`] can be imported
//! into other definitions, referenced by qualified rule names, and
//! re-entered on a restricted input range with
//! [`Builder::invoke`].
//!
//! ## Observation
//!
//! [`Builder::observed`] installs a [`NodeObserver`] that sees every
//! constructed node; the shipped [`SyntaxDebugger`] renders linked
//! definitions back into builder calls. Observation never changes match
//! semantics.

pub mod debug;
pub mod definition;
mod matcher;
pub mod node;
pub mod state;
pub mod token;

pub use debug::{rules_in_use, NodeObserver, SyntaxDebugger};
pub use definition::{Builder, Definition, Match, NoMatch};
pub use node::{CallContext, MatchFn, NodeArena, NodeId};
pub use pegboard_base::Span;
pub use state::State;
pub use token::{Token, TokenId, TokenTree};
