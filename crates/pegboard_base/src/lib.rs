//! # pegboard-base
//!
//! Structural atoms for the pegboard matching engine.
//!
//! This crate provides the foundational types shared by the engine crates:
//!
//! - [`Span`] — a half-open byte range over matched input
//! - [`PrefixTree`] — a byte trie with longest-prefix matching, used for
//!   keyword recognition
//! - [`ascii`] — the ASCII case fold used by case-insensitive literals
//!   and keywords
//!
//! # Design Principles
//!
//! This crate has **no knowledge of grammars, tokens or matching**. It
//! provides only generic, reusable infrastructure that the engine crates
//! build upon.
//!
//! # Example
//!
//! ```
//! use pegboard_base::{PrefixTree, Span};
//!
//! let mut keywords = PrefixTree::new();
//! keywords.insert(b"for", 0u32);
//! keywords.insert(b"fortran", 1u32);
//!
//! let (end, id) = keywords.match_longest(b"fortran77", 0, false).unwrap();
//! assert_eq!((end, *id), (7, 1));
//!
//! let span = Span::new(0, 7);
//! assert_eq!(span.len(), 7);
//! ```

pub mod ascii;
pub mod prefix_tree;
pub mod span;

pub use prefix_tree::PrefixTree;
pub use span::Span;
