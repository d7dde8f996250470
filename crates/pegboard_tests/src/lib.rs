//! Integration test suite for the pegboard engine.
//!
//! This crate exists only to run integration tests from the `tests/`
//! directory. All actual test code lives in `tests/*.rs` files.
//!
//! # Test Organization
//!
//! | File | Topic |
//! |------|-------|
//! | `expression.rs` | A hand-built arithmetic grammar evaluated through a post-parse walk |
//! | `patterns.rs` | End-to-end behavior of compiled pattern strings |
//! | `stateful.rs` | Flags, captures, replays, hints and finalize across rules |
//! | `composition.rs` | Imports, qualified references and grammar re-entry |
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p pegboard-tests
//! ```
