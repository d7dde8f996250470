//! Per-match scratch state.
//!
//! A [`State`] is created for every match and discarded afterwards. It
//! holds the boolean flags and capture ranges addressable by grammar
//! nodes, the best failure hint recorded so far, the finalize bit that
//! aborts outer backtracking, and the [`TokenTree`] the match builds
//! into.
//!
//! Flags and captures are deliberately **not** rolled back when a node
//! fails: a `set` inside a failing choice branch stays set. This is what
//! makes sticky contextual state (such as "inside string literal")
//! expressible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pegboard_base::Span;
use rustc_hash::FxHashMap;

use crate::token::TokenTree;

/// Flag and capture slot counts for one scope, fixed at definition
/// build time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScopeLayout {
    pub(crate) scope: u32,
    pub(crate) flag_count: usize,
    pub(crate) capture_count: usize,
}

#[derive(Debug)]
struct ScopeSlots {
    flags: Vec<bool>,
    captures: Vec<Option<Span>>,
}

/// The per-match scratch area: flags, captures, hint, finalize bit and
/// token tree.
pub struct State {
    scopes: FxHashMap<u32, ScopeSlots>,
    hint: Option<(&'static str, usize)>,
    finalize: bool,
    cancel: Option<Arc<AtomicBool>>,
    pub(crate) tokens: TokenTree,
}

impl State {
    pub(crate) fn new(layout: &[ScopeLayout], cancel: Option<Arc<AtomicBool>>) -> Self {
        let mut scopes = FxHashMap::default();
        for entry in layout {
            scopes.insert(
                entry.scope,
                ScopeSlots {
                    flags: vec![false; entry.flag_count],
                    captures: vec![None; entry.capture_count],
                },
            );
        }
        State {
            scopes,
            hint: None,
            finalize: false,
            cancel,
            tokens: TokenTree::new(),
        }
    }

    /// Reads a flag. Flags start out `false`.
    pub fn flag(&self, scope: u32, id: usize) -> bool {
        self.scopes
            .get(&scope)
            .and_then(|s| s.flags.get(id).copied())
            .unwrap_or(false)
    }

    pub(crate) fn set_flag(&mut self, scope: u32, id: usize, value: bool) {
        let slots = self
            .scopes
            .get_mut(&scope)
            .expect("flag scope not registered in state layout");
        slots.flags[id] = value;
    }

    /// Reads a capture range. Captures start out unset.
    pub fn capture(&self, scope: u32, id: usize) -> Option<Span> {
        self.scopes
            .get(&scope)
            .and_then(|s| s.captures.get(id).copied())
            .flatten()
    }

    pub(crate) fn set_capture(&mut self, scope: u32, id: usize, range: Span) {
        let slots = self
            .scopes
            .get_mut(&scope)
            .expect("capture scope not registered in state layout");
        slots.captures[id] = Some(range);
    }

    /// The best failure explanation recorded so far, with the byte
    /// offset where the failure was detected.
    pub fn hint(&self) -> Option<(&'static str, usize)> {
        self.hint
    }

    pub(crate) fn set_hint(&mut self, message: &'static str, offset: usize) {
        self.hint = Some((message, offset));
    }

    /// Whether a strict hint has aborted all outer backtracking.
    pub fn is_finalized(&self) -> bool {
        self.finalize
    }

    pub(crate) fn finalize(&mut self) {
        self.finalize = true;
    }

    /// Checked by choice and sequence loops at every iteration boundary:
    /// the finalize bit or a pending host cancellation ends the match.
    pub(crate) fn bailing_out(&self) -> bool {
        self.finalize
            || self
                .cancel
                .as_ref()
                .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// The tokens produced so far.
    pub fn tokens(&self) -> &TokenTree {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Vec<ScopeLayout> {
        vec![
            ScopeLayout {
                scope: 1,
                flag_count: 2,
                capture_count: 1,
            },
            ScopeLayout {
                scope: 2,
                flag_count: 1,
                capture_count: 0,
            },
        ]
    }

    #[test]
    fn flags_default_to_false_and_stick() {
        let mut state = State::new(&layout(), None);
        assert!(!state.flag(1, 0));
        state.set_flag(1, 0, true);
        assert!(state.flag(1, 0));
        assert!(!state.flag(1, 1));
        assert!(!state.flag(2, 0));
    }

    #[test]
    fn captures_default_to_unset() {
        let mut state = State::new(&layout(), None);
        assert_eq!(state.capture(1, 0), None);
        state.set_capture(1, 0, Span::new(3, 7));
        assert_eq!(state.capture(1, 0), Some(Span::new(3, 7)));
    }

    #[test]
    fn unknown_scope_reads_are_harmless() {
        let state = State::new(&layout(), None);
        assert!(!state.flag(99, 0));
        assert_eq!(state.capture(99, 0), None);
    }

    #[test]
    fn hint_and_finalize_are_recorded() {
        let mut state = State::new(&layout(), None);
        assert_eq!(state.hint(), None);
        state.set_hint("expected digit", 4);
        assert_eq!(state.hint(), Some(("expected digit", 4)));
        assert!(!state.is_finalized());
        state.finalize();
        assert!(state.is_finalized());
        assert!(state.bailing_out());
    }

    #[test]
    fn host_cancellation_bails_out() {
        let cancel = Arc::new(AtomicBool::new(false));
        let state = State::new(&layout(), Some(cancel.clone()));
        assert!(!state.bailing_out());
        cancel.store(true, Ordering::Relaxed);
        assert!(state.bailing_out());
        assert!(!state.is_finalized());
    }
}
