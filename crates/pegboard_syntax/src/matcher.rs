//! The match primitive.
//!
//! One dispatch function interprets the whole node algebra. Every arm
//! obeys the same contract: read zero or more bytes from `pos`, return
//! the new position on success or `None` on failure, and on failure
//! restore the parent token's child list to the anchor recorded on
//! entry. Flags and captures are never restored.

use pegboard_base::{ascii, Span};

use crate::definition::Definition;
use crate::node::{CallContext, LinkTarget, NodeId, NodeKind, ScopeRef};
use crate::state::State;
use crate::token::TokenId;

/// Matches the rule `rule` of `def` at `pos`, producing a token under
/// `parent` when the rule generates one.
pub(crate) fn match_rule(
    def: &Definition,
    rule: u32,
    text: &[u8],
    pos: usize,
    parent: Option<TokenId>,
    state: &mut State,
) -> Option<usize> {
    let r = def.rule(rule);
    if !r.generate {
        return match_node(def, r.entry, text, pos, parent, state);
    }
    let token = state.tokens.push(def.id(), rule, parent, pos);
    match match_node(def, r.entry, text, pos, Some(token), state) {
        Some(end) => {
            state.tokens.close(token, end);
            Some(end)
        }
        None => {
            state.tokens.unlink_last(parent, token);
            None
        }
    }
}

/// Matches the node `id` of `def` at `pos`.
pub(crate) fn match_node(
    def: &Definition,
    id: NodeId,
    text: &[u8],
    pos: usize,
    parent: Option<TokenId>,
    state: &mut State,
) -> Option<usize> {
    match &def.nodes().get(id).kind {
        NodeKind::Byte { ch, invert } => {
            let byte = *text.get(pos)?;
            if (byte != *ch) != *invert {
                return None;
            }
            Some(pos + 1)
        }
        NodeKind::Greater { ch, invert } => {
            let byte = *text.get(pos)?;
            if (byte <= *ch) != *invert {
                return None;
            }
            Some(pos + 1)
        }
        NodeKind::GreaterOrEqual { ch, invert } => {
            let byte = *text.get(pos)?;
            if (byte < *ch) != *invert {
                return None;
            }
            Some(pos + 1)
        }
        NodeKind::Any => {
            if pos < text.len() {
                Some(pos + 1)
            } else {
                None
            }
        }
        NodeKind::RangeMinMax { a, b, invert } => {
            let byte = *text.get(pos)?;
            if (byte < *a || *b < byte) != *invert {
                return None;
            }
            Some(pos + 1)
        }
        NodeKind::RangeExplicit { set, invert } => {
            let byte = *text.get(pos)?;
            if set.contains(&byte) == *invert {
                return None;
            }
            Some(pos + 1)
        }
        NodeKind::Literal { text: lit, fold_case } => {
            if pos >= text.len() {
                return None;
            }
            let mut at = pos;
            let mut matched = 0;
            while matched < lit.len() && at < text.len() {
                let mut byte = text[at];
                if *fold_case {
                    byte = ascii::to_lower(byte);
                }
                at += 1;
                if lit[matched] != byte {
                    break;
                }
                matched += 1;
            }
            if matched == lit.len() {
                Some(at)
            } else {
                None
            }
        }
        NodeKind::Keyword { map, fold_case, .. } => {
            if pos >= text.len() {
                return None;
            }
            let (end, &keyword) = map.match_longest(text, pos, *fold_case)?;
            if let Some(p) = parent {
                state.tokens.set_keyword(p, keyword);
            }
            Some(end)
        }
        NodeKind::Boi => {
            if pos == 0 {
                Some(pos)
            } else {
                None
            }
        }
        NodeKind::Eoi => {
            let at_end = pos >= text.len() && (pos == 0 || pos - 1 < text.len());
            if at_end {
                Some(pos)
            } else {
                None
            }
        }
        NodeKind::Pass { invert } => {
            if *invert {
                None
            } else {
                Some(pos)
            }
        }
        NodeKind::Repeat { min, max, entry } => {
            let anchor = state.tokens.last_child_of(parent);
            let mut at = pos;
            let mut count = 0usize;
            while count < *max {
                let before = at;
                match match_node(def, *entry, text, before, parent, state) {
                    Some(end) => {
                        if end == before {
                            panic!("repeated empty match, bailing out");
                        }
                        at = end;
                        count += 1;
                    }
                    None => break,
                }
            }
            if count < *min {
                state.tokens.rollback(parent, anchor);
                return None;
            }
            Some(at)
        }
        NodeKind::LazyRepeat { min, entry } => {
            let anchor = state.tokens.last_child_of(parent);
            let mut at = pos;
            let mut count = 0usize;
            loop {
                if count >= *min && succession_matches(def, id, text, at, parent, state) {
                    return Some(at);
                }
                let before = at;
                match match_node(def, *entry, text, before, parent, state) {
                    Some(end) => {
                        if end == before {
                            panic!("repeated empty match, bailing out");
                        }
                        at = end;
                        count += 1;
                    }
                    None => break,
                }
            }
            state.tokens.rollback(parent, anchor);
            None
        }
        NodeKind::GreedyRepeat { min, max, entry } => {
            let anchor = state.tokens.last_child_of(parent);
            let has_succession = def.nodes().successor(id).is_some();
            let mut keep_anchor = anchor;
            let mut committed = pos;
            let mut at = pos;
            let mut count = 0usize;
            while count < *max {
                let before = at;
                match match_node(def, *entry, text, before, parent, state) {
                    None => break,
                    Some(end) => {
                        if end == before {
                            panic!("repeated empty match, bailing out");
                        }
                        at = end;
                        count += 1;
                        if count >= *min {
                            if has_succession {
                                let probe_anchor = state.tokens.last_child_of(parent);
                                if succession_matches(def, id, text, at, parent, state) {
                                    committed = at;
                                    keep_anchor = probe_anchor;
                                }
                            } else {
                                committed = at;
                            }
                        }
                    }
                }
            }
            if count < *min {
                state.tokens.rollback(parent, anchor);
                return None;
            }
            if has_succession {
                // Keep only the iterations up to the last position the
                // chain accepted; with no acceptance this is a zero-width
                // match and the caller's own chain attempt decides.
                state.tokens.rollback(parent, keep_anchor);
            }
            Some(committed)
        }
        NodeKind::Length { min, max, entry } => {
            let anchor = state.tokens.last_child_of(parent);
            match match_node(def, *entry, text, pos, parent, state) {
                Some(end) if end - pos >= *min && end - pos <= *max => Some(end),
                _ => {
                    state.tokens.rollback(parent, anchor);
                    None
                }
            }
        }
        NodeKind::Choice { children } => {
            let anchor = state.tokens.last_child_of(parent);
            let mut result = None;
            for &child in children.iter() {
                if state.bailing_out() {
                    break;
                }
                result = match_node(def, child, text, pos, parent, state);
                if result.is_some() {
                    break;
                }
                state.tokens.rollback(parent, anchor);
            }
            if result.is_none() {
                state.tokens.rollback(parent, anchor);
            }
            result
        }
        NodeKind::LazyChoice { children } => {
            let anchor = state.tokens.last_child_of(parent);
            for &child in children.iter() {
                if state.bailing_out() {
                    break;
                }
                if let Some(end) = match_node(def, child, text, pos, parent, state) {
                    if succession_matches(def, id, text, end, parent, state) {
                        return Some(end);
                    }
                }
                state.tokens.rollback(parent, anchor);
            }
            state.tokens.rollback(parent, anchor);
            None
        }
        NodeKind::Glue { children } => {
            let anchor = state.tokens.last_child_of(parent);
            let mut at = Some(pos);
            for &child in children.iter() {
                if state.bailing_out() {
                    at = None;
                    break;
                }
                let Some(p) = at else { break };
                at = match_node(def, child, text, p, parent, state);
            }
            if at.is_none() {
                state.tokens.rollback(parent, anchor);
            }
            at
        }
        NodeKind::Filter { filter, blank, entry } => {
            let anchor = state.tokens.last_child_of(parent);
            let filtered = match_node(def, *filter, text, pos, parent, state).is_some();
            let marks = state.tokens.collect_after(parent, anchor);
            state.tokens.rollback(parent, anchor);

            let result = if filtered && !marks.is_empty() {
                let mut masked = text.to_vec();
                for &mark in &marks {
                    let span = state.tokens.get(mark).span();
                    let start = span.start.min(masked.len());
                    let end = span.end.min(masked.len());
                    masked[start..end].fill(*blank);
                }
                match_node(def, *entry, &masked, pos, parent, state)
            } else {
                match_node(def, *entry, text, pos, parent, state)
            };

            match result {
                Some(end) => {
                    if let Some(p) = parent {
                        splice_marks(state, p, anchor, &marks);
                    }
                    Some(end)
                }
                None => {
                    state.tokens.rollback(parent, anchor);
                    None
                }
            }
        }
        NodeKind::Find { entry } => {
            let anchor = state.tokens.last_child_of(parent);
            let mut at = pos;
            while at < text.len() || (at >= 1 && at - 1 < text.len()) {
                if let Some(end) = match_node(def, *entry, text, at, parent, state) {
                    return Some(end);
                }
                at += 1;
            }
            state.tokens.rollback(parent, anchor);
            None
        }
        NodeKind::Ahead { entry, invert } => {
            let anchor = state.tokens.last_child_of(parent);
            let matched = match_node(def, *entry, text, pos, parent, state).is_some();
            state.tokens.rollback(parent, anchor);
            if matched != *invert {
                Some(pos)
            } else {
                None
            }
        }
        NodeKind::Behind { entry, invert, len } => {
            let len = match len {
                Some(len) if *len > 0 => *len,
                _ => return None,
            };
            let anchor = state.tokens.last_child_of(parent);
            let matched = pos >= len
                && pos - len < text.len()
                && match_node(def, *entry, text, pos - len, parent, state).is_some();
            state.tokens.rollback(parent, anchor);
            if matched != *invert {
                Some(pos)
            } else {
                None
            }
        }
        NodeKind::Hint {
            message,
            entry,
            strict,
        } => {
            let result = match_node(def, *entry, text, pos, parent, state);
            if result.is_none() && !state.is_finalized() {
                state.set_hint(message, pos);
                if *strict {
                    state.finalize();
                }
            }
            result
        }
        NodeKind::Call { callback } => callback(CallContext {
            text,
            position: pos,
            parent,
            state,
        }),
        NodeKind::SetFlag { scope, flag, value } => {
            state.set_flag(*scope, *flag as usize, *value);
            Some(pos)
        }
        NodeKind::IfFlag {
            scope,
            flag,
            true_branch,
            false_branch,
        } => {
            let branch = if state.flag(*scope, *flag as usize) {
                *true_branch
            } else {
                *false_branch
            };
            match_node(def, branch, text, pos, parent, state)
        }
        NodeKind::Capture {
            scope,
            slot,
            coverage,
        } => {
            let anchor = state.tokens.last_child_of(parent);
            match match_node(def, *coverage, text, pos, parent, state) {
                Some(end) => {
                    state.set_capture(*scope, *slot as usize, Span::new(pos, end));
                    Some(end)
                }
                None => {
                    state.tokens.rollback(parent, anchor);
                    None
                }
            }
        }
        NodeKind::Replay { scope, slot } => {
            let Some(range) = state.capture(*scope, *slot as usize) else {
                return Some(pos);
            };
            let len = range.len();
            let recorded = text.get(range.start..range.end)?;
            let ahead = text.get(pos..pos + len)?;
            if recorded == ahead {
                Some(pos + len)
            } else {
                None
            }
        }
        NodeKind::Ref { target, generate } => {
            let (scope, rule) = resolved(target);
            let target_def = scope.definition(def);
            if *generate && target_def.rule(rule).generate {
                match_rule(target_def, rule, text, pos, parent, state)
            } else {
                match_node(target_def, target_def.rule(rule).entry, text, pos, parent, state)
            }
        }
        NodeKind::Invoke { target, coverage } => {
            let (scope, rule) = resolved(target);
            let target_def = scope.definition(def);
            let limit = match coverage {
                Some(coverage) => {
                    let anchor = state.tokens.last_child_of(parent);
                    let end = match_node(def, *coverage, text, pos, parent, state);
                    state.tokens.rollback(parent, anchor);
                    end?
                }
                None => text.len(),
            };
            let sub = &text[pos..limit];
            let mark = state.tokens.next_index();
            let consumed = match_rule(target_def, rule, sub, 0, parent, state)?;
            state.tokens.shift_from(mark, pos);
            Some(pos + consumed)
        }
        NodeKind::Previous {
            target, keyword, ..
        } => {
            let p = parent?;
            let sibling = state.tokens.get(p).prev_sibling()?;
            let (scope, rule) = resolved(target);
            let scope_id = scope.definition(def).id();
            let token = state.tokens.get(sibling);
            let hit = token.scope() == scope_id
                && token.rule() == rule
                && keyword.map_or(true, |k| token.keyword() == Some(k));
            if hit {
                Some(pos)
            } else {
                None
            }
        }
        NodeKind::Context {
            target,
            in_context,
            out_of_context,
        } => {
            let p = parent?;
            let context = state.tokens.get(p).parent()?;
            let (scope, rule) = resolved(target);
            let scope_id = scope.definition(def).id();
            let token = state.tokens.get(context);
            let branch = if token.scope() == scope_id && token.rule() == rule {
                *in_context
            } else {
                *out_of_context
            };
            let anchor = state.tokens.last_child_of(parent);
            match match_node(def, branch, text, pos, parent, state) {
                Some(end) => Some(end),
                None => {
                    state.tokens.rollback(parent, anchor);
                    None
                }
            }
        }
        NodeKind::Trace { entry, .. } => match_node(def, *entry, text, pos, parent, state),
    }
}

/// Speculatively runs the succession chain of `id` from `at` and rolls
/// every token effect back. A node without a chain trivially succeeds.
fn succession_matches(
    def: &Definition,
    id: NodeId,
    text: &[u8],
    at: usize,
    parent: Option<TokenId>,
    state: &mut State,
) -> bool {
    let mut succ = def.nodes().successor(id);
    if succ.is_none() {
        return true;
    }
    let anchor = state.tokens.last_child_of(parent);
    let mut pos = Some(at);
    while let (Some(p), Some(node)) = (pos, succ) {
        pos = match_node(def, node, text, p, parent, state);
        succ = def.nodes().successor(node);
    }
    state.tokens.rollback(parent, anchor);
    pos.is_some()
}

/// Splices the filter tokens back into `parent`'s child list, each one
/// between the pair of entry tokens its span falls between.
fn splice_marks(state: &mut State, parent: TokenId, anchor: Option<TokenId>, marks: &[TokenId]) {
    let mut next_mark = 0usize;
    let mut at = match anchor {
        Some(a) => state.tokens.get(a).next_sibling(),
        None => state.tokens.get(parent).first_child(),
    };
    while let Some(current) = at {
        if next_mark >= marks.len() {
            break;
        }
        let mark = marks[next_mark];
        let mark_span = state.tokens.get(mark).span();
        if state.tokens.get(current).span().end <= mark_span.start {
            let after = state.tokens.get(current).next_sibling();
            let fits = match after {
                None => true,
                Some(after) => mark_span.end <= state.tokens.get(after).span().start,
            };
            if fits {
                state.tokens.insert_after(parent, mark, current);
                next_mark += 1;
            }
        }
        at = state.tokens.get(current).next_sibling();
    }
}

fn resolved(target: &LinkTarget) -> (&ScopeRef, u32) {
    match target {
        LinkTarget::Resolved { scope, rule } => (scope, *rule),
        LinkTarget::Pending(name) => {
            unreachable!("reference to '{name}' was never linked")
        }
    }
}
