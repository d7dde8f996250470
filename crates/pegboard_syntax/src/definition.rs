//! Definitions and the builder that assembles them.
//!
//! A syntax definition goes through two phases with two types. A
//! [`Builder`] is write-only: it allocates grammar nodes, registers
//! named rules, imports other definitions and finally links. Linking
//! resolves every symbolic reference in one pass and produces a frozen
//! [`Definition`], which is immutable, `Send + Sync`, and shared freely
//! across threads. Matching never mutates a definition, so the type
//! split makes "matching before linking" unrepresentable.
//!
//! Rule references may be qualified with imported scope names, as in
//! `"expr::sum"`; the linker walks the scope map segment by segment.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use pegboard_base::{ascii, PrefixTree, Span};
use rustc_hash::FxHashMap;

use crate::debug::NodeObserver;
use crate::matcher;
use crate::node::{CallContext, LinkTarget, NodeArena, NodeId, NodeKind, ScopeRef};
use crate::state::{ScopeLayout, State};
use crate::token::{TokenId, TokenTree};

pub(crate) struct RuleData {
    pub(crate) name: String,
    pub(crate) entry: NodeId,
    pub(crate) generate: bool,
}

/// Assembles a syntax definition.
///
/// All node constructors return a [`NodeId`] into the builder's arena;
/// combinators take the ids of previously constructed nodes. Every node
/// must be used in exactly one place.
///
/// # Panics
///
/// Misassembling a grammar is a programmer error, reported by panicking:
/// redefining a rule, importing an anonymous definition, or linking with
/// unresolved rule, scope or keyword names.
pub struct Builder<'o> {
    nodes: NodeArena,
    name: Option<String>,
    case_sensitive: bool,
    rules: Vec<RuleData>,
    rule_by_name: FxHashMap<String, u32>,
    keyword_by_name: FxHashMap<String, u32>,
    flag_by_name: FxHashMap<String, u32>,
    capture_by_name: FxHashMap<String, u32>,
    scopes: FxHashMap<String, Arc<Definition>>,
    entry_name: Option<String>,
    pending: Vec<NodeId>,
    observer: Option<&'o mut dyn NodeObserver>,
}

impl Builder<'static> {
    /// Creates a builder for an anonymous definition.
    ///
    /// Anonymous definitions match like named ones but cannot be
    /// imported into other definitions.
    pub fn new() -> Self {
        Self::with_parts(None, None)
    }

    /// Creates a builder for a definition named `name`.
    ///
    /// The definition's identity is the CRC-32 of the name, so tokens
    /// and state slots can be attributed to their scope.
    pub fn named(name: &str) -> Self {
        Self::with_parts(Some(name), None)
    }
}

impl Default for Builder<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'o> Builder<'o> {
    /// Creates a builder whose freshly constructed nodes are passed to
    /// `observer`, for tracing and pretty-printing. Observation never
    /// changes match semantics.
    pub fn observed(name: Option<&str>, observer: &'o mut dyn NodeObserver) -> Builder<'o> {
        Self::with_parts(name, Some(observer))
    }

    fn with_parts(name: Option<&str>, observer: Option<&'o mut dyn NodeObserver>) -> Builder<'o> {
        Builder {
            nodes: NodeArena::new(),
            name: name.map(str::to_owned),
            case_sensitive: true,
            rules: Vec::new(),
            rule_by_name: FxHashMap::default(),
            keyword_by_name: FxHashMap::default(),
            flag_by_name: FxHashMap::default(),
            capture_by_name: FxHashMap::default(),
            scopes: FxHashMap::default(),
            entry_name: None,
            pending: Vec::new(),
            observer,
        }
    }

    fn produce(&mut self, kind: NodeKind, children: &[NodeId]) -> NodeId {
        let variant = kind.variant_name();
        let id = self.nodes.push(kind);
        if !children.is_empty() {
            self.nodes.adopt(id, children);
        }
        match &mut self.observer {
            Some(observer) => observer.node_built(&mut self.nodes, id, variant),
            None => id,
        }
    }

    /// Like [`produce`](Self::produce), but also queues the node for
    /// link-time resolution.
    fn produce_link(&mut self, kind: NodeKind, children: &[NodeId]) -> NodeId {
        let variant = kind.variant_name();
        let id = self.nodes.push(kind);
        if !children.is_empty() {
            self.nodes.adopt(id, children);
        }
        self.pending.push(id);
        match &mut self.observer {
            Some(observer) => observer.node_built(&mut self.nodes, id, variant),
            None => id,
        }
    }

    //-- options

    /// Whether subsequently constructed literals and keywords compare
    /// case-sensitively. Defaults to `true`; folding is ASCII-only.
    pub fn case_sensitive(&mut self, value: bool) {
        self.case_sensitive = value;
    }

    //-- terminals

    /// Matches the single byte `ch`.
    pub fn byte(&mut self, ch: u8) -> NodeId {
        self.produce(NodeKind::Byte { ch, invert: false }, &[])
    }

    /// Matches any single byte except `ch`.
    pub fn other(&mut self, ch: u8) -> NodeId {
        self.produce(NodeKind::Byte { ch, invert: true }, &[])
    }

    /// Matches one byte strictly greater than `ch`.
    pub fn greater(&mut self, ch: u8) -> NodeId {
        self.produce(NodeKind::Greater { ch, invert: false }, &[])
    }

    /// Matches one byte less than or equal to `ch`.
    pub fn below(&mut self, ch: u8) -> NodeId {
        self.produce(NodeKind::Greater { ch, invert: true }, &[])
    }

    /// Matches one byte greater than or equal to `ch`.
    pub fn greater_or_equal(&mut self, ch: u8) -> NodeId {
        self.produce(NodeKind::GreaterOrEqual { ch, invert: false }, &[])
    }

    /// Matches one byte strictly less than `ch`.
    pub fn below_or_equal(&mut self, ch: u8) -> NodeId {
        self.produce(NodeKind::GreaterOrEqual { ch, invert: true }, &[])
    }

    /// Matches any single byte; fails only at the end of input.
    pub fn any(&mut self) -> NodeId {
        self.produce(NodeKind::Any, &[])
    }

    /// Matches one byte in the inclusive range `a..=b`.
    pub fn range(&mut self, a: u8, b: u8) -> NodeId {
        self.produce(
            NodeKind::RangeMinMax {
                a,
                b,
                invert: false,
            },
            &[],
        )
    }

    /// Matches one byte outside the inclusive range `a..=b`.
    pub fn except(&mut self, a: u8, b: u8) -> NodeId {
        self.produce(NodeKind::RangeMinMax { a, b, invert: true }, &[])
    }

    /// Matches one byte contained in `set`.
    pub fn one_of(&mut self, set: impl AsRef<[u8]>) -> NodeId {
        self.produce(
            NodeKind::RangeExplicit {
                set: set.as_ref().to_vec().into_boxed_slice(),
                invert: false,
            },
            &[],
        )
    }

    /// Matches one byte not contained in `set`.
    pub fn none_of(&mut self, set: impl AsRef<[u8]>) -> NodeId {
        self.produce(
            NodeKind::RangeExplicit {
                set: set.as_ref().to_vec().into_boxed_slice(),
                invert: true,
            },
            &[],
        )
    }

    /// Matches the literal byte sequence `text`, honoring the current
    /// case-sensitivity option.
    pub fn string(&mut self, text: impl AsRef<[u8]>) -> NodeId {
        let mut text = text.as_ref().to_vec();
        let fold_case = !self.case_sensitive;
        if fold_case {
            ascii::fold_in_place(&mut text);
        }
        self.produce(
            NodeKind::Literal {
                text: text.into_boxed_slice(),
                fold_case,
            },
            &[],
        )
    }

    /// Matches the longest of the whitespace-separated `words`, tagging
    /// the enclosing token with the keyword's id.
    ///
    /// Keyword ids are assigned in registration order and shared across
    /// all keyword sets of this definition; look them up with
    /// [`Definition::keyword_id`].
    pub fn keywords(&mut self, words: &str) -> NodeId {
        let mut map = PrefixTree::new();
        for word in words.split_whitespace() {
            let next = self.keyword_by_name.len() as u32;
            let id = *self
                .keyword_by_name
                .entry(word.to_owned())
                .or_insert(next);
            map.insert(word.as_bytes(), id);
        }
        self.produce(
            NodeKind::Keyword {
                map: Arc::new(map),
                words: words.into(),
                fold_case: !self.case_sensitive,
            },
            &[],
        )
    }

    /// Matches only at offset zero, consuming nothing.
    pub fn boi(&mut self) -> NodeId {
        self.produce(NodeKind::Boi, &[])
    }

    /// Matches only past the last byte, consuming nothing.
    pub fn eoi(&mut self) -> NodeId {
        self.produce(NodeKind::Eoi, &[])
    }

    /// Always succeeds, consuming nothing.
    pub fn pass(&mut self) -> NodeId {
        self.produce(NodeKind::Pass { invert: false }, &[])
    }

    /// Always fails.
    pub fn fail(&mut self) -> NodeId {
        self.produce(NodeKind::Pass { invert: true }, &[])
    }

    //-- quantifiers

    /// Matches `entry` zero or more times.
    pub fn repeat(&mut self, entry: NodeId) -> NodeId {
        self.repeat_min_max(0, usize::MAX, entry)
    }

    /// Matches `entry` at least `min` times.
    pub fn repeat_min(&mut self, min: usize, entry: NodeId) -> NodeId {
        self.repeat_min_max(min, usize::MAX, entry)
    }

    /// Matches `entry` between `min` and `max` times, as often as it
    /// will go, without consulting what comes next.
    pub fn repeat_min_max(&mut self, min: usize, max: usize, entry: NodeId) -> NodeId {
        self.produce(NodeKind::Repeat { min, max, entry }, &[entry])
    }

    /// Matches `entry` as few times as possible: stops at the first
    /// count of at least `min` from which the succession chain matches.
    pub fn lazy_repeat(&mut self, entry: NodeId) -> NodeId {
        self.lazy_repeat_min(0, entry)
    }

    /// Like [`lazy_repeat`](Self::lazy_repeat) with a minimum count.
    pub fn lazy_repeat_min(&mut self, min: usize, entry: NodeId) -> NodeId {
        self.produce(NodeKind::LazyRepeat { min, entry }, &[entry])
    }

    /// Matches `entry` zero or more times, keeping the farthest
    /// position from which the succession chain also matches.
    pub fn greedy_repeat(&mut self, entry: NodeId) -> NodeId {
        self.greedy_repeat_min_max(0, usize::MAX, entry)
    }

    /// Like [`greedy_repeat`](Self::greedy_repeat) with a minimum count.
    pub fn greedy_repeat_min(&mut self, min: usize, entry: NodeId) -> NodeId {
        self.greedy_repeat_min_max(min, usize::MAX, entry)
    }

    /// Like [`greedy_repeat`](Self::greedy_repeat) with explicit bounds.
    pub fn greedy_repeat_min_max(&mut self, min: usize, max: usize, entry: NodeId) -> NodeId {
        self.produce(NodeKind::GreedyRepeat { min, max, entry }, &[entry])
    }

    //-- structure

    /// Ordered choice: tries `children` left to right, first success
    /// wins.
    pub fn choice(&mut self, children: &[NodeId]) -> NodeId {
        self.produce(
            NodeKind::Choice {
                children: children.to_vec().into_boxed_slice(),
            },
            children,
        )
    }

    /// Like [`choice`](Self::choice), but a candidate only wins if the
    /// succession chain also matches after it.
    pub fn lazy_choice(&mut self, children: &[NodeId]) -> NodeId {
        self.produce(
            NodeKind::LazyChoice {
                children: children.to_vec().into_boxed_slice(),
            },
            children,
        )
    }

    /// Sequence: matches `children` left to right; any failure fails
    /// the whole glue.
    pub fn glue(&mut self, children: &[NodeId]) -> NodeId {
        self.produce(
            NodeKind::Glue {
                children: children.to_vec().into_boxed_slice(),
            },
            children,
        )
    }

    /// Matches `entry` only if it covers between `min` and `max` bytes.
    pub fn length(&mut self, min: usize, max: usize, entry: NodeId) -> NodeId {
        self.produce(NodeKind::Length { min, max, entry }, &[entry])
    }

    /// Like [`length`](Self::length) without an upper bound.
    pub fn length_min(&mut self, min: usize, entry: NodeId) -> NodeId {
        self.length(min, usize::MAX, entry)
    }

    /// Matches `filter` to find spans, blanks them with `blank` in a
    /// copy of the input, matches `entry` against the masked copy, and
    /// splices the filter's tokens back in input order.
    pub fn filter(&mut self, filter: NodeId, blank: u8, entry: NodeId) -> NodeId {
        self.produce(
            NodeKind::Filter {
                filter,
                blank,
                entry,
            },
            &[filter, entry],
        )
    }

    /// Advances byte by byte until `entry` matches; yields the end of
    /// that match.
    pub fn find(&mut self, entry: NodeId) -> NodeId {
        self.produce(NodeKind::Find { entry }, &[entry])
    }

    /// Zero-width positive look-ahead.
    pub fn ahead(&mut self, entry: NodeId) -> NodeId {
        self.produce(
            NodeKind::Ahead {
                entry,
                invert: false,
            },
            &[entry],
        )
    }

    /// Zero-width negative look-ahead.
    pub fn not(&mut self, entry: NodeId) -> NodeId {
        self.produce(
            NodeKind::Ahead {
                entry,
                invert: true,
            },
            &[entry],
        )
    }

    /// Zero-width look-behind. `entry` must have a statically known,
    /// non-zero match length, or the node fails every match.
    pub fn behind(&mut self, entry: NodeId) -> NodeId {
        let len = self.nodes.match_length(entry);
        self.produce(
            NodeKind::Behind {
                entry,
                invert: false,
                len,
            },
            &[entry],
        )
    }

    /// Negated [`behind`](Self::behind).
    pub fn not_behind(&mut self, entry: NodeId) -> NodeId {
        let len = self.nodes.match_length(entry);
        self.produce(
            NodeKind::Behind {
                entry,
                invert: true,
                len,
            },
            &[entry],
        )
    }

    /// Records `message` as the failure hint when `entry` fails.
    pub fn hint(&mut self, message: &'static str, entry: NodeId) -> NodeId {
        self.produce(
            NodeKind::Hint {
                message,
                entry,
                strict: false,
            },
            &[entry],
        )
    }

    /// Like [`hint`](Self::hint), but also finalizes the state so all
    /// outer backtracking stops.
    pub fn expect(&mut self, message: &'static str, entry: NodeId) -> NodeId {
        self.produce(
            NodeKind::Hint {
                message,
                entry,
                strict: true,
            },
            &[entry],
        )
    }

    /// Delegates matching to a host function.
    pub fn call(
        &mut self,
        callback: impl Fn(CallContext<'_, '_>) -> Option<usize> + Send + Sync + 'static,
    ) -> NodeId {
        self.produce(
            NodeKind::Call {
                callback: Arc::new(callback),
            },
            &[],
        )
    }

    //-- stateful primitives

    /// Assigns the named flag, consuming nothing. Flag changes are
    /// never rolled back.
    pub fn set(&mut self, flag: &str, value: bool) -> NodeId {
        let flag = self.touch_flag(flag);
        let kind = NodeKind::SetFlag {
            scope: self.scope_id(),
            flag,
            value,
        };
        self.produce(kind, &[])
    }

    /// Matches `true_branch` or `false_branch` depending on the named
    /// flag.
    pub fn if_flag(&mut self, flag: &str, true_branch: NodeId, false_branch: NodeId) -> NodeId {
        let flag = self.touch_flag(flag);
        let kind = NodeKind::IfFlag {
            scope: self.scope_id(),
            flag,
            true_branch,
            false_branch,
        };
        self.produce(kind, &[true_branch, false_branch])
    }

    /// Matches `coverage` and records the covered range under the named
    /// capture. Capture changes are never rolled back.
    pub fn capture(&mut self, name: &str, coverage: NodeId) -> NodeId {
        let slot = self.touch_capture(name);
        let kind = NodeKind::Capture {
            scope: self.scope_id(),
            slot,
            coverage,
        };
        self.produce(kind, &[coverage])
    }

    /// Matches the exact bytes previously recorded under the named
    /// capture. An unset capture replays as zero bytes.
    pub fn replay(&mut self, name: &str) -> NodeId {
        let slot = self.touch_capture(name);
        let kind = NodeKind::Replay {
            scope: self.scope_id(),
            slot,
        };
        self.produce(kind, &[])
    }

    //-- rules and references

    /// Registers a token-generating rule and returns its id.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already defined.
    pub fn define(&mut self, name: &str, entry: NodeId) -> u32 {
        self.add_rule(name, entry, true)
    }

    /// Registers a rule that forwards its entry without generating a
    /// token.
    pub fn define_void(&mut self, name: &str, entry: NodeId) -> u32 {
        self.add_rule(name, entry, false)
    }

    fn add_rule(&mut self, name: &str, entry: NodeId, generate: bool) -> u32 {
        let id = self.rules.len() as u32;
        if self.rule_by_name.insert(name.to_owned(), id).is_some() {
            panic!("redefinition of rule '{name}'");
        }
        self.rules.push(RuleData {
            name: name.to_owned(),
            entry,
            generate,
        });
        id
    }

    /// Names the rule the definition matches by default.
    pub fn entry(&mut self, rule: &str) {
        self.entry_name = Some(rule.to_owned());
    }

    /// Registers `definition` as an importable scope, under `alias` or
    /// its own name. Rules of the scope are referenced as
    /// `"scope::rule"`.
    ///
    /// # Panics
    ///
    /// Panics if the definition is anonymous.
    pub fn import(&mut self, definition: &Arc<Definition>, alias: Option<&str>) {
        let name = match alias.or_else(|| definition.name()) {
            Some(name) => name.to_owned(),
            None => panic!("cannot import an anonymous syntax definition"),
        };
        self.scopes.insert(name, Arc::clone(definition));
    }

    /// References the named rule; a token is generated if the rule
    /// generates one.
    pub fn refer(&mut self, rule: &str) -> NodeId {
        self.produce_link(
            NodeKind::Ref {
                target: LinkTarget::Pending(rule.to_owned()),
                generate: true,
            },
            &[],
        )
    }

    /// References the named rule but matches its entry in place, never
    /// generating a token.
    pub fn inline(&mut self, rule: &str) -> NodeId {
        self.produce_link(
            NodeKind::Ref {
                target: LinkTarget::Pending(rule.to_owned()),
                generate: false,
            },
            &[],
        )
    }

    /// Re-enters the named rule on the sub-range delimited by
    /// `coverage` (or the rest of the input), mapping the sub-parse's
    /// tokens back into enclosing coordinates.
    pub fn invoke(&mut self, rule: &str, coverage: Option<NodeId>) -> NodeId {
        let children: Vec<NodeId> = coverage.into_iter().collect();
        self.produce_link(
            NodeKind::Invoke {
                target: LinkTarget::Pending(rule.to_owned()),
                coverage,
            },
            &children,
        )
    }

    /// Zero-width test that the immediately preceding sibling token was
    /// produced by the named rule.
    pub fn previous(&mut self, rule: &str) -> NodeId {
        self.produce_link(
            NodeKind::Previous {
                target: LinkTarget::Pending(rule.to_owned()),
                keyword_name: None,
                keyword: None,
            },
            &[],
        )
    }

    /// Like [`previous`](Self::previous), additionally requiring the
    /// sibling to carry the named keyword.
    pub fn previous_keyword(&mut self, rule: &str, keyword: &str) -> NodeId {
        self.produce_link(
            NodeKind::Previous {
                target: LinkTarget::Pending(rule.to_owned()),
                keyword_name: Some(keyword.to_owned()),
                keyword: None,
            },
            &[],
        )
    }

    /// Zero-width conditional on whether the enclosing parent token was
    /// produced by the named rule. Branches default to pass and fail.
    pub fn context(
        &mut self,
        rule: &str,
        in_context: Option<NodeId>,
        out_of_context: Option<NodeId>,
    ) -> NodeId {
        let in_context = in_context.unwrap_or_else(|| self.pass());
        let out_of_context = out_of_context.unwrap_or_else(|| self.fail());
        self.produce_link(
            NodeKind::Context {
                target: LinkTarget::Pending(rule.to_owned()),
                in_context,
                out_of_context,
            },
            &[in_context, out_of_context],
        )
    }

    fn scope_id(&self) -> u32 {
        definition_id(self.name.as_deref())
    }

    fn touch_flag(&mut self, name: &str) -> u32 {
        let next = self.flag_by_name.len() as u32;
        *self.flag_by_name.entry(name.to_owned()).or_insert(next)
    }

    fn touch_capture(&mut self, name: &str) -> u32 {
        let next = self.capture_by_name.len() as u32;
        *self.capture_by_name.entry(name.to_owned()).or_insert(next)
    }

    //-- linking

    /// Resolves every pending reference and freezes the definition.
    ///
    /// # Panics
    ///
    /// Panics on an undefined rule, scope or keyword name — an
    /// unresolved link is a fatal assembly error.
    pub fn link(mut self) -> Definition {
        let pending = std::mem::take(&mut self.pending);
        for id in pending {
            let name = match &self.nodes.get(id).kind {
                NodeKind::Ref { target, .. }
                | NodeKind::Invoke { target, .. }
                | NodeKind::Previous { target, .. }
                | NodeKind::Context { target, .. } => target
                    .name()
                    .expect("pending reference already resolved")
                    .to_owned(),
                _ => unreachable!("non-reference node queued for linking"),
            };
            let resolved = self.resolve_rule(&name);
            let keyword = match &self.nodes.get(id).kind {
                NodeKind::Previous {
                    keyword_name: Some(keyword),
                    ..
                } => Some(match self.keyword_by_name.get(keyword) {
                    Some(&id) => id,
                    None => panic!("undefined keyword '{keyword}'"),
                }),
                _ => None,
            };
            match &mut self.nodes.get_mut(id).kind {
                NodeKind::Ref { target, .. }
                | NodeKind::Invoke { target, .. }
                | NodeKind::Context { target, .. } => *target = resolved,
                NodeKind::Previous {
                    target,
                    keyword: slot,
                    ..
                } => {
                    *target = resolved;
                    *slot = keyword;
                }
                _ => unreachable!(),
            }
        }

        let entry = self
            .entry_name
            .take()
            .map(|name| match self.resolve_rule(&name) {
                LinkTarget::Resolved { scope, rule } => (scope, rule),
                LinkTarget::Pending(_) => unreachable!(),
            });

        let mut state_layout = vec![ScopeLayout {
            scope: definition_id(self.name.as_deref()),
            flag_count: self.flag_by_name.len(),
            capture_count: self.capture_by_name.len(),
        }];
        for imported in self.scopes.values() {
            for layout in &imported.state_layout {
                if !state_layout.iter().any(|l| l.scope == layout.scope) {
                    state_layout.push(*layout);
                }
            }
        }

        Definition {
            id: definition_id(self.name.as_deref()),
            name: self.name,
            nodes: self.nodes,
            rules: self.rules,
            rule_by_name: self.rule_by_name,
            keyword_by_name: self.keyword_by_name,
            flag_by_name: self.flag_by_name,
            capture_by_name: self.capture_by_name,
            scopes: self.scopes,
            entry,
            state_layout,
        }
    }

    /// Splits `name` at `::` into a scope path and a rule name, walks
    /// the scope map, and looks the rule up in the final scope.
    fn resolve_rule(&self, name: &str) -> LinkTarget {
        let segments: Vec<&str> = name.split("::").collect();
        let (path, rule_name) = segments.split_at(segments.len() - 1);
        let rule_name = rule_name[0];

        if path.is_empty() {
            let rule = match self.rule_by_name.get(rule_name) {
                Some(&rule) => rule,
                None => panic!("undefined rule '{name}'"),
            };
            return LinkTarget::Resolved {
                scope: ScopeRef::Local,
                rule,
            };
        }

        let mut scope = match self.scopes.get(path[0]) {
            Some(scope) => Arc::clone(scope),
            None => panic!("undefined scope '{}'", path[0]),
        };
        for segment in &path[1..] {
            let next = match scope.scopes.get(*segment) {
                Some(next) => Arc::clone(next),
                None => panic!("undefined scope '{segment}'"),
            };
            scope = next;
        }
        let rule = match scope.rule_by_name.get(rule_name) {
            Some(&rule) => rule,
            None => panic!("undefined rule '{name}'"),
        };
        LinkTarget::Resolved {
            scope: ScopeRef::Imported(scope),
            rule,
        }
    }
}

fn definition_id(name: Option<&str>) -> u32 {
    match name {
        Some(name) => crc32fast::hash(name.as_bytes()),
        None => 0,
    }
}

/// A linked, immutable syntax definition.
///
/// Produced by [`Builder::link`]; shareable across threads, usually as
/// an [`Arc`] so other definitions can import it.
pub struct Definition {
    nodes: NodeArena,
    id: u32,
    name: Option<String>,
    rules: Vec<RuleData>,
    pub(crate) rule_by_name: FxHashMap<String, u32>,
    keyword_by_name: FxHashMap<String, u32>,
    flag_by_name: FxHashMap<String, u32>,
    capture_by_name: FxHashMap<String, u32>,
    pub(crate) scopes: FxHashMap<String, Arc<Definition>>,
    entry: Option<(ScopeRef, u32)>,
    state_layout: Vec<ScopeLayout>,
}

impl std::fmt::Debug for Definition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl Definition {
    /// The definition's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The stable 32-bit identity derived from the name (0 when
    /// anonymous). Tokens record it as their scope.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Looks up a rule id by name.
    pub fn rule_id(&self, name: &str) -> Option<u32> {
        self.rule_by_name.get(name).copied()
    }

    /// Looks up a keyword id by name.
    pub fn keyword_id(&self, name: &str) -> Option<u32> {
        self.keyword_by_name.get(name).copied()
    }

    /// Looks up a flag id by name, for [`State::flag`].
    pub fn flag_id(&self, name: &str) -> Option<u32> {
        self.flag_by_name.get(name).copied()
    }

    /// Looks up a capture id by name, for [`State::capture`].
    pub fn capture_id(&self, name: &str) -> Option<u32> {
        self.capture_by_name.get(name).copied()
    }

    pub(crate) fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    pub(crate) fn rule(&self, id: u32) -> &RuleData {
        &self.rules[id as usize]
    }

    pub(crate) fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub(crate) fn rule_name(&self, id: u32) -> &str {
        &self.rules[id as usize].name
    }

    pub(crate) fn flag_names(&self) -> &FxHashMap<String, u32> {
        &self.flag_by_name
    }

    pub(crate) fn capture_names(&self) -> &FxHashMap<String, u32> {
        &self.capture_by_name
    }

    pub(crate) fn entry_rule(&self) -> Option<(&ScopeRef, u32)> {
        self.entry.as_ref().map(|(scope, rule)| (scope, *rule))
    }

    /// Matches the entry rule against `text` at `start`.
    ///
    /// On success the returned [`Match`] owns the match state and the
    /// token tree; on failure the [`NoMatch`] carries the best hint.
    ///
    /// # Panics
    ///
    /// Panics if the definition has no entry rule, or when a quantifier
    /// repeats an empty match.
    pub fn match_at(&self, text: &[u8], start: usize) -> Result<Match, NoMatch> {
        self.run(text, start, None)
    }

    /// Like [`match_at`](Self::match_at), with a cancellation flag the
    /// host may set from another thread. Once the flag is set, every
    /// choice and sequence bails out at its next iteration boundary.
    pub fn match_cancelable(
        &self,
        text: &[u8],
        start: usize,
        cancel: Arc<AtomicBool>,
    ) -> Result<Match, NoMatch> {
        self.run(text, start, Some(cancel))
    }

    fn run(
        &self,
        text: &[u8],
        start: usize,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<Match, NoMatch> {
        let mut state = State::new(&self.state_layout, cancel);
        match self.attempt(text, start, &mut state) {
            Some((root, end)) => Ok(Match {
                state,
                root,
                start,
                end,
            }),
            None => Err(NoMatch {
                hint: state.hint().map(|(message, offset)| (message.to_owned(), offset)),
                finalized: state.is_finalized(),
            }),
        }
    }

    /// Scans forward from `start` until the entry rule matches or the
    /// input is exhausted. The scan shares one state, so sticky flags
    /// and strict hints persist across attempts.
    pub fn find_at(&self, text: &[u8], start: usize) -> Result<Match, NoMatch> {
        let mut state = State::new(&self.state_layout, None);
        let mut at = start;
        while at < text.len() || (at >= 1 && at - 1 < text.len()) {
            if let Some((root, end)) = self.attempt(text, at, &mut state) {
                return Ok(Match {
                    state,
                    root,
                    start: at,
                    end,
                });
            }
            if state.bailing_out() {
                break;
            }
            at += 1;
        }
        Err(NoMatch {
            hint: state.hint().map(|(message, offset)| (message.to_owned(), offset)),
            finalized: state.is_finalized(),
        })
    }

    fn attempt(
        &self,
        text: &[u8],
        start: usize,
        state: &mut State,
    ) -> Option<(Option<TokenId>, usize)> {
        let (scope, rule) = self
            .entry
            .as_ref()
            .expect("definition has no entry rule");
        let def = scope.definition(self);
        let mark = state.tokens.next_index();
        let end = matcher::match_rule(def, *rule, text, start, None, state)?;
        let root = if (state.tokens.len() as u32) > mark {
            let candidate = TokenId(mark);
            state
                .tokens
                .get(candidate)
                .parent()
                .is_none()
                .then_some(candidate)
        } else {
            None
        };
        Some((root, end))
    }
}

/// A successful match: the covered region, the root token and the final
/// match state.
pub struct Match {
    state: State,
    root: Option<TokenId>,
    start: usize,
    end: usize,
}

impl std::fmt::Debug for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Match")
            .field("span", &self.span())
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Match {
    /// The root of the produced token tree. `None` only when the entry
    /// rule does not generate tokens.
    pub fn root(&self) -> Option<TokenId> {
        self.root
    }

    /// Position the match started from.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Position one past the last consumed byte.
    pub fn end(&self) -> usize {
        self.end
    }

    /// The covered input region.
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    /// The final match state, for flag and capture inspection.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The produced tokens.
    pub fn tokens(&self) -> &TokenTree {
        self.state.tokens()
    }
}

/// A failed match, carrying the best hint recorded on the way.
#[derive(Debug, Clone)]
pub struct NoMatch {
    hint: Option<(String, usize)>,
    finalized: bool,
}

impl NoMatch {
    /// The best failure explanation and the byte offset where it was
    /// detected.
    pub fn hint(&self) -> Option<(&str, usize)> {
        self.hint
            .as_ref()
            .map(|(message, offset)| (message.as_str(), *offset))
    }

    /// Whether a strict hint finalized the state, aborting all
    /// backtracking.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl std::fmt::Display for NoMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.hint {
            Some((message, offset)) => write!(f, "{offset}: {message}"),
            None => write!(f, "no match"),
        }
    }
}

impl std::error::Error for NoMatch {}

#[cfg(test)]
mod tests {
    use super::*;

    fn end_of(result: Result<Match, NoMatch>) -> Option<usize> {
        result.ok().map(|m| m.end())
    }

    #[test]
    fn definition_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Definition>();
    }

    #[test]
    fn terminals_on_empty_input() {
        let mut b = Builder::new();
        let boi = b.boi();
        let eoi = b.eoi();
        let both = b.glue(&[boi, eoi]);
        b.define("empty", both);
        b.entry("empty");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"", 0)), Some(0));
        assert_eq!(end_of(def.match_at(b"x", 0)), None);
    }

    #[test]
    fn any_consumes_one_byte_and_fails_at_end() {
        let mut b = Builder::new();
        let any = b.any();
        b.define("one", any);
        b.entry("one");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"x", 0)), Some(1));
        assert_eq!(end_of(def.match_at(b"x", 1)), None);
        assert_eq!(end_of(def.match_at(b"", 0)), None);
    }

    #[test]
    fn single_byte_rules_fail_on_empty_input() {
        let mut b = Builder::new();
        let x = b.byte(b'x');
        b.define("x", x);
        b.entry("x");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"", 0)), None);
        assert_eq!(end_of(def.match_at(b"x", 0)), Some(1));
    }

    #[test]
    fn byte_comparisons() {
        let mut b = Builder::new();
        let g = b.greater(b'm');
        let le = b.below_or_equal(b'm');
        let pair = b.glue(&[g, le]);
        b.define("pair", pair);
        b.entry("pair");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"za", 0)), Some(2));
        assert_eq!(end_of(def.match_at(b"az", 0)), None);
    }

    #[test]
    fn case_insensitive_string_folds_ascii() {
        let mut b = Builder::new();
        b.case_sensitive(false);
        let s = b.string("Select");
        b.define("kw", s);
        b.entry("kw");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"SELECT", 0)), Some(6));
        assert_eq!(end_of(def.match_at(b"select", 0)), Some(6));
        assert_eq!(end_of(def.match_at(b"sel", 0)), None);
    }

    #[test]
    fn choice_is_ordered_and_first_success_wins() {
        let mut b = Builder::new();
        let a = b.string("a");
        let ab = b.string("ab");
        let c = b.choice(&[a, ab]);
        b.define("pick", c);
        b.entry("pick");
        let def = b.link();

        // "a" wins even though "ab" would match more.
        assert_eq!(end_of(def.match_at(b"ab", 0)), Some(1));
    }

    #[test]
    fn glue_fails_as_a_whole_and_rolls_back_tokens() {
        let mut b = Builder::new();
        let x = b.byte(b'x');
        b.define("x", x);
        let x_ref = b.refer("x");
        let y = b.byte(b'y');
        let seq = b.glue(&[x_ref, y]);
        let seq_of = b.repeat_min_max(0, 1, seq);
        let any = b.any();
        let tail = b.repeat(any);
        let body = b.glue(&[seq_of, tail]);
        b.define("top", body);
        b.entry("top");
        let def = b.link();

        // "xz": the inner glue matches 'x' (token appended), fails on
        // 'z', and must leave no trace under the top token.
        let m = def.match_at(b"xz", 0).unwrap();
        let root = m.root().unwrap();
        assert_eq!(m.tokens().count_children(root), 0);
    }

    #[test]
    fn repeat_bounds_are_enforced() {
        let mut b = Builder::new();
        let d = b.range(b'0', b'9');
        let digits = b.repeat_min_max(2, 4, d);
        b.define("digits", digits);
        b.entry("digits");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"1", 0)), None);
        assert_eq!(end_of(def.match_at(b"12", 0)), Some(2));
        assert_eq!(end_of(def.match_at(b"12345", 0)), Some(4));
    }

    #[test]
    #[should_panic(expected = "repeated empty match")]
    fn zero_width_repeat_iteration_panics() {
        let mut b = Builder::new();
        let nothing = b.pass();
        let forever = b.repeat(nothing);
        b.define("bad", forever);
        b.entry("bad");
        let def = b.link();
        let _ = def.match_at(b"x", 0);
    }

    #[test]
    fn lazy_repeat_stops_at_first_chain_match() {
        let mut b = Builder::new();
        let any = b.any();
        let few = b.lazy_repeat(any);
        let stop = b.byte(b';');
        let line = b.glue(&[few, stop]);
        b.define("line", line);
        b.entry("line");
        let def = b.link();

        // Stops at the FIRST semicolon.
        assert_eq!(end_of(def.match_at(b"ab;cd;", 0)), Some(3));
        assert_eq!(end_of(def.match_at(b"abcd", 0)), None);
    }

    #[test]
    fn greedy_repeat_keeps_longest_position_the_chain_accepts() {
        let mut b = Builder::new();
        let any = b.any();
        let run = b.greedy_repeat(any);
        let stop = b.byte(b';');
        let line = b.glue(&[run, stop]);
        b.define("line", line);
        b.entry("line");
        let def = b.link();

        // Runs to the LAST semicolon.
        assert_eq!(end_of(def.match_at(b"ab;cd;", 0)), Some(6));
        assert_eq!(end_of(def.match_at(b"ab;cd", 0)), Some(3));
        assert_eq!(end_of(def.match_at(b"abcd", 0)), None);
    }

    #[test]
    fn greedy_repeat_discards_tokens_past_the_committed_position() {
        let mut b = Builder::new();
        let letter = b.range(b'a', b'z');
        b.define("letter", letter);
        let item = b.refer("letter");
        let run = b.greedy_repeat(item);
        let stop = b.byte(b'z');
        let seq = b.glue(&[run, stop]);
        b.define("run", seq);
        b.entry("run");
        let def = b.link();

        // Four letters, but the run must stop before the final 'z' so
        // the glue can consume it; only three letter tokens survive.
        let m = def.match_at(b"abcz", 0).unwrap();
        let root = m.root().unwrap();
        assert_eq!(m.end(), 4);
        assert_eq!(m.tokens().count_children(root), 3);
    }

    #[test]
    fn find_scans_to_the_match_and_returns_its_end() {
        let mut b = Builder::new();
        let needle = b.string("cat");
        let find = b.find(needle);
        b.define("scan", find);
        b.entry("scan");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"a cat sat", 0)), Some(5));
        assert_eq!(end_of(def.match_at(b"no dogs", 0)), None);
    }

    #[test]
    fn ahead_and_not_are_zero_width() {
        let mut b = Builder::new();
        let peek = b.string("ab");
        let ahead = b.ahead(peek);
        let a = b.byte(b'a');
        let seq = b.glue(&[ahead, a]);
        b.define("guarded", seq);
        b.entry("guarded");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"ab", 0)), Some(1));
        assert_eq!(end_of(def.match_at(b"ac", 0)), None);

        let mut b = Builder::new();
        let peek = b.string("ab");
        let not = b.not(peek);
        let a = b.byte(b'a');
        let seq = b.glue(&[not, a]);
        b.define("guarded", seq);
        b.entry("guarded");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"ac", 0)), Some(1));
        assert_eq!(end_of(def.match_at(b"ab", 0)), None);
    }

    #[test]
    fn behind_requires_known_length() {
        let mut b = Builder::new();
        let quote = b.byte(b'"');
        let behind = b.behind(quote);
        let x = b.byte(b'x');
        let seq = b.glue(&[behind, x]);
        let skip = b.any();
        let top = b.glue(&[skip, seq]);
        b.define("after_quote", top);
        b.entry("after_quote");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"\"x", 0)), Some(2));
        assert_eq!(end_of(def.match_at(b"ax", 0)), None);

        // Unknown-length entry: the look-behind fails every match.
        let mut b = Builder::new();
        let any = b.any();
        let run = b.repeat(any);
        let behind = b.behind(run);
        b.define("bad", behind);
        b.entry("bad");
        let def = b.link();
        assert_eq!(end_of(def.match_at(b"abc", 1)), None);
    }

    #[test]
    fn length_constrains_the_covered_span() {
        let mut b = Builder::new();
        let letter = b.range(b'a', b'z');
        let word = b.repeat_min(1, letter);
        let sized = b.length(2, 3, word);
        b.define("word", sized);
        b.entry("word");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"ab", 0)), Some(2));
        assert_eq!(end_of(def.match_at(b"a", 0)), None);
        assert_eq!(end_of(def.match_at(b"abcd", 0)), None);
    }

    #[test]
    fn keywords_tag_the_enclosing_token() {
        let mut b = Builder::named("kw");
        let words = b.keywords("for while if");
        b.define("keyword", words);
        b.entry("keyword");
        let def = b.link();

        let m = def.match_at(b"while(x)", 0).unwrap();
        assert_eq!(m.end(), 5);
        let token = m.root().unwrap();
        assert_eq!(m.tokens()[token].keyword(), def.keyword_id("while"));
        assert_ne!(def.keyword_id("for"), def.keyword_id("while"));
        assert_eq!(def.keyword_id("unless"), None);
    }

    #[test]
    fn previous_checks_the_preceding_sibling_token() {
        let mut b = Builder::new();
        let letter = b.range(b'a', b'z');
        b.define("letter", letter);
        let digit = b.range(b'0', b'9');
        b.define("digit", digit);

        let was_letter = b.previous("letter");
        let d = b.refer("digit");
        let after_letter = b.glue(&[was_letter, d]);
        b.define("suffix", after_letter);

        let l = b.refer("letter");
        let s = b.refer("suffix");
        let word = b.glue(&[l, s]);
        b.define("word", word);
        b.entry("word");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"a1", 0)), Some(2));
    }

    #[test]
    fn context_selects_branch_by_enclosing_rule() {
        let mut b = Builder::new();
        let x = b.byte(b'x');
        let inside = b.context("wrapper", None, None);
        let marked = b.glue(&[x, inside]);
        b.define("inner", marked);
        let i1 = b.refer("inner");
        b.define("wrapper", i1);
        let i2 = b.refer("inner");
        b.define("other", i2);
        b.entry("wrapper");
        let def = b.link();

        // Inside "wrapper" the context test passes.
        assert_eq!(end_of(def.match_at(b"x", 0)), Some(1));

        let mut b2 = Builder::new();
        let x = b2.byte(b'x');
        let inside = b2.context("wrapper", None, None);
        let marked = b2.glue(&[x, inside]);
        b2.define("inner", marked);
        let i1 = b2.refer("inner");
        b2.define("wrapper", i1);
        let i2 = b2.refer("inner");
        b2.define("other", i2);
        b2.entry("other");
        let def = b2.link();

        // Inside "other" the out-of-context branch (fail) runs.
        assert_eq!(end_of(def.match_at(b"x", 0)), None);
    }

    #[test]
    fn flags_survive_failed_choice_branches() {
        // A set() inside a failing branch must stay set.
        let mut b = Builder::named("sticky");
        let on = b.set("seen", true);
        let x = b.byte(b'x');
        let doomed = b.glue(&[on, x]);
        let y = b.byte(b'y');
        let alt = b.choice(&[doomed, y]);
        b.define("top", alt);
        b.entry("top");
        let def = b.link();

        let m = def.match_at(b"y", 0).unwrap();
        let flag = def.flag_id("seen").unwrap();
        assert!(m.state().flag(def.id(), flag as usize));
    }

    #[test]
    fn if_flag_selects_branches() {
        let mut b = Builder::named("modes");
        let on = b.set("strict", true);
        let x = b.byte(b'x');
        let y = b.byte(b'y');
        let pick = b.if_flag("strict", x, y);
        let seq = b.glue(&[on, pick]);
        b.define("top", seq);
        b.entry("top");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"x", 0)), Some(1));
        assert_eq!(end_of(def.match_at(b"y", 0)), None);
    }

    #[test]
    fn capture_and_replay_round_trip() {
        let mut b = Builder::named("pairs");
        let letter = b.range(b'a', b'z');
        let word = b.repeat_min(1, letter);
        let grab = b.capture("w", word);
        let eq = b.byte(b'=');
        let again = b.replay("w");
        let seq = b.glue(&[grab, eq, again]);
        b.define("pair", seq);
        b.entry("pair");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"cat=cat", 0)), Some(7));
        assert_eq!(end_of(def.match_at(b"cat=dog", 0)), None);
        assert_eq!(end_of(def.match_at(b"cat=ca", 0)), None);

        let m = def.match_at(b"cat=cat", 0).unwrap();
        let slot = def.capture_id("w").unwrap();
        assert_eq!(m.state().capture(def.id(), slot as usize), Some(Span::new(0, 3)));
    }

    #[test]
    fn replay_of_unset_capture_is_zero_width() {
        let mut b = Builder::named("maybe");
        let again = b.replay("w");
        let x = b.byte(b'x');
        let seq = b.glue(&[again, x]);
        b.define("top", seq);
        b.entry("top");
        let def = b.link();

        assert_eq!(end_of(def.match_at(b"x", 0)), Some(1));
    }

    #[test]
    fn strict_hint_finalizes_and_reports_offset() {
        let mut b = Builder::new();
        let digit = b.range(b'0', b'9');
        let expected = b.expect("expected digit", digit);
        let a = b.byte(b'a');
        let whole = b.string("ab");
        let alt = b.choice(&[expected, a, whole]);
        b.define("top", alt);
        b.entry("top");
        let def = b.link();

        // Without finalize the 'a' alternative would match; the strict
        // hint kills the whole choice.
        let err = def.match_at(b"ab", 0).unwrap_err();
        assert_eq!(err.hint(), Some(("expected digit", 0)));
        assert!(err.is_finalized());
        assert_eq!(err.to_string(), "0: expected digit");
    }

    #[test]
    fn soft_hint_reports_but_keeps_backtracking() {
        let mut b = Builder::new();
        let digit = b.range(b'0', b'9');
        let hinted = b.hint("expected digit", digit);
        let a = b.byte(b'a');
        let alt = b.choice(&[hinted, a]);
        b.define("top", alt);
        b.entry("top");
        let def = b.link();

        let m = def.match_at(b"a", 0).unwrap();
        assert_eq!(m.end(), 1);
        assert_eq!(m.state().hint(), Some(("expected digit", 0)));
        assert!(!m.state().is_finalized());
    }

    #[test]
    fn filter_masks_spans_and_splices_tokens() {
        // Filter: find the quoted region; entry: split on separator
        // runs. Masking turns the quoted region into separators, so the
        // ';' inside the quotes never splits a chunk.
        let mut b = Builder::new();
        let q1 = b.byte(b'"');
        let inner = b.other(b'"');
        let run = b.repeat(inner);
        let q2 = b.byte(b'"');
        let quoted = b.glue(&[q1, run, q2]);
        b.define("quoted", quoted);

        let q = b.refer("quoted");
        let find_q = b.find(q);
        let scan = b.repeat(find_q);
        b.define_void("mask", scan);

        let other = b.other(b';');
        let chunk_bytes = b.repeat_min(1, other);
        b.define("chunk", chunk_bytes);
        let c1 = b.refer("chunk");
        let semi = b.byte(b';');
        let semis = b.repeat_min(1, semi);
        let rest_chunk = b.refer("chunk");
        let sep = b.glue(&[semis, rest_chunk]);
        let seps = b.repeat(sep);
        let split = b.glue(&[c1, seps]);
        b.define_void("split", split);

        let mask = b.inline("mask");
        let body = b.inline("split");
        let filtered = b.filter(mask, b';', body);
        b.define("record", filtered);
        b.entry("record");
        let def = b.link();

        let input = b"a\"x;y\";b";
        let m = def.match_at(input, 0).unwrap();
        assert_eq!(m.end(), input.len());
        let root = m.root().unwrap();
        // Two chunks from the masked entry plus the spliced quoted
        // token, in input order.
        let kinds: Vec<u32> = m.tokens().children(root).map(|c| m.tokens()[c].rule()).collect();
        let chunk = def.rule_id("chunk").unwrap();
        let quoted = def.rule_id("quoted").unwrap();
        assert_eq!(kinds, vec![chunk, quoted, chunk]);
        let spans: Vec<Span> = m.tokens().children(root).map(|c| m.tokens()[c].span()).collect();
        assert_eq!(spans, vec![Span::new(0, 1), Span::new(1, 6), Span::new(7, 8)]);
    }

    #[test]
    fn invoke_reenters_on_a_restricted_range() {
        let mut inner = Builder::named("csv");
        let cell = inner.none_of(",");
        let cells = inner.repeat_min(1, cell);
        inner.define("cell", cells);
        let c = inner.refer("cell");
        let eoi = inner.eoi();
        let row = inner.glue(&[c, eoi]);
        inner.define("row", row);
        inner.entry("row");
        let inner = Arc::new(inner.link());

        let mut outer = Builder::named("wrap");
        outer.import(&inner, None);
        let open = outer.byte(b'[');
        let not_semi = outer.other(b';');
        let span = outer.repeat_min(1, not_semi);
        let sub = outer.invoke("csv::row", Some(span));
        let semi = outer.byte(b';');
        let seq = outer.glue(&[open, sub, semi]);
        outer.define("stmt", seq);
        outer.entry("stmt");
        let outer = outer.link();

        // The invoked grammar's end-of-input anchor lands at the
        // coverage boundary, not the real end of input.
        let m = outer.match_at(b"[abc;", 0).unwrap();
        assert_eq!(m.end(), 5);
        let root = m.root().unwrap();
        let row_token = m
            .tokens()
            .children(root)
            .find(|&c| m.tokens()[c].scope() == inner.id())
            .unwrap();
        // Sub-parse coordinates are shifted back into the outer input.
        assert_eq!(m.tokens()[row_token].span(), Span::new(1, 4));
    }

    #[test]
    fn imported_rules_are_referenced_by_qualified_name() {
        let mut numbers = Builder::named("num");
        let digit = numbers.range(b'0', b'9');
        let int = numbers.repeat_min(1, digit);
        numbers.define("int", int);
        numbers.entry("int");
        let numbers = Arc::new(numbers.link());

        let mut sums = Builder::named("sums");
        sums.import(&numbers, None);
        let lhs = sums.refer("num::int");
        let plus = sums.byte(b'+');
        let rhs = sums.refer("num::int");
        let sum = sums.glue(&[lhs, plus, rhs]);
        sums.define("sum", sum);
        sums.entry("sum");
        let sums = sums.link();

        let m = sums.match_at(b"12+34", 0).unwrap();
        assert_eq!(m.end(), 5);
        let root = m.root().unwrap();
        let scopes: Vec<u32> = m.tokens().children(root).map(|c| m.tokens()[c].scope()).collect();
        assert_eq!(scopes, vec![numbers.id(), numbers.id()]);
    }

    #[test]
    fn import_alias_renames_the_scope() {
        let mut inner = Builder::named("verylongname");
        let x = inner.byte(b'x');
        inner.define("x", x);
        inner.entry("x");
        let inner = Arc::new(inner.link());

        let mut outer = Builder::new();
        outer.import(&inner, Some("n"));
        let r = outer.refer("n::x");
        outer.define("top", r);
        outer.entry("top");
        let outer = outer.link();

        assert_eq!(end_of(outer.match_at(b"x", 0)), Some(1));
    }

    #[test]
    #[should_panic(expected = "cannot import an anonymous syntax definition")]
    fn anonymous_definitions_cannot_be_imported() {
        let mut anon = Builder::new();
        let x = anon.byte(b'x');
        anon.define("x", x);
        let anon = Arc::new(anon.link());

        let mut outer = Builder::new();
        outer.import(&anon, None);
    }

    #[test]
    #[should_panic(expected = "undefined rule 'nothing'")]
    fn linking_an_unresolved_rule_panics() {
        let mut b = Builder::new();
        let r = b.refer("nothing");
        b.define("top", r);
        b.entry("top");
        let _ = b.link();
    }

    #[test]
    #[should_panic(expected = "undefined scope 'ghost'")]
    fn linking_an_unresolved_scope_panics() {
        let mut b = Builder::new();
        let r = b.refer("ghost::rule");
        b.define("top", r);
        b.entry("top");
        let _ = b.link();
    }

    #[test]
    #[should_panic(expected = "redefinition of rule 'twice'")]
    fn redefining_a_rule_panics() {
        let mut b = Builder::new();
        let x = b.byte(b'x');
        b.define("twice", x);
        let y = b.byte(b'y');
        b.define("twice", y);
    }

    #[test]
    fn inline_references_generate_no_tokens() {
        let mut b = Builder::new();
        let digit = b.range(b'0', b'9');
        b.define("digit", digit);
        let visible = b.refer("digit");
        let hidden = b.inline("digit");
        let seq = b.glue(&[visible, hidden]);
        b.define("two", seq);
        b.entry("two");
        let def = b.link();

        let m = def.match_at(b"12", 0).unwrap();
        let root = m.root().unwrap();
        assert_eq!(m.tokens().count_children(root), 1);
    }

    #[test]
    fn find_at_scans_forward() {
        let mut b = Builder::new();
        let word = b.string("cat");
        b.define("cat", word);
        b.entry("cat");
        let def = b.link();

        let m = def.find_at(b"the cat", 0).unwrap();
        assert_eq!(m.start(), 4);
        assert_eq!(m.end(), 7);
        assert!(def.find_at(b"the dog", 0).is_err());
    }

    #[test]
    fn match_cancelable_stops_at_iteration_boundaries() {
        use std::sync::atomic::Ordering;

        let mut b = Builder::new();
        let x = b.byte(b'x');
        b.define("x", x);
        b.entry("x");
        let def = b.link();

        let cancel = Arc::new(AtomicBool::new(true));
        // A pre-cancelled match still runs nodes outside choice/glue
        // loops; a single terminal is unaffected.
        assert!(def.match_cancelable(b"x", 0, cancel.clone()).is_ok());
        cancel.store(true, Ordering::Relaxed);

        let mut b = Builder::new();
        let x = b.byte(b'x');
        let y = b.byte(b'y');
        let seq = b.glue(&[x, y]);
        b.define("xy", seq);
        b.entry("xy");
        let def = b.link();
        assert!(def.match_cancelable(b"xy", 0, cancel).is_err());
    }

    #[test]
    fn token_spans_nest_inside_parents() {
        let mut b = Builder::new();
        let digit = b.range(b'0', b'9');
        let int = b.repeat_min(1, digit);
        b.define("int", int);
        let lhs = b.refer("int");
        let plus = b.byte(b'+');
        let rhs = b.refer("int");
        let sum = b.glue(&[lhs, plus, rhs]);
        b.define("sum", sum);
        b.entry("sum");
        let def = b.link();

        let m = def.match_at(b"12+345", 0).unwrap();
        let root = m.root().unwrap();
        let tokens = m.tokens();
        assert_eq!(tokens[root].span(), Span::new(0, 6));
        let spans: Vec<Span> = tokens.children(root).map(|c| tokens[c].span()).collect();
        assert_eq!(spans, vec![Span::new(0, 2), Span::new(3, 6)]);
        for span in spans {
            assert!(tokens[root].span().contains(span));
        }
    }
}
