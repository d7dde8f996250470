//! Grammar observation and pretty-printing.
//!
//! A [`NodeObserver`] installed with [`Builder::observed`] receives
//! every freshly constructed grammar node together with its node-type
//! name, and may substitute a wrapper (see
//! [`NodeArena::wrap_trace`]). Observation is structural only: match
//! semantics are identical with or without an observer.
//!
//! The shipped [`SyntaxDebugger`] records what was built and renders a
//! linked definition back into builder calls, reverse-mapping flag,
//! capture and rule ids to their names and flagging rules that are
//! unreachable from the entry rule.

use std::fmt::Write;

use crate::definition::Definition;
use crate::node::{LinkTarget, NodeArena, NodeId, NodeKind, ScopeRef};

/// Hook over grammar-node construction.
pub trait NodeObserver {
    /// Called for every node the builder constructs. The returned id is
    /// what the surrounding grammar sees; return `id` unchanged, or a
    /// wrapper produced with [`NodeArena::wrap_trace`].
    fn node_built(&mut self, nodes: &mut NodeArena, id: NodeId, variant: &'static str) -> NodeId;
}

/// Records construction order and node-type names; renders definitions.
#[derive(Default)]
pub struct SyntaxDebugger {
    produced: Vec<(NodeId, &'static str)>,
}

impl NodeObserver for SyntaxDebugger {
    fn node_built(&mut self, _nodes: &mut NodeArena, id: NodeId, variant: &'static str) -> NodeId {
        self.produced.push((id, variant));
        id
    }
}

impl SyntaxDebugger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes observed so far.
    pub fn produced_count(&self) -> usize {
        self.produced.len()
    }

    /// Construction counts per node type, in first-seen order.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for &(_, variant) in &self.produced {
            match counts.iter_mut().find(|(name, _)| *name == variant) {
                Some((_, n)) => *n += 1,
                None => counts.push((variant, 1)),
            }
        }
        counts
    }

    /// Renders `def` as the sequence of builder calls that would
    /// reproduce it. With `omit_unused`, rules unreachable from the
    /// entry rule are skipped.
    pub fn print_definition(def: &Definition, omit_unused: bool) -> String {
        let mut out = String::new();
        let in_use = rules_in_use(def);

        if let Some(name) = def.name() {
            let _ = writeln!(out, "syntax(\"{name}\")");
            let _ = writeln!(out);
        }
        for rule in 0..def.rule_count() as u32 {
            if omit_unused && !in_use[rule as usize] {
                continue;
            }
            let data = def.rule(rule);
            let verb = if data.generate { "define" } else { "define_void" };
            let _ = writeln!(out, "{verb}(\"{}\",", data.name);
            let mut line = String::new();
            write_node(def, &mut line, data.entry, 1);
            let _ = writeln!(out, "    {line},");
            let _ = writeln!(out, ")");
            let _ = writeln!(out);
        }
        if let Some((scope, rule)) = def.entry_rule() {
            let _ = writeln!(out, "entry(\"{}\")", qualified_name(def, scope, rule));
        }
        out
    }
}

/// Which rules are reachable from the entry rule through local
/// references. Indexed by rule id.
pub fn rules_in_use(def: &Definition) -> Vec<bool> {
    let mut used = vec![false; def.rule_count()];
    let mut queue: Vec<u32> = Vec::new();
    if let Some((ScopeRef::Local, rule)) = def.entry_rule() {
        used[rule as usize] = true;
        queue.push(rule);
    }
    while let Some(rule) = queue.pop() {
        let mut nodes = vec![def.rule(rule).entry];
        while let Some(id) = nodes.pop() {
            let kind = &def.nodes().get(id).kind;
            nodes.extend(kind.child_list());
            if let NodeKind::Ref { target, .. }
            | NodeKind::Invoke { target, .. }
            | NodeKind::Previous { target, .. }
            | NodeKind::Context { target, .. } = kind
            {
                if let LinkTarget::Resolved {
                    scope: ScopeRef::Local,
                    rule,
                } = target
                {
                    if !used[*rule as usize] {
                        used[*rule as usize] = true;
                        queue.push(*rule);
                    }
                }
            }
        }
    }
    used
}

fn indent_str(level: usize) -> String {
    "    ".repeat(level)
}

fn fmt_byte(byte: u8) -> String {
    match byte {
        b'\n' => "'\\n'".to_owned(),
        b'\r' => "'\\r'".to_owned(),
        b'\t' => "'\\t'".to_owned(),
        b'\'' => "'\\''".to_owned(),
        b'\\' => "'\\\\'".to_owned(),
        0x20..=0x7E => format!("'{}'", byte as char),
        _ => format!("'\\x{byte:02x}'"),
    }
}

fn fmt_bytes(bytes: &[u8]) -> String {
    let mut out = String::from("\"");
    for &byte in bytes {
        match byte {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\x{byte:02x}");
            }
        }
    }
    out.push('"');
    out
}

fn fmt_count(count: usize) -> String {
    if count == usize::MAX {
        "usize::MAX".to_owned()
    } else {
        count.to_string()
    }
}

/// The reference name a node would be rebuilt with, qualified by the
/// importing alias when the rule lives in another scope.
fn qualified_name(def: &Definition, scope: &ScopeRef, rule: u32) -> String {
    match scope {
        ScopeRef::Local => def.rule_name(rule).to_owned(),
        ScopeRef::Imported(target) => {
            let alias = def
                .scopes
                .iter()
                .find(|(_, scope)| scope.id() == target.id())
                .map(|(alias, _)| alias.as_str())
                .or_else(|| target.name())
                .unwrap_or("?");
            format!("{alias}::{}", target.rule_name(rule))
        }
    }
}

fn target_name(def: &Definition, target: &LinkTarget) -> String {
    match target {
        LinkTarget::Pending(name) => name.clone(),
        LinkTarget::Resolved { scope, rule } => qualified_name(def, scope, *rule),
    }
}

fn name_of(names: &rustc_hash::FxHashMap<String, u32>, id: u32) -> String {
    names
        .iter()
        .find(|(_, &slot)| slot == id)
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn is_leaf(def: &Definition, id: NodeId) -> bool {
    def.nodes().get(id).kind.child_list().is_empty()
}

/// Writes `head(child, ...)` on one line for a single leaf child, or
/// spread over indented lines otherwise.
fn write_wrapped(def: &Definition, out: &mut String, head: &str, children: &[NodeId], level: usize) {
    let compact = children.len() <= 1 && children.iter().all(|&c| is_leaf(def, c));
    out.push_str(head);
    out.push('(');
    if compact {
        for &child in children {
            write_node(def, out, child, level);
        }
        out.push(')');
    } else {
        for &child in children {
            out.push('\n');
            out.push_str(&indent_str(level + 1));
            write_node(def, out, child, level + 1);
            out.push(',');
        }
        out.push('\n');
        out.push_str(&indent_str(level));
        out.push(')');
    }
}

fn write_node(def: &Definition, out: &mut String, id: NodeId, level: usize) {
    match &def.nodes().get(id).kind {
        NodeKind::Byte { ch, invert } => {
            let verb = if *invert { "other" } else { "byte" };
            let _ = write!(out, "{verb}({})", fmt_byte(*ch));
        }
        NodeKind::Greater { ch, invert } => {
            let verb = if *invert { "below" } else { "greater" };
            let _ = write!(out, "{verb}({})", fmt_byte(*ch));
        }
        NodeKind::GreaterOrEqual { ch, invert } => {
            let verb = if *invert {
                "below_or_equal"
            } else {
                "greater_or_equal"
            };
            let _ = write!(out, "{verb}({})", fmt_byte(*ch));
        }
        NodeKind::Any => out.push_str("any()"),
        NodeKind::RangeMinMax { a, b, invert } => {
            let verb = if *invert { "except" } else { "range" };
            let _ = write!(out, "{verb}({}, {})", fmt_byte(*a), fmt_byte(*b));
        }
        NodeKind::RangeExplicit { set, invert } => {
            let verb = if *invert { "none_of" } else { "one_of" };
            let _ = write!(out, "{verb}({})", fmt_bytes(set));
        }
        NodeKind::Literal { text, .. } => {
            let _ = write!(out, "string({})", fmt_bytes(text));
        }
        NodeKind::Keyword { words, .. } => {
            let _ = write!(out, "keywords(\"{words}\")");
        }
        NodeKind::Boi => out.push_str("boi()"),
        NodeKind::Eoi => out.push_str("eoi()"),
        NodeKind::Pass { invert } => {
            out.push_str(if *invert { "fail()" } else { "pass()" });
        }
        NodeKind::Repeat { min, max, entry } => {
            let head = match (*min, *max) {
                (0, usize::MAX) => "repeat".to_owned(),
                (min, usize::MAX) => format!("repeat_min({min}"),
                (min, max) => format!("repeat_min_max({min}, {max}"),
            };
            write_counted(def, out, &head, *entry, level);
        }
        NodeKind::LazyRepeat { min, entry } => {
            let head = match *min {
                0 => "lazy_repeat".to_owned(),
                min => format!("lazy_repeat_min({min}"),
            };
            write_counted(def, out, &head, *entry, level);
        }
        NodeKind::GreedyRepeat { min, max, entry } => {
            let head = match (*min, *max) {
                (0, usize::MAX) => "greedy_repeat".to_owned(),
                (min, usize::MAX) => format!("greedy_repeat_min({min}"),
                (min, max) => format!("greedy_repeat_min_max({min}, {max}"),
            };
            write_counted(def, out, &head, *entry, level);
        }
        NodeKind::Length { min, max, entry } => {
            let head = format!("length({}, {}", min, fmt_count(*max));
            write_counted(def, out, &head, *entry, level);
        }
        NodeKind::Choice { children } => {
            write_wrapped(def, out, "choice", children, level);
        }
        NodeKind::LazyChoice { children } => {
            write_wrapped(def, out, "lazy_choice", children, level);
        }
        NodeKind::Glue { children } => {
            write_wrapped(def, out, "glue", children, level);
        }
        NodeKind::Filter {
            filter,
            blank,
            entry,
        } => {
            out.push_str("filter(\n");
            out.push_str(&indent_str(level + 1));
            write_node(def, out, *filter, level + 1);
            let _ = write!(out, ",\n{}{},\n", indent_str(level + 1), fmt_byte(*blank));
            out.push_str(&indent_str(level + 1));
            write_node(def, out, *entry, level + 1);
            let _ = write!(out, ",\n{})", indent_str(level));
        }
        NodeKind::Find { entry } => write_wrapped(def, out, "find", &[*entry], level),
        NodeKind::Ahead { entry, invert } => {
            let verb = if *invert { "not" } else { "ahead" };
            write_wrapped(def, out, verb, &[*entry], level);
        }
        NodeKind::Behind { entry, invert, .. } => {
            let verb = if *invert { "not_behind" } else { "behind" };
            write_wrapped(def, out, verb, &[*entry], level);
        }
        NodeKind::Hint {
            message,
            entry,
            strict,
        } => {
            let verb = if *strict { "expect" } else { "hint" };
            let head = format!("{verb}(\"{message}\"");
            write_counted(def, out, &head, *entry, level);
        }
        NodeKind::Call { .. } => out.push_str("call(..)"),
        NodeKind::SetFlag { flag, value, .. } => {
            let _ = write!(out, "set(\"{}\", {value})", name_of(def.flag_names(), *flag));
        }
        NodeKind::IfFlag {
            flag,
            true_branch,
            false_branch,
            ..
        } => {
            let head = format!("if_flag(\"{}\"", name_of(def.flag_names(), *flag));
            out.push_str(&head);
            out.push_str(",\n");
            out.push_str(&indent_str(level + 1));
            write_node(def, out, *true_branch, level + 1);
            out.push_str(",\n");
            out.push_str(&indent_str(level + 1));
            write_node(def, out, *false_branch, level + 1);
            let _ = write!(out, ",\n{})", indent_str(level));
        }
        NodeKind::Capture { slot, coverage, .. } => {
            let head = format!("capture(\"{}\"", name_of(def.capture_names(), *slot));
            write_counted(def, out, &head, *coverage, level);
        }
        NodeKind::Replay { slot, .. } => {
            let _ = write!(out, "replay(\"{}\")", name_of(def.capture_names(), *slot));
        }
        NodeKind::Ref { target, generate } => {
            let verb = if *generate { "refer" } else { "inline" };
            let _ = write!(out, "{verb}(\"{}\")", target_name(def, target));
        }
        NodeKind::Invoke { target, coverage } => {
            let name = format!("invoke(\"{}\"", target_name(def, target));
            match coverage {
                Some(coverage) => write_counted(def, out, &name, *coverage, level),
                None => {
                    let _ = write!(out, "{name})");
                }
            }
        }
        NodeKind::Previous {
            target,
            keyword_name,
            ..
        } => match keyword_name {
            Some(keyword) => {
                let _ = write!(
                    out,
                    "previous_keyword(\"{}\", \"{keyword}\")",
                    target_name(def, target)
                );
            }
            None => {
                let _ = write!(out, "previous(\"{}\")", target_name(def, target));
            }
        },
        NodeKind::Context {
            target,
            in_context,
            out_of_context,
        } => {
            let _ = write!(out, "context(\"{}\"", target_name(def, target));
            out.push_str(",\n");
            out.push_str(&indent_str(level + 1));
            write_node(def, out, *in_context, level + 1);
            out.push_str(",\n");
            out.push_str(&indent_str(level + 1));
            write_node(def, out, *out_of_context, level + 1);
            let _ = write!(out, ",\n{})", indent_str(level));
        }
        NodeKind::Trace { entry, .. } => write_node(def, out, *entry, level),
    }
}

/// Writes `head, <entry>)` — the tail of a call whose head already
/// carries its scalar arguments.
fn write_counted(def: &Definition, out: &mut String, head: &str, entry: NodeId, level: usize) {
    out.push_str(head);
    if head.contains('(') {
        out.push_str(", ");
    } else {
        out.push('(');
    }
    if is_leaf(def, entry) {
        write_node(def, out, entry, level);
        out.push(')');
    } else {
        out.push('\n');
        out.push_str(&indent_str(level + 1));
        write_node(def, out, entry, level + 1);
        out.push_str(",\n");
        out.push_str(&indent_str(level));
        out.push(')');
    }
}
