//! The two-stage pattern compiler.
//!
//! Stage one parses the pattern text with a bootstrap syntax definition
//! — itself expressed in the node algebra — into a token tree. Stage
//! two walks that tree and emits grammar nodes into a fresh builder,
//! which is linked into the final definition.
//!
//! The bootstrap grammar is built once per process and shared.

use once_cell::sync::Lazy;
use pegboard_base::Span;
use pegboard_syntax::{Builder, Definition, NodeId, TokenId, TokenTree};

use crate::error::PatternError;

/// Bytes that stand for themselves in a pattern; everything here needs
/// a backslash.
const SPECIAL: &str = "#*\\[](){}|^$";

/// The bootstrap definition plus the rule ids the tree walker
/// dispatches on.
struct PatternSyntax {
    def: Definition,
    any: u32,
    gap: u32,
    boi: u32,
    eoi: u32,
    ch: u32,
    range_min_max: u32,
    range_explicit: u32,
    min_repeat: u32,
    max_repeat: u32,
    repeat: u32,
    group: u32,
}

static PATTERN_SYNTAX: Lazy<PatternSyntax> = Lazy::new(PatternSyntax::new);

impl PatternSyntax {
    fn new() -> Self {
        let mut b = Builder::named("pattern");

        let c = b.byte(b'#');
        let any = b.define("Any", c);
        let c = b.byte(b'*');
        let gap = b.define("Gap", c);
        let c = b.byte(b'^');
        let boi = b.define("Boi", c);
        let c = b.byte(b'$');
        let eoi = b.define("Eoi", c);

        // A single pattern character: anything unreserved, or a
        // backslash escape. `\xHH` demands two hex digits; any other
        // escaped byte stands for itself.
        let plain = b.none_of(SPECIAL);
        let bslash = b.byte(b'\\');
        let x = b.byte(b'x');
        let dec = b.range(b'0', b'9');
        let lower = b.range(b'a', b'f');
        let upper = b.range(b'A', b'F');
        let hex_digit = b.choice(&[dec, lower, upper]);
        let two_hex = b.repeat_min_max(2, 2, hex_digit);
        let two_hex = b.expect("Illegal escape sequence", two_hex);
        let hex = b.glue(&[x, two_hex]);
        let verbatim = b.any();
        let escaped = b.choice(&[hex, verbatim]);
        let escape = b.glue(&[bslash, escaped]);
        let c = b.choice(&[plain, escape]);
        let ch = b.define("Char", c);

        // `[a..b]`, `[a..]`, `[..b]`, `[..]`, each with an optional
        // leading `^`.
        let open = b.byte(b'[');
        let caret = b.byte(b'^');
        let sign = b.repeat_min_max(0, 1, caret);
        let dots = b.string("..");
        let high = b.refer("Char");
        let open_low = b.glue(&[dots, high]);
        let low = b.refer("Char");
        let dots2 = b.string("..");
        let high2 = b.refer("Char");
        let closed = b.glue(&[low, dots2, high2]);
        let low2 = b.refer("Char");
        let dots3 = b.string("..");
        let open_high = b.glue(&[low2, dots3]);
        let forms = b.choice(&[open_low, closed, open_high]);
        let signed = b.glue(&[sign, forms]);
        let dots4 = b.string("..");
        let body = b.choice(&[signed, dots4]);
        let close = b.byte(b']');
        let c = b.glue(&[open, body, close]);
        let range_min_max = b.define("RangeMinMax", c);

        // `[abc]` / `[^abc]`.
        let open = b.byte(b'[');
        let caret = b.byte(b'^');
        let sign = b.repeat_min_max(0, 1, caret);
        let member = b.refer("Char");
        let members = b.repeat_min(1, member);
        let close = b.byte(b']');
        let close = b.expect("Unterminated character class", close);
        let c = b.glue(&[open, sign, members, close]);
        let range_explicit = b.define("RangeExplicit", c);

        let digit = b.range(b'0', b'9');
        let number = b.repeat_min_max(1, 20, digit);
        b.define_void("Number", number);
        let n = b.inline("Number");
        let min_repeat = b.define("MinRepeat", n);
        let n = b.inline("Number");
        let max_repeat = b.define("MaxRepeat", n);

        // `{min,max}` with optional bounds and a `?`/`~` modifier,
        // valid only straight after a quantifiable atom.
        let p1 = b.previous("Char");
        let p2 = b.previous("Any");
        let p3 = b.previous("RangeMinMax");
        let p4 = b.previous("RangeExplicit");
        let p5 = b.previous("Group");
        let after_atom = b.choice(&[p1, p2, p3, p4, p5]);
        let open = b.byte(b'{');
        let min = b.refer("MinRepeat");
        let min = b.repeat_min_max(0, 1, min);
        let comma = b.byte(b',');
        let max = b.refer("MaxRepeat");
        let max = b.repeat_min_max(0, 1, max);
        let bounds = b.glue(&[min, comma, max]);
        let bounds = b.repeat_min_max(0, 1, bounds);
        let modifier = b.one_of("~?");
        let modifier = b.repeat_min_max(0, 1, modifier);
        let close = b.byte(b'}');
        let close = b.hint("Unterminated repeat", close);
        let c = b.glue(&[after_atom, open, bounds, modifier, close]);
        let repeat = b.define("Repeat", c);

        let r = b.refer("Repeat");
        let c1 = b.refer("Char");
        let a = b.refer("Any");
        let g = b.refer("Gap");
        let rmm = b.refer("RangeMinMax");
        let rex = b.refer("RangeExplicit");
        let bo = b.refer("Boi");
        let eo = b.refer("Eoi");
        let gr = b.refer("Group");
        let atom = b.choice(&[r, c1, a, g, rmm, rex, bo, eo, gr]);
        let atoms = b.repeat(atom);
        b.define("Sequence", atoms);

        let open = b.byte(b'(');
        let inner = b.refer("Choice");
        let close = b.byte(b')');
        let close = b.expect("Unterminated group", close);
        let c = b.glue(&[open, inner, close]);
        let group = b.define("Group", c);

        let first = b.refer("Sequence");
        let bar = b.byte(b'|');
        let next = b.refer("Sequence");
        let more = b.glue(&[bar, next]);
        let more = b.repeat(more);
        let c = b.glue(&[first, more]);
        b.define("Choice", c);

        b.entry("Choice");
        let def = b.link();

        PatternSyntax {
            def,
            any,
            gap,
            boi,
            eoi,
            ch,
            range_min_max,
            range_explicit,
            min_repeat,
            max_repeat,
            repeat,
            group,
        }
    }
}

/// Compiles `text` into a linked definition whose entry rule accepts
/// exactly the pattern's language.
pub(crate) fn compile(text: &[u8]) -> Result<Definition, PatternError> {
    let ps = &*PATTERN_SYNTAX;
    match ps.def.match_at(text, 0) {
        Ok(m) if m.end() == text.len() => {
            let mut b = Builder::new();
            let root = m
                .root()
                .expect("bootstrap entry rule generates a token");
            let entry = compile_choice(text, m.tokens(), root, ps, &mut b);
            b.define("Expression", entry);
            b.entry("Expression");
            Ok(b.link())
        }
        Ok(m) => Err(syntax_error(m.state().hint(), m.end())),
        Err(failure) => Err(syntax_error(failure.hint(), 0)),
    }
}

fn syntax_error(hint: Option<(&str, usize)>, end: usize) -> PatternError {
    match hint {
        Some((message, offset)) => PatternError::new(message, offset),
        None => PatternError::new("Syntax error", end),
    }
}

fn compile_choice(
    text: &[u8],
    tokens: &TokenTree,
    token: TokenId,
    ps: &PatternSyntax,
    b: &mut Builder<'_>,
) -> NodeId {
    if tokens.count_children(token) == 1 {
        let only = tokens[token].first_child().expect("counted one child");
        return compile_sequence(text, tokens, only, ps, b);
    }
    let alternatives: Vec<NodeId> = tokens
        .children(token)
        .collect::<Vec<_>>()
        .into_iter()
        .map(|child| compile_sequence(text, tokens, child, ps, b))
        .collect();
    b.choice(&alternatives)
}

fn compile_sequence(
    text: &[u8],
    tokens: &TokenTree,
    token: TokenId,
    ps: &PatternSyntax,
    b: &mut Builder<'_>,
) -> NodeId {
    let mut items: Vec<NodeId> = Vec::new();
    let children: Vec<TokenId> = tokens.children(token).collect();
    for child in children {
        let rule = tokens[child].rule();
        if rule == ps.ch {
            let byte = read_char(text, tokens[child].span());
            items.push(b.byte(byte));
        } else if rule == ps.any {
            items.push(b.any());
        } else if rule == ps.gap {
            let any = b.any();
            items.push(b.greedy_repeat(any));
        } else if rule == ps.range_min_max {
            items.push(compile_range_min_max(text, tokens, child, b));
        } else if rule == ps.range_explicit {
            items.push(compile_range_explicit(text, tokens, child, b));
        } else if rule == ps.repeat {
            let atom = items.pop().expect("quantifier follows an atom");
            items.push(compile_repeat(text, tokens, child, ps, b, atom));
        } else if rule == ps.boi {
            items.push(b.boi());
        } else if rule == ps.eoi {
            items.push(b.eoi());
        } else if rule == ps.group {
            let inner = tokens[child].first_child().expect("group wraps a choice");
            items.push(compile_choice(text, tokens, inner, ps, b));
        }
    }
    b.glue(&items)
}

/// Decodes one pattern character token, resolving backslash escapes.
fn read_char(text: &[u8], span: Span) -> u8 {
    let bytes = span.slice(text);
    if bytes.len() == 1 {
        return bytes[0];
    }
    match bytes[1] {
        b'x' => hex_value(bytes[2]) * 16 + hex_value(bytes[3]),
        b'n' => b'\n',
        b'r' => b'\r',
        b't' => b'\t',
        b'f' => 0x0C,
        verbatim => verbatim,
    }
}

fn hex_value(byte: u8) -> u8 {
    match byte {
        b'0'..=b'9' => byte - b'0',
        b'a'..=b'f' => byte - b'a' + 10,
        _ => byte - b'A' + 10,
    }
}

fn compile_range_min_max(
    text: &[u8],
    tokens: &TokenTree,
    token: TokenId,
    b: &mut Builder<'_>,
) -> NodeId {
    let span = tokens[token].span();
    let invert = text[span.start + 1] == b'^';
    let children: Vec<TokenId> = tokens.children(token).collect();
    match children.as_slice() {
        [low, high] => {
            let low = read_char(text, tokens[*low].span());
            let high = read_char(text, tokens[*high].span());
            if invert {
                b.except(low, high)
            } else {
                b.range(low, high)
            }
        }
        [only] => {
            let byte = read_char(text, tokens[*only].span());
            // A bound right after the bracket is the low end (`[a..]`);
            // one after the dots is the high end (`[..b]`).
            let leading = tokens[*only].span().start - span.start <= 2;
            match (invert, leading) {
                (true, true) => b.below(byte),
                (true, false) => b.greater(byte),
                (false, true) => b.greater_or_equal(byte),
                (false, false) => b.below_or_equal(byte),
            }
        }
        _ => b.any(),
    }
}

fn compile_range_explicit(
    text: &[u8],
    tokens: &TokenTree,
    token: TokenId,
    b: &mut Builder<'_>,
) -> NodeId {
    let span = tokens[token].span();
    let invert = text[span.start + 1] == b'^';
    let members: Vec<u8> = tokens
        .children(token)
        .collect::<Vec<_>>()
        .into_iter()
        .map(|child| read_char(text, tokens[child].span()))
        .collect();
    if invert {
        b.none_of(&members)
    } else {
        b.one_of(&members)
    }
}

fn compile_repeat(
    text: &[u8],
    tokens: &TokenTree,
    token: TokenId,
    ps: &PatternSyntax,
    b: &mut Builder<'_>,
    atom: NodeId,
) -> NodeId {
    let mut min = 0usize;
    let mut max = usize::MAX;
    for child in tokens.children(token) {
        let rule = tokens[child].rule();
        let digits = tokens[child].span().slice(text);
        let value = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(usize::MAX);
        if rule == ps.min_repeat {
            min = value;
        } else if rule == ps.max_repeat {
            max = value;
        }
    }
    let span = tokens[token].span();
    match text[span.end - 2] {
        b'?' => b.lazy_repeat_min(min, atom),
        b'~' => b.repeat_min_max(min, max, atom),
        _ => b.greedy_repeat_min_max(min, max, atom),
    }
}
