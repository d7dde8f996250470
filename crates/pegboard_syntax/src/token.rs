//! Parse-tree tokens.
//!
//! A successful match produces a tree of [`Token`]s. Tokens live in a
//! [`TokenTree`] arena owned by the match [`State`](crate::State) and are
//! addressed by [`TokenId`]; parent, child and sibling relations are
//! explicit links between ids. A token records which rule produced it
//! (scope id plus rule id), the optional keyword recognized inside it,
//! and the [`Span`] of input it covered.
//!
//! Nodes that fail after having appended children restore their parent's
//! child list to the last-child anchor they saw on entry. Unlinked
//! tokens stay in the arena but become unreachable from the root.

use pegboard_base::Span;

/// Handle to a token inside a [`TokenTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(pub(crate) u32);

impl TokenId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the parse tree.
#[derive(Debug, Clone)]
pub struct Token {
    scope: u32,
    rule: u32,
    keyword: Option<u32>,
    span: Span,
    parent: Option<TokenId>,
    first_child: Option<TokenId>,
    last_child: Option<TokenId>,
    prev_sibling: Option<TokenId>,
    next_sibling: Option<TokenId>,
}

impl Token {
    /// Identity of the definition whose rule produced this token.
    pub fn scope(&self) -> u32 {
        self.scope
    }

    /// Id of the producing rule, unique within its scope.
    pub fn rule(&self) -> u32 {
        self.rule
    }

    /// Keyword recognized while matching this token, if any.
    pub fn keyword(&self) -> Option<u32> {
        self.keyword
    }

    /// The input region this token covered.
    pub fn span(&self) -> Span {
        self.span
    }

    pub fn parent(&self) -> Option<TokenId> {
        self.parent
    }

    pub fn first_child(&self) -> Option<TokenId> {
        self.first_child
    }

    pub fn last_child(&self) -> Option<TokenId> {
        self.last_child
    }

    pub fn prev_sibling(&self) -> Option<TokenId> {
        self.prev_sibling
    }

    pub fn next_sibling(&self) -> Option<TokenId> {
        self.next_sibling
    }
}

/// Arena of tokens produced during one match.
///
/// The tree only ever grows; rollback unlinks tokens without reclaiming
/// their slots, so ids handed out earlier stay valid for the lifetime of
/// the tree.
#[derive(Debug, Default)]
pub struct TokenTree {
    slots: Vec<Token>,
}

impl TokenTree {
    pub fn new() -> Self {
        TokenTree { slots: Vec::new() }
    }

    /// Number of token slots allocated so far, including unlinked ones.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: TokenId) -> &Token {
        &self.slots[id.index()]
    }

    /// Iterates over the children of `id` in input order.
    pub fn children(&self, id: TokenId) -> Children<'_> {
        Children {
            tree: self,
            next: self.get(id).first_child,
        }
    }

    pub fn count_children(&self, id: TokenId) -> usize {
        self.children(id).count()
    }

    /// Allocates a token and appends it as the last child of `parent`.
    pub(crate) fn push(
        &mut self,
        scope: u32,
        rule: u32,
        parent: Option<TokenId>,
        start: usize,
    ) -> TokenId {
        let id = TokenId(self.slots.len() as u32);
        let prev = parent.and_then(|p| self.get(p).last_child);
        self.slots.push(Token {
            scope,
            rule,
            keyword: None,
            span: Span::new(start, start),
            parent,
            first_child: None,
            last_child: None,
            prev_sibling: prev,
            next_sibling: None,
        });
        if let Some(p) = parent {
            if let Some(prev) = prev {
                self.slots[prev.index()].next_sibling = Some(id);
            } else {
                self.slots[p.index()].first_child = Some(id);
            }
            self.slots[p.index()].last_child = Some(id);
        }
        id
    }

    pub(crate) fn close(&mut self, id: TokenId, end: usize) {
        self.slots[id.index()].span.end = end;
    }

    pub(crate) fn set_keyword(&mut self, id: TokenId, keyword: u32) {
        self.slots[id.index()].keyword = Some(keyword);
    }

    /// The rollback anchor: `parent`'s last child at the time of the call.
    pub(crate) fn last_child_of(&self, parent: Option<TokenId>) -> Option<TokenId> {
        parent.and_then(|p| self.get(p).last_child)
    }

    /// Restores `parent`'s child list to the `anchor` recorded earlier.
    ///
    /// Every child appended after the anchor becomes unreachable. A
    /// `None` parent is a no-op; a `None` anchor clears the child list.
    pub(crate) fn rollback(&mut self, parent: Option<TokenId>, anchor: Option<TokenId>) {
        let Some(p) = parent else { return };
        match anchor {
            Some(a) => {
                if self.slots[p.index()].last_child != Some(a) {
                    self.slots[a.index()].next_sibling = None;
                    self.slots[p.index()].last_child = Some(a);
                }
            }
            None => {
                self.slots[p.index()].first_child = None;
                self.slots[p.index()].last_child = None;
            }
        }
    }

    /// Collects the children of `parent` that follow `anchor`, in order.
    pub(crate) fn collect_after(
        &self,
        parent: Option<TokenId>,
        anchor: Option<TokenId>,
    ) -> Vec<TokenId> {
        let Some(p) = parent else { return Vec::new() };
        let mut out = Vec::new();
        let mut at = match anchor {
            Some(a) => self.get(a).next_sibling,
            None => self.get(p).first_child,
        };
        while let Some(id) = at {
            out.push(id);
            at = self.get(id).next_sibling;
        }
        out
    }

    /// Unlinks `id`, the current last child of `parent`.
    pub(crate) fn unlink_last(&mut self, parent: Option<TokenId>, id: TokenId) {
        let Some(p) = parent else { return };
        debug_assert_eq!(self.slots[p.index()].last_child, Some(id));
        let prev = self.slots[id.index()].prev_sibling;
        match prev {
            Some(prev) => self.slots[prev.index()].next_sibling = None,
            None => self.slots[p.index()].first_child = None,
        }
        self.slots[p.index()].last_child = prev;
    }

    /// Links the detached token `id` back in as a child of `parent`,
    /// directly after the sibling `after`.
    pub(crate) fn insert_after(&mut self, parent: TokenId, id: TokenId, after: TokenId) {
        let next = self.slots[after.index()].next_sibling;
        self.slots[id.index()].parent = Some(parent);
        self.slots[id.index()].prev_sibling = Some(after);
        self.slots[id.index()].next_sibling = next;
        self.slots[after.index()].next_sibling = Some(id);
        match next {
            Some(n) => self.slots[n.index()].prev_sibling = Some(id),
            None => self.slots[parent.index()].last_child = Some(id),
        }
    }

    /// Watermark for [`shift_from`](Self::shift_from).
    pub(crate) fn next_index(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Translates the spans of every token allocated at or after `mark`.
    ///
    /// Maps the tokens of a sub-parse back into the coordinates of the
    /// enclosing input.
    pub(crate) fn shift_from(&mut self, mark: u32, delta: usize) {
        for token in &mut self.slots[mark as usize..] {
            token.span = token.span.shifted(delta);
        }
    }
}

impl std::ops::Index<TokenId> for TokenTree {
    type Output = Token;

    fn index(&self, id: TokenId) -> &Token {
        self.get(id)
    }
}

/// Iterator over a token's children.
pub struct Children<'t> {
    tree: &'t TokenTree,
    next: Option<TokenId>,
}

impl<'t> Iterator for Children<'t> {
    type Item = TokenId;

    fn next(&mut self) -> Option<TokenId> {
        let id = self.next?;
        self.next = self.tree.get(id).next_sibling;
        Some(id)
    }
}
