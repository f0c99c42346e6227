//! Arena-backed syntax tree.
//!
//! Nodes live in a flat `Vec` and reference each other through stable
//! `NodeId` indices, so parent links are plain indices instead of owning
//! cycles. Parent links are derived state: they are recomputed by
//! [`Tree::connect`] and are only meaningful after the most recent connect
//! over the current root list. Detached subtrees (after a replace or remove)
//! simply become unreachable; the arena never frees nodes within a run.

use crate::span::Span;

/// Index of a node in a [`Tree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `// ...`
    Line,
    /// `# ...`
    Hash,
    /// `/* ... */`
    Block,
}

/// Comment trivia attached to the node that follows it in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    pub style: CommentStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Equal,
    NotEqual,
    Identical,
    NotIdentical,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Coalesce,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    Include,
    IncludeOnce,
    Require,
    RequireOnce,
}

impl IncludeKind {
    pub fn is_once(self) -> bool {
        matches!(self, IncludeKind::IncludeOnce | IncludeKind::RequireOnce)
    }
}

/// Call target: a statically known name, or an arbitrary expression
/// (`$f(...)`) whose effects cannot be proven.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Named(String),
    Dynamic(NodeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<NodeId>,
    pub by_ref: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: String,
    pub default: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseIf {
    pub cond: NodeId,
    pub body: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// `None` for the `default:` arm.
    pub test: Option<NodeId>,
    pub body: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub types: Vec<String>,
    pub var: Option<String>,
    pub body: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayItem {
    pub key: Option<NodeId>,
    pub value: NodeId,
}

/// Tagged union over statement and expression kinds.
///
/// Bodies of control statements are always `Block` nodes so child
/// enumeration stays uniform.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------
    Block(Vec<NodeId>),
    ExprStmt(NodeId),
    Echo(Vec<NodeId>),
    If {
        cond: NodeId,
        then_branch: NodeId,
        elseifs: Vec<ElseIf>,
        else_branch: Option<NodeId>,
    },
    While {
        cond: NodeId,
        body: NodeId,
    },
    For {
        init: Vec<NodeId>,
        cond: Vec<NodeId>,
        step: Vec<NodeId>,
        body: NodeId,
    },
    Foreach {
        subject: NodeId,
        key_var: Option<String>,
        value_var: String,
        by_ref: bool,
        body: NodeId,
    },
    Switch {
        subject: NodeId,
        cases: Vec<SwitchCase>,
    },
    Break(Option<i64>),
    Continue(Option<i64>),
    Return(Option<NodeId>),
    Global(Vec<String>),
    ConstDecl {
        name: String,
        value: NodeId,
    },
    FunctionDecl {
        name: String,
        params: Vec<Param>,
        body: NodeId,
    },
    ClassDecl {
        name: String,
        parent: Option<String>,
        properties: Vec<PropertyDef>,
        /// `FunctionDecl` nodes.
        methods: Vec<NodeId>,
    },
    Try {
        body: NodeId,
        catches: Vec<CatchClause>,
        finally: Option<NodeId>,
    },
    Throw(NodeId),
    /// Blank-line separator injected by the grouping pass.
    Separator,

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------
    Variable(String),
    Lit(Literal),
    /// Double-quoted string with `$var` interpolation; parts are
    /// `Lit(String)` and `Variable` nodes.
    Interp(Vec<NodeId>),
    ArrayLit(Vec<ArrayItem>),
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Assign {
        op: AssignOp,
        target: NodeId,
        value: NodeId,
    },
    Ternary {
        cond: NodeId,
        /// `None` for the short form `a ?: b`.
        then_branch: Option<NodeId>,
        else_branch: NodeId,
    },
    Call {
        callee: Callee,
        args: Vec<NodeId>,
    },
    MethodCall {
        object: NodeId,
        method: String,
        args: Vec<NodeId>,
    },
    StaticCall {
        class: String,
        method: String,
        args: Vec<NodeId>,
    },
    New {
        class: String,
        args: Vec<NodeId>,
    },
    PropertyFetch {
        object: NodeId,
        property: String,
    },
    Index {
        array: NodeId,
        /// `None` for the append form `$a[] = ...`.
        index: Option<NodeId>,
    },
    Isset(Vec<NodeId>),
    Empty(NodeId),
    Include {
        kind: IncludeKind,
        path: NodeId,
    },
    Exit(Option<NodeId>),
    ConstFetch(String),
    MagicDir,

    /// Transient placeholder while a node's kind is temporarily taken out
    /// during traversal. Never observable between passes.
    Detached,
}

impl NodeKind {
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            NodeKind::Block(_)
                | NodeKind::ExprStmt(_)
                | NodeKind::Echo(_)
                | NodeKind::If { .. }
                | NodeKind::While { .. }
                | NodeKind::For { .. }
                | NodeKind::Foreach { .. }
                | NodeKind::Switch { .. }
                | NodeKind::Break(_)
                | NodeKind::Continue(_)
                | NodeKind::Return(_)
                | NodeKind::Global(_)
                | NodeKind::ConstDecl { .. }
                | NodeKind::FunctionDecl { .. }
                | NodeKind::ClassDecl { .. }
                | NodeKind::Try { .. }
                | NodeKind::Throw(_)
                | NodeKind::Separator
        )
    }

    /// Stable name used in dependency-graph keys and logs.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Block(_) => "block",
            NodeKind::ExprStmt(_) => "expr_stmt",
            NodeKind::Echo(_) => "echo",
            NodeKind::If { .. } => "if",
            NodeKind::While { .. } => "while",
            NodeKind::For { .. } => "for",
            NodeKind::Foreach { .. } => "foreach",
            NodeKind::Switch { .. } => "switch",
            NodeKind::Break(_) => "break",
            NodeKind::Continue(_) => "continue",
            NodeKind::Return(_) => "return",
            NodeKind::Global(_) => "global",
            NodeKind::ConstDecl { .. } => "const_decl",
            NodeKind::FunctionDecl { .. } => "function_decl",
            NodeKind::ClassDecl { .. } => "class_decl",
            NodeKind::Try { .. } => "try",
            NodeKind::Throw(_) => "throw",
            NodeKind::Separator => "separator",
            NodeKind::Variable(_) => "variable",
            NodeKind::Lit(_) => "literal",
            NodeKind::Interp(_) => "interp_string",
            NodeKind::ArrayLit(_) => "array",
            NodeKind::Binary { .. } => "binary",
            NodeKind::Unary { .. } => "unary",
            NodeKind::Assign { .. } => "assign",
            NodeKind::Ternary { .. } => "ternary",
            NodeKind::Call { .. } => "call",
            NodeKind::MethodCall { .. } => "method_call",
            NodeKind::StaticCall { .. } => "static_call",
            NodeKind::New { .. } => "new",
            NodeKind::PropertyFetch { .. } => "property_fetch",
            NodeKind::Index { .. } => "index",
            NodeKind::Isset(_) => "isset",
            NodeKind::Empty(_) => "empty",
            NodeKind::Include { .. } => "include",
            NodeKind::Exit(_) => "exit",
            NodeKind::ConstFetch(_) => "const_fetch",
            NodeKind::MagicDir => "magic_dir",
            NodeKind::Detached => "detached",
        }
    }

    /// Child ids in source order.
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.for_each_child(|id| out.push(id));
        out
    }

    pub fn for_each_child(&self, mut f: impl FnMut(NodeId)) {
        match self {
            NodeKind::Block(stmts) | NodeKind::Echo(stmts) | NodeKind::Isset(stmts) => {
                for &id in stmts {
                    f(id);
                }
            }
            NodeKind::ExprStmt(e) | NodeKind::Throw(e) | NodeKind::Empty(e) => f(*e),
            NodeKind::If {
                cond,
                then_branch,
                elseifs,
                else_branch,
            } => {
                f(*cond);
                f(*then_branch);
                for ei in elseifs {
                    f(ei.cond);
                    f(ei.body);
                }
                if let Some(e) = else_branch {
                    f(*e);
                }
            }
            NodeKind::While { cond, body } => {
                f(*cond);
                f(*body);
            }
            NodeKind::For {
                init,
                cond,
                step,
                body,
            } => {
                for &id in init.iter().chain(cond).chain(step) {
                    f(id);
                }
                f(*body);
            }
            NodeKind::Foreach { subject, body, .. } => {
                f(*subject);
                f(*body);
            }
            NodeKind::Switch { subject, cases } => {
                f(*subject);
                for case in cases {
                    if let Some(t) = case.test {
                        f(t);
                    }
                    for &id in &case.body {
                        f(id);
                    }
                }
            }
            NodeKind::Return(value) | NodeKind::Exit(value) => {
                if let Some(v) = value {
                    f(*v);
                }
            }
            NodeKind::ConstDecl { value, .. } => f(*value),
            NodeKind::FunctionDecl { params, body, .. } => {
                for p in params {
                    if let Some(d) = p.default {
                        f(d);
                    }
                }
                f(*body);
            }
            NodeKind::ClassDecl {
                properties,
                methods,
                ..
            } => {
                for p in properties {
                    if let Some(d) = p.default {
                        f(d);
                    }
                }
                for &m in methods {
                    f(m);
                }
            }
            NodeKind::Try {
                body,
                catches,
                finally,
            } => {
                f(*body);
                for c in catches {
                    f(c.body);
                }
                if let Some(fin) = finally {
                    f(*fin);
                }
            }
            NodeKind::Interp(parts) => {
                for &id in parts {
                    f(id);
                }
            }
            NodeKind::ArrayLit(items) => {
                for item in items {
                    if let Some(k) = item.key {
                        f(k);
                    }
                    f(item.value);
                }
            }
            NodeKind::Binary { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            NodeKind::Unary { operand, .. } => f(*operand),
            NodeKind::Assign { target, value, .. } => {
                f(*target);
                f(*value);
            }
            NodeKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                f(*cond);
                if let Some(t) = then_branch {
                    f(*t);
                }
                f(*else_branch);
            }
            NodeKind::Call { callee, args } => {
                if let Callee::Dynamic(e) = callee {
                    f(*e);
                }
                for &a in args {
                    f(a);
                }
            }
            NodeKind::MethodCall { object, args, .. } => {
                f(*object);
                for &a in args {
                    f(a);
                }
            }
            NodeKind::StaticCall { args, .. } | NodeKind::New { args, .. } => {
                for &a in args {
                    f(a);
                }
            }
            NodeKind::PropertyFetch { object, .. } => f(*object),
            NodeKind::Index { array, index } => {
                f(*array);
                if let Some(i) = index {
                    f(*i);
                }
            }
            NodeKind::Include { path, .. } => f(*path),
            NodeKind::Break(_)
            | NodeKind::Continue(_)
            | NodeKind::Global(_)
            | NodeKind::Separator
            | NodeKind::Variable(_)
            | NodeKind::Lit(_)
            | NodeKind::ConstFetch(_)
            | NodeKind::MagicDir
            | NodeKind::Detached => {}
        }
    }

    /// Clone this kind with every embedded child id rewritten through `f`.
    pub fn map_children(&self, mut f: impl FnMut(NodeId) -> NodeId) -> NodeKind {
        let map_vec = |ids: &Vec<NodeId>, f: &mut dyn FnMut(NodeId) -> NodeId| {
            ids.iter().map(|&id| f(id)).collect::<Vec<_>>()
        };
        match self {
            NodeKind::Block(stmts) => NodeKind::Block(map_vec(stmts, &mut f)),
            NodeKind::Echo(args) => NodeKind::Echo(map_vec(args, &mut f)),
            NodeKind::Isset(args) => NodeKind::Isset(map_vec(args, &mut f)),
            NodeKind::ExprStmt(e) => NodeKind::ExprStmt(f(*e)),
            NodeKind::Throw(e) => NodeKind::Throw(f(*e)),
            NodeKind::Empty(e) => NodeKind::Empty(f(*e)),
            NodeKind::If {
                cond,
                then_branch,
                elseifs,
                else_branch,
            } => NodeKind::If {
                cond: f(*cond),
                then_branch: f(*then_branch),
                elseifs: elseifs
                    .iter()
                    .map(|ei| ElseIf {
                        cond: f(ei.cond),
                        body: f(ei.body),
                    })
                    .collect(),
                else_branch: else_branch.map(&mut f),
            },
            NodeKind::While { cond, body } => NodeKind::While {
                cond: f(*cond),
                body: f(*body),
            },
            NodeKind::For {
                init,
                cond,
                step,
                body,
            } => NodeKind::For {
                init: map_vec(init, &mut f),
                cond: map_vec(cond, &mut f),
                step: map_vec(step, &mut f),
                body: f(*body),
            },
            NodeKind::Foreach {
                subject,
                key_var,
                value_var,
                by_ref,
                body,
            } => NodeKind::Foreach {
                subject: f(*subject),
                key_var: key_var.clone(),
                value_var: value_var.clone(),
                by_ref: *by_ref,
                body: f(*body),
            },
            NodeKind::Switch { subject, cases } => NodeKind::Switch {
                subject: f(*subject),
                cases: cases
                    .iter()
                    .map(|c| SwitchCase {
                        test: c.test.map(&mut f),
                        body: map_vec(&c.body, &mut f),
                    })
                    .collect(),
            },
            NodeKind::Return(v) => NodeKind::Return(v.map(&mut f)),
            NodeKind::Exit(v) => NodeKind::Exit(v.map(&mut f)),
            NodeKind::ConstDecl { name, value } => NodeKind::ConstDecl {
                name: name.clone(),
                value: f(*value),
            },
            NodeKind::FunctionDecl { name, params, body } => NodeKind::FunctionDecl {
                name: name.clone(),
                params: params
                    .iter()
                    .map(|p| Param {
                        name: p.name.clone(),
                        default: p.default.map(&mut f),
                        by_ref: p.by_ref,
                    })
                    .collect(),
                body: f(*body),
            },
            NodeKind::ClassDecl {
                name,
                parent,
                properties,
                methods,
            } => NodeKind::ClassDecl {
                name: name.clone(),
                parent: parent.clone(),
                properties: properties
                    .iter()
                    .map(|p| PropertyDef {
                        name: p.name.clone(),
                        default: p.default.map(&mut f),
                    })
                    .collect(),
                methods: map_vec(methods, &mut f),
            },
            NodeKind::Try {
                body,
                catches,
                finally,
            } => NodeKind::Try {
                body: f(*body),
                catches: catches
                    .iter()
                    .map(|c| CatchClause {
                        types: c.types.clone(),
                        var: c.var.clone(),
                        body: f(c.body),
                    })
                    .collect(),
                finally: finally.map(&mut f),
            },
            NodeKind::Interp(parts) => NodeKind::Interp(map_vec(parts, &mut f)),
            NodeKind::ArrayLit(items) => NodeKind::ArrayLit(
                items
                    .iter()
                    .map(|item| ArrayItem {
                        key: item.key.map(&mut f),
                        value: f(item.value),
                    })
                    .collect(),
            ),
            NodeKind::Binary { op, lhs, rhs } => NodeKind::Binary {
                op: *op,
                lhs: f(*lhs),
                rhs: f(*rhs),
            },
            NodeKind::Unary { op, operand } => NodeKind::Unary {
                op: *op,
                operand: f(*operand),
            },
            NodeKind::Assign { op, target, value } => NodeKind::Assign {
                op: *op,
                target: f(*target),
                value: f(*value),
            },
            NodeKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => NodeKind::Ternary {
                cond: f(*cond),
                then_branch: then_branch.map(&mut f),
                else_branch: f(*else_branch),
            },
            NodeKind::Call { callee, args } => NodeKind::Call {
                callee: match callee {
                    Callee::Named(n) => Callee::Named(n.clone()),
                    Callee::Dynamic(e) => Callee::Dynamic(f(*e)),
                },
                args: map_vec(args, &mut f),
            },
            NodeKind::MethodCall {
                object,
                method,
                args,
            } => NodeKind::MethodCall {
                object: f(*object),
                method: method.clone(),
                args: map_vec(args, &mut f),
            },
            NodeKind::StaticCall {
                class,
                method,
                args,
            } => NodeKind::StaticCall {
                class: class.clone(),
                method: method.clone(),
                args: map_vec(args, &mut f),
            },
            NodeKind::New { class, args } => NodeKind::New {
                class: class.clone(),
                args: map_vec(args, &mut f),
            },
            NodeKind::PropertyFetch { object, property } => NodeKind::PropertyFetch {
                object: f(*object),
                property: property.clone(),
            },
            NodeKind::Index { array, index } => NodeKind::Index {
                array: f(*array),
                index: index.map(&mut f),
            },
            NodeKind::Include { kind, path } => NodeKind::Include {
                kind: *kind,
                path: f(*path),
            },
            NodeKind::Break(n) => NodeKind::Break(*n),
            NodeKind::Continue(n) => NodeKind::Continue(*n),
            NodeKind::Global(names) => NodeKind::Global(names.clone()),
            NodeKind::Separator => NodeKind::Separator,
            NodeKind::Variable(n) => NodeKind::Variable(n.clone()),
            NodeKind::Lit(l) => NodeKind::Lit(l.clone()),
            NodeKind::ConstFetch(n) => NodeKind::ConstFetch(n.clone()),
            NodeKind::MagicDir => NodeKind::MagicDir,
            NodeKind::Detached => NodeKind::Detached,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    /// Derived; valid only after the last [`Tree::connect`].
    pub parent: Option<NodeId>,
    /// Leading comment trivia.
    pub comments: Vec<Comment>,
}

/// Node arena plus helpers for the operations passes need.
#[derive(Debug, Default, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Tree { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            span,
            parent: None,
            comments: Vec::new(),
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id.index()].span
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.index()].kind = kind;
    }

    /// Take a node's kind out, leaving `Detached`. Traversal uses this to
    /// walk children while the visitor holds `&mut Tree`.
    pub fn take_kind(&mut self, id: NodeId) -> NodeKind {
        std::mem::replace(&mut self.nodes[id.index()].kind, NodeKind::Detached)
    }

    pub fn put_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.index()].kind = kind;
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id).children()
    }

    pub fn literal(&self, id: NodeId) -> Option<&Literal> {
        match self.kind(id) {
            NodeKind::Lit(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_literal(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Lit(_))
    }

    /// Recompute parent back-references for everything reachable from
    /// `roots`. Must run before any pass that walks parent chains.
    pub fn connect(&mut self, roots: &[NodeId]) {
        for &root in roots {
            self.nodes[root.index()].parent = None;
            self.connect_below(root);
        }
    }

    fn connect_below(&mut self, id: NodeId) {
        let children = self.children(id);
        for child in children {
            self.nodes[child.index()].parent = Some(id);
            self.connect_below(child);
        }
    }

    /// Sibling lookup through the parent's child list. Valid only after
    /// `connect`.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&s| s == id)?;
        siblings.get(pos + 1).copied()
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&s| s == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    /// Deep copy of a subtree into fresh arena slots.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let kind = self.kind(id).clone();
        let span = self.span(id);
        let comments = self.node(id).comments.clone();
        let new_kind = kind.map_children(|child| self.deep_clone(child));
        let new_id = self.alloc(new_kind, span);
        self.nodes[new_id.index()].comments = comments;
        new_id
    }

    /// Copy a subtree out of another tree's arena (used when the inliner
    /// merges included files into the entry tree).
    pub fn import(&mut self, other: &Tree, id: NodeId) -> NodeId {
        let kind = other.kind(id).clone();
        let span = other.span(id);
        let comments = other.node(id).comments.clone();
        let new_kind = kind.map_children(|child| self.import(other, child));
        let new_id = self.alloc(new_kind, span);
        self.nodes[new_id.index()].comments = comments;
        new_id
    }

    /// Structural equality, ignoring spans, comments, and arena identity.
    pub fn nodes_equal(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        let (ka, kb) = (self.kind(a), self.kind(b));
        if std::mem::discriminant(ka) != std::mem::discriminant(kb) {
            return false;
        }
        // Compare shallow shape with children normalized out, then recurse.
        let zero = NodeId(0);
        let na = ka.clone().map_children(|_| zero);
        let nb = kb.clone().map_children(|_| zero);
        if na != nb {
            return false;
        }
        let ca = ka.children();
        let cb = kb.children();
        ca.len() == cb.len() && ca.iter().zip(&cb).all(|(&x, &y)| self.nodes_equal(x, y))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit_int(tree: &mut Tree, v: i64) -> NodeId {
        tree.alloc(NodeKind::Lit(Literal::Int(v)), Span::dummy())
    }

    #[test]
    fn test_connect_sets_parents() {
        let mut tree = Tree::new();
        let l = lit_int(&mut tree, 1);
        let r = lit_int(&mut tree, 2);
        let add = tree.alloc(
            NodeKind::Binary {
                op: BinaryOp::Add,
                lhs: l,
                rhs: r,
            },
            Span::dummy(),
        );
        let stmt = tree.alloc(NodeKind::ExprStmt(add), Span::dummy());
        tree.connect(&[stmt]);

        assert_eq!(tree.parent(l), Some(add));
        assert_eq!(tree.parent(r), Some(add));
        assert_eq!(tree.parent(add), Some(stmt));
        assert_eq!(tree.parent(stmt), None);
    }

    #[test]
    fn test_deep_clone_is_detached() {
        let mut tree = Tree::new();
        let l = lit_int(&mut tree, 1);
        let r = lit_int(&mut tree, 2);
        let add = tree.alloc(
            NodeKind::Binary {
                op: BinaryOp::Add,
                lhs: l,
                rhs: r,
            },
            Span::dummy(),
        );
        let copy = tree.deep_clone(add);
        assert_ne!(copy, add);
        assert!(tree.nodes_equal(copy, add));

        // Mutating the copy leaves the original alone.
        tree.set_kind(copy, NodeKind::Lit(Literal::Int(9)));
        assert!(matches!(
            tree.kind(add),
            NodeKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_import_across_trees() {
        let mut a = Tree::new();
        let mut b = Tree::new();
        let x = lit_int(&mut a, 7);
        let neg = a.alloc(
            NodeKind::Unary {
                op: UnaryOp::Neg,
                operand: x,
            },
            Span::dummy(),
        );
        let imported = b.import(&a, neg);
        match b.kind(imported) {
            NodeKind::Unary { operand, .. } => {
                assert_eq!(b.literal(*operand), Some(&Literal::Int(7)));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_nodes_equal_ignores_span() {
        let mut tree = Tree::new();
        let a = tree.alloc(NodeKind::Variable("x".into()), Span::new(5, 7, 1, 1));
        let b = tree.alloc(NodeKind::Variable("x".into()), Span::dummy());
        let c = tree.alloc(NodeKind::Variable("y".into()), Span::dummy());
        assert!(tree.nodes_equal(a, b));
        assert!(!tree.nodes_equal(a, c));
    }

    #[test]
    fn test_sibling_lookup() {
        let mut tree = Tree::new();
        let s1 = lit_int(&mut tree, 1);
        let s2 = lit_int(&mut tree, 2);
        let e1 = tree.alloc(NodeKind::ExprStmt(s1), Span::dummy());
        let e2 = tree.alloc(NodeKind::ExprStmt(s2), Span::dummy());
        let block = tree.alloc(NodeKind::Block(vec![e1, e2]), Span::dummy());
        tree.connect(&[block]);
        assert_eq!(tree.next_sibling(e1), Some(e2));
        assert_eq!(tree.prev_sibling(e2), Some(e1));
        assert_eq!(tree.next_sibling(e2), None);
    }
}
