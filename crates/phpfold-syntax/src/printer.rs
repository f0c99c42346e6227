//! Source emitter. Parenthesization is driven by the same precedence
//! levels the parser uses, so printing and re-parsing reproduces an
//! equivalent tree.

use crate::tree::{
    AssignOp, BinaryOp, Callee, Comment, CommentStyle, IncludeKind, Literal, NodeId, NodeKind,
    Tree, UnaryOp,
};

/// Print a whole program with the opening tag.
pub fn print_program(tree: &Tree, roots: &[NodeId]) -> String {
    let mut printer = Printer::new(tree);
    printer.out.push_str("<?php\n\n");
    for &id in roots {
        printer.print_statement(id);
    }
    printer.out
}

/// Print a single expression (used for sandbox cache keys and reports).
pub fn print_expression(tree: &Tree, id: NodeId) -> String {
    let mut printer = Printer::new(tree);
    printer.print_expr(id, 0);
    printer.out
}

struct Printer<'t> {
    tree: &'t Tree,
    out: String,
    indent: usize,
}

impl<'t> Printer<'t> {
    fn new(tree: &'t Tree) -> Self {
        Printer {
            tree,
            out: String::new(),
            indent: 0,
        }
    }

    fn pad(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
    }

    fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn print_comments(&mut self, comments: &[Comment]) {
        for comment in comments {
            self.pad();
            match comment.style {
                CommentStyle::Line => {
                    self.push("// ");
                    self.push(&comment.text);
                }
                CommentStyle::Hash => {
                    self.push("# ");
                    self.push(&comment.text);
                }
                CommentStyle::Block => {
                    self.push("/* ");
                    self.push(&comment.text);
                    self.push(" */");
                }
            }
            self.push("\n");
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn print_statement(&mut self, id: NodeId) {
        let comments = self.tree.node(id).comments.clone();
        self.print_comments(&comments);
        match self.tree.kind(id).clone() {
            NodeKind::Separator => {
                self.push("\n");
            }
            NodeKind::Block(stmts) => {
                self.pad();
                self.push("{\n");
                self.indent += 1;
                for s in stmts {
                    self.print_statement(s);
                }
                self.indent -= 1;
                self.pad();
                self.push("}\n");
            }
            NodeKind::ExprStmt(expr) => {
                self.pad();
                self.print_expr(expr, 0);
                self.push(";\n");
            }
            NodeKind::Echo(args) => {
                self.pad();
                self.push("echo ");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.print_expr(*arg, 0);
                }
                self.push(";\n");
            }
            NodeKind::If {
                cond,
                then_branch,
                elseifs,
                else_branch,
            } => {
                self.pad();
                self.push("if (");
                self.print_expr(cond, 0);
                self.push(") ");
                self.print_inline_block(then_branch);
                for ei in &elseifs {
                    self.push(" elseif (");
                    self.print_expr(ei.cond, 0);
                    self.push(") ");
                    self.print_inline_block(ei.body);
                }
                if let Some(eb) = else_branch {
                    self.push(" else ");
                    self.print_inline_block(eb);
                }
                self.push("\n");
            }
            NodeKind::While { cond, body } => {
                self.pad();
                self.push("while (");
                self.print_expr(cond, 0);
                self.push(") ");
                self.print_inline_block(body);
                self.push("\n");
            }
            NodeKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.pad();
                self.push("for (");
                self.print_expr_list(&init);
                self.push("; ");
                self.print_expr_list(&cond);
                self.push("; ");
                self.print_expr_list(&step);
                self.push(") ");
                self.print_inline_block(body);
                self.push("\n");
            }
            NodeKind::Foreach {
                subject,
                key_var,
                value_var,
                by_ref,
                body,
            } => {
                self.pad();
                self.push("foreach (");
                self.print_expr(subject, 0);
                self.push(" as ");
                if let Some(k) = &key_var {
                    self.push(&format!("${k} => "));
                }
                if by_ref {
                    self.push("&");
                }
                self.push(&format!("${value_var}"));
                self.push(") ");
                self.print_inline_block(body);
                self.push("\n");
            }
            NodeKind::Switch { subject, cases } => {
                self.pad();
                self.push("switch (");
                self.print_expr(subject, 0);
                self.push(") {\n");
                self.indent += 1;
                for case in &cases {
                    self.pad();
                    match case.test {
                        Some(test) => {
                            self.push("case ");
                            self.print_expr(test, 0);
                            self.push(":\n");
                        }
                        None => self.push("default:\n"),
                    }
                    self.indent += 1;
                    for &s in &case.body {
                        self.print_statement(s);
                    }
                    self.indent -= 1;
                }
                self.indent -= 1;
                self.pad();
                self.push("}\n");
            }
            NodeKind::Break(level) => {
                self.pad();
                match level {
                    Some(n) => self.push(&format!("break {n};\n")),
                    None => self.push("break;\n"),
                }
            }
            NodeKind::Continue(level) => {
                self.pad();
                match level {
                    Some(n) => self.push(&format!("continue {n};\n")),
                    None => self.push("continue;\n"),
                }
            }
            NodeKind::Return(value) => {
                self.pad();
                match value {
                    Some(v) => {
                        self.push("return ");
                        self.print_expr(v, 0);
                        self.push(";\n");
                    }
                    None => self.push("return;\n"),
                }
            }
            NodeKind::Global(names) => {
                self.pad();
                self.push("global ");
                let joined = names
                    .iter()
                    .map(|n| format!("${n}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.push(&joined);
                self.push(";\n");
            }
            NodeKind::ConstDecl { name, value } => {
                self.pad();
                self.push(&format!("const {name} = "));
                self.print_expr(value, 0);
                self.push(";\n");
            }
            NodeKind::FunctionDecl { name, params, body } => {
                self.pad();
                self.push(&format!("function {name}("));
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    if p.by_ref {
                        self.push("&");
                    }
                    self.push(&format!("${}", p.name));
                    if let Some(d) = p.default {
                        self.push(" = ");
                        self.print_expr(d, 0);
                    }
                }
                self.push(") ");
                self.print_inline_block(body);
                self.push("\n");
            }
            NodeKind::ClassDecl {
                name,
                parent,
                properties,
                methods,
            } => {
                self.pad();
                self.push(&format!("class {name}"));
                if let Some(p) = &parent {
                    self.push(&format!(" extends {p}"));
                }
                self.push(" {\n");
                self.indent += 1;
                for prop in &properties {
                    self.pad();
                    self.push(&format!("public ${}", prop.name));
                    if let Some(d) = prop.default {
                        self.push(" = ");
                        self.print_expr(d, 0);
                    }
                    self.push(";\n");
                }
                for (i, &m) in methods.iter().enumerate() {
                    if !properties.is_empty() || i > 0 {
                        self.push("\n");
                    }
                    if let NodeKind::FunctionDecl { name, params, body } = self.tree.kind(m).clone()
                    {
                        self.pad();
                        self.push(&format!("public function {name}("));
                        for (i, p) in params.iter().enumerate() {
                            if i > 0 {
                                self.push(", ");
                            }
                            if p.by_ref {
                                self.push("&");
                            }
                            self.push(&format!("${}", p.name));
                            if let Some(d) = p.default {
                                self.push(" = ");
                                self.print_expr(d, 0);
                            }
                        }
                        self.push(") ");
                        self.print_inline_block(body);
                        self.push("\n");
                    }
                }
                self.indent -= 1;
                self.pad();
                self.push("}\n");
            }
            NodeKind::Try {
                body,
                catches,
                finally,
            } => {
                self.pad();
                self.push("try ");
                self.print_inline_block(body);
                for c in &catches {
                    self.push(" catch (");
                    self.push(&c.types.join(" | "));
                    if let Some(v) = &c.var {
                        self.push(&format!(" ${v}"));
                    }
                    self.push(") ");
                    self.print_inline_block(c.body);
                }
                if let Some(f) = finally {
                    self.push(" finally ");
                    self.print_inline_block(f);
                }
                self.push("\n");
            }
            NodeKind::Throw(value) => {
                self.pad();
                self.push("throw ");
                self.print_expr(value, 0);
                self.push(";\n");
            }
            // Expression in statement position (defensive; passes produce
            // ExprStmt wrappers).
            _ => {
                self.pad();
                self.print_expr(id, 0);
                self.push(";\n");
            }
        }
    }

    /// Block printed inline after a header (`if (...) { ... }`), without
    /// the trailing newline so chained clauses stay on one line.
    fn print_inline_block(&mut self, id: NodeId) {
        match self.tree.kind(id).clone() {
            NodeKind::Block(stmts) => {
                self.push("{\n");
                self.indent += 1;
                for s in stmts {
                    self.print_statement(s);
                }
                self.indent -= 1;
                self.pad();
                self.push("}");
            }
            _ => {
                self.push("{\n");
                self.indent += 1;
                self.print_statement(id);
                self.indent -= 1;
                self.pad();
                self.push("}");
            }
        }
    }

    fn print_expr_list(&mut self, exprs: &[NodeId]) {
        for (i, &e) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.print_expr(e, 0);
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn binary_prec(op: BinaryOp) -> u8 {
        match op {
            BinaryOp::Coalesce => 3,
            BinaryOp::Or => 4,
            BinaryOp::And => 5,
            BinaryOp::BitOr => 6,
            BinaryOp::BitXor => 7,
            BinaryOp::BitAnd => 8,
            BinaryOp::Equal
            | BinaryOp::Identical
            | BinaryOp::NotEqual
            | BinaryOp::NotIdentical => 9,
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => 10,
            BinaryOp::Concat => 11,
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => 12,
            BinaryOp::Add | BinaryOp::Sub => 13,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 14,
            BinaryOp::Pow => 16,
        }
    }

    fn expr_prec(&self, id: NodeId) -> u8 {
        match self.tree.kind(id) {
            NodeKind::Assign { .. } => 1,
            NodeKind::Ternary { .. } => 2,
            NodeKind::Binary { op, .. } => Self::binary_prec(*op),
            NodeKind::Unary { .. } => 15,
            NodeKind::Include { .. } => 1,
            _ => 17,
        }
    }

    fn print_expr(&mut self, id: NodeId, min_prec: u8) {
        let prec = self.expr_prec(id);
        let parens = prec < min_prec;
        if parens {
            self.push("(");
        }
        self.print_expr_inner(id);
        if parens {
            self.push(")");
        }
    }

    fn print_expr_inner(&mut self, id: NodeId) {
        match self.tree.kind(id).clone() {
            NodeKind::Variable(name) => self.push(&format!("${name}")),
            NodeKind::Lit(lit) => self.print_literal(&lit),
            NodeKind::ConstFetch(name) => self.push(&name),
            NodeKind::MagicDir => self.push("__DIR__"),
            NodeKind::Interp(parts) => {
                self.push("\"");
                for part in parts {
                    match self.tree.kind(part).clone() {
                        NodeKind::Lit(Literal::String(text)) => {
                            self.push(&escape_double_quoted(&text));
                        }
                        NodeKind::Variable(name) => self.push(&format!("{{${name}}}")),
                        // Non-canonical part; fall back to its printed form.
                        _ => {
                            let text = print_expression(self.tree, part);
                            self.push(&format!("{{{text}}}"));
                        }
                    }
                }
                self.push("\"");
            }
            NodeKind::ArrayLit(items) => {
                self.push("[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    if let Some(k) = item.key {
                        self.print_expr(k, 0);
                        self.push(" => ");
                    }
                    self.print_expr(item.value, 0);
                }
                self.push("]");
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let prec = Self::binary_prec(op);
                let right_assoc = matches!(op, BinaryOp::Coalesce | BinaryOp::Pow);
                let (lmin, rmin) = if right_assoc {
                    (prec + 1, prec)
                } else {
                    (prec, prec + 1)
                };
                self.print_expr(lhs, lmin);
                self.push(&format!(" {} ", binary_symbol(op)));
                self.print_expr(rhs, rmin);
            }
            NodeKind::Unary { op, operand } => {
                self.push(unary_symbol(op));
                self.print_expr(operand, 15);
            }
            NodeKind::Assign { op, target, value } => {
                self.print_expr(target, 17);
                self.push(&format!(" {} ", assign_symbol(op)));
                self.print_expr(value, 1);
            }
            NodeKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                self.print_expr(cond, 3);
                match then_branch {
                    Some(t) => {
                        self.push(" ? ");
                        self.print_expr(t, 3);
                        self.push(" : ");
                    }
                    None => self.push(" ?: "),
                }
                self.print_expr(else_branch, 3);
            }
            NodeKind::Call { callee, args } => {
                match callee {
                    Callee::Named(name) => self.push(&name),
                    Callee::Dynamic(e) => self.print_expr(e, 17),
                }
                self.push("(");
                self.print_expr_list(&args);
                self.push(")");
            }
            NodeKind::MethodCall {
                object,
                method,
                args,
            } => {
                self.print_expr(object, 17);
                self.push(&format!("->{method}("));
                self.print_expr_list(&args);
                self.push(")");
            }
            NodeKind::StaticCall {
                class,
                method,
                args,
            } => {
                self.push(&format!("{class}::{method}("));
                self.print_expr_list(&args);
                self.push(")");
            }
            NodeKind::New { class, args } => {
                self.push(&format!("new {class}("));
                self.print_expr_list(&args);
                self.push(")");
            }
            NodeKind::PropertyFetch { object, property } => {
                self.print_expr(object, 17);
                self.push(&format!("->{property}"));
            }
            NodeKind::Index { array, index } => {
                self.print_expr(array, 17);
                self.push("[");
                if let Some(i) = index {
                    self.print_expr(i, 0);
                }
                self.push("]");
            }
            NodeKind::Isset(args) => {
                self.push("isset(");
                self.print_expr_list(&args);
                self.push(")");
            }
            NodeKind::Empty(arg) => {
                self.push("empty(");
                self.print_expr(arg, 0);
                self.push(")");
            }
            NodeKind::Include { kind, path } => {
                self.push(include_keyword(kind));
                self.push(" ");
                self.print_expr(path, 2);
            }
            NodeKind::Exit(value) => match value {
                Some(v) => {
                    self.push("exit(");
                    self.print_expr(v, 0);
                    self.push(")");
                }
                None => self.push("exit"),
            },
            // Statement kind in expression position should not happen;
            // emit nothing rather than invalid output.
            other => {
                debug_assert!(!other.is_statement(), "statement in expression position");
            }
        }
    }

    fn print_literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Null => self.push("null"),
            Literal::Bool(true) => self.push("true"),
            Literal::Bool(false) => self.push("false"),
            Literal::Int(v) => self.push(&v.to_string()),
            Literal::Float(v) => self.push(&format_float(*v)),
            Literal::String(s) => {
                if s.contains('\'') || s.contains('\\') || s.chars().any(|c| c.is_control()) {
                    self.push("\"");
                    self.push(&escape_double_quoted(s));
                    self.push("\"");
                } else {
                    self.push(&format!("'{s}'"));
                }
            }
        }
    }
}

fn format_float(v: f64) -> String {
    if v.is_finite() && v == v.trunc() && v.abs() < 1e15 {
        // Keep a decimal point so the literal re-parses as a float.
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

fn escape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
        BinaryOp::Concat => ".",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::Identical => "===",
        BinaryOp::NotIdentical => "!==",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::Coalesce => "??",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
        BinaryOp::ShiftLeft => "<<",
        BinaryOp::ShiftRight => ">>",
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Not => "!",
        UnaryOp::Neg => "-",
        UnaryOp::Plus => "+",
        UnaryOp::BitNot => "~",
    }
}

fn assign_symbol(op: AssignOp) -> &'static str {
    match op {
        AssignOp::Assign => "=",
        AssignOp::Add => "+=",
        AssignOp::Sub => "-=",
        AssignOp::Mul => "*=",
        AssignOp::Div => "/=",
        AssignOp::Mod => "%=",
        AssignOp::Concat => ".=",
        AssignOp::Coalesce => "??=",
    }
}

fn include_keyword(kind: IncludeKind) -> &'static str {
    match kind {
        IncludeKind::Include => "include",
        IncludeKind::IncludeOnce => "include_once",
        IncludeKind::Require => "require",
        IncludeKind::RequireOnce => "require_once",
    }
}
