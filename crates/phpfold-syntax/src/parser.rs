//! Recursive-descent parser for the PHP subset, precedence climbing for
//! expressions. Produces nodes directly into an arena [`Tree`].

use crate::error::ParseError;
use crate::lexer::{Lexer, TemplatePart, Token, TokenKind};
use crate::span::Span;
use crate::tree::{
    ArrayItem, AssignOp, BinaryOp, Callee, CatchClause, Comment, ElseIf, IncludeKind, Literal,
    NodeId, NodeKind, Param, PropertyDef, SwitchCase, Tree, UnaryOp,
};

/// A parsed compilation unit: the arena plus its top-level statement list.
#[derive(Debug, Default)]
pub struct Program {
    pub tree: Tree,
    pub roots: Vec<NodeId>,
}

/// Parse one source file.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        tree: Tree::new(),
    };
    let mut roots = Vec::new();
    while !parser.at_eof() {
        roots.push(parser.parse_statement()?);
    }
    Ok(Program {
        tree: parser.tree,
        roots,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    tree: Tree,
}

impl Parser {
    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                kind.describe(),
                self.peek().describe()
            )))
        }
    }

    /// Case-insensitive keyword check; PHP keywords are not reserved words
    /// in this subset beyond their statement positions.
    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(name) if name.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}', found {}", self.peek().describe())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected identifier, found {}", other.describe()))),
        }
    }

    fn expect_variable(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            TokenKind::Variable(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected variable, found {}", other.describe()))),
        }
    }

    fn take_leading_comments(&mut self) -> Vec<Comment> {
        std::mem::take(&mut self.tokens[self.pos].leading)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.current_span())
    }

    fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        self.tree.alloc(kind, span)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<NodeId, ParseError> {
        let comments = self.take_leading_comments();
        let start = self.current_span();
        let id = self.parse_statement_inner(start)?;
        if !comments.is_empty() {
            self.tree.node_mut(id).comments = comments;
        }
        Ok(id)
    }

    fn parse_statement_inner(&mut self, start: Span) -> Result<NodeId, ParseError> {
        if matches!(self.peek(), TokenKind::LBrace) {
            return self.parse_block();
        }
        if let TokenKind::Ident(name) = self.peek() {
            match name.to_ascii_lowercase().as_str() {
                "if" => return self.parse_if(start),
                "while" => return self.parse_while(start),
                "for" => return self.parse_for(start),
                "foreach" => return self.parse_foreach(start),
                "switch" => return self.parse_switch(start),
                "break" => return self.parse_break_continue(start, true),
                "continue" => return self.parse_break_continue(start, false),
                "return" => return self.parse_return(start),
                "function" => return self.parse_function(start),
                "class" => return self.parse_class(start),
                "echo" => return self.parse_echo(start),
                "global" => return self.parse_global(start),
                "const" => return self.parse_const(start),
                "try" => return self.parse_try(start),
                "throw" => return self.parse_throw(start),
                _ => {}
            }
        }
        let expr = self.parse_expression()?;
        self.expect(&TokenKind::Semicolon)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::ExprStmt(expr), span))
    }

    fn parse_block(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::Block(stmts), span))
    }

    /// Body position: either a braced block or a single statement wrapped
    /// into a one-element block so control nodes always hold blocks.
    fn parse_body(&mut self) -> Result<NodeId, ParseError> {
        if matches!(self.peek(), TokenKind::LBrace) {
            self.parse_block()
        } else {
            let stmt = self.parse_statement()?;
            let span = self.tree.span(stmt);
            Ok(self.alloc(NodeKind::Block(vec![stmt]), span))
        }
    }

    fn parse_if(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("if")?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let then_branch = self.parse_body()?;

        let mut elseifs = Vec::new();
        let mut else_branch = None;
        loop {
            if self.eat_keyword("elseif") {
                self.expect(&TokenKind::LParen)?;
                let ei_cond = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                let ei_body = self.parse_body()?;
                elseifs.push(ElseIf {
                    cond: ei_cond,
                    body: ei_body,
                });
            } else if self.at_keyword("else") {
                self.advance();
                if self.at_keyword("if") {
                    // `else if`: parse the nested if as the sole statement
                    // of the else branch.
                    let nested_start = self.current_span();
                    let nested = self.parse_if(nested_start)?;
                    let span = self.tree.span(nested);
                    else_branch = Some(self.alloc(NodeKind::Block(vec![nested]), span));
                } else {
                    else_branch = Some(self.parse_body()?);
                }
                break;
            } else {
                break;
            }
        }

        let span = start.merge(self.prev_span());
        Ok(self.alloc(
            NodeKind::If {
                cond,
                then_branch,
                elseifs,
                else_branch,
            },
            span,
        ))
    }

    fn parse_while(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("while")?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_body()?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::While { cond, body }, span))
    }

    fn parse_for(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("for")?;
        self.expect(&TokenKind::LParen)?;
        let init = self.parse_expr_list_until(&TokenKind::Semicolon)?;
        self.expect(&TokenKind::Semicolon)?;
        let cond = self.parse_expr_list_until(&TokenKind::Semicolon)?;
        self.expect(&TokenKind::Semicolon)?;
        let step = self.parse_expr_list_until(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_body()?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(
            NodeKind::For {
                init,
                cond,
                step,
                body,
            },
            span,
        ))
    }

    fn parse_expr_list_until(&mut self, terminator: &TokenKind) -> Result<Vec<NodeId>, ParseError> {
        let mut exprs = Vec::new();
        if self.peek() == terminator {
            return Ok(exprs);
        }
        loop {
            exprs.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(exprs)
    }

    fn parse_foreach(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("foreach")?;
        self.expect(&TokenKind::LParen)?;
        let subject = self.parse_expression()?;
        self.expect_keyword("as")?;
        let first = self.expect_variable()?;
        let (key_var, by_ref, value_var) = if self.eat(&TokenKind::DoubleArrow) {
            let by_ref = self.eat(&TokenKind::Amp);
            let value = self.expect_variable()?;
            (Some(first), by_ref, value)
        } else {
            (None, false, first)
        };
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_body()?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(
            NodeKind::Foreach {
                subject,
                key_var,
                value_var,
                by_ref,
                body,
            },
            span,
        ))
    }

    fn parse_switch(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("switch")?;
        self.expect(&TokenKind::LParen)?;
        let subject = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;

        let mut cases = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
            let test = if self.eat_keyword("case") {
                let test = self.parse_expression()?;
                Some(test)
            } else if self.eat_keyword("default") {
                None
            } else {
                return Err(self.error("expected 'case' or 'default' in switch body"));
            };
            if !self.eat(&TokenKind::Colon) {
                self.expect(&TokenKind::Semicolon)?;
            }
            let mut body = Vec::new();
            while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof)
                && !self.at_keyword("case")
                && !self.at_keyword("default")
            {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        self.expect(&TokenKind::RBrace)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::Switch { subject, cases }, span))
    }

    fn parse_break_continue(&mut self, start: Span, is_break: bool) -> Result<NodeId, ParseError> {
        self.advance();
        let level = if let TokenKind::Int(n) = self.peek() {
            let n = *n;
            self.advance();
            Some(n)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon)?;
        let span = start.merge(self.prev_span());
        let kind = if is_break {
            NodeKind::Break(level)
        } else {
            NodeKind::Continue(level)
        };
        Ok(self.alloc(kind, span))
    }

    fn parse_return(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("return")?;
        let value = if matches!(self.peek(), TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semicolon)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::Return(value), span))
    }

    fn parse_function(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("function")?;
        let name = self.expect_ident()?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::FunctionDecl { name, params, body }, span))
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !matches!(self.peek(), TokenKind::RParen) {
            loop {
                let by_ref = self.eat(&TokenKind::Amp);
                let name = self.expect_variable()?;
                let default = if self.eat(&TokenKind::Eq) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                params.push(Param {
                    name,
                    default,
                    by_ref,
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_class(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("class")?;
        let name = self.expect_ident()?;
        let parent = if self.eat_keyword("extends") {
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.expect(&TokenKind::LBrace)?;

        let mut properties = Vec::new();
        let mut methods = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
            // Skip visibility/static modifiers; the optimizer does not
            // distinguish them.
            while self.eat_keyword("public")
                || self.eat_keyword("private")
                || self.eat_keyword("protected")
                || self.eat_keyword("var")
                || self.eat_keyword("static")
            {}
            if self.at_keyword("function") {
                let m_start = self.current_span();
                methods.push(self.parse_function(m_start)?);
            } else if matches!(self.peek(), TokenKind::Variable(_)) {
                let prop_name = self.expect_variable()?;
                let default = if self.eat(&TokenKind::Eq) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                self.expect(&TokenKind::Semicolon)?;
                properties.push(PropertyDef {
                    name: prop_name,
                    default,
                });
            } else {
                return Err(self.error(format!(
                    "expected property or method in class body, found {}",
                    self.peek().describe()
                )));
            }
        }
        self.expect(&TokenKind::RBrace)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(
            NodeKind::ClassDecl {
                name,
                parent,
                properties,
                methods,
            },
            span,
        ))
    }

    fn parse_echo(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("echo")?;
        let mut args = vec![self.parse_expression()?];
        while self.eat(&TokenKind::Comma) {
            args.push(self.parse_expression()?);
        }
        self.expect(&TokenKind::Semicolon)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::Echo(args), span))
    }

    fn parse_global(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("global")?;
        let mut names = vec![self.expect_variable()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_variable()?);
        }
        self.expect(&TokenKind::Semicolon)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::Global(names), span))
    }

    fn parse_const(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("const")?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Eq)?;
        let value = self.parse_expression()?;
        self.expect(&TokenKind::Semicolon)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::ConstDecl { name, value }, span))
    }

    fn parse_try(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("try")?;
        let body = self.parse_block()?;
        let mut catches = Vec::new();
        while self.eat_keyword("catch") {
            self.expect(&TokenKind::LParen)?;
            let mut types = vec![self.expect_ident()?];
            while self.eat(&TokenKind::Pipe) {
                types.push(self.expect_ident()?);
            }
            let var = if matches!(self.peek(), TokenKind::Variable(_)) {
                Some(self.expect_variable()?)
            } else {
                None
            };
            self.expect(&TokenKind::RParen)?;
            let catch_body = self.parse_block()?;
            catches.push(CatchClause {
                types,
                var,
                body: catch_body,
            });
        }
        let finally = if self.eat_keyword("finally") {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(self.error("try without catch or finally"));
        }
        let span = start.merge(self.prev_span());
        Ok(self.alloc(
            NodeKind::Try {
                body,
                catches,
                finally,
            },
            span,
        ))
    }

    fn parse_throw(&mut self, start: Span) -> Result<NodeId, ParseError> {
        self.expect_keyword("throw")?;
        let value = self.parse_expression()?;
        self.expect(&TokenKind::Semicolon)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::Throw(value), span))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<NodeId, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        let lhs = self.parse_ternary()?;
        let op = match self.peek() {
            TokenKind::Eq => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::Add,
            TokenKind::MinusEq => AssignOp::Sub,
            TokenKind::StarEq => AssignOp::Mul,
            TokenKind::SlashEq => AssignOp::Div,
            TokenKind::PercentEq => AssignOp::Mod,
            TokenKind::DotEq => AssignOp::Concat,
            TokenKind::CoalesceEq => AssignOp::Coalesce,
            _ => return Ok(lhs),
        };
        if !self.is_assignable(lhs) {
            return Err(self.error("left-hand side of assignment is not assignable"));
        }
        self.advance();
        let value = self.parse_assignment()?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(
            NodeKind::Assign {
                op,
                target: lhs,
                value,
            },
            span,
        ))
    }

    fn is_assignable(&self, id: NodeId) -> bool {
        matches!(
            self.tree.kind(id),
            NodeKind::Variable(_) | NodeKind::Index { .. } | NodeKind::PropertyFetch { .. }
        )
    }

    fn parse_ternary(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        let cond = self.parse_binary(0)?;
        if !self.eat(&TokenKind::Question) {
            return Ok(cond);
        }
        let then_branch = if matches!(self.peek(), TokenKind::Colon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Colon)?;
        let else_branch = self.parse_ternary()?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(
            NodeKind::Ternary {
                cond,
                then_branch,
                else_branch,
            },
            span,
        ))
    }

    /// Binding power table; `right` marks right-associative operators.
    fn binary_op(kind: &TokenKind) -> Option<(BinaryOp, u8, bool)> {
        let entry = match kind {
            TokenKind::QuestionQuestion => (BinaryOp::Coalesce, 3, true),
            TokenKind::PipePipe => (BinaryOp::Or, 4, false),
            TokenKind::AmpAmp => (BinaryOp::And, 5, false),
            TokenKind::Pipe => (BinaryOp::BitOr, 6, false),
            TokenKind::Caret => (BinaryOp::BitXor, 7, false),
            TokenKind::Amp => (BinaryOp::BitAnd, 8, false),
            TokenKind::EqEq => (BinaryOp::Equal, 9, false),
            TokenKind::EqEqEq => (BinaryOp::Identical, 9, false),
            TokenKind::BangEq => (BinaryOp::NotEqual, 9, false),
            TokenKind::BangEqEq => (BinaryOp::NotIdentical, 9, false),
            TokenKind::Lt => (BinaryOp::Less, 10, false),
            TokenKind::LtEq => (BinaryOp::LessEqual, 10, false),
            TokenKind::Gt => (BinaryOp::Greater, 10, false),
            TokenKind::GtEq => (BinaryOp::GreaterEqual, 10, false),
            // Version-8 precedence: arithmetic over shift over concat.
            TokenKind::Dot => (BinaryOp::Concat, 11, false),
            TokenKind::LtLt => (BinaryOp::ShiftLeft, 12, false),
            TokenKind::GtGt => (BinaryOp::ShiftRight, 12, false),
            TokenKind::Plus => (BinaryOp::Add, 13, false),
            TokenKind::Minus => (BinaryOp::Sub, 13, false),
            TokenKind::Star => (BinaryOp::Mul, 14, false),
            TokenKind::Slash => (BinaryOp::Div, 14, false),
            TokenKind::Percent => (BinaryOp::Mod, 14, false),
            _ => return None,
        };
        Some(entry)
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        let mut lhs = self.parse_unary()?;
        while let Some((op, bp, right)) = Self::binary_op(self.peek()) {
            if bp < min_bp {
                break;
            }
            self.advance();
            let next_bp = if right { bp } else { bp + 1 };
            let rhs = self.parse_binary(next_bp)?;
            let span = start.merge(self.prev_span());
            lhs = self.alloc(NodeKind::Binary { op, lhs, rhs }, span);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        let op = match self.peek() {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(self.prev_span());
            return Ok(self.alloc(NodeKind::Unary { op, operand }, span));
        }
        self.parse_pow()
    }

    fn parse_pow(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        let base = self.parse_postfix()?;
        if self.eat(&TokenKind::StarStar) {
            // `**` binds tighter than unary minus on its right operand.
            let rhs = self.parse_unary()?;
            let span = start.merge(self.prev_span());
            return Ok(self.alloc(
                NodeKind::Binary {
                    op: BinaryOp::Pow,
                    lhs: base,
                    rhs,
                },
                span,
            ));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    let args = self.parse_args()?;
                    let span = start.merge(self.prev_span());
                    expr = self.alloc(
                        NodeKind::Call {
                            callee: Callee::Dynamic(expr),
                            args,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = if matches!(self.peek(), TokenKind::RBracket) {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.expect(&TokenKind::RBracket)?;
                    let span = start.merge(self.prev_span());
                    expr = self.alloc(NodeKind::Index { array: expr, index }, span);
                }
                TokenKind::Arrow => {
                    self.advance();
                    let member = self.expect_ident()?;
                    if matches!(self.peek(), TokenKind::LParen) {
                        let args = self.parse_args()?;
                        let span = start.merge(self.prev_span());
                        expr = self.alloc(
                            NodeKind::MethodCall {
                                object: expr,
                                method: member,
                                args,
                            },
                            span,
                        );
                    } else {
                        let span = start.merge(self.prev_span());
                        expr = self.alloc(
                            NodeKind::PropertyFetch {
                                object: expr,
                                property: member,
                            },
                            span,
                        );
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<NodeId>, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.peek(), TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        match self.peek().clone() {
            TokenKind::Int(v) => {
                self.advance();
                Ok(self.alloc(NodeKind::Lit(Literal::Int(v)), start))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(self.alloc(NodeKind::Lit(Literal::Float(v)), start))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(self.alloc(NodeKind::Lit(Literal::String(s)), start))
            }
            TokenKind::TemplateStr(parts) => {
                self.advance();
                let mut part_ids = Vec::new();
                for part in parts {
                    let id = match part {
                        TemplatePart::Lit(text) => {
                            self.alloc(NodeKind::Lit(Literal::String(text)), start)
                        }
                        TemplatePart::Var(name) => self.alloc(NodeKind::Variable(name), start),
                    };
                    part_ids.push(id);
                }
                Ok(self.alloc(NodeKind::Interp(part_ids), start))
            }
            TokenKind::Variable(name) => {
                self.advance();
                Ok(self.alloc(NodeKind::Variable(name), start))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_array_literal(start),
            TokenKind::Ident(name) => self.parse_ident_expression(start, name),
            other => Err(self.error(format!("expected expression, found {}", other.describe()))),
        }
    }

    fn parse_array_literal(&mut self, start: Span) -> Result<NodeId, ParseError> {
        let close = if self.eat(&TokenKind::LBracket) {
            TokenKind::RBracket
        } else {
            // `array(...)` form; caller consumed the `array` ident.
            self.expect(&TokenKind::LParen)?;
            TokenKind::RParen
        };
        let mut items = Vec::new();
        if self.peek() != &close {
            loop {
                let first = self.parse_expression()?;
                let item = if self.eat(&TokenKind::DoubleArrow) {
                    let value = self.parse_expression()?;
                    ArrayItem {
                        key: Some(first),
                        value,
                    }
                } else {
                    ArrayItem {
                        key: None,
                        value: first,
                    }
                };
                items.push(item);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
                if self.peek() == &close {
                    break; // trailing comma
                }
            }
        }
        self.expect(&close)?;
        let span = start.merge(self.prev_span());
        Ok(self.alloc(NodeKind::ArrayLit(items), span))
    }

    fn parse_ident_expression(&mut self, start: Span, name: String) -> Result<NodeId, ParseError> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "true" => {
                self.advance();
                return Ok(self.alloc(NodeKind::Lit(Literal::Bool(true)), start));
            }
            "false" => {
                self.advance();
                return Ok(self.alloc(NodeKind::Lit(Literal::Bool(false)), start));
            }
            "null" => {
                self.advance();
                return Ok(self.alloc(NodeKind::Lit(Literal::Null), start));
            }
            "array" if matches!(self.peek_at(1), TokenKind::LParen) => {
                self.advance();
                return self.parse_array_literal(start);
            }
            "isset" => {
                self.advance();
                let args = self.parse_args()?;
                let span = start.merge(self.prev_span());
                return Ok(self.alloc(NodeKind::Isset(args), span));
            }
            "empty" => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let arg = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                let span = start.merge(self.prev_span());
                return Ok(self.alloc(NodeKind::Empty(arg), span));
            }
            "exit" | "die" => {
                self.advance();
                let value = if self.eat(&TokenKind::LParen) {
                    let v = if matches!(self.peek(), TokenKind::RParen) {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.expect(&TokenKind::RParen)?;
                    v
                } else {
                    None
                };
                let span = start.merge(self.prev_span());
                return Ok(self.alloc(NodeKind::Exit(value), span));
            }
            "include" | "include_once" | "require" | "require_once" => {
                self.advance();
                let kind = match lower.as_str() {
                    "include" => IncludeKind::Include,
                    "include_once" => IncludeKind::IncludeOnce,
                    "require" => IncludeKind::Require,
                    _ => IncludeKind::RequireOnce,
                };
                let path = self.parse_expression()?;
                let span = start.merge(self.prev_span());
                return Ok(self.alloc(NodeKind::Include { kind, path }, span));
            }
            "print" => {
                self.advance();
                let arg = self.parse_expression()?;
                let span = start.merge(self.prev_span());
                return Ok(self.alloc(
                    NodeKind::Call {
                        callee: Callee::Named("print".to_string()),
                        args: vec![arg],
                    },
                    span,
                ));
            }
            "new" => {
                self.advance();
                let class = self.expect_ident()?;
                let args = if matches!(self.peek(), TokenKind::LParen) {
                    self.parse_args()?
                } else {
                    Vec::new()
                };
                let span = start.merge(self.prev_span());
                return Ok(self.alloc(NodeKind::New { class, args }, span));
            }
            _ => {}
        }
        if name == "__DIR__" {
            self.advance();
            return Ok(self.alloc(NodeKind::MagicDir, start));
        }

        self.advance();
        match self.peek() {
            TokenKind::LParen => {
                let args = self.parse_args()?;
                let span = start.merge(self.prev_span());
                Ok(self.alloc(
                    NodeKind::Call {
                        callee: Callee::Named(name),
                        args,
                    },
                    span,
                ))
            }
            TokenKind::DoubleColon => {
                self.advance();
                let method = self.expect_ident()?;
                let args = self.parse_args()?;
                let span = start.merge(self.prev_span());
                Ok(self.alloc(
                    NodeKind::StaticCall {
                        class: name,
                        method,
                        args,
                    },
                    span,
                ))
            }
            _ => Ok(self.alloc(NodeKind::ConstFetch(name), start)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::BinaryOp;

    fn parse_ok(src: &str) -> Program {
        parse(src).expect("parse failed")
    }

    fn first_expr(program: &Program) -> NodeId {
        match program.tree.kind(program.roots[0]) {
            NodeKind::ExprStmt(e) => *e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let program = parse_ok("<?php 2 + 3 * 4;");
        let expr = first_expr(&program);
        match program.tree.kind(expr) {
            NodeKind::Binary { op, rhs, .. } => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(
                    program.tree.kind(*rhs),
                    NodeKind::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_concat_binds_looser_than_add() {
        // PHP 8 precedence: `'x' . 1 + 2` parses as `'x' . (1 + 2)`.
        let program = parse_ok("<?php 'x' . 1 + 2;");
        let expr = first_expr(&program);
        match program.tree.kind(expr) {
            NodeKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::Concat),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shift_binds_tighter_than_concat() {
        // `$a << $b . $c` parses as `($a << $b) . $c`.
        let program = parse_ok("<?php $a << $b . $c;");
        let expr = first_expr(&program);
        match program.tree.kind(expr) {
            NodeKind::Binary { op, lhs, .. } => {
                assert_eq!(*op, BinaryOp::Concat);
                assert!(matches!(
                    program.tree.kind(*lhs),
                    NodeKind::Binary {
                        op: BinaryOp::ShiftLeft,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_assignment_chain_right_assoc() {
        let program = parse_ok("<?php $a = $b = 1;");
        let expr = first_expr(&program);
        match program.tree.kind(expr) {
            NodeKind::Assign { value, .. } => {
                assert!(matches!(
                    program.tree.kind(*value),
                    NodeKind::Assign { .. }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ternary_and_short_ternary() {
        let program = parse_ok("<?php $a ? 1 : 2; $b ?: 3;");
        let full = first_expr(&program);
        assert!(matches!(
            program.tree.kind(full),
            NodeKind::Ternary {
                then_branch: Some(_),
                ..
            }
        ));
        let short = match program.tree.kind(program.roots[1]) {
            NodeKind::ExprStmt(e) => *e,
            _ => unreachable!(),
        };
        assert!(matches!(
            program.tree.kind(short),
            NodeKind::Ternary {
                then_branch: None,
                ..
            }
        ));
    }

    #[test]
    fn test_function_and_call() {
        let program = parse_ok("<?php function add($a, $b = 1) { return $a + $b; } add(2);");
        match program.tree.kind(program.roots[0]) {
            NodeKind::FunctionDecl { name, params, .. } => {
                assert_eq!(name, "add");
                assert_eq!(params.len(), 2);
                assert!(params[1].default.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        let call = first_expr(&Program {
            tree: program.tree.clone(),
            roots: vec![program.roots[1]],
        });
        assert!(matches!(
            program.tree.kind(call),
            NodeKind::Call {
                callee: Callee::Named(_),
                ..
            }
        ));
    }

    #[test]
    fn test_class_declaration() {
        let program = parse_ok(
            "<?php class Point extends Base { public $x = 0; private $y; function getX() { return $this->x; } }",
        );
        match program.tree.kind(program.roots[0]) {
            NodeKind::ClassDecl {
                name,
                parent,
                properties,
                methods,
            } => {
                assert_eq!(name, "Point");
                assert_eq!(parent.as_deref(), Some("Base"));
                assert_eq!(properties.len(), 2);
                assert_eq!(methods.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_include_with_dir_concat() {
        let program = parse_ok("<?php require_once __DIR__ . '/lib.php';");
        let expr = first_expr(&program);
        match program.tree.kind(expr) {
            NodeKind::Include { kind, path } => {
                assert_eq!(*kind, IncludeKind::RequireOnce);
                assert!(matches!(
                    program.tree.kind(*path),
                    NodeKind::Binary {
                        op: BinaryOp::Concat,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_if_elseif_else() {
        let program = parse_ok("<?php if ($a) { echo 1; } elseif ($b) { echo 2; } else { echo 3; }");
        match program.tree.kind(program.roots[0]) {
            NodeKind::If {
                elseifs,
                else_branch,
                ..
            } => {
                assert_eq!(elseifs.len(), 1);
                assert!(else_branch.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_foreach_with_key() {
        let program = parse_ok("<?php foreach ($items as $k => $v) { echo $v; }");
        match program.tree.kind(program.roots[0]) {
            NodeKind::Foreach {
                key_var, value_var, ..
            } => {
                assert_eq!(key_var.as_deref(), Some("k"));
                assert_eq!(value_var, "v");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_array_literals_both_forms() {
        let program = parse_ok("<?php [1, 'k' => 2]; array(3);");
        let short = first_expr(&program);
        match program.tree.kind(short) {
            NodeKind::ArrayLit(items) => {
                assert_eq!(items.len(), 2);
                assert!(items[0].key.is_none());
                assert!(items[1].key.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_comments_attach_to_statement() {
        let program = parse_ok("<?php // leading note\n$x = 1;");
        let stmt = program.roots[0];
        assert_eq!(program.tree.node(stmt).comments.len(), 1);
        assert_eq!(program.tree.node(stmt).comments[0].text, "leading note");
    }

    #[test]
    fn test_parse_error_is_value() {
        let err = parse("<?php $x = ;").unwrap_err();
        assert!(err.message.contains("expected expression"));
    }

    #[test]
    fn test_method_and_property_chain() {
        let program = parse_ok("<?php $obj->prop->method(1)[2];");
        let expr = first_expr(&program);
        assert!(matches!(
            program.tree.kind(expr),
            NodeKind::Index { .. }
        ));
    }

    #[test]
    fn test_pow_right_assoc_with_unary() {
        // -2 ** 2 parses as -(2 ** 2)
        let program = parse_ok("<?php -2 ** 2;");
        let expr = first_expr(&program);
        assert!(matches!(
            program.tree.kind(expr),
            NodeKind::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }
}
