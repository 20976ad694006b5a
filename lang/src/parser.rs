//! Recursive-descent parser for step programs.
//!
//! Total over the banned surface: `import`, `class`, `with`, `lambda`,
//! `yield`, and friends parse into `Banned` nodes rather than failing, so
//! the policy walk reports them under their own names. Genuine grammar
//! errors fail here with a position.

use thiserror::Error;

use crate::ast::{
    BinOp, BoolOp, CmpOp, CompFor, CompKind, ExceptHandler, Expr, Index, Module, Param, Stmt,
    Target, UnaryOp,
};
use crate::lexer::{LexError, lex};
use crate::token::{Keyword, Pos, Token, TokenKind};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("expected {expected} at {pos}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
        pos: Pos,
    },
}

/// Lex and parse a whole program.
pub fn parse(source: &str) -> Result<Module, ParseError> {
    parse_module(lex(source)?)
}

/// Parse an already-lexed token stream.
pub fn parse_module(tokens: Vec<Token>) -> Result<Module, ParseError> {
    let mut parser = Parser { tokens, at: 0 };
    let mut body = Vec::new();
    loop {
        parser.skip_newlines();
        if parser.check(&TokenKind::EndOfFile) {
            break;
        }
        body.push(parser.statement()?);
    }
    Ok(Module { body })
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The stream always ends with EndOfFile.
        self.tokens
            .get(self.at)
            .unwrap_or_else(|| &self.tokens[self.tokens.len() - 1])
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn pos(&self) -> Pos {
        self.peek().pos
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.at < self.tokens.len() - 1 {
            self.at += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, expected: &'static str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        ParseError::Unexpected {
            expected,
            found: format!("{:?}", self.peek_kind()),
            pos: self.pos(),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn ident(&mut self) -> Result<(String, Pos), ParseError> {
        let pos = self.pos();
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, pos))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        match self.peek_kind() {
            TokenKind::At => {
                self.skip_logical_line_and_block();
                Ok(Stmt::Banned {
                    construct: "decorator",
                    pos,
                })
            }
            TokenKind::Keyword(kw) => match kw {
                Keyword::If => self.if_statement(),
                Keyword::While => self.while_statement(),
                Keyword::For => self.for_statement(),
                Keyword::Def => self.def_statement(),
                Keyword::Try => self.try_statement(),
                Keyword::Class => Ok(self.banned_block("class")),
                Keyword::With => Ok(self.banned_block("with")),
                Keyword::Async => Ok(self.banned_block("async")),
                _ => self.simple_statement_line(),
            },
            _ => self.simple_statement_line(),
        }
    }

    /// A simple statement terminated by a newline. `;`-separated statement
    /// sequences are not part of the language.
    fn simple_statement_line(&mut self) -> Result<Stmt, ParseError> {
        let first = self.simple_statement()?;
        if self.check(&TokenKind::Semicolon) {
            return Err(self.unexpected("newline (one statement per line)"));
        }
        self.end_of_line()?;
        Ok(first)
    }

    fn end_of_line(&mut self) -> Result<(), ParseError> {
        if self.check(&TokenKind::Newline) {
            self.advance();
            Ok(())
        } else if self.check(&TokenKind::EndOfFile) || self.check(&TokenKind::Dedent) {
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }

    fn simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        if let TokenKind::Keyword(kw) = self.peek_kind() {
            match kw {
                Keyword::Pass => {
                    self.advance();
                    return Ok(Stmt::Pass { pos });
                }
                Keyword::Break => {
                    self.advance();
                    return Ok(Stmt::Break { pos });
                }
                Keyword::Continue => {
                    self.advance();
                    return Ok(Stmt::Continue { pos });
                }
                Keyword::Return => {
                    self.advance();
                    let value = if self.line_ended() {
                        None
                    } else {
                        Some(self.expr_list()?)
                    };
                    return Ok(Stmt::Return { value, pos });
                }
                Keyword::Import => return Ok(self.banned_simple("import")),
                Keyword::From => return Ok(self.banned_simple("import")),
                Keyword::Global => return Ok(self.banned_simple("global")),
                Keyword::Nonlocal => return Ok(self.banned_simple("nonlocal")),
                Keyword::Del => return Ok(self.banned_simple("del")),
                Keyword::Assert => return Ok(self.banned_simple("assert")),
                Keyword::Raise => return Ok(self.banned_simple("raise")),
                Keyword::Yield => return Ok(self.banned_simple("yield")),
                _ => {}
            }
        }
        self.assignment_or_expr()
    }

    fn line_ended(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::EndOfFile | TokenKind::Dedent | TokenKind::Semicolon
        )
    }

    fn assignment_or_expr(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        let first = self.expr_list()?;

        if let Some(op) = self.aug_op() {
            self.advance();
            let target = expr_to_target(first)?;
            let value = self.expr_list()?;
            return Ok(Stmt::AugAssign {
                target,
                op,
                value,
                pos,
            });
        }

        if self.check(&TokenKind::Eq) {
            let mut targets = vec![expr_to_target(first)?];
            let mut value = None;
            while self.eat(&TokenKind::Eq) {
                let next = self.expr_list()?;
                if self.check(&TokenKind::Eq) {
                    targets.push(expr_to_target(next)?);
                } else {
                    value = Some(next);
                }
            }
            let value = value.ok_or_else(|| self.unexpected("expression"))?;
            return Ok(Stmt::Assign {
                targets,
                value,
                pos,
            });
        }

        Ok(Stmt::Expr(first))
    }

    fn aug_op(&self) -> Option<BinOp> {
        match self.peek_kind() {
            TokenKind::PlusEq => Some(BinOp::Add),
            TokenKind::MinusEq => Some(BinOp::Sub),
            TokenKind::StarEq => Some(BinOp::Mul),
            TokenKind::SlashEq => Some(BinOp::Div),
            TokenKind::SlashSlashEq => Some(BinOp::FloorDiv),
            TokenKind::PercentEq => Some(BinOp::Mod),
            _ => None,
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        self.advance(); // if
        let mut branches = Vec::new();
        let test = self.ternary()?;
        let body = self.suite()?;
        branches.push((test, body));
        let mut orelse = Vec::new();
        loop {
            if self.check_kw(Keyword::Elif) {
                self.advance();
                let test = self.ternary()?;
                let body = self.suite()?;
                branches.push((test, body));
            } else if self.check_kw(Keyword::Else) {
                self.advance();
                orelse = self.suite()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If {
            branches,
            orelse,
            pos,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        self.advance(); // while
        let test = self.ternary()?;
        let body = self.suite()?;
        Ok(Stmt::While { test, body, pos })
    }

    fn for_statement(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        self.advance(); // for
        let target = self.target_list()?;
        if !self.eat_kw(Keyword::In) {
            return Err(self.unexpected("'in'"));
        }
        let iter = self.expr_list()?;
        let body = self.suite()?;
        Ok(Stmt::For {
            target,
            iter,
            body,
            pos,
        })
    }

    fn def_statement(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        self.advance(); // def
        let (name, _) = self.ident()?;
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if self.check(&TokenKind::Star) || self.check(&TokenKind::StarStar) {
                return Err(self.unexpected("parameter name (no starred parameters)"));
            }
            let (pname, ppos) = self.ident()?;
            let default = if self.eat(&TokenKind::Eq) {
                Some(self.ternary()?)
            } else {
                None
            };
            params.push(Param {
                name: pname,
                default,
                pos: ppos,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        let body = self.suite()?;
        Ok(Stmt::FuncDef {
            name,
            params,
            body,
            pos,
        })
    }

    fn try_statement(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        self.advance(); // try
        let body = self.suite()?;
        let mut handlers = Vec::new();
        while self.check_kw(Keyword::Except) {
            let hpos = self.pos();
            self.advance();
            let mut names = Vec::new();
            let mut alias = None;
            if !self.check(&TokenKind::Colon) {
                if self.eat(&TokenKind::LParen) {
                    loop {
                        let (name, _) = self.ident()?;
                        names.push(name);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen, "')'")?;
                } else {
                    let (name, _) = self.ident()?;
                    names.push(name);
                }
                if self.eat_kw(Keyword::As) {
                    let (name, _) = self.ident()?;
                    alias = Some(name);
                }
            }
            let hbody = self.suite()?;
            handlers.push(ExceptHandler {
                names,
                alias,
                body: hbody,
                pos: hpos,
            });
        }
        let mut finally = Vec::new();
        if self.check_kw(Keyword::Finally) {
            self.advance();
            finally = self.suite()?;
        }
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.unexpected("'except' or 'finally'"));
        }
        Ok(Stmt::Try {
            body,
            handlers,
            finally,
            pos,
        })
    }

    /// A block suite: `: NEWLINE INDENT stmt+ DEDENT`, or a single simple
    /// statement on the same line.
    fn suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&TokenKind::Colon, "':'")?;
        if self.eat(&TokenKind::Newline) {
            self.expect(&TokenKind::Indent, "indented block")?;
            let mut body = Vec::new();
            loop {
                self.skip_newlines();
                if self.eat(&TokenKind::Dedent) {
                    break;
                }
                if self.check(&TokenKind::EndOfFile) {
                    break;
                }
                body.push(self.statement()?);
            }
            if body.is_empty() {
                return Err(self.unexpected("statement"));
            }
            Ok(body)
        } else {
            let stmt = self.simple_statement()?;
            self.end_of_line()?;
            Ok(vec![stmt])
        }
    }

    /// Swallow a banned simple statement through end of line.
    fn banned_simple(&mut self, construct: &'static str) -> Stmt {
        let pos = self.pos();
        while !self.line_ended() && !self.check(&TokenKind::EndOfFile) {
            self.advance();
        }
        Stmt::Banned { construct, pos }
    }

    /// Swallow a banned block statement: its header line and, if present,
    /// the indented suite that follows.
    fn banned_block(&mut self, construct: &'static str) -> Stmt {
        let pos = self.pos();
        self.skip_logical_line_and_block();
        Stmt::Banned { construct, pos }
    }

    fn skip_logical_line_and_block(&mut self) {
        while !matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::EndOfFile
        ) {
            self.advance();
        }
        self.eat(&TokenKind::Newline);
        if self.check(&TokenKind::Indent) {
            let mut depth = 0usize;
            loop {
                match self.peek_kind() {
                    TokenKind::Indent => depth += 1,
                    TokenKind::Dedent => {
                        depth -= 1;
                        if depth == 0 {
                            self.advance();
                            break;
                        }
                    }
                    TokenKind::EndOfFile => break,
                    _ => {}
                }
                self.advance();
            }
        }
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    fn target_list(&mut self) -> Result<Target, ParseError> {
        let pos = self.pos();
        let first = self.ternary()?;
        if self.check(&TokenKind::Comma) {
            let mut targets = vec![expr_to_target(first)?];
            while self.eat(&TokenKind::Comma) {
                if self.check_kw(Keyword::In) {
                    break;
                }
                let next = self.ternary()?;
                targets.push(expr_to_target(next)?);
            }
            Ok(Target::Tuple(targets, pos))
        } else {
            expr_to_target(first)
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// An expression, or an unparenthesized tuple (`a, b`).
    fn expr_list(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        let first = self.ternary()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.line_ended() || self.check(&TokenKind::Eq) || self.aug_op().is_some() {
                break;
            }
            items.push(self.ternary()?);
        }
        Ok(Expr::Tuple(items, pos))
    }

    fn ternary(&mut self) -> Result<Expr, ParseError> {
        let body = self.or_test()?;
        if self.check_kw(Keyword::If) {
            let pos = body.pos();
            self.advance();
            let test = self.or_test()?;
            if !self.eat_kw(Keyword::Else) {
                return Err(self.unexpected("'else'"));
            }
            let orelse = self.ternary()?;
            return Ok(Expr::Cond {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
                pos,
            });
        }
        Ok(body)
    }

    fn or_test(&mut self) -> Result<Expr, ParseError> {
        let first = self.and_test()?;
        if !self.check_kw(Keyword::Or) {
            return Ok(first);
        }
        let pos = first.pos();
        let mut values = vec![first];
        while self.eat_kw(Keyword::Or) {
            values.push(self.and_test()?);
        }
        Ok(Expr::BoolChain {
            op: BoolOp::Or,
            values,
            pos,
        })
    }

    fn and_test(&mut self) -> Result<Expr, ParseError> {
        let first = self.not_test()?;
        if !self.check_kw(Keyword::And) {
            return Ok(first);
        }
        let pos = first.pos();
        let mut values = vec![first];
        while self.eat_kw(Keyword::And) {
            values.push(self.not_test()?);
        }
        Ok(Expr::BoolChain {
            op: BoolOp::And,
            values,
            pos,
        })
    }

    fn not_test(&mut self) -> Result<Expr, ParseError> {
        if self.check_kw(Keyword::Not) {
            let pos = self.pos();
            self.advance();
            let operand = self.not_test()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                pos,
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::NotEq,
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::LtEq => CmpOp::LtEq,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::GtEq => CmpOp::GtEq,
                TokenKind::Keyword(Keyword::In) => CmpOp::In,
                TokenKind::Keyword(Keyword::Is) => {
                    self.advance();
                    let op = if self.eat_kw(Keyword::Not) {
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    };
                    rest.push((op, self.arith()?));
                    continue;
                }
                TokenKind::Keyword(Keyword::Not) => {
                    self.advance();
                    if !self.eat_kw(Keyword::In) {
                        return Err(self.unexpected("'in' after 'not'"));
                    }
                    rest.push((CmpOp::NotIn, self.arith()?));
                    continue;
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            let pos = left.pos();
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
                pos,
            })
        }
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let pos = left.pos();
            self.advance();
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let pos = left.pos();
            self.advance();
            let right = self.factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        match self.peek_kind() {
            TokenKind::Minus => {
                self.advance();
                let operand = self.factor()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                    pos,
                })
            }
            TokenKind::Plus => {
                self.advance();
                let operand = self.factor()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Pos,
                    operand: Box::new(operand),
                    pos,
                })
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.check(&TokenKind::StarStar) {
            let pos = base.pos();
            self.advance();
            // Right-associative, binds tighter than unary on the right.
            let exp = self.factor()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exp),
                pos,
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    let pos = self.pos();
                    self.advance();
                    let (args, kwargs) = self.call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                        pos,
                    };
                }
                TokenKind::LBracket => {
                    let pos = self.pos();
                    self.advance();
                    let index = self.subscript_index()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                        pos,
                    };
                }
                TokenKind::Dot => {
                    let pos = self.pos();
                    self.advance();
                    let (attr, _) = self.ident()?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                        pos,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if self.check(&TokenKind::Star) || self.check(&TokenKind::StarStar) {
                let pos = self.pos();
                self.advance();
                let _ = self.ternary()?;
                args.push(Expr::Banned {
                    construct: "starred_argument",
                    pos,
                });
            } else if let TokenKind::Ident(name) = self.peek_kind().clone() {
                // Lookahead for `name=expr` keyword argument.
                if self.tokens.get(self.at + 1).map(|t| &t.kind) == Some(&TokenKind::Eq) {
                    self.advance();
                    self.advance();
                    let value = self.ternary()?;
                    kwargs.push((name, value));
                } else {
                    args.push(self.ternary()?);
                }
            } else {
                args.push(self.ternary()?);
            }
            // A bare generator expression may be the sole argument, as in
            // `sum(d.length for d in ctx.docs())`.
            if args.len() == 1 && kwargs.is_empty() && self.check_kw(Keyword::For) {
                let element = args.pop().unwrap_or(Expr::Tuple(Vec::new(), self.pos()));
                let pos = element.pos();
                let fors = self.comp_clauses()?;
                args.push(Expr::Comp {
                    kind: CompKind::Generator,
                    key: Box::new(element),
                    value: None,
                    fors,
                    pos,
                });
                break;
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn subscript_index(&mut self) -> Result<Index, ParseError> {
        // `[:hi]`, `[lo:]`, `[lo:hi]`, `[:]`, or a plain item.
        if self.check(&TokenKind::Colon) {
            self.advance();
            let upper = if self.check(&TokenKind::RBracket) {
                None
            } else {
                Some(self.ternary()?)
            };
            return Ok(Index::Slice { lower: None, upper });
        }
        let first = self.ternary()?;
        if self.eat(&TokenKind::Colon) {
            let upper = if self.check(&TokenKind::RBracket) {
                None
            } else {
                Some(self.ternary()?)
            };
            Ok(Index::Slice {
                lower: Some(first),
                upper,
            })
        } else {
            Ok(Index::Item(first))
        }
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        match self.peek_kind().clone() {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::Int(value, pos))
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expr::Float(value, pos))
            }
            TokenKind::Str(value) => {
                self.advance();
                // Adjacent string literals concatenate.
                let mut text = value;
                while let TokenKind::Str(next) = self.peek_kind().clone() {
                    self.advance();
                    text.push_str(&next);
                }
                Ok(Expr::Str(text, pos))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Name(name, pos))
            }
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                Ok(Expr::None(pos))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool(true, pos))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool(false, pos))
            }
            TokenKind::Keyword(Keyword::Lambda) => {
                // Swallow `lambda params: body` far enough to stay in sync.
                self.advance();
                while !matches!(
                    self.peek_kind(),
                    TokenKind::Colon | TokenKind::Newline | TokenKind::EndOfFile
                ) {
                    self.advance();
                }
                if self.eat(&TokenKind::Colon) {
                    let _ = self.ternary()?;
                }
                Ok(Expr::Banned {
                    construct: "lambda",
                    pos,
                })
            }
            TokenKind::Keyword(Keyword::Yield) => {
                self.advance();
                if self.eat_kw(Keyword::From) {
                    let _ = self.ternary()?;
                } else if !self.line_ended() && !self.check(&TokenKind::RParen) {
                    let _ = self.expr_list()?;
                }
                Ok(Expr::Banned {
                    construct: "yield",
                    pos,
                })
            }
            TokenKind::Keyword(Keyword::Await) => {
                self.advance();
                let _ = self.ternary()?;
                Ok(Expr::Banned {
                    construct: "await",
                    pos,
                })
            }
            TokenKind::LParen => self.paren_atom(pos),
            TokenKind::LBracket => self.list_atom(pos),
            TokenKind::LBrace => self.brace_atom(pos),
            TokenKind::Star => {
                self.advance();
                let _ = self.ternary()?;
                Ok(Expr::Banned {
                    construct: "starred_expression",
                    pos,
                })
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn paren_atom(&mut self, pos: Pos) -> Result<Expr, ParseError> {
        self.advance(); // (
        if self.eat(&TokenKind::RParen) {
            return Ok(Expr::Tuple(Vec::new(), pos));
        }
        let first = self.ternary()?;
        if self.check_kw(Keyword::For) {
            let fors = self.comp_clauses()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Expr::Comp {
                kind: CompKind::Generator,
                key: Box::new(first),
                value: None,
                fors,
                pos,
            });
        }
        if self.check(&TokenKind::Comma) {
            let mut items = vec![first];
            while self.eat(&TokenKind::Comma) {
                if self.check(&TokenKind::RParen) {
                    break;
                }
                items.push(self.ternary()?);
            }
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Expr::Tuple(items, pos));
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(first)
    }

    fn list_atom(&mut self, pos: Pos) -> Result<Expr, ParseError> {
        self.advance(); // [
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::List(Vec::new(), pos));
        }
        let first = self.ternary()?;
        if self.check_kw(Keyword::For) {
            let fors = self.comp_clauses()?;
            self.expect(&TokenKind::RBracket, "']'")?;
            return Ok(Expr::Comp {
                kind: CompKind::List,
                key: Box::new(first),
                value: None,
                fors,
                pos,
            });
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.ternary()?);
        }
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Expr::List(items, pos))
    }

    fn brace_atom(&mut self, pos: Pos) -> Result<Expr, ParseError> {
        self.advance(); // {
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::Dict {
                items: Vec::new(),
                pos,
            });
        }
        let first = self.ternary()?;
        if self.eat(&TokenKind::Colon) {
            // Dict display or dict comprehension.
            let value = self.ternary()?;
            if self.check_kw(Keyword::For) {
                let fors = self.comp_clauses()?;
                self.expect(&TokenKind::RBrace, "'}'")?;
                return Ok(Expr::Comp {
                    kind: CompKind::Dict,
                    key: Box::new(first),
                    value: Some(Box::new(value)),
                    fors,
                    pos,
                });
            }
            let mut items = vec![(first, value)];
            while self.eat(&TokenKind::Comma) {
                if self.check(&TokenKind::RBrace) {
                    break;
                }
                let k = self.ternary()?;
                self.expect(&TokenKind::Colon, "':'")?;
                let v = self.ternary()?;
                items.push((k, v));
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            return Ok(Expr::Dict { items, pos });
        }
        // Set display or set comprehension.
        if self.check_kw(Keyword::For) {
            let fors = self.comp_clauses()?;
            self.expect(&TokenKind::RBrace, "'}'")?;
            return Ok(Expr::Comp {
                kind: CompKind::Set,
                key: Box::new(first),
                value: None,
                fors,
                pos,
            });
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            items.push(self.ternary()?);
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::Set(items, pos))
    }

    fn comp_clauses(&mut self) -> Result<Vec<CompFor>, ParseError> {
        let mut fors = Vec::new();
        while self.check_kw(Keyword::For) {
            self.advance();
            let target = self.comp_target()?;
            if !self.eat_kw(Keyword::In) {
                return Err(self.unexpected("'in'"));
            }
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.check_kw(Keyword::If) {
                self.advance();
                ifs.push(self.or_test()?);
            }
            fors.push(CompFor { target, iter, ifs });
        }
        Ok(fors)
    }

    fn comp_target(&mut self) -> Result<Target, ParseError> {
        let pos = self.pos();
        let first = self.postfix()?;
        if self.check(&TokenKind::Comma) {
            let mut targets = vec![expr_to_target(first)?];
            while self.eat(&TokenKind::Comma) {
                if self.check_kw(Keyword::In) {
                    break;
                }
                targets.push(expr_to_target(self.postfix()?)?);
            }
            Ok(Target::Tuple(targets, pos))
        } else {
            expr_to_target(first)
        }
    }
}

/// Reinterpret an expression as an assignment target.
fn expr_to_target(expr: Expr) -> Result<Target, ParseError> {
    match expr {
        Expr::Name(name, pos) => Ok(Target::Name(name, pos)),
        Expr::Subscript { value, index, pos } => match *index {
            Index::Item(item) => Ok(Target::Subscript {
                value: *value,
                index: item,
                pos,
            }),
            Index::Slice { .. } => Err(ParseError::Unexpected {
                expected: "assignment target",
                found: "slice".to_string(),
                pos,
            }),
        },
        Expr::Attribute { value, attr, pos } => Ok(Target::Attribute {
            value: *value,
            attr,
            pos,
        }),
        Expr::Tuple(items, pos) | Expr::List(items, pos) => {
            let targets = items
                .into_iter()
                .map(expr_to_target)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Target::Tuple(targets, pos))
        }
        other => Err(ParseError::Unexpected {
            expected: "assignment target",
            found: format!("{other:?}"),
            pos: other.pos(),
        }),
    }
}
