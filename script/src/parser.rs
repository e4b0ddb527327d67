use std::rc::Rc;

use crate::{
    ast::{
        BinaryOp, DeclKind, Expr, FunctionBody, FunctionDef, LogicalOp, ObjectProp, Param,
        PropKey, Stmt, SwitchCase, UnaryOp,
    },
    lexer::{LexError, Lexer, Tok, Token},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            offset: err.offset,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Nested statements, expressions and unary operators allowed before the
/// parser gives up. Keeps recursion in the parser and the evaluator bounded.
pub const MAX_NESTING: usize = 128;

pub fn parse_program(src: &str) -> PResult<Vec<Stmt>> {
    Parser::new(Lexer::new(src).tokenize()?).program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

fn binary_precedence(tok: &Tok) -> Option<(BinOrLogical, u8)> {
    let Tok::Punct(p) = tok else {
        return match tok {
            Tok::Ident(k) if k == "in" => Some((BinOrLogical::Bin(BinaryOp::In), 5)),
            Tok::Ident(k) if k == "instanceof" => {
                Some((BinOrLogical::Bin(BinaryOp::InstanceOf), 5))
            }
            _ => None,
        };
    };
    Some(match *p {
        "??" => (BinOrLogical::Logical(LogicalOp::Nullish), 1),
        "||" => (BinOrLogical::Logical(LogicalOp::Or), 2),
        "&&" => (BinOrLogical::Logical(LogicalOp::And), 3),
        "==" => (BinOrLogical::Bin(BinaryOp::Eq), 4),
        "!=" => (BinOrLogical::Bin(BinaryOp::NotEq), 4),
        "===" => (BinOrLogical::Bin(BinaryOp::StrictEq), 4),
        "!==" => (BinOrLogical::Bin(BinaryOp::StrictNotEq), 4),
        "<" => (BinOrLogical::Bin(BinaryOp::Lt), 5),
        ">" => (BinOrLogical::Bin(BinaryOp::Gt), 5),
        "<=" => (BinOrLogical::Bin(BinaryOp::Le), 5),
        ">=" => (BinOrLogical::Bin(BinaryOp::Ge), 5),
        "+" => (BinOrLogical::Bin(BinaryOp::Add), 6),
        "-" => (BinOrLogical::Bin(BinaryOp::Sub), 6),
        "*" => (BinOrLogical::Bin(BinaryOp::Mul), 7),
        "/" => (BinOrLogical::Bin(BinaryOp::Div), 7),
        "%" => (BinOrLogical::Bin(BinaryOp::Mod), 7),
        _ => return None,
    })
}

#[derive(Clone, Copy)]
enum BinOrLogical {
    Bin(BinaryOp),
    Logical(LogicalOp),
}

fn compound_assign_op(p: &str) -> Option<Option<BinaryOp>> {
    Some(match p {
        "=" => None,
        "+=" => Some(BinaryOp::Add),
        "-=" => Some(BinaryOp::Sub),
        "*=" => Some(BinaryOp::Mul),
        "/=" => Some(BinaryOp::Div),
        "%=" => Some(BinaryOp::Mod),
        _ => return None,
    })
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Tok {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn next(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(ParseError {
            message: message.into(),
            offset: self.offset(),
        })
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return self.error(format!("nesting deeper than {MAX_NESTING} levels"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Left-nested chains (`a + b + c`, `a.b.c`) build deep trees without recursing
    /// here; count their links against the same budget.
    fn link(&self, links: &mut usize) -> PResult<()> {
        *links += 1;
        if self.depth + *links > MAX_NESTING {
            return self.error(format!("nesting deeper than {MAX_NESTING} levels"));
        }
        Ok(())
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Tok::Num(n) => format!("number `{n}`"),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Template { .. } => "template literal".to_string(),
            Tok::Ident(name) => format!("`{name}`"),
            Tok::Punct(p) => format!("`{p}`"),
            Tok::Eof => "end of input".to_string(),
        }
    }

    fn unexpected<T>(&self) -> PResult<T> {
        self.error(format!("unexpected {}", self.describe_current()))
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn is_keyword(&self, k: &str) -> bool {
        matches!(self.peek(), Tok::Ident(name) if name == k)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.next();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.is_keyword(k) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            self.error(format!("expected `{p}`, found {}", self.describe_current()))
        }
    }

    fn ident(&mut self) -> PResult<String> {
        match self.peek() {
            Tok::Ident(name) if !is_reserved(name) => {
                let name = name.clone();
                self.next();
                Ok(name)
            }
            _ => self.unexpected(),
        }
    }

    fn consume_semi(&mut self) {
        self.eat_punct(";");
    }

    fn program(mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while *self.peek() != Tok::Eof {
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if *self.peek() == Tok::Eof {
                return self.error("expected `}`, found end of input");
            }
            body.push(self.statement()?);
        }
        self.next();
        Ok(body)
    }

    fn statement(&mut self) -> PResult<Stmt> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        let Tok::Ident(word) = self.peek().clone() else {
            return self.expression_statement();
        };
        match word.as_str() {
            "var" | "let" | "const" => {
                let stmt = self.var_declaration()?;
                self.consume_semi();
                Ok(stmt)
            }
            "function" if matches!(self.peek_at(1), Tok::Ident(_)) => {
                self.next();
                let def = self.function_rest(true)?;
                Ok(Stmt::Function(Rc::new(def)))
            }
            "return" => {
                self.next();
                let value = if self.is_punct(";") || self.is_punct("}") || *self.peek() == Tok::Eof
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semi();
                Ok(Stmt::Return(value))
            }
            "if" => {
                self.next();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_keyword("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    test,
                    then,
                    otherwise,
                })
            }
            "while" => {
                self.next();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            "do" => {
                self.next();
                let body = Box::new(self.statement()?);
                if !self.eat_keyword("while") {
                    return self.error("expected `while` after `do` body");
                }
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                self.consume_semi();
                Ok(Stmt::DoWhile { body, test })
            }
            "for" => self.for_statement(),
            "switch" => self.switch_statement(),
            "break" => {
                self.next();
                self.consume_semi();
                Ok(Stmt::Break)
            }
            "continue" => {
                self.next();
                self.consume_semi();
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.next();
                let value = self.expression()?;
                self.consume_semi();
                Ok(Stmt::Throw(value))
            }
            "try" => self.try_statement(),
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.expression()?;
        self.consume_semi();
        Ok(Stmt::Expr(expr))
    }

    fn decl_kind(&mut self) -> Option<DeclKind> {
        let kind = match self.peek() {
            Tok::Ident(k) if k == "var" => DeclKind::Var,
            Tok::Ident(k) if k == "let" => DeclKind::Let,
            Tok::Ident(k) if k == "const" => DeclKind::Const,
            _ => return None,
        };
        self.next();
        Some(kind)
    }

    fn var_declaration(&mut self) -> PResult<Stmt> {
        let Some(kind) = self.decl_kind() else {
            return self.unexpected();
        };
        self.declarators(kind, None)
    }

    fn declarators(&mut self, kind: DeclKind, first: Option<String>) -> PResult<Stmt> {
        let mut decls = Vec::new();
        let mut pending = first;
        loop {
            let name = match pending.take() {
                Some(name) => name,
                None => self.ident()?,
            };
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return self.error(format!("missing initializer in const declaration `{name}`"));
            }
            decls.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Var { kind, decls })
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        self.next();
        self.expect_punct("(")?;

        let kind = self.decl_kind();
        let head_name = match (self.peek(), self.peek_at(1)) {
            (Tok::Ident(name), Tok::Ident(k)) if k == "of" || k == "in" => Some(name.clone()),
            _ => None,
        };
        if let Some(name) = head_name {
            self.next();
            let is_of = self.eat_keyword("of");
            if !is_of {
                self.next();
            }
            let target = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.statement()?);
            return Ok(if is_of {
                Stmt::ForOf {
                    kind,
                    name,
                    iterable: target,
                    body,
                }
            } else {
                Stmt::ForIn {
                    kind,
                    name,
                    object: target,
                    body,
                }
            });
        }

        let init = match kind {
            Some(kind) => Some(Box::new(self.declarators(kind, None)?)),
            None if self.is_punct(";") => None,
            None => Some(Box::new(Stmt::Expr(self.expression()?))),
        };
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn switch_statement(&mut self) -> PResult<Stmt> {
        self.next();
        self.expect_punct("(")?;
        let discriminant = self.expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        while !self.eat_punct("}") {
            let test = if self.eat_keyword("case") {
                Some(self.expression()?)
            } else if self.eat_keyword("default") {
                None
            } else {
                return self.unexpected();
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !(self.is_keyword("case") || self.is_keyword("default") || self.is_punct("}")) {
                if *self.peek() == Tok::Eof {
                    return self.error("expected `}`, found end of input");
                }
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(Stmt::Switch {
            discriminant,
            cases,
        })
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        self.next();
        let block = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.ident()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return self.error("`try` without `catch` or `finally`");
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    /// After the `function` keyword.
    fn function_rest(&mut self, require_name: bool) -> PResult<FunctionDef> {
        let name = if require_name || matches!(self.peek(), Tok::Ident(_)) {
            Some(self.ident()?)
        } else {
            None
        };
        let params = self.params()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(FunctionDef {
            name,
            params,
            body,
            is_arrow: false,
        })
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            let rest = self.eat_punct("...");
            let name = self.ident()?;
            let default = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            params.push(Param {
                name,
                default,
                rest,
            });
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(params)
    }

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn arrow_ahead(&self) -> bool {
        match self.peek() {
            Tok::Ident(name) if !is_reserved(name) => {
                matches!(self.peek_at(1), Tok::Punct("=>"))
            }
            Tok::Punct("(") => {
                let mut depth = 0usize;
                let mut n = 0;
                loop {
                    match self.peek_at(n) {
                        Tok::Punct("(") => depth += 1,
                        Tok::Punct(")") => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(self.peek_at(n + 1), Tok::Punct("=>"));
                            }
                        }
                        Tok::Eof => return false,
                        _ => {}
                    }
                    n += 1;
                }
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> PResult<Expr> {
        let params = if self.is_punct("(") {
            self.params()?
        } else {
            vec![Param {
                name: self.ident()?,
                default: None,
                rest: false,
            }]
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(Box::new(self.assignment()?))
        };
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            body,
            is_arrow: true,
        })))
    }

    fn assignment(&mut self) -> PResult<Expr> {
        self.nested(Self::assignment_inner)
    }

    fn assignment_inner(&mut self) -> PResult<Expr> {
        if self.arrow_ahead() {
            return self.arrow();
        }
        let target = self.conditional()?;
        let Tok::Punct(p) = self.peek() else {
            return Ok(target);
        };
        let Some(op) = compound_assign_op(p) else {
            return Ok(target);
        };
        if !target.is_assignable() {
            return self.error("invalid assignment target");
        }
        self.next();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let test = self.binary(1)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.unary()?;
        let mut links = 0;
        while let Some((op, prec)) = binary_precedence(self.peek()) {
            if prec < min_prec {
                break;
            }
            self.link(&mut links)?;
            self.next();
            let right = self.binary(prec + 1)?;
            left = match op {
                BinOrLogical::Bin(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                BinOrLogical::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Punct("!") => Some(UnaryOp::Not),
            Tok::Punct("-") => Some(UnaryOp::Neg),
            Tok::Punct("+") => Some(UnaryOp::Plus),
            Tok::Ident(k) if k == "typeof" => Some(UnaryOp::TypeOf),
            Tok::Ident(k) if k == "void" => Some(UnaryOp::Void),
            Tok::Ident(k) if k == "delete" => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.next();
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.next() == Tok::Punct("++");
            let target = self.unary()?;
            if !target.is_assignable() {
                return self.error("invalid update target");
            }
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let expr = self.call_member()?;
        if (self.is_punct("++") || self.is_punct("--")) && expr.is_assignable() {
            let increment = self.next() == Tok::Punct("++");
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> PResult<Vec<Expr>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            if self.eat_punct("...") {
                args.push(Expr::Spread(Box::new(self.assignment()?)));
            } else {
                args.push(self.assignment()?);
            }
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(args)
    }

    /// Property names after `.` may be reserved words.
    fn property_name(&mut self) -> PResult<String> {
        match self.peek() {
            Tok::Ident(name) => {
                let name = name.clone();
                self.next();
                Ok(name)
            }
            _ => self.unexpected(),
        }
    }

    fn call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.eat_keyword("new") {
            let callee = self.member_only()?;
            let args = if self.is_punct("(") {
                self.arguments()?
            } else {
                Vec::new()
            };
            Expr::New {
                callee: Box::new(callee),
                args,
            }
        } else {
            self.primary()?
        };

        let mut links = 0;
        loop {
            self.link(&mut links)?;
            if self.eat_punct(".") {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.is_punct("(") {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let index = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Callee of `new`: a primary with member accesses but no calls.
    fn member_only(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        let mut links = 0;
        loop {
            self.link(&mut links)?;
            if self.eat_punct(".") {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Tok::Num(n) => {
                self.next();
                Ok(Expr::Number(n))
            }
            Tok::Str(s) => {
                self.next();
                Ok(Expr::Str(s.into()))
            }
            Tok::Template { quasis, exprs } => {
                self.next();
                let mut parsed = Vec::with_capacity(exprs.len());
                for (src, base) in exprs {
                    let tokens = Lexer::with_base(&src, base).tokenize()?;
                    let mut sub = Parser::new(tokens);
                    sub.depth = self.depth;
                    let expr = sub.expression()?;
                    if *sub.peek() != Tok::Eof {
                        return sub.unexpected();
                    }
                    parsed.push(expr);
                }
                Ok(Expr::Template {
                    quasis,
                    exprs: parsed,
                })
            }
            Tok::Punct("(") => {
                self.next();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => {
                self.next();
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    if self.eat_punct("...") {
                        items.push(Expr::Spread(Box::new(self.assignment()?)));
                    } else {
                        items.push(self.assignment()?);
                    }
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Tok::Punct("{") => self.object_literal(),
            Tok::Ident(word) => match word.as_str() {
                "true" => {
                    self.next();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.next();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.next();
                    Ok(Expr::Null)
                }
                "undefined" => {
                    self.next();
                    Ok(Expr::Undefined)
                }
                "this" => {
                    self.next();
                    Ok(Expr::This)
                }
                "function" => {
                    self.next();
                    Ok(Expr::Function(Rc::new(self.function_rest(false)?)))
                }
                _ if is_reserved(&word) => self.unexpected(),
                _ => {
                    self.next();
                    Ok(Expr::Ident(word))
                }
            },
            _ => self.unexpected(),
        }
    }

    fn object_literal(&mut self) -> PResult<Expr> {
        self.expect_punct("{")?;
        let mut props = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct("...") {
                props.push(ObjectProp::Spread(self.assignment()?));
            } else {
                let (key, shorthand) = match self.peek().clone() {
                    Tok::Ident(name) => {
                        self.next();
                        (PropKey::Static(name.clone()), Some(name))
                    }
                    Tok::Str(s) => {
                        self.next();
                        (PropKey::Static(s), None)
                    }
                    Tok::Num(n) => {
                        self.next();
                        (PropKey::Static(crate::value::number_to_string(n)), None)
                    }
                    Tok::Punct("[") => {
                        self.next();
                        let key = self.expression()?;
                        self.expect_punct("]")?;
                        (PropKey::Computed(key), None)
                    }
                    _ => return self.unexpected(),
                };
                let value = if self.eat_punct(":") {
                    self.assignment()?
                } else if self.is_punct("(") {
                    let params = self.params()?;
                    let body = FunctionBody::Block(self.block()?);
                    let name = match &key {
                        PropKey::Static(name) => Some(name.clone()),
                        PropKey::Computed(_) => None,
                    };
                    Expr::Function(Rc::new(FunctionDef {
                        name,
                        params,
                        body,
                        is_arrow: false,
                    }))
                } else {
                    match shorthand {
                        Some(name) if !is_reserved(&name) => Expr::Ident(name),
                        _ => return self.unexpected(),
                    }
                };
                props.push(ObjectProp::KeyValue(key, value));
            }
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(props))
    }
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "var"
            | "let"
            | "const"
            | "function"
            | "return"
            | "if"
            | "else"
            | "for"
            | "while"
            | "do"
            | "break"
            | "continue"
            | "throw"
            | "try"
            | "catch"
            | "finally"
            | "new"
            | "typeof"
            | "delete"
            | "void"
            | "in"
            | "instanceof"
            | "switch"
            | "case"
            | "default"
            | "true"
            | "false"
            | "null"
            | "this"
            | "class"
            | "import"
            | "export"
    )
}
