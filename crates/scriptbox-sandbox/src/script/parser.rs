//! Recursive-descent parser producing [`Stmt`] trees.

use super::ast::*;
use super::error::SyntaxError;
use super::lexer::{tokenize, Tok, Token};

/// Maximum nesting of expressions and blocks.
const MAX_NESTING: usize = 100;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Parses a whole program.
pub fn parse_module(source: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, 0);
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        body.extend(parser.statement()?);
    }
    Ok(body)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    loop_depth: usize,
    func_depth: usize,
    /// Added to every reported line (f-string fields are parsed standalone).
    line_offset: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, line_offset: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            loop_depth: 0,
            func_depth: 0,
            line_offset,
        }
    }

    // ---- token helpers ----

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        let line = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1);
        line + self.line_offset
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.line())
    }

    fn unexpected(&self) -> SyntaxError {
        let found = match self.peek() {
            Tok::Newline => "end of line".to_string(),
            Tok::Eof => "end of input".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Name(n) => format!("'{}'", n),
            other => format!("{:?}", other),
        };
        self.error(format!("invalid syntax: unexpected {}", found))
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), SyntaxError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), SyntaxError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn identifier(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Tok::Name(n) if !is_keyword(&n) => {
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn enter(&mut self) -> Result<(), SyntaxError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("too many nested expressions or blocks"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let line = self.line();
        let Tok::Name(word) = self.peek().clone() else {
            return self.simple_statements();
        };
        let kind = match word.as_str() {
            "if" => {
                self.pos += 1;
                self.if_statement()?
            }
            "while" => {
                self.pos += 1;
                let test = self.test()?;
                let body = self.loop_block()?;
                let orelse = self.else_block()?;
                StmtKind::While { test, body, orelse }
            }
            "for" => {
                self.pos += 1;
                self.for_statement()?
            }
            "try" => {
                self.pos += 1;
                self.try_statement()?
            }
            "def" => {
                self.pos += 1;
                self.function_def(false)?
            }
            "class" => {
                self.pos += 1;
                self.class_def()?
            }
            "async" => {
                self.pos += 1;
                if self.eat_keyword("def") {
                    self.function_def(true)?
                } else {
                    return Err(self.error("'async' is only supported before 'def'"));
                }
            }
            "with" => return Err(self.error("'with' statements are not supported")),
            _ => return self.simple_statements(),
        };
        Ok(vec![Stmt { kind, line }])
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        if self.at(&Tok::At) {
            return Err(self.error("decorators are not supported"));
        }
        let mut out = Vec::new();
        loop {
            let line = self.line();
            let kind = self.small_statement()?;
            out.push(Stmt { kind, line });
            if self.eat(&Tok::Semicolon) {
                if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) {
            return Err(self.unexpected());
        }
        Ok(out)
    }

    fn small_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        if let Tok::Name(word) = self.peek().clone() {
            match word.as_str() {
                "pass" => {
                    self.pos += 1;
                    return Ok(StmtKind::Pass);
                }
                "break" | "continue" => {
                    if self.loop_depth == 0 {
                        return Err(self.error(format!("'{}' outside loop", word)));
                    }
                    self.pos += 1;
                    return Ok(if word == "break" {
                        StmtKind::Break
                    } else {
                        StmtKind::Continue
                    });
                }
                "return" => {
                    if self.func_depth == 0 {
                        return Err(self.error("'return' outside function"));
                    }
                    self.pos += 1;
                    let value = if self.at_statement_end() {
                        None
                    } else {
                        Some(self.testlist()?)
                    };
                    return Ok(StmtKind::Return(value));
                }
                "raise" => {
                    self.pos += 1;
                    let exc = if self.at_statement_end() {
                        None
                    } else {
                        Some(self.test()?)
                    };
                    if self.at_keyword("from") {
                        return Err(self.error("'raise ... from' is not supported"));
                    }
                    return Ok(StmtKind::Raise(exc));
                }
                "assert" => {
                    self.pos += 1;
                    let test = self.test()?;
                    let msg = if self.eat(&Tok::Comma) {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    return Ok(StmtKind::Assert { test, msg });
                }
                "import" => {
                    self.pos += 1;
                    return self.import_statement();
                }
                "from" => {
                    self.pos += 1;
                    return self.import_from_statement();
                }
                "del" => {
                    self.pos += 1;
                    let mut targets = vec![self.arith()?];
                    while self.eat(&Tok::Comma) {
                        if self.at_statement_end() {
                            break;
                        }
                        targets.push(self.arith()?);
                    }
                    return Ok(StmtKind::Delete(targets));
                }
                "global" | "nonlocal" | "yield" | "with" | "await" => {
                    return Err(self.error(format!("'{}' is not supported", word)));
                }
                _ => {}
            }
        }
        self.expression_statement()
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Semicolon | Tok::Eof)
    }

    fn expression_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let first = self.testlist()?;

        let aug = match self.peek() {
            Tok::PlusEq => Some(BinOp::Add),
            Tok::MinusEq => Some(BinOp::Sub),
            Tok::StarEq => Some(BinOp::Mul),
            Tok::SlashEq => Some(BinOp::Div),
            Tok::DoubleSlashEq => Some(BinOp::FloorDiv),
            Tok::PercentEq => Some(BinOp::Mod),
            Tok::DoubleStarEq => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.pos += 1;
            if !matches!(
                first,
                Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }
            ) {
                return Err(self.error("illegal target for augmented assignment"));
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        if self.at(&Tok::Colon) {
            return Err(self.error("annotated assignments are not supported"));
        }

        if !self.at(&Tok::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut exprs = vec![first];
        while self.eat(&Tok::Assign) {
            exprs.push(self.testlist()?);
        }
        let value = exprs.pop().ok_or_else(|| self.unexpected())?;
        for target in &exprs {
            if !target.is_assign_target() {
                return Err(self.error(format!("cannot assign to {}", target.name())));
            }
        }
        Ok(StmtKind::Assign {
            targets: exprs,
            value,
        })
    }

    fn dotted_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.identifier()?;
        while self.eat(&Tok::Dot) {
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    fn import_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let mut names = Vec::new();
        loop {
            let name = self.dotted_name()?;
            let asname = if self.eat_keyword("as") {
                Some(self.identifier()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn import_from_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        if self.at(&Tok::Dot) {
            return Err(self.error("relative imports are not supported"));
        }
        let module = self.dotted_name()?;
        self.expect_keyword("import")?;

        let mut names = Vec::new();
        if self.eat(&Tok::Star) {
            names.push(Alias {
                name: "*".to_string(),
                asname: None,
            });
            return Ok(StmtKind::ImportFrom { module, names });
        }
        let parenthesized = self.eat(&Tok::LParen);
        loop {
            if parenthesized && self.at(&Tok::RParen) {
                break;
            }
            let name = self.identifier()?;
            let asname = if self.eat_keyword("as") {
                Some(self.identifier()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        if parenthesized {
            self.expect(Tok::RParen, "')'")?;
        }
        if names.is_empty() {
            return Err(self.error("expected names to import"));
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(Tok::Colon, "':'")?;
        self.enter()?;
        let body = if self.eat(&Tok::Newline) {
            if !self.eat(&Tok::Indent) {
                return Err(self.error("expected an indented block"));
            }
            let mut body = Vec::new();
            while !self.eat(&Tok::Dedent) {
                if self.at(&Tok::Eof) {
                    break;
                }
                if self.eat(&Tok::Newline) {
                    continue;
                }
                body.extend(self.statement()?);
            }
            body
        } else {
            self.simple_statements()?
        };
        self.leave();
        Ok(body)
    }

    fn loop_block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        body
    }

    fn else_block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        if self.eat_keyword("else") {
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn if_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.at_keyword("elif") {
            let line = self.line();
            self.pos += 1;
            let kind = self.if_statement()?;
            vec![Stmt { kind, line }]
        } else {
            self.else_block()?
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn for_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.testlist()?;
        let body = self.loop_block()?;
        let orelse = self.else_block()?;
        Ok(StmtKind::For {
            target,
            iter,
            body,
            orelse,
        })
    }

    /// Loop and comprehension targets; parsed below the comparison level so
    /// `in` is left for the caller.
    fn target_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.arith()?;
        let target = if self.at(&Tok::Comma) {
            let mut items = vec![first];
            while self.eat(&Tok::Comma) {
                if self.at_keyword("in") {
                    break;
                }
                items.push(self.arith()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        if !target.is_assign_target() {
            return Err(self.error(format!("cannot assign to {}", target.name())));
        }
        Ok(target)
    }

    fn try_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.at_keyword("except") {
            let line = self.line();
            self.pos += 1;
            let mut kinds = Vec::new();
            let mut binding = None;
            if !self.at(&Tok::Colon) {
                match self.test()? {
                    Expr::Name(n) => kinds.push(n),
                    Expr::Tuple(items) => {
                        for item in items {
                            match item {
                                Expr::Name(n) => kinds.push(n),
                                _ => return Err(self.error("except clause expects exception names")),
                            }
                        }
                    }
                    _ => return Err(self.error("except clause expects exception names")),
                }
                if self.eat_keyword("as") {
                    binding = Some(self.identifier()?);
                }
            }
            let handler_body = self.block()?;
            handlers.push(Handler {
                kinds,
                binding,
                body: handler_body,
                line,
            });
        }
        let orelse = if !handlers.is_empty() {
            self.else_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_keyword("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    /// Skips a balanced parenthesised group starting at `(`.
    fn skip_parenthesized(&mut self) -> Result<(), SyntaxError> {
        self.expect(Tok::LParen, "'('")?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.advance() {
                Tok::LParen | Tok::LBracket | Tok::LBrace => depth += 1,
                Tok::RParen | Tok::RBracket | Tok::RBrace => depth -= 1,
                Tok::Eof => return Err(self.error("unexpected end of input")),
                _ => {}
            }
        }
        Ok(())
    }

    fn function_def(&mut self, is_async: bool) -> Result<StmtKind, SyntaxError> {
        let name = self.identifier()?;
        self.skip_parenthesized()?;
        if self.eat(&Tok::Arrow) {
            self.test()?;
        }
        let saved_loop = std::mem::replace(&mut self.loop_depth, 0);
        self.func_depth += 1;
        let body = self.block();
        self.func_depth -= 1;
        self.loop_depth = saved_loop;
        Ok(StmtKind::FunctionDef {
            name,
            is_async,
            body: body?,
        })
    }

    fn class_def(&mut self) -> Result<StmtKind, SyntaxError> {
        let name = self.identifier()?;
        if self.at(&Tok::LParen) {
            self.skip_parenthesized()?;
        }
        let saved_loop = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.block();
        self.loop_depth = saved_loop;
        Ok(StmtKind::ClassDef { name, body: body? })
    }

    // ---- expressions ----

    /// Comma-separated expressions; more than one (or a trailing comma)
    /// builds a tuple.
    fn testlist(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.test()?;
        if !self.at(&Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.at_expression_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn at_expression_end(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Newline
                | Tok::Eof
                | Tok::Semicolon
                | Tok::Assign
                | Tok::RParen
                | Tok::RBracket
                | Tok::RBrace
                | Tok::Colon
        ) || matches!(
            self.peek(),
            Tok::PlusEq
                | Tok::MinusEq
                | Tok::StarEq
                | Tok::SlashEq
                | Tok::DoubleSlashEq
                | Tok::PercentEq
                | Tok::DoubleStarEq
        )
    }

    fn test(&mut self) -> Result<Expr, SyntaxError> {
        self.enter()?;
        let result = self.test_inner();
        self.leave();
        result
    }

    fn test_inner(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_keyword("lambda") {
            return self.lambda();
        }
        let body = self.or_test()?;
        if self.eat_keyword("if") {
            let test = self.or_test()?;
            self.expect_keyword("else")?;
            let orelse = self.test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn lambda(&mut self) -> Result<Expr, SyntaxError> {
        let mut params = Vec::new();
        while !self.at(&Tok::Colon) {
            if self.eat(&Tok::Star) || self.eat(&Tok::DoubleStar) {
                if self.at(&Tok::Comma) {
                    self.pos += 1;
                    continue;
                }
            }
            params.push(self.identifier()?);
            if self.eat(&Tok::Assign) {
                self.test()?;
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::Colon, "':'")?;
        let body = self.test()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn or_test(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.and_test()?;
        if !self.at_keyword("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword("or") {
            values.push(self.and_test()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::Or,
            values,
        })
    }

    fn and_test(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.not_test()?;
        if !self.at_keyword("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword("and") {
            values.push(self.not_test()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::And,
            values,
        })
    }

    fn not_test(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_keyword("not") {
            self.enter()?;
            let operand = self.not_test();
            self.leave();
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            });
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let is_not_in = matches!(self.peek_next(), Tok::Name(m) if m == "in");
        let op = match self.peek().clone() {
            Tok::EqEq => CmpOp::Eq,
            Tok::NotEq => CmpOp::NotEq,
            Tok::Lt => CmpOp::Lt,
            Tok::LtE => CmpOp::LtE,
            Tok::Gt => CmpOp::Gt,
            Tok::GtE => CmpOp::GtE,
            Tok::Name(n) if n == "in" => CmpOp::In,
            Tok::Name(n) if n == "not" && is_not_in => {
                self.pos += 2;
                return Some(CmpOp::NotIn);
            }
            Tok::Name(n) if n == "is" => {
                self.pos += 1;
                if self.eat_keyword("not") {
                    return Some(CmpOp::IsNot);
                }
                return Some(CmpOp::Is);
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.arith()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push(op);
            comparators.push(self.arith()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            ops,
            comparators,
        })
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                Tok::At => return Err(self.error("matrix multiplication is not supported")),
                _ => break,
            };
            self.pos += 1;
            let right = self.factor()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            Tok::Minus => Some(UnaryOp::Neg),
            Tok::Plus => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            self.enter()?;
            let operand = self.factor();
            self.leave();
            return Ok(Expr::UnaryOp {
                op,
                operand: Box::new(operand?),
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        if self.at_keyword("await") {
            return Err(self.error("'await' is not supported"));
        }
        let base = self.atom_expr()?;
        if self.eat(&Tok::DoubleStar) {
            self.enter()?;
            let exponent = self.factor();
            self.leave();
            return Ok(Expr::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent?),
            });
        }
        Ok(base)
    }

    fn atom_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    self.pos += 1;
                    let (args, kwargs) = self.call_arguments()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Tok::LBracket => {
                    self.pos += 1;
                    let index = self.subscript_list()?;
                    self.expect(Tok::RBracket, "']'")?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Tok::Dot => {
                    self.pos += 1;
                    // Keywords are legal attribute names only through reflection,
                    // which scripts do not have.
                    let attr = self.identifier()?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at(&Tok::RParen) {
            if self.at(&Tok::Star) || self.at(&Tok::DoubleStar) {
                return Err(self.error("argument unpacking is not supported"));
            }
            let is_keyword_arg = matches!(self.peek_next(), Tok::Assign);
            if let (Tok::Name(name), true) = (self.peek().clone(), is_keyword_arg) {
                if is_keyword(&name) {
                    return Err(self.unexpected());
                }
                self.pos += 2;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                let value = self.test()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let value = self.test()?;
                if self.at_keyword("for") {
                    let generators = self.comprehension_clauses()?;
                    args.push(Expr::ListComp {
                        elt: Box::new(value),
                        generators,
                    });
                    if !self.at(&Tok::RParen) {
                        return Err(self.error("generator argument must be parenthesized"));
                    }
                    break;
                }
                args.push(value);
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn subscript_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.subscript()?;
        if !self.at(&Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.at(&Tok::RBracket) {
                break;
            }
            items.push(self.subscript()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn subscript(&mut self) -> Result<Expr, SyntaxError> {
        let lower = if self.at(&Tok::Colon) {
            None
        } else {
            let value = self.test()?;
            if !self.at(&Tok::Colon) {
                return Ok(value);
            }
            Some(Box::new(value))
        };
        self.expect(Tok::Colon, "':'")?;
        let upper = if matches!(self.peek(), Tok::Colon | Tok::RBracket | Tok::Comma) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat(&Tok::Colon) {
            if matches!(self.peek(), Tok::RBracket | Tok::Comma) {
                None
            } else {
                Some(Box::new(self.test()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, SyntaxError> {
        let mut generators = Vec::new();
        while self.eat_keyword("for") {
            let target = self.target_list()?;
            self.expect_keyword("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_keyword("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        if self.at_keyword("async") {
            return Err(self.error("asynchronous comprehensions are not supported"));
        }
        Ok(generators)
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Int(i) => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::Int(i)))
            }
            Tok::Float(f) => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::Float(f)))
            }
            Tok::Str(_) | Tok::FStr(_) => self.strings(line),
            Tok::Name(name) => match name.as_str() {
                "None" => {
                    self.pos += 1;
                    Ok(Expr::Constant(Constant::None))
                }
                "True" => {
                    self.pos += 1;
                    Ok(Expr::Constant(Constant::Bool(true)))
                }
                "False" => {
                    self.pos += 1;
                    Ok(Expr::Constant(Constant::Bool(false)))
                }
                "yield" | "await" => Err(self.error(format!("'{}' is not supported", name))),
                n if is_keyword(n) => Err(self.unexpected()),
                _ => {
                    self.pos += 1;
                    Ok(Expr::Name(name))
                }
            },
            Tok::LParen => {
                self.pos += 1;
                self.enter()?;
                let result = self.parenthesized();
                self.leave();
                result
            }
            Tok::LBracket => {
                self.pos += 1;
                self.enter()?;
                let result = self.list_display();
                self.leave();
                result
            }
            Tok::LBrace => {
                self.pos += 1;
                self.enter()?;
                let result = self.dict_display();
                self.leave();
                result
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parenthesized(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&Tok::RParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.test()?;
        if self.at_keyword("for") {
            let generators = self.comprehension_clauses()?;
            self.expect(Tok::RParen, "')'")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        if self.eat(&Tok::RParen) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.at(&Tok::RParen) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect(Tok::RParen, "')'")?;
        Ok(Expr::Tuple(items))
    }

    fn list_display(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&Tok::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.test()?;
        if self.at_keyword("for") {
            let generators = self.comprehension_clauses()?;
            self.expect(Tok::RBracket, "']'")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.at(&Tok::RBracket) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect(Tok::RBracket, "']'")?;
        Ok(Expr::List(items))
    }

    fn dict_display(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&Tok::RBrace) {
            return Ok(Expr::Dict(Vec::new()));
        }
        if self.at(&Tok::DoubleStar) {
            return Err(self.error("dict unpacking is not supported"));
        }
        let key = self.test()?;
        if !self.eat(&Tok::Colon) {
            return Err(self.error("set literals are not supported"));
        }
        let value = self.test()?;
        if self.at_keyword("for") {
            let generators = self.comprehension_clauses()?;
            self.expect(Tok::RBrace, "'}'")?;
            return Ok(Expr::DictComp {
                key: Box::new(key),
                value: Box::new(value),
                generators,
            });
        }
        let mut entries = vec![(key, value)];
        while self.eat(&Tok::Comma) {
            if self.at(&Tok::RBrace) {
                break;
            }
            let key = self.test()?;
            self.expect(Tok::Colon, "':'")?;
            let value = self.test()?;
            entries.push((key, value));
        }
        self.expect(Tok::RBrace, "'}'")?;
        Ok(Expr::Dict(entries))
    }

    /// Adjacent string literals concatenate; any f-string in the run makes the
    /// whole run an f-string.
    fn strings(&mut self, line: usize) -> Result<Expr, SyntaxError> {
        let mut parts: Vec<FPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    push_literal(&mut parts, s);
                }
                Tok::FStr(body) => {
                    self.pos += 1;
                    formatted = true;
                    for part in parse_fstring(&body, line)? {
                        match part {
                            FPart::Literal(s) => push_literal(&mut parts, s),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
        }
        if !formatted {
            let text = match parts.pop() {
                Some(FPart::Literal(s)) => s,
                _ => String::new(),
            };
            return Ok(Expr::Constant(Constant::Str(text)));
        }
        Ok(Expr::FString(parts))
    }
}

fn push_literal(parts: &mut Vec<FPart>, s: String) {
    if let Some(FPart::Literal(last)) = parts.last_mut() {
        last.push_str(&s);
    } else {
        parts.push(FPart::Literal(s));
    }
}

/// Splits an f-string body into literal runs and replacement fields.
fn parse_fstring(body: &str, line: usize) -> Result<Vec<FPart>, SyntaxError> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' {
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }
            if !literal.is_empty() {
                parts.push(FPart::Literal(std::mem::take(&mut literal)));
            }
            let (field, next) = fstring_field(&chars, i + 1, line)?;
            parts.push(field);
            i = next;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(SyntaxError::new("f-string: single '}' is not allowed", line));
        }
        literal.push(c);
        i += 1;
    }
    if !literal.is_empty() {
        parts.push(FPart::Literal(literal));
    }
    Ok(parts)
}

/// Parses one `{expr[!c][:spec]}` field starting after the `{`; returns the
/// field and the index after its closing `}`.
fn fstring_field(chars: &[char], start: usize, line: usize) -> Result<(FPart, usize), SyntaxError> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    let mut expr_end = None;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '}' | ':' if depth == 0 => {
                expr_end = Some(i);
                break;
            }
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                expr_end = Some(i);
                break;
            }
            _ => {}
        }
        i += 1;
    }
    let Some(expr_end) = expr_end else {
        return Err(SyntaxError::new("f-string: expecting '}'", line));
    };

    let text: String = chars[start..expr_end].iter().collect();
    if text.trim().is_empty() {
        return Err(SyntaxError::new("f-string: empty expression not allowed", line));
    }
    let expr = parse_field_expression(&text, line)?;

    let mut i = expr_end;
    let mut conversion = None;
    if chars[i] == '!' {
        match chars.get(i + 1) {
            Some(&c @ ('r' | 's' | 'a')) => conversion = Some(c),
            _ => return Err(SyntaxError::new("f-string: invalid conversion character", line)),
        }
        i += 2;
    }
    let mut spec = String::new();
    if chars.get(i) == Some(&':') {
        i += 1;
        while i < chars.len() && chars[i] != '}' {
            if chars[i] == '{' {
                return Err(SyntaxError::new(
                    "f-string: nested format specs are not supported",
                    line,
                ));
            }
            spec.push(chars[i]);
            i += 1;
        }
    }
    if chars.get(i) != Some(&'}') {
        return Err(SyntaxError::new("f-string: expecting '}'", line));
    }
    Ok((
        FPart::Field {
            expr,
            conversion,
            spec,
        },
        i + 1,
    ))
}

fn parse_field_expression(text: &str, line: usize) -> Result<Expr, SyntaxError> {
    let wrapped = format!("({})", text.trim());
    let tokens = tokenize(&wrapped).map_err(|e| SyntaxError::new(format!("f-string: {}", e.message), line))?;
    let mut parser = Parser::new(tokens, line.saturating_sub(1));
    let expr = parser.testlist()?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(SyntaxError::new("f-string: invalid expression", line));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> StmtKind {
        let mut body = parse_module(source).unwrap();
        assert_eq!(body.len(), 1, "expected a single statement");
        body.remove(0).kind
    }

    #[test]
    fn test_chained_assignment() {
        match parse_one("a = b = 1 + 2 * 3") {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets.len(), 2);
                assert!(matches!(value, Expr::BinOp { op: BinOp::Add, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_for_target_does_not_swallow_in() {
        match parse_one("for i, x in enumerate(xs):\n    pass\n") {
            StmtKind::For { target, iter, .. } => {
                assert!(matches!(target, Expr::Tuple(ref items) if items.len() == 2));
                assert!(matches!(iter, Expr::Call { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comparison_chain_and_not_in() {
        match parse_one("1 < x <= 3 and y not in z") {
            StmtKind::Expr(Expr::BoolOp { values, .. }) => {
                assert!(matches!(&values[0], Expr::Compare { ops, .. } if ops.len() == 2));
                assert!(matches!(&values[1], Expr::Compare { ops, .. } if ops == &vec![CmpOp::NotIn]));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fstring_fields() {
        match parse_one("f'a{x!r:>5}b{{c}}'") {
            StmtKind::Expr(Expr::FString(parts)) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(
                    &parts[1],
                    FPart::Field { conversion: Some('r'), spec, .. } if spec == ">5"
                ));
                assert_eq!(parts[2], FPart::Literal("b{c}".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_definitions_parse_for_validation() {
        assert!(matches!(
            parse_one("def f(a, b=1):\n    return a\n"),
            StmtKind::FunctionDef { is_async: false, .. }
        ));
        assert!(matches!(
            parse_one("class A(object):\n    pass\n"),
            StmtKind::ClassDef { .. }
        ));
        assert!(matches!(parse_one("del x"), StmtKind::Delete(_)));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_module("x = (1,").is_err());
        assert!(parse_module("return 1").is_err());
        assert!(parse_module("break").is_err());
        assert!(parse_module("with x:\n    pass\n").is_err());
        assert!(parse_module("{1, 2}").is_err());
        assert!(parse_module("1 = x").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("x = {}1{}", "(".repeat(150), ")".repeat(150));
        let err = parse_module(&deep).unwrap_err();
        assert!(err.message.contains("nested"));
    }

    #[test]
    fn test_slices_and_generator_arguments() {
        assert!(matches!(
            parse_one("xs[1:2]"),
            StmtKind::Expr(Expr::Subscript { .. })
        ));
        match parse_one("sum(x for x in xs if x)") {
            StmtKind::Expr(Expr::Call { args, .. }) => {
                assert!(matches!(&args[0], Expr::ListComp { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
