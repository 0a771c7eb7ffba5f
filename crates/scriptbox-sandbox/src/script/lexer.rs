//! Tokenizer for the script language.
//!
//! Produces a flat token stream with explicit `Newline` / `Indent` / `Dedent`
//! markers. Newlines inside brackets are ignored, as are blank and
//! comment-only lines.

use super::error::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw body of an f-string; split into parts by the parser.
    FStr(String),
    Newline,
    Indent,
    Dedent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtE,
    GtE,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    DoubleSlashEq,
    PercentEq,
    DoubleStarEq,
    Arrow,
    At,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
    tokens: Vec<Token>,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        at_line_start: true,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.line)
    }

    fn run(&mut self) -> Result<(), SyntaxError> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
                continue;
            }
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                        self.at_line_start = true;
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' => {
                    match self.peek_at(1) {
                        Some('\n') => {
                            self.pos += 2;
                            self.line += 1;
                        }
                        Some('\r') if self.peek_at(2) == Some('\n') => {
                            self.pos += 3;
                            self.line += 1;
                        }
                        _ => return Err(self.error("unexpected character after line continuation")),
                    }
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c == '_' || c.is_alphabetic() => self.name_or_prefixed_string()?,
                '"' | '\'' => {
                    let body = self.string_body(false)?;
                    self.push(Tok::Str(body));
                }
                _ => self.punct(c)?,
            }
        }

        if self.depth > 0 {
            return Err(self.error("unexpected end of input inside brackets"));
        }
        if self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.tok, Tok::Newline | Tok::Dedent))
        {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Measures the indentation of a new logical line, skipping blank and
    /// comment-only lines. Returns false at end of input.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxError> {
        loop {
            let mut col = 0usize;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => col += 1,
                    '\t' => col = (col / 8 + 1) * 8,
                    '\x0c' | '\r' => {}
                    _ => break,
                }
                self.pos += 1;
            }
            match self.peek() {
                None => return Ok(false),
                Some('\n') => {
                    self.pos += 1;
                    self.line += 1;
                    continue;
                }
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some(_) => {}
            }

            let current = self.indents.last().copied().unwrap_or(0);
            if col > current {
                self.indents.push(col);
                self.push(Tok::Indent);
            } else if col < current {
                while self.indents.last().is_some_and(|&top| top > col) {
                    self.indents.pop();
                    self.push(Tok::Dedent);
                }
                if self.indents.last().copied().unwrap_or(0) != col {
                    return Err(self.error("unindent does not match any outer indentation level"));
                }
            }
            self.at_line_start = false;
            return Ok(true);
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        if self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'))
        {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => 16,
                Some('o' | 'O') => 8,
                _ => 2,
            };
            self.pos += 2;
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c == '_' {
                    self.pos += 1;
                } else if c.is_digit(radix) {
                    digits.push(c);
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| self.error("invalid or too large integer literal"))?;
            self.push(Tok::Int(value));
            return Ok(());
        }

        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == '_' {
                // digit separator
            } else if c == '.' && !is_float {
                is_float = true;
                text.push(c);
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+' | '-'))
                        && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                text.push('e');
                self.pos += 1;
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.pos += 1;
                }
                continue;
            } else {
                break;
            }
            self.pos += 1;
        }
        if self.peek().is_some_and(|c| c == '_' || c.is_alphabetic()) {
            self.pos = start;
            return Err(self.error("invalid decimal literal"));
        }
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float literal '{}'", text)))?;
            self.push(Tok::Float(value));
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error("integer literal is too large"))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn name_or_prefixed_string(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"' | '\'')) {
            let lower = word.to_ascii_lowercase();
            let (raw, fmt) = match lower.as_str() {
                "r" => (true, false),
                "f" => (false, true),
                "rf" | "fr" => (true, true),
                "b" | "rb" | "br" => {
                    return Err(self.error("bytes literals are not supported"));
                }
                "u" => (false, false),
                _ => {
                    self.push(Tok::Name(word));
                    return Ok(());
                }
            };
            let body = self.string_body(raw)?;
            self.push(if fmt { Tok::FStr(body) } else { Tok::Str(body) });
            return Ok(());
        }

        self.push(Tok::Name(word));
        Ok(())
    }

    /// Reads a quoted literal starting at the opening quote and returns its
    /// decoded body. For raw literals escapes are kept verbatim.
    fn string_body(&mut self, raw: bool) -> Result<String, SyntaxError> {
        let start_line = self.line;
        let quote = self.peek().unwrap_or('"');
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(SyntaxError::new("unterminated string literal", start_line));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
                out.push(c);
                self.pos += 1;
                continue;
            }
            if c == '\n' {
                if !triple {
                    return Err(SyntaxError::new("unterminated string literal", start_line));
                }
                self.line += 1;
                out.push(c);
                self.pos += 1;
                continue;
            }
            if c == '\\' {
                let Some(next) = self.peek_at(1) else {
                    return Err(SyntaxError::new("unterminated string literal", start_line));
                };
                if raw {
                    out.push('\\');
                    out.push(next);
                    if next == '\n' {
                        self.line += 1;
                    }
                    self.pos += 2;
                    continue;
                }
                self.pos += 2;
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    'x' => out.push(self.hex_escape(2)?),
                    'u' => out.push(self.hex_escape(4)?),
                    'U' => out.push(self.hex_escape(8)?),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, SyntaxError> {
        let end = self.pos + len;
        if end > self.chars.len() {
            return Err(self.error("truncated escape sequence"));
        }
        let digits: String = self.chars[self.pos..end].iter().collect();
        let code = u32::from_str_radix(&digits, 16)
            .map_err(|_| self.error("invalid escape sequence"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn punct(&mut self, c: char) -> Result<(), SyntaxError> {
        let next = self.peek_at(1);
        let next2 = self.peek_at(2);
        let (tok, len) = match (c, next, next2) {
            ('*', Some('*'), Some('=')) => (Tok::DoubleStarEq, 3),
            ('/', Some('/'), Some('=')) => (Tok::DoubleSlashEq, 3),
            ('*', Some('*'), _) => (Tok::DoubleStar, 2),
            ('/', Some('/'), _) => (Tok::DoubleSlash, 2),
            ('=', Some('='), _) => (Tok::EqEq, 2),
            ('!', Some('='), _) => (Tok::NotEq, 2),
            ('<', Some('='), _) => (Tok::LtE, 2),
            ('>', Some('='), _) => (Tok::GtE, 2),
            ('+', Some('='), _) => (Tok::PlusEq, 2),
            ('-', Some('='), _) => (Tok::MinusEq, 2),
            ('*', Some('='), _) => (Tok::StarEq, 2),
            ('/', Some('='), _) => (Tok::SlashEq, 2),
            ('%', Some('='), _) => (Tok::PercentEq, 2),
            ('-', Some('>'), _) => (Tok::Arrow, 2),
            ('(', _, _) => (Tok::LParen, 1),
            (')', _, _) => (Tok::RParen, 1),
            ('[', _, _) => (Tok::LBracket, 1),
            (']', _, _) => (Tok::RBracket, 1),
            ('{', _, _) => (Tok::LBrace, 1),
            ('}', _, _) => (Tok::RBrace, 1),
            (',', _, _) => (Tok::Comma, 1),
            (':', _, _) => (Tok::Colon, 1),
            ('.', _, _) => (Tok::Dot, 1),
            (';', _, _) => (Tok::Semicolon, 1),
            ('+', _, _) => (Tok::Plus, 1),
            ('-', _, _) => (Tok::Minus, 1),
            ('*', _, _) => (Tok::Star, 1),
            ('/', _, _) => (Tok::Slash, 1),
            ('%', _, _) => (Tok::Percent, 1),
            ('=', _, _) => (Tok::Assign, 1),
            ('<', _, _) => (Tok::Lt, 1),
            ('>', _, _) => (Tok::Gt, 1),
            ('@', _, _) => (Tok::At, 1),
            _ => return Err(self.error(format!("invalid character '{}'", c))),
        };
        match tok {
            Tok::LParen | Tok::LBracket | Tok::LBrace => self.depth += 1,
            Tok::RParen | Tok::RBracket | Tok::RBrace => {
                if self.depth == 0 {
                    return Err(self.error(format!("unmatched '{}'", c)));
                }
                self.depth -= 1;
            }
            _ => {}
        }
        self.push(tok);
        self.pos += len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_indentation_tokens() {
        let toks = kinds("if x:\n    y = 1\nz = 2\n");
        assert_eq!(
            toks,
            vec![
                Tok::Name("if".into()),
                Tok::Name("x".into()),
                Tok::Colon,
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Assign,
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Assign,
                Tok::Int(2),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let toks = kinds("x = [1,\n     2]\n");
        assert!(!toks[..toks.len() - 2].contains(&Tok::Newline));
    }

    #[test]
    fn test_string_escapes_and_prefixes() {
        assert_eq!(kinds("'a\\nb'")[0], Tok::Str("a\nb".into()));
        assert_eq!(kinds("r'a\\nb'")[0], Tok::Str("a\\nb".into()));
        assert_eq!(kinds("f'{x}'")[0], Tok::FStr("{x}".into()));
        assert_eq!(kinds("'''a\nb'''")[0], Tok::Str("a\nb".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000")[0], Tok::Int(1000));
        assert_eq!(kinds("0x1f")[0], Tok::Int(31));
        assert_eq!(kinds("2.5e3")[0], Tok::Float(2500.0));
        assert_eq!(kinds(".5")[0], Tok::Float(0.5));
    }

    #[test]
    fn test_errors_report_line() {
        let err = tokenize("x = 1\ny = 'open\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated"));

        let err = tokenize("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert!(err.message.contains("unindent"));
    }
}
