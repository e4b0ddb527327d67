use std::{iter::Peekable, str::CharIndices};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    /// A template literal: `quasis.len() == exprs.len() + 1`.
    Template {
        quasis: Vec<String>,
        exprs: Vec<(String, usize)>,
    },
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    /// Byte offset of the token start.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub offset: usize,
}

// Longest first so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "...", "===", "!==", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--",
    "+=", "-=", "*=", "/=", "%=", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+",
    "-", "*", "/", "%", "!", "?", ":", ".", "=",
];

pub struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    /// Added to every reported offset; used for template expression sources.
    base: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self::with_base(src, 0)
    }

    pub fn with_base(src: &'a str, base: usize) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
            base,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.tok == Tok::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, message: impl Into<String>, offset: usize) -> LexError {
        LexError {
            message: message.into(),
            offset: self.base + offset,
        }
    }

    fn token(&self, tok: Tok, offset: usize) -> Token {
        Token {
            tok,
            offset: self.base + offset,
        }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        while let Some(&(start, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            if c != '/' {
                break;
            }
            let rest = &self.src[start..];
            if rest.starts_with("//") {
                while let Some(&(_, c)) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.chars.next();
                }
            } else if rest.starts_with("/*") {
                let Some(end) = rest[2..].find("*/") else {
                    return Err(self.error("unterminated comment", start));
                };
                let stop = start + 2 + end + 2;
                while self.chars.peek().is_some_and(|&(i, _)| i < stop) {
                    self.chars.next();
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;
        let Some(&(start, c)) = self.chars.peek() else {
            return Ok(self.token(Tok::Eof, self.src.len()));
        };

        if c.is_ascii_digit()
            || (c == '.' && self.src[start + 1..].starts_with(|d: char| d.is_ascii_digit()))
        {
            return self.number(start);
        }
        if c == '"' || c == '\'' {
            self.chars.next();
            let s = self.string_body(c, start)?;
            return Ok(self.token(Tok::Str(s), start));
        }
        if c == '`' {
            self.chars.next();
            return self.template(start);
        }
        if is_ident_start(c) {
            let mut ident = String::new();
            while let Some(&(_, c)) = self.chars.peek() {
                if !is_ident_part(c) {
                    break;
                }
                ident.push(c);
                self.chars.next();
            }
            return Ok(self.token(Tok::Ident(ident), start));
        }

        let rest = &self.src[start..];
        for punct in PUNCTUATORS {
            if !rest.starts_with(punct) {
                continue;
            }
            // `a ?.5 : b` is a conditional, not optional chaining.
            if *punct == "?." && rest[2..].starts_with(|d: char| d.is_ascii_digit()) {
                continue;
            }
            for _ in 0..punct.len() {
                self.chars.next();
            }
            return Ok(self.token(Tok::Punct(punct), start));
        }
        Err(self.error(format!("unexpected character `{c}`"), start))
    }

    fn number(&mut self, start: usize) -> Result<Token, LexError> {
        let rest = &self.src[start..];
        if rest.starts_with("0x") || rest.starts_with("0X") {
            self.chars.next();
            self.chars.next();
            let mut digits = String::new();
            while let Some(&(_, c)) = self.chars.peek() {
                if !c.is_ascii_hexdigit() {
                    break;
                }
                digits.push(c);
                self.chars.next();
            }
            let value = u64::from_str_radix(&digits, 16)
                .map_err(|_| self.error("invalid hex literal", start))?;
            return Ok(self.token(Tok::Num(value as f64), start));
        }

        let mut text = String::new();
        let mut seen_exp = false;
        while let Some(&(_, c)) = self.chars.peek() {
            let take = c.is_ascii_digit()
                || c == '.'
                || c == '_'
                || (!seen_exp && (c == 'e' || c == 'E'))
                || ((c == '+' || c == '-') && text.ends_with(['e', 'E']));
            if !take {
                break;
            }
            if c == 'e' || c == 'E' {
                seen_exp = true;
            }
            if c != '_' {
                text.push(c);
            }
            self.chars.next();
        }
        let value: f64 = text
            .parse()
            .map_err(|_| self.error(format!("invalid number `{text}`"), start))?;
        Ok(self.token(Tok::Num(value), start))
    }

    fn escape(&mut self, start: usize) -> Result<Option<char>, LexError> {
        let Some((_, c)) = self.chars.next() else {
            return Err(self.error("unterminated string", start));
        };
        let hex = |lexer: &mut Self, len: usize| -> Result<char, LexError> {
            let mut code = String::new();
            for _ in 0..len {
                match lexer.chars.next() {
                    Some((_, h)) if h.is_ascii_hexdigit() => code.push(h),
                    _ => return Err(lexer.error("invalid escape sequence", start)),
                }
            }
            u32::from_str_radix(&code, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| lexer.error("invalid escape sequence", start))
        };
        Ok(Some(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '0' => '\0',
            'x' => hex(self, 2)?,
            'u' => hex(self, 4)?,
            // Line continuation.
            '\n' => return Ok(None),
            other => other,
        }))
    }

    fn string_body(&mut self, quote: char, start: usize) -> Result<String, LexError> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None | Some((_, '\n')) => return Err(self.error("unterminated string", start)),
                Some((_, c)) if c == quote => return Ok(out),
                Some((_, '\\')) => {
                    if let Some(c) = self.escape(start)? {
                        out.push(c);
                    }
                }
                Some((_, c)) => out.push(c),
            }
        }
    }

    fn template(&mut self, start: usize) -> Result<Token, LexError> {
        let mut quasis = Vec::new();
        let mut exprs = Vec::new();
        let mut current = String::new();
        loop {
            match self.chars.next() {
                None => return Err(self.error("unterminated template literal", start)),
                Some((_, '`')) => {
                    quasis.push(current);
                    return Ok(self.token(Tok::Template { quasis, exprs }, start));
                }
                Some((_, '\\')) => {
                    if let Some(c) = self.escape(start)? {
                        current.push(c);
                    }
                }
                Some((i, '$')) if self.chars.peek().is_some_and(|&(_, c)| c == '{') => {
                    self.chars.next();
                    quasis.push(std::mem::take(&mut current));
                    let expr_start = i + 2;
                    let mut depth = 0usize;
                    let end = loop {
                        match self.chars.next() {
                            None => {
                                return Err(self.error("unterminated template expression", i));
                            }
                            Some((_, '{')) => depth += 1,
                            Some((j, '}')) if depth == 0 => break j,
                            Some((_, '}')) => depth -= 1,
                            Some((_, q @ ('"' | '\''))) => {
                                self.string_body(q, i)?;
                            }
                            Some(_) => {}
                        }
                    };
                    exprs.push((
                        self.src[expr_start..end].to_string(),
                        self.base + expr_start,
                    ));
                }
                Some((_, c)) => current.push(c),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

/// 1-based line and column of a byte offset.
pub fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(src.len());
    let before = &src[..offset];
    let line = before.matches('\n').count() + 1;
    let col = before
        .rfind('\n')
        .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
        + 1;
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn lexes_operators_longest_first() {
        assert_eq!(
            toks("a === b !== c => d"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("==="),
                Tok::Ident("b".into()),
                Tok::Punct("!=="),
                Tok::Ident("c".into()),
                Tok::Punct("=>"),
                Tok::Ident("d".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments_and_reads_numbers() {
        assert_eq!(
            toks("// x\n1.5e2 /* y */ .5 0x1F"),
            vec![Tok::Num(150.0), Tok::Num(0.5), Tok::Num(31.0), Tok::Eof]
        );
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            toks(r#"'a\'b' "c\nA""#),
            vec![Tok::Str("a'b".into()), Tok::Str("c\nA".into()), Tok::Eof]
        );
    }

    #[test]
    fn template_splits_expressions() {
        let tokens = toks("`v=${ a + '}' } u`");
        let Tok::Template { quasis, exprs } = &tokens[0] else {
            panic!("expected template");
        };
        assert_eq!(quasis, &["v=".to_string(), " u".to_string()]);
        assert_eq!(exprs[0].0, " a + '}' ");
    }

    #[test]
    fn reports_offsets() {
        let err = Lexer::new("a\n  #").tokenize().unwrap_err();
        assert_eq!(err.offset, 4);
        assert_eq!(line_col("a\n  #", err.offset), (2, 3));
    }
}
