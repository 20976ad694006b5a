//! Indentation-aware lexer for step programs.
//!
//! Blocks are delimited by INDENT/DEDENT tokens computed from leading
//! whitespace. Newlines inside parentheses, brackets, and braces are
//! implicit joins and produce no layout tokens. Tabs and spaces must not be
//! mixed within one indentation run.

use thiserror::Error;

use crate::token::{Keyword, Pos, Token, TokenKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character {ch:?} at {pos}")]
    UnexpectedChar { ch: char, pos: Pos },
    #[error("unterminated string literal starting at {pos}")]
    UnterminatedString { pos: Pos },
    #[error("invalid escape sequence \\{ch} at {pos}")]
    BadEscape { ch: char, pos: Pos },
    #[error("tabs and spaces mixed in indentation at {pos}")]
    MixedIndentation { pos: Pos },
    #[error("unindent does not match any outer indentation level at {pos}")]
    BadDedent { pos: Pos },
    #[error("number literal out of range at {pos}")]
    NumberOutOfRange { pos: Pos },
    #[error("malformed number literal at {pos}")]
    BadNumber { pos: Pos },
}

struct Lexer<'a> {
    src: &'a [u8],
    at: usize,
    line: u32,
    col: u32,
    paren_depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

/// Tokenize a whole program.
pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer {
        src: source.as_bytes(),
        at: 0,
        line: 1,
        col: 1,
        paren_depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer<'_> {
    fn pos(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.at).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.at + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.at += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn push(&mut self, kind: TokenKind, pos: Pos) {
        self.tokens.push(Token::new(kind, pos));
    }

    fn run(&mut self) -> Result<(), LexError> {
        self.handle_line_start()?;
        while self.at < self.src.len() {
            let pos = self.pos();
            let b = self.peek().unwrap_or(b'\0');
            match b {
                b'\n' => {
                    self.bump();
                    if self.paren_depth == 0 {
                        if !matches!(
                            self.tokens.last().map(|t| &t.kind),
                            None | Some(TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent)
                        ) {
                            self.push(TokenKind::Newline, pos);
                        }
                        self.handle_line_start()?;
                    }
                }
                b'\r' => {
                    self.bump();
                }
                b' ' | b'\t' => {
                    self.bump();
                }
                b'#' => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                b'"' | b'\'' => self.string(pos)?,
                b'0'..=b'9' => self.number(pos)?,
                b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.word(pos),
                _ => self.punct(pos)?,
            }
        }
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline | TokenKind::Dedent)
        ) {
            self.push(TokenKind::Newline, self.pos());
        }
        let eof = self.pos();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, eof);
        }
        self.push(TokenKind::EndOfFile, eof);
        Ok(())
    }

    /// Measure leading whitespace and emit INDENT/DEDENT as needed. Skips
    /// blank and comment-only lines entirely.
    fn handle_line_start(&mut self) -> Result<(), LexError> {
        loop {
            let pos = self.pos();
            let mut width = 0usize;
            let mut saw_space = false;
            let mut saw_tab = false;
            while let Some(b) = self.peek() {
                match b {
                    b' ' => {
                        saw_space = true;
                        width += 1;
                        self.bump();
                    }
                    b'\t' => {
                        saw_tab = true;
                        width += 8 - (width % 8);
                        self.bump();
                    }
                    _ => break,
                }
            }
            if saw_space && saw_tab {
                return Err(LexError::MixedIndentation { pos });
            }
            match self.peek() {
                // Blank line: consume and re-measure the next one.
                Some(b'\n') => {
                    self.bump();
                    continue;
                }
                Some(b'\r') => {
                    self.bump();
                    continue;
                }
                // Comment-only line.
                Some(b'#') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                None => return Ok(()),
                _ => {}
            }
            let current = *self.indents.last().unwrap_or(&0);
            if width > current {
                self.indents.push(width);
                self.push(TokenKind::Indent, pos);
            } else if width < current {
                while width < *self.indents.last().unwrap_or(&0) {
                    self.indents.pop();
                    self.push(TokenKind::Dedent, pos);
                }
                if width != *self.indents.last().unwrap_or(&0) {
                    return Err(LexError::BadDedent { pos });
                }
            }
            return Ok(());
        }
    }

    fn string(&mut self, pos: Pos) -> Result<(), LexError> {
        let quote = self.bump().unwrap_or(b'"');
        let triple = self.peek() == Some(quote) && self.peek2() == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }
        let mut out = String::new();
        loop {
            let Some(b) = self.bump() else {
                return Err(LexError::UnterminatedString { pos });
            };
            match b {
                b'\\' => {
                    let esc_pos = self.pos();
                    let Some(e) = self.bump() else {
                        return Err(LexError::UnterminatedString { pos });
                    };
                    let decoded = match e {
                        b'n' => '\n',
                        b't' => '\t',
                        b'r' => '\r',
                        b'0' => '\0',
                        b'\\' => '\\',
                        b'\'' => '\'',
                        b'"' => '"',
                        b'\n' => continue,
                        other => {
                            return Err(LexError::BadEscape {
                                ch: other as char,
                                pos: esc_pos,
                            });
                        }
                    };
                    out.push(decoded);
                }
                b'\n' if !triple => return Err(LexError::UnterminatedString { pos }),
                _ if b == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek2() == Some(quote) {
                        self.bump();
                        self.bump();
                        break;
                    }
                    out.push(quote as char);
                }
                _ => {
                    // Re-assemble UTF-8 sequences byte by byte.
                    out.push(b as char);
                    if b >= 0x80 {
                        // The source is valid UTF-8, so continuation bytes follow.
                        let start = self.at - 1;
                        let mut end = self.at;
                        while self
                            .src
                            .get(end)
                            .is_some_and(|next| next & 0b1100_0000 == 0b1000_0000)
                        {
                            end += 1;
                        }
                        out.pop();
                        if let Ok(chunk) = std::str::from_utf8(&self.src[start..end]) {
                            out.push_str(chunk);
                        }
                        while self.at < end {
                            self.bump();
                        }
                    }
                }
            }
        }
        self.push(TokenKind::Str(out), pos);
        Ok(())
    }

    fn number(&mut self, pos: Pos) -> Result<(), LexError> {
        let start = self.at;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek2().is_some_and(|b| b.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mark = self.at;
            self.bump();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.bump();
            }
            if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                // `1e` followed by a non-digit: rewind, let the word lexer fail.
                self.at = mark;
                return Err(LexError::BadNumber { pos });
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.at]).unwrap_or_default();
        if is_float {
            let value: f64 = text.parse().map_err(|_| LexError::BadNumber { pos })?;
            self.push(TokenKind::Float(value), pos);
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| LexError::NumberOutOfRange { pos })?;
            self.push(TokenKind::Int(value), pos);
        }
        Ok(())
    }

    fn word(&mut self, pos: Pos) {
        let start = self.at;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.at]).unwrap_or_default();
        let kind = match Keyword::from_str(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(text.to_string()),
        };
        self.push(kind, pos);
    }

    fn punct(&mut self, pos: Pos) -> Result<(), LexError> {
        let b = self.bump().unwrap_or(b'\0');
        let next = self.peek();
        let kind = match (b, next) {
            (b'(', _) => {
                self.paren_depth += 1;
                TokenKind::LParen
            }
            (b')', _) => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RParen
            }
            (b'[', _) => {
                self.paren_depth += 1;
                TokenKind::LBracket
            }
            (b']', _) => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RBracket
            }
            (b'{', _) => {
                self.paren_depth += 1;
                TokenKind::LBrace
            }
            (b'}', _) => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RBrace
            }
            (b',', _) => TokenKind::Comma,
            (b':', _) => TokenKind::Colon,
            (b';', _) => TokenKind::Semicolon,
            (b'.', _) => TokenKind::Dot,
            (b'@', _) => TokenKind::At,
            (b'+', Some(b'=')) => {
                self.bump();
                TokenKind::PlusEq
            }
            (b'+', _) => TokenKind::Plus,
            (b'-', Some(b'>')) => {
                self.bump();
                TokenKind::Arrow
            }
            (b'-', Some(b'=')) => {
                self.bump();
                TokenKind::MinusEq
            }
            (b'-', _) => TokenKind::Minus,
            (b'*', Some(b'*')) => {
                self.bump();
                TokenKind::StarStar
            }
            (b'*', Some(b'=')) => {
                self.bump();
                TokenKind::StarEq
            }
            (b'*', _) => TokenKind::Star,
            (b'/', Some(b'/')) => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::SlashSlashEq
                } else {
                    TokenKind::SlashSlash
                }
            }
            (b'/', Some(b'=')) => {
                self.bump();
                TokenKind::SlashEq
            }
            (b'/', _) => TokenKind::Slash,
            (b'%', Some(b'=')) => {
                self.bump();
                TokenKind::PercentEq
            }
            (b'%', _) => TokenKind::Percent,
            (b'=', Some(b'=')) => {
                self.bump();
                TokenKind::EqEq
            }
            (b'=', _) => TokenKind::Eq,
            (b'!', Some(b'=')) => {
                self.bump();
                TokenKind::NotEq
            }
            (b'<', Some(b'=')) => {
                self.bump();
                TokenKind::LtEq
            }
            (b'<', _) => TokenKind::Lt,
            (b'>', Some(b'=')) => {
                self.bump();
                TokenKind::GtEq
            }
            (b'>', _) => TokenKind::Gt,
            (other, _) => {
                return Err(LexError::UnexpectedChar {
                    ch: other as char,
                    pos,
                });
            }
        };
        self.push(kind, pos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{LexError, lex};
    use crate::token::{Keyword, TokenKind};

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).expect("lex").into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(
            kinds("x = 1\n"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Eq,
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn indentation_produces_layout_tokens() {
        let toks = kinds("if x:\n    y = 1\nz = 2\n");
        assert!(toks.contains(&TokenKind::Indent));
        assert!(toks.contains(&TokenKind::Dedent));
    }

    #[test]
    fn dedent_to_unknown_level_fails() {
        let err = lex("if x:\n        y = 1\n    z = 2\n").expect_err("bad dedent");
        assert!(matches!(err, LexError::BadDedent { .. }));
    }

    #[test]
    fn mixed_tabs_and_spaces_fail() {
        let err = lex("if x:\n\t y = 1\n").expect_err("mixed");
        assert!(matches!(err, LexError::MixedIndentation { .. }));
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let toks = kinds("x = [1,\n     2]\n");
        let newlines = toks.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#"s = "a\nb\"c""#),
            vec![
                TokenKind::Ident("s".into()),
                TokenKind::Eq,
                TokenKind::Str("a\nb\"c".into()),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn triple_quoted_string_spans_lines() {
        let toks = kinds("s = \"\"\"a\nb\"\"\"\n");
        assert!(toks.contains(&TokenKind::Str("a\nb".into())));
    }

    #[test]
    fn unterminated_string_fails() {
        assert!(matches!(
            lex("s = \"abc\n"),
            Err(LexError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn keywords_and_identifiers() {
        let toks = kinds("while True: pass\n");
        assert_eq!(toks[0], TokenKind::Keyword(Keyword::While));
        assert_eq!(toks[1], TokenKind::Keyword(Keyword::True));
        assert_eq!(toks[2], TokenKind::Colon);
        assert_eq!(toks[3], TokenKind::Keyword(Keyword::Pass));
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("x = 42\n")[2], TokenKind::Int(42));
        assert_eq!(kinds("x = 2.5\n")[2], TokenKind::Float(2.5));
        assert_eq!(kinds("x = 1e3\n")[2], TokenKind::Float(1000.0));
        assert!(matches!(
            lex("x = 99999999999999999999\n"),
            Err(LexError::NumberOutOfRange { .. })
        ));
    }

    #[test]
    fn comments_are_skipped() {
        let toks = kinds("# header\nx = 1  # trailing\n");
        assert_eq!(toks[0], TokenKind::Ident("x".into()));
    }

    #[test]
    fn unicode_in_strings_survives() {
        let toks = kinds("s = \"héllo ← 世界\"\n");
        assert_eq!(toks[2], TokenKind::Str("héllo ← 世界".into()));
    }
}
