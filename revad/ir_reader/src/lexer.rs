//! Lexical analysis for function text.

use std::str::CharIndices;

use ir::{Tape, TapeKind};

use crate::error::Location;


/// A Token returned from the `Lexer`.
///
/// Some variants may contains references to the original source text, so the `Token` has the same
/// lifetime as the source.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Token<'a> {
    Comment(&'a str),
    LPar,                 // '('
    RPar,                 // ')'
    LBrace,               // '{'
    RBrace,               // '}'
    LBracket,             // '['
    RBracket,             // ']'
    Comma,                // ','
    Dot,                  // '.'
    Colon,                // ':'
    Equal,                // '='
    Arrow,                // '->'
    Float(&'a str),       // Floating point immediate
    Integer(&'a str),     // Integer immediate
    Tape(Tape),           // values1, decisions2, adjoints2
    Name(&'a str),        // %function, %math.sin.d0
    Attr(&'a str),        // @optimize
    Identifier(&'a str),  // Keywords, opcodes and variables
}

/// A `Token` with an associated location.
#[derive(Debug, PartialEq, Eq)]
pub struct LocatedToken<'a> {
    pub token: Token<'a>,
    pub location: Location,
}

/// Wrap up a `Token` with the given location.
fn token(token: Token, loc: Location) -> Result<LocatedToken, LocatedError> {
    Ok(LocatedToken { token, location: loc })
}

/// An error from the lexical analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexError {
    InvalidChar,
}

/// A `LexError` with an associated Location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedError {
    pub error: LexError,
    pub location: Location,
}

/// Wrap up a `LexError` with the given location.
fn error<'a>(error: LexError, loc: Location) -> Result<LocatedToken<'a>, LocatedError> {
    Err(LocatedError { error, location: loc })
}

/// Get the number of decimal digits at the end of `s`.
fn trailing_digits(s: &str) -> usize {
    // It's faster to iterate backwards over bytes, and we're only counting ASCII digits.
    s.as_bytes().iter().rev().take_while(|&&b| b.is_ascii_digit()).count()
}

/// Pre-parse a supposed entity name by splitting it into two parts: A head of lowercase ASCII
/// letters and numeric tail.
pub fn split_entity_name(name: &str) -> Option<(&str, u32)> {
    let (head, tail) = name.split_at(name.len() - trailing_digits(name));
    if tail.len() > 1 && tail.starts_with('0') {
        None
    } else {
        tail.parse().ok().map(|n| (head, n))
    }
}

fn is_word_char(c: char) -> bool {
    matches!(c, '_' | '0'..='9' | 'a'..='z' | 'A'..='Z')
}

/// Lexical analysis.
///
/// A `Lexer` reads text from a `&str` and provides a sequence of tokens.
///
/// Also keep track of a line number for error reporting.
pub struct Lexer<'a> {
    // Complete source being processed.
    source: &'a str,

    // Iterator into `source`.
    chars: CharIndices<'a>,

    // Next character to be processed, or `None` at the end.
    lookahead: Option<char>,

    // Index into `source` of lookahead character.
    pos: usize,

    // Current line number.
    line_number: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(s: &'a str) -> Self {
        let mut lex =
            Self { source: s, chars: s.char_indices(), lookahead: None, pos: 0, line_number: 1 };
        // Advance to the first char.
        lex.next_ch();
        lex
    }

    // Advance to the next character.
    // Return the next lookahead character, or None when the end is encountered.
    fn next_ch(&mut self) -> Option<char> {
        if self.lookahead == Some('\n') {
            self.line_number += 1;
        }
        match self.chars.next() {
            Some((idx, ch)) => {
                self.pos = idx;
                self.lookahead = Some(ch);
            }
            None => {
                self.pos = self.source.len();
                self.lookahead = None;
            }
        }
        self.lookahead
    }

    // Get the location corresponding to `lookahead`.
    fn loc(&self) -> Location {
        Location { line_number: self.line_number }
    }

    // Starting from `lookahead`, are we looking at `prefix`?
    fn looking_at(&self, prefix: &str) -> bool {
        self.source[self.pos..].starts_with(prefix)
    }

    // Scan a single-char token.
    fn scan_char(&mut self, tok: Token<'a>) -> Result<LocatedToken<'a>, LocatedError> {
        let loc = self.loc();
        self.next_ch();
        token(tok, loc)
    }

    // Scan a multi-char token.
    fn scan_chars(
        &mut self,
        count: usize,
        tok: Token<'a>,
    ) -> Result<LocatedToken<'a>, LocatedError> {
        let loc = self.loc();
        for _ in 0..count {
            self.next_ch();
        }
        token(tok, loc)
    }

    /// Get the rest of the current line.
    /// The next token returned by `next()` will be from the following lines.
    pub fn rest_of_line(&mut self) -> &'a str {
        let begin = self.pos;
        loop {
            match self.next_ch() {
                None | Some('\n') => return &self.source[begin..self.pos],
                _ => {}
            }
        }
    }

    // Scan a comment extending to the end of the current line.
    fn scan_comment(&mut self) -> Result<LocatedToken<'a>, LocatedError> {
        let loc = self.loc();
        let text = self.rest_of_line();
        token(Token::Comment(text), loc)
    }

    // Scan a number token which can represent either an integer or floating point number.
    //
    // Accept the following forms:
    //
    // - `10`, `-10`: Integer
    // - `0.5`, `-2.0`, `1e16`, `1.5e-7`: Float
    // - `inf`, `-inf`, `NaN`: Float
    fn scan_number(&mut self) -> Result<LocatedToken<'a>, LocatedError> {
        let begin = self.pos;
        let loc = self.loc();
        let mut is_float = false;

        // Skip a leading sign.
        if matches!(self.lookahead, Some('-' | '+')) {
            self.next_ch();
            if self.looking_at("inf") || self.looking_at("NaN") {
                for _ in 0..3 {
                    self.next_ch();
                }
                return token(Token::Float(&self.source[begin..self.pos]), loc);
            }
            if !matches!(self.lookahead, Some('0'..='9')) {
                return error(LexError::InvalidChar, loc);
            }
        }

        let mut prev = ' ';
        while let Some(c) = self.lookahead {
            match c {
                '0'..='9' => (),
                '.' | 'e' | 'E' => is_float = true,
                '-' | '+' if matches!(prev, 'e' | 'E') => (),
                _ => break,
            }
            prev = c;
            self.next_ch();
        }

        let text = &self.source[begin..self.pos];
        if is_float {
            token(Token::Float(text), loc)
        } else {
            token(Token::Integer(text), loc)
        }
    }

    // Scan a 'word', which is an identifier-like sequence of characters beginning with '_' or an
    // alphabetic char, followed by zero or more alphanumeric or '_' characters.
    fn scan_word(&mut self) -> Result<LocatedToken<'a>, LocatedError> {
        let begin = self.pos;
        let loc = self.loc();

        while matches!(self.next_ch(), Some(c) if is_word_char(c)) {}
        let text = &self.source[begin..self.pos];

        if matches!(text, "inf" | "NaN") {
            return token(Token::Float(text), loc);
        }

        // Look for numbered well-known entities like values1, decisions2, ...
        token(
            split_entity_name(text)
                .and_then(|(prefix, number)| Self::numbered_entity(prefix, number))
                .unwrap_or(Token::Identifier(text)),
            loc,
        )
    }

    // If prefix is a well-known entity prefix and suffix is a valid entity number, return the
    // decoded token.
    fn numbered_entity(prefix: &str, number: u32) -> Option<Token<'a>> {
        TapeKind::from_prefix(prefix).map(|kind| Token::Tape(Tape { kind, level: number }))
    }

    // Scan a sigil followed by a word. Names may contain dots to express paths.
    fn scan_sigil(
        &mut self,
        allow_dots: bool,
        tok: fn(&'a str) -> Token<'a>,
    ) -> Result<LocatedToken<'a>, LocatedError> {
        let loc = self.loc();
        let begin = self.pos + 1;

        while matches!(self.next_ch(), Some(c) if is_word_char(c) || (allow_dots && c == '.')) {}

        let end = self.pos;
        if begin == end {
            return error(LexError::InvalidChar, loc);
        }
        token(tok(&self.source[begin..end]), loc)
    }

    /// Get the next token or a lexical error.
    ///
    /// Return None when the end of the source is encountered.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<LocatedToken<'a>, LocatedError>> {
        loop {
            let loc = self.loc();
            return match self.lookahead {
                None => None,
                Some(';') => Some(self.scan_comment()),
                Some('(') => Some(self.scan_char(Token::LPar)),
                Some(')') => Some(self.scan_char(Token::RPar)),
                Some('{') => Some(self.scan_char(Token::LBrace)),
                Some('}') => Some(self.scan_char(Token::RBrace)),
                Some('[') => Some(self.scan_char(Token::LBracket)),
                Some(']') => Some(self.scan_char(Token::RBracket)),
                Some(',') => Some(self.scan_char(Token::Comma)),
                Some('.') => Some(self.scan_char(Token::Dot)),
                Some(':') => Some(self.scan_char(Token::Colon)),
                Some('=') => Some(self.scan_char(Token::Equal)),
                Some('+' | '0'..='9') => Some(self.scan_number()),
                Some('-') => {
                    if self.looking_at("->") {
                        Some(self.scan_chars(2, Token::Arrow))
                    } else {
                        Some(self.scan_number())
                    }
                }
                Some('_' | 'a'..='z' | 'A'..='Z') => Some(self.scan_word()),
                Some('%') => Some(self.scan_sigil(true, Token::Name)),
                Some('@') => Some(self.scan_sigil(false, Token::Attr)),
                // all ascii whitespace
                Some(' ' | '\x09'..='\x0d') => {
                    self.next_ch();
                    continue;
                }
                _ => {
                    // Skip invalid char, return error.
                    self.next_ch();
                    Some(error(LexError::InvalidChar, loc))
                }
            };
        }
    }
}
