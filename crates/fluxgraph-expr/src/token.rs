//! Hand-written lexer for the expression sub-language.
//!
//! Newlines are significant (they separate statements), so the lexer
//! emits them as tokens instead of swallowing them with the rest of the
//! whitespace.

use std::str::CharIndices;

use crate::parser::CompileError;

/// A token plus the byte offsets of its span: `(start, token, end)`.
pub type Spanned<'input> = (usize, Token<'input>, usize);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Token<'input> {
    Ident(&'input str),
    Num(f64),
    True,
    False,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Assign,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    LParen,
    RParen,
    /// Statement separator: newline or `;`.
    Separator,
}

const KEYWORDS: &[(&str, Token<'static>)] = &[
    ("and", Token::And),
    ("or", Token::Or),
    ("not", Token::Not),
    ("true", Token::True),
    ("false", Token::False),
];

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

pub struct Lexer<'input> {
    text: &'input str,
    chars: CharIndices<'input>,
    lookahead: Option<(usize, char)>,
}

impl<'input> Lexer<'input> {
    pub fn new(text: &'input str) -> Self {
        let mut lexer = Lexer {
            text,
            chars: text.char_indices(),
            lookahead: None,
        };
        lexer.bump();
        lexer
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.lookahead = self.chars.next();
        self.lookahead
    }

    fn take_while<F>(&mut self, mut keep_going: F) -> usize
    where
        F: FnMut(char) -> bool,
    {
        loop {
            match self.lookahead {
                Some((idx, c)) if !keep_going(c) => return idx,
                Some(_) => {
                    self.bump();
                }
                None => return self.text.len(),
            }
        }
    }

    fn word(&mut self, start: usize) -> Spanned<'input> {
        let end = self.take_while(is_identifier_continue);
        let word = &self.text[start..end];
        let token = KEYWORDS
            .iter()
            .find(|&&(kw, _)| kw == word)
            .map(|&(_, t)| t)
            .unwrap_or(Token::Ident(word));
        (start, token, end)
    }

    fn number(&mut self, start: usize) -> Result<Spanned<'input>, CompileError> {
        let mut end = self.take_while(|c| c.is_ascii_digit());
        if let Some((_, '.')) = self.lookahead {
            self.bump();
            end = self.take_while(|c| c.is_ascii_digit());
        }
        if let Some((_, 'e' | 'E')) = self.lookahead {
            self.bump();
            if let Some((_, '+' | '-')) = self.lookahead {
                self.bump();
            }
            end = self.take_while(|c| c.is_ascii_digit());
        }
        let text = &self.text[start..end];
        let value: f64 = text
            .parse()
            .map_err(|_| CompileError::MalformedNumber { pos: start })?;
        Ok((start, Token::Num(value), end))
    }

    /// Two-character operator helper: consumes the lookahead and returns
    /// `long` if it matches `next`, otherwise returns `short`. Operators
    /// with no single-character form (`&&`, `||`) pass `None` for `short`.
    fn op2(
        &mut self,
        start: usize,
        first: char,
        next: char,
        long: Token<'input>,
        short: Option<Token<'input>>,
    ) -> Result<Spanned<'input>, CompileError> {
        match self.lookahead {
            Some((idx, c)) if c == next => {
                self.bump();
                Ok((start, long, idx + next.len_utf8()))
            }
            _ => match short {
                Some(token) => Ok((start, token, start + 1)),
                None => Err(CompileError::UnrecognizedCharacter {
                    ch: first,
                    pos: start,
                }),
            },
        }
    }
}

impl<'input> Iterator for Lexer<'input> {
    type Item = Result<Spanned<'input>, CompileError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (start, c) = self.lookahead?;
            return match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                    continue;
                }
                '\n' | ';' => {
                    self.bump();
                    Some(Ok((start, Token::Separator, start + 1)))
                }
                '+' => {
                    self.bump();
                    Some(Ok((start, Token::Plus, start + 1)))
                }
                '-' => {
                    self.bump();
                    Some(Ok((start, Token::Minus, start + 1)))
                }
                '*' => {
                    self.bump();
                    Some(Ok((start, Token::Mul, start + 1)))
                }
                '/' => {
                    self.bump();
                    Some(Ok((start, Token::Div, start + 1)))
                }
                '%' => {
                    self.bump();
                    Some(Ok((start, Token::Mod, start + 1)))
                }
                '(' => {
                    self.bump();
                    Some(Ok((start, Token::LParen, start + 1)))
                }
                ')' => {
                    self.bump();
                    Some(Ok((start, Token::RParen, start + 1)))
                }
                '=' => {
                    self.bump();
                    Some(self.op2(start, '=', '=', Token::Eq, Some(Token::Assign)))
                }
                '!' => {
                    self.bump();
                    Some(self.op2(start, '!', '=', Token::Neq, Some(Token::Not)))
                }
                '<' => {
                    self.bump();
                    Some(self.op2(start, '<', '=', Token::Lte, Some(Token::Lt)))
                }
                '>' => {
                    self.bump();
                    Some(self.op2(start, '>', '=', Token::Gte, Some(Token::Gt)))
                }
                '&' => {
                    self.bump();
                    Some(self.op2(start, '&', '&', Token::And, None))
                }
                '|' => {
                    self.bump();
                    Some(self.op2(start, '|', '|', Token::Or, None))
                }
                _ if is_identifier_start(c) => {
                    self.bump();
                    Some(Ok(self.word(start)))
                }
                _ if c.is_ascii_digit() => {
                    self.bump();
                    Some(self.number(start))
                }
                _ => Some(Err(CompileError::UnrecognizedCharacter { ch: c, pos: start })),
            };
        }
    }
}
