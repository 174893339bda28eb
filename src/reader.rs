//! Recursive-descent reader: turns source text into a [`Expr`] syntax tree.
//!
//! A small hand-written cursor over the source bytes: at each position it
//! matches on the lookahead byte to decide whether it is reading a fixnum,
//! an atom, or a parenthesized list, recursing for nested forms.

use crate::ast::Expr;
use thiserror::Error;

const MAX_ATOM_LEN: usize = 32;

/// Errors the reader can report. Per the spec, an unrecognized character at
/// the top level is the one recoverable failure ("no tree"); everything
/// else here is defensive (an unterminated list) since the grammar is
/// simple enough that most malformed input surfaces as "no tree" too.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReaderError {
    #[error("no tree: unexpected character {0:?} at position {1}")]
    NoTree(char, usize),
    #[error("unterminated list starting at position {0}")]
    UnterminatedList(usize),
    #[error("unexpected end of input")]
    Eof,
}

/// Parse a complete source string into a single [`Expr`].
pub fn read(src: &str) -> Result<Expr, ReaderError> {
    let mut r = Reader::new(src);
    r.skip_whitespace();
    let expr = r.read_expr()?;
    Ok(expr)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Reader {
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn is_atom_char(b: u8) -> bool {
        (b as char).is_ascii_alphabetic() || b == b'+' || b == b'-'
    }

    fn read_expr(&mut self) -> Result<Expr, ReaderError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(ReaderError::Eof),
            Some(b) if b.is_ascii_digit() => Ok(self.read_fixnum()),
            Some(b) if Self::is_atom_char(b) => Ok(self.read_atom()),
            Some(b'(') => self.read_list(),
            Some(b) => Err(ReaderError::NoTree(b as char, self.pos)),
        }
    }

    fn read_fixnum(&mut self) -> Expr {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).expect("ascii digits");
        let v: i32 = text.parse().expect("digit run parses as i32");
        Expr::Fixnum(v)
    }

    /// Characters allowed after the first position of an atom.
    ///
    /// Primitive names like `zero?` and `integer->char` need `?` and `>` to
    /// round-trip through the reader, and multi-digit atoms need digits, so
    /// this widens the *continuation* character set beyond the first-char
    /// set to also admit digits, `?`, `!`, and `>` — see DESIGN.md.
    fn is_atom_continue_char(b: u8) -> bool {
        Self::is_atom_char(b) || b.is_ascii_digit() || b == b'?' || b == b'!' || b == b'>'
    }

    fn read_atom(&mut self) -> Expr {
        let start = self.pos;
        while self.pos - start < MAX_ATOM_LEN {
            match self.peek() {
                Some(b) if Self::is_atom_continue_char(b) => {
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).expect("ascii atom chars");
        Expr::atom(text)
    }

    fn read_list(&mut self) -> Result<Expr, ReaderError> {
        let open_pos = self.pos;
        self.advance(); // consume '('
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(ReaderError::UnterminatedList(open_pos)),
                Some(b')') => {
                    self.advance();
                    break;
                }
                _ => {
                    let item = self.read_expr()?;
                    items.push(item);
                }
            }
        }
        Ok(Expr::list(items))
    }
}
