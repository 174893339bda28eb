//! Syntax tree produced by the reader and consumed by the compiler.
//!
//! A tagged union over three variants, dispatched by matching rather than
//! virtual methods.

use std::rc::Rc;

/// A node in the syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Fixnum(i32),
    Atom(String),
    Cons { car: Rc<Expr>, cdr: Rc<Expr> },
    /// The empty list. A single shared sentinel value; every occurrence of
    /// `()` in a parsed program is this same variant, so identity
    /// comparison is a valid (if redundant, given derived `PartialEq`)
    /// emptiness test.
    Nil,
}

impl Expr {
    pub fn cons(car: Expr, cdr: Expr) -> Expr {
        Expr::Cons {
            car: Rc::new(car),
            cdr: Rc::new(cdr),
        }
    }

    pub fn atom(s: impl Into<String>) -> Expr {
        Expr::Atom(s.into())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Expr::Nil)
    }

    /// Build a right-nested cons list ending in `nil` from a `Vec`.
    pub fn list(items: Vec<Expr>) -> Expr {
        items
            .into_iter()
            .rev()
            .fold(Expr::Nil, |acc, item| Expr::cons(item, acc))
    }

    /// View a `Cons`/`Nil` chain as a `Vec<&Expr>`. Panics (precondition
    /// violation) if the spine is not well-formed — i.e. some `cdr` is
    /// neither `Cons` nor `Nil`, which cannot arise from the reader but
    /// could from a hand-built malformed tree.
    pub fn iter_list(&self) -> Vec<&Expr> {
        let mut items = Vec::new();
        let mut cur = self;
        loop {
            match cur {
                Expr::Nil => break,
                Expr::Cons { car, cdr } => {
                    items.push(car.as_ref());
                    cur = cdr.as_ref();
                }
                other => panic!("improper list: tail is {:?}", other),
            }
        }
        items
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Expr::Atom(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_builder_round_trips_through_iter_list() {
        let l = Expr::list(vec![Expr::Fixnum(1), Expr::Fixnum(2), Expr::Fixnum(3)]);
        let items = l.iter_list();
        assert_eq!(items, vec![&Expr::Fixnum(1), &Expr::Fixnum(2), &Expr::Fixnum(3)]);
    }

    #[test]
    fn nil_is_nil() {
        assert!(Expr::Nil.is_nil());
        assert!(!Expr::Fixnum(0).is_nil());
    }
}
