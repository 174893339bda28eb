//! Singly-linked, name-to-integer binding environment.
//!
//! Used twice by the compiler: once for locals (name → negative stack
//! offset from `rsp`), once for labels (name → absolute byte offset into
//! the code buffer). A lookup walks the list head-first, so the first match
//! wins — lexical shadowing falls out for free.
//!
//! The spec describes these as borrowed, stack-lifetime nodes. This crate
//! uses `Rc<Node>` instead of a borrowed linked list: `CompilerContext` is
//! threaded through the tree walk by value (cheaply cloned), and borrowing
//! an environment chain through that recursion without an arena would need
//! either unsafe lifetime extension or a generation-indexed arena — more
//! machinery than the gain justifies for a compile-time-only structure this
//! small. See DESIGN.md.

use std::rc::Rc;

struct Node {
    name: String,
    value: i64,
    parent: Env,
}

/// An environment: either empty, or a name bound to an integer with a
/// parent environment to fall back to.
#[derive(Clone)]
pub struct Env(Option<Rc<Node>>);

impl Env {
    /// The empty environment.
    pub fn new() -> Self {
        Env(None)
    }

    /// Bind `name` to `value`, shadowing any existing binding of the same
    /// name, and return the extended environment. `self` is left unchanged
    /// (structural sharing, not mutation) so the caller can still use the
    /// pre-extension environment elsewhere.
    pub fn extend(&self, name: impl Into<String>, value: i64) -> Env {
        Env(Some(Rc::new(Node {
            name: name.into(),
            value,
            parent: self.clone(),
        })))
    }

    /// Look up `name`, walking from the most-recently-bound entry outward.
    pub fn lookup(&self, name: &str) -> Option<i64> {
        let mut cur = self;
        loop {
            match &cur.0 {
                None => return None,
                Some(node) => {
                    if node.name == name {
                        return Some(node.value);
                    }
                    cur = &node.parent;
                }
            }
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_miss_on_empty() {
        assert_eq!(Env::new().lookup("x"), None);
    }

    #[test]
    fn lookup_hit() {
        let env = Env::new().extend("x", -8);
        assert_eq!(env.lookup("x"), Some(-8));
    }

    #[test]
    fn shadowing_first_match_wins() {
        let env = Env::new().extend("x", -8).extend("x", -16);
        assert_eq!(env.lookup("x"), Some(-16));
    }

    #[test]
    fn extend_does_not_mutate_parent() {
        let base = Env::new().extend("x", -8);
        let _extended = base.extend("y", -16);
        assert_eq!(base.lookup("y"), None);
        assert_eq!(base.lookup("x"), Some(-8));
    }
}
