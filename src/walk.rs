//! Traversal over loaded trees.
//!
//! Everything here is read-only and works on whatever has been loaded so far: nothing is
//! read from the source and no pointer is dereferenced along the way. A pointer's referent
//! shows up in a walk only once [`Tree::dereference`](crate::tree::Tree::dereference) has
//! cached it.
//!
//! ## Orders
//!
//! | Function | Visits |
//! |----------|--------|
//! | [`Walk`] (via [`Atom::walk`]) | the atom, then every descendant, pre-order |
//! | [`leaves`] | atoms without members (scalars, blocks, strings, bit integers) |
//! | [`ancestors`] | parent, grandparent, ... up to the root |
//! | [`find`] | first atom of a walk matching a predicate |
//!
//! ## Comparing
//!
//! [`compare`] pairs up two trees leaf by leaf and reports every leaf whose bytes differ,
//! plus leaves present on one side only. It is the quickest way to see what an edit
//! touched:
//!
//! ```ignore
//! let before = tree.copy(root)?;
//! tree.set_at(root, "hdr.len", 4u16)?;
//! for d in compare(&tree.atom(before), &tree.atom(root)) {
//!     println!("{d}");
//! }
//! ```

use crate::atom::Atom;
use std::fmt;

/// Pre-order iterator over an atom and its descendants.
pub struct Walk<'t> {
    stack: Vec<Atom<'t>>,
}

impl<'t> Walk<'t> {
    pub(crate) fn new(start: Atom<'t>) -> Self {
        Walk { stack: vec![start] }
    }
}

impl<'t> Iterator for Walk<'t> {
    type Item = Atom<'t>;

    fn next(&mut self) -> Option<Atom<'t>> {
        let atom = self.stack.pop()?;
        let mut children = atom.structural();
        children.reverse();
        self.stack.extend(children);
        Some(atom)
    }
}

fn is_leaf(atom: &Atom<'_>) -> bool {
    atom.structural().is_empty()
}

pub fn leaves<'t>(atom: &Atom<'t>) -> impl Iterator<Item = Atom<'t>> {
    atom.walk().filter(is_leaf)
}

pub fn ancestors<'t>(atom: &Atom<'t>) -> impl Iterator<Item = Atom<'t>> {
    std::iter::successors(atom.parent(), |a| a.parent())
}

pub fn find<'t, F>(atom: &Atom<'t>, mut predicate: F) -> Option<Atom<'t>>
where
    F: FnMut(&Atom<'t>) -> bool,
{
    atom.walk().find(|a| predicate(a))
}

/// One leaf that differs between two trees. Paths are relative to the compared atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    Changed {
        path: String,
        offset: u64,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    Removed { path: String },
    Added { path: String },
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difference::Changed {
                path,
                offset,
                before,
                after,
            } => write!(
                f,
                "{path} @{offset:#x}: {} -> {}",
                crate::dump::hex(before),
                crate::dump::hex(after)
            ),
            Difference::Removed { path } => write!(f, "{path}: removed"),
            Difference::Added { path } => write!(f, "{path}: added"),
        }
    }
}

fn relative(root: &Atom<'_>, atom: &Atom<'_>) -> String {
    let base = root.path();
    let full = atom.path();
    match full.strip_prefix(&base) {
        Some(rest) => rest.trim_start_matches('.').to_string(),
        None => full,
    }
}

/// Leaf-by-leaf differences between `a` and `b`, paired up by relative path.
pub fn compare(a: &Atom<'_>, b: &Atom<'_>) -> Vec<Difference> {
    let left: Vec<(String, Atom<'_>)> = leaves(a).map(|x| (relative(a, &x), x)).collect();
    let right: Vec<(String, Atom<'_>)> = leaves(b).map(|x| (relative(b, &x), x)).collect();
    let mut out = Vec::new();
    for (path, x) in &left {
        match right.iter().find(|(p, _)| p == path) {
            Some((_, y)) => {
                let (before, after) = (x.serialize(), y.serialize());
                if before != after {
                    out.push(Difference::Changed {
                        path: path.clone(),
                        offset: y.offset(),
                        before,
                        after,
                    });
                }
            }
            None => out.push(Difference::Removed { path: path.clone() }),
        }
    }
    for (path, _) in &right {
        if !left.iter().any(|(p, _)| p == path) {
            out.push(Difference::Added { path: path.clone() });
        }
    }
    out
}
