//! What a layout callback may look at while its atom is being built.
//!
//! A [`Scope`] is a read-only window on one container atom. While a record loads, field
//! callbacks get a scope that sees only the fields before the one being resolved, so a
//! length can never be read from bytes that are not there yet. Update callbacks run after
//! loading and see every field.

use crate::atom::Atom;
use crate::bits::BitType;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::schema::Type;
use crate::tree::{AtomId, Layout, Tree};
use crate::value::Value;

#[derive(Clone, Copy)]
pub struct Scope<'t> {
    tree: &'t Tree,
    id: AtomId,
    visible: usize,
}

impl<'t> Scope<'t> {
    /// Scope over `id` exposing its first `visible` members.
    pub(crate) fn new(tree: &'t Tree, id: AtomId, visible: usize) -> Self {
        Scope { tree, id, visible }
    }

    pub(crate) fn full(tree: &'t Tree, id: AtomId) -> Self {
        Scope::new(tree, id, usize::MAX)
    }

    /// The container itself.
    pub fn atom(&self) -> Atom<'t> {
        self.tree.atom(self.id)
    }

    pub fn config(&self) -> &'t Config {
        self.tree.config()
    }

    /// Offset of the container.
    pub fn offset(&self) -> u64 {
        self.atom().offset()
    }

    /// A member loaded before the one being resolved.
    pub fn field(&self, name: &str) -> Result<Atom<'t>> {
        let members = self.tree.members(self.id);
        match members.iter().position(|&m| self.tree.n(m).name == name) {
            Some(i) if i < self.visible => Ok(self.tree.atom(members[i])),
            Some(_) => Err(self.not_yet(name)),
            None if self.declares(name) => Err(self.not_yet(name)),
            None => Err(Error::not_found(name)),
        }
    }

    fn not_yet(&self, name: &str) -> Error {
        Error::init(format!("field {name:?} is read before it is loaded"))
    }

    fn declares(&self, name: &str) -> bool {
        match &self.tree.n(self.id).layout {
            Layout::Byte(Type::Record(r)) => r.fields().iter().any(|f| f.name() == name),
            Layout::Bit(BitType::Record(r)) => r.fields().iter().any(|f| f.name() == name),
            _ => false,
        }
    }

    pub fn value(&self, name: &str) -> Result<Value> {
        self.field(name)?.value()
    }

    /// An unsigned field as `u64`, the usual type of lengths and counts.
    pub fn uint(&self, name: &str) -> Result<u64> {
        let v = self.field(name)?.uint()?;
        u64::try_from(v).map_err(|_| Error::value(format!("{name} = {v} does not fit in 64 bits")))
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        let v = self.field(name)?.int()?;
        i64::try_from(v).map_err(|_| Error::value(format!("{name} = {v} does not fit in 64 bits")))
    }

    pub fn text(&self, name: &str) -> Result<String> {
        self.field(name)?.text()
    }

    /// Byte size of a visible member.
    pub fn size_of(&self, name: &str) -> Result<u64> {
        Ok(self.field(name)?.size())
    }

    /// Full view of the enclosing container.
    pub fn parent(&self) -> Option<Scope<'t>> {
        self.atom().parent().map(|p| Scope::full(self.tree, p.id()))
    }

    /// Full view of the nearest enclosing container whose type is named `type_name`.
    pub fn ancestor(&self, type_name: &str) -> Option<Scope<'t>> {
        self.atom()
            .getparent(Some(type_name))
            .map(|a| Scope::full(self.tree, a.id()))
    }

    pub fn root(&self) -> Scope<'t> {
        Scope::full(self.tree, self.atom().root().id())
    }
}
