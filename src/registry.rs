//! Tag-to-type registries for dispatching on a discriminator field.
//!
//! A record picks its payload by looking the tag it just read up in a registry; unknown
//! tags fall back to the registry's default constructor (an opaque block by default), so
//! unfamiliar records still load and round-trip.

use crate::error::{Error, Result};
use crate::schema::Type;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

type DefaultFn<T> = Arc<dyn Fn(Option<u64>) -> T + Send + Sync>;

pub struct Registry<K, T = Type> {
    name: String,
    entries: HashMap<K, T>,
    default: DefaultFn<T>,
}

impl<K, T> Registry<K, T>
where
    K: Eq + Hash + Debug + Clone,
    T: Clone,
{
    /// Empty registry. `default` builds the fallback for an unknown tag from the optional
    /// length the caller supplies.
    pub fn new<F>(name: &str, default: F) -> Self
    where
        F: Fn(Option<u64>) -> T + Send + Sync + 'static,
    {
        Registry {
            name: name.to_string(),
            entries: HashMap::new(),
            default: Arc::new(default),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `value` under `tag`. A tag can be defined once.
    pub fn define(&mut self, tag: K, value: T) -> Result<()> {
        if self.entries.contains_key(&tag) {
            return Err(Error::schema(format!(
                "registry {}: tag {tag:?} is already defined",
                self.name
            )));
        }
        self.entries.insert(tag, value);
        Ok(())
    }

    pub fn contains(&self, tag: &K) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn lookup(&self, tag: &K) -> Option<&T> {
        self.entries.get(tag)
    }

    pub fn lookup_or(&self, tag: &K, fallback: T) -> T {
        self.entries.get(tag).cloned().unwrap_or(fallback)
    }

    /// The registered entry, or the default built for `length`.
    pub fn get(&self, tag: &K, length: Option<u64>) -> T {
        match self.entries.get(tag) {
            Some(t) => t.clone(),
            None => {
                log::debug!("{}: no entry for {tag:?}, using default", self.name);
                (self.default)(length)
            }
        }
    }

    /// Copy every entry of `other` into `self`. If any tag clashes nothing is copied.
    pub fn merge(&mut self, other: &Registry<K, T>) -> Result<()> {
        if let Some(tag) = other.entries.keys().find(|t| self.entries.contains_key(*t)) {
            return Err(Error::schema(format!(
                "registry {}: tag {tag:?} from {} is already defined",
                self.name, other.name
            )));
        }
        for (tag, value) in &other.entries {
            self.entries.insert(tag.clone(), value.clone());
        }
        Ok(())
    }

    pub fn tags(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K> Registry<K, Type>
where
    K: Eq + Hash + Debug + Clone,
{
    /// Registry whose unknown tags load as a block of the given length (empty if none).
    pub fn of_types(name: &str) -> Self {
        Registry::new(name, |len| Type::block(len.unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redefinition_fails() {
        let mut r: Registry<u8> = Registry::of_types("records");
        r.define(1, Type::u8()).expect("first definition");
        assert!(matches!(r.define(1, Type::u16le()), Err(Error::Schema(_))));
    }

    #[test]
    fn default_uses_length() {
        let r: Registry<u8> = Registry::of_types("records");
        assert_eq!(r.get(&9, Some(3)).static_size(), Some(3));
        assert_eq!(r.get(&9, None).static_size(), Some(0));
    }
}
