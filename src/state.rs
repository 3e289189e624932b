//! Hierarchical session state addressed by dotted paths.
//!
//! `proj.title` names the `title` entry of the `proj` map at the root. Maps
//! are created on demand when writing; reading never creates anything.

use std::collections::BTreeMap;

use crate::Error;
use crate::value::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateStore {
    root: BTreeMap<String, Value>,
}

/// Split a dotted path, rejecting empty paths and empty segments
fn segments(path: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        None
    } else {
        Some(parts)
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` at `path`, creating intermediate maps as needed
    ///
    /// An intermediate segment that already holds a non-map value is never
    /// replaced; the write fails with `StatePathConflict` naming that segment.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), Error> {
        let parts = segments(path).ok_or_else(|| Error::InvalidStatePath(path.to_owned()))?;
        let Some((last, parents)) = parts.split_last() else {
            return Err(Error::InvalidStatePath(path.to_owned()));
        };

        let mut level = &mut self.root;
        for (i, segment) in parents.iter().enumerate() {
            let entry = level
                .entry((*segment).to_owned())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            level = match entry {
                Value::Map(map) => map,
                _ => return Err(Error::StatePathConflict(parts[..=i].join("."))),
            };
        }

        level.insert((*last).to_owned(), value);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Result<&Value, Error> {
        let not_found = || Error::StateKeyNotFound(path.to_owned());
        let parts = segments(path).ok_or_else(not_found)?;

        let mut current: Option<&Value> = None;
        for segment in parts {
            let level = match current {
                None => &self.root,
                Some(Value::Map(map)) => map,
                Some(_) => return Err(not_found()),
            };
            current = Some(level.get(segment).ok_or_else(not_found)?);
        }
        current.ok_or_else(not_found)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Look up `key` inside a structured value already resolved from state
    pub fn get_nested<'v>(root: &'v Value, key: &str) -> Result<&'v Value, Error> {
        match root {
            Value::Map(map) => map
                .get(key)
                .ok_or_else(|| Error::KeyNotFound(key.to_owned())),
            other => Err(Error::TypeError(format!(
                "cannot look up key '{key}' in {}",
                other.kind_name()
            ))),
        }
    }

    /// The whole store as a single map value
    pub fn snapshot(&self) -> Value {
        Value::Map(self.root.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}
