//! Insertion-ordered keyed collection.
//!
//! One container type backs every record kind in the story state (entities,
//! assets, messages, sessions). Each record derives its own key through
//! [`Keyed`]; the collection never stores a key that could drift from the
//! record it points at.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors from collection lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error("Collection is empty")]
    EmptyCollection,

    #[error("Key not found: {0}")]
    KeyNotFound(String),
}

/// A record with a natural key.
pub trait Keyed {
    /// The key this record is stored under.
    fn key(&self) -> String;
}

/// An insertion-ordered key to value mapping.
///
/// Re-adding an existing key replaces the value in place and keeps its
/// original position.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    records: HashMap<String, (u64, T)>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<T: Keyed> Collection<T> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record by its key, returning the stored record.
    pub fn add(&mut self, item: T) -> &mut T {
        match self.records.entry(item.key()) {
            Entry::Occupied(entry) => {
                let slot = entry.into_mut();
                slot.1 = item;
                &mut slot.1
            }
            Entry::Vacant(entry) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.order.insert(seq, entry.key().clone());
                &mut entry.insert((seq, item)).1
            }
        }
    }

    /// Insert several records in order.
    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.add(item);
        }
    }
}

impl<T> Collection<T> {
    pub fn get(&self, key: &str) -> Option<&T> {
        self.records.get(key).map(|(_, item)| item)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.records.get_mut(key).map(|(_, item)| item)
    }

    /// Remove a record, returning it if it was present.
    pub fn remove(&mut self, key: &str) -> Option<T> {
        let (seq, item) = self.records.remove(key)?;
        self.order.remove(&seq);
        Some(item)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.values().map(String::as_str)
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.order
            .values()
            .filter_map(move |key| self.records.get(key).map(|(_, item)| item))
    }

    /// The oldest record.
    pub fn first(&self) -> Result<&T, CollectionError> {
        self.order
            .values()
            .next()
            .and_then(|key| self.get(key))
            .ok_or(CollectionError::EmptyCollection)
    }

    /// The newest record.
    pub fn last(&self) -> Result<&T, CollectionError> {
        self.order
            .values()
            .next_back()
            .and_then(|key| self.get(key))
            .ok_or(CollectionError::EmptyCollection)
    }

    /// Look up several records at once; fails on the first missing key.
    pub fn many<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<&T>, CollectionError> {
        keys.iter()
            .map(|key| {
                let key = key.as_ref();
                self.get(key)
                    .ok_or_else(|| CollectionError::KeyNotFound(key.to_string()))
            })
            .collect()
    }
}

impl<T: Keyed> FromIterator<T> for Collection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut collection = Self::new();
        collection.extend(iter);
        collection
    }
}

impl<T: PartialEq> PartialEq for Collection<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .order
                .values()
                .zip(other.order.values())
                .all(|(a, b)| a == b && self.get(a) == other.get(b))
    }
}

/// Serialized as a plain list in insertion order.
impl<T: Serialize> Serialize for Collection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de, T: Keyed + DeserializeOwned> Deserialize<'de> for Collection<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(items.into_iter().collect())
    }
}
