use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// String-keyed map remembering insertion order.
///
/// Lookups are hashed; iteration follows the order in which keys were first
/// inserted. Replacing the value of an existing key keeps its position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<(String, V)>", into = "Vec<(String, V)>")]
pub struct OrderedMap<V: Clone> {
    keys: Vec<String>,
    values: HashMap<String, V>,
}

impl<V: Clone> OrderedMap<V> {
    pub fn new() -> Self {
        OrderedMap {
            keys: Vec::new(),
            values: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.values.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.values.get_mut(key)
    }

    /// Insert or replace; returns the previous value of `key`
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        if !self.values.contains_key(&key) {
            self.keys.push(key.clone());
        }
        self.values.insert(key, value)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let removed = self.values.remove(key)?;
        self.keys.retain(|k| k != key);
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.values.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.keys.iter().filter_map(move |k| self.values.get(k))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.keys
            .iter()
            .filter_map(move |k| self.values.get(k).map(|v| (k.as_str(), v)))
    }
}

impl<V: Clone> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Two maps are equal when they hold the same keys with equal values,
/// regardless of insertion order.
impl<V: Clone + PartialEq> PartialEq for OrderedMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).map_or(false, |w| v == w))
    }
}

impl<V: Clone + Eq> Eq for OrderedMap<V> {}

impl<V: Clone> From<Vec<(String, V)>> for OrderedMap<V> {
    fn from(pairs: Vec<(String, V)>) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in pairs {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Clone> From<OrderedMap<V>> for Vec<(String, V)> {
    fn from(mut map: OrderedMap<V>) -> Self {
        let keys = std::mem::take(&mut map.keys);
        keys.into_iter()
            .filter_map(|k| map.values.remove(&k).map(|v| (k, v)))
            .collect()
    }
}
