//! A byte-indexed prefix trie over ASCII keys, shared by the file index and
//! the folder index. Each instantiation is its own clean type over its value
//! `V`; unlike the reference, the file and folder tries do not share a
//! representation via reinterpreting one struct as another.

use std::sync::RwLock;

const ALPHABET_SIZE: usize = 128;

struct Node<V> {
    children: Box<[Option<Box<Node<V>>>; ALPHABET_SIZE]>,
    value: Option<V>,
}

impl<V> Node<V> {
    fn empty() -> Self {
        Node { children: Box::new(std::array::from_fn(|_| None)), value: None }
    }
}

/// A key byte outside the trie's accepted ASCII alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonAsciiKey;

/// A shared-exclusive, byte-keyed prefix trie holding owned copies of `V`.
pub struct PrefixTrie<V> {
    root: RwLock<Node<V>>,
}

impl<V: Clone> Default for PrefixTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> PrefixTrie<V> {
    pub fn new() -> Self {
        PrefixTrie { root: RwLock::new(Node::empty()) }
    }

    fn validate(key: &str) -> Result<(), NonAsciiKey> {
        if key.bytes().any(|b| b as usize >= ALPHABET_SIZE) {
            Err(NonAsciiKey)
        } else {
            Ok(())
        }
    }

    /// Inserts or replaces the value at `key`.
    pub fn insert(&self, key: &str, value: V) -> Result<(), NonAsciiKey> {
        Self::validate(key)?;
        let mut root = self.root.write().unwrap();
        let mut node = &mut *root;
        for b in key.bytes() {
            node = node.children[b as usize].get_or_insert_with(|| Box::new(Node::empty()));
        }
        node.value = Some(value);
        Ok(())
    }

    /// Returns an owned copy of the value at `key`, if present.
    pub fn search(&self, key: &str) -> Option<V> {
        if Self::validate(key).is_err() {
            return None;
        }
        let root = self.root.read().unwrap();
        let mut node = &*root;
        for b in key.bytes() {
            match &node.children[b as usize] {
                Some(child) => node = child,
                None => return None,
            }
        }
        node.value.clone()
    }

    /// Replaces the value at `key` in place. Does nothing (and returns
    /// `false`) if `key` has no existing value, unlike `insert`.
    pub fn update(&self, key: &str, value: V) -> bool {
        if Self::validate(key).is_err() {
            return false;
        }
        let mut root = self.root.write().unwrap();
        let mut node = &mut *root;
        for b in key.bytes() {
            match node.children[b as usize].as_mut() {
                Some(child) => node = child,
                None => return false,
            }
        }
        if node.value.is_some() {
            node.value = Some(value);
            true
        } else {
            false
        }
    }

    /// Removes the value at `key` and prunes any branch left with no
    /// terminal descendants.
    pub fn delete(&self, key: &str) {
        if Self::validate(key).is_err() {
            return;
        }
        let mut root = self.root.write().unwrap();
        delete_helper(&mut root, key.as_bytes());
    }

    /// Collects up to `max` values, depth-first, under a shared guard.
    pub fn enumerate(&self, max: usize) -> Vec<V> {
        let root = self.root.read().unwrap();
        let mut out = Vec::new();
        collect(&root, &mut out, max);
        out
    }
}

fn delete_helper<V>(node: &mut Node<V>, key: &[u8]) -> bool {
    if key.is_empty() {
        node.value = None;
        return node.children.iter().all(|c| c.is_none());
    }

    let idx = key[0] as usize;
    if idx >= ALPHABET_SIZE {
        return false;
    }

    let should_prune_child = match node.children[idx].as_mut() {
        Some(child) => delete_helper(child, &key[1..]),
        None => return false,
    };

    if should_prune_child {
        node.children[idx] = None;
    }

    node.value.is_none() && node.children.iter().all(|c| c.is_none())
}

fn collect<V: Clone>(node: &Node<V>, out: &mut Vec<V>, max: usize) {
    if out.len() >= max {
        return;
    }
    if let Some(v) = &node.value {
        out.push(v.clone());
    }
    for child in node.children.iter().flatten() {
        if out.len() >= max {
            return;
        }
        collect(child, out, max);
    }
}
