use std::collections::HashMap;
use std::hash::Hash;

use crate::{Error, Result};

/// A node of the recency list, stored in the tracker's arena.
#[derive(Debug, Clone)]
struct Node<K> {
    key: K,
    /// Neighbour closer to rank 0 (more recently used).
    prev: Option<usize>,
    /// Neighbour closer to the tail (less recently used).
    next: Option<usize>,
}

/// Keeps a most-recently-used ordering over a set of tracked keys.
///
/// Every tracked key has a rank in `[0, len)`: the key tracked or accessed
/// last has rank 0 and [`last`](Self::last) returns the key with the highest
/// rank. The list lives in an arena of slots linked by index, so `track`,
/// `access` and `untrack` are O(1) and no node owns another.
#[derive(Debug, Clone)]
pub struct PositionTracker<K> {
    slots: Vec<Option<Node<K>>>,
    /// Slots freed by `untrack`, reused by the next `track`.
    vacant: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K> Default for PositionTracker<K> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }
}

impl<K: Copy + Eq + Hash> PositionTracker<K> {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns `true` if `key` is tracked.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Starts tracking `key` at rank 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyTracked`] if `key` is already tracked.
    pub fn track(&mut self, key: K) -> Result<()> {
        if self.index.contains_key(&key) {
            return Err(Error::AlreadyTracked);
        }

        let node = Node {
            key,
            prev: None,
            next: None,
        };
        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        self.index.insert(key, slot);
        self.push_front(slot);
        Ok(())
    }

    /// Moves a tracked `key` to rank 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Untracked`] if `key` is not tracked.
    pub fn access(&mut self, key: K) -> Result<()> {
        let slot = *self.index.get(&key).ok_or(Error::Untracked)?;
        if self.head != Some(slot) {
            self.unlink(slot);
            self.push_front(slot);
        }
        Ok(())
    }

    /// Stops tracking `key`; every key ranked after it moves up by one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Untracked`] if `key` is not tracked.
    pub fn untrack(&mut self, key: K) -> Result<()> {
        let slot = self.index.remove(&key).ok_or(Error::Untracked)?;
        self.unlink(slot);
        self.slots[slot] = None;
        self.vacant.push(slot);
        Ok(())
    }

    /// Returns the current rank of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Untracked`] if `key` is not tracked.
    pub fn position_of(&self, key: &K) -> Result<usize> {
        let target = *self.index.get(key).ok_or(Error::Untracked)?;
        let mut rank = 0;
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            if slot == target {
                return Ok(rank);
            }
            rank += 1;
            cursor = self.node(slot).and_then(|n| n.next);
        }
        Err(Error::Untracked)
    }

    /// Returns the least recently used key, if any.
    pub fn last(&self) -> Option<K> {
        self.tail.and_then(|slot| self.node(slot)).map(|n| n.key)
    }

    /// Iterates keys from rank 0 to the last rank.
    pub fn iter(&self) -> impl Iterator<Item = K> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.node(cursor?)?;
            cursor = node.next;
            Some(node.key)
        })
    }

    fn node(&self, slot: usize) -> Option<&Node<K>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<K>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(node) = self.node_mut(h) {
                    node.prev = Some(slot);
                }
            }
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node(slot) {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = None;
        }
    }
}
