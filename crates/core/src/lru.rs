//! Recency-ordered cache backed by an index-linked arena.
//! 以索引串接節點池實作的 LRU 快取。

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// O(1) least-recently-used map. `head` is the most recent entry, `tail` the
/// least recent one. The cache never evicts on its own; callers decide when
/// to pop.
/// O(1) 的 LRU 映射；快取本身不會自動淘汰，由呼叫端決定何時移除。
#[derive(Debug)]
pub struct LruCache<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> Default for LruCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Reads a value without changing its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|entry| &entry.value)
    }

    /// Reads a value and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        self.slots[slot].as_ref().map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        self.slots[slot].as_mut().map(|entry| &mut entry.value)
    }

    /// Marks `key` most recently used. Returns false when absent.
    pub fn touch(&mut self, key: &K) -> bool {
        match self.index.get(key).copied() {
            Some(slot) => {
                self.promote(slot);
                true
            }
            None => false,
        }
    }

    /// Inserts or replaces `key` as the most recent entry, returning the
    /// previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(slot) = self.index.get(&key).copied() {
            self.promote(slot);
            return self.slots[slot]
                .as_mut()
                .map(|entry| std::mem::replace(&mut entry.value, value));
        }
        let entry = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        self.free.push(slot);
        self.slots[slot].take().map(|entry| entry.value)
    }

    /// Least recently used key, if any.
    pub fn peek_lru(&self) -> Option<&K> {
        let slot = self.tail?;
        self.slots[slot].as_ref().map(|entry| &entry.key)
    }

    /// Removes the least recently used entry whose key differs from
    /// `protected`. Walks towards the head past the protected key.
    pub fn pop_lru_excluding(&mut self, protected: Option<&K>) -> Option<(K, V)> {
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            let entry = self.slots[slot].as_ref()?;
            if protected != Some(&entry.key) {
                let key = entry.key.clone();
                let value = self.remove(&key)?;
                return Some((key, value));
            }
            cursor = entry.prev;
        }
        None
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match self.slots[slot].as_ref() {
                Some(entry) => {
                    keys.push(&entry.key);
                    cursor = entry.next;
                }
                None => break,
            }
        }
        keys
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn promote(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(head) = old_head {
            if let Some(entry) = self.slots[head].as_mut() {
                entry.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.slots[slot].as_ref() {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };
        match prev {
            Some(prev) => {
                if let Some(entry) = self.slots[prev].as_mut() {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next) => {
                if let Some(entry) = self.slots[next].as_mut() {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = None;
            entry.next = None;
        }
    }
}
