//! LRU List Module
//!
//! Intrusive doubly-linked access-order list stored in an arena.
//!
//! Nodes live in a `Vec` and refer to their neighbours by index, so the
//! structure has no reference cycles and every operation is O(1):
//! - Head = Most recently used
//! - Tail = Least recently used
//!
//! Freed slots are recycled through a free list.

// == Node ==
#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

// == LRU List ==
/// Arena-backed doubly-linked list ordered from most to least recently used.
#[derive(Debug)]
pub struct LruList<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> Default for LruList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LruList<T> {
    // == Constructor ==
    /// Creates a new empty list.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    // == Push Front ==
    /// Inserts a value at the head and returns its handle.
    pub fn push_front(&mut self, value: T) -> usize {
        let node = Node {
            value,
            prev: None,
            next: self.head,
        };

        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            if let Some(n) = self.slots[old_head].as_mut() {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.len += 1;
        idx
    }

    // == Move To Front ==
    /// Promotes a node to the head. No-op for unknown handles.
    pub fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) || !self.contains(idx) {
            return;
        }
        self.unlink(idx);

        let old_head = self.head;
        if let Some(n) = self.slots[idx].as_mut() {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.slots[h].as_mut() {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    // == Remove ==
    /// Removes a node and returns its value.
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        if !self.contains(idx) {
            return None;
        }
        self.unlink(idx);
        let node = self.slots[idx].take()?;
        self.free.push(idx);
        self.len -= 1;
        Some(node.value)
    }

    /// Detaches a node from its neighbours without freeing the slot.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(n) => (n.prev, n.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(n) = self.slots[p].as_mut() {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.slots[nx].as_mut() {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    // == Accessors ==
    /// Returns the value stored at a handle.
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx)?.as_ref().map(|n| &n.value)
    }

    /// Returns a mutable reference to the value stored at a handle.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx)?.as_mut().map(|n| &mut n.value)
    }

    /// Handle of the least recently used node.
    pub fn back(&self) -> Option<usize> {
        self.tail
    }

    /// Handle of the most recently used node.
    pub fn front(&self) -> Option<usize> {
        self.head
    }

    /// Handle of the node one step closer to the head.
    pub fn prev(&self, idx: usize) -> Option<usize> {
        self.slots.get(idx)?.as_ref()?.prev
    }

    fn contains(&self, idx: usize) -> bool {
        matches!(self.slots.get(idx), Some(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every node and releases the arena.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    // == Iteration ==
    /// Iterates `(handle, value)` pairs from head (MRU) to tail (LRU).
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }
}

/// Head-to-tail iterator over an [`LruList`].
pub struct Iter<'a, T> {
    list: &'a LruList<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = self.list.slots.get(idx)?.as_ref()?;
        self.cursor = node.next;
        Some((idx, &node.value))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn order(list: &LruList<&'static str>) -> Vec<&'static str> {
        list.iter().map(|(_, v)| *v).collect()
    }

    #[test]
    fn test_lru_new() {
        let list: LruList<u32> = LruList::new();
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert_eq!(list.back(), None);
    }

    #[test]
    fn test_push_front_orders_mru_first() {
        let mut list = LruList::new();
        list.push_front("a");
        list.push_front("b");
        list.push_front("c");

        assert_eq!(order(&list), vec!["c", "b", "a"]);
        assert_eq!(list.get(list.back().unwrap()), Some(&"a"));
    }

    #[test]
    fn test_move_to_front() {
        let mut list = LruList::new();
        let a = list.push_front("a");
        list.push_front("b");
        list.push_front("c");

        list.move_to_front(a);

        assert_eq!(order(&list), vec!["a", "c", "b"]);
        assert_eq!(list.get(list.back().unwrap()), Some(&"b"));
    }

    #[test]
    fn test_move_tail_then_head_is_stable() {
        let mut list = LruList::new();
        let a = list.push_front("a");
        let b = list.push_front("b");

        list.move_to_front(a);
        list.move_to_front(a);
        assert_eq!(order(&list), vec!["a", "b"]);
        assert_eq!(list.back(), Some(b));
    }

    #[test]
    fn test_remove_middle_and_ends() {
        let mut list = LruList::new();
        let a = list.push_front("a");
        let b = list.push_front("b");
        let c = list.push_front("c");

        assert_eq!(list.remove(b), Some("b"));
        assert_eq!(order(&list), vec!["c", "a"]);

        assert_eq!(list.remove(a), Some("a"));
        assert_eq!(list.back(), Some(c));

        assert_eq!(list.remove(c), Some("c"));
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
        assert_eq!(list.back(), None);
    }

    #[test]
    fn test_remove_twice_returns_none() {
        let mut list = LruList::new();
        let a = list.push_front("a");
        assert!(list.remove(a).is_some());
        assert!(list.remove(a).is_none());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut list = LruList::new();
        let a = list.push_front("a");
        list.push_front("b");
        list.remove(a);

        let c = list.push_front("c");
        assert_eq!(c, a);
        assert_eq!(order(&list), vec!["c", "b"]);
    }

    #[test]
    fn test_prev_walks_toward_head() {
        let mut list = LruList::new();
        let a = list.push_front("a");
        let b = list.push_front("b");

        assert_eq!(list.prev(a), Some(b));
        assert_eq!(list.prev(b), None);
    }

    #[test]
    fn test_clear() {
        let mut list = LruList::new();
        list.push_front(1);
        list.push_front(2);
        list.clear();

        assert!(list.is_empty());
        assert_eq!(list.iter().count(), 0);
    }
}
