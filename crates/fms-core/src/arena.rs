//! Fixed-capacity doubly-linked list backed by an arena of slots.
//!
//! Slots 0 and 1 are permanent head and tail sentinels; payload nodes are
//! drawn from a free stack, so no allocation happens after construction and
//! slot indices stay stable for the life of a node. Mutations stamp a
//! monotonically increasing version used to detect stale references.

use std::time::Instant;

pub const HEAD: usize = 0;
pub const TAIL: usize = 1;

#[derive(Debug, Clone)]
struct Node<T> {
    prev: usize,
    next: usize,
    data: T,
}

#[derive(Debug)]
pub struct List<T> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    len: usize,
    version: u64,
    epoch: Instant,
}

impl<T: Default + Clone> List<T> {
    /// A list able to hold `capacity` payload nodes, with the given sentinel
    /// payloads at head and tail.
    pub fn new(capacity: usize, head: T, tail: T) -> Self {
        let mut nodes = Vec::with_capacity(capacity + 2);
        nodes.push(Node {
            prev: HEAD,
            next: TAIL,
            data: head,
        });
        nodes.push(Node {
            prev: HEAD,
            next: TAIL,
            data: tail,
        });
        for _ in 0..capacity {
            nodes.push(Node {
                prev: HEAD,
                next: TAIL,
                data: T::default(),
            });
        }
        // Pop order is ascending slot index.
        let free = (2..capacity + 2).rev().collect();
        Self {
            nodes,
            free,
            len: 0,
            version: 0,
            epoch: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len() - 2
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Stamp a new version. Derived from the elapsed monotonic clock but
    /// clamped to be strictly increasing even for back-to-back mutations.
    pub fn bump(&mut self) {
        let now = self.epoch.elapsed().as_nanos() as u64;
        self.version = now.max(self.version + 1);
    }

    /// True when `slot` currently addresses a sentinel or a live node.
    pub fn is_live(&self, slot: usize) -> bool {
        slot < self.nodes.len() && !self.free.contains(&slot) && {
            // A detached slot is its own region; linked slots always point
            // into the chain.
            slot <= TAIL || self.in_chain(slot)
        }
    }

    fn in_chain(&self, slot: usize) -> bool {
        let mut cur = self.nodes[HEAD].next;
        while cur != TAIL {
            if cur == slot {
                return true;
            }
            cur = self.nodes[cur].next;
        }
        false
    }

    /// Insert `data` immediately before `anchor` (a live slot or `TAIL`).
    /// Returns the new slot, or `None` when the pool is exhausted.
    pub fn insert_before(&mut self, data: T, anchor: usize) -> Option<usize> {
        let slot = self.free.pop()?;
        let prev = self.nodes[anchor].prev;
        self.nodes[slot] = Node {
            prev,
            next: anchor,
            data,
        };
        self.nodes[prev].next = slot;
        self.nodes[anchor].prev = slot;
        self.len += 1;
        Some(slot)
    }

    /// Insert `data` immediately after `anchor` (a live slot or `HEAD`).
    pub fn insert_after(&mut self, data: T, anchor: usize) -> Option<usize> {
        let next = self.nodes[anchor].next;
        self.insert_before(data, next)
    }

    pub fn push_back(&mut self, data: T) -> Option<usize> {
        self.insert_before(data, TAIL)
    }

    /// Remove `slot` from the chain and return it to the free pool.
    pub fn unlink(&mut self, slot: usize) {
        debug_assert!(slot > TAIL);
        let Node { prev, next, .. } = self.nodes[slot];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[slot].data = T::default();
        self.free.push(slot);
        self.len -= 1;
    }

    /// Drop every payload node, keeping the sentinels.
    pub fn clear(&mut self) {
        while self.nodes[HEAD].next != TAIL {
            let slot = self.nodes[HEAD].next;
            self.unlink(slot);
        }
    }

    pub fn first(&self) -> Option<usize> {
        let slot = self.nodes[HEAD].next;
        (slot != TAIL).then_some(slot)
    }

    pub fn last(&self) -> Option<usize> {
        let slot = self.nodes[TAIL].prev;
        (slot != HEAD).then_some(slot)
    }

    /// Successor slot, `TAIL` sentinel included.
    pub fn next(&self, slot: usize) -> usize {
        self.nodes[slot].next
    }

    /// Predecessor slot, `HEAD` sentinel included.
    pub fn prev(&self, slot: usize) -> usize {
        self.nodes[slot].prev
    }

    pub fn get(&self, slot: usize) -> &T {
        &self.nodes[slot].data
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut T {
        &mut self.nodes[slot].data
    }

    /// Slot of the `n`th payload node (0-based), walking from the head.
    pub fn nth(&self, n: usize) -> Option<usize> {
        if n >= self.len {
            return None;
        }
        let mut cur = self.nodes[HEAD].next;
        for _ in 0..n {
            cur = self.nodes[cur].next;
        }
        Some(cur)
    }

    /// 0-based position of `slot` in the chain.
    pub fn position(&self, slot: usize) -> Option<usize> {
        let mut cur = self.nodes[HEAD].next;
        let mut idx = 0;
        while cur != TAIL {
            if cur == slot {
                return Some(idx);
            }
            cur = self.nodes[cur].next;
            idx += 1;
        }
        None
    }

    /// Payload slots in chain order.
    pub fn iter_slots(&self) -> SlotIter<'_, T> {
        SlotIter {
            list: self,
            cur: self.nodes[HEAD].next,
        }
    }

    /// Structural copy from `other`: identical slot layout, chain links and
    /// payloads, so slot indices remain valid across the copy. Both lists
    /// must share a capacity. The version is stamped fresh, not copied.
    pub fn clone_slots_from(&mut self, other: &List<T>) {
        debug_assert_eq!(self.capacity(), other.capacity());
        self.nodes = other.nodes.clone();
        self.free = other.free.clone();
        self.len = other.len;
        self.bump();
    }
}

pub struct SlotIter<'a, T> {
    list: &'a List<T>,
    cur: usize,
}

impl<T> Iterator for SlotIter<'_, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == TAIL {
            return None;
        }
        let slot = self.cur;
        self.cur = self.list.nodes[slot].next;
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(list: &List<i32>) -> Vec<i32> {
        list.iter_slots().map(|s| *list.get(s)).collect()
    }

    #[test]
    fn insert_and_order() {
        let mut list = List::new(8, 0, 0);
        let a = list.push_back(1).unwrap();
        let c = list.push_back(3).unwrap();
        list.insert_before(2, c).unwrap();
        list.insert_after(4, c).unwrap();
        assert_eq!(collect(&list), vec![1, 2, 3, 4]);
        assert_eq!(list.position(a), Some(0));
        assert_eq!(list.nth(2), Some(c));
    }

    #[test]
    fn unlink_recycles_slots() {
        let mut list = List::new(2, 0, 0);
        let a = list.push_back(1).unwrap();
        let b = list.push_back(2).unwrap();
        assert!(list.push_back(3).is_none());
        list.unlink(a);
        let c = list.push_back(3).unwrap();
        assert_eq!(c, a);
        assert_eq!(collect(&list), vec![2, 3]);
        assert_eq!(list.first(), Some(b));
        assert_eq!(list.last(), Some(c));
    }

    #[test]
    fn exhaustion_returns_none_without_change() {
        let mut list = List::new(1, 0, 0);
        list.push_back(1).unwrap();
        let before = collect(&list);
        assert!(list.insert_before(9, TAIL).is_none());
        assert_eq!(collect(&list), before);
    }

    #[test]
    fn version_strictly_increases() {
        let mut list: List<i32> = List::new(4, 0, 0);
        let mut last = list.version();
        for _ in 0..100 {
            list.bump();
            assert!(list.version() > last);
            last = list.version();
        }
    }

    #[test]
    fn structural_copy_preserves_slots() {
        let mut src = List::new(4, 0, 0);
        let a = src.push_back(10).unwrap();
        let b = src.push_back(20).unwrap();
        src.unlink(a);
        let mut dst: List<i32> = List::new(4, 0, 0);
        dst.clone_slots_from(&src);
        assert_eq!(collect(&dst), vec![20]);
        assert_eq!(dst.first(), Some(b));
        // Freed slots keep the same recycle order.
        assert_eq!(dst.push_back(30), src.push_back(30));
    }
}
