// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Index-linked task queues.
//!
//! Kernel objects (ready queues, IPC wait queues, the free and recycle
//! lists) chain tasks together through a [`QueueLink`] embedded in each
//! TCB. A [`TaskQueue`] is just the head/tail pair; the links live in the
//! items themselves, so insertion and removal are O(1) and no allocation is
//! ever involved. Indices replace the pointers a C kernel would use here,
//! which is what lets all of this stay in safe code.
//!
//! A task's embedded link participates in at most one queue at a time; the
//! scheduler's status bits decide which one. `TaskQueue` is `Copy` so a
//! queue embedded in a TCB (a join queue) can be lifted out, operated on
//! against `&mut [Task]`, and stored back.

/// Sentinel index meaning "no item". Doubles as the null link.
pub const NONE_INDEX: u16 = u16::MAX;

/// A doubly-linked queue membership record, embedded in each queueable
/// object.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueLink {
    prev: u16,
    next: u16,
}

impl QueueLink {
    pub const UNLINKED: Self = Self {
        prev: NONE_INDEX,
        next: NONE_INDEX,
    };
}

/// Implemented by objects that can sit on a [`TaskQueue`].
pub trait HasQueueLink {
    fn link(&self) -> &QueueLink;
    fn link_mut(&mut self) -> &mut QueueLink;
}

/// Head/tail of an index-linked queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskQueue {
    head: u16,
    tail: u16,
}

impl TaskQueue {
    pub const EMPTY: Self = Self {
        head: NONE_INDEX,
        tail: NONE_INDEX,
    };

    pub fn is_empty(&self) -> bool {
        self.head == NONE_INDEX
    }

    /// First item, if any.
    pub fn head(&self) -> Option<usize> {
        if self.head == NONE_INDEX {
            None
        } else {
            Some(usize::from(self.head))
        }
    }

    /// Inserts item `i` at the front.
    ///
    /// # Panics
    ///
    /// If `i`'s link is visibly still in use. (A singleton queue member has
    /// an all-sentinel link too, so this cannot catch every double insert;
    /// the callers' status bits carry the real invariant.)
    pub fn push_head<T: HasQueueLink>(&mut self, items: &mut [T], i: usize) {
        uassert!(*items[i].link() == QueueLink::UNLINKED);
        let old_head = self.head;
        items[i].link_mut().next = old_head;
        if old_head != NONE_INDEX {
            items[usize::from(old_head)].link_mut().prev = i as u16;
        } else {
            self.tail = i as u16;
        }
        self.head = i as u16;
    }

    /// Inserts item `i` at the back.
    pub fn push_tail<T: HasQueueLink>(&mut self, items: &mut [T], i: usize) {
        uassert!(*items[i].link() == QueueLink::UNLINKED);
        let old_tail = self.tail;
        items[i].link_mut().prev = old_tail;
        if old_tail != NONE_INDEX {
            items[usize::from(old_tail)].link_mut().next = i as u16;
        } else {
            self.head = i as u16;
        }
        self.tail = i as u16;
    }

    /// Unlinks item `i`, which must be a member of *this* queue.
    pub fn remove<T: HasQueueLink>(&mut self, items: &mut [T], i: usize) {
        let QueueLink { prev, next } = *items[i].link();
        if prev != NONE_INDEX {
            items[usize::from(prev)].link_mut().next = next;
        } else {
            self.head = next;
        }
        if next != NONE_INDEX {
            items[usize::from(next)].link_mut().prev = prev;
        } else {
            self.tail = prev;
        }
        *items[i].link_mut() = QueueLink::UNLINKED;
    }

    /// Unlinks and returns the first item.
    pub fn pop_head<T: HasQueueLink>(
        &mut self,
        items: &mut [T],
    ) -> Option<usize> {
        let i = self.head()?;
        self.remove(items, i);
        Some(i)
    }
}

/// Successor of item `i` in whatever queue it is on. Reading the successor
/// *before* waking/removing `i` is how wait-queue walks survive removal of
/// the current element.
pub fn next_of<T: HasQueueLink>(items: &[T], i: usize) -> Option<usize> {
    let next = items[i].link().next;
    if next == NONE_INDEX {
        None
    } else {
        Some(usize::from(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        link: QueueLink,
        tag: u32,
    }

    impl HasQueueLink for Node {
        fn link(&self) -> &QueueLink {
            &self.link
        }
        fn link_mut(&mut self) -> &mut QueueLink {
            &mut self.link
        }
    }

    fn nodes(n: usize) -> Vec<Node> {
        (0..n)
            .map(|tag| Node {
                link: QueueLink::UNLINKED,
                tag: tag as u32,
            })
            .collect()
    }

    fn collect(q: &TaskQueue, items: &[Node]) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cur = q.head();
        while let Some(i) = cur {
            out.push(items[i].tag);
            cur = next_of(items, i);
        }
        out
    }

    #[test]
    fn push_tail_preserves_fifo_order() {
        let mut items = nodes(4);
        let mut q = TaskQueue::EMPTY;
        for i in 0..4 {
            q.push_tail(&mut items, i);
        }
        assert_eq!(collect(&q, &items), [0, 1, 2, 3]);
    }

    #[test]
    fn push_head_prepends() {
        let mut items = nodes(3);
        let mut q = TaskQueue::EMPTY;
        q.push_tail(&mut items, 0);
        q.push_head(&mut items, 1);
        assert_eq!(collect(&q, &items), [1, 0]);
    }

    #[test]
    fn remove_middle_head_and_tail() {
        let mut items = nodes(5);
        let mut q = TaskQueue::EMPTY;
        for i in 0..5 {
            q.push_tail(&mut items, i);
        }

        q.remove(&mut items, 2); // middle
        assert_eq!(collect(&q, &items), [0, 1, 3, 4]);

        q.remove(&mut items, 0); // head
        assert_eq!(collect(&q, &items), [1, 3, 4]);

        q.remove(&mut items, 4); // tail
        assert_eq!(collect(&q, &items), [1, 3]);

        // Removed nodes are reusable.
        assert_eq!(items[2].link, QueueLink::UNLINKED);
        q.push_tail(&mut items, 2);
        assert_eq!(collect(&q, &items), [1, 3, 2]);
    }

    #[test]
    fn removing_last_item_empties_queue() {
        let mut items = nodes(1);
        let mut q = TaskQueue::EMPTY;
        q.push_tail(&mut items, 0);
        q.remove(&mut items, 0);
        assert!(q.is_empty());
        assert_eq!(q, TaskQueue::EMPTY);
    }

    #[test]
    fn pop_head_drains_in_order() {
        let mut items = nodes(3);
        let mut q = TaskQueue::EMPTY;
        for i in 0..3 {
            q.push_tail(&mut items, i);
        }
        assert_eq!(q.pop_head(&mut items), Some(0));
        assert_eq!(q.pop_head(&mut items), Some(1));
        assert_eq!(q.pop_head(&mut items), Some(2));
        assert_eq!(q.pop_head(&mut items), None);
    }

    #[test]
    fn walk_survives_removal_of_current() {
        let mut items = nodes(4);
        let mut q = TaskQueue::EMPTY;
        for i in 0..4 {
            q.push_tail(&mut items, i);
        }

        // Remove every even-tagged node during a walk, reading the
        // successor first, the way wait-queue wakes do.
        let mut cur = q.head();
        while let Some(i) = cur {
            let next = next_of(&items, i);
            if items[i].tag % 2 == 0 {
                q.remove(&mut items, i);
            }
            cur = next;
        }
        assert_eq!(collect(&q, &items), [1, 3]);
    }
}
