// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sortlinks: ordered lists of pending absolute expirations.
//!
//! The kernel keeps two of these -- one for task waits, one for software
//! timers. Entries are [`SortNode`]s embedded in the owning control blocks,
//! ordered by strictly non-decreasing `response_time` (absolute cycles);
//! entries with equal expiry keep insertion order, so equal-deadline waits
//! wake FIFO.
//!
//! Insertion is biased for the common case of a new deadline landing later
//! than most outstanding ones: anything that does not beat the head is
//! placed by scanning backward from the tail.

use crate::list::NONE_INDEX;
use crate::time::{ticks_to_cycles, INVALID_TIME};

/// Expiry-list membership record, embedded in each timed object.
///
/// `response_time` survives unlinking when a power-mode freeze wants to
/// park a deadline for later re-arming, so linkedness is tracked
/// separately rather than inferred from the sentinel.
#[derive(Copy, Clone, Debug)]
pub struct SortNode {
    response_time: u64,
    prev: u16,
    next: u16,
    linked: bool,
}

impl SortNode {
    pub const UNLINKED: Self = Self {
        response_time: INVALID_TIME,
        prev: NONE_INDEX,
        next: NONE_INDEX,
        linked: false,
    };

    /// Absolute expiry in cycles; [`INVALID_TIME`] when not armed.
    pub fn response_time(&self) -> u64 {
        self.response_time
    }

    /// Stores a raw expiry in an unlinked node. Used to preserve the
    /// remaining deadline across a freeze.
    pub(crate) fn set_response_time(&mut self, t: u64) {
        uassert!(!self.linked);
        self.response_time = t;
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Implemented by control blocks that can sit on a [`SortLink`].
pub trait HasSortNode {
    fn sort_node(&self) -> &SortNode;
    fn sort_node_mut(&mut self) -> &mut SortNode;
}

/// An ordered expiry list over a slice of owners.
#[derive(Copy, Clone, Debug)]
pub struct SortLink {
    head: u16,
    tail: u16,
}

impl SortLink {
    pub const EMPTY: Self = Self {
        head: NONE_INDEX,
        tail: NONE_INDEX,
    };

    pub fn is_empty(&self) -> bool {
        self.head == NONE_INDEX
    }

    /// Owner index of the earliest expiry, if any.
    pub fn head(&self) -> Option<usize> {
        if self.head == NONE_INDEX {
            None
        } else {
            Some(usize::from(self.head))
        }
    }

    /// Arms owner `i` for `start_time + wait_ticks` and inserts it in
    /// expiry order. Equal expiries land after all existing equals.
    pub fn insert<T: HasSortNode>(
        &mut self,
        owners: &mut [T],
        i: usize,
        start_time: u64,
        wait_ticks: u32,
    ) {
        uassert!(!owners[i].sort_node().is_linked());
        let rt = start_time + ticks_to_cycles(wait_ticks);
        {
            let node = owners[i].sort_node_mut();
            node.response_time = rt;
            node.linked = true;
        }

        let head = self.head;
        if head == NONE_INDEX
            || owners[usize::from(head)].sort_node().response_time > rt
        {
            // New earliest deadline (or empty list): link at the front.
            owners[i].sort_node_mut().next = head;
            owners[i].sort_node_mut().prev = NONE_INDEX;
            if head != NONE_INDEX {
                owners[usize::from(head)].sort_node_mut().prev = i as u16;
            } else {
                self.tail = i as u16;
            }
            self.head = i as u16;
            return;
        }

        // Scan backward from the tail for the last entry not later than the
        // new one; the head check above guarantees we find it. Inserting
        // *after* it keeps equal expiries FIFO.
        let mut cur = usize::from(self.tail);
        loop {
            if owners[cur].sort_node().response_time <= rt {
                let next = owners[cur].sort_node().next;
                owners[i].sort_node_mut().prev = cur as u16;
                owners[i].sort_node_mut().next = next;
                owners[cur].sort_node_mut().next = i as u16;
                if next != NONE_INDEX {
                    owners[usize::from(next)].sort_node_mut().prev = i as u16;
                } else {
                    self.tail = i as u16;
                }
                return;
            }
            cur = usize::from(owners[cur].sort_node().prev);
        }
    }

    /// Unlinks owner `i` if armed, returning the expiry it was armed for.
    /// The caller is responsible for invalidating the scheduler's cached
    /// response time when this was the earliest entry.
    pub fn remove<T: HasSortNode>(
        &mut self,
        owners: &mut [T],
        i: usize,
    ) -> Option<u64> {
        if !owners[i].sort_node().is_linked() {
            return None;
        }
        let SortNode {
            response_time,
            prev,
            next,
            ..
        } = *owners[i].sort_node();

        if prev != NONE_INDEX {
            owners[usize::from(prev)].sort_node_mut().next = next;
        } else {
            self.head = next;
        }
        if next != NONE_INDEX {
            owners[usize::from(next)].sort_node_mut().prev = prev;
        } else {
            self.tail = prev;
        }
        *owners[i].sort_node_mut() = SortNode::UNLINKED;
        Some(response_time)
    }

    /// Earliest useful alarm deadline for this list: the head's expiry,
    /// floored to `now + precision` (no point programming the timer any
    /// closer), or a sentinel far-future value when the list is empty.
    pub fn peek_expiry<T: HasSortNode>(
        &self,
        owners: &[T],
        now: u64,
        precision: u64,
    ) -> u64 {
        let Some(head) = self.head() else {
            return INVALID_TIME - precision;
        };
        let rt = owners[head].sort_node().response_time;
        if rt <= now + precision {
            now + precision
        } else {
            rt
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CYCLES_PER_TICK;
    use proptest::prelude::*;

    struct Owner {
        node: SortNode,
    }

    impl HasSortNode for Owner {
        fn sort_node(&self) -> &SortNode {
            &self.node
        }
        fn sort_node_mut(&mut self) -> &mut SortNode {
            &mut self.node
        }
    }

    fn owners(n: usize) -> Vec<Owner> {
        (0..n)
            .map(|_| Owner {
                node: SortNode::UNLINKED,
            })
            .collect()
    }

    fn expiries(sl: &SortLink, owners: &[Owner]) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = sl.head();
        while let Some(i) = cur {
            let node = owners[i].sort_node();
            out.push(node.response_time());
            cur = if node.next == NONE_INDEX {
                None
            } else {
                Some(usize::from(node.next))
            };
        }
        out
    }

    fn order(sl: &SortLink, owners: &[Owner]) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = sl.head();
        while let Some(i) = cur {
            out.push(i);
            let next = owners[i].sort_node().next;
            cur = if next == NONE_INDEX {
                None
            } else {
                Some(usize::from(next))
            };
        }
        out
    }

    #[test]
    fn insert_orders_and_ties_stay_fifo() {
        // Deadlines 100, 50, 50, 200 ticks: iteration must see 50, 50,
        // 100, 200 with the two 50s in insertion order.
        let mut o = owners(4);
        let mut sl = SortLink::EMPTY;
        sl.insert(&mut o, 0, 0, 100);
        sl.insert(&mut o, 1, 0, 50);
        sl.insert(&mut o, 2, 0, 50);
        sl.insert(&mut o, 3, 0, 200);

        assert_eq!(order(&sl, &o), [1, 2, 0, 3]);
        assert_eq!(
            expiries(&sl, &o),
            [50, 50, 100, 200].map(|t| t * CYCLES_PER_TICK)
        );
    }

    #[test]
    fn remove_reports_expiry_and_unlinks() {
        let mut o = owners(3);
        let mut sl = SortLink::EMPTY;
        sl.insert(&mut o, 0, 0, 10);
        sl.insert(&mut o, 1, 0, 5);
        sl.insert(&mut o, 2, 0, 20);

        assert_eq!(sl.remove(&mut o, 1), Some(5 * CYCLES_PER_TICK));
        assert_eq!(order(&sl, &o), [0, 2]);
        assert_eq!(o[1].node.response_time(), INVALID_TIME);

        // A second remove of the same node is a no-op.
        assert_eq!(sl.remove(&mut o, 1), None);

        assert_eq!(sl.remove(&mut o, 0), Some(10 * CYCLES_PER_TICK));
        assert_eq!(sl.remove(&mut o, 2), Some(20 * CYCLES_PER_TICK));
        assert!(sl.is_empty());
    }

    #[test]
    fn peek_expiry_of_empty_list_is_far_future() {
        let o = owners(1);
        let sl = SortLink::EMPTY;
        assert_eq!(sl.peek_expiry(&o, 1000, 75), INVALID_TIME - 75);
    }

    #[test]
    fn peek_expiry_floors_to_now_plus_precision() {
        let mut o = owners(1);
        let mut sl = SortLink::EMPTY;
        sl.insert(&mut o, 0, 0, 1);

        // Head already due: floored.
        let now = 5 * CYCLES_PER_TICK;
        assert_eq!(sl.peek_expiry(&o, now, 75), now + 75);

        // Head comfortably in the future: reported as-is.
        assert_eq!(sl.peek_expiry(&o, 0, 75), CYCLES_PER_TICK);
    }

    #[test]
    fn preserved_expiry_survives_unlink() {
        let mut o = owners(1);
        let mut sl = SortLink::EMPTY;
        sl.insert(&mut o, 0, 0, 7);
        let rt = sl.remove(&mut o, 0).unwrap();
        o[0].node.set_response_time(rt);
        assert!(!o[0].node.is_linked());
        assert_eq!(o[0].node.response_time(), rt);
    }

    proptest! {
        #[test]
        fn arbitrary_inserts_stay_sorted(ticks in prop::collection::vec(0u32..500, 1..12)) {
            let mut o = owners(ticks.len());
            let mut sl = SortLink::EMPTY;
            for (i, &t) in ticks.iter().enumerate() {
                sl.insert(&mut o, i, 0, t);
            }
            let seen = expiries(&sl, &o);
            prop_assert_eq!(seen.len(), ticks.len());
            prop_assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        }

        #[test]
        fn equal_expiries_keep_insertion_order(n in 2usize..10) {
            let mut o = owners(n);
            let mut sl = SortLink::EMPTY;
            for i in 0..n {
                sl.insert(&mut o, i, 0, 42);
            }
            prop_assert_eq!(order(&sl, &o), (0..n).collect::<Vec<_>>());
        }
    }
}
