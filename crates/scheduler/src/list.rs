//! Arena storage and intrusive doubly-linked lists of task records.
//!
//! Records live in a [`RecordArena`] and are addressed by slot index. Each
//! record carries its own `prev`/`next` links and a tag naming the one
//! [`TaskList`] it belongs to, so unlinking from the middle of a list is O(1).

use std::ops::{Index, IndexMut};

use crate::task::TaskRecord;

/// Which of a queue's three sublists holds a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListKind {
    Delayed,
    Pending,
    Processing,
}

/// Slot storage for task records.
///
/// Vacated slots are reused by later inserts, so slot indices stay small.
#[derive(Default)]
pub(crate) struct RecordArena {
    slots: Vec<Option<TaskRecord>>,
    vacant: Vec<usize>,
}

impl RecordArena {
    pub(crate) fn insert(&mut self, record: TaskRecord) -> usize {
        match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(record);
                slot
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn remove(&mut self, slot: usize) -> Option<TaskRecord> {
        let record = self.slots.get_mut(slot)?.take();
        if record.is_some() {
            self.vacant.push(slot);
        }
        record
    }

    pub(crate) fn get(&self, slot: usize) -> Option<&TaskRecord> {
        self.slots.get(slot)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> Option<&mut TaskRecord> {
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskRecord> {
        self.slots.iter_mut().flatten()
    }
}

impl Index<usize> for RecordArena {
    type Output = TaskRecord;

    fn index(&self, slot: usize) -> &TaskRecord {
        match self.get(slot) {
            Some(record) => record,
            None => panic!("task slot {slot} is vacant"),
        }
    }
}

impl IndexMut<usize> for RecordArena {
    fn index_mut(&mut self, slot: usize) -> &mut TaskRecord {
        match self.get_mut(slot) {
            Some(record) => record,
            None => panic!("task slot {slot} is vacant"),
        }
    }
}

/// Head/tail/count of one intrusive list threaded through the arena.
pub(crate) struct TaskList {
    kind: ListKind,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl TaskList {
    pub(crate) fn new(kind: ListKind) -> Self {
        Self {
            kind,
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn head(&self) -> Option<usize> {
        self.head
    }

    pub(crate) fn push_back(&mut self, arena: &mut RecordArena, slot: usize) {
        let record = &mut arena[slot];
        debug_assert!(record.location.is_none(), "record {slot} already linked");
        record.location = Some(self.kind);
        record.prev = self.tail;
        record.next = None;
        match self.tail {
            Some(tail) => arena[tail].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.len += 1;
    }

    /// Insert after the last record whose `queue_time` is not later than
    /// this one's. Scans from the tail, so in-order arrivals are O(1).
    pub(crate) fn insert_by_queue_time(&mut self, arena: &mut RecordArena, slot: usize) {
        let queue_time = arena[slot].queue_time;
        let mut cursor = self.tail;
        while let Some(at) = cursor {
            if arena[at].queue_time <= queue_time {
                break;
            }
            cursor = arena[at].prev;
        }
        match cursor {
            Some(after) if Some(after) == self.tail => self.push_back(arena, slot),
            Some(after) => {
                let next = arena[after].next;
                let record = &mut arena[slot];
                record.location = Some(self.kind);
                record.prev = Some(after);
                record.next = next;
                arena[after].next = Some(slot);
                if let Some(next) = next {
                    arena[next].prev = Some(slot);
                }
                self.len += 1;
            }
            None => self.push_front(arena, slot),
        }
    }

    pub(crate) fn push_front(&mut self, arena: &mut RecordArena, slot: usize) {
        let record = &mut arena[slot];
        debug_assert!(record.location.is_none(), "record {slot} already linked");
        record.location = Some(self.kind);
        record.prev = None;
        record.next = self.head;
        match self.head {
            Some(head) => arena[head].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
        self.len += 1;
    }

    pub(crate) fn unlink(&mut self, arena: &mut RecordArena, slot: usize) {
        let record = &mut arena[slot];
        debug_assert_eq!(record.location, Some(self.kind));
        let (prev, next) = (record.prev.take(), record.next.take());
        record.location = None;
        match prev {
            Some(prev) => arena[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena[next].prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    pub(crate) fn pop_front(&mut self, arena: &mut RecordArena) -> Option<usize> {
        let head = self.head?;
        self.unlink(arena, head);
        Some(head)
    }

    /// Move every record of `other` to the back of this list, keeping order.
    pub(crate) fn append(&mut self, other: &mut TaskList, arena: &mut RecordArena) {
        while let Some(slot) = other.pop_front(arena) {
            self.push_back(arena, slot);
        }
    }

    /// Move every record of `other` to the front of this list, keeping order.
    pub(crate) fn prepend(&mut self, other: &mut TaskList, arena: &mut RecordArena) {
        while let Some(slot) = other.tail {
            other.unlink(arena, slot);
            self.push_front(arena, slot);
        }
    }

    /// Slots in list order.
    pub(crate) fn slots(&self, arena: &RecordArena) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            out.push(slot);
            cursor = arena[slot].next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lanes_core::Lane;

    use super::*;
    use crate::task::{RecordSeed, TaskJob, TaskOptions, TaskOutcome, TaskShared};

    fn record(arena: &mut RecordArena, id: u64, queue_ms: u64) -> usize {
        let (job, _rx) = TaskJob::new(|_| TaskOutcome::ready(()));
        let mut seed = RecordSeed::new(
            Duration::ZERO,
            &TaskOptions::default(),
            job,
            TaskShared::new(Lane::Render),
        );
        seed.queue_time = Duration::from_millis(queue_ms);
        arena.insert(TaskRecord::new(id, seed))
    }

    fn ids(list: &TaskList, arena: &RecordArena) -> Vec<u64> {
        list.slots(arena).into_iter().map(|s| arena[s].id).collect()
    }

    #[test]
    fn push_and_pop_fifo() {
        let mut arena = RecordArena::default();
        let mut list = TaskList::new(ListKind::Pending);
        for id in 1..=3 {
            let slot = record(&mut arena, id, 0);
            list.push_back(&mut arena, slot);
        }
        assert_eq!(list.len(), 3);
        assert_eq!(ids(&list, &arena), vec![1, 2, 3]);

        let first = list.pop_front(&mut arena).unwrap();
        assert_eq!(arena[first].id, 1);
        assert_eq!(arena[first].location, None);
        assert_eq!(ids(&list, &arena), vec![2, 3]);
    }

    #[test]
    fn unlink_middle_head_and_tail() {
        let mut arena = RecordArena::default();
        let mut list = TaskList::new(ListKind::Pending);
        let slots: Vec<usize> = (1..=4)
            .map(|id| {
                let slot = record(&mut arena, id, 0);
                list.push_back(&mut arena, slot);
                slot
            })
            .collect();

        list.unlink(&mut arena, slots[1]);
        assert_eq!(ids(&list, &arena), vec![1, 3, 4]);
        list.unlink(&mut arena, slots[0]);
        assert_eq!(ids(&list, &arena), vec![3, 4]);
        list.unlink(&mut arena, slots[3]);
        assert_eq!(ids(&list, &arena), vec![3]);
        list.unlink(&mut arena, slots[2]);
        assert!(list.is_empty());
        assert_eq!(list.head(), None);
    }

    #[test]
    fn insert_by_queue_time_keeps_order_and_fifo_ties() {
        let mut arena = RecordArena::default();
        let mut list = TaskList::new(ListKind::Delayed);
        for (id, ms) in [(1, 10), (2, 30), (3, 20), (4, 5), (5, 20)] {
            let slot = record(&mut arena, id, ms);
            list.insert_by_queue_time(&mut arena, slot);
        }
        assert_eq!(ids(&list, &arena), vec![4, 1, 3, 5, 2]);
    }

    #[test]
    fn append_and_prepend_retag() {
        let mut arena = RecordArena::default();
        let mut pending = TaskList::new(ListKind::Pending);
        let mut processing = TaskList::new(ListKind::Processing);
        for id in 1..=2 {
            let slot = record(&mut arena, id, 0);
            pending.push_back(&mut arena, slot);
        }
        processing.append(&mut pending, &mut arena);
        assert!(pending.is_empty());
        assert_eq!(ids(&processing, &arena), vec![1, 2]);
        for slot in processing.slots(&arena) {
            assert_eq!(arena[slot].location, Some(ListKind::Processing));
        }

        let slot = record(&mut arena, 3, 0);
        pending.push_back(&mut arena, slot);
        pending.prepend(&mut processing, &mut arena);
        assert_eq!(ids(&pending, &arena), vec![1, 2, 3]);
        assert!(processing.is_empty());
    }

    #[test]
    fn arena_reuses_vacant_slots() {
        let mut arena = RecordArena::default();
        let a = record(&mut arena, 1, 0);
        let _b = record(&mut arena, 2, 0);
        assert!(arena.remove(a).is_some());
        assert_eq!(arena.len(), 1);
        let c = record(&mut arena, 3, 0);
        assert_eq!(c, a);
        assert!(arena.remove(99).is_none());
    }
}
