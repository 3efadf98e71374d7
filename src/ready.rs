//! # Ready Lists
//!
//! One FIFO queue of task handles per priority level. Arrival order is
//! queue order; putting a task back at the tail of its level is what
//! realizes round-robin among equal priorities.
//!
//! Head lookup and rotation are O(1). Finding the highest non-empty level
//! is a single `leading_zeros` on an occupancy bitmap, so selection cost
//! does not grow with `MAX_PRIORITIES`.

use heapless::Deque;

use crate::config::{MAX_PRIORITIES, MAX_TASKS};
use crate::error::{Error, Result};
use crate::task::{Priority, TaskHandle};

const _: () = assert!(MAX_PRIORITIES <= 32, "occupancy bitmap is a u32");

type Queue = Deque<TaskHandle, MAX_TASKS>;

const EMPTY_QUEUE: Queue = Deque::new();

pub struct ReadyLists {
    queues: [Queue; MAX_PRIORITIES],
    /// Bit `p` set ⇔ `queues[p]` is non-empty.
    occupied: u32,
}

impl ReadyLists {
    pub const fn new() -> Self {
        Self {
            queues: [EMPTY_QUEUE; MAX_PRIORITIES],
            occupied: 0,
        }
    }

    fn queue_mut(&mut self, priority: Priority) -> Result<&mut Queue> {
        self.queues
            .get_mut(priority as usize)
            .ok_or(Error::InvalidPriority)
    }

    /// Append `handle` to the tail of `priority`'s queue.
    ///
    /// A handle already queued at any level is a contract violation.
    pub fn insert(&mut self, handle: TaskHandle, priority: Priority) -> Result<()> {
        if priority as usize >= MAX_PRIORITIES {
            return Err(Error::InvalidPriority);
        }
        if self.find(handle).is_some() {
            return Err(Error::ContractViolation);
        }
        let queue = self.queue_mut(priority)?;
        queue.push_back(handle).map_err(|_| Error::ResourceExhausted)?;
        self.occupied |= 1 << priority;
        Ok(())
    }

    /// Remove `handle` from `priority`'s queue, keeping the order of the
    /// remaining entries.
    pub fn remove(&mut self, handle: TaskHandle, priority: Priority) -> Result<()> {
        let queue = self.queue_mut(priority)?;
        let mut found = false;
        for _ in 0..queue.len() {
            let Some(entry) = queue.pop_front() else { break };
            if entry == handle && !found {
                found = true;
                continue;
            }
            // Cannot fail: an entry was popped just above.
            let _ = queue.push_back(entry);
        }
        if queue.is_empty() {
            self.occupied &= !(1 << priority);
        }
        if found {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    /// Move the head of `priority`'s queue to its tail. Returns the handle
    /// that moved, if the level holds at least two entries.
    pub fn rotate(&mut self, priority: Priority) -> Option<TaskHandle> {
        let queue = self.queues.get_mut(priority as usize)?;
        if queue.len() < 2 {
            return None;
        }
        let head = queue.pop_front()?;
        let _ = queue.push_back(head);
        Some(head)
    }

    /// Greatest priority with at least one ready entry.
    #[inline]
    pub fn highest_nonempty_priority(&self) -> Option<Priority> {
        if self.occupied == 0 {
            None
        } else {
            Some((31 - self.occupied.leading_zeros()) as Priority)
        }
    }

    #[inline]
    pub fn front(&self, priority: Priority) -> Option<TaskHandle> {
        self.queues.get(priority as usize)?.front().copied()
    }

    /// Entries of one level, head first.
    pub fn iter(&self, priority: Priority) -> impl Iterator<Item = TaskHandle> + '_ {
        self.queues
            .get(priority as usize)
            .into_iter()
            .flat_map(|q| q.iter().copied())
    }

    #[inline]
    pub fn len(&self, priority: Priority) -> usize {
        self.queues.get(priority as usize).map_or(0, |q| q.len())
    }

    /// Total number of ready entries across all levels.
    pub fn total(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Level at which `handle` is queued, if any.
    pub fn find(&self, handle: TaskHandle) -> Option<Priority> {
        let mut levels = self.occupied;
        while levels != 0 {
            let p = levels.trailing_zeros();
            if self.queues[p as usize].iter().any(|&h| h == handle) {
                return Some(p as Priority);
            }
            levels &= levels - 1;
        }
        None
    }

    /// Number of occurrences of `handle` across all levels. Used by the
    /// invariant checker; anything above one is corruption.
    pub fn occurrences(&self, handle: TaskHandle) -> usize {
        self.queues
            .iter()
            .map(|q| q.iter().filter(|&&h| h == handle).count())
            .sum()
    }
}

impl Default for ReadyLists {
    fn default() -> Self {
        Self::new()
    }
}
