//! The timer min-heap backing `schedule_at`/`sleep_until`/`sleep_for`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use super::Job;

/// Opaque handle returned by `Scheduler::schedule_at`, usable with `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(super) u64);

pub(super) struct TimerEntry {
    pub(super) deadline: Instant,
    pub(super) seq: u64,
    pub(super) id: TimerId,
    pub(super) job: Option<Job>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: `BinaryHeap` is a max-heap, we want the earliest
        // deadline on top. Sequence number only breaks ties to make the
        // comparator total (§4.7: "unspecified relative order... broken by
        // insertion sequence number only to make the heap comparator
        // total, not to promise FIFO semantics").
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub(super) struct TimerWheel {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerWheel {
    pub(super) fn push(&mut self, deadline: Instant, id: TimerId, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            id,
            job: Some(job),
        });
    }

    pub(super) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Remove every entry whose deadline has passed, returning their jobs.
    pub(super) fn drain_expired(&mut self, now: Instant) -> Vec<Job> {
        let mut ready = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let mut entry = self.heap.pop().unwrap();
            if let Some(job) = entry.job.take() {
                ready.push(job);
            }
        }
        ready
    }

    /// Cancel a pending timer by id, returning its job (the caller decides
    /// how to activate it, typically with `ok = false`).
    pub(super) fn cancel(&mut self, id: TimerId) -> Option<Job> {
        let items: Vec<TimerEntry> = std::mem::take(&mut self.heap).into_sorted_vec();
        let mut job = None;
        for mut entry in items {
            if job.is_none() && entry.id.0 == id.0 {
                job = entry.job.take();
            } else if entry.job.is_some() {
                self.heap.push(entry);
            }
        }
        job
    }

    pub(super) fn drain_all(&mut self) -> Vec<Job> {
        let items = std::mem::take(&mut self.heap);
        items.into_iter().filter_map(|mut e| e.job.take()).collect()
    }
}
