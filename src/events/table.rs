//! The event table is the kernel's scheduler: a single time-ordered queue
//! over all five event kinds, with per-tick extraction into bags.  Entries
//! at equal times keep insertion order through a monotonic sequence
//! number, so two runs over the same project dispatch identically.
//!
//! A simulator has at most one internal event in flight.  Inserting a
//! second one cancels the first; cancellation is lazy, recorded in an
//! authority map and resolved when the stale heap entry surfaces.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use super::{
    CompleteEventBag, Event, ExternalEvent, InternalEvent, ObservationEvent, RequestEvent,
    SimulatorId,
};
use crate::time::Time;

#[derive(Debug)]
struct Scheduled {
    time: Time,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Priority queue over every pending event, keyed by time.
#[derive(Debug, Default)]
pub struct EventTable {
    heap: BinaryHeap<Reverse<Scheduled>>,
    // live internal entry per simulator: (time, seq) of the one event
    // that has not been cancelled by a later insertion
    internals: HashMap<SimulatorId, (Time, u64)>,
    seq: u64,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The number of live internal events for a simulator; at most one.
    pub fn count_internal(&self, simulator: SimulatorId) -> usize {
        usize::from(self.internals.contains_key(&simulator))
    }

    fn push(&mut self, time: Time, event: Event) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Reverse(Scheduled { time, seq, event }));
        seq
    }

    /// Inserts the internal event for its target, cancelling any internal
    /// event previously in flight for the same simulator.
    pub fn put_internal(&mut self, event: InternalEvent) {
        let target = event.target();
        let time = event.time();
        let seq = self.push(time, Event::Internal(event));
        self.internals.insert(target, (time, seq));
    }

    pub fn put_external(&mut self, event: ExternalEvent) {
        let time = event.time();
        self.push(time, Event::External(event));
    }

    pub fn put_request(&mut self, event: RequestEvent) {
        let time = event.time();
        self.push(time, Event::Request(event));
    }

    pub fn put_response(&mut self, event: ExternalEvent) {
        let time = event.time();
        self.push(time, Event::Response(event));
    }

    pub fn put_observation(&mut self, event: ObservationEvent) {
        let time = event.time();
        self.push(time, Event::Observation(event));
    }

    fn is_stale(&self, scheduled: &Scheduled) -> bool {
        match &scheduled.event {
            Event::Internal(event) => self
                .internals
                .get(&event.target())
                .map_or(true, |(time, seq)| {
                    *time != scheduled.time || *seq != scheduled.seq
                }),
            _ => false,
        }
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_stale(top) {
                self.heap.pop();
            } else {
                break;
            }
        }
    }

    /// The minimum time over all queues, `+inf` when nothing is pending.
    pub fn top_time(&mut self) -> Time {
        self.discard_stale();
        self.heap
            .peek()
            .map_or(Time::INFINITY, |Reverse(top)| top.time)
    }

    /// Atomically extracts every event scheduled at `top_time`, grouped by
    /// target simulator, with observation events held aside.
    pub fn pop_tick(&mut self) -> CompleteEventBag {
        let time = self.top_time();
        let mut bag = CompleteEventBag::new(time);
        if time.is_infinite() {
            return bag;
        }
        loop {
            self.discard_stale();
            match self.heap.peek() {
                Some(Reverse(top)) if top.time == time => {}
                _ => break,
            }
            let Some(Reverse(scheduled)) = self.heap.pop() else {
                break;
            };
            match scheduled.event {
                Event::Internal(event) => {
                    self.internals.remove(&event.target());
                    bag.bag_mut(event.target()).set_internal(event);
                }
                Event::External(event) | Event::Response(event) => {
                    bag.bag_mut(event.target()).push_external(event);
                }
                Event::Request(event) => {
                    bag.bag_mut(event.target()).push_request(event);
                }
                Event::Observation(event) => {
                    bag.push_observation(event);
                }
            }
        }
        bag
    }

    /// Cancels the internal event in flight for a simulator, if any.
    /// Called when a transition leaves the model passive.
    pub fn cancel_internal(&mut self, simulator: SimulatorId) {
        self.internals.remove(&simulator);
    }

    /// Erases every pending event referencing the given simulator, as
    /// target or source.  Used when a model is deleted.
    pub fn del_model_events(&mut self, simulator: SimulatorId) {
        self.internals.remove(&simulator);
        let entries = std::mem::take(&mut self.heap);
        self.heap = entries
            .into_iter()
            .filter(|Reverse(scheduled)| !scheduled.event.references(simulator))
            .collect();
    }
}
