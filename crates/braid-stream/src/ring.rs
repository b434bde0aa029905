use std::collections::VecDeque;

use braid_events::Event;

/// Fixed-capacity ring of the most recent events for one session. The
/// oldest entry is evicted on overflow; `sequence_id`s inside the ring
/// are strictly increasing and gap-free.
#[derive(Debug)]
pub struct EventRing {
    entries: VecDeque<Event>,
    capacity: usize,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: Event) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn oldest_id(&self) -> Option<u64> {
        self.entries.front().map(|event| event.sequence_id)
    }

    pub fn newest_id(&self) -> Option<u64> {
        self.entries.back().map(|event| event.sequence_id)
    }

    /// Whether a resumption cursor still falls within the buffered window.
    /// A cursor equal to or newer than the oldest entry minus one can be
    /// resumed without loss.
    pub fn covers(&self, last_event_id: u64) -> bool {
        match self.oldest_id() {
            Some(oldest) => last_event_id + 1 >= oldest,
            None => true,
        }
    }

    pub fn replay_after(&self, last_event_id: u64) -> impl Iterator<Item = &Event> {
        self.entries
            .iter()
            .filter(move |event| event.sequence_id > last_event_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
