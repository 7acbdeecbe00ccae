//! First-in, first-out discipline

use std::collections::VecDeque;

use super::QueueingDiscipline;
use crate::queue::request::{DiskRequest, Priority};

/// Serves requests strictly in arrival order. Priority is ignored.
#[derive(Debug, Default)]
pub struct Fifo {
    queue: VecDeque<DiskRequest>,
}

impl Fifo {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
        }
    }
}

impl QueueingDiscipline for Fifo {
    fn enqueue(&mut self, req: DiskRequest, _priority: Priority) {
        self.queue.push_back(req);
    }

    fn dequeue(&mut self) -> Option<DiskRequest> {
        self.queue.pop_front()
    }

    fn peek(&self) -> Option<&DiskRequest> {
        self.queue.front()
    }

    fn promote(&mut self, _parity_stripe_id: u64, _reconstruction_unit: u64) -> bool {
        false
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}
