//! In-memory scheduler: a FIFO queue of dynamic-next requests.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use statecraft_core::scheduler::{DynamicNext, Scheduler};

/// Collects `add_dynamic_next` calls for a driver to pop in order.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    queue: Mutex<VecDeque<DynamicNext>>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest pending request.
    pub fn pop(&self) -> Option<DynamicNext> {
        self.lock().pop_front()
    }

    /// All pending requests, oldest first.
    pub fn drain(&self) -> Vec<DynamicNext> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Poison is ignored: push and pop never leave the queue inconsistent.
    fn lock(&self) -> MutexGuard<'_, VecDeque<DynamicNext>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for InMemoryScheduler {
    fn add_dynamic_next(&self, next: &str, input: Value) {
        tracing::debug!(next = %next, "dynamic next queued");
        self.lock().push_back(DynamicNext::new(next, input));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requests_are_fifo() {
        let scheduler = InMemoryScheduler::new();
        scheduler.add_dynamic_next("A", json!(1));
        scheduler.add_dynamic_next("B", json!(2));
        scheduler.add_dynamic_next("A", json!(3));
        assert_eq!(scheduler.len(), 3);

        assert_eq!(scheduler.pop(), Some(DynamicNext::new("A", json!(1))));
        assert_eq!(
            scheduler.drain(),
            vec![DynamicNext::new("B", json!(2)), DynamicNext::new("A", json!(3))]
        );
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.pop(), None);
    }
}
