//! Event queue of target-originated notifications awaiting the host.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetEvent {
    Breakpoint { task: u64, pc: u64 },
    Exception { vector: u32, pc: u64 },
    TaskState { task: u64, state: String },
    Text(String),
}

/// FIFO of pending events. Shared between posting contexts and the command loop.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<TargetEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self { events: Mutex::new(VecDeque::new()) }
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<TargetEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn post(&self, event: TargetEvent) {
        self.events().push_back(event);
    }

    /// Remove and return the oldest pending event.
    pub fn pop(&self) -> Option<TargetEvent> {
        self.events().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new();
        assert!(queue.is_empty());

        queue.post(TargetEvent::Breakpoint { task: 1, pc: 0x1000 });
        queue.post(TargetEvent::Text("second".to_string()));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(TargetEvent::Breakpoint { task: 1, pc: 0x1000 }));
        assert_eq!(queue.pop(), Some(TargetEvent::Text("second".to_string())));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&TargetEvent::Exception { vector: 6, pc: 0x40 }).unwrap();
        assert_eq!(json, r#"{"exception":{"vector":6,"pc":64}}"#);
    }
}
