//! Agent state-change monitor.
//!
//! Observers subscribe to a broadcast of mode changes and suspend/resume
//! transitions. Nothing in the agent waits on observers.

use crate::agent::AgentMode;
use crate::runtime::TaskId;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    ModeChanged(AgentMode),
    TaskAgentStarted(TaskId),
    ExternAgentReady,
    SystemSuspended { pc: u64 },
    SystemResumed { pc: u64 },
    HostNotified(AgentMode),
    EventPosted,
}

pub struct Monitor {
    event_tx: broadcast::Sender<AgentEvent>,
}

impl Monitor {
    pub fn new() -> Self {
        // create a broadcast channel with capacity 100
        let (event_tx, _) = broadcast::channel(100);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_monitor_broadcast() {
        let monitor = Monitor::new();
        monitor.publish(AgentEvent::ExternAgentReady);

        let mut receiver = monitor.subscribe();
        monitor.publish(AgentEvent::SystemSuspended { pc: 0x1234 });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event, AgentEvent::SystemSuspended { pc: 0x1234 });
    }
}
