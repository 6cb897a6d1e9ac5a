//! Run lifecycle fan-out.
//!
//! Every scheduler owns one bus. Steps, cohorts and loops publish into it as
//! a run progresses; progress printers and tests subscribe. Events from
//! concurrent runs interleave on the same channel, so subscribers filter by
//! [`FlowEvent::run_id`].

use stepgraph_types::event::FlowEvent;
use tokio::sync::broadcast;

/// Sender half of the lifecycle channel. Clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    /// `capacity` bounds how far a slow subscriber may fall behind before it
    /// sees `Lagged`. Zero is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }

    /// Dropped silently when nobody is listening.
    pub fn publish(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
