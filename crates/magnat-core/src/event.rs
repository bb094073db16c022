use tracing::{debug, info, warn};

use crate::traits::Tracer;
use crate::types::FlowEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: FlowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Tracer for EventBus {
    fn record(&self, event: FlowEvent) {
        self.publish(event);
    }
}

/// Tracer that mirrors lifecycle events into `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn record(&self, event: FlowEvent) {
        match event {
            FlowEvent::RunStarted { run_id, flow, .. } => {
                info!(%run_id, %flow, "Flow run started");
            }
            FlowEvent::StepStarted {
                run_id, flow, step, ..
            } => {
                debug!(%run_id, %flow, %step, "Step started");
            }
            FlowEvent::StepRetried {
                run_id,
                step,
                attempt,
                error,
            } => {
                warn!(%run_id, %step, attempt, %error, "Step retried");
            }
            FlowEvent::StepFinished {
                run_id,
                flow,
                step,
                action,
                elapsed_ms,
            } => {
                debug!(%run_id, %flow, %step, %action, elapsed_ms, "Step finished");
            }
            FlowEvent::StepFailed {
                run_id,
                flow,
                step,
                error,
            } => {
                warn!(%run_id, %flow, %step, %error, "Step failed");
            }
            FlowEvent::RunFinished {
                run_id,
                flow,
                terminal,
                action,
                elapsed_ms,
                ..
            } => {
                info!(%run_id, %flow, %terminal, %action, elapsed_ms, "Flow run finished");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.record(FlowEvent::StepFinished {
            run_id: "r1".into(),
            flow: "main".into(),
            step: "echo".into(),
            action: Action::Default,
            elapsed_ms: 1,
        });

        match rx.recv().await.unwrap() {
            FlowEvent::StepFinished { step, action, .. } => {
                assert_eq!(step, "echo");
                assert_eq!(action, Action::Default);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(FlowEvent::StepRetried {
            run_id: "r1".into(),
            step: "s".into(),
            attempt: 1,
            error: "boom".into(),
        });
    }
}
