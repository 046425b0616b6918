//! Event system for quest and ledger operations
//!
//! Services emit events only after their transaction commits, so a listener
//! never sees an event for a rolled-back change. Notification delivery
//! (WebSocket, email) subscribes here.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Events emitted by services
#[derive(Debug, Clone)]
pub enum CoreEvent {
    // Application events
    ApplicationCreated {
        id: String,
        quest_id: String,
        applicant_id: String,
        attempt_number: i64,
    },
    ApplicationApproved {
        id: String,
        quest_id: String,
        applicant_id: String,
        reviewed_by: String,
    },
    ApplicationRejected {
        id: String,
        quest_id: String,
        applicant_id: String,
        reviewed_by: String,
    },
    ApplicationKicked {
        id: String,
        quest_id: String,
        applicant_id: String,
        kicked_by: String,
        reason: Option<String>,
    },

    // Quest events
    QuestCreated {
        id: String,
        creator_id: String,
        escrowed: i64,
    },
    QuestReconciled {
        id: String,
        previous_status: String,
        status: String,
        assigned_to: Option<String>,
        assignment_cleared: bool,
    },
    ParticipantLeft {
        quest_id: String,
        user_id: String,
    },
    QuestCompleted {
        id: String,
        participants: usize,
        paid_out: i64,
    },
    QuestDeleted {
        id: String,
        refunded: i64,
    },

    // Ledger events
    GoldAwarded {
        user_id: String,
        amount: i64,
        transaction_id: String,
        quest_id: Option<String>,
    },
    PaymentGoldAwarded {
        payment_proof_id: String,
        user_id: String,
        amount: i64,
        transaction_id: String,
    },
    PaymentProofReviewed {
        id: String,
        status: String,
        reviewed_by: String,
    },
    BalanceRepaired {
        user_id: String,
        previous: i64,
        balance: i64,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &CoreEvent);
}

/// Event bus for broadcasting core events
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: CoreEvent) {
        trace!(event = ?event, "Emitting core event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Emit events gathered by one committed operation, in order
    pub fn emit_all(&self, events: Vec<CoreEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &CoreEvent) {
        match event {
            CoreEvent::ApplicationKicked { id, quest_id, kicked_by, .. } => {
                info!(application_id = %id, quest_id = %quest_id, kicked_by = %kicked_by, "Application kicked");
            }
            CoreEvent::QuestReconciled { id, previous_status, status, .. } => {
                info!(quest_id = %id, from = %previous_status, to = %status, "Quest reconciled");
            }
            CoreEvent::PaymentGoldAwarded { payment_proof_id, user_id, amount, .. } => {
                info!(payment_proof_id = %payment_proof_id, user_id = %user_id, amount, "Payment gold awarded");
            }
            CoreEvent::BalanceRepaired { user_id, previous, balance } => {
                info!(user_id = %user_id, previous, balance, "Balance repaired");
            }
            _ => {
                debug!(event = ?event, "Core event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(CoreEvent::QuestCreated {
            id: "quest-1".into(),
            creator_id: "alice".into(),
            escrowed: 110,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            CoreEvent::QuestCreated { id, escrowed, .. } => {
                assert_eq!(id, "quest-1");
                assert_eq!(escrowed, 110);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_emit_all_preserves_order() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit_all(vec![
            CoreEvent::ParticipantLeft { quest_id: "q".into(), user_id: "a".into() },
            CoreEvent::QuestDeleted { id: "q".into(), refunded: 0 },
        ]);

        assert!(matches!(receiver.recv().await.unwrap(), CoreEvent::ParticipantLeft { .. }));
        assert!(matches!(receiver.recv().await.unwrap(), CoreEvent::QuestDeleted { .. }));
    }

    #[tokio::test]
    async fn test_logging_listener_drains_and_stops_when_bus_dropped() {
        let bus = Arc::new(EventBus::new());
        let handle = spawn_logging_listener(bus.clone());
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(CoreEvent::BalanceRepaired { user_id: "alice".into(), previous: -7, balance: 100 });
        drop(bus);

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener did not stop")
            .expect("listener panicked");
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        // Should not panic even with no subscribers
        bus.emit(CoreEvent::QuestDeleted { id: "q".into(), refunded: 0 });
    }
}
