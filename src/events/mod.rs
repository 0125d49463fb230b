use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted by the transaction lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TransactionCreated(Uuid),
    TransactionStatusChanged {
        transaction_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentCreated {
        transaction_id: Uuid,
        merchant_ref: String,
        reference: String,
    },
    PaymentReconciled {
        transaction_id: Uuid,
        gateway_status: String,
        corrected: bool,
    },
    CouponRedeemed {
        transaction_id: Uuid,
        code: String,
    },
    GamepassVerified {
        platform_user_id: i64,
        gamepass_id: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Builds the event channel pair used by the application.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Runs until every
/// sender is dropped.
pub fn spawn_event_logger(mut receiver: mpsc::Receiver<Event>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match &event {
                Event::TransactionStatusChanged {
                    transaction_id,
                    old_status,
                    new_status,
                } => {
                    info!(%transaction_id, %old_status, %new_status, "transaction status changed");
                }
                Event::PaymentCreated {
                    transaction_id,
                    merchant_ref,
                    reference,
                } => {
                    info!(%transaction_id, %merchant_ref, %reference, "payment created");
                }
                other => info!(event = ?other, "event"),
            }
        }
    })
}
