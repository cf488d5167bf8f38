//! Outbound notifications: realtime events and mobile push

mod events;
mod push;
mod recording;

pub use events::{Audience, EventBus, NewBookingOffer, NoopEventBus, RealtimeEvent};
pub use push::{booking_data, ExpoPushSender, NoopPushSender, PushMessage, PushSender, EXPO_PUSH_URL};
pub use recording::{RecordingEventBus, RecordingPushSender};

use std::sync::Arc;

/// Fire a push in the background; the caller never waits on the provider
pub fn spawn_push(sender: &Arc<dyn PushSender>, message: PushMessage) {
    if message.tokens.is_empty() {
        return;
    }
    let sender = Arc::clone(sender);
    tokio::spawn(async move {
        sender.send(message).await;
    });
}

/// Look up the customer's push token and notify them in the background
pub fn push_to_customer(
    store: &Arc<dyn crate::store::Store>,
    sender: &Arc<dyn PushSender>,
    customer_id: uuid::Uuid,
    title: impl Into<String>,
    body: impl Into<String>,
    data: serde_json::Value,
) {
    let store = Arc::clone(store);
    let sender = Arc::clone(sender);
    let title = title.into();
    let body = body.into();
    tokio::spawn(async move {
        match store.find_customer(customer_id).await {
            Ok(Some(customer)) => {
                let tokens = customer.push_token.into_iter();
                let message = PushMessage::new(tokens, title, body, data);
                if !message.tokens.is_empty() {
                    sender.send(message).await;
                }
            }
            Ok(None) => {
                tracing::warn!(customer_id = %customer_id, "Push skipped, customer not found")
            }
            Err(e) => {
                tracing::error!(customer_id = %customer_id, error = %e, "Push skipped, customer lookup failed")
            }
        }
    });
}
