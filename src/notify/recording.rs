//! In-process recorders for realtime events and pushes

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::notify::{Audience, EventBus, PushMessage, PushSender, RealtimeEvent};

/// Event bus that keeps every emitted event
#[derive(Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<(Audience, RealtimeEvent)>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Audience, RealtimeEvent)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn to_partner(&self, partner_id: Uuid) -> Vec<RealtimeEvent> {
        self.events()
            .into_iter()
            .filter(|(a, _)| *a == Audience::Partner(partner_id))
            .map(|(_, e)| e)
            .collect()
    }

    pub fn to_booking(&self, booking_id: &str) -> Vec<RealtimeEvent> {
        self.events()
            .into_iter()
            .filter(|(a, _)| matches!(a, Audience::Booking(id) if id == booking_id))
            .map(|(_, e)| e)
            .collect()
    }

    /// Names of the events sent to a partner, in order
    pub fn partner_event_names(&self, partner_id: Uuid) -> Vec<&'static str> {
        self.to_partner(partner_id).iter().map(|e| e.name()).collect()
    }

    pub fn booking_event_names(&self, booking_id: &str) -> Vec<&'static str> {
        self.to_booking(booking_id).iter().map(|e| e.name()).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventBus for RecordingEventBus {
    fn emit(&self, audience: Audience, event: RealtimeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((audience, event));
        }
    }
}

/// Push sender that keeps every message
#[derive(Default)]
pub struct RecordingPushSender {
    messages: Mutex<Vec<PushMessage>>,
}

impl RecordingPushSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PushMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PushSender for RecordingPushSender {
    async fn send(&self, message: PushMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }
}
