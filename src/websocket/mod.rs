//! WebSocket server for partner dispatch and customer booking tracking
//!
//! Every realtime event goes through one broadcast channel. Each connection's
//! send task filters envelopes against that connection's audience: its own
//! partner id, and the bookings it has joined.

mod customer;
mod partner;

pub use customer::customer_ws_handler;
pub use partner::partner_ws_handler;

use axum::{
    extract::ws::{Message, WebSocket},
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::Actor;
use crate::notify::{Audience, EventBus, RealtimeEvent};
use crate::state::AppState;

const BROADCAST_CAPACITY: usize = 1024;

/// A realtime event on its way to the connections it is addressed to
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Monotonic emission order
    pub seq: u64,
    pub audience: Audience,
    pub event: RealtimeEvent,
}

/// Connected client
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub actor: Actor,
    /// Joined bookings, with the envelope sequence at join time
    pub bookings: HashMap<String, u64>,
}

/// Connection registry and broadcast hub; the process-wide [`EventBus`]
#[derive(Clone)]
pub struct WsHub {
    tx: broadcast::Sender<Envelope>,
    seq: Arc<AtomicU64>,
    clients: Arc<RwLock<HashMap<Uuid, ClientInfo>>>,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    async fn register(&self, connection_id: Uuid, actor: Actor) {
        self.clients.write().await.insert(
            connection_id,
            ClientInfo {
                actor,
                bookings: HashMap::new(),
            },
        );
        tracing::info!(
            connection_id = %connection_id,
            actor_id = %actor.id,
            role = actor.role.as_str(),
            "Realtime client connected"
        );
    }

    async fn unregister(&self, connection_id: Uuid) {
        self.clients.write().await.remove(&connection_id);
        tracing::info!(connection_id = %connection_id, "Realtime client disconnected");
    }

    /// Start delivering booking events emitted from now on to the connection
    pub async fn join_booking(&self, connection_id: Uuid, booking_id: &str) {
        let since = self.seq.load(Ordering::SeqCst);
        if let Some(client) = self.clients.write().await.get_mut(&connection_id) {
            client.bookings.entry(booking_id.to_string()).or_insert(since);
        }
    }

    pub async fn leave_booking(&self, connection_id: Uuid, booking_id: &str) -> bool {
        match self.clients.write().await.get_mut(&connection_id) {
            Some(client) => client.bookings.remove(booking_id).is_some(),
            None => false,
        }
    }

    pub async fn is_following(&self, connection_id: Uuid, booking_id: &str) -> bool {
        self.clients
            .read()
            .await
            .get(&connection_id)
            .is_some_and(|c| c.bookings.contains_key(booking_id))
    }

    pub async fn connected_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn should_deliver(&self, connection_id: Uuid, envelope: &Envelope) -> bool {
        let clients = self.clients.read().await;
        let Some(client) = clients.get(&connection_id) else {
            return false;
        };
        match &envelope.audience {
            Audience::Partner(partner_id) => {
                client.actor.role == crate::models::Role::Partner && client.actor.id == *partner_id
            }
            Audience::Booking(booking_id) => client
                .bookings
                .get(booking_id)
                .is_some_and(|since| envelope.seq > *since),
        }
    }
}

impl EventBus for WsHub {
    fn emit(&self, audience: Audience, event: RealtimeEvent) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let name = event.name();
        if self
            .tx
            .send(Envelope {
                seq,
                audience: audience.clone(),
                event,
            })
            .is_err()
        {
            tracing::trace!(?audience, event = name, "No realtime listeners");
        }
    }
}

/// Control frames answering a client's own messages
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ControlFrame {
    Online { pincodes: Vec<String> },
    Offline,
    Pong,
    #[serde(rename_all = "camelCase")]
    Joined { booking_id: String },
    #[serde(rename_all = "camelCase")]
    Left { booking_id: String },
    Error { message: String },
}

impl ControlFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ControlFrame::Error {
            message: message.into(),
        }
    }
}

impl From<&ApiError> for ControlFrame {
    fn from(err: &ApiError) -> Self {
        ControlFrame::error(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Event(RealtimeEvent),
    Control(ControlFrame),
}

/// Inbound frame `{"event": ..., "data": {...}}`; `data` may be omitted
#[derive(Debug, Deserialize)]
struct Inbound {
    event: String,
    #[serde(default)]
    data: Value,
}

fn payload<T: DeserializeOwned>(data: Value) -> Result<T, ControlFrame> {
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| ControlFrame::error(format!("Invalid payload: {}", e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingRef {
    #[serde(alias = "booking_id")]
    booking_id: String,
}

/// What a session handler gets to work with
pub struct SessionContext {
    pub state: AppState,
    pub connection_id: Uuid,
    pub actor: Actor,
    reply: mpsc::Sender<Outbound>,
}

impl SessionContext {
    pub async fn send(&self, frame: Outbound) {
        if self.reply.send(frame).await.is_err() {
            tracing::debug!(connection_id = %self.connection_id, "Reply dropped, connection closing");
        }
    }

    pub async fn control(&self, frame: ControlFrame) {
        self.send(Outbound::Control(frame)).await;
    }

    pub async fn event(&self, event: RealtimeEvent) {
        self.send(Outbound::Event(event)).await;
    }
}

/// Role specific handling of inbound frames
#[axum::async_trait]
trait SessionHandler: Send + 'static {
    async fn on_message(&mut self, ctx: &SessionContext, event: &str, data: Value);
}

/// Bearer token from the `Authorization` header, else the `access_token` query parameter
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub access_token: Option<String>,
}

fn authenticate(
    state: &AppState,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    query: &WsAuthQuery,
) -> Result<Actor, Response> {
    let token = bearer
        .map(|TypedHeader(Authorization(b))| b.token().to_string())
        .or_else(|| query.access_token.clone())
        .ok_or_else(|| ApiError::Unauthorized("Missing access token".to_string()).into_response())?;

    state.auth_service.authenticate(&token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected websocket token");
        ApiError::Unauthorized("Invalid token".to_string()).into_response()
    })
}

/// Pump one connection until either side closes
async fn run_session<H: SessionHandler>(socket: WebSocket, state: AppState, actor: Actor, mut handler: H) -> Uuid {
    let connection_id = Uuid::new_v4();
    let hub = state.hub.clone();
    hub.register(connection_id, actor).await;

    let (mut sender, mut receiver) = socket.split();
    let (internal_tx, mut internal_rx) = mpsc::channel::<Outbound>(32);
    let mut rx = hub.subscribe();

    let hub_send = hub.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                received = rx.recv() => match received {
                    Ok(envelope) => {
                        if !hub_send.should_deliver(connection_id, &envelope).await {
                            continue;
                        }
                        Outbound::Event(envelope.event)
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(connection_id = %connection_id, skipped, "Realtime client lagging");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(frame) = internal_rx.recv() => frame,
                else => break,
            };

            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize realtime frame"),
            }
        }
    });

    let ctx = SessionContext {
        state,
        connection_id,
        actor,
        reply: internal_tx,
    };
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<Inbound>(&text) {
                    Ok(inbound) => {
                        tracing::debug!(connection_id = %ctx.connection_id, event = %inbound.event, "Realtime message");
                        handler.on_message(&ctx, &inbound.event, inbound.data).await;
                    }
                    Err(_) => {
                        ctx.control(ControlFrame::error("Malformed message")).await;
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    hub.unregister(connection_id).await;
    connection_id
}
