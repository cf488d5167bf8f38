//! Partner availability registry
//!
//! Tracks which partners hold a live connection and which pincodes they are
//! serving right now. Entries are transient and die with the connection.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::GeoPoint;

#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityRecord {
    pub partner_id: Uuid,
    /// Live connection that registered the entry
    pub connection_id: Uuid,
    pub pincodes: HashSet<String>,
    pub location: Option<GeoPoint>,
    pub online_since: DateTime<Utc>,
}

impl AvailabilityRecord {
    pub fn new(
        partner_id: Uuid,
        connection_id: Uuid,
        pincodes: impl IntoIterator<Item = String>,
        location: Option<GeoPoint>,
    ) -> Self {
        Self {
            partner_id,
            connection_id,
            pincodes: pincodes.into_iter().collect(),
            location,
            online_since: Utc::now(),
        }
    }

    pub fn serves(&self, pincode: &str) -> bool {
        self.pincodes.contains(pincode)
    }
}

#[async_trait]
pub trait PartnerRegistry: Send + Sync {
    /// Insert or overwrite the partner's entry
    async fn mark_online(&self, record: AvailabilityRecord);

    /// Remove the partner's entry; returns whether one existed
    async fn mark_offline(&self, partner_id: Uuid) -> bool;

    /// Remove the entry only if it still belongs to `connection_id`
    async fn drop_connection(&self, partner_id: Uuid, connection_id: Uuid) -> bool;

    /// Every online partner serving the pincode
    async fn find_eligible(&self, pincode: &str) -> Vec<AvailabilityRecord>;

    async fn is_online(&self, partner_id: Uuid) -> bool;

    async fn online_count(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<Uuid, AvailabilityRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartnerRegistry for InMemoryRegistry {
    async fn mark_online(&self, record: AvailabilityRecord) {
        let mut entries = self.entries.write().await;
        tracing::info!(
            partner_id = %record.partner_id,
            pincodes = record.pincodes.len(),
            "Partner online"
        );
        entries.insert(record.partner_id, record);
    }

    async fn mark_offline(&self, partner_id: Uuid) -> bool {
        let removed = self.entries.write().await.remove(&partner_id).is_some();
        if removed {
            tracing::info!(partner_id = %partner_id, "Partner offline");
        }
        removed
    }

    async fn drop_connection(&self, partner_id: Uuid, connection_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&partner_id) {
            Some(record) if record.connection_id == connection_id => {
                entries.remove(&partner_id);
                tracing::info!(partner_id = %partner_id, "Partner disconnected");
                true
            }
            _ => false,
        }
    }

    async fn find_eligible(&self, pincode: &str) -> Vec<AvailabilityRecord> {
        self.entries
            .read()
            .await
            .values()
            .filter(|r| r.serves(pincode))
            .cloned()
            .collect()
    }

    async fn is_online(&self, partner_id: Uuid) -> bool {
        self.entries.read().await.contains_key(&partner_id)
    }

    async fn online_count(&self) -> usize {
        self.entries.read().await.len()
    }
}
