//! Profile updates, dispatched on the caller's role

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::models::{Actor, Admin, Customer, Partner, Role};
use crate::store::Store;

/// Fields a caller may change on their own profile
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProfileChanges {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(min = 10, max = 15))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[serde(default, alias = "pushToken", alias = "expoPushToken")]
    #[validate(length(max = 255))]
    pub push_token: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.push_token.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Profile {
    Customer(Customer),
    Partner(Partner),
    Admin(Admin),
}

#[async_trait]
pub trait ProfileUpdater: Send + Sync {
    async fn update(&self, id: Uuid, changes: &ProfileChanges) -> ApiResult<Profile>;
}

struct CustomerProfiles(Arc<dyn Store>);
struct PartnerProfiles(Arc<dyn Store>);
struct AdminProfiles(Arc<dyn Store>);

#[async_trait]
impl ProfileUpdater for CustomerProfiles {
    async fn update(&self, id: Uuid, changes: &ProfileChanges) -> ApiResult<Profile> {
        self.0
            .update_customer_profile(id, changes)
            .await?
            .map(Profile::Customer)
            .ok_or_else(|| ApiError::not_found("Customer"))
    }
}

#[async_trait]
impl ProfileUpdater for PartnerProfiles {
    async fn update(&self, id: Uuid, changes: &ProfileChanges) -> ApiResult<Profile> {
        self.0
            .update_partner_profile(id, changes)
            .await?
            .map(Profile::Partner)
            .ok_or_else(|| ApiError::not_found("Partner"))
    }
}

#[async_trait]
impl ProfileUpdater for AdminProfiles {
    async fn update(&self, id: Uuid, changes: &ProfileChanges) -> ApiResult<Profile> {
        self.0
            .update_admin_profile(id, changes)
            .await?
            .map(Profile::Admin)
            .ok_or_else(|| ApiError::not_found("Admin"))
    }
}

/// Role to updater table
pub struct ProfileService {
    updaters: HashMap<Role, Arc<dyn ProfileUpdater>>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let mut service = Self::empty();
        service.register(Role::Customer, Arc::new(CustomerProfiles(Arc::clone(&store))));
        service.register(Role::Partner, Arc::new(PartnerProfiles(Arc::clone(&store))));
        service.register(Role::Admin, Arc::new(AdminProfiles(store)));
        service
    }

    pub fn empty() -> Self {
        Self {
            updaters: HashMap::new(),
        }
    }

    pub fn register(&mut self, role: Role, updater: Arc<dyn ProfileUpdater>) {
        self.updaters.insert(role, updater);
    }

    pub async fn update(&self, actor: &Actor, changes: ProfileChanges) -> ApiResult<Profile> {
        changes.validate()?;
        if changes.is_empty() {
            return Err(ApiError::validation("No profile fields to update"));
        }

        let updater = self
            .updaters
            .get(&actor.role)
            .ok_or_else(|| ApiError::validation("Invalid user role"))?;

        let profile = updater.update(actor.id, &changes).await?;
        tracing::info!(user_id = %actor.id, role = actor.role.as_str(), "Profile updated");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn customer(id: Uuid) -> Customer {
        Customer {
            id,
            name: "Asha".to_string(),
            phone: "9876543210".to_string(),
            email: None,
            push_token: None,
            vehicles: Vec::new(),
            addresses: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_customer_update_goes_through_table() {
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        store.insert_customer(customer(id)).await;
        let service = ProfileService::new(store.clone());

        let changes = ProfileChanges {
            push_token: Some("ExponentPushToken[abc]".to_string()),
            ..Default::default()
        };
        let profile = service.update(&Actor::customer(id), changes).await.unwrap();
        match profile {
            Profile::Customer(c) => {
                assert_eq!(c.push_token.as_deref(), Some("ExponentPushToken[abc]"));
                assert_eq!(c.name, "Asha");
            }
            other => panic!("unexpected profile {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unregistered_role_rejected() {
        let service = ProfileService::new(Arc::new(MemoryStore::new()));
        let changes = ProfileChanges {
            name: Some("Branch 7".to_string()),
            ..Default::default()
        };
        let err = service
            .update(&Actor::new(Uuid::new_v4(), Role::Franchise), changes)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(ref m) if m == "Invalid user role"));
    }

    #[tokio::test]
    async fn test_empty_changes_rejected() {
        let service = ProfileService::new(Arc::new(MemoryStore::new()));
        let err = service
            .update(&Actor::customer(Uuid::new_v4()), ProfileChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }
}
