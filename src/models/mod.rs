//! Shared data models: actors, partners, customers and the catalog

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Actor roles carried in access tokens
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Partner,
    Admin,
    Franchise,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" | "user" => Some(Role::Customer),
            "partner" => Some(Role::Partner),
            "admin" => Some(Role::Admin),
            "franchise" => Some(Role::Franchise),
            _ => None,
        }
    }

    /// Admins and franchises may act on any booking
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Franchise)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Partner => "partner",
            Role::Admin => "admin",
            Role::Franchise => "franchise",
        }
    }
}

/// The authenticated caller of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn customer(id: Uuid) -> Self {
        Self::new(id, Role::Customer)
    }

    pub fn partner(id: Uuid) -> Self {
        Self::new(id, Role::Partner)
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "business_model")]
pub enum BusinessModel {
    Franchise,
    #[serde(rename = "BYOB")]
    #[sqlx(rename = "BYOB")]
    Byob,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "partner_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PartnerStatus {
    Pending,
    Approved,
    Rejected,
}

/// Service partner
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Partner {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub business_model: BusinessModel,
    pub branch_id: Option<Uuid>,
    pub pincodes: Vec<String>,
    pub status: PartnerStatus,
    pub active: bool,
    pub push_token: Option<String>,
    pub is_available: bool,
    pub current_booking_id: Option<String>,
    pub current_cash_in_hand: i64,
    pub all_time_cash_collected: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Partner {
    /// Approved, active and not on another job
    pub fn can_take_jobs(&self) -> bool {
        self.status == PartnerStatus::Approved && self.active && self.is_available
    }

    /// Branch stamped onto bookings this partner confirms
    pub fn franchise_branch(&self) -> Option<Uuid> {
        match self.business_model {
            BusinessModel::Franchise => self.branch_id,
            BusinessModel::Byob => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub id: Uuid,
    pub vehicle_type: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub registration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryAddress {
    pub id: Uuid,
    pub label: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub coordinates: Option<GeoPoint>,
}

impl DeliveryAddress {
    /// Single line rendering stored on the booking
    pub fn full_address(&self) -> String {
        format!(
            "{}, {}, {} {}",
            self.street, self.city, self.state, self.postal_code
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub push_token: Option<String>,
    pub vehicles: Vec<Vehicle>,
    pub addresses: Vec<DeliveryAddress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Admin {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub push_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry; bookings snapshot these values
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogService {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub tax: i64,
    pub charges: i64,
    pub discount: i64,
    pub duration_minutes: i64,
    pub active: bool,
}
