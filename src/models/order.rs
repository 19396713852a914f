// src/models/order.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumString};

use super::{page_window, Lifecycle};

// === ENUMS ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

// === PRINT ORDER ===

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PrintOrder {
    pub id: String,
    pub order_number: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub print_type: String,
    pub copies: i64,
    pub paper_type: String,
    pub cost: f64,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub lifecycle: Lifecycle,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 255, message = "Customer name must be between 1 and 255 characters"))]
    pub customer_name: String,

    #[validate(length(max = 50, message = "Phone cannot exceed 50 characters"))]
    pub customer_phone: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Print type must be between 1 and 100 characters"))]
    pub print_type: String,

    #[validate(range(min = 1, message = "Copies must be at least 1"))]
    pub copies: i64,

    #[validate(length(min = 1, max = 100, message = "Paper type must be between 1 and 100 characters"))]
    pub paper_type: String,

    #[validate(range(min = 0.0, message = "Cost cannot be negative"))]
    pub cost: f64,

    pub status: Option<OrderStatus>,

    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,

    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateOrderRequest {
    #[validate(length(min = 1, max = 255, message = "Customer name must be between 1 and 255 characters"))]
    pub customer_name: Option<String>,

    #[validate(length(max = 50, message = "Phone cannot exceed 50 characters"))]
    pub customer_phone: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Print type must be between 1 and 100 characters"))]
    pub print_type: Option<String>,

    #[validate(range(min = 1, message = "Copies must be at least 1"))]
    pub copies: Option<i64>,

    #[validate(length(min = 1, max = 100, message = "Paper type must be between 1 and 100 characters"))]
    pub paper_type: Option<String>,

    #[validate(range(min = 0.0, message = "Cost cannot be negative"))]
    pub cost: Option<f64>,

    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,

    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize, Default)]
pub struct OrderQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<OrderStatus>,
}

impl OrderQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        page_window(self.page, self.per_page, 20, 100)
    }
}

// === ORDER MATERIALS ===

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct OrderMaterial {
    pub id: String,
    pub order_id: String,
    pub material_id: String,
    pub quantity: i64,
    pub movement_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct OrderMaterialWithName {
    pub id: String,
    pub order_id: String,
    pub material_id: String,
    pub material_name: String,
    pub unit: String,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddOrderMaterialRequest {
    #[validate(length(min = 1, message = "Material is required"))]
    pub material_id: String,

    #[validate(range(min = 1, message = "Quantity must be greater than zero"))]
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderWithMaterials {
    #[serde(flatten)]
    pub order: PrintOrder,
    pub materials: Vec<OrderMaterialWithName>,
}
