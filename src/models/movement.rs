// src/models/movement.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumString};

use super::page_window;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementDirection {
    In,
    Out,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct InventoryMovement {
    pub id: String,
    pub material_id: String,
    pub direction: MovementDirection,
    pub quantity: i64,
    pub notes: Option<String>,
    pub user_id: Option<String>,
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Movement joined with the material and user it refers to.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MovementWithDetails {
    pub id: String,
    pub material_id: String,
    pub material_name: String,
    pub material_barcode: String,
    pub direction: MovementDirection,
    pub quantity: i64,
    pub notes: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateMovementRequest {
    #[validate(length(min = 1, message = "Material is required"))]
    #[serde(alias = "materialId")]
    pub material_id: String,

    #[serde(rename = "type")]
    pub direction: MovementDirection,

    #[validate(range(min = 1, message = "Quantity must be greater than zero"))]
    pub quantity: i64,

    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MovementQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub material_id: Option<String>,
    #[serde(rename = "type")]
    pub direction: Option<MovementDirection>,
}

impl MovementQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        page_window(self.page, self.per_page, 50, 200)
    }
}
