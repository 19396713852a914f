// src/models/material.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

use super::{page_window, Lifecycle};
use crate::rules::is_low_stock;

// ==================== MATERIAL ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Material {
    pub id: String,
    pub name: String,
    pub material_type: String,
    pub unit: String,
    pub quantity: i64,
    pub min_quantity: i64,
    pub price: f64,
    pub barcode: String,
    pub supplier: Option<String>,
    pub notes: Option<String>,
    pub lifecycle: Lifecycle,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Material {
    pub fn is_low_stock(&self) -> bool {
        is_low_stock(self.quantity, self.min_quantity)
    }
}

/// Material as returned by the API, with the low-stock flag resolved.
#[derive(Debug, Serialize)]
pub struct MaterialResponse {
    #[serde(flatten)]
    pub material: Material,
    pub low_stock: bool,
}

impl From<Material> for MaterialResponse {
    fn from(material: Material) -> Self {
        let low_stock = material.is_low_stock();
        Self { material, low_stock }
    }
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateMaterialRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 100, message = "Type must be between 1 and 100 characters"))]
    pub material_type: String,

    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: Option<String>,

    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: i64,

    #[validate(range(min = 0, message = "Minimum quantity cannot be negative"))]
    pub min_quantity: i64,

    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: f64,

    #[validate(length(max = 255, message = "Supplier cannot exceed 255 characters"))]
    pub supplier: Option<String>,

    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

/// Quantity is deliberately absent: stock only changes through movements.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMaterialRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Type must be between 1 and 100 characters"))]
    pub material_type: Option<String>,

    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: Option<String>,

    #[validate(range(min = 0, message = "Minimum quantity cannot be negative"))]
    pub min_quantity: Option<i64>,

    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: Option<f64>,

    #[validate(length(max = 255, message = "Supplier cannot exceed 255 characters"))]
    pub supplier: Option<String>,

    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MaterialQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub material_type: Option<String>,
    pub low_stock: Option<bool>,
}

impl MaterialQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        page_window(self.page, self.per_page, 20, 100)
    }
}
