// src/models/book.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumString};

use super::{page_window, Lifecycle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BookStatus {
    Ready,
    Printing,
    Unavailable,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub barcode: String,
    pub category: String,
    pub total_quantity: i64,
    pub ready_quantity: i64,
    pub printing_quantity: i64,
    pub price: f64,
    pub status: BookStatus,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    pub lifecycle: Lifecycle,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateBookRequest {
    #[validate(length(min = 1, max = 255, message = "Title must be between 1 and 255 characters"))]
    pub title: String,

    #[validate(length(min = 1, max = 255, message = "Author must be between 1 and 255 characters"))]
    pub author: String,

    #[validate(length(min = 10, max = 17, message = "ISBN must be 10 to 17 characters"))]
    pub isbn: String,

    #[validate(length(min = 1, max = 100, message = "Category must be between 1 and 100 characters"))]
    pub category: String,

    pub total_quantity: i64,

    #[serde(default)]
    pub ready_quantity: i64,

    #[serde(default)]
    pub printing_quantity: i64,

    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: f64,

    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,
}

/// Catalog fields only. Quantities go through [`UpdateQuantitiesRequest`]
/// unless given here, in which case they are validated the same way.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBookRequest {
    #[validate(length(min = 1, max = 255, message = "Title must be between 1 and 255 characters"))]
    pub title: Option<String>,

    #[validate(length(min = 1, max = 255, message = "Author must be between 1 and 255 characters"))]
    pub author: Option<String>,

    #[validate(length(min = 10, max = 17, message = "ISBN must be 10 to 17 characters"))]
    pub isbn: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Category must be between 1 and 100 characters"))]
    pub category: Option<String>,

    pub total_quantity: Option<i64>,
    pub ready_quantity: Option<i64>,
    pub printing_quantity: Option<i64>,

    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: Option<f64>,

    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,
}

/// Missing fields keep their stored value.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateQuantitiesRequest {
    pub total_quantity: Option<i64>,
    pub ready_quantity: Option<i64>,
    pub printing_quantity: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct BookQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<BookStatus>,
}

impl BookQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        page_window(self.page, self.per_page, 20, 100)
    }
}
