// src/models/expense.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

use super::page_window;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Expense {
    pub id: String,
    pub description: String,
    pub amount: f64,
    pub category: String,
    pub expense_date: DateTime<Utc>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateExpenseRequest {
    #[validate(length(min = 1, max = 500, message = "Description must be between 1 and 500 characters"))]
    pub description: String,

    #[validate(range(exclusive_min = 0.0, message = "Amount must be greater than zero"))]
    pub amount: f64,

    #[validate(length(min = 1, max = 100, message = "Category must be between 1 and 100 characters"))]
    pub category: String,

    /// Defaults to the time of the request.
    pub expense_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExpenseQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub category: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl ExpenseQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        page_window(self.page, self.per_page, 20, 100)
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ExpenseCategorySummary {
    pub category: String,
    pub total: f64,
    pub count: i64,
}
