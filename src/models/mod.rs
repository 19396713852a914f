// src/models/mod.rs

pub mod activity;
pub mod book;
pub mod expense;
pub mod material;
pub mod movement;
pub mod order;
pub mod user;

pub use activity::*;
pub use book::*;
pub use expense::*;
pub use material::*;
pub use movement::*;
pub use order::*;
pub use user::*;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ==================== COMMON / SHARED ====================

/// Lifecycle tag for records that are hidden instead of removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted,
}

/// `(page, per_page, offset)` for a 1-based page request. Out-of-range pages
/// saturate instead of overflowing the offset.
pub fn page_window(page: Option<i64>, per_page: Option<i64>, default_per_page: i64, max_per_page: i64) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(default_per_page).clamp(1, max_per_page);
    let offset = (page - 1).saturating_mul(per_page);
    (page, per_page, offset)
}

/// Dashboard counters, computed on every request. Money fields are only
/// filled for roles that may open the sales/expenses pages.
#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_materials: i64,
    pub low_stock_materials: i64,
    pub inventory_value: f64,
    pub movements_today: i64,
    pub pending_orders: i64,
    pub in_progress_orders: i64,
    pub completed_orders: i64,
    pub cancelled_orders: i64,
    pub completed_revenue: Option<f64>,
    pub total_books: i64,
    pub books_ready: i64,
    pub books_printing: i64,
    pub books_unavailable: i64,
    pub total_expenses: Option<f64>,
    pub expenses_this_month: Option<f64>,
    pub active_users: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window() {
        assert_eq!(page_window(None, None, 20, 100), (1, 20, 0));
        assert_eq!(page_window(Some(3), Some(10), 20, 100), (3, 10, 20));
        assert_eq!(page_window(Some(-4), Some(0), 20, 100), (1, 1, 0));
        assert_eq!(page_window(Some(2), Some(500), 50, 200), (2, 200, 200));
    }

    #[test]
    fn test_page_window_saturates_huge_pages() {
        let (page, per_page, offset) = page_window(Some(i64::MAX), Some(100), 20, 100);
        assert_eq!(page, i64::MAX);
        assert_eq!(per_page, 100);
        assert_eq!(offset, i64::MAX);

        let query = MaterialQuery { page: Some(i64::MAX), ..Default::default() };
        assert_eq!(query.normalize().2, i64::MAX);
        let query = MovementQuery { page: Some(i64::MAX), per_page: Some(i64::MAX), ..Default::default() };
        assert_eq!(query.normalize(), (i64::MAX, 200, i64::MAX));
    }
}
