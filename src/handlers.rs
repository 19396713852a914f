// src/handlers.rs
use actix_web::{web, HttpResponse, HttpRequest};
use chrono::{Datelike, TimeZone, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::access::{allowed_pages, can_access_page, can_access_page_id, Page, Role};
use crate::auth::{get_current_user, require_page};
use crate::error::ApiResult;
use crate::models::{BookStatus, DashboardStats, OrderStatus};
use crate::AppState;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = (total + per_page - 1) / per_page;
        Self { data, total, page, per_page, total_pages }
    }
}

/// `%term%` for LIKE filters, or None for blank input.
pub fn like_pattern(search: &Option<String>) -> Option<String> {
    search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s))
}

/// New value for an optional text column on update: absent keeps `existing`,
/// an empty or blank string clears it.
pub fn merge_optional_text(update: &Option<String>, existing: &Option<String>) -> Option<String> {
    match update.as_deref().map(str::trim) {
        None => existing.clone(),
        Some("") => None,
        Some(value) => Some(value.to_string()),
    }
}

// ==================== ACCESS ====================

pub async fn get_allowed_pages(http_request: HttpRequest) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;

    #[derive(Serialize)]
    struct PagesResponse {
        role: Role,
        role_name: &'static str,
        role_description: &'static str,
        pages: Vec<Page>,
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(PagesResponse {
        role: claims.role,
        role_name: claims.role.display_name(),
        role_description: claims.role.description(),
        pages: allowed_pages(claims.role),
    })))
}

/// Single page check for clients that carry their own page identifiers.
pub async fn check_page_access(
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let page = path.into_inner();
    let allowed = can_access_page_id(claims.role, &page);

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "page": page,
        "allowed": allowed,
    }))))
}

// ==================== DASHBOARD STATISTICS ====================

async fn scalar_count(pool: &SqlitePool, sql: &str) -> ApiResult<i64> {
    let row: (i64,) = sqlx::query_as(sql).fetch_one(pool).await?;
    Ok(row.0)
}

async fn scalar_sum(pool: &SqlitePool, sql: &str) -> ApiResult<f64> {
    let row: (f64,) = sqlx::query_as(sql).fetch_one(pool).await?;
    Ok(row.0)
}

pub async fn compute_dashboard_stats(pool: &SqlitePool, role: Role) -> ApiResult<DashboardStats> {
    let now = Utc::now();
    let start_of_day = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .unwrap_or(now);
    let start_of_month = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);

    let total_materials = scalar_count(pool, "SELECT COUNT(*) FROM materials WHERE lifecycle = 'active'").await?;
    let low_stock_materials = scalar_count(
        pool,
        "SELECT COUNT(*) FROM materials WHERE lifecycle = 'active' AND quantity <= min_quantity",
    ).await?;
    let inventory_value = scalar_sum(
        pool,
        "SELECT CAST(COALESCE(SUM(quantity * price), 0) AS REAL) FROM materials WHERE lifecycle = 'active'",
    ).await?;

    let movements_today: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM inventory_movements WHERE created_at >= ?")
        .bind(start_of_day)
        .fetch_one(pool)
        .await?;

    let order_counts: Vec<(OrderStatus, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM print_orders WHERE lifecycle = 'active' GROUP BY status"
    )
        .fetch_all(pool)
        .await?;
    let orders_with = |status: OrderStatus| {
        order_counts.iter().find(|(s, _)| *s == status).map(|(_, c)| *c).unwrap_or(0)
    };

    let book_counts: Vec<(BookStatus, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM books WHERE lifecycle = 'active' GROUP BY status"
    )
        .fetch_all(pool)
        .await?;
    let books_with = |status: BookStatus| {
        book_counts.iter().find(|(s, _)| *s == status).map(|(_, c)| *c).unwrap_or(0)
    };

    let completed_revenue = if can_access_page(role, Page::Sales) {
        Some(scalar_sum(
            pool,
            "SELECT CAST(COALESCE(SUM(cost), 0) AS REAL) FROM print_orders WHERE lifecycle = 'active' AND status = 'completed'",
        ).await?)
    } else {
        None
    };

    let (total_expenses, expenses_this_month) = if can_access_page(role, Page::Expenses) {
        let total = scalar_sum(pool, "SELECT CAST(COALESCE(SUM(amount), 0) AS REAL) FROM expenses").await?;
        let month: (f64,) = sqlx::query_as(
            "SELECT CAST(COALESCE(SUM(amount), 0) AS REAL) FROM expenses WHERE expense_date >= ?"
        )
            .bind(start_of_month)
            .fetch_one(pool)
            .await?;
        (Some(total), Some(month.0))
    } else {
        (None, None)
    };

    let active_users = scalar_count(pool, "SELECT COUNT(*) FROM users WHERE is_active = 1").await?;

    Ok(DashboardStats {
        total_materials,
        low_stock_materials,
        inventory_value,
        movements_today: movements_today.0,
        pending_orders: orders_with(OrderStatus::Pending),
        in_progress_orders: orders_with(OrderStatus::InProgress),
        completed_orders: orders_with(OrderStatus::Completed),
        cancelled_orders: orders_with(OrderStatus::Cancelled),
        completed_revenue,
        total_books: book_counts.iter().map(|(_, c)| *c).sum(),
        books_ready: books_with(BookStatus::Ready),
        books_printing: books_with(BookStatus::Printing),
        books_unavailable: books_with(BookStatus::Unavailable),
        total_expenses,
        expenses_this_month,
        active_users,
    })
}

pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Dashboard)?;
    let stats = compute_dashboard_stats(&app_state.db_pool, claims.role).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use sqlx::SqlitePool;

    use crate::access::Role;
    use crate::auth::Claims;

    /// Inserts a user row and returns the matching identity.
    pub async fn seed_user(pool: &SqlitePool, username: &str, role: Role) -> Claims {
        let id = format!("user-{}", username);
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, full_name, role, is_active, created_at, updated_at)
             VALUES (?, ?, 'x', ?, ?, 1, ?, ?)"
        )
            .bind(&id)
            .bind(username)
            .bind(username)
            .bind(role)
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(pool)
            .await
            .unwrap();

        Claims {
            sub: id,
            username: username.to_string(),
            full_name: username.to_string(),
            role,
            exp: 0,
            iat: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[test]
    fn test_paginated_total_pages() {
        let page = PaginatedResponse::new(vec![1, 2, 3], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let empty: PaginatedResponse<i32> = PaginatedResponse::new(vec![], 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::success_with_message(7, "ok".to_string())).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], 7);
        assert_eq!(body["message"], "ok");

        let body = serde_json::to_value(ApiResponse::success("x")).unwrap();
        assert!(body["message"].is_null());
    }

    #[test]
    fn test_merge_optional_text() {
        let existing = Some("Papyrus Ltd".to_string());
        assert_eq!(merge_optional_text(&None, &existing), existing);
        assert_eq!(merge_optional_text(&Some("  ".to_string()), &existing), None);
        assert_eq!(merge_optional_text(&Some(" Inkworks ".to_string()), &existing).as_deref(), Some("Inkworks"));
        assert_eq!(merge_optional_text(&Some(String::new()), &None), None);
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern(&Some(" paper ".to_string())).as_deref(), Some("%paper%"));
        assert_eq!(like_pattern(&Some("   ".to_string())), None);
        assert_eq!(like_pattern(&None), None);
    }

    #[actix_rt::test]
    async fn test_dashboard_on_empty_database() {
        let pool = test_pool().await;
        let stats = compute_dashboard_stats(&pool, Role::Admin).await.unwrap();
        assert_eq!(stats.total_materials, 0);
        assert_eq!(stats.total_books, 0);
        assert_eq!(stats.total_expenses, Some(0.0));
        assert_eq!(stats.completed_revenue, Some(0.0));
    }

    #[actix_rt::test]
    async fn test_dashboard_hides_money_from_employees() {
        let pool = test_pool().await;
        let stats = compute_dashboard_stats(&pool, Role::Employee).await.unwrap();
        assert_eq!(stats.total_expenses, None);
        assert_eq!(stats.expenses_this_month, None);
        assert_eq!(stats.completed_revenue, None);
    }
}
