// src/expense_handlers.rs - Shop expenses (append-only)

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::access::Page;
use crate::audit::{audit, ActivityEntry};
use crate::auth::require_page;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse};
use crate::models::{
    ActivityAction, CreateExpenseRequest, EntityType, Expense, ExpenseCategorySummary, ExpenseQuery,
};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ExpenseSummary {
    pub total: f64,
    pub count: i64,
    pub by_category: Vec<ExpenseCategorySummary>,
}

/// WHERE clause and bind values shared by listing, summary and export.
/// Dates are bound in the same RFC 3339 form sqlx stores them in.
fn filters(query: &ExpenseQuery) -> (String, Vec<String>) {
    let mut conditions: Vec<String> = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(category) = query.category.as_deref().filter(|c| !c.trim().is_empty()) {
        conditions.push("category = ?".to_string());
        params.push(category.trim().to_string());
    }
    if let Some(from) = query.date_from {
        conditions.push("expense_date >= ?".to_string());
        params.push(from.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }
    if let Some(to) = query.date_to {
        conditions.push("expense_date <= ?".to_string());
        params.push(to.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }

    (conditions.join(" AND "), params)
}

fn check_range(query: &ExpenseQuery) -> ApiResult<()> {
    match (query.date_from, query.date_to) {
        (Some(from), Some(to)) if from > to => Err(ApiError::bad_request("date_from must not be after date_to")),
        _ => Ok(()),
    }
}

// ==================== QUERIES ====================

pub async fn list_expenses(pool: &SqlitePool, query: &ExpenseQuery) -> ApiResult<(Vec<Expense>, i64)> {
    let (_, per_page, offset) = query.normalize();
    let (where_clause, params) = filters(query);

    let count_sql = format!("SELECT COUNT(*) FROM expenses WHERE {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total = count_query.fetch_one(pool).await?;

    let sql = format!(
        "SELECT * FROM expenses WHERE {} ORDER BY expense_date DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut select_query = sqlx::query_as::<_, Expense>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    let expenses = select_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok((expenses, total))
}

pub async fn summarize_expenses(pool: &SqlitePool, query: &ExpenseQuery) -> ApiResult<ExpenseSummary> {
    let (where_clause, params) = filters(query);

    let sql = format!(
        r#"SELECT category, CAST(COALESCE(SUM(amount), 0) AS REAL) AS total, COUNT(*) AS count
           FROM expenses WHERE {}
           GROUP BY category
           ORDER BY total DESC"#,
        where_clause
    );
    let mut summary_query = sqlx::query_as::<_, ExpenseCategorySummary>(&sql);
    for p in &params {
        summary_query = summary_query.bind(p);
    }
    let by_category = summary_query.fetch_all(pool).await?;

    Ok(ExpenseSummary {
        total: by_category.iter().map(|c| c.total).sum(),
        count: by_category.iter().map(|c| c.count).sum(),
        by_category,
    })
}

pub async fn insert_expense(pool: &SqlitePool, request: &CreateExpenseRequest, user_id: &str) -> ApiResult<Expense> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO expenses (id, description, amount, category, expense_date, created_by, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(request.description.trim())
    .bind(request.amount)
    .bind(request.category.trim())
    .bind(request.expense_date.unwrap_or(now))
    .bind(user_id)
    .bind(now)
    .execute(pool)
    .await?;

    let expense = sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await?;
    Ok(expense)
}

fn expenses_csv(expenses: &[Expense]) -> ApiResult<Vec<u8>> {
    let mut csv_data = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut csv_data);

        writer.write_record(["Date", "Category", "Description", "Amount"])
            .map_err(|e| ApiError::InternalServerError(e.to_string()))?;

        for e in expenses {
            writer.write_record([
                e.expense_date.format("%Y-%m-%d").to_string(),
                e.category.clone(),
                e.description.clone(),
                format!("{:.2}", e.amount),
            ]).map_err(|e| ApiError::InternalServerError(e.to_string()))?;
        }

        writer.flush().map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    }
    Ok(csv_data)
}

// ==================== HANDLERS ====================

pub async fn get_expenses(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ExpenseQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Expenses)?;
    check_range(&query)?;

    let (page, per_page, _) = query.normalize();
    let (expenses, total) = list_expenses(&app_state.db_pool, &query).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(expenses, total, page, per_page))))
}

pub async fn get_expense_summary(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ExpenseQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Expenses)?;
    check_range(&query)?;

    let summary = summarize_expenses(&app_state.db_pool, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(summary)))
}

pub async fn create_expense(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateExpenseRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Expenses)?;
    request.validate()?;

    let expense = insert_expense(&app_state.db_pool, &request, &claims.sub).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Create, EntityType::Expense)
            .entity(&expense.id, &expense.description)
            .details(format!("{:.2} in {}", expense.amount, expense.category)),
        &http_request,
    ).await;

    log::info!("Expense {:.2} ({}) recorded by {}", expense.amount, expense.category, claims.username);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        expense,
        "Expense recorded".to_string(),
    )))
}

pub async fn export_expenses(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ExpenseQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Expenses)?;
    check_range(&query)?;

    let (where_clause, params) = filters(&query);
    let sql = format!("SELECT * FROM expenses WHERE {} ORDER BY expense_date", where_clause);
    let mut select_query = sqlx::query_as::<_, Expense>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    let expenses = select_query.fetch_all(&app_state.db_pool).await?;

    let csv_data = expenses_csv(&expenses)?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(("Content-Disposition", "attachment; filename=\"expenses.csv\""))
        .body(csv_data))
}
