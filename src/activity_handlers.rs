// src/activity_handlers.rs - Read side of the activity log

use actix_web::{web, HttpRequest, HttpResponse};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::access::Page;
use crate::auth::require_page;
use crate::error::ApiResult;
use crate::handlers::ApiResponse;
use crate::models::{ActivityLog, ActivityQuery};
use crate::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

pub async fn recent_activity(pool: &SqlitePool, query: &ActivityQuery) -> ApiResult<Vec<ActivityLog>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let mut conditions: Vec<String> = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(entity_type) = query.entity_type.as_deref().filter(|t| !t.is_empty()) {
        conditions.push("entity_type = ?".to_string());
        params.push(entity_type.to_string());
    }
    if let Some(user_id) = query.user_id.as_deref().filter(|u| !u.is_empty()) {
        conditions.push("user_id = ?".to_string());
        params.push(user_id.to_string());
    }
    if let Some(action) = query.action {
        conditions.push("action = ?".to_string());
        params.push(action.as_ref().to_string());
    }

    let sql = format!(
        "SELECT * FROM activity_logs WHERE {} ORDER BY created_at DESC LIMIT ?",
        conditions.join(" AND ")
    );
    let mut select_query = sqlx::query_as::<_, ActivityLog>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    let logs = select_query.bind(limit).fetch_all(pool).await?;

    Ok(logs)
}

pub async fn get_activity_logs(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ActivityQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::ActivityLog)?;

    let logs = recent_activity(&app_state.db_pool, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(logs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::audit::{log_activity, ActivityEntry};
    use crate::db::test_pool;
    use crate::handlers::test_support::seed_user;
    use crate::models::{ActivityAction, EntityType};

    #[actix_rt::test]
    async fn test_filters_and_limit() {
        let pool = test_pool().await;
        let admin = seed_user(&pool, "admin", Role::Admin).await;
        let clerk = seed_user(&pool, "clerk", Role::Employee).await;

        for i in 0..3 {
            let name = format!("Book {}", i);
            let entry = ActivityEntry::new(ActivityAction::Create, EntityType::Book).entity("b", &name);
            log_activity(&pool, Some(&clerk), &entry, None).await.unwrap();
        }
        let entry = ActivityEntry::new(ActivityAction::Delete, EntityType::Order);
        log_activity(&pool, Some(&admin), &entry, None).await.unwrap();

        let all = recent_activity(&pool, &ActivityQuery::default()).await.unwrap();
        assert_eq!(all.len(), 4);

        let books = ActivityQuery { entity_type: Some("book".to_string()), ..Default::default() };
        assert_eq!(recent_activity(&pool, &books).await.unwrap().len(), 3);

        let by_admin = ActivityQuery { user_id: Some(admin.sub.clone()), ..Default::default() };
        let rows = recent_activity(&pool, &by_admin).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, ActivityAction::Delete);

        let limited = ActivityQuery { limit: Some(2), ..Default::default() };
        assert_eq!(recent_activity(&pool, &limited).await.unwrap().len(), 2);
    }
}
