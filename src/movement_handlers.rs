// src/movement_handlers.rs - Inventory ledger (stock in / stock out)

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::access::Page;
use crate::audit::{audit, ActivityEntry};
use crate::auth::require_page;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse};
use crate::models::{
    ActivityAction, CreateMovementRequest, EntityType, InventoryMovement, MovementDirection,
    MovementQuery, MovementWithDetails,
};
use crate::rules::apply_movement;
use crate::AppState;

/// One stock adjustment to be written by [`apply_movement_on`].
pub struct StockChange<'a> {
    pub material_id: &'a str,
    pub direction: MovementDirection,
    pub quantity: i64,
    pub notes: Option<&'a str>,
    pub user_id: &'a str,
    pub order_id: Option<&'a str>,
}

/// Adjusts the material quantity and appends the ledger row on an open
/// connection, normally inside a transaction owned by the caller.
///
/// The decrement is conditional on the stock still being there, so two
/// concurrent `out` movements can never drive the quantity below zero.
#[tracing::instrument(skip(conn, change), fields(material_id = change.material_id, quantity = change.quantity))]
pub async fn apply_movement_on(
    conn: &mut SqliteConnection,
    change: &StockChange<'_>,
) -> ApiResult<InventoryMovement> {
    let current: Option<(i64,)> = sqlx::query_as(
        "SELECT quantity FROM materials WHERE id = ? AND lifecycle = 'active'"
    )
    .bind(change.material_id)
    .fetch_optional(&mut *conn)
    .await?;

    let (current,) = current.ok_or_else(|| ApiError::material_not_found(change.material_id))?;

    // Rejects non-positive amounts, overflow and overdrafts before touching the row
    apply_movement(current, change.direction, change.quantity)?;

    let now = Utc::now();
    let updated = match change.direction {
        MovementDirection::In => {
            sqlx::query("UPDATE materials SET quantity = quantity + ?, updated_at = ? WHERE id = ?")
                .bind(change.quantity)
                .bind(now)
                .bind(change.material_id)
                .execute(&mut *conn)
                .await?
        }
        MovementDirection::Out => {
            sqlx::query(
                "UPDATE materials SET quantity = quantity - ?, updated_at = ? WHERE id = ? AND quantity >= ?"
            )
            .bind(change.quantity)
            .bind(now)
            .bind(change.material_id)
            .bind(change.quantity)
            .execute(&mut *conn)
            .await?
        }
    };

    if updated.rows_affected() == 0 {
        return Err(ApiError::insufficient_stock(current, change.quantity));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO inventory_movements (
            id, material_id, direction, quantity, notes, user_id, order_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(change.material_id)
    .bind(change.direction)
    .bind(change.quantity)
    .bind(change.notes)
    .bind(change.user_id)
    .bind(change.order_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let movement = sqlx::query_as::<_, InventoryMovement>("SELECT * FROM inventory_movements WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(movement)
}

/// Records a single movement in its own transaction. Nothing is written
/// when the movement is rejected.
pub async fn record_movement(
    pool: &SqlitePool,
    request: &CreateMovementRequest,
    user_id: &str,
    order_id: Option<&str>,
) -> ApiResult<InventoryMovement> {
    let mut tx = pool.begin().await?;

    let change = StockChange {
        material_id: &request.material_id,
        direction: request.direction,
        quantity: request.quantity,
        notes: request.notes.as_deref(),
        user_id,
        order_id,
    };
    let movement = apply_movement_on(&mut *tx, &change).await?;

    tx.commit().await?;
    Ok(movement)
}

pub async fn list_movements(
    pool: &SqlitePool,
    query: &MovementQuery,
) -> ApiResult<(Vec<MovementWithDetails>, i64)> {
    let (_, per_page, offset) = query.normalize();

    let mut conditions: Vec<String> = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(material_id) = &query.material_id {
        conditions.push("mv.material_id = ?".to_string());
        params.push(material_id.clone());
    }
    if let Some(direction) = query.direction {
        conditions.push("mv.direction = ?".to_string());
        params.push(direction.as_ref().to_string());
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM inventory_movements mv WHERE {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total = count_query.fetch_one(pool).await?;

    let sql = format!(
        r#"SELECT mv.id, mv.material_id, m.name AS material_name, m.barcode AS material_barcode,
                  mv.direction, mv.quantity, mv.notes, mv.user_id, u.username, mv.order_id, mv.created_at
           FROM inventory_movements mv
           JOIN materials m ON m.id = mv.material_id
           LEFT JOIN users u ON u.id = mv.user_id
           WHERE {}
           ORDER BY mv.created_at DESC
           LIMIT ? OFFSET ?"#,
        where_clause
    );
    let mut select_query = sqlx::query_as::<_, MovementWithDetails>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    let movements = select_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok((movements, total))
}

// ==================== HANDLERS ====================

pub async fn get_movements(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<MovementQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Movements)?;

    let (page, per_page, _) = query.normalize();
    let (movements, total) = list_movements(&app_state.db_pool, &query).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(movements, total, page, per_page))))
}

pub async fn create_movement(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateMovementRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Movements)?;
    request.validate()?;

    let movement = match record_movement(&app_state.db_pool, &request, &claims.sub, None).await {
        Ok(movement) => movement,
        Err(e) => {
            log::warn!(
                "Movement {} x{} on material {} rejected: {}",
                request.direction, request.quantity, request.material_id, e
            );
            return Err(e);
        }
    };

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Movement, EntityType::Movement)
            .entity(&movement.id, &movement.material_id)
            .details(format!("{} {} of material {}", movement.direction, movement.quantity, movement.material_id)),
        &http_request,
    ).await;

    log::info!(
        "Movement {} x{} on material {} by {}",
        movement.direction, movement.quantity, movement.material_id, claims.username
    );

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        movement,
        "Movement recorded successfully".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::db::test_pool;
    use crate::handlers::test_support::seed_user;
    use crate::material_handlers::{find_material, insert_material};
    use crate::models::CreateMaterialRequest;

    async fn seed_material(pool: &SqlitePool, user_id: &str, quantity: i64) -> String {
        let request = CreateMaterialRequest {
            name: "Cyan ink".to_string(),
            material_type: "ink".to_string(),
            unit: Some("ml".to_string()),
            quantity,
            min_quantity: 10,
            price: 0.2,
            supplier: None,
            notes: None,
        };
        insert_material(pool, &request, user_id).await.unwrap().id
    }

    fn movement(material_id: &str, direction: MovementDirection, quantity: i64) -> CreateMovementRequest {
        CreateMovementRequest {
            material_id: material_id.to_string(),
            direction,
            quantity,
            notes: Some("test".to_string()),
        }
    }

    #[actix_rt::test]
    async fn test_out_beyond_stock_is_rejected_and_nothing_changes() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;
        let material_id = seed_material(&pool, &user.sub, 7).await;

        let result = record_movement(&pool, &movement(&material_id, MovementDirection::Out, 8), &user.sub, None).await;
        match result {
            Err(ApiError::Conflict(msg)) => assert!(msg.contains("Available: 7, Requested: 8")),
            other => panic!("expected conflict, got {:?}", other),
        }

        assert_eq!(find_material(&pool, &material_id).await.unwrap().quantity, 7);
        let (rows, total) = list_movements(&pool, &MovementQuery::default()).await.unwrap();
        assert_eq!(total, 0);
        assert!(rows.is_empty());
    }

    #[actix_rt::test]
    async fn test_in_then_out_round_trips() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;
        let material_id = seed_material(&pool, &user.sub, 20).await;

        record_movement(&pool, &movement(&material_id, MovementDirection::In, 15), &user.sub, None).await.unwrap();
        assert_eq!(find_material(&pool, &material_id).await.unwrap().quantity, 35);

        record_movement(&pool, &movement(&material_id, MovementDirection::Out, 15), &user.sub, None).await.unwrap();
        assert_eq!(find_material(&pool, &material_id).await.unwrap().quantity, 20);
    }

    #[actix_rt::test]
    async fn test_out_of_entire_stock_reaches_zero() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;
        let material_id = seed_material(&pool, &user.sub, 12).await;

        record_movement(&pool, &movement(&material_id, MovementDirection::Out, 12), &user.sub, None).await.unwrap();
        assert_eq!(find_material(&pool, &material_id).await.unwrap().quantity, 0);
    }

    #[actix_rt::test]
    async fn test_zero_quantity_is_validation_error() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;
        let material_id = seed_material(&pool, &user.sub, 12).await;

        let result = record_movement(&pool, &movement(&material_id, MovementDirection::In, 0), &user.sub, None).await;
        assert!(matches!(result, Err(ApiError::ValidationError(_))));
    }

    #[actix_rt::test]
    async fn test_unknown_material_is_not_found() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;
        let result = record_movement(&pool, &movement("missing", MovementDirection::In, 1), &user.sub, None).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[actix_rt::test]
    async fn test_listing_filters_and_joins() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;
        let material_id = seed_material(&pool, &user.sub, 50).await;

        record_movement(&pool, &movement(&material_id, MovementDirection::In, 5), &user.sub, None).await.unwrap();
        record_movement(&pool, &movement(&material_id, MovementDirection::Out, 3), &user.sub, None).await.unwrap();

        let query = MovementQuery { direction: Some(MovementDirection::Out), ..Default::default() };
        let (rows, total) = list_movements(&pool, &query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].quantity, 3);
        assert_eq!(rows[0].material_name, "Cyan ink");
        assert_eq!(rows[0].username.as_deref(), Some("clerk"));

        let query = MovementQuery { material_id: Some(material_id), ..Default::default() };
        let (_, total) = list_movements(&pool, &query).await.unwrap();
        assert_eq!(total, 2);
    }
}
