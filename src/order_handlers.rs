// src/order_handlers.rs - Print jobs and the materials they consume

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::access::Page;
use crate::audit::{audit, ActivityEntry};
use crate::auth::{require_delete, require_page};
use crate::barcode;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{like_pattern, merge_optional_text, ApiResponse, PaginatedResponse};
use crate::models::{
    ActivityAction, AddOrderMaterialRequest, CreateOrderRequest, EntityType, MovementDirection,
    OrderMaterial, OrderMaterialWithName, OrderQuery, OrderStatus, OrderWithMaterials, PrintOrder,
    UpdateOrderRequest, UpdateOrderStatusRequest,
};
use crate::movement_handlers::{apply_movement_on, StockChange};
use crate::rules::completion_timestamp;
use crate::AppState;

// ==================== QUERIES ====================

pub async fn list_orders(pool: &SqlitePool, query: &OrderQuery) -> ApiResult<(Vec<PrintOrder>, i64)> {
    let (_, per_page, offset) = query.normalize();

    let mut conditions: Vec<String> = vec!["lifecycle = 'active'".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(pattern) = like_pattern(&query.search) {
        conditions.push("(order_number LIKE ? OR customer_name LIKE ? OR customer_phone LIKE ?)".to_string());
        params.push(pattern.clone());
        params.push(pattern.clone());
        params.push(pattern);
    }
    if let Some(status) = query.status {
        conditions.push("status = ?".to_string());
        params.push(status.as_ref().to_string());
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM print_orders WHERE {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total = count_query.fetch_one(pool).await?;

    let sql = format!(
        "SELECT * FROM print_orders WHERE {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut select_query = sqlx::query_as::<_, PrintOrder>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    let orders = select_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok((orders, total))
}

pub async fn find_order(pool: &SqlitePool, id: &str) -> ApiResult<PrintOrder> {
    sqlx::query_as::<_, PrintOrder>("SELECT * FROM print_orders WHERE id = ? AND lifecycle = 'active'")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::order_not_found(id))
}

pub async fn order_materials(pool: &SqlitePool, order_id: &str) -> ApiResult<Vec<OrderMaterialWithName>> {
    let materials = sqlx::query_as::<_, OrderMaterialWithName>(
        r#"SELECT om.id, om.order_id, om.material_id, m.name AS material_name, m.unit,
                  om.quantity, om.created_at
           FROM order_materials om
           JOIN materials m ON m.id = om.material_id
           WHERE om.order_id = ?
           ORDER BY om.created_at"#
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(materials)
}

// ==================== WRITES ====================

pub async fn insert_order(pool: &SqlitePool, request: &CreateOrderRequest, user_id: &str) -> ApiResult<PrintOrder> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let status = request.status.unwrap_or_default();

    sqlx::query(
        r#"INSERT INTO print_orders (
            id, order_number, customer_name, customer_phone, print_type, copies, paper_type,
            cost, status, notes, due_date, lifecycle, created_by, created_at, updated_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(barcode::order_number())
    .bind(request.customer_name.trim())
    .bind(&request.customer_phone)
    .bind(&request.print_type)
    .bind(request.copies)
    .bind(&request.paper_type)
    .bind(request.cost)
    .bind(status)
    .bind(&request.notes)
    .bind(request.due_date)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .bind(completion_timestamp(status, None, now))
    .execute(pool)
    .await?;

    find_order(pool, &id).await
}

pub async fn apply_order_update(pool: &SqlitePool, id: &str, request: &UpdateOrderRequest) -> ApiResult<PrintOrder> {
    let order = find_order(pool, id).await?;

    sqlx::query(
        r#"UPDATE print_orders SET
            customer_name = ?, customer_phone = ?, print_type = ?, copies = ?, paper_type = ?,
            cost = ?, notes = ?, due_date = ?, updated_at = ?
           WHERE id = ?"#
    )
    .bind(request.customer_name.as_deref().map(str::trim).unwrap_or(&order.customer_name))
    .bind(merge_optional_text(&request.customer_phone, &order.customer_phone))
    .bind(request.print_type.as_ref().unwrap_or(&order.print_type))
    .bind(request.copies.unwrap_or(order.copies))
    .bind(request.paper_type.as_ref().unwrap_or(&order.paper_type))
    .bind(request.cost.unwrap_or(order.cost))
    .bind(merge_optional_text(&request.notes, &order.notes))
    .bind(request.due_date.or(order.due_date))
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    find_order(pool, id).await
}

/// Moves an order to `status`; returns the order before and after.
pub async fn change_status(
    pool: &SqlitePool,
    id: &str,
    status: OrderStatus,
) -> ApiResult<(PrintOrder, PrintOrder)> {
    let before = find_order(pool, id).await?;
    let now = Utc::now();

    sqlx::query("UPDATE print_orders SET status = ?, completed_at = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(completion_timestamp(status, before.completed_at, now))
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

    let after = find_order(pool, id).await?;
    Ok((before, after))
}

pub async fn soft_delete_order(pool: &SqlitePool, id: &str) -> ApiResult<PrintOrder> {
    let order = find_order(pool, id).await?;

    sqlx::query("UPDATE print_orders SET lifecycle = 'deleted', updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(order)
}

/// Consumes stock for an order: one `out` movement tagged with the order
/// and the link row, committed together or not at all.
pub async fn consume_material(
    pool: &SqlitePool,
    order_id: &str,
    request: &AddOrderMaterialRequest,
    user_id: &str,
) -> ApiResult<OrderMaterial> {
    let order = find_order(pool, order_id).await?;
    if order.status == OrderStatus::Cancelled {
        return Err(ApiError::Conflict(format!(
            "Order {} is cancelled; materials can no longer be added",
            order.order_number
        )));
    }

    let notes = format!("Used for order {}", order.order_number);
    let mut tx = pool.begin().await?;

    let change = StockChange {
        material_id: &request.material_id,
        direction: MovementDirection::Out,
        quantity: request.quantity,
        notes: Some(&notes),
        user_id,
        order_id: Some(order_id),
    };
    let movement = apply_movement_on(&mut *tx, &change).await?;

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO order_materials (id, order_id, material_id, quantity, movement_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(order_id)
    .bind(&request.material_id)
    .bind(request.quantity)
    .bind(&movement.id)
    .bind(movement.created_at)
    .execute(&mut *tx)
    .await?;

    let link = sqlx::query_as::<_, OrderMaterial>("SELECT * FROM order_materials WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(link)
}

// ==================== HANDLERS ====================

pub async fn get_orders(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<OrderQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Orders)?;

    let (page, per_page, _) = query.normalize();
    let (orders, total) = list_orders(&app_state.db_pool, &query).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(orders, total, page, per_page))))
}

pub async fn get_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Orders)?;

    let order = find_order(&app_state.db_pool, &path.into_inner()).await?;
    let materials = order_materials(&app_state.db_pool, &order.id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(OrderWithMaterials { order, materials })))
}

pub async fn create_order(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateOrderRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Orders)?;
    request.validate()?;

    let order = insert_order(&app_state.db_pool, &request, &claims.sub).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Create, EntityType::Order)
            .entity(&order.id, &order.order_number)
            .details(format!("{} x{} for {}", order.print_type, order.copies, order.customer_name)),
        &http_request,
    ).await;

    log::info!("Order {} created by {}", order.order_number, claims.username);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        order,
        "Order created successfully".to_string(),
    )))
}

pub async fn update_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateOrderRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Orders)?;
    request.validate()?;

    let order = apply_order_update(&app_state.db_pool, &path.into_inner(), &request).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Update, EntityType::Order).entity(&order.id, &order.order_number),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        order,
        "Order updated successfully".to_string(),
    )))
}

pub async fn update_order_status(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateOrderStatusRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Orders)?;

    let (before, after) = change_status(&app_state.db_pool, &path.into_inner(), request.status).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::StatusChange, EntityType::Order)
            .entity(&after.id, &after.order_number)
            .details(format!("{} -> {}", before.status, after.status)),
        &http_request,
    ).await;

    log::info!(
        "Order {} status {} -> {} by {}",
        after.order_number, before.status, after.status, claims.username
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        after,
        "Order status updated".to_string(),
    )))
}

pub async fn delete_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_delete(&http_request, Page::Orders)?;

    let order = soft_delete_order(&app_state.db_pool, &path.into_inner()).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Delete, EntityType::Order).entity(&order.id, &order.order_number),
        &http_request,
    ).await;

    log::info!("Order {} deleted by {}", order.order_number, claims.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Order deleted successfully".to_string(),
    )))
}

pub async fn get_order_materials(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Orders)?;

    let order = find_order(&app_state.db_pool, &path.into_inner()).await?;
    let materials = order_materials(&app_state.db_pool, &order.id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(materials)))
}

pub async fn add_order_material(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<AddOrderMaterialRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Orders)?;
    request.validate()?;

    let order_id = path.into_inner();
    let link = consume_material(&app_state.db_pool, &order_id, &request, &claims.sub).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Movement, EntityType::Order)
            .entity(&link.order_id, &link.material_id)
            .details(format!("Consumed {} of material {}", link.quantity, link.material_id)),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        link,
        "Material added to order".to_string(),
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

    fn flyer_order() -> CreateOrderRequest {
        CreateOrderRequest {
            customer_name: "Bakery on Main".to_string(),
            customer_phone: Some("555-0101".to_string()),
            print_type: "flyer".to_string(),
            copies: 250,
            paper_type: "A5 glossy".to_string(),
            cost: 45.0,
            status: None,
            notes: None,
            due_date: None,
        }
    }

    async fn seed_paper(pool: &SqlitePool, user_id: &str, quantity: i64) -> String {
        let request = CreateMaterialRequest {
            name: "A5 glossy".to_string(),
            material_type: "paper".to_string(),
            unit: None,
            quantity,
            min_quantity: 50,
            price: 0.1,
            supplier: None,
            notes: None,
        };
        insert_material(pool, &request, user_id).await.unwrap().id
    }

    #[actix_rt::test]
    async fn test_create_order_defaults_to_pending() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "desk", Role::Employee).await;

        let order = insert_order(&pool, &flyer_order(), &user.sub).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.order_number.starts_with(barcode::ORDER_PREFIX));
        assert!(order.completed_at.is_none());
    }

    #[actix_rt::test]
    async fn test_update_clears_phone_and_keeps_notes() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "desk", Role::Employee).await;
        let mut create = flyer_order();
        create.customer_phone = Some("+1 555 0100".to_string());
        create.notes = Some("Matte lamination".to_string());
        let order = insert_order(&pool, &create, &user.sub).await.unwrap();

        let request = UpdateOrderRequest {
            customer_name: None,
            customer_phone: Some(" ".to_string()),
            print_type: None,
            copies: Some(300),
            paper_type: None,
            cost: None,
            notes: None,
            due_date: None,
        };
        let updated = apply_order_update(&pool, &order.id, &request).await.unwrap();
        assert_eq!(updated.customer_phone, None);
        assert_eq!(updated.notes.as_deref(), Some("Matte lamination"));
        assert_eq!(updated.copies, 300);
    }

    #[actix_rt::test]
    async fn test_status_changes_maintain_completed_at() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "desk", Role::Employee).await;
        let order = insert_order(&pool, &flyer_order(), &user.sub).await.unwrap();

        let (_, done) = change_status(&pool, &order.id, OrderStatus::Completed).await.unwrap();
        let stamp = done.completed_at.expect("completed_at set");

        let (_, still_done) = change_status(&pool, &order.id, OrderStatus::Completed).await.unwrap();
        assert_eq!(still_done.completed_at, Some(stamp));

        let (before, reopened) = change_status(&pool, &order.id, OrderStatus::InProgress).await.unwrap();
        assert_eq!(before.status, OrderStatus::Completed);
        assert_eq!(reopened.status, OrderStatus::InProgress);
        assert!(reopened.completed_at.is_none());
    }

    #[actix_rt::test]
    async fn test_soft_deleted_order_disappears() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "desk", Role::Employee).await;
        let order = insert_order(&pool, &flyer_order(), &user.sub).await.unwrap();

        soft_delete_order(&pool, &order.id).await.unwrap();
        assert!(matches!(find_order(&pool, &order.id).await, Err(ApiError::NotFound(_))));
        let (_, total) = list_orders(&pool, &OrderQuery::default()).await.unwrap();
        assert_eq!(total, 0);
    }

    #[actix_rt::test]
    async fn test_consume_material_records_out_movement() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "desk", Role::Employee).await;
        let material_id = seed_paper(&pool, &user.sub, 300).await;
        let order = insert_order(&pool, &flyer_order(), &user.sub).await.unwrap();

        let request = AddOrderMaterialRequest { material_id: material_id.clone(), quantity: 250 };
        let link = consume_material(&pool, &order.id, &request, &user.sub).await.unwrap();
        assert_eq!(link.quantity, 250);

        assert_eq!(find_material(&pool, &material_id).await.unwrap().quantity, 50);

        let tagged: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM inventory_movements WHERE order_id = ? AND direction = 'out'"
        )
            .bind(&order.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(tagged.0, 1);

        let listed = order_materials(&pool, &order.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].material_name, "A5 glossy");
    }

    #[actix_rt::test]
    async fn test_consume_more_than_stock_writes_nothing() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "desk", Role::Employee).await;
        let material_id = seed_paper(&pool, &user.sub, 100).await;
        let order = insert_order(&pool, &flyer_order(), &user.sub).await.unwrap();

        let request = AddOrderMaterialRequest { material_id: material_id.clone(), quantity: 250 };
        assert!(matches!(
            consume_material(&pool, &order.id, &request, &user.sub).await,
            Err(ApiError::Conflict(_))
        ));

        assert_eq!(find_material(&pool, &material_id).await.unwrap().quantity, 100);
        assert!(order_materials(&pool, &order.id).await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_search_and_status_filter() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "desk", Role::Employee).await;
        let first = insert_order(&pool, &flyer_order(), &user.sub).await.unwrap();
        let mut other = flyer_order();
        other.customer_name = "City Library".to_string();
        insert_order(&pool, &other, &user.sub).await.unwrap();
        change_status(&pool, &first.id, OrderStatus::InProgress).await.unwrap();

        let query = OrderQuery { status: Some(OrderStatus::InProgress), ..Default::default() };
        let (orders, total) = list_orders(&pool, &query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(orders[0].id, first.id);

        let query = OrderQuery { search: Some("library".to_string()), ..Default::default() };
        let (orders, _) = list_orders(&pool, &query).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].customer_name, "City Library");
    }
}
