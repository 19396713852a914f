// src/material_handlers.rs - Consumables stock (paper, ink, bindings...)

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::access::{Page, Role};
use crate::audit::{audit, ActivityEntry};
use crate::auth::require_page;
use crate::barcode;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{like_pattern, merge_optional_text, ApiResponse, PaginatedResponse};
use crate::models::{
    ActivityAction, CreateMaterialRequest, EntityType, Material, MaterialQuery, MaterialResponse,
    MovementQuery, UpdateMaterialRequest,
};
use crate::movement_handlers::list_movements;
use crate::rules::can_delete_material;
use crate::AppState;

const BARCODE_ATTEMPTS: usize = 3;

// ==================== QUERIES ====================

pub async fn list_materials(pool: &SqlitePool, query: &MaterialQuery) -> ApiResult<(Vec<Material>, i64)> {
    let (_, per_page, offset) = query.normalize();

    let mut conditions: Vec<String> = vec!["lifecycle = 'active'".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(pattern) = like_pattern(&query.search) {
        conditions.push("(name LIKE ? OR barcode LIKE ? OR supplier LIKE ?)".to_string());
        params.push(pattern.clone());
        params.push(pattern.clone());
        params.push(pattern);
    }
    if let Some(material_type) = query.material_type.as_deref().filter(|t| !t.trim().is_empty()) {
        conditions.push("material_type = ?".to_string());
        params.push(material_type.trim().to_string());
    }
    if query.low_stock == Some(true) {
        conditions.push("quantity <= min_quantity".to_string());
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM materials WHERE {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total = count_query.fetch_one(pool).await?;

    let sql = format!(
        "SELECT * FROM materials WHERE {} ORDER BY name LIMIT ? OFFSET ?",
        where_clause
    );
    let mut select_query = sqlx::query_as::<_, Material>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    let materials = select_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok((materials, total))
}

pub async fn find_material(pool: &SqlitePool, id: &str) -> ApiResult<Material> {
    sqlx::query_as::<_, Material>("SELECT * FROM materials WHERE id = ? AND lifecycle = 'active'")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::material_not_found(id))
}

pub async fn find_material_by_barcode(pool: &SqlitePool, code: &str) -> ApiResult<Material> {
    let code = code.trim();
    if !barcode::is_valid(code) {
        return Err(ApiError::bad_request("Malformed barcode"));
    }

    sqlx::query_as::<_, Material>("SELECT * FROM materials WHERE barcode = ? AND lifecycle = 'active'")
        .bind(code)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No material with barcode '{}'", code)))
}

pub async fn low_stock_materials(pool: &SqlitePool) -> ApiResult<Vec<Material>> {
    let materials = sqlx::query_as::<_, Material>(
        r#"SELECT * FROM materials
           WHERE lifecycle = 'active' AND quantity <= min_quantity
           ORDER BY (quantity - min_quantity), name"#
    )
    .fetch_all(pool)
    .await?;
    Ok(materials)
}

// ==================== WRITES ====================

pub async fn insert_material(
    pool: &SqlitePool,
    request: &CreateMaterialRequest,
    user_id: &str,
) -> ApiResult<Material> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let unit = request.unit.as_deref().map(str::trim).filter(|u| !u.is_empty()).unwrap_or("pcs");

    let mut attempt = 0;
    loop {
        attempt += 1;
        let code = barcode::material();

        let result = sqlx::query(
            r#"INSERT INTO materials (
                id, name, material_type, unit, quantity, min_quantity, price, barcode,
                supplier, notes, lifecycle, created_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?)"#
        )
        .bind(&id)
        .bind(request.name.trim())
        .bind(request.material_type.trim())
        .bind(unit)
        .bind(request.quantity)
        .bind(request.min_quantity)
        .bind(request.price)
        .bind(&code)
        .bind(&request.supplier)
        .bind(&request.notes)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(ApiError::from);

        match result {
            Ok(_) => break,
            Err(ApiError::Conflict(_)) if attempt < BARCODE_ATTEMPTS => {
                log::warn!("Barcode collision on {}, regenerating", code);
            }
            Err(e) => return Err(e),
        }
    }

    find_material(pool, &id).await
}

pub async fn apply_material_update(
    pool: &SqlitePool,
    id: &str,
    request: &UpdateMaterialRequest,
) -> ApiResult<Material> {
    let material = find_material(pool, id).await?;

    sqlx::query(
        r#"UPDATE materials SET
            name = ?, material_type = ?, unit = ?, min_quantity = ?, price = ?,
            supplier = ?, notes = ?, updated_at = ?
           WHERE id = ?"#
    )
    .bind(request.name.as_deref().map(str::trim).unwrap_or(&material.name))
    .bind(request.material_type.as_deref().map(str::trim).unwrap_or(&material.material_type))
    .bind(request.unit.as_deref().unwrap_or(&material.unit))
    .bind(request.min_quantity.unwrap_or(material.min_quantity))
    .bind(request.price.unwrap_or(material.price))
    .bind(merge_optional_text(&request.supplier, &material.supplier))
    .bind(merge_optional_text(&request.notes, &material.notes))
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    find_material(pool, id).await
}

/// Hides a material. Materials that already appear in the movement ledger
/// may only be removed by an admin.
pub async fn soft_delete_material(pool: &SqlitePool, id: &str, role: Role) -> ApiResult<Material> {
    let mut tx = pool.begin().await?;

    let material = sqlx::query_as::<_, Material>("SELECT * FROM materials WHERE id = ? AND lifecycle = 'active'")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::material_not_found(id))?;

    let movements: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory_movements WHERE material_id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    if !can_delete_material(movements > 0, role) {
        return Err(ApiError::Forbidden(format!(
            "Material '{}' has {} recorded movements; only an administrator can delete it",
            material.name, movements
        )));
    }

    mark_material_deleted(&mut *tx, id, role).await?;

    tx.commit().await?;
    Ok(material)
}

/// Flips the lifecycle tag. For non-admins the UPDATE itself requires an
/// empty ledger, so a movement committed after the count still blocks it.
async fn mark_material_deleted(conn: &mut SqliteConnection, id: &str, role: Role) -> ApiResult<()> {
    let result = sqlx::query(
        r#"UPDATE materials SET lifecycle = 'deleted', updated_at = ?
           WHERE id = ? AND lifecycle = 'active'
             AND (? OR NOT EXISTS (SELECT 1 FROM inventory_movements WHERE material_id = ?))"#
    )
    .bind(Utc::now())
    .bind(id)
    .bind(role == Role::Admin)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::Forbidden(format!(
            "Material '{}' has recorded movements; only an administrator can delete it",
            id
        )));
    }
    Ok(())
}

// ==================== HANDLERS ====================

pub async fn get_materials(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<MaterialQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Inventory)?;

    let (page, per_page, _) = query.normalize();
    let (materials, total) = list_materials(&app_state.db_pool, &query).await?;
    let data: Vec<MaterialResponse> = materials.into_iter().map(Into::into).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(data, total, page, per_page))))
}

pub async fn get_material(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Inventory)?;
    let material = find_material(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(MaterialResponse::from(material))))
}

pub async fn get_material_by_barcode(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Inventory)?;
    let material = find_material_by_barcode(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(MaterialResponse::from(material))))
}

pub async fn get_low_stock(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Inventory)?;
    let materials = low_stock_materials(&app_state.db_pool).await?;
    let data: Vec<MaterialResponse> = materials.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
}

pub async fn create_material(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateMaterialRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Inventory)?;
    request.validate()?;

    let material = insert_material(&app_state.db_pool, &request, &claims.sub).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Create, EntityType::Material)
            .entity(&material.id, &material.name)
            .details(format!("Initial quantity: {} {}", material.quantity, material.unit)),
        &http_request,
    ).await;

    log::info!("Material {} ({}) created by {}", material.name, material.barcode, claims.username);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        MaterialResponse::from(material),
        "Material created successfully".to_string(),
    )))
}

pub async fn update_material(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateMaterialRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Inventory)?;
    request.validate()?;

    let material = apply_material_update(&app_state.db_pool, &path.into_inner(), &request).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Update, EntityType::Material).entity(&material.id, &material.name),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        MaterialResponse::from(material),
        "Material updated successfully".to_string(),
    )))
}

pub async fn delete_material(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Inventory)?;

    let material = soft_delete_material(&app_state.db_pool, &path.into_inner(), claims.role).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Delete, EntityType::Material).entity(&material.id, &material.name),
        &http_request,
    ).await;

    log::info!("Material {} deleted by {}", material.name, claims.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Material deleted successfully".to_string(),
    )))
}

pub async fn get_material_movements(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<MovementQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Movements)?;

    let material = find_material(&app_state.db_pool, &path.into_inner()).await?;
    let query = MovementQuery {
        material_id: Some(material.id),
        ..query.into_inner()
    };

    let (page, per_page, _) = query.normalize();
    let (movements, total) = list_movements(&app_state.db_pool, &query).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(movements, total, page, per_page))))
}

pub async fn export_materials(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Inventory)?;

    let materials: Vec<Material> = sqlx::query_as(
        "SELECT * FROM materials WHERE lifecycle = 'active' ORDER BY name"
    )
    .fetch_all(&app_state.db_pool)
    .await?;

    let csv_data = materials_csv(&materials)?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(("Content-Disposition", "attachment; filename=\"materials.csv\""))
        .body(csv_data))
}

fn materials_csv(materials: &[Material]) -> ApiResult<Vec<u8>> {
    let mut csv_data = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut csv_data);

        writer.write_record([
            "Barcode", "Name", "Type", "Unit", "Quantity", "Min Quantity", "Price", "Supplier", "Low Stock",
        ]).map_err(|e| ApiError::InternalServerError(e.to_string()))?;

        for m in materials {
            writer.write_record([
                m.barcode.clone(),
                m.name.clone(),
                m.material_type.clone(),
                m.unit.clone(),
                m.quantity.to_string(),
                m.min_quantity.to_string(),
                format!("{:.2}", m.price),
                m.supplier.clone().unwrap_or_default(),
                if m.is_low_stock() { "yes" } else { "no" }.to_string(),
            ]).map_err(|e| ApiError::InternalServerError(e.to_string()))?;
        }

        writer.flush().map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    }
    Ok(csv_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::handlers::test_support::seed_user;
    use crate::models::{CreateMovementRequest, MovementDirection};
    use crate::movement_handlers::record_movement;

    fn paper(quantity: i64, min_quantity: i64) -> CreateMaterialRequest {
        CreateMaterialRequest {
            name: "Paper A4 80g".to_string(),
            material_type: "paper".to_string(),
            unit: Some("sheet".to_string()),
            quantity,
            min_quantity,
            price: 0.05,
            supplier: Some("Papyrus Ltd".to_string()),
            notes: None,
        }
    }

    #[actix_rt::test]
    async fn test_create_material_assigns_barcode() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;

        let material = insert_material(&pool, &paper(500, 100), &user.sub).await.unwrap();
        assert!(material.barcode.starts_with(barcode::MATERIAL_PREFIX));
        assert_eq!(material.unit, "sheet");

        let by_code = find_material_by_barcode(&pool, &material.barcode).await.unwrap();
        assert_eq!(by_code.id, material.id);

        let err = find_material_by_barcode(&pool, "MAT-1; DROP").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[actix_rt::test]
    async fn test_low_stock_listing() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;

        let low = insert_material(&pool, &paper(5, 10), &user.sub).await.unwrap();
        let fine = insert_material(&pool, &paper(15, 10), &user.sub).await.unwrap();

        let listed = low_stock_materials(&pool).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
        assert!(ids.contains(&low.id.as_str()));
        assert!(!ids.contains(&fine.id.as_str()));

        let query = MaterialQuery { low_stock: Some(true), ..Default::default() };
        let (filtered, total) = list_materials(&pool, &query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(filtered[0].id, low.id);
    }

    #[actix_rt::test]
    async fn test_update_does_not_touch_quantity() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;
        let material = insert_material(&pool, &paper(40, 10), &user.sub).await.unwrap();

        let request = UpdateMaterialRequest {
            name: Some("Paper A4 90g".to_string()),
            material_type: None,
            unit: None,
            min_quantity: Some(20),
            price: None,
            supplier: None,
            notes: None,
        };
        let updated = apply_material_update(&pool, &material.id, &request).await.unwrap();
        assert_eq!(updated.name, "Paper A4 90g");
        assert_eq!(updated.min_quantity, 20);
        assert_eq!(updated.quantity, 40);
        assert_eq!(updated.supplier.as_deref(), Some("Papyrus Ltd"));
    }

    #[actix_rt::test]
    async fn test_delete_with_movements_requires_admin() {
        let pool = test_pool().await;
        let employee = seed_user(&pool, "clerk", Role::Employee).await;

        let material = insert_material(&pool, &paper(50, 10), &employee.sub).await.unwrap();
        let movement = CreateMovementRequest {
            material_id: material.id.clone(),
            direction: MovementDirection::Out,
            quantity: 5,
            notes: None,
        };
        record_movement(&pool, &movement, &employee.sub, None).await.unwrap();

        assert!(matches!(
            soft_delete_material(&pool, &material.id, Role::Employee).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            soft_delete_material(&pool, &material.id, Role::Supervisor).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(find_material(&pool, &material.id).await.is_ok());

        soft_delete_material(&pool, &material.id, Role::Admin).await.unwrap();
        assert!(matches!(find_material(&pool, &material.id).await, Err(ApiError::NotFound(_))));
    }

    #[actix_rt::test]
    async fn test_delete_statement_rechecks_ledger() {
        let pool = test_pool().await;
        let employee = seed_user(&pool, "clerk", Role::Employee).await;
        let material = insert_material(&pool, &paper(50, 10), &employee.sub).await.unwrap();

        // a movement that lands after the caller's count was taken
        let movement = CreateMovementRequest {
            material_id: material.id.clone(),
            direction: MovementDirection::In,
            quantity: 5,
            notes: None,
        };
        record_movement(&pool, &movement, &employee.sub, None).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let result = mark_material_deleted(&mut conn, &material.id, Role::Employee).await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
        mark_material_deleted(&mut conn, &material.id, Role::Admin).await.unwrap();
        drop(conn);

        assert!(matches!(find_material(&pool, &material.id).await, Err(ApiError::NotFound(_))));
    }

    #[actix_rt::test]
    async fn test_update_clears_optional_text() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;
        let material = insert_material(&pool, &paper(40, 10), &user.sub).await.unwrap();

        let request = UpdateMaterialRequest {
            name: None,
            material_type: None,
            unit: None,
            min_quantity: None,
            price: None,
            supplier: Some(String::new()),
            notes: Some("Keep dry".to_string()),
        };
        let updated = apply_material_update(&pool, &material.id, &request).await.unwrap();
        assert_eq!(updated.supplier, None);
        assert_eq!(updated.notes.as_deref(), Some("Keep dry"));
    }

    #[actix_rt::test]
    async fn test_employee_may_delete_unused_material() {
        let pool = test_pool().await;
        let employee = seed_user(&pool, "clerk", Role::Employee).await;
        let material = insert_material(&pool, &paper(50, 10), &employee.sub).await.unwrap();

        soft_delete_material(&pool, &material.id, Role::Employee).await.unwrap();
        let (listed, total) = list_materials(&pool, &MaterialQuery::default()).await.unwrap();
        assert_eq!(total, 0);
        assert!(listed.is_empty());
    }

    #[actix_rt::test]
    async fn test_search_and_csv() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "clerk", Role::Employee).await;
        insert_material(&pool, &paper(50, 10), &user.sub).await.unwrap();
        let mut ink = paper(3, 5);
        ink.name = "Black toner".to_string();
        ink.material_type = "ink".to_string();
        insert_material(&pool, &ink, &user.sub).await.unwrap();

        let query = MaterialQuery { search: Some("toner".to_string()), ..Default::default() };
        let (found, total) = list_materials(&pool, &query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].name, "Black toner");

        let query = MaterialQuery { material_type: Some("paper".to_string()), ..Default::default() };
        let (_, total) = list_materials(&pool, &query).await.unwrap();
        assert_eq!(total, 1);

        let (all, _) = list_materials(&pool, &MaterialQuery::default()).await.unwrap();
        let csv = String::from_utf8(materials_csv(&all).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("Barcode,Name"));
        assert_eq!(lines.count(), 2);
        assert!(csv.contains("Black toner"));
    }
}
