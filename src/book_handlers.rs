// src/book_handlers.rs - Book catalog with ready/printing quantities

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use sqlx::{SqliteExecutor, SqlitePool};
use std::path::Path;
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
    ActivityAction, Book, BookQuery, CreateBookRequest, EntityType, UpdateBookRequest,
    UpdateQuantitiesRequest,
};
use crate::rules::{derive_status, normalize_isbn, validate_quantities};
use crate::uploads;
use crate::AppState;

fn parse_isbn(raw: &str) -> ApiResult<String> {
    normalize_isbn(raw).ok_or_else(|| ApiError::ValidationError(format!(
        "'{}' is not a valid ISBN-10 or ISBN-13",
        raw
    )))
}

async fn ensure_isbn_free<'e>(executor: impl SqliteExecutor<'e>, isbn: &str, except_id: Option<&str>) -> ApiResult<()> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM books WHERE isbn = ?")
        .bind(isbn)
        .fetch_optional(executor)
        .await?;

    match existing {
        Some((id,)) if Some(id.as_str()) != except_id => Err(ApiError::isbn_already_exists(isbn)),
        _ => Ok(()),
    }
}

// ==================== QUERIES ====================

pub async fn list_books(pool: &SqlitePool, query: &BookQuery) -> ApiResult<(Vec<Book>, i64)> {
    let (_, per_page, offset) = query.normalize();

    let mut conditions: Vec<String> = vec!["lifecycle = 'active'".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(pattern) = like_pattern(&query.search) {
        conditions.push("(title LIKE ? OR author LIKE ? OR isbn LIKE ? OR barcode LIKE ?)".to_string());
        for _ in 0..4 {
            params.push(pattern.clone());
        }
    }
    if let Some(category) = query.category.as_deref().filter(|c| !c.trim().is_empty()) {
        conditions.push("category = ?".to_string());
        params.push(category.trim().to_string());
    }
    if let Some(status) = query.status {
        conditions.push("status = ?".to_string());
        params.push(status.as_ref().to_string());
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM books WHERE {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total = count_query.fetch_one(pool).await?;

    let sql = format!(
        "SELECT * FROM books WHERE {} ORDER BY title LIMIT ? OFFSET ?",
        where_clause
    );
    let mut select_query = sqlx::query_as::<_, Book>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    let books = select_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok((books, total))
}

pub async fn find_book(pool: &SqlitePool, id: &str) -> ApiResult<Book> {
    sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ? AND lifecycle = 'active'")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::book_not_found(id))
}

/// Scanner lookup: matches the shop barcode or the ISBN printed on the book.
pub async fn find_book_by_code(pool: &SqlitePool, code: &str) -> ApiResult<Book> {
    let code = code.trim();
    let isbn = normalize_isbn(code).unwrap_or_else(|| code.to_string());

    sqlx::query_as::<_, Book>(
        "SELECT * FROM books WHERE (barcode = ? OR isbn = ?) AND lifecycle = 'active'"
    )
    .bind(code)
    .bind(&isbn)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("No book with barcode '{}'", code)))
}

// ==================== WRITES ====================

pub async fn insert_book(pool: &SqlitePool, request: &CreateBookRequest, user_id: &str) -> ApiResult<Book> {
    let isbn = parse_isbn(&request.isbn)?;
    validate_quantities(request.total_quantity, request.ready_quantity, request.printing_quantity)?;
    ensure_isbn_free(pool, &isbn, None).await?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let status = derive_status(request.ready_quantity, request.printing_quantity);

    sqlx::query(
        r#"INSERT INTO books (
            id, title, author, isbn, barcode, category, total_quantity, ready_quantity,
            printing_quantity, price, status, description, cover_image, lifecycle,
            created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 'active', ?, ?, ?)"#
    )
    .bind(&id)
    .bind(request.title.trim())
    .bind(request.author.trim())
    .bind(&isbn)
    .bind(barcode::book())
    .bind(request.category.trim())
    .bind(request.total_quantity)
    .bind(request.ready_quantity)
    .bind(request.printing_quantity)
    .bind(request.price)
    .bind(status)
    .bind(&request.description)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    find_book(pool, &id).await
}

/// Merges a partial update into the stored book inside one transaction, so
/// the quantity check sees the same row the UPDATE writes.
pub async fn apply_book_update(pool: &SqlitePool, id: &str, request: &UpdateBookRequest) -> ApiResult<Book> {
    let mut tx = pool.begin().await?;

    let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ? AND lifecycle = 'active'")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::book_not_found(id))?;

    let isbn = match &request.isbn {
        Some(raw) => {
            let isbn = parse_isbn(raw)?;
            ensure_isbn_free(&mut *tx, &isbn, Some(id)).await?;
            isbn
        }
        None => book.isbn.clone(),
    };

    let total = request.total_quantity.unwrap_or(book.total_quantity);
    let ready = request.ready_quantity.unwrap_or(book.ready_quantity);
    let printing = request.printing_quantity.unwrap_or(book.printing_quantity);
    validate_quantities(total, ready, printing)?;

    sqlx::query(
        r#"UPDATE books SET
            title = ?, author = ?, isbn = ?, category = ?, total_quantity = ?, ready_quantity = ?,
            printing_quantity = ?, price = ?, status = ?, description = ?, updated_at = ?
           WHERE id = ?"#
    )
    .bind(request.title.as_deref().map(str::trim).unwrap_or(&book.title))
    .bind(request.author.as_deref().map(str::trim).unwrap_or(&book.author))
    .bind(&isbn)
    .bind(request.category.as_deref().map(str::trim).unwrap_or(&book.category))
    .bind(total)
    .bind(ready)
    .bind(printing)
    .bind(request.price.unwrap_or(book.price))
    .bind(derive_status(ready, printing))
    .bind(merge_optional_text(&request.description, &book.description))
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Read-check-write of the three quantities in one transaction; the stored
/// row is untouched when the merged values break an invariant.
pub async fn set_quantities(pool: &SqlitePool, id: &str, request: &UpdateQuantitiesRequest) -> ApiResult<Book> {
    let mut tx = pool.begin().await?;

    let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ? AND lifecycle = 'active'")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::book_not_found(id))?;

    let total = request.total_quantity.unwrap_or(book.total_quantity);
    let ready = request.ready_quantity.unwrap_or(book.ready_quantity);
    let printing = request.printing_quantity.unwrap_or(book.printing_quantity);
    validate_quantities(total, ready, printing)?;

    sqlx::query(
        r#"UPDATE books SET total_quantity = ?, ready_quantity = ?, printing_quantity = ?,
               status = ?, updated_at = ?
           WHERE id = ?"#
    )
    .bind(total)
    .bind(ready)
    .bind(printing)
    .bind(derive_status(ready, printing))
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(updated)
}

pub async fn soft_delete_book(pool: &SqlitePool, id: &str) -> ApiResult<Book> {
    let book = find_book(pool, id).await?;

    sqlx::query("UPDATE books SET lifecycle = 'deleted', updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(book)
}

pub async fn set_cover(pool: &SqlitePool, id: &str, url: &str) -> ApiResult<Book> {
    sqlx::query("UPDATE books SET cover_image = ?, updated_at = ? WHERE id = ? AND lifecycle = 'active'")
        .bind(url)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

    find_book(pool, id).await
}

/// Stores a new cover file and points the book at it. The new file is
/// removed again if the row update fails; the previous file is removed once
/// the row points at the new one.
pub async fn replace_cover(
    pool: &SqlitePool,
    upload_dir: &Path,
    book: &Book,
    extension: &str,
    bytes: &[u8],
) -> ApiResult<Book> {
    let url = uploads::store_cover(upload_dir, &book.id, extension, bytes).await?;

    let updated = match set_cover(pool, &book.id, &url).await {
        Ok(updated) => updated,
        Err(e) => {
            uploads::remove_cover(upload_dir, &url).await;
            return Err(e);
        }
    };

    if let Some(old) = book.cover_image.as_deref() {
        uploads::remove_cover(upload_dir, old).await;
    }
    Ok(updated)
}

// ==================== HANDLERS ====================

pub async fn get_books(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<BookQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Books)?;

    let (page, per_page, _) = query.normalize();
    let (books, total) = list_books(&app_state.db_pool, &query).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(books, total, page, per_page))))
}

pub async fn get_book(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Books)?;
    let book = find_book(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(book)))
}

pub async fn get_book_by_barcode(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_page(&http_request, Page::Books)?;
    let book = find_book_by_code(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(book)))
}

pub async fn create_book(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateBookRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Books)?;
    request.validate()?;

    let book = insert_book(&app_state.db_pool, &request, &claims.sub).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Create, EntityType::Book)
            .entity(&book.id, &book.title)
            .details(format!(
                "ISBN {}; total {}, ready {}, printing {}",
                book.isbn, book.total_quantity, book.ready_quantity, book.printing_quantity
            )),
        &http_request,
    ).await;

    log::info!("Book '{}' ({}) created by {}", book.title, book.isbn, claims.username);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        book,
        "Book created successfully".to_string(),
    )))
}

pub async fn update_book(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateBookRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Books)?;
    request.validate()?;

    let book = apply_book_update(&app_state.db_pool, &path.into_inner(), &request).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Update, EntityType::Book).entity(&book.id, &book.title),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        book,
        "Book updated successfully".to_string(),
    )))
}

pub async fn update_book_quantities(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateQuantitiesRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Books)?;

    let book_id = path.into_inner();
    let book = match set_quantities(&app_state.db_pool, &book_id, &request).await {
        Ok(book) => book,
        Err(e) => {
            log::warn!("Quantity update for book {} rejected: {}", book_id, e);
            return Err(e);
        }
    };

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Update, EntityType::Book)
            .entity(&book.id, &book.title)
            .details(format!(
                "Quantities: total {}, ready {}, printing {} ({})",
                book.total_quantity, book.ready_quantity, book.printing_quantity, book.status
            )),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        book,
        "Quantities updated".to_string(),
    )))
}

pub async fn delete_book(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_delete(&http_request, Page::Books)?;

    let book = soft_delete_book(&app_state.db_pool, &path.into_inner()).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Delete, EntityType::Book).entity(&book.id, &book.title),
        &http_request,
    ).await;

    log::info!("Book '{}' deleted by {}", book.title, claims.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Book deleted successfully".to_string(),
    )))
}

/// Accepts a multipart form with a single `cover` image field.
pub async fn upload_book_cover(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    mut payload: Multipart,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_page(&http_request, Page::Books)?;

    let book = find_book(&app_state.db_pool, &path.into_inner()).await?;
    let max_bytes = app_state.config.uploads.max_cover_bytes;

    let mut cover: Option<(Vec<u8>, &'static str)> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| ApiError::bad_request(&format!("Multipart error: {}", e)))?;

        if field.content_disposition().get_name() != Some("cover") {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| ApiError::bad_request(&format!("Read error: {}", e)))?;
            }
            continue;
        }

        let mime = field.content_type()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let extension = uploads::cover_extension(&mime)?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ApiError::bad_request(&format!("Read error: {}", e)))?;
            bytes.extend_from_slice(&chunk);
            if bytes.len() > max_bytes {
                return Err(ApiError::ValidationError(format!(
                    "Cover is too large (limit {} bytes)",
                    max_bytes
                )));
            }
        }

        cover = Some((bytes, extension));
    }

    let (bytes, extension) = cover.ok_or_else(|| ApiError::bad_request("No 'cover' file provided"))?;
    uploads::validate_cover_size(bytes.len(), max_bytes)?;

    let upload_dir = app_state.config.upload_dir();
    let updated = replace_cover(&app_state.db_pool, &upload_dir, &book, extension, &bytes).await?;
    let url = updated.cover_image.clone().unwrap_or_default();

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Upload, EntityType::Book)
            .entity(&updated.id, &updated.title)
            .details(format!("Cover {} ({} bytes)", url, bytes.len())),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        updated,
        "Cover uploaded".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::db::test_pool;
    use crate::handlers::test_support::seed_user;
    use crate::models::BookStatus;

    fn book_request(total: i64, ready: i64, printing: i64) -> CreateBookRequest {
        CreateBookRequest {
            title: "Letterpress Basics".to_string(),
            author: "A. Printer".to_string(),
            isbn: "978-0-306-40615-7".to_string(),
            category: "craft".to_string(),
            total_quantity: total,
            ready_quantity: ready,
            printing_quantity: printing,
            price: 24.5,
            description: None,
        }
    }

    fn quantities(total: Option<i64>, ready: Option<i64>, printing: Option<i64>) -> UpdateQuantitiesRequest {
        UpdateQuantitiesRequest {
            total_quantity: total,
            ready_quantity: ready,
            printing_quantity: printing,
        }
    }

    #[actix_rt::test]
    async fn test_create_book_derives_status_and_normalizes_isbn() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;

        let book = insert_book(&pool, &book_request(100, 30, 20), &user.sub).await.unwrap();
        assert_eq!(book.isbn, "9780306406157");
        assert_eq!(book.status, BookStatus::Ready);
        assert!(book.barcode.starts_with(barcode::BOOK_PREFIX));
    }

    #[actix_rt::test]
    async fn test_create_rejects_ready_above_total() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;

        let result = insert_book(&pool, &book_request(10, 11, 0), &user.sub).await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));
        let (_, total) = list_books(&pool, &BookQuery::default()).await.unwrap();
        assert_eq!(total, 0);
    }

    #[actix_rt::test]
    async fn test_invalid_and_duplicate_isbn() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;

        let mut bad = book_request(1, 0, 0);
        bad.isbn = "12345".to_string();
        assert!(matches!(insert_book(&pool, &bad, &user.sub).await, Err(ApiError::ValidationError(_))));

        insert_book(&pool, &book_request(1, 0, 0), &user.sub).await.unwrap();
        let mut same = book_request(5, 0, 0);
        same.isbn = "9780306406157".to_string();
        assert!(matches!(insert_book(&pool, &same, &user.sub).await, Err(ApiError::Conflict(_))));
    }

    #[actix_rt::test]
    async fn test_quantity_update_status_transitions() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        let book = insert_book(&pool, &book_request(100, 30, 20), &user.sub).await.unwrap();

        let printing = set_quantities(&pool, &book.id, &quantities(None, Some(0), None)).await.unwrap();
        assert_eq!(printing.status, BookStatus::Printing);
        assert_eq!(printing.total_quantity, 100);
        assert_eq!(printing.printing_quantity, 20);

        let gone = set_quantities(&pool, &book.id, &quantities(None, None, Some(0))).await.unwrap();
        assert_eq!(gone.status, BookStatus::Unavailable);
    }

    #[actix_rt::test]
    async fn test_rejected_quantity_update_leaves_row_unchanged() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        let book = insert_book(&pool, &book_request(100, 30, 20), &user.sub).await.unwrap();

        let result = set_quantities(&pool, &book.id, &quantities(None, Some(60), Some(50))).await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));

        let result = set_quantities(&pool, &book.id, &quantities(Some(-1), None, None)).await;
        assert!(matches!(result, Err(ApiError::ValidationError(_))));

        let stored = find_book(&pool, &book.id).await.unwrap();
        assert_eq!(
            (stored.total_quantity, stored.ready_quantity, stored.printing_quantity, stored.status),
            (100, 30, 20, BookStatus::Ready)
        );
    }

    #[actix_rt::test]
    async fn test_full_update_rederives_status() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        let book = insert_book(&pool, &book_request(10, 0, 0), &user.sub).await.unwrap();
        assert_eq!(book.status, BookStatus::Unavailable);

        let request = UpdateBookRequest {
            title: Some("Letterpress Basics, 2nd ed.".to_string()),
            author: None,
            isbn: None,
            category: None,
            total_quantity: None,
            ready_quantity: None,
            printing_quantity: Some(10),
            price: None,
            description: None,
        };
        let updated = apply_book_update(&pool, &book.id, &request).await.unwrap();
        assert_eq!(updated.status, BookStatus::Printing);
        assert_eq!(updated.title, "Letterpress Basics, 2nd ed.");
    }

    fn empty_update() -> UpdateBookRequest {
        UpdateBookRequest {
            title: None,
            author: None,
            isbn: None,
            category: None,
            total_quantity: None,
            ready_quantity: None,
            printing_quantity: None,
            price: None,
            description: None,
        }
    }

    #[actix_rt::test]
    async fn test_full_update_with_merged_invalid_quantities_conflicts() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        let book = insert_book(&pool, &book_request(100, 60, 30), &user.sub).await.unwrap();

        // 60 + 30 stored, 20 requested: the merged total falls below ready + printing
        let request = UpdateBookRequest {
            title: Some("Renamed".to_string()),
            total_quantity: Some(20),
            ..empty_update()
        };
        let result = apply_book_update(&pool, &book.id, &request).await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));

        let stored = find_book(&pool, &book.id).await.unwrap();
        assert_eq!(stored.title, "Letterpress Basics");
        assert_eq!(stored.total_quantity, 100);
    }

    #[actix_rt::test]
    async fn test_update_can_clear_description() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        let mut create = book_request(10, 0, 0);
        create.description = Some("Hand-set type".to_string());
        let book = insert_book(&pool, &create, &user.sub).await.unwrap();

        let kept = apply_book_update(&pool, &book.id, &empty_update()).await.unwrap();
        assert_eq!(kept.description.as_deref(), Some("Hand-set type"));

        let request = UpdateBookRequest { description: Some(String::new()), ..empty_update() };
        let cleared = apply_book_update(&pool, &book.id, &request).await.unwrap();
        assert_eq!(cleared.description, None);
    }

    #[actix_rt::test]
    async fn test_update_rejects_isbn_of_another_book() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        let first = insert_book(&pool, &book_request(10, 0, 0), &user.sub).await.unwrap();
        let mut other = book_request(10, 0, 0);
        other.isbn = "0-306-40615-2".to_string();
        let second = insert_book(&pool, &other, &user.sub).await.unwrap();

        let request = UpdateBookRequest { isbn: Some(first.isbn.clone()), ..empty_update() };
        let result = apply_book_update(&pool, &second.id, &request).await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));

        // keeping its own ISBN is fine
        let request = UpdateBookRequest { isbn: Some(first.isbn.clone()), ..empty_update() };
        apply_book_update(&pool, &first.id, &request).await.unwrap();
    }

    #[actix_rt::test]
    async fn test_replace_cover_removes_previous_file() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        let dir = tempfile::tempdir().unwrap();
        let book = insert_book(&pool, &book_request(10, 0, 0), &user.sub).await.unwrap();

        let first = replace_cover(&pool, dir.path(), &book, "png", b"one").await.unwrap();
        let first_path = uploads::cover_path(dir.path(), first.cover_image.as_deref().unwrap()).unwrap();
        assert!(first_path.exists());

        let second = replace_cover(&pool, dir.path(), &first, "jpg", b"two").await.unwrap();
        let second_path = uploads::cover_path(dir.path(), second.cover_image.as_deref().unwrap()).unwrap();
        assert!(second_path.exists());
        assert!(!first_path.exists());
    }

    #[actix_rt::test]
    async fn test_failed_cover_update_leaves_no_file() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        let dir = tempfile::tempdir().unwrap();
        let book = insert_book(&pool, &book_request(10, 0, 0), &user.sub).await.unwrap();

        // deleted between the handler's lookup and the cover update
        soft_delete_book(&pool, &book.id).await.unwrap();

        let result = replace_cover(&pool, dir.path(), &book, "png", b"orphan").await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        let covers = dir.path().join(uploads::COVERS_DIR);
        assert_eq!(std::fs::read_dir(covers).unwrap().count(), 0);
    }

    #[actix_rt::test]
    async fn test_lookup_by_barcode_or_isbn_and_soft_delete() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        let book = insert_book(&pool, &book_request(3, 3, 0), &user.sub).await.unwrap();

        assert_eq!(find_book_by_code(&pool, &book.barcode).await.unwrap().id, book.id);
        assert_eq!(find_book_by_code(&pool, "978-0-306-40615-7").await.unwrap().id, book.id);

        soft_delete_book(&pool, &book.id).await.unwrap();
        assert!(matches!(find_book_by_code(&pool, &book.barcode).await, Err(ApiError::NotFound(_))));
    }

    #[actix_rt::test]
    async fn test_list_filters() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "editor", Role::Employee).await;
        insert_book(&pool, &book_request(3, 3, 0), &user.sub).await.unwrap();
        let mut other = book_request(2, 0, 2);
        other.title = "Bookbinding".to_string();
        other.isbn = "0-306-40615-2".to_string();
        other.category = "binding".to_string();
        insert_book(&pool, &other, &user.sub).await.unwrap();

        let query = BookQuery { status: Some(BookStatus::Printing), ..Default::default() };
        let (books, total) = list_books(&pool, &query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(books[0].title, "Bookbinding");

        let query = BookQuery { category: Some("craft".to_string()), ..Default::default() };
        let (_, total) = list_books(&pool, &query).await.unwrap();
        assert_eq!(total, 1);

        let query = BookQuery { search: Some("binding".to_string()), ..Default::default() };
        let (books, _) = list_books(&pool, &query).await.unwrap();
        assert_eq!(books.len(), 1);
    }
}
