// src/auth_handlers.rs - Login, profile and employee management

use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;
use std::sync::Arc;
use chrono::Utc;
use uuid::Uuid;
use sqlx::SqlitePool;

use crate::audit::{audit, ActivityEntry};
use crate::auth::{
    get_current_user, require_employee_management, AuthService, Claims, LoginRequest, LoginResponse,
};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{ActivityAction, CreateUserRequest, EntityType, UpdateUserRequest, User, UserInfo};
use crate::AppState;

// ======== SERVICE FUNCTIONS ========

/// Resolves a username/password pair to an active user.
///
/// Unknown users and wrong passwords produce the same error.
pub async fn authenticate(
    pool: &SqlitePool,
    auth_service: &AuthService,
    username: &str,
    password: &str,
) -> ApiResult<User> {
    let invalid = || ApiError::AuthError("Invalid username or password".to_string());

    let user = match User::find_by_username(pool, username).await {
        Ok(user) => user,
        Err(ApiError::NotFound(_)) => return Err(invalid()),
        Err(e) => return Err(e),
    };

    if !auth_service.verify_password(password, &user.password_hash)? {
        return Err(invalid());
    }

    if !user.is_active {
        return Err(ApiError::AuthError("Account is deactivated".to_string()));
    }

    Ok(user)
}

pub async fn insert_user(
    pool: &SqlitePool,
    auth_service: &AuthService,
    request: &CreateUserRequest,
) -> ApiResult<User> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
        .bind(&request.username)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(ApiError::username_already_exists(&request.username));
    }

    let password_hash = auth_service.hash_password(&request.password)?;
    let now = Utc::now();
    let id = Uuid::new_v4().to_string();

    sqlx::query(
        r#"INSERT INTO users (
            id, username, password_hash, full_name, role, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 1, ?, ?)"#
    )
    .bind(&id)
    .bind(&request.username)
    .bind(&password_hash)
    .bind(&request.full_name)
    .bind(request.role)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    User::find_by_id(pool, &id).await
}

pub async fn apply_user_update(
    pool: &SqlitePool,
    auth_service: &AuthService,
    actor: &Claims,
    user_id: &str,
    request: &UpdateUserRequest,
) -> ApiResult<User> {
    let user = User::find_by_id(pool, user_id).await?;

    if let Some(role) = request.role {
        if user.id == actor.sub && role != user.role {
            return Err(ApiError::BadRequest("You cannot change your own role".to_string()));
        }
    }

    let password_hash = match &request.password {
        Some(password) => auth_service.hash_password(password)?,
        None => user.password_hash.clone(),
    };

    sqlx::query(
        "UPDATE users SET full_name = ?, role = ?, password_hash = ?, updated_at = ? WHERE id = ?"
    )
    .bind(request.full_name.as_ref().unwrap_or(&user.full_name))
    .bind(request.role.unwrap_or(user.role))
    .bind(&password_hash)
    .bind(Utc::now())
    .bind(&user.id)
    .execute(pool)
    .await?;

    User::find_by_id(pool, user_id).await
}

/// Flips `is_active`. Nobody may deactivate their own account.
pub async fn toggle_active(pool: &SqlitePool, actor: &Claims, user_id: &str) -> ApiResult<User> {
    let user = User::find_by_id(pool, user_id).await?;

    if user.id == actor.sub {
        return Err(ApiError::BadRequest("You cannot deactivate your own account".to_string()));
    }

    sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(!user.is_active)
        .bind(Utc::now())
        .bind(&user.id)
        .execute(pool)
        .await?;

    User::find_by_id(pool, user_id).await
}

// ======== AUTH HANDLERS ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let user = match authenticate(&app_state.db_pool, &auth_service, &request.username, &request.password).await {
        Ok(user) => user,
        Err(e) => {
            log::warn!("Failed login attempt for '{}'", request.username);
            return Err(e);
        }
    };

    user.update_last_login(&app_state.db_pool).await?;
    let token = auth_service.generate_token(&user)?;

    let actor = Claims::for_user(&user, 0, 0);
    audit(
        &app_state.db_pool,
        &actor,
        ActivityEntry::new(ActivityAction::Login, EntityType::User).entity(&user.id, &user.username),
        &http_request,
    ).await;

    log::info!("User {} logged in", user.username);

    let response = LoginResponse {
        token,
        expires_in: auth_service.token_lifetime_secs(),
        user: user.into(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

pub async fn get_profile(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;

    if !user.is_active {
        return Err(ApiError::AuthError("Account is deactivated".to_string()));
    }

    let user_info: UserInfo = user.into();
    Ok(HttpResponse::Ok().json(ApiResponse::success(user_info)))
}

// ======== USER MANAGEMENT (ADMIN) ========

pub async fn get_users(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_employee_management(&http_request)?;

    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&app_state.db_pool)
        .await?;

    let user_infos: Vec<UserInfo> = users.into_iter().map(|u| u.into()).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(user_infos)))
}

pub async fn get_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_employee_management(&http_request)?;

    let user = User::find_by_id(&app_state.db_pool, &path.into_inner()).await?;
    let user_info: UserInfo = user.into();

    Ok(HttpResponse::Ok().json(ApiResponse::success(user_info)))
}

pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<CreateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_employee_management(&http_request)?;
    request.validate()?;

    let user = insert_user(&app_state.db_pool, &auth_service, &request).await?;

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Create, EntityType::User)
            .entity(&user.id, &user.username)
            .details(format!("Role: {}", user.role)),
        &http_request,
    ).await;

    log::info!("User {} created by {} with role {}", user.username, claims.username, user.role);

    let user_info: UserInfo = user.into();
    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        user_info,
        "User created successfully".to_string(),
    )))
}

pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    path: web::Path<String>,
    request: web::Json<UpdateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_employee_management(&http_request)?;
    request.validate()?;

    let user_id = path.into_inner();
    let user = apply_user_update(&app_state.db_pool, &auth_service, &claims, &user_id, &request).await?;

    let details = if request.password.is_some() { "Profile and password updated" } else { "Profile updated" };
    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::Update, EntityType::User)
            .entity(&user.id, &user.username)
            .details(details),
        &http_request,
    ).await;

    let user_info: UserInfo = user.into();
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        user_info,
        "User updated successfully".to_string(),
    )))
}

pub async fn toggle_user_active(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_employee_management(&http_request)?;

    let user = toggle_active(&app_state.db_pool, &claims, &path.into_inner()).await?;
    let state = if user.is_active { "activated" } else { "deactivated" };

    audit(
        &app_state.db_pool,
        &claims,
        ActivityEntry::new(ActivityAction::StatusChange, EntityType::User)
            .entity(&user.id, &user.username)
            .details(format!("Account {}", state)),
        &http_request,
    ).await;

    log::info!("User {} {} by {}", user.username, state, claims.username);

    let user_info: UserInfo = user.into();
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        user_info,
        format!("User {}", state),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::db::test_pool;

    fn service() -> AuthService {
        AuthService::new(&"k".repeat(32), 1, 4)
    }

    fn request(username: &str, role: Role) -> CreateUserRequest {
        CreateUserRequest {
            username: username.to_string(),
            password: "secret-pass".to_string(),
            full_name: format!("{} Example", username),
            role,
        }
    }

    #[actix_rt::test]
    async fn test_create_and_authenticate() {
        let pool = test_pool().await;
        let svc = service();
        let user = insert_user(&pool, &svc, &request("carla", Role::Supervisor)).await.unwrap();
        assert_eq!(user.role, Role::Supervisor);
        assert_ne!(user.password_hash, "secret-pass");

        let found = authenticate(&pool, &svc, "carla", "secret-pass").await.unwrap();
        assert_eq!(found.id, user.id);

        assert!(matches!(
            authenticate(&pool, &svc, "carla", "nope").await,
            Err(ApiError::AuthError(_))
        ));
        assert!(matches!(
            authenticate(&pool, &svc, "ghost", "secret-pass").await,
            Err(ApiError::AuthError(_))
        ));
    }

    #[actix_rt::test]
    async fn test_duplicate_username_is_conflict() {
        let pool = test_pool().await;
        let svc = service();
        insert_user(&pool, &svc, &request("dario", Role::Employee)).await.unwrap();
        let again = insert_user(&pool, &svc, &request("dario", Role::Admin)).await;
        assert!(matches!(again, Err(ApiError::Conflict(_))));
    }

    #[actix_rt::test]
    async fn test_deactivated_user_cannot_log_in() {
        let pool = test_pool().await;
        let svc = service();
        let admin = insert_user(&pool, &svc, &request("boss", Role::Admin)).await.unwrap();
        let worker = insert_user(&pool, &svc, &request("elena", Role::Employee)).await.unwrap();
        let actor = Claims::for_user(&admin, 0, 0);

        let toggled = toggle_active(&pool, &actor, &worker.id).await.unwrap();
        assert!(!toggled.is_active);
        assert!(matches!(
            authenticate(&pool, &svc, "elena", "secret-pass").await,
            Err(ApiError::AuthError(_))
        ));

        let toggled = toggle_active(&pool, &actor, &worker.id).await.unwrap();
        assert!(toggled.is_active);
        assert!(authenticate(&pool, &svc, "elena", "secret-pass").await.is_ok());
    }

    #[actix_rt::test]
    async fn test_cannot_deactivate_self() {
        let pool = test_pool().await;
        let svc = service();
        let admin = insert_user(&pool, &svc, &request("root", Role::Admin)).await.unwrap();
        let actor = Claims::for_user(&admin, 0, 0);

        assert!(matches!(
            toggle_active(&pool, &actor, &admin.id).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(User::find_by_id(&pool, &admin.id).await.unwrap().is_active);
    }

    #[actix_rt::test]
    async fn test_update_user_password_and_own_role() {
        let pool = test_pool().await;
        let svc = service();
        let admin = insert_user(&pool, &svc, &request("chief", Role::Admin)).await.unwrap();
        let actor = Claims::for_user(&admin, 0, 0);

        let demote_self = UpdateUserRequest { full_name: None, role: Some(Role::Employee), password: None };
        assert!(apply_user_update(&pool, &svc, &actor, &admin.id, &demote_self).await.is_err());

        let new_password = UpdateUserRequest {
            full_name: Some("Chief Operator".to_string()),
            role: None,
            password: Some("another-pass".to_string()),
        };
        let updated = apply_user_update(&pool, &svc, &actor, &admin.id, &new_password).await.unwrap();
        assert_eq!(updated.full_name, "Chief Operator");
        assert!(authenticate(&pool, &svc, "chief", "another-pass").await.is_ok());
    }
}
