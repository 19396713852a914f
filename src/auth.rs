use bcrypt::{hash, verify};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use chrono::{Duration, Utc};
use actix_web::web;
use actix_web::HttpMessage;
use validator::Validate;
use actix_web::{HttpRequest, dev::ServiceRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::access::{can_access_page, can_delete, can_manage_employees, Page, Role};
use crate::error::{ApiError, ApiResult};
use crate::models::{User, UserInfo};
use crate::AppState;

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

/// Identity of the caller, decoded from the bearer token and attached to
/// the request by [`jwt_middleware`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn for_user(user: &User, iat: i64, exp: i64) -> Self {
        Self {
            sub: user.id.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            exp,
            iat,
        }
    }
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiration_hours: i64,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_expiration_hours: i64, bcrypt_cost: u32) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_expiration_hours,
            bcrypt_cost,
        }
    }

    pub fn token_lifetime_secs(&self) -> i64 {
        self.token_expiration_hours * 3600
    }

    pub fn hash_password(&self, password: &str) -> ApiResult<String> {
        hash(password, self.bcrypt_cost)
            .map_err(|e| ApiError::InternalServerError(format!("Failed to hash password: {}", e)))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> ApiResult<bool> {
        verify(password, hash)
            .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))
    }

    pub fn generate_token(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.token_expiration_hours);

        let claims = Claims::for_user(user, now.timestamp(), exp.timestamp());

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature =>
                        ApiError::AuthError("Token expired".to_string()),
                    jsonwebtoken::errors::ErrorKind::InvalidToken =>
                        ApiError::AuthError("Invalid token".to_string()),
                    _ =>
                        ApiError::AuthError("Token verification failed".to_string()),
                }
            })
    }
}

// ======== HELPER FUNCTIONS ========

pub fn get_current_user(req: &HttpRequest) -> ApiResult<Claims> {
    req.extensions()
        .get::<Claims>().cloned()
        .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()))
}

pub fn check_permission<F>(claims: &Claims, check: F) -> ApiResult<()>
where
    F: Fn(Role) -> bool,
{
    if check(claims.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

/// Current identity, provided its role may open `page`.
pub fn require_page(req: &HttpRequest, page: Page) -> ApiResult<Claims> {
    let claims = get_current_user(req)?;
    if !can_access_page(claims.role, page) {
        log::warn!("User {} ({}) denied access to {}", claims.username, claims.role, page);
        return Err(ApiError::page_forbidden(page.as_ref()));
    }
    Ok(claims)
}

/// Page access plus the general delete right.
pub fn require_delete(req: &HttpRequest, page: Page) -> ApiResult<Claims> {
    let claims = require_page(req, page)?;
    check_permission(&claims, can_delete)?;
    Ok(claims)
}

pub fn require_employee_management(req: &HttpRequest) -> ApiResult<Claims> {
    let claims = require_page(req, Page::Employees)?;
    check_permission(&claims, can_manage_employees)?;
    Ok(claims)
}

// ======== JWT MIDDLEWARE ========

/// Checks a verified token against the stored account: the user must still
/// exist and be active, and the stored role replaces the one in the token.
pub async fn current_identity(pool: &SqlitePool, mut claims: Claims) -> ApiResult<Claims> {
    let user = match User::find_by_id(pool, &claims.sub).await {
        Ok(user) => user,
        Err(ApiError::NotFound(_)) => return Err(ApiError::AuthError("Account no longer exists".to_string())),
        Err(e) => return Err(e),
    };

    if !user.is_active {
        return Err(ApiError::AuthError("Account is deactivated".to_string()));
    }

    claims.role = user.role;
    claims.full_name = user.full_name;
    Ok(claims)
}

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let token = credentials.token();

    let auth_service = match req.app_data::<web::Data<Arc<AuthService>>>() {
        Some(svc) => svc,
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Auth service not available".to_string()).into(),
                req,
            ));
        }
    };

    let claims = match auth_service.verify_token(token) {
        Ok(claims) => claims,
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            return Err((err.into(), req));
        }
    };

    let pool = match req.app_data::<web::Data<Arc<AppState>>>() {
        Some(state) => state.db_pool.clone(),
        None => {
            log::error!("AppState not found in app data");
            return Err((
                ApiError::InternalServerError("Application state not available".to_string()).into(),
                req,
            ));
        }
    };

    match current_identity(&pool, claims).await {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(req)
        }
        Err(err) => {
            log::warn!("Rejected token: {}", err);
            Err((err.into(), req))
        }
    }
}
