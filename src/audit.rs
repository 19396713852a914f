// src/audit.rs - Activity log writer

use sqlx::SqlitePool;
use uuid::Uuid;
use chrono::Utc;
use actix_web::HttpRequest;

use crate::auth::Claims;
use crate::models::{ActivityAction, EntityType};

/// One row for `activity_logs`.
pub struct ActivityEntry<'a> {
    pub action: ActivityAction,
    pub entity_type: EntityType,
    pub entity_id: Option<&'a str>,
    pub entity_name: Option<&'a str>,
    pub details: Option<String>,
}

impl<'a> ActivityEntry<'a> {
    pub fn new(action: ActivityAction, entity_type: EntityType) -> Self {
        Self {
            action,
            entity_type,
            entity_id: None,
            entity_name: None,
            details: None,
        }
    }

    pub fn entity(mut self, id: &'a str, name: &'a str) -> Self {
        self.entity_id = Some(id);
        self.entity_name = Some(name);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub async fn log_activity(
    pool: &SqlitePool,
    user: Option<&Claims>,
    entry: &ActivityEntry<'_>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4().to_string();

    let ip_address = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO activity_logs
           (id, user_id, username, action, entity_type, entity_id, entity_name, details, ip_address, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(user.map(|u| u.sub.as_str()))
    .bind(user.map(|u| u.username.as_str()))
    .bind(entry.action)
    .bind(entry.entity_type.as_ref())
    .bind(entry.entity_id)
    .bind(entry.entity_name)
    .bind(entry.details.as_deref())
    .bind(&ip_address)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Fire-and-forget variant for handlers: the request already succeeded, so
/// a failed log write is reported but not returned.
pub async fn audit(
    pool: &SqlitePool,
    user: &Claims,
    entry: ActivityEntry<'_>,
    request: &HttpRequest,
) {
    if let Err(e) = log_activity(pool, Some(user), &entry, Some(request)).await {
        log::error!("Failed to write activity log: {}", e);
    }
}
