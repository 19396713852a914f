// src/models/activity.rs
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActivityAction {
    Create,
    Update,
    Delete,
    Login,
    StatusChange,
    Movement,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
    Material,
    Movement,
    Order,
    Book,
    Expense,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityLog {
    pub id: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub action: ActivityAction,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ActivityQuery {
    pub entity_type: Option<String>,
    pub user_id: Option<String>,
    pub action: Option<ActivityAction>,
    pub limit: Option<i64>,
}
