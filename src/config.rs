// src/config.rs - Configuration from TOML, .env and environment
use serde::Deserialize;
use std::env;
use anyhow::{Context, Result};
use rand::{thread_rng, Rng, distributions::Alphanumeric};
use std::path::{Path, PathBuf};
use std::fs;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub uploads: UploadConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub client_timeout: u64,
    /// Built single-page frontend served at `/`, if any.
    pub frontend_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub dir: String,
    pub max_cover_bytes: usize,
}

// Defaults never read the environment; overrides happen in load_config
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_secret_for_tests_only_32_chars!".to_string(),
            token_expiration_hours: 24,
            bcrypt_cost: 10,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
            client_timeout: 30,
            frontend_dir: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:printshop.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: "uploads".to_string(),
            max_cover_bytes: 5 * 1024 * 1024,
        }
    }
}

pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = match env::var("CONFIG_FILE") {
        Ok(config_file) => load_config_file(Path::new(&config_file))?,
        Err(_) => Config::default(),
    };

    apply_overrides(&mut config, |key| env::var(key).ok());

    if env::var("JWT_SECRET").is_err() && config.auth.jwt_secret == AuthConfig::default().jwt_secret {
        log::warn!("JWT_SECRET not set; using a random secret, tokens will not survive a restart");
        config.auth.jwt_secret = generate_jwt_secret();
    }

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Applies environment overrides. `lookup` is `std::env::var` in production.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Some(port) = lookup("PRINTSHOP_PORT").and_then(|s| s.parse::<u16>().ok()) {
        config.server.port = port;
    }
    if let Some(workers) = lookup("PRINTSHOP_WORKERS").and_then(|s| s.parse::<usize>().ok()) {
        config.server.workers = Some(workers);
    }
    if let Some(dir) = lookup("FRONTEND_DIR") {
        config.server.frontend_dir = Some(dir);
    }
    if let Some(jwt_secret) = lookup("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Some(hours) = lookup("AUTH_TOKEN_EXPIRATION_HOURS").and_then(|s| s.parse::<i64>().ok()) {
        config.auth.token_expiration_hours = hours;
    }
    if let Some(cost) = lookup("AUTH_BCRYPT_COST").and_then(|s| s.parse::<u32>().ok()) {
        config.auth.bcrypt_cost = cost;
    }
    if let Some(url) = lookup("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(max_conn) = lookup("DATABASE_MAX_CONNECTIONS").and_then(|s| s.parse::<u32>().ok()) {
        config.database.max_connections = max_conn;
    }
    if let Some(origins) = lookup("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(dir) = lookup("UPLOAD_DIR") {
        config.uploads.dir = dir;
    }
    if let Some(level) = lookup("RUST_LOG") {
        config.logging.level = level;
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if self.auth.token_expiration_hours <= 0 {
            return Err(anyhow::anyhow!("token_expiration_hours must be positive"));
        }

        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(anyhow::anyhow!("bcrypt_cost must be between 4 and 31"));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        if self.uploads.max_cover_bytes == 0 {
            return Err(anyhow::anyhow!("uploads.max_cover_bytes must be greater than zero"));
        }

        Ok(())
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.uploads.dir)
    }

    pub fn is_production(&self) -> bool {
        env::var("PRINTSHOP_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("Print shop service starting up");
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!("Database: {}", self.database.url);
        log::info!("Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!("Uploads: {} (covers up to {} bytes)", self.uploads.dir, self.uploads.max_cover_bytes);

        if !self.is_production() {
            log::warn!("Running in development mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}
