// Print shop back office: inventory, print orders, books and expenses
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpServer, Result,
};
use actix_web::http::header;
use actix_web_httpauth::middleware::HttpAuthentication;
use actix_cors::Cors;
use actix_files::{Files, NamedFile};
use anyhow::Context;
use rand::{thread_rng, Rng, distributions::Alphanumeric};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod access;
mod activity_handlers;
mod audit;
mod auth;
mod auth_handlers;
mod barcode;
mod book_handlers;
mod config;
mod db;
mod error;
mod expense_handlers;
mod handlers;
mod material_handlers;
mod models;
mod monitoring;
mod movement_handlers;
mod order_handlers;
mod rules;
mod uploads;

use access::Role;
use auth::{jwt_middleware, AuthService};
use config::{load_config, Config};
use models::CreateUserRequest;
use monitoring::{Metrics, RequestLogger};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    setup_logging(&config)?;

    if config.is_production() {
        validate_production_config(&config)?;
    }

    let pool = create_database_pool(&config.database).await?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let auth_service = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_expiration_hours,
        config.auth.bcrypt_cost,
    ));

    create_default_admin_if_needed(&pool, &auth_service).await?;

    let upload_dir = config.upload_dir();
    std::fs::create_dir_all(upload_dir.join(uploads::COVERS_DIR))
        .with_context(|| format!("Failed to create upload directory {}", upload_dir.display()))?;

    config.print_startup_info();

    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let metrics_arc = Arc::new(Metrics::new());
    let metrics = web::Data::new(metrics_arc.clone());
    let server_config = config.server.clone();

    let server = HttpServer::new(move || {
        let cors = setup_cors(&config.security.allowed_origins, config.is_production());
        let auth_middleware = HttpAuthentication::bearer(jwt_middleware);
        let security_headers = setup_security_headers(&config.security);

        let app = App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics_arc.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(metrics.clone())
            .app_data(web::JsonConfig::default().limit(config.security.max_request_size))

            // Health check and metrics (no auth)
            .service(
                web::scope("/health")
                    .route("", web::get().to(monitoring::health_check))
                    .route("/metrics", web::get().to(monitoring::metrics_endpoint))
            )

            // Uploaded book covers
            .service(Files::new(uploads::PUBLIC_PREFIX, config.upload_dir()))

            // Login is the only unauthenticated API call
            .service(
                web::resource("/api/auth/login")
                    .route(web::post().to(auth_handlers::login))
            )

            .service(
                web::scope("/api")
                    .wrap(auth_middleware)
                    .route("/auth/me", web::get().to(auth_handlers::get_profile))
                    .service(
                        web::scope("/access")
                            .route("/pages", web::get().to(handlers::get_allowed_pages))
                            .route("/pages/{page}", web::get().to(handlers::check_page_access))
                    )
                    .service(
                        web::scope("/materials")
                            .route("", web::get().to(material_handlers::get_materials))
                            .route("", web::post().to(material_handlers::create_material))
                            .route("/low-stock", web::get().to(material_handlers::get_low_stock))
                            .route("/export", web::get().to(material_handlers::export_materials))
                            .route("/barcode/{barcode}", web::get().to(material_handlers::get_material_by_barcode))
                            .route("/{id}", web::get().to(material_handlers::get_material))
                            .route("/{id}", web::put().to(material_handlers::update_material))
                            .route("/{id}", web::delete().to(material_handlers::delete_material))
                            .route("/{id}/movements", web::get().to(material_handlers::get_material_movements))
                    )
                    .service(
                        web::scope("/inventory-movements")
                            .route("", web::get().to(movement_handlers::get_movements))
                            .route("", web::post().to(movement_handlers::create_movement))
                    )
                    .service(
                        web::scope("/orders")
                            .route("", web::get().to(order_handlers::get_orders))
                            .route("", web::post().to(order_handlers::create_order))
                            .route("/{id}", web::get().to(order_handlers::get_order))
                            .route("/{id}", web::put().to(order_handlers::update_order))
                            .route("/{id}", web::delete().to(order_handlers::delete_order))
                            .route("/{id}/status", web::patch().to(order_handlers::update_order_status))
                            .route("/{id}/materials", web::get().to(order_handlers::get_order_materials))
                            .route("/{id}/materials", web::post().to(order_handlers::add_order_material))
                    )
                    .service(
                        web::scope("/books")
                            .route("", web::get().to(book_handlers::get_books))
                            .route("", web::post().to(book_handlers::create_book))
                            .route("/barcode/{barcode}", web::get().to(book_handlers::get_book_by_barcode))
                            .route("/{id}", web::get().to(book_handlers::get_book))
                            .route("/{id}", web::put().to(book_handlers::update_book))
                            .route("/{id}", web::delete().to(book_handlers::delete_book))
                            .route("/{id}/quantities", web::patch().to(book_handlers::update_book_quantities))
                            .route("/{id}/cover", web::post().to(book_handlers::upload_book_cover))
                    )
                    .service(
                        web::scope("/expenses")
                            .route("", web::get().to(expense_handlers::get_expenses))
                            .route("", web::post().to(expense_handlers::create_expense))
                            .route("/summary", web::get().to(expense_handlers::get_expense_summary))
                            .route("/export", web::get().to(expense_handlers::export_expenses))
                    )
                    .service(
                        web::scope("/dashboard")
                            .route("/stats", web::get().to(handlers::get_dashboard_stats))
                    )
                    .service(
                        web::scope("/users")
                            .route("", web::get().to(auth_handlers::get_users))
                            .route("", web::post().to(auth_handlers::create_user))
                            .route("/{id}", web::get().to(auth_handlers::get_user))
                            .route("/{id}", web::put().to(auth_handlers::update_user))
                            .route("/{id}/toggle-active", web::patch().to(auth_handlers::toggle_user_active))
                    )
                    .route("/activity-logs", web::get().to(activity_handlers::get_activity_logs))
            );

        match &config.server.frontend_dir {
            Some(dir) => app
                .service(Files::new("/assets", PathBuf::from(dir).join("assets")))
                .default_service(web::route().to(serve_index)),
            None => app,
        }
    })
    .keep_alive(Duration::from_secs(server_config.keep_alive))
    .client_request_timeout(Duration::from_secs(server_config.client_timeout));

    let server = match server_config.workers {
        Some(workers) => server.workers(workers),
        None => server,
    };

    server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

fn setup_cors(allowed_origins: &[String], is_production: bool) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH, header::CONTENT_DISPOSITION])
        .max_age(3600);

    if allowed_origins.iter().any(|o| o == "*") && !is_production {
        log::warn!("Using wildcard CORS (*) in development mode");
        return cors.allow_any_origin();
    }

    for origin in allowed_origins.iter().filter(|o| !o.is_empty() && o.as_str() != "*") {
        cors = cors.allowed_origin(origin);
    }
    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.security.allowed_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }
    if env::var("JWT_SECRET").is_err() {
        anyhow::bail!("JWT_SECRET must be set in production");
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)
        .with_context(|| format!("Invalid database URL: {}", db_config.url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_config.url))?;

    Ok(pool)
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains"
        ));
    }

    headers
}

async fn create_default_admin_if_needed(
    pool: &SqlitePool,
    auth_service: &AuthService,
) -> anyhow::Result<()> {
    let user_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if user_count.0 > 0 {
        return Ok(());
    }

    let (password, generated) = match env::var("DEFAULT_ADMIN_PASSWORD") {
        Ok(password) => (password, false),
        Err(_) => {
            let password: String = thread_rng()
                .sample_iter(&Alphanumeric)
                .take(16)
                .map(char::from)
                .collect();
            (password, true)
        }
    };

    let request = CreateUserRequest {
        username: "admin".to_string(),
        password: password.clone(),
        full_name: "Administrator".to_string(),
        role: Role::Admin,
    };

    auth_handlers::insert_user(pool, auth_service, &request)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create default admin user: {}", e))?;

    log::warn!("Default admin user created:");
    log::warn!("  Username: admin");
    if generated {
        log::warn!("  Password: {} (generated, change it after first login)", password);
    } else {
        log::warn!("  Password: taken from DEFAULT_ADMIN_PASSWORD");
    }

    Ok(())
}

async fn serve_index(app_state: web::Data<Arc<AppState>>) -> Result<NamedFile> {
    let dir = app_state
        .config
        .server
        .frontend_dir
        .as_deref()
        .unwrap_or(".");
    Ok(NamedFile::open(PathBuf::from(dir).join("index.html"))?)
}
