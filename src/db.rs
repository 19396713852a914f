// src/db.rs - Database migrations and setup

use sqlx::SqlitePool;
use anyhow::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE CHECK(length(username) >= 3 AND length(username) <= 50),
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL CHECK(length(full_name) > 0 AND length(full_name) <= 255),
            role TEXT NOT NULL DEFAULT 'employee' CHECK(
                role IN ('admin', 'supervisor', 'employee')
            ),
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            last_login DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS materials (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            material_type TEXT NOT NULL CHECK(length(material_type) > 0 AND length(material_type) <= 100),
            unit TEXT NOT NULL DEFAULT 'pcs' CHECK(length(unit) > 0 AND length(unit) <= 20),
            quantity INTEGER NOT NULL DEFAULT 0 CHECK(quantity >= 0),
            min_quantity INTEGER NOT NULL DEFAULT 0 CHECK(min_quantity >= 0),
            price REAL NOT NULL DEFAULT 0 CHECK(price >= 0),
            barcode TEXT NOT NULL UNIQUE,
            supplier TEXT CHECK(supplier IS NULL OR length(supplier) <= 255),
            notes TEXT CHECK(notes IS NULL OR length(notes) <= 1000),
            lifecycle TEXT NOT NULL DEFAULT 'active' CHECK(lifecycle IN ('active', 'deleted')),
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (created_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS print_orders (
            id TEXT PRIMARY KEY,
            order_number TEXT NOT NULL UNIQUE,
            customer_name TEXT NOT NULL CHECK(length(customer_name) > 0 AND length(customer_name) <= 255),
            customer_phone TEXT CHECK(customer_phone IS NULL OR length(customer_phone) <= 50),
            print_type TEXT NOT NULL,
            copies INTEGER NOT NULL CHECK(copies > 0),
            paper_type TEXT NOT NULL,
            cost REAL NOT NULL DEFAULT 0 CHECK(cost >= 0),
            status TEXT NOT NULL DEFAULT 'pending' CHECK(
                status IN ('pending', 'in_progress', 'completed', 'cancelled')
            ),
            notes TEXT CHECK(notes IS NULL OR length(notes) <= 1000),
            due_date DATETIME,
            lifecycle TEXT NOT NULL DEFAULT 'active' CHECK(lifecycle IN ('active', 'deleted')),
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            completed_at DATETIME,
            FOREIGN KEY (created_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inventory_movements (
            id TEXT PRIMARY KEY,
            material_id TEXT NOT NULL,
            direction TEXT NOT NULL CHECK(direction IN ('in', 'out')),
            quantity INTEGER NOT NULL CHECK(quantity > 0),
            notes TEXT CHECK(notes IS NULL OR length(notes) <= 1000),
            user_id TEXT,
            order_id TEXT,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (material_id) REFERENCES materials (id),
            FOREIGN KEY (user_id) REFERENCES users (id),
            FOREIGN KEY (order_id) REFERENCES print_orders (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS order_materials (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            material_id TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK(quantity > 0),
            movement_id TEXT NOT NULL UNIQUE,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (order_id) REFERENCES print_orders (id),
            FOREIGN KEY (material_id) REFERENCES materials (id),
            FOREIGN KEY (movement_id) REFERENCES inventory_movements (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Quantity invariants are enforced again here so a bad write can never land
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL CHECK(length(title) > 0 AND length(title) <= 255),
            author TEXT NOT NULL CHECK(length(author) > 0 AND length(author) <= 255),
            isbn TEXT NOT NULL UNIQUE,
            barcode TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL,
            total_quantity INTEGER NOT NULL DEFAULT 0 CHECK(total_quantity >= 0),
            ready_quantity INTEGER NOT NULL DEFAULT 0 CHECK(ready_quantity >= 0),
            printing_quantity INTEGER NOT NULL DEFAULT 0 CHECK(printing_quantity >= 0),
            price REAL NOT NULL DEFAULT 0 CHECK(price >= 0),
            status TEXT NOT NULL DEFAULT 'unavailable' CHECK(
                status IN ('ready', 'printing', 'unavailable')
            ),
            description TEXT CHECK(description IS NULL OR length(description) <= 2000),
            cover_image TEXT,
            lifecycle TEXT NOT NULL DEFAULT 'active' CHECK(lifecycle IN ('active', 'deleted')),
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            CHECK(ready_quantity <= total_quantity),
            CHECK(ready_quantity + printing_quantity <= total_quantity),
            FOREIGN KEY (created_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL CHECK(length(description) > 0 AND length(description) <= 500),
            amount REAL NOT NULL CHECK(amount > 0),
            category TEXT NOT NULL CHECK(length(category) > 0 AND length(category) <= 100),
            expense_date DATETIME NOT NULL,
            created_by TEXT,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (created_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activity_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            username TEXT,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            entity_name TEXT,
            details TEXT,
            ip_address TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    create_indexes(pool).await?;

    log::info!("Database migrations completed");
    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_materials_lifecycle ON materials (lifecycle)",
        "CREATE INDEX IF NOT EXISTS idx_materials_type ON materials (material_type)",
        "CREATE INDEX IF NOT EXISTS idx_movements_material ON inventory_movements (material_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_movements_order ON inventory_movements (order_id)",
        "CREATE INDEX IF NOT EXISTS idx_orders_status ON print_orders (status, lifecycle)",
        "CREATE INDEX IF NOT EXISTS idx_order_materials_order ON order_materials (order_id)",
        "CREATE INDEX IF NOT EXISTS idx_books_status ON books (status, lifecycle)",
        "CREATE INDEX IF NOT EXISTS idx_books_category ON books (category)",
        "CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses (expense_date)",
        "CREATE INDEX IF NOT EXISTS idx_expenses_category ON expenses (category)",
        "CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_logs (created_at)",
        "CREATE INDEX IF NOT EXISTS idx_activity_entity ON activity_logs (entity_type, entity_id)",
    ];

    for statement in indexes {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Single-connection in-memory pool with the full schema, for tests.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_migrations_are_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
        )
            .fetch_all(&pool)
            .await
            .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();

        for expected in [
            "activity_logs", "books", "expenses", "inventory_movements",
            "materials", "order_materials", "print_orders", "users",
        ] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[actix_rt::test]
    async fn test_negative_material_quantity_rejected_by_schema() {
        let pool = test_pool().await;
        let result = sqlx::query(
            "INSERT INTO materials (id, name, material_type, quantity, barcode, created_at, updated_at)
             VALUES ('m1', 'Paper A4', 'paper', -1, 'MAT1', ?, ?)"
        )
            .bind(chrono::Utc::now())
            .bind(chrono::Utc::now())
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }
}
