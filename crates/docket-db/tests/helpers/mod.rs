//! Shared setup for PostgreSQL repository tests.
//!
//! Tests run against the database named by `DOCKET_TEST_DATABASE_URL` and are
//! skipped when it is unset.

use docket_db::run_migrations;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub async fn test_pool() -> Option<PgPool> {
    let url = match std::env::var("DOCKET_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DOCKET_TEST_DATABASE_URL not set, skipping PostgreSQL test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("Failed to connect to test database");

    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}
