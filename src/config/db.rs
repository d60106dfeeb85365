//! Database pool construction and embedded migrations.

use diesel::r2d2::{self, ConnectionManager};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::ServiceError;

pub type Connection = PgConnection;
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Build an r2d2 pool for the given database URL.
pub fn init_pool(database_url: &str) -> Result<Pool, ServiceError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder().build(manager).map_err(|err| {
        ServiceError::internal_server_error(format!("Failed to build database pool: {}", err))
            .with_tag("db")
    })
}

/// Apply pending embedded migrations.
pub fn run_migrations(conn: &mut PgConnection) -> Result<(), ServiceError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|applied| {
            if !applied.is_empty() {
                log::info!("Applied {} database migration(s)", applied.len());
            }
        })
        .map_err(|err| {
            ServiceError::internal_server_error(format!("Failed to run migrations: {}", err))
                .with_tag("db")
        })
}
