use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Schema, Statement,
};

use crate::entities::movie;

#[derive(Clone, Copy, Debug)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout: Duration,
}

pub async fn connect(database_url: &str, pool: PoolOptions) -> anyhow::Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url);
    options
        .max_connections(pool.max_connections)
        .min_connections(pool.min_connections)
        .idle_timeout(pool.idle_timeout)
        .sqlx_logging(false);

    let db = Database::connect(options).await?;

    if db.get_database_backend() == DbBackend::Sqlite {
        db.execute(Statement::from_string(DbBackend::Sqlite, "PRAGMA journal_mode=WAL".to_string()))
            .await?;
        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "PRAGMA synchronous=NORMAL".to_string(),
        ))
        .await?;
    }

    ensure_schema(&db).await?;
    Ok(db)
}

/// Creates the `movies` table from the entity definition unless it already exists.
async fn ensure_schema(db: &DatabaseConnection) -> anyhow::Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let mut create = schema.create_table_from_entity(movie::Entity);
    create.if_not_exists();
    db.execute(backend.build(&create)).await?;
    Ok(())
}
