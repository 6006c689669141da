mod config;
mod db;
mod entities;
mod error;
mod filter;
mod models;
mod routes;
mod store;
mod validator;

use std::sync::Arc;

use crate::{
    config::Config,
    db::PoolOptions,
    store::{MovieStore, SqlMovieStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub movies: Arc<dyn MovieStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,moviedb=debug,sqlx=warn".to_string()),
        )
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = PoolOptions {
        max_connections: config.db_max_connections,
        min_connections: config.db_min_connections,
        idle_timeout: config.db_idle_timeout,
    };
    let db = db::connect(&config.database_url, pool).await?;
    tracing::info!(max_connections = pool.max_connections, "database connection pool established");

    let movies = Arc::new(SqlMovieStore::new(db, config.query_timeout));
    let state = Arc::new(AppState { config: config.clone(), movies });

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, env = %config.env, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
