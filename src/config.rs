use std::{net::SocketAddr, time::Duration};

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub env: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_idle_timeout: Duration,
    pub query_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 =
            std::env::var("PORT").unwrap_or_else(|_| "4000".to_string()).parse().context("PORT")?;

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://moviedb.db?mode=rwc".to_string());

        let db_max_connections: u32 =
            std::env::var("DB_MAX_CONNECTIONS").ok().and_then(|s| s.parse().ok()).unwrap_or(25);

        let db_min_connections: u32 =
            std::env::var("DB_MIN_CONNECTIONS").ok().and_then(|s| s.parse().ok()).unwrap_or(1);

        let db_idle_timeout_secs: u64 =
            std::env::var("DB_IDLE_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(900);

        let query_timeout_secs: u64 =
            std::env::var("QUERY_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(3);

        Ok(Self {
            addr: format!("{host}:{port}").parse().context("HOST/PORT")?,
            env,
            database_url,
            db_max_connections,
            db_min_connections: db_min_connections.min(db_max_connections),
            db_idle_timeout: Duration::from_secs(db_idle_timeout_secs),
            query_timeout: Duration::from_secs(query_timeout_secs.max(1)),
        })
    }
}
