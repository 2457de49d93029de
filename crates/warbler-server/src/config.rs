use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

/// Placeholder secret that must not reach production.
pub const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseLocation,
    pub secret_key: String,
    pub addr: SocketAddr,
    pub static_dir: PathBuf,
    pub reset_db: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    Memory,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = get("DATABASE_URL").unwrap_or_else(|| "warbler.db".into());
        let secret_key = get("WARBLER_SECRET_KEY").unwrap_or_else(|| DEV_SECRET.into());
        let host = get("WARBLER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("WARBLER_PORT")
            .unwrap_or_else(|| "5000".into())
            .parse()
            .context("WARBLER_PORT must be a port number")?;
        let static_dir = get("WARBLER_STATIC_DIR").unwrap_or_else(|| "static".into());
        let reset_db = get("WARBLER_RESET_DB")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", host, port))?;

        Ok(Self {
            database: parse_database_url(&database_url),
            secret_key,
            addr,
            static_dir: static_dir.into(),
            reset_db,
        })
    }
}

/// Accepts a bare path, `sqlite://path`, `sqlite:path` or `:memory:`.
pub fn parse_database_url(url: &str) -> DatabaseLocation {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);

    if path == ":memory:" {
        DatabaseLocation::Memory
    } else {
        DatabaseLocation::File(PathBuf::from(path))
    }
}
