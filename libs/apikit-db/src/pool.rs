use std::str::FromStr;
use std::time::Duration;

use log::LevelFilter;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::ConnectOptions;

use crate::{DbError, Result};

/// Typed connection options. Every field maps onto a sqlx builder call.
#[derive(Debug, Clone)]
pub struct ConnectOpts {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// `disable`, `allow`, `prefer`, `require`, `verify-ca`, `verify-full`.
    pub ssl_mode: String,
    pub max_conns: u32,
    pub min_conns: u32,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub acquire_timeout: Duration,
    /// Initial ping deadline.
    pub ping_timeout: Duration,
    /// Log every statement at debug level.
    pub log_statements: bool,
    /// Statements slower than this are logged at warn level.
    pub slow_statement_threshold: Option<Duration>,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            ssl_mode: "disable".to_string(),
            max_conns: 25,
            min_conns: 5,
            max_lifetime: Some(Duration::from_secs(60 * 60)),
            idle_timeout: Some(Duration::from_secs(30 * 60)),
            acquire_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            log_statements: false,
            slow_statement_threshold: Some(Duration::from_millis(100)),
        }
    }
}

impl ConnectOpts {
    pub fn to_pg_options(&self) -> Result<PgConnectOptions> {
        if self.host.trim().is_empty() {
            return Err(DbError::InvalidConfig("database host is empty".into()));
        }
        if self.database.trim().is_empty() {
            return Err(DbError::InvalidConfig("database name is empty".into()));
        }
        let ssl_mode = PgSslMode::from_str(&self.ssl_mode)
            .map_err(|_| DbError::InvalidConfig(format!("unknown ssl_mode '{}'", self.ssl_mode)))?;

        let mut opts = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database)
            .ssl_mode(ssl_mode);
        if !self.password.is_empty() {
            opts = opts.password(&self.password);
        }

        let statement_level = if self.log_statements {
            LevelFilter::Debug
        } else {
            LevelFilter::Off
        };
        opts = opts.log_statements(statement_level);
        opts = match self.slow_statement_threshold {
            Some(threshold) => opts.log_slow_statements(LevelFilter::Warn, threshold),
            None => opts.log_slow_statements(LevelFilter::Off, Duration::default()),
        };
        Ok(opts)
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_conns.max(1))
            .min_connections(self.min_conns.min(self.max_conns))
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.idle_timeout)
            .acquire_timeout(self.acquire_timeout)
    }
}

/// Shared PostgreSQL pool. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Build the pool and ping it within `opts.ping_timeout`.
    pub async fn connect(opts: &ConnectOpts) -> Result<Self> {
        let pg = opts.to_pg_options()?;
        let pool = opts.pool_options().connect_lazy_with(pg);
        let db = Self { pool };

        db.ping(opts.ping_timeout).await?;
        tracing::info!(
            host = %opts.host,
            port = opts.port,
            database = %opts.database,
            max_conns = opts.max_conns,
            "connected to database"
        );
        Ok(db)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        let query = sqlx::query("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(timeout, query).await {
            Ok(res) => res.map(|_| ()).map_err(DbError::from),
            Err(_) => Err(DbError::Timeout(timeout)),
        }
    }

    pub async fn close(&self) {
        tracing::info!("closing database connection pool");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ConnectOpts {
        ConnectOpts {
            host: "db.internal".into(),
            user: "app".into(),
            password: "s3cr3t".into(),
            database: "app".into(),
            ..Default::default()
        }
    }

    #[test]
    fn builds_pg_options_from_fields() {
        let pg = opts().to_pg_options().unwrap();
        assert_eq!(pg.get_host(), "db.internal");
        assert_eq!(pg.get_port(), 5432);
        assert_eq!(pg.get_username(), "app");
        assert_eq!(pg.get_database(), Some("app"));
    }

    #[test]
    fn rejects_unknown_ssl_mode() {
        let mut o = opts();
        o.ssl_mode = "sometimes".into();
        let err = o.to_pg_options().unwrap_err();
        assert!(matches!(err, DbError::InvalidConfig(msg) if msg.contains("sometimes")));
    }

    #[test]
    fn rejects_missing_database_name() {
        let mut o = opts();
        o.database = " ".into();
        assert!(matches!(
            o.to_pg_options(),
            Err(DbError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn ping_against_unreachable_host_fails() {
        let o = ConnectOpts {
            host: "127.0.0.1".into(),
            port: 1,
            acquire_timeout: Duration::from_millis(200),
            ping_timeout: Duration::from_millis(500),
            ..opts()
        };
        assert!(Database::connect(&o).await.is_err());
    }
}
