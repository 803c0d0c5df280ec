//! Database collaborator for the API service.
//!
//! Two concerns live here:
//! - [`Database`]: a PostgreSQL pool built from typed [`ConnectOpts`]
//!   (no DSN string building), with ping/close helpers used at startup,
//!   by health checks and on shutdown.
//! - [`sqlerr`]: the classifier turning raw driver errors into
//!   client-facing [`apikit_errors::AppError`]s.
//!
//! # Example
//! ```rust,no_run
//! # async fn demo() -> apikit_db::Result<()> {
//! use apikit_db::{ConnectOpts, Database};
//!
//! let opts = ConnectOpts {
//!     host: "localhost".into(),
//!     user: "app".into(),
//!     database: "app".into(),
//!     ..Default::default()
//! };
//! let db = Database::connect(&opts).await?;
//! db.close().await;
//! # Ok(())
//! # }
//! ```

pub mod no_rows;
pub mod pool;
pub mod sqlerr;

pub use no_rows::NoRows;
pub use pool::{ConnectOpts, Database};

use std::time::Duration;
use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid database configuration: {0}")]
    InvalidConfig(String),

    #[error("database did not answer within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
