use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Application configuration with strongly-typed sections.
///
/// Loaded in layers: defaults -> YAML file -> `APP__`-prefixed environment
/// variables (`APP__DATABASE__HOST=db` maps to `database.host`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub primary: PrimaryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration (optional; the service runs without a pool when absent).
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Secondary cache used for connectivity checks (optional).
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrimaryConfig {
    /// `local`, `development`, `staging`, `production`.
    pub env: String,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            env: "local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    pub body_limit_bytes: usize,
    /// Directory served at `/static`.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

fn default_static_dir() -> String {
    "static".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            cors_allowed_origins: Vec::new(),
            body_limit_bytes: 16 * 1024 * 1024,
            static_dir: default_static_dir(),
        }
    }
}

/// What to do when a dependency cannot be reached at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupPolicy {
    /// Abort startup.
    Required,
    /// Log a warning and keep going; health checks report the dependency as down.
    Optional,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub user: String,
    /// Literal password; prefer `APP__DATABASE__PASSWORD` over putting it in YAML.
    #[serde(default)]
    pub password: String,
    pub name: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,
    #[serde(with = "humantime_serde", default = "default_conn_lifetime")]
    pub conn_max_lifetime: Duration,
    #[serde(with = "humantime_serde", default = "default_conn_lifetime")]
    pub conn_max_idle_time: Duration,
    #[serde(default = "required_policy")]
    pub startup: StartupPolicy,
}

fn default_pg_port() -> u16 {
    5432
}
fn default_ssl_mode() -> String {
    "disable".to_string()
}
fn default_max_open_conns() -> u32 {
    25
}
fn default_max_idle_conns() -> u32 {
    25
}
fn default_conn_lifetime() -> Duration {
    Duration::from_secs(300)
}
fn required_policy() -> StartupPolicy {
    StartupPolicy::Required
}
fn optional_policy() -> StartupPolicy {
    StartupPolicy::Optional
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Redis URL, e.g. `redis://localhost:6379`.
    pub address: String,
    #[serde(default = "optional_policy")]
    pub startup: StartupPolicy,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// HMAC secret used to verify bearer tokens.
    #[serde(default)]
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 20,
            burst: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    /// Maximum tasks processed at once.
    pub concurrency: usize,
    /// Queue name -> priority weight.
    pub queues: BTreeMap<String, u32>,
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queues: BTreeMap::from([
                ("critical".to_string(), 6),
                ("default".to_string(), 3),
                ("low".to_string(), 1),
            ]),
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub from_address: String,
    pub templates_dir: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.resend.com".to_string(),
            from_address: "Boilerplate <onboarding@resend.dev>".to_string(),
            templates_dir: "templates/emails".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    pub service_name: String,
    /// Defaults to `primary.env` when left empty.
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_true")]
    pub tracing_enabled: bool,
    #[serde(default)]
    pub health_checks: HealthChecksConfig,
}

fn default_true() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "boilerplate".to_string(),
            environment: String::new(),
            logging: LoggingConfig::default(),
            tracing_enabled: true,
            health_checks: HealthChecksConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn`, `error` or `off`.
    pub level: String,
    /// `json` or `console`.
    pub format: String,
    /// Optional JSON log file, relative paths resolve against the working dir.
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    /// Per-target level overrides, e.g. `sqlx: warn`.
    #[serde(default)]
    pub targets: HashMap<String, String>,
    #[serde(with = "humantime_serde")]
    pub slow_query_threshold: Duration,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            file: String::new(),
            max_size_mb: Some(100),
            max_backups: Some(3),
            targets: HashMap::new(),
            slow_query_threshold: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthChecksConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub checks: Vec<String>,
}

impl Default for HealthChecksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            checks: vec!["database".to_string(), "cache".to_string()],
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            primary: PrimaryConfig::default(),
            server: ServerConfig::default(),
            database: None,
            cache: None,
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            jobs: JobsConfig::default(),
            email: EmailConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

const LOG_LEVELS: [&str; 7] = ["trace", "debug", "info", "warn", "error", "off", "none"];
const LOG_FORMATS: [&str; 2] = ["json", "console"];

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::providers::{Format, Yaml};

        let path = config_path.as_ref();
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        Self::extract(Self::figment().merge(Yaml::file(path)))
    }

    /// Load from a file when given, otherwise from defaults + environment.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => Self::extract(Self::figment()),
        }
    }

    fn figment() -> figment::Figment {
        use figment::providers::Serialized;
        figment::Figment::new().merge(Serialized::defaults(AppConfig::default()))
    }

    fn extract(figment: figment::Figment) -> Result<Self> {
        use figment::providers::Env;

        // Example: APP__SERVER__PORT=8087 maps to server.port
        let mut config: AppConfig = figment
            .merge(Env::prefixed("APP__").split("__"))
            .extract()
            .context("Failed to extract config from figment")?;

        if config.observability.environment.trim().is_empty() {
            config.observability.environment = config.primary.env.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be greater than zero");
        }
        if self.observability.service_name.trim().is_empty() {
            bail!("observability.service_name is required");
        }
        let logging = &self.observability.logging;
        if !LOG_LEVELS.contains(&logging.level.to_ascii_lowercase().as_str()) {
            bail!(
                "invalid log level '{}': expected one of {}",
                logging.level,
                LOG_LEVELS.join(", ")
            );
        }
        if !LOG_FORMATS.contains(&logging.format.to_ascii_lowercase().as_str()) {
            bail!(
                "invalid log format '{}': expected json or console",
                logging.format
            );
        }
        if self.jobs.concurrency == 0 {
            bail!("jobs.concurrency must be greater than zero");
        }
        if self.jobs.queues.values().all(|w| *w == 0) {
            bail!("jobs.queues needs at least one queue with a non-zero weight");
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_second == 0 {
            bail!("rate_limit.requests_per_second must be greater than zero");
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.primary.env.eq_ignore_ascii_case("production")
    }

    pub fn is_local(&self) -> bool {
        self.primary.env.eq_ignore_ascii_case("local")
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        let logging = &mut self.observability.logging;
        logging.level = match args.verbose {
            0 => logging.level.clone(), // keep
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
    }
}

/// Command line arguments structure.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}
