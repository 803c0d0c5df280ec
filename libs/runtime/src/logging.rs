//! Process-wide `tracing` setup: one console layer plus an optional rotating
//! JSON file, both filtered by the configured level and per-target overrides.

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

const MB: u64 = 1024 * 1024;

/// Unknown names fall back to `info`; `off` and `none` silence output.
fn level_filter(name: &str) -> LevelFilter {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" | "none" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// `EnvFilter` directives: the base level, then `target=level` pairs in name order.
fn directives(cfg: &LoggingConfig) -> String {
    let mut overrides: Vec<(&String, &String)> = cfg.targets.iter().collect();
    overrides.sort();

    let mut out = level_filter(&cfg.level).to_string().to_ascii_lowercase();
    for (target, level) in overrides {
        out.push(',');
        out.push_str(target);
        out.push('=');
        out.push_str(&level_filter(level).to_string().to_ascii_lowercase());
    }
    out
}

fn env_filter(cfg: &LoggingConfig) -> EnvFilter {
    // RUST_LOG, when present and valid, replaces the configured directives
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(cfg)))
}

/// Size-rotated log file shared by every writer handle.
#[derive(Clone)]
struct SharedFile(Arc<Mutex<FileRotate<AppendCount>>>);

impl SharedFile {
    fn open(path: &Path, max_bytes: usize, keep: usize) -> std::io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = FileRotate::new(
            path,
            AppendCount::new(keep),
            ContentLimit::BytesSurpassed(max_bytes),
            Compression::None,
            #[cfg(unix)]
            None,
        );
        Ok(Self(Arc::new(Mutex::new(file))))
    }
}

impl Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for SharedFile {
    type Writer = SharedFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn log_file_path(file: &str, base_dir: &Path) -> PathBuf {
    let path = PathBuf::from(file);
    if path.is_relative() {
        base_dir.join(path)
    } else {
        path
    }
}

/// `Ok(None)` when no file is configured.
fn open_log_file(cfg: &LoggingConfig, base_dir: &Path) -> std::io::Result<Option<(PathBuf, SharedFile)>> {
    let file = cfg.file.trim();
    if file.is_empty() {
        return Ok(None);
    }
    let path = log_file_path(file, base_dir);
    let max_bytes = cfg.max_size_mb.unwrap_or(100).saturating_mul(MB) as usize;
    let shared = SharedFile::open(&path, max_bytes, cfg.max_backups.unwrap_or(3))?;
    Ok(Some((path, shared)))
}

fn console_layer(cfg: &LoggingConfig) -> BoxedLayer {
    let base = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    if cfg.format.eq_ignore_ascii_case("console") {
        base.with_ansi(std::io::stdout().is_terminal())
            .with_filter(env_filter(cfg))
            .boxed()
    } else {
        base.json()
            .with_current_span(true)
            .with_span_list(false)
            .with_filter(env_filter(cfg))
            .boxed()
    }
}

fn file_layer(cfg: &LoggingConfig, file: SharedFile) -> BoxedLayer {
    fmt::layer()
        .json()
        .with_ansi(false)
        .with_current_span(true)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file)
        .with_filter(env_filter(cfg))
        .boxed()
}

/// Install the global subscriber. Relative log file paths resolve against
/// `base_dir`. Later calls are no-ops.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    // sqlx reports statements through `log`
    let _ = tracing_log::LogTracer::init();

    let mut layers = vec![console_layer(cfg)];
    let mut file_error = None;
    match open_log_file(cfg, base_dir) {
        Ok(Some((_, file))) => layers.push(file_layer(cfg, file)),
        Ok(None) => {}
        Err(e) => file_error = Some(e),
    }

    if Registry::default().with(layers).try_init().is_ok() {
        if let Some(e) = file_error {
            tracing::error!(file = %cfg.file, error = %e, "log file unavailable, logging to console only");
        }
    }
}
