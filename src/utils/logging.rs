//! Logging Module
//!
//! Provides structured logging utilities using the `tracing` crate, plus the
//! sinks that step and epoch metrics are emitted into.

use std::time::Instant;

use tracing::{level_filters::LevelFilter, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::utils::metrics::BinaryScores;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            timestamps: true,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            timestamps: true,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Create a quiet logging config (errors only)
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            timestamps: false,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Create a production logging config
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            timestamps: true,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: false,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Filter from `RUST_LOG`-style directives, or the configured level when
/// there are none or they do not parse
fn build_filter(level: LogLevel, directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| {
            EnvFilter::default()
                .add_directive(LevelFilter::from_level(level.to_tracing_level()).into())
        })
}

/// Initialize logging with the given configuration
///
/// `RUST_LOG` overrides the configured level when set.
///
/// # Returns
/// * `Result<(), String>` - Ok if logging was initialized, Err with message otherwise
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = FmtSubscriber::builder()
        .with_env_filter(build_filter(config.level, directives.as_deref()))
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact();

    let result = if config.timestamps {
        tracing::subscriber::set_global_default(builder.finish())
    } else {
        tracing::subscriber::set_global_default(builder.without_time().finish())
    };

    result.map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Destination for named scalar values emitted by training and validation steps
pub trait MetricSink {
    fn log(&mut self, name: &str, value: f64);
}

/// Emits every value as a `tracing` debug event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricSink for TracingSink {
    fn log(&mut self, name: &str, value: f64) {
        tracing::debug!(metric = name, value, "step metric");
    }
}

/// Keeps every emitted value in order
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub entries: Vec<(String, f64)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent value logged under `name`
    pub fn last(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Every value logged under `name`, oldest first
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl MetricSink for MemorySink {
    fn log(&mut self, name: &str, value: f64) {
        self.entries.push((name.to_string(), value));
    }
}

/// Epoch progress logger
pub struct EpochLogger {
    /// Current epoch
    epoch: usize,
    /// Total epochs
    total_epochs: usize,
    /// Epoch start time
    epoch_start: Instant,
    /// Training start time
    training_start: Instant,
}

impl EpochLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::info!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with validation metrics
    pub fn end_epoch(&self, train_loss: f64, val: &BinaryScores, learning_rate: f64) {
        let epoch_time = self.epoch_start.elapsed();
        let total_time = self.training_start.elapsed();

        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time.as_secs_f64() / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        tracing::info!(
            "Epoch {}/{} completed in {:.1}s | Loss: {:.4} | Val Acc: {:.2}% | \
             Val F1: {:.4} | Val IoU: {:.4} | LR: {:.2e} | ETA: {:.0}s",
            self.epoch + 1,
            self.total_epochs,
            epoch_time.as_secs_f64(),
            train_loss,
            val.accuracy * 100.0,
            val.f1,
            val.iou,
            learning_rate,
            eta_secs
        );
    }

    /// Log training completion
    pub fn log_complete(&self, best_f1: f64) {
        let total_time = self.training_start.elapsed();

        tracing::info!(
            "Training complete! {} epochs in {:.1}s | Best val F1: {:.4}",
            self.total_epochs,
            total_time.as_secs_f64(),
            best_f1
        );
    }
}
