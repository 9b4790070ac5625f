//! Logging Module
//!
//! Installs the global `tracing` subscriber and provides the epoch timer
//! the trainer reports through.

use std::str::FromStr;
use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Environment variable that overrides the configured level (`debug`, `warn`, ...)
pub const LOG_LEVEL_ENV: &str = "VGG_TRANSFER_LOG";

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    /// Print the module path of each event
    pub show_target: bool,
    pub show_thread_ids: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            show_target: false,
            show_thread_ids: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Debug level with targets and thread ids, for `--verbose`
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            show_target: true,
            show_thread_ids: true,
            ..Self::default()
        }
    }

    /// Level taken from `VGG_TRANSFER_LOG` when it parses, else unchanged
    pub fn with_env_override(mut self) -> Self {
        if let Some(level) = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|v| Level::from_str(v.trim()).ok())
        {
            self.level = level;
        }
        self
    }
}

/// Install a global compact fmt subscriber
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_ansi(config.ansi)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Times epochs and logs their metrics with an ETA for the rest of the run
pub struct TrainingLogger {
    total_epochs: usize,
    current: usize,
    started: Instant,
    epoch_started: Instant,
    completed_secs: Vec<f64>,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        let now = Instant::now();
        Self {
            total_epochs,
            current: 0,
            started: now,
            epoch_started: now,
            completed_secs: Vec::with_capacity(total_epochs),
        }
    }

    /// Mark the start of epoch `epoch` (0-indexed)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.current = epoch;
        self.epoch_started = Instant::now();
        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log the finished epoch and return how long it took, in seconds
    pub fn end_epoch(&mut self, loss: f64, accuracy: f64, val_loss: f64, val_accuracy: f64) -> f64 {
        let secs = self.epoch_started.elapsed().as_secs_f64();
        self.completed_secs.push(secs);

        tracing::info!(
            "Epoch {}/{} done in {:.1}s: loss {:.4}, accuracy {:.4}, \
             val_loss {:.4}, val_accuracy {:.4}, ETA {:.0}s",
            self.current + 1,
            self.total_epochs,
            secs,
            loss,
            accuracy,
            val_loss,
            val_accuracy,
            self.eta_secs()
        );
        secs
    }

    /// Remaining time estimated from the mean of completed epochs
    pub fn eta_secs(&self) -> f64 {
        if self.completed_secs.is_empty() {
            return 0.0;
        }
        let mean = self.completed_secs.iter().sum::<f64>() / self.completed_secs.len() as f64;
        let remaining = self.total_epochs.saturating_sub(self.current + 1);
        mean * remaining as f64
    }

    pub fn log_complete(&self, final_val_accuracy: f64) {
        tracing::info!(
            "Training finished: {} epochs in {:.1}s, final val_accuracy {:.4}",
            self.completed_secs.len(),
            self.started.elapsed().as_secs_f64(),
            final_val_accuracy
        );
    }
}
