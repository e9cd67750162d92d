//! Logging Module
//!
//! Structured logging through `tracing`. The subscriber honours `RUST_LOG`
//! when it is set and otherwise falls back to the configured level.

use std::time::Instant;

use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Method;
use crate::utils::error::{Result, SslError};
use crate::utils::format_duration;

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    /// Print module paths next to messages
    pub include_target: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// `--verbose`: per-iteration progress
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            ..Self::default()
        }
    }

    /// `--debug-mode`: per-batch loss parts and weights
    pub fn trace() -> Self {
        Self {
            level: Level::TRACE,
            include_target: true,
            ..Self::default()
        }
    }

    /// Filter directive used when `RUST_LOG` is unset. Only this crate goes
    /// below `info`, dependencies stay quiet.
    pub fn directive(&self) -> String {
        if self.level >= Level::INFO {
            format!("warn,match_ssl={}", self.level.as_str().to_lowercase())
        } else {
            self.level.as_str().to_lowercase()
        }
    }
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directive()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target),
        )
        .with(filter)
        .try_init()
        .map_err(|e| SslError::Config(format!("Failed to initialize logging: {e}")))
}

/// One `info!` line per epoch with timing and an ETA
pub struct TrainingLogger {
    method: Method,
    epoch: usize,
    nb_epochs: usize,
    epoch_start: Instant,
    run_start: Instant,
}

impl TrainingLogger {
    pub fn new(method: Method, nb_epochs: usize) -> Self {
        Self {
            method,
            epoch: 0,
            nb_epochs,
            epoch_start: Instant::now(),
            run_start: Instant::now(),
        }
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::debug!("{} epoch {}/{} started", self.method, epoch + 1, self.nb_epochs);
    }

    /// Seconds left, extrapolated from the mean epoch duration so far
    pub fn eta_seconds(&self) -> f64 {
        let done = (self.epoch + 1) as f64;
        let remaining = self.nb_epochs.saturating_sub(self.epoch + 1) as f64;
        self.run_start.elapsed().as_secs_f64() / done * remaining
    }

    pub fn end_epoch(&self, train_loss: f64, val_acc: f64, val_ce: f64, lr: f64) {
        info!(
            "{} {:>3}/{} ({}) | loss {:.4} | val/acc {:.2}% | val/ce {:.4} | lr {:.2e} | ETA {}",
            self.method,
            self.epoch + 1,
            self.nb_epochs,
            format_duration(self.epoch_start.elapsed().as_secs_f64()),
            train_loss,
            val_acc * 100.0,
            val_ce,
            lr,
            format_duration(self.eta_seconds())
        );
    }

    pub fn log_new_best(&self, val_acc: f64) {
        info!("New best val/acc {:.2}% at epoch {}", val_acc * 100.0, self.epoch + 1);
    }

    pub fn log_complete(&self, best_acc: f64) {
        info!(
            "{} finished {} epochs in {} | best val/acc {:.2}%",
            self.method,
            self.nb_epochs,
            format_duration(self.run_start.elapsed().as_secs_f64()),
            best_acc * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_keeps_dependencies_quiet() {
        assert_eq!(LogConfig::default().directive(), "warn,match_ssl=info");
        assert_eq!(LogConfig::trace().directive(), "warn,match_ssl=trace");
        let errors_only = LogConfig {
            level: Level::ERROR,
            ..LogConfig::default()
        };
        assert_eq!(errors_only.directive(), "error");
    }

    #[test]
    fn test_eta_after_last_epoch_is_zero() {
        let mut logger = TrainingLogger::new(Method::FixMatch, 3);
        logger.start_epoch(2);
        assert_eq!(logger.epoch, 2);
        assert_eq!(logger.eta_seconds(), 0.0);
        logger.end_epoch(0.5, 0.8, 0.6, 1e-3);
    }
}
