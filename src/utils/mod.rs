//! Utility module: errors, logging, metrics and the scalar writer.

pub mod error;
pub mod logging;
pub mod metrics;
pub mod writer;

pub use error::{Result, SslError};
pub use logging::{init_logging, LogConfig, TrainingLogger};
pub use metrics::{EpochMeans, MetricsRecorder};
pub use writer::ScalarWriter;

/// `42.0s` under a minute, then `3m 5s`, then `2h 10m`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{:.1}s", seconds);
    }
    let total = seconds.round() as u64;
    let (hours, minutes, secs) = (total / 3600, total % 3600 / 60, total % 60);
    if hours == 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3700.0), "1h 1m");
        assert_eq!(format_duration(119.6), "2m 0s");
    }
}
