//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Output settings for the fmt subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// JSON lines when `true`, human-readable otherwise.
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            json: true,
            default_filter: "info".to_string(),
        }
    }
}

impl LogSettings {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(settings: &LogSettings) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(settings.filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = if settings.json {
        builder.json().try_init()
    } else {
        builder.pretty().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_a_no_op() {
        let settings = LogSettings {
            json: false,
            default_filter: "debug".to_string(),
        };
        init(&settings);
        init(&LogSettings::default());
        tracing::info!("still alive");
    }

    #[test]
    fn bad_default_filter_falls_back() {
        let settings = LogSettings {
            json: true,
            default_filter: "[[not a filter".to_string(),
        };
        let _ = settings.filter();
    }
}
