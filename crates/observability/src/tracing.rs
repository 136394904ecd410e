//! Subscriber construction.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Directive used when `RUST_LOG` is unset or invalid.
    pub default_directive: String,
    /// JSON lines for machines, or the human readable formatter.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            json: true,
        }
    }
}

impl LogConfig {
    /// `IRONGATE_LOG_FORMAT=pretty` switches to the human readable formatter.
    pub fn from_env() -> Self {
        let json = !matches!(
            std::env::var("IRONGATE_LOG_FORMAT").as_deref(),
            Ok("pretty") | Ok("text")
        );
        Self {
            json,
            ..Self::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

/// Installs the global subscriber. Returns `false` if one was already set.
pub fn init(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let config = LogConfig {
            default_directive: "warn".into(),
            json: false,
        };
        init(&config);
        assert!(!init(&config));
    }

    #[test]
    fn defaults_to_json_at_info() {
        let config = LogConfig::default();
        assert!(config.json);
        assert_eq!(config.default_directive, "info");
    }
}
