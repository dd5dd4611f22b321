use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_LEVEL: &str = "info";

fn filter_for(default_level: &str) -> EnvFilter {
    let level = match default_level.trim().to_ascii_lowercase().as_str() {
        level @ ("trace" | "debug" | "info" | "warn" | "error") => level.to_string(),
        _ => DEFAULT_LOG_LEVEL.to_string(),
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_level`.
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(default_level))
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialisation_is_tolerated() {
        let _ = init_tracing("debug");

        assert!(!init_tracing("info"));
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }

        assert_eq!(filter_for("loud").to_string(), "info");
        assert_eq!(filter_for(" WARN ").to_string(), "warn");
    }
}
