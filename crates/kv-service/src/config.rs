use std::path::PathBuf;

/// Every externally tunable knob this service exposes.
///
/// Construct with [`Config::default`] and override individual fields, or call
/// [`Config::from_env`] to apply the environment-variable overrides documented on each field.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the service listens on. Overridden by `KV_PORT`.
    pub port: u16,
    /// Path of the snapshot file loaded at startup and written at orderly shutdown. Overridden
    /// by `KV_DUMP_FILE`.
    pub dump_file: PathBuf,
    /// Bound on the write serializer's queue. Matches the reference configuration's default.
    pub write_queue_capacity: usize,
    /// Verbosity passed to the `tracing` env-filter. Overridden by `KV_LOG_LEVEL`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port:                 7878,
            dump_file:            PathBuf::from("kv.snapshot"),
            write_queue_capacity: 512,
            log_level:            "info".to_owned(),
        }
    }
}

impl Config {
    /// Start from [`Config::default`] and apply `KV_PORT`/`KV_DUMP_FILE`/`KV_LOG_LEVEL`
    /// environment variable overrides where present and valid. An invalid `KV_PORT` is ignored
    /// (the default is kept) rather than treated as fatal.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("KV_PORT") {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => tracing::warn!(%port, "ignoring invalid KV_PORT"),
            }
        }
        if let Ok(dump_file) = std::env::var("KV_DUMP_FILE") {
            config.dump_file = PathBuf::from(dump_file);
        }
        if let Ok(log_level) = std::env::var("KV_LOG_LEVEL") {
            config.log_level = log_level;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_configuration() {
        let config = Config::default();
        assert_eq!(config.port, 7878);
        assert_eq!(config.write_queue_capacity, 512);
        assert_eq!(config.log_level, "info");
    }
}
