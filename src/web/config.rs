// Server configuration, read once from the environment at startup

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MODEL_DIR: &str = "models";
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port the server binds on 0.0.0.0.
    pub port: u16,
    /// Directory holding the ONNX encoder/decoder and tokenizer files.
    pub model_dir: PathBuf,
    /// Maximum number of queued inference requests before admission fails.
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = ServerConfig::default();
        ServerConfig {
            port: parse_env("IMAGE_DESCRIBE_PORT", defaults.port),
            model_dir: std::env::var("IMAGE_DESCRIBE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            queue_depth: parse_env("IMAGE_DESCRIBE_QUEUE_DEPTH", defaults.queue_depth),
        }
    }
}

/// Parse an env var, falling back to the default on absence or bad input.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.queue_depth, 32);
        assert_eq!(config.model_dir, PathBuf::from("models"));
    }

    #[test]
    fn test_parse_env_falls_back() {
        // Key that should never exist in the test environment
        assert_eq!(parse_env("IMAGE_DESCRIBE_NO_SUCH_KEY", 17usize), 17);
    }
}
