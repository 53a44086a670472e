use std::time::Duration;
use thiserror::Error;

/// Content type of every derivative produced by the cache.
pub const OUTPUT_CONTENT_TYPE: &str = "image/webp";
pub const OUTPUT_EXTENSION: &str = "webp";
/// Lossy WebP quality, process-wide.
pub const OUTPUT_QUALITY: f32 = 80.0;
/// libwebp `method` (0 = fastest, 6 = slowest/smallest).
pub const OUTPUT_EFFORT: i32 = 6;

pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=86400";
pub const NO_CACHE_CONTROL: &str = "no-store";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the storage service. `None` keeps originals in memory.
    pub origin_url: Option<String>,
    pub max_input_size: usize, // bytes
    pub upstream_timeout: Duration,
    pub environment: Environment,
    pub port: u16,
    pub rate_limit: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            origin_url: None,
            max_input_size: 8 * 1024 * 1024,
            upstream_timeout: Duration::from_secs(10),
            environment: Environment::Development,
            port: 8080,
            rate_limit: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Max input size must be > 0")] InvalidMaxInput,
    #[error("Upstream timeout must be > 0")] InvalidTimeout,
    #[error("Invalid origin URL: {0}")] InvalidOriginUrl(String),
    #[error("ORIGIN_URL is required in production")] MissingOrigin,
    #[error("Invalid value for {name}: {value}")] InvalidValue { name: &'static str, value: String },
}

impl ServiceConfig {
    /// Reads configuration from the process environment, falling back to
    /// [`ServiceConfig::default`] for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_input_size = match lookup("MAX_INPUT_SIZE") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue { name: "MAX_INPUT_SIZE", value: v })?,
            None => defaults.max_input_size,
        };
        let upstream_timeout = match lookup("UPSTREAM_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(
                v.parse::<u64>()
                    .map_err(|_| ConfigError::InvalidValue { name: "UPSTREAM_TIMEOUT_SECS", value: v })?,
            ),
            None => defaults.upstream_timeout,
        };
        let port = match lookup("PORT") {
            Some(v) => v
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue { name: "PORT", value: v })?,
            None => defaults.port,
        };

        Ok(Self {
            origin_url: lookup("ORIGIN_URL").filter(|v| !v.trim().is_empty()),
            max_input_size,
            upstream_timeout,
            environment: lookup("APP_ENV")
                .map(|v| Environment::from_name(&v))
                .unwrap_or(defaults.environment),
            port,
            rate_limit: lookup("DISABLE_RATE_LIMIT").is_none(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_input_size == 0 { return Err(ConfigError::InvalidMaxInput); }
        if self.upstream_timeout.is_zero() { return Err(ConfigError::InvalidTimeout); }
        match &self.origin_url {
            Some(url) => {
                reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidOriginUrl(e.to_string()))?;
            }
            None if self.environment.is_production() => return Err(ConfigError::MissingOrigin),
            None => {}
        }
        Ok(())
    }

    /// Whether 5xx responses may carry internal error details.
    pub fn expose_error_details(&self) -> bool {
        !self.environment.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let cfg = ServiceConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_input_size, 8 * 1024 * 1024);
        assert!(cfg.origin_url.is_none());
        assert!(cfg.rate_limit);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn reads_overrides() {
        let cfg = ServiceConfig::from_lookup(lookup_from(&[
            ("ORIGIN_URL", "http://storage.internal:9000"),
            ("MAX_INPUT_SIZE", "1024"),
            ("APP_ENV", "production"),
            ("PORT", "3000"),
            ("DISABLE_RATE_LIMIT", "1"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_input_size, 1024);
        assert!(cfg.environment.is_production());
        assert!(!cfg.rate_limit);
        assert!(!cfg.expose_error_details());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "PORT", .. }));
    }

    #[test]
    fn production_requires_origin() {
        let cfg = ServiceConfig { environment: Environment::Production, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingOrigin)));
    }

    #[test]
    fn rejects_unparseable_origin() {
        let cfg = ServiceConfig { origin_url: Some("not a url".into()), ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidOriginUrl(_))));
    }

    #[test]
    fn rejects_zero_sizes() {
        let cfg = ServiceConfig { max_input_size: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidMaxInput)));
        let cfg = ServiceConfig { upstream_timeout: Duration::ZERO, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTimeout)));
    }
}
