use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
            sentry_dsn: None,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
    pub ingest: ingest::config::Config,
    #[serde(default)]
    pub tenants: tenants::config::Config,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ingest.validate()?;
        self.tenants.validate()?;
        if let Some(metrics) = &self.metrics
            && metrics.statsd_port == 0
        {
            return Err(ConfigError::InvalidStatsdPort);
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid ingest config: {0}")]
    Ingest(#[from] ingest::config::ValidationError),
    #[error("invalid tenants config: {0}")]
    Tenants(#[from] tenants::config::ConfigError),
    #[error("statsd_port cannot be 0")]
    InvalidStatsdPort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tenants::config::StoreConfig;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            logging:
                level: debug
                sentry_dsn: https://key@sentry.example/1
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            ingest:
                listener:
                    host: 0.0.0.0
                    port: 8080
                admin_listener:
                    host: 127.0.0.1
                    port: 8081
                admin_token: s3cret
                alerts:
                    type: bot
                    token: xoxb-1
                    channel: C01
            tenants:
                cache_ttl_secs: 30
                store:
                    type: http
                    url: http://admin.internal
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        config.validate().expect("valid config");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.sentry_dsn.as_deref(),
            Some("https://key@sentry.example/1")
        );
        assert_eq!(config.metrics.expect("metrics").statsd_port, 8125);
        assert_eq!(config.ingest.listener.port, 8080);
        assert_eq!(config.ingest.admin_token(), Some("s3cret"));
        assert_eq!(config.tenants.cache_ttl_secs, 30);
        assert_eq!(
            config.tenants.store,
            StoreConfig::Http {
                url: "http://admin.internal".into()
            }
        );
    }

    #[test]
    fn minimal_config() {
        let yaml = r#"
            ingest:
                listener: {host: 0.0.0.0, port: 8080}
                admin_listener: {host: 127.0.0.1, port: 8081}
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        config.validate().expect("valid config");

        assert_eq!(config.logging, LoggingConfig::default());
        assert!(config.metrics.is_none());
        assert_eq!(config.tenants, tenants::config::Config::default());
    }

    #[test]
    fn invalid_config() {
        let yaml = r#"
            ingest:
                listener: {host: 0.0.0.0, port: 0}
                admin_listener: {host: 127.0.0.1, port: 8081}
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(config.validate(), Err(ConfigError::Ingest(_))));

        let tmp = write_tmp_file("ingest: [");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));

        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/hookrelay.yaml")),
            Err(ConfigError::LoadError(_))
        ));
    }
}
