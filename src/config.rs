//! Startup configuration.
//!
//! Settings come from a TOML file (`AUTHD_CONFIG`, falling back to
//! `authd.toml` in the working directory) with `AUTHD_*` environment
//! overrides on top. The database URL is required; a missing or
//! malformed value for any connection-critical setting aborts startup
//! with a diagnostic instead of starting half-configured.
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `AUTHD_CONFIG` | `authd.toml` | Config file path |
//! | `AUTHD_DB_URL` | *(required)* | PostgreSQL connection URL |
//! | `AUTHD_DB_USER` | — | User override on the URL |
//! | `AUTHD_DB_PASSWORD` | — | Password override on the URL |
//! | `AUTHD_PORT` | 8080 | Listening port |
//! | `AUTHD_POOL_SIZE` | 10 | Database connections to preload |
//! | `AUTHD_MAX_FRAME_SIZE` | 65536 | Max wire frame (bytes) |
//! | `AUTHD_SHUTDOWN_TIMEOUT` | 30 | Worker drain timeout (secs) |
//! | `AUTHD_LOG_LEVEL` | `info` | Tracing filter directive |
//! | `AUTHD_LOG_FORMAT` | `pretty` | `pretty` or `json` |

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::logging::{LogConfig, LogFormat};
use crate::protocol::MAX_MESSAGE_SIZE;

const MIN_FRAME_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Backing-store connection parameters.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DbConfig {
    /// Driver configuration with user/password overrides applied.
    pub fn pg_config(&self) -> Result<tokio_postgres::Config, tokio_postgres::Error> {
        let mut config: tokio_postgres::Config = self.url.parse()?;
        if let Some(user) = &self.user {
            config.user(user);
        }
        if let Some(password) = &self.password {
            config.password(password);
        }
        Ok(config)
    }
}

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub pool_size: usize,
    pub max_frame_size: usize,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
    pub db: DbConfig,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    db: FileDb,
    #[serde(default)]
    log: FileLog,
}

#[derive(Debug, Default, Deserialize)]
struct FileServer {
    port: Option<u16>,
    pool_size: Option<usize>,
    max_frame_size: Option<usize>,
    shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDb {
    url: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLog {
    level: Option<String>,
    format: Option<String>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

impl ServerConfig {
    /// Load from file and process environment. Called once at startup.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("AUTHD_CONFIG").ok() {
            Some(path) => FileConfig::read(Path::new(&path))?,
            None => {
                let default = Path::new("authd.toml");
                if default.exists() {
                    FileConfig::read(default)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let port = match env("AUTHD_PORT") {
            Some(raw) => parse_key("AUTHD_PORT", &raw)?,
            None => file.server.port.unwrap_or(8080),
        };
        if port == 0 {
            return Err(ConfigError::Invalid {
                key: "AUTHD_PORT",
                reason: "port must be non-zero".into(),
            });
        }

        let pool_size = match env("AUTHD_POOL_SIZE") {
            Some(raw) => parse_key("AUTHD_POOL_SIZE", &raw)?,
            None => file.server.pool_size.unwrap_or(10),
        };
        if pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "AUTHD_POOL_SIZE",
                reason: "pool size must be at least 1".into(),
            });
        }

        let max_frame_size: usize = match env("AUTHD_MAX_FRAME_SIZE") {
            Some(raw) => parse_key("AUTHD_MAX_FRAME_SIZE", &raw)?,
            None => file.server.max_frame_size.unwrap_or(MAX_MESSAGE_SIZE),
        };
        let max_frame_size = max_frame_size.max(MIN_FRAME_SIZE);

        let shutdown_secs: u64 = match env("AUTHD_SHUTDOWN_TIMEOUT") {
            Some(raw) => parse_key("AUTHD_SHUTDOWN_TIMEOUT", &raw)?,
            None => file.server.shutdown_timeout_secs.unwrap_or(30),
        };

        let url = env("AUTHD_DB_URL")
            .or(file.db.url)
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("AUTHD_DB_URL"))?;
        let db = DbConfig {
            url,
            user: env("AUTHD_DB_USER").or(file.db.user),
            password: env("AUTHD_DB_PASSWORD").or(file.db.password),
        };
        db.pg_config().map_err(|e| ConfigError::Invalid {
            key: "AUTHD_DB_URL",
            reason: e.to_string(),
        })?;

        let level = env("AUTHD_LOG_LEVEL")
            .or(file.log.level)
            .unwrap_or_else(|| "info".to_string());
        let format = match env("AUTHD_LOG_FORMAT").or(file.log.format).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "AUTHD_LOG_FORMAT",
                    reason: format!("unknown format {other:?}, expected pretty or json"),
                })
            }
        };

        Ok(Self {
            port,
            pool_size,
            max_frame_size,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            log: LogConfig { format, level },
            db,
        })
    }
}

fn parse_key<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn db_url_is_required() {
        let result = ServerConfig::resolve(FileConfig::default(), no_env);
        assert!(matches!(result, Err(ConfigError::Missing("AUTHD_DB_URL"))));
    }

    #[test]
    fn defaults_apply_when_url_is_given() {
        let env = env_from(&[("AUTHD_DB_URL", "postgres://authd@localhost/auth")]);
        let config = ServerConfig::resolve(FileConfig::default(), env).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.max_frame_size, MAX_MESSAGE_SIZE);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn malformed_port_prevents_startup() {
        let env = env_from(&[
            ("AUTHD_DB_URL", "postgres://authd@localhost/auth"),
            ("AUTHD_PORT", "not-a-port"),
        ]);
        let result = ServerConfig::resolve(FileConfig::default(), env);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "AUTHD_PORT", .. })
        ));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let env = env_from(&[
            ("AUTHD_DB_URL", "postgres://authd@localhost/auth"),
            ("AUTHD_POOL_SIZE", "0"),
        ]);
        let result = ServerConfig::resolve(FileConfig::default(), env);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "AUTHD_POOL_SIZE", .. })
        ));
    }

    #[test]
    fn malformed_db_url_is_rejected() {
        let env = env_from(&[("AUTHD_DB_URL", "localhost is not a url")]);
        let result = ServerConfig::resolve(FileConfig::default(), env);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "AUTHD_DB_URL", .. })
        ));
    }

    #[test]
    fn env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            pool_size = 4

            [db]
            url = "postgres://file@localhost/auth"
            "#,
        )
        .unwrap();
        let env = env_from(&[("AUTHD_PORT", "9100")]);
        let config = ServerConfig::resolve(file, env).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.db.url, "postgres://file@localhost/auth");
    }

    #[test]
    fn config_file_parses_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[db]\nurl = \"postgres://authd@localhost/auth\"\n\n[log]\nformat = \"json\""
        )
        .unwrap();
        let parsed = FileConfig::read(file.path()).unwrap();
        let config = ServerConfig::resolve(parsed, no_env).unwrap();
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn unreadable_config_file_errors() {
        let result = FileConfig::read(Path::new("/nonexistent/authd.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let env = env_from(&[
            ("AUTHD_DB_URL", "postgres://authd@localhost/auth"),
            ("AUTHD_LOG_FORMAT", "xml"),
        ]);
        let result = ServerConfig::resolve(FileConfig::default(), env);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "AUTHD_LOG_FORMAT", .. })
        ));
    }

    #[test]
    fn frame_size_floor_applies() {
        let env = env_from(&[
            ("AUTHD_DB_URL", "postgres://authd@localhost/auth"),
            ("AUTHD_MAX_FRAME_SIZE", "16"),
        ]);
        let config = ServerConfig::resolve(FileConfig::default(), env).unwrap();
        assert_eq!(config.max_frame_size, MIN_FRAME_SIZE);
    }
}
