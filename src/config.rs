use std::str::FromStr;
use std::time::Duration;

use crate::messaging::KafkaConfig;

// ============================================================================
// Configuration - environment variables with defaults
// ============================================================================
//
// An unset or empty variable falls back to its default. A value that does
// not parse is an error, never silently replaced.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub metrics_port: u16,
    pub shutdown_timeout: Duration,
    pub consumer_max_restarts: u32,
    pub run_demo: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        Ok(Self {
            database: DatabaseConfig {
                host: env.string("DB_HOST", "db"),
                port: env.parse("DB_PORT", 5432)?,
                user: env.string("DB_USER", "postgres"),
                password: env.string("DB_PASSWORD", "123"),
                name: env.string("DB_NAME", "Library"),
                ssl_mode: env.string("DB_SSLMODE", "disable"),
                max_connections: env.parse("DB_MAX_CONNECTIONS", 10)?,
            },
            redis: RedisConfig {
                host: env.string("REDIS_HOST", "redis"),
                port: env.parse("REDIS_PORT", 6379)?,
                password: env.get("REDIS_PASSWORD"),
                db: env.parse("REDIS_DB", 0)?,
            },
            kafka: KafkaConfig {
                brokers: env
                    .string("KAFKA_BROKERS", "kafka:9092")
                    .split(',')
                    .map(str::trim)
                    .filter(|broker| !broker.is_empty())
                    .map(String::from)
                    .collect(),
                topic: env.string("KAFKA_TOPIC", "library-events"),
                group_id: env.string("KAFKA_GROUP_ID", "library-service"),
            },
            cache_enabled: env.flag("CACHE_ENABLED", true)?,
            cache_ttl: Duration::from_secs(env.parse("CACHE_TTL_SECS", 30 * 60)?),
            metrics_port: env.parse("METRICS_PORT", 9090)?,
            shutdown_timeout: Duration::from_secs(env.parse("SHUTDOWN_TIMEOUT_SECS", 5)?),
            consumer_max_restarts: env.parse("CONSUMER_MAX_RESTARTS", 0)?,
            run_demo: env.flag("RUN_DEMO", false)?,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };

        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected true or false".to_string(),
            }),
        }
    }
}
