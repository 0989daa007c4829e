use serde::Deserialize;
use service_core::config::{self as core_config, Environment};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub mongodb: MongoConfig,
    pub registry: RegistryConfig,
    pub arg_options: ArgOptionsConfig,
    pub admin_group: String,
    pub link_schema_validation: SchemaValidation,
    pub grants: GrantPolicy,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArgOptionsConfig {
    pub url: String,
}

/// Whether linking a deployment checks its provider's target schema against
/// the target group's.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaValidation {
    /// Left to the routing layer.
    #[default]
    Deferred,
    /// Link fails with `IncompatibleSchema` when the schemas differ.
    Enforced,
}

impl std::str::FromStr for SchemaValidation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deferred" => Ok(SchemaValidation::Deferred),
            "enforced" => Ok(SchemaValidation::Enforced),
            _ => Err(format!("Invalid link schema validation mode: {}", s)),
        }
    }
}

/// Bounds on how long a grant may last.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct GrantPolicy {
    pub default_duration_secs: i64,
    pub max_duration_secs: i64,
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self {
            default_duration_secs: 3600,
            max_duration_secs: 86400,
        }
    }
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment.is_prod();

        let config = AccessConfig {
            common: core_config::Config {
                environment,
                ..common_config
            },
            service_name: get_env("SERVICE_NAME", Some("access-service"), is_prod)?,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", None, is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("access_db"), is_prod)?,
                page_size: parse_env("STORE_PAGE_SIZE", "50", is_prod)?,
            },
            registry: RegistryConfig {
                url: get_env("PROVIDER_REGISTRY_URL", None, is_prod)?,
                timeout_secs: parse_env("PROVIDER_REGISTRY_TIMEOUT_SECS", "10", is_prod)?,
            },
            arg_options: ArgOptionsConfig {
                url: get_env("ARG_OPTIONS_URL", None, is_prod)?,
            },
            admin_group: get_env("ADMIN_GROUP", Some("access_admins"), is_prod)?,
            link_schema_validation: get_env("LINK_SCHEMA_VALIDATION", Some("deferred"), false)?
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            grants: GrantPolicy {
                default_duration_secs: parse_env("DEFAULT_GRANT_DURATION_SECS", "3600", is_prod)?,
                max_duration_secs: parse_env("MAX_GRANT_DURATION_SECS", "86400", is_prod)?,
            },
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.mongodb.page_size == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STORE_PAGE_SIZE must be positive"
            )));
        }

        self.grants.validate()
    }
}

impl GrantPolicy {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.default_duration_secs <= 0 || self.max_duration_secs <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "grant durations must be positive"
            )));
        }

        if self.default_duration_secs > self.max_duration_secs {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DEFAULT_GRANT_DURATION_SECS must not exceed MAX_GRANT_DURATION_SECS"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}
