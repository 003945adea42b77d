use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::auth::token::SigningAlgorithm;

/// Startup configuration failures. These are fatal: the server refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid {name} value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    /// Session variable consulted by the row-level security policies.
    pub tenant_setting: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_algorithm: SigningAlgorithm,
    pub jwt_issuer: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub cookie_name: String,
    pub cookie_secure: bool,
    /// `Strict-Transport-Security` max-age; zero disables the header
    pub hsts_max_age_secs: u64,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        let config = match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        };

        config.with_overrides(&lookup)
    }

    fn with_overrides<F>(mut self, lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Security
        self.security.jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        if let Some(v) = lookup("JWT_EXPIRATION_SECONDS") {
            self.security.access_ttl_secs = parse_positive("JWT_EXPIRATION_SECONDS", &v)?;
            // Refresh tokens default to seven access lifetimes unless set explicitly
            self.security.refresh_ttl_secs = self.security.access_ttl_secs * 7;
        }
        if let Some(v) = lookup("JWT_REFRESH_EXPIRATION_SECONDS") {
            self.security.refresh_ttl_secs = parse_positive("JWT_REFRESH_EXPIRATION_SECONDS", &v)?;
        }
        if let Some(v) = lookup("JWT_ISSUER").filter(|s| !s.is_empty()) {
            self.security.jwt_issuer = v;
        }
        if let Some(v) = lookup("JWT_ALGORITHM") {
            self.security.jwt_algorithm = v.parse().map_err(|_| ConfigError::Invalid {
                name: "JWT_ALGORITHM",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("AUTH_COOKIE_NAME").filter(|s| !s.is_empty()) {
            self.security.cookie_name = v;
        }
        if let Some(v) = lookup("AUTH_COOKIE_SECURE") {
            self.security.cookie_secure = v.parse().unwrap_or(self.security.cookie_secure);
        }
        if let Some(v) = lookup("SECURITY_HSTS_MAX_AGE") {
            self.security.hsts_max_age_secs = v.parse().unwrap_or(self.security.hsts_max_age_secs);
        }

        // Database
        self.database.url = lookup("DATABASE_URL").filter(|s| !s.is_empty());
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Some(v) = lookup("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Some(v) = lookup("DATABASE_TENANT_SETTING") {
            if !is_valid_setting_name(&v) {
                return Err(ConfigError::Invalid {
                    name: "DATABASE_TENANT_SETTING",
                    value: v,
                });
            }
            self.database.tenant_setting = v;
        }

        // API
        if let Some(v) = lookup("HOST") {
            self.api.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Some(v) = lookup("API_REQUEST_TIMEOUT_SECS") {
            self.api.request_timeout_secs = v.parse().unwrap_or(self.api.request_timeout_secs);
        }
        if let Some(v) = lookup("SECURITY_ENABLE_CORS") {
            self.api.enable_cors = v.parse().unwrap_or(self.api.enable_cors);
        }

        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
                tenant_setting: "app.current_tenant_id".to_string(),
            },
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                request_timeout_secs: 60,
                enable_cors: true,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_algorithm: SigningAlgorithm::HS256,
                jwt_issuer: "silocore".to_string(),
                access_ttl_secs: 86400,
                refresh_ttl_secs: 7 * 86400,
                cookie_name: "auth_token".to_string(),
                cookie_secure: false,
                hsts_max_age_secs: 31536000,
            },
        }
    }

    fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.database.max_connections = 20;
        config.database.connection_timeout = 10;
        config.security.cookie_secure = true;
        config
    }

    fn production() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Production;
        config.database.max_connections = 50;
        config.database.connection_timeout = 5;
        config.api.enable_cors = false;
        config.security.cookie_secure = true;
        config
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<i64, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

/// Custom placeholder settings must look like `prefix.name`.
fn is_valid_setting_name(name: &str) -> bool {
    let mut parts = name.split('.');
    let valid_part = |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    matches!((parts.next(), parts.next(), parts.next()), (Some(a), Some(b), None) if valid_part(a) && valid_part(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_secret_is_fatal() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn refresh_ttl_defaults_to_seven_access_lifetimes() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s3cret"),
            ("JWT_EXPIRATION_SECONDS", "600"),
        ]))
        .unwrap();
        assert_eq!(config.security.access_ttl_secs, 600);
        assert_eq!(config.security.refresh_ttl_secs, 4200);
        assert_eq!(config.security.jwt_issuer, "silocore");
    }

    #[test]
    fn explicit_refresh_ttl_wins() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s3cret"),
            ("JWT_EXPIRATION_SECONDS", "600"),
            ("JWT_REFRESH_EXPIRATION_SECONDS", "900"),
        ]))
        .unwrap();
        assert_eq!(config.security.refresh_ttl_secs, 900);
    }

    #[test]
    fn rejects_non_numeric_expiration() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s3cret"),
            ("JWT_EXPIRATION_SECONDS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "JWT_EXPIRATION_SECONDS", .. }));
    }

    #[test]
    fn token_lifetimes_default_to_one_day_and_one_week() {
        let config = AppConfig::from_lookup(lookup_from(&[("JWT_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.security.access_ttl_secs, 86400);
        assert_eq!(config.security.refresh_ttl_secs, 7 * 86400);
    }

    #[test]
    fn production_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("APP_ENV", "production"),
            ("JWT_SECRET", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert!(config.security.cookie_secure);
        assert!(!config.api.enable_cors);
    }

    #[test]
    fn tenant_setting_name_is_validated() {
        assert!(is_valid_setting_name("app.current_tenant_id"));
        assert!(!is_valid_setting_name("current_tenant"));
        assert!(!is_valid_setting_name("app.tenant'; drop"));

        let err = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s3cret"),
            ("DATABASE_TENANT_SETTING", "bad name"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DATABASE_TENANT_SETTING", .. }));
    }
}
