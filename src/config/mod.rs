use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Short-lived execution (lambda, edge functions) gets a tiny pool
    pub serverless: bool,
    pub enable_query_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub max_page_size: i64,
    pub default_page_size: i64,
    pub enable_request_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub cors_origins: Vec<String>,
    pub session_ttl_hours: i64,
    pub bcrypt_cost: u32,
    pub session_cookie_name: String,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub send_enabled: bool,
    pub transport: EmailTransportKind,
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub from_address: String,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailTransportKind {
    Log,
    Http,
}

/// Serverless pool cap, regardless of profile
pub const SERVERLESS_MAX_CONNECTIONS: u32 = 3;

impl DatabaseConfig {
    pub fn effective_max_connections(&self) -> u32 {
        if self.serverless {
            self.max_connections.min(SERVERLESS_MAX_CONNECTIONS)
        } else {
            self.max_connections
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        self.database.serverless = detect_serverless();
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            self.database.acquire_timeout_secs = v.parse().unwrap_or(self.database.acquire_timeout_secs);
        }
        if let Ok(v) = env::var("DATABASE_RETRY_ATTEMPTS") {
            self.database.retry_attempts = v.parse().unwrap_or(self.database.retry_attempts);
        }
        if let Ok(v) = env::var("DATABASE_RETRY_BACKOFF_MS") {
            self.database.retry_backoff_ms = v.parse().unwrap_or(self.database.retry_backoff_ms);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }

        // API overrides
        if let Some(port) = env::var("ATLAS_PORT")
            .ok()
            .or_else(|| env::var("PORT").ok())
            .and_then(|s| s.parse::<u16>().ok())
        {
            self.api.port = port;
        }
        if let Ok(v) = env::var("ATLAS_MAX_PAGE_SIZE") {
            self.api.max_page_size = v.parse().unwrap_or(self.api.max_page_size);
        }
        if let Ok(v) = env::var("ATLAS_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }

        // Security overrides
        if let Ok(v) = env::var("ATLAS_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = env::var("ATLAS_SESSION_TTL_HOURS") {
            self.security.session_ttl_hours = v.parse().unwrap_or(self.security.session_ttl_hours);
        }
        if let Ok(v) = env::var("ATLAS_BCRYPT_COST") {
            self.security.bcrypt_cost = v.parse().unwrap_or(self.security.bcrypt_cost);
        }
        if let Ok(v) = env::var("ATLAS_SECURE_COOKIES") {
            self.security.secure_cookies = v.parse().unwrap_or(self.security.secure_cookies);
        }

        // Email overrides
        if let Ok(v) = env::var("EMAIL_SEND_ENABLED") {
            self.email.send_enabled = v.parse().unwrap_or(self.email.send_enabled);
        }
        if let Ok(v) = env::var("EMAIL_TRANSPORT") {
            match v.as_str() {
                "http" => self.email.transport = EmailTransportKind::Http,
                "log" => self.email.transport = EmailTransportKind::Log,
                _ => {}
            }
        }
        if let Ok(v) = env::var("EMAIL_ENDPOINT") {
            self.email.endpoint = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("EMAIL_API_KEY") {
            self.email.api_key = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("EMAIL_FROM") {
            if !v.trim().is_empty() {
                self.email.from_address = v;
            }
        }
        if let Ok(v) = env::var("EMAIL_MAX_BATCH_SIZE") {
            self.email.max_batch_size = v.parse().unwrap_or(self.email.max_batch_size);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 10,
                acquire_timeout_secs: 30,
                retry_attempts: 3,
                retry_backoff_ms: 200,
                serverless: false,
                enable_query_logging: true,
            },
            api: ApiConfig {
                port: 3000,
                max_page_size: 1000,
                default_page_size: 50,
                enable_request_logging: true,
            },
            security: SecurityConfig {
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                session_ttl_hours: 24 * 7, // 1 week
                bcrypt_cost: 10,
                session_cookie_name: "atlas_session".to_string(),
                secure_cookies: false,
            },
            email: EmailConfig {
                send_enabled: false,
                transport: EmailTransportKind::Log,
                endpoint: None,
                api_key: None,
                from_address: "Atlas <atlas@localhost>".to_string(),
                max_batch_size: 500,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 20,
                acquire_timeout_secs: 10,
                retry_attempts: 3,
                retry_backoff_ms: 250,
                serverless: false,
                enable_query_logging: true,
            },
            api: ApiConfig {
                port: 3000,
                max_page_size: 500,
                default_page_size: 50,
                enable_request_logging: true,
            },
            security: SecurityConfig {
                cors_origins: vec!["https://atlas-staging.example.org".to_string()],
                session_ttl_hours: 24,
                bcrypt_cost: 12,
                session_cookie_name: "atlas_session".to_string(),
                secure_cookies: true,
            },
            email: EmailConfig {
                send_enabled: false,
                transport: EmailTransportKind::Http,
                endpoint: None,
                api_key: None,
                from_address: "Atlas Staging <atlas@example.org>".to_string(),
                max_batch_size: 200,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 30,
                acquire_timeout_secs: 5,
                retry_attempts: 2,
                retry_backoff_ms: 500,
                serverless: false,
                enable_query_logging: false,
            },
            api: ApiConfig {
                port: 3000,
                max_page_size: 200,
                default_page_size: 50,
                enable_request_logging: false,
            },
            security: SecurityConfig {
                cors_origins: vec!["https://atlas.example.org".to_string()],
                session_ttl_hours: 12,
                bcrypt_cost: 12,
                session_cookie_name: "atlas_session".to_string(),
                secure_cookies: true,
            },
            email: EmailConfig {
                send_enabled: true,
                transport: EmailTransportKind::Http,
                endpoint: None,
                api_key: None,
                from_address: "Atlas <atlas@example.org>".to_string(),
                max_batch_size: 200,
            },
        }
    }
}

fn detect_serverless() -> bool {
    if let Ok(v) = env::var("ATLAS_SERVERLESS") {
        return matches!(v.as_str(), "1" | "true" | "yes");
    }
    env::var("VERCEL").is_ok() || env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok()
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.email.transport, EmailTransportKind::Log);
        assert!(!config.email.send_enabled);
        assert!(!config.security.secure_cookies);
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.api.max_page_size, 200);
        assert!(config.security.secure_cookies);
        assert!(config.security.bcrypt_cost >= 12);
    }

    #[test]
    fn serverless_caps_pool_size() {
        let mut db = AppConfig::production().database;
        assert_eq!(db.effective_max_connections(), 30);
        db.serverless = true;
        assert_eq!(db.effective_max_connections(), SERVERLESS_MAX_CONNECTIONS);
    }

    #[test]
    fn serverless_never_raises_a_smaller_pool() {
        let mut db = AppConfig::development().database;
        db.max_connections = 2;
        db.serverless = true;
        assert_eq!(db.effective_max_connections(), 2);
    }
}
