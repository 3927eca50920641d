use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,

    // 对外公开的基础地址, WebSub 回调必须公网可达
    pub base_url: String,

    // Microsub API 挂载路径
    pub mount_path: String,

    // Database configuration
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,

    // Authentication configuration
    pub auth_token_endpoint: String,

    // Fetch configuration
    pub fetch_timeout_secs: u64,
    pub discovery_timeout_secs: u64,

    // Scheduler configuration
    pub scheduler_interval_secs: u64,
    pub batch_concurrency: usize,

    // Retention
    pub max_full_read_items: usize,
    pub unread_retention_days: i64,

    // WebSub
    pub websub_lease_seconds: i64,

    // Rate limiting (webmention receiver)
    pub rate_limit_requests: u32,
    pub rate_limit_window: u64,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            base_url: env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            mount_path: env::var("MOUNT_PATH").unwrap_or_else(|_| "/microsub".to_string()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "localhost:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "rainbow".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "reader".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),

            auth_token_endpoint: env::var("AUTH_TOKEN_ENDPOINT")
                .unwrap_or_else(|_| "https://tokens.indieauth.com/token".to_string()),

            fetch_timeout_secs: env::var("FETCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            discovery_timeout_secs: env::var("DISCOVERY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            scheduler_interval_secs: env::var("SCHEDULER_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            batch_concurrency: env::var("BATCH_CONCURRENCY")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            max_full_read_items: env::var("MAX_FULL_READ_ITEMS")
                .unwrap_or_else(|_| "200".to_string())
                .parse()?,
            unread_retention_days: env::var("UNREAD_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            websub_lease_seconds: env::var("WEBSUB_LEASE_SECONDS")
                .unwrap_or_else(|_| "604800".to_string())
                .parse()?,

            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            rate_limit_window: env::var("RATE_LIMIT_WINDOW")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
        })
    }

    /// WebSub 回调地址, 挂载在 Microsub 路径之下
    pub fn websub_callback_url(&self, feed_id: &str) -> String {
        format!(
            "{}{}/websub/{}",
            self.base_url.trim_end_matches('/'),
            self.mount_path,
            feed_id
        )
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websub_callback_url() {
        let mut config = Config::from_env().unwrap();
        config.base_url = "https://reader.example.com/".to_string();
        config.mount_path = "/microsub".to_string();

        assert_eq!(
            config.websub_callback_url("feed123"),
            "https://reader.example.com/microsub/websub/feed123"
        );
    }
}
