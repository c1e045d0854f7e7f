use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub intake: IntakeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// 扫码录入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// 静默窗口 (毫秒): 扫码枪停顿超过该时长才解析缓冲的条码
    pub quiescence_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/erp_billrecon".to_string()),
            },
            intake: IntakeConfig {
                quiescence_ms: crate::service::intake::DEFAULT_QUIESCENCE_MS,
            },
        }
    }
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: std::env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/erp_billrecon".to_string()),
            },
            intake: IntakeConfig {
                quiescence_ms: std::env::var("SCAN_QUIESCENCE_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(crate::service::intake::DEFAULT_QUIESCENCE_MS),
            },
        }
    }
}
