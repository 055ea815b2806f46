//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// 默认配置文件
pub const DEFAULT_CONFIG_FILE: &str = "rdt.toml";

/// 默认日志文件
pub const DEFAULT_LOG_FILE: &str = "rdt.log";

/// 默认重连间隔
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// 默认连接时限
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 配置文件路径
    pub config_path: PathBuf,
    /// 日志过滤规则（EnvFilter 语法）
    pub log_filter: String,
    /// 日志文件，`None` 表示不写文件
    pub log_file: Option<String>,
    /// 连接失败后的重试间隔
    pub retry_interval: Duration,
    /// 单次连接（握手加认证）的时限
    pub connect_timeout: Duration,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            log_filter: "info".to_string(),
            log_file: Some(DEFAULT_LOG_FILE.to_string()),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let config_path = env::var("RDT_CONFIG")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        // 兼容通用的 RUST_LOG
        let log_filter =
            load_with_fallback("RDT_LOG", "RUST_LOG").unwrap_or_else(|| "info".to_string());

        // 显式设置为空字符串时关闭文件日志
        let log_file = match env::var("RDT_LOG_FILE") {
            Ok(v) if v.is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => Some(DEFAULT_LOG_FILE.to_string()),
        };

        let retry_interval = millis_var("RDT_RETRY_INTERVAL_MS").unwrap_or(DEFAULT_RETRY_INTERVAL);
        let connect_timeout =
            millis_var("RDT_CONNECT_TIMEOUT_MS").unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        Self {
            config_path,
            log_filter,
            log_file,
            retry_interval,
            connect_timeout,
        }
    }

    /// 配置文件名（用于加入监视忽略列表）
    pub fn config_file_name(&self) -> String {
        self.config_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string())
    }
}

/// 毫秒数环境变量
fn millis_var(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}
