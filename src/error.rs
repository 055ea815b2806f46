//! 统一错误处理
//!
//! 按层划分错误类型：
//! - `ConfigError`: 启动阶段的配置错误（致命，连接前抛出）
//! - `RemoteError`: 传输、命令执行、SFTP 错误
//! - `TunnelError`: 本地端口转发错误

use std::time::Duration;

use thiserror::Error;

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Username specified in hostname and username option")]
    DuplicateUsername,

    #[error("Port specified twice. In hostname and port option. Use only one.")]
    DuplicatePort,

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("No targets defined or selected")]
    NoTarget,

    #[error("Invalid debounce time: {0}")]
    InvalidDebounce(String),

    #[error("Invalid watch pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
}

/// 远程操作错误
#[derive(Debug, Error)]
pub enum RemoteError {
    /// 当前没有可用连接（正在重连）
    #[error("Not connected to remote")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connect(String),

    /// 在时限内没有完成握手和认证
    #[error("Timed out after {timeout:?} connecting to {remote}")]
    ConnectTimeout { remote: String, timeout: Duration },

    #[error("Authentication failed for {user}@{host}")]
    AuthRejected { user: String, host: String },

    #[error("No authentication method available")]
    NoAuthMethod,

    #[error("Channel error: {0}")]
    Channel(String),

    /// 命令返回非零退出码
    #[error("Command failed: {command} (exit code {exit_code})\n\n{stderr}")]
    CommandFailed {
        command: String,
        exit_code: u32,
        stderr: String,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No such file: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("SFTP error on {path}: {message}")]
    Sftp { path: String, message: String },

    /// 安装后版本仍不符合要求
    #[error("{package} {wanted} requested but {} is installed", .installed.as_deref().unwrap_or("nothing"))]
    VersionMismatch {
        package: String,
        wanted: String,
        installed: Option<String>,
    },

    #[error("Unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RemoteError::PermissionDenied(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// 端口转发错误
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// 便捷类型别名
pub type RemoteResult<T> = Result<T, RemoteError>;
