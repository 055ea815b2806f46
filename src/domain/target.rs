//! 部署目标领域模型
//!
//! 规范化之后的 Target：配置加载、主机串解析、认证方式发现都完成后的只读视图

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::tunnel::TunnelRoute;

/// 默认用户名
pub const DEFAULT_USERNAME: &str = "pi";

/// 默认 SSH 端口
pub const DEFAULT_SSH_PORT: u16 = 22;

/// 默认防抖时间
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// 一个远程部署目标
#[derive(Clone, Debug)]
pub struct Target {
    /// 目标名称
    pub name: String,
    /// 远程连接参数
    pub remote: RemoteOptions,
    /// 文件监视参数
    pub watch: WatchOptions,
    /// 单文件及批次防抖时间
    pub debounce: Duration,
    /// 本地开发服务器（可选）
    pub dev_server: Option<DevServerOptions>,
    /// 常驻端口转发
    pub forwards: Vec<TunnelRoute>,
}

impl Target {
    /// 将本地相对路径映射到远程工作目录下
    pub fn remote_path_for(&self, local_path: &str) -> String {
        let local = local_path.replace('\\', "/");
        let local = local.trim_start_matches("./");
        let base = self.remote.path.trim_end_matches('/');
        if base.is_empty() {
            local.to_string()
        } else {
            format!("{}/{}", base, local)
        }
    }
}

/// 远程连接参数
#[derive(Clone, Debug)]
pub struct RemoteOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    /// 远程工作目录（绝对路径或相对于用户主目录）
    pub path: String,
}

impl RemoteOptions {
    /// 用于日志的地址描述
    pub fn describe(&self) -> String {
        if self.port == DEFAULT_SSH_PORT {
            format!("{}@{}", self.username, self.host)
        } else {
            format!("{}@{}:{}", self.username, self.host, self.port)
        }
    }
}

/// 认证方式
#[derive(Clone, PartialEq)]
pub enum AuthMethod {
    /// 密码
    Password(String),
    /// 私钥文件
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// SSH agent（unix socket 路径或 Windows 命名管道）
    Agent(String),
    /// 未找到任何方式，连接时会失败并重试
    None,
}

impl AuthMethod {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PrivateKey { .. } => "private_key",
            AuthMethod::Agent(_) => "agent",
            AuthMethod::None => "none",
        }
    }
}

// 密码和口令不进日志
impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => write!(f, "Password(***)"),
            AuthMethod::PrivateKey { path, .. } => {
                f.debug_struct("PrivateKey").field("path", path).finish()
            }
            AuthMethod::Agent(sock) => f.debug_tuple("Agent").field(sock).finish(),
            AuthMethod::None => write!(f, "None"),
        }
    }
}

/// 文件监视参数
#[derive(Clone, Debug, PartialEq)]
pub struct WatchOptions {
    /// 相对于项目根目录的 glob
    pub glob: String,
    /// 忽略模式（已合并内置忽略项）
    pub ignore: Vec<String>,
}

/// 本地开发服务器参数
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DevServerOptions {
    /// 外部构建/开发服务器命令（通过 `sh -c` 执行）
    pub command: Option<String>,
    /// 命令工作目录
    pub working_dir: Option<PathBuf>,
    /// 额外环境变量
    pub env: BTreeMap<String, String>,
}
