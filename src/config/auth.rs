//! 认证方式发现
//!
//! 优先级：显式配置 > `SSH_AUTH_SOCK` > Windows OpenSSH agent 管道 > `~/.ssh` 下的私钥

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::AuthMethod;

/// Windows 自带 OpenSSH agent 的命名管道
pub const WINDOWS_AGENT_PIPE: &str = r"\\.\pipe\openssh-ssh-agent";

/// 按顺序尝试的私钥文件
pub const PRIVATE_KEY_NAMES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// 发现认证方式时读取的本机环境
#[derive(Clone, Debug, Default)]
pub struct AuthEnv {
    pub ssh_auth_sock: Option<String>,
    pub windows: bool,
    pub home: Option<PathBuf>,
}

impl AuthEnv {
    pub fn from_system() -> Self {
        Self {
            ssh_auth_sock: std::env::var("SSH_AUTH_SOCK").ok().filter(|s| !s.is_empty()),
            windows: cfg!(windows),
            home: dirs::home_dir(),
        }
    }

    /// 展开 `~/` 前缀
    pub fn expand_home(&self, path: &str) -> PathBuf {
        match (path.strip_prefix("~/"), self.home.as_ref()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(path),
        }
    }
}

/// 配置文件中显式给出的认证字段
#[derive(Clone, Debug, Default)]
pub struct ExplicitAuth {
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    pub agent: Option<String>,
}

/// 确定认证方式
pub fn resolve_auth(explicit: &ExplicitAuth, env: &AuthEnv) -> AuthMethod {
    if let Some(ref password) = explicit.password {
        return AuthMethod::Password(password.clone());
    }
    if let Some(ref key) = explicit.private_key {
        return AuthMethod::PrivateKey {
            path: env.expand_home(key),
            passphrase: explicit.passphrase.clone(),
        };
    }
    if let Some(ref agent) = explicit.agent {
        return AuthMethod::Agent(agent.clone());
    }

    debug!("No authentication method specified. Trying to find one...");

    if let Some(ref sock) = env.ssh_auth_sock {
        debug!(socket = %sock, "Using SSH agent from SSH_AUTH_SOCK");
        return AuthMethod::Agent(sock.clone());
    }

    if env.windows {
        debug!("Windows detected. Trying to use OpenSSH agent");
        return AuthMethod::Agent(WINDOWS_AGENT_PIPE.to_string());
    }

    match env.home.as_deref().and_then(find_private_key) {
        Some(path) => {
            debug!(path = %path.display(), "Trying private key");
            AuthMethod::PrivateKey {
                path,
                passphrase: None,
            }
        }
        None => AuthMethod::None,
    }
}

/// 在 `<home>/.ssh` 下查找第一个存在的私钥
pub fn find_private_key(home: &Path) -> Option<PathBuf> {
    let ssh_dir = home.join(".ssh");
    PRIVATE_KEY_NAMES
        .iter()
        .map(|name| ssh_dir.join(name))
        .inspect(|path| debug!(path = %path.display(), "Looking for private key"))
        .find(|path| path.is_file())
}
