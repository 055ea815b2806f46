//! 目标配置解析与规范化
//!
//! `TargetConfig` 是配置文件中的原始结构，`normalize` 把它变成只读的 `Target`：
//! 主机串解析、默认值、认证方式发现、监视忽略列表合并

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::config::auth::{resolve_auth, AuthEnv, ExplicitAuth};
use crate::domain::target::{DEFAULT_DEBOUNCE, DEFAULT_SSH_PORT, DEFAULT_USERNAME};
use crate::domain::{DevServerOptions, ForwardSpec, RemoteOptions, Target, WatchOptions};
use crate::error::ConfigError;

/// 默认监视 glob
pub const DEFAULT_WATCH_GLOB: &str = "**/*";

/// 内置忽略项（日志文件和配置文件在规范化时追加）
pub const BUILTIN_IGNORE: [&str; 4] = [
    "**/.git/**",
    "**/node_modules/**",
    "**/package-lock.json",
    "**/yarn.lock",
];

/// 单个目标的原始配置
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    pub remote: RemoteConfig,
    pub watch: WatchConfig,
    /// 防抖时间，毫秒数或 `"250ms"` / `"1s"`
    pub debounce: Option<DebounceSetting>,
    pub dev_server: Option<DevServerSetting>,
    pub ports: Vec<ForwardSpec>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// `[user@]host[:port]`，默认等于目标名
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    pub agent: Option<String>,
    /// 远程工作目录，默认 `.rdt/<name>`
    pub path: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub glob: Option<String>,
    pub ignore: Option<IgnoreSetting>,
}

/// 忽略项可以写成单个字符串或数组
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum IgnoreSetting {
    One(String),
    Many(Vec<String>),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum DebounceSetting {
    Millis(u64),
    Text(String),
}

/// `dev_server = "npm run dev"` 或完整表
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum DevServerSetting {
    Enabled(bool),
    Command(String),
    Detailed {
        command: Option<String>,
        #[serde(default)]
        working_dir: Option<PathBuf>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

/// 规范化时需要的外部信息
#[derive(Clone, Debug, Default)]
pub struct NormalizeContext {
    /// 日志文件名（加入忽略列表）
    pub log_files: Vec<String>,
    /// 配置文件名（加入忽略列表）
    pub config_file: Option<String>,
    pub auth_env: AuthEnv,
}

/// 主机串解析结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostParts {
    pub user: Option<String>,
    pub hostname: String,
    pub port: Option<String>,
}

fn host_regex() -> Option<&'static Regex> {
    static HOST_RE: OnceLock<Option<Regex>> = OnceLock::new();
    HOST_RE
        .get_or_init(|| {
            Regex::new(
                r"^(?:(?P<user>[a-z_](?:[a-z0-9_-]{0,31}|[a-z0-9_-]{0,30}\$))@)?(?P<hostname>[a-zA-Z0-9\-.]+)(?::(?P<port>[1-9]\d*))?$",
            )
            .ok()
        })
        .as_ref()
}

/// 解析 `[user@]host[:port]`，格式不符时返回 `None`（整串当作主机名）
pub fn parse_host(host: &str) -> Option<HostParts> {
    let caps = host_regex()?.captures(host)?;
    Some(HostParts {
        user: caps.name("user").map(|m| m.as_str().to_string()),
        hostname: caps.name("hostname")?.as_str().to_string(),
        port: caps.name("port").map(|m| m.as_str().to_string()),
    })
}

fn parse_debounce(setting: &DebounceSetting) -> Result<Duration, ConfigError> {
    match setting {
        DebounceSetting::Millis(ms) => Ok(Duration::from_millis(*ms)),
        DebounceSetting::Text(text) => {
            let text = text.trim();
            let invalid = || ConfigError::InvalidDebounce(text.to_string());
            if let Some(ms) = text.strip_suffix("ms") {
                ms.trim().parse().map(Duration::from_millis).map_err(|_| invalid())
            } else if let Some(secs) = text.strip_suffix('s') {
                secs.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .map(Duration::from_secs_f64)
                    .ok_or_else(invalid)
            } else {
                text.parse().map(Duration::from_millis).map_err(|_| invalid())
            }
        }
    }
}

fn check_pattern(pattern: &str) -> Result<(), ConfigError> {
    glob::Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

impl TargetConfig {
    /// 规范化为 `Target`
    pub fn normalize(self, name: &str, ctx: &NormalizeContext) -> Result<Target, ConfigError> {
        let remote = self.remote.normalize(name, &ctx.auth_env)?;
        let watch = self.watch.normalize(ctx)?;

        let debounce = match self.debounce {
            Some(ref setting) => parse_debounce(setting)?,
            None => DEFAULT_DEBOUNCE,
        };

        let dev_server = match self.dev_server {
            None | Some(DevServerSetting::Enabled(false)) => None,
            Some(DevServerSetting::Enabled(true)) => Some(DevServerOptions::default()),
            Some(DevServerSetting::Command(command)) => Some(DevServerOptions {
                command: Some(command),
                ..Default::default()
            }),
            Some(DevServerSetting::Detailed {
                command,
                working_dir,
                env,
            }) => Some(DevServerOptions {
                command,
                working_dir,
                env,
            }),
        };

        let forwards = self.ports.into_iter().map(ForwardSpec::into_route).collect();

        Ok(Target {
            name: name.to_string(),
            remote,
            watch,
            debounce,
            dev_server,
            forwards,
        })
    }
}

impl RemoteConfig {
    fn normalize(self, name: &str, auth_env: &AuthEnv) -> Result<RemoteOptions, ConfigError> {
        let mut host = self.host.clone().unwrap_or_else(|| name.to_string());
        let mut username = self.username.clone();
        let mut port = self.port;

        if let Some(parts) = parse_host(&host) {
            if let Some(user) = parts.user {
                if username.is_some() {
                    return Err(ConfigError::DuplicateUsername);
                }
                username = Some(user);
            }

            if let Some(port_text) = parts.port {
                if port.is_some() {
                    return Err(ConfigError::DuplicatePort);
                }
                let parsed: u16 = port_text
                    .parse()
                    .map_err(|_| ConfigError::InvalidPort(port_text.clone()))?;
                port = Some(parsed);
            }

            host = parts.hostname;
        }

        if port == Some(0) {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }

        let explicit = ExplicitAuth {
            password: self.password,
            private_key: self.private_key,
            passphrase: self.passphrase,
            agent: self.agent,
        };
        let auth = resolve_auth(&explicit, auth_env);
        debug!(host = %host, auth = auth.kind(), "Remote normalized");

        Ok(RemoteOptions {
            host,
            port: port.unwrap_or(DEFAULT_SSH_PORT),
            username: username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            auth,
            path: self.path.unwrap_or_else(|| default_remote_path(name)),
        })
    }
}

impl WatchConfig {
    fn normalize(self, ctx: &NormalizeContext) -> Result<WatchOptions, ConfigError> {
        let glob = self.glob.unwrap_or_else(|| DEFAULT_WATCH_GLOB.to_string());
        check_pattern(&glob)?;

        let mut ignore = match self.ignore {
            None => Vec::new(),
            Some(IgnoreSetting::One(pattern)) => vec![pattern],
            Some(IgnoreSetting::Many(patterns)) => patterns,
        };

        for pattern in BUILTIN_IGNORE {
            push_unique(&mut ignore, pattern);
        }
        for file in &ctx.log_files {
            push_unique(&mut ignore, &anywhere(file));
        }
        if let Some(ref config_file) = ctx.config_file {
            push_unique(&mut ignore, &anywhere(config_file));
        }

        for pattern in &ignore {
            check_pattern(pattern)?;
        }

        Ok(WatchOptions { glob, ignore })
    }
}

/// 默认远程工作目录 `.rdt/<name>`，临时目标名里的 `@`、`:` 等替换为 `_`
fn default_remote_path(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(".rdt/{}", safe)
}

/// 裸文件名扩展为任意目录下都匹配的模式
fn anywhere(name: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("**/{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuthMethod;

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            log_files: vec!["rdt.log".to_string()],
            config_file: Some("rdt.toml".to_string()),
            auth_env: AuthEnv::default(),
        }
    }

    fn with_host(host: &str) -> TargetConfig {
        let mut config = TargetConfig::default();
        config.remote.host = Some(host.to_string());
        config
    }

    #[test]
    fn test_parse_host_full() {
        assert_eq!(
            parse_host("pi@device:2222"),
            Some(HostParts {
                user: Some("pi".to_string()),
                hostname: "device".to_string(),
                port: Some("2222".to_string()),
            })
        );
        assert_eq!(parse_host("device").unwrap().user, None);
        assert_eq!(parse_host("fe80::1"), None);
    }

    #[test]
    fn test_host_string_sets_user_and_port() {
        let target = with_host("pi@device:2222").normalize("t", &ctx()).unwrap();
        assert_eq!(target.remote.host, "device");
        assert_eq!(target.remote.username, "pi");
        assert_eq!(target.remote.port, 2222);
    }

    #[test]
    fn test_double_username_is_error() {
        let mut config = with_host("pi@device:2222");
        config.remote.username = Some("admin".to_string());
        assert!(matches!(
            config.normalize("t", &ctx()),
            Err(ConfigError::DuplicateUsername)
        ));
    }

    #[test]
    fn test_double_port_is_error() {
        let mut config = with_host("device:2222");
        config.remote.port = Some(22);
        assert!(matches!(
            config.normalize("t", &ctx()),
            Err(ConfigError::DuplicatePort)
        ));
    }

    #[test]
    fn test_port_out_of_range() {
        let err = with_host("device:70000").normalize("t", &ctx()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(ref p) if p == "70000"));
    }

    #[test]
    fn test_defaults() {
        let target = TargetConfig::default().normalize("raspberrypi", &ctx()).unwrap();
        assert_eq!(target.remote.host, "raspberrypi");
        assert_eq!(target.remote.username, "pi");
        assert_eq!(target.remote.port, 22);
        assert_eq!(target.remote.path, ".rdt/raspberrypi");
        assert_eq!(target.remote.auth, AuthMethod::None);
        assert_eq!(target.watch.glob, "**/*");
        assert_eq!(target.debounce, Duration::from_millis(200));
        assert!(target.dev_server.is_none());
    }

    #[test]
    fn test_ignore_union_keeps_user_entries_first() {
        let mut config = TargetConfig::default();
        config.watch.ignore = Some(IgnoreSetting::Many(vec![
            "dist/**".to_string(),
            "**/node_modules/**".to_string(),
        ]));
        let target = config.normalize("t", &ctx()).unwrap();
        assert_eq!(
            target.watch.ignore,
            vec![
                "dist/**",
                "**/node_modules/**",
                "**/.git/**",
                "**/package-lock.json",
                "**/yarn.lock",
                "**/rdt.log",
                "**/rdt.toml",
            ]
        );
    }

    #[test]
    fn test_tool_files_ignored_in_subdirectories() {
        let target = TargetConfig::default().normalize("t", &ctx()).unwrap();
        let patterns: Vec<glob::Pattern> = target
            .watch
            .ignore
            .iter()
            .map(|p| glob::Pattern::new(p).unwrap())
            .collect();
        for path in ["rdt.toml", "packages/web/rdt.toml", "rdt.log", "tools/rdt.log"] {
            assert!(patterns.iter().any(|p| p.matches(path)), "{} not ignored", path);
        }
        assert!(!patterns.iter().any(|p| p.matches("src/rdt.rs")));
    }

    #[test]
    fn test_ad_hoc_name_gives_safe_remote_path() {
        let target = TargetConfig::default()
            .normalize("pi@raspberrypi.local:2222", &ctx())
            .unwrap();
        assert_eq!(target.remote.path, ".rdt/pi_raspberrypi.local_2222");
    }

    #[test]
    fn test_debounce_forms() {
        assert_eq!(
            parse_debounce(&DebounceSetting::Millis(50)).unwrap(),
            Duration::from_millis(50)
        );
        assert_eq!(
            parse_debounce(&DebounceSetting::Text("1.5s".to_string())).unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(
            parse_debounce(&DebounceSetting::Text("300ms".to_string())).unwrap(),
            Duration::from_millis(300)
        );
        assert!(matches!(
            parse_debounce(&DebounceSetting::Text("soon".to_string())),
            Err(ConfigError::InvalidDebounce(_))
        ));
    }

    #[test]
    fn test_invalid_ignore_pattern() {
        let mut config = TargetConfig::default();
        config.watch.ignore = Some(IgnoreSetting::One("[".to_string()));
        assert!(matches!(
            config.normalize("t", &ctx()),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
