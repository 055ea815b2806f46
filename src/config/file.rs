//! 配置文件加载
//!
//! `rdt.toml` 结构：
//!
//! ```toml
//! [shared]
//! debounce = 200
//!
//! [targets.pi]
//! remote = { host = "pi@raspberrypi.local" }
//! ports = [3000]
//! ```
//!
//! `[shared]` 作为底层，目标自己的表逐层覆盖

use std::path::Path;

use toml::{Table, Value};
use tracing::{debug, info};

use crate::config::target::TargetConfig;
use crate::error::ConfigError;

/// 解析后的配置文件
#[derive(Clone, Debug, Default)]
pub struct ConfigFile {
    shared: Table,
    /// 保持文件中的声明顺序
    targets: Vec<(String, Table)>,
}

impl ConfigFile {
    /// 读取配置文件；文件不存在时返回空配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let shown = path.display().to_string();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %shown, "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: shown,
                    source,
                })
            }
        };

        info!(path = %shown, "Loading config...");
        let config = Self::parse(&text, &shown)?;
        info!(targets = config.targets.len(), "Config loaded");
        Ok(config)
    }

    /// 从文本解析
    pub fn parse(text: &str, path: &str) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_string(),
            message,
        };

        let mut root: Table = text.parse().map_err(|e: toml::de::Error| parse_err(e.to_string()))?;

        let shared = match root.remove("shared") {
            None => Table::new(),
            Some(Value::Table(table)) => table,
            Some(_) => return Err(parse_err("`shared` must be a table".to_string())),
        };

        let targets = match root.remove("targets") {
            None => Vec::new(),
            Some(Value::Table(table)) => table
                .into_iter()
                .map(|(name, value)| match value {
                    Value::Table(t) => Ok((name, t)),
                    _ => Err(parse_err(format!("`targets.{}` must be a table", name))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(parse_err("`targets` must be a table".to_string())),
        };

        // 旧版本配置文件的版本号，目前只接受并忽略
        root.remove("version");
        if let Some(key) = root.keys().next() {
            return Err(parse_err(format!("unknown top-level key `{}`", key)));
        }

        Ok(Self { shared, targets })
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// 选择目标：指定名称，或文件中的第一个
    ///
    /// 指定的名称不在文件中时，得到一个只带共享配置、主机名等于该名称的临时目标
    pub fn select(&self, name: Option<&str>) -> Result<(String, TargetConfig), ConfigError> {
        let (name, own) = match name {
            Some(name) => {
                let own = self
                    .targets
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, t)| t.clone());
                if own.is_none() {
                    info!(target = %name, "Target not in config file, using it as host name");
                }
                (name.to_string(), own.unwrap_or_default())
            }
            None => match self.targets.first() {
                Some((name, table)) => (name.clone(), table.clone()),
                None => return Err(ConfigError::NoTarget),
            },
        };

        let mut merged = self.shared.clone();
        merge_tables(&mut merged, own);

        let config = Value::Table(merged)
            .try_into::<TargetConfig>()
            .map_err(|e| ConfigError::Parse {
                path: format!("targets.{}", name),
                message: e.to_string(),
            })?;

        Ok((name, config))
    }
}

/// 深度合并：表逐键递归，其他值整体覆盖
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
