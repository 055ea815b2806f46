//! 配置模块
//!
//! 环境变量、配置文件、目标规范化

pub mod auth;
pub mod env;
pub mod file;
pub mod target;

pub use env::EnvConfig;
pub use file::ConfigFile;
pub use target::{NormalizeContext, TargetConfig};

use crate::domain::Target;
use crate::error::ConfigError;

/// 加载配置文件并规范化选中的目标
pub fn load_target(env: &EnvConfig, name: Option<&str>) -> Result<Target, ConfigError> {
    let file = ConfigFile::load(&env.config_path)?;
    let (name, raw) = file.select(name)?;

    let ctx = NormalizeContext {
        log_files: env.log_file.iter().cloned().collect(),
        config_file: Some(env.config_file_name()),
        auth_env: auth::AuthEnv::from_system(),
    };
    raw.normalize(&name, &ctx)
}
