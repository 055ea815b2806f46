//! rdt - 远程开发工具
//!
//! Usage:
//! - First target in rdt.toml: `rdt`
//! - Named target: `rdt pi-zero`
//! - Ad-hoc host: `rdt pi@raspberrypi.local:2222`
//! - Custom config: `rdt --config deploy/rdt.toml`

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use rdt::config::{self, EnvConfig};
use rdt::{infra, services, Cli};

/// 配置错误的退出码
const CONFIG_ERROR_EXIT: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut env = EnvConfig::from_env();
    if let Some(path) = &cli.config {
        env.config_path = path.clone();
    }
    let _log_guard = infra::logging::init(&env);

    let target = match config::load_target(&env, cli.target.as_deref()) {
        Ok(target) => target,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    };

    let root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "Cannot determine project directory");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to create runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(rdt::run(target, &env, services::mirror_hooks(), root)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "rdt stopped with an error");
            ExitCode::FAILURE
        }
    }
}
