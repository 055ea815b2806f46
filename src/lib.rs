//! rdt - 远程开发工具
//!
//! 维持一条到远程设备的 SSH 会话，监视本地源码树，把变化同步到远程并调用部署钩子

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EnvConfig;
use crate::domain::Target;
use crate::infra::SshConnector;
use crate::services::{Hooks, Session, WatchOrchestrator};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(
    name = "rdt",
    version,
    about = "Keep a remote device in sync with a local source tree"
)]
pub struct Cli {
    /// Target name from the config file (defaults to the first target)
    pub target: Option<String>,

    /// Path to the config file (overrides RDT_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// 连接目标并监视 `root`，直到 Ctrl+C
pub async fn run(target: Target, env: &EnvConfig, hooks: Hooks, root: PathBuf) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let session = Session::new(
        target,
        Arc::new(SshConnector::new().with_ready_timeout(env.connect_timeout)),
        env.retry_interval,
        shutdown.clone(),
    );

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            signal.cancel();
        }
    });

    WatchOrchestrator::new(session, hooks, root).run().await
}
