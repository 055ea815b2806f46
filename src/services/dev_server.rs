//! 本地开发服务器
//!
//! 与连接并行启动的外部命令（打包器 / watch 构建），输出逐行写日志

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::DevServerOptions;
use crate::infra::process::{LocalProcess, ProcessError};

pub struct DevServer {
    options: DevServerOptions,
    root: PathBuf,
}

impl DevServer {
    pub fn new(options: DevServerOptions, root: PathBuf) -> Self {
        Self { options, root }
    }

    /// 命令工作目录，相对路径基于项目根目录
    fn work_dir(&self) -> PathBuf {
        match &self.options.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.root.join(dir),
            None => self.root.clone(),
        }
    }

    /// 运行直到命令退出或被取消
    pub async fn run(self, cancel: CancellationToken) {
        let Some(command) = self.options.command.as_deref() else {
            debug!("No dev server command configured");
            return;
        };

        let work_dir = self.work_dir();
        info!(command = %command, dir = %work_dir.display(), "Starting dev server");

        match LocalProcess::run_shell(command, Some(&work_dir), &self.options.env, cancel).await {
            Ok(status) if status.success() => info!(command = %command, "Dev server exited"),
            Ok(status) => warn!(command = %command, code = ?status.code(), "Dev server exited with failure"),
            Err(ProcessError::Cancelled) => debug!(command = %command, "Dev server stopped"),
            Err(e) => error!(command = %command, error = %e, "Dev server failed"),
        }
    }
}
