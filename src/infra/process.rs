//! 本地进程执行器
//!
//! 用于开发服务器等本地外部命令：
//! - stdout/stderr 按行写入日志
//! - 取消时终止进程

use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::infra::command::OutputStream;

/// 本地进程错误
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Command was cancelled")]
    Cancelled,

    #[error("Failed to wait for command: {0}")]
    WaitFailed(#[source] std::io::Error),
}

pub struct LocalProcess;

impl LocalProcess {
    /// 通过系统 shell 执行命令，输出逐行写日志
    pub async fn run_shell(
        command: &str,
        work_dir: Option<&Path>,
        env: &BTreeMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<ExitStatus, ProcessError> {
        let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };

        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(command)
            .envs(env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(ProcessError::SpawnFailed)?;

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(log_lines(command.to_string(), OutputStream::Stdout, out)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(log_lines(command.to_string(), OutputStream::Stderr, err)));

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(process = %command, "Process cancelled, killing it");
                let _ = child.kill().await;
                Err(ProcessError::Cancelled)
            }
            status = child.wait() => status.map_err(ProcessError::WaitFailed),
        };

        // 取消时孙进程可能仍持有管道，不等待日志读取
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            if result.is_err() {
                task.abort();
            } else {
                let _ = task.await;
            }
        }

        result
    }
}

async fn log_lines<R>(command: String, stream: OutputStream, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match stream {
            OutputStream::Stdout => info!(process = %command, "{}", line),
            OutputStream::Stderr => warn!(process = %command, "{}", line),
        }
    }
}
