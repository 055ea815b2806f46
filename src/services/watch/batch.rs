//! 部署批次
//!
//! 由单个任务独占，通过消息接收各文件任务的进度。
//! 只有在没有文件处于等待或执行钩子的状态、且静默了一个防抖窗口后才交给 `on_deployed`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::FileChangeResult;
use crate::services::hooks::Hooks;
use crate::services::session::Session;

/// 文件任务发给批次任务的消息
#[derive(Debug)]
pub(crate) enum BatchMsg {
    /// 文件被触发，防抖计时中
    Pending(String),
    /// 文件钩子执行完毕
    Finished {
        path: String,
        result: Option<FileChangeResult>,
    },
}

/// 上次交付以来远程被修改的路径
#[derive(Debug, Default)]
pub struct DeployBatch {
    changed: Vec<String>,
    outstanding: HashSet<String>,
}

impl DeployBatch {
    fn apply(&mut self, msg: BatchMsg) {
        match msg {
            BatchMsg::Pending(path) => {
                self.outstanding.insert(path);
            }
            BatchMsg::Finished { path, result } => {
                self.outstanding.remove(&path);
                match result {
                    Some(FileChangeResult::Blob(data)) => {
                        debug!(path = %path, bytes = data.len(), "Hook produced a blob");
                    }
                    Some(result) => {
                        for file in result.changed_files() {
                            if !self.changed.contains(file) {
                                self.changed.push(file.clone());
                            }
                        }
                    }
                    None => {}
                }
            }
        }
    }

    /// 可以交付：没有未完成的文件且批次非空
    pub fn ready(&self) -> bool {
        self.outstanding.is_empty() && !self.changed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// 取走当前批次
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.changed)
    }
}

/// 批次任务
///
/// 每条消息都会推迟交付时间；`on_deployed` 在本任务内执行，同一时刻至多一个批次在交付
pub(crate) async fn run_batch_task(
    session: Arc<Session>,
    hooks: Hooks,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<BatchMsg>,
) {
    let mut batch = DeployBatch::default();
    let mut flush_at: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                batch.apply(msg);
                flush_at = Some(Instant::now() + debounce);
            }
            _ = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                flush_at = None;
                // 仍有文件未完成时由其完成消息重新计时
                if batch.ready() {
                    let files = batch.take();
                    info!(target = %session.name(), files = files.len(), "Deploying changes");
                    hooks.deployed(&session, files).await;
                }
            }
        }
    }

    debug!(pending = !batch.is_empty(), "Batch task stopped");
}
