//! 单文件防抖
//!
//! 每个被监视的文件一个任务，状态显式保存在 `FileState` 里：
//! 每次触发重置截止时间，到期后调用 `on_file_changed`，钩子在本任务内执行，
//! 因此同一文件同一时刻至多一个调用

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::EventKind;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::ChangeType;
use crate::services::hooks::{ChangeInfo, FileChanged, Hooks};
use crate::services::session::Session;

use super::batch::BatchMsg;

/// 一个被监视的本地文件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedFile {
    /// 相对于项目根目录（`/` 分隔）
    pub local_path: String,
    pub absolute_path: PathBuf,
}

/// 路由给单个文件的事件
#[derive(Clone, Debug)]
pub(crate) struct FileEvent {
    pub change_type: ChangeType,
    pub kind: EventKind,
}

/// 原生事件映射为变更类型
///
/// `index` 是该路径在事件路径列表中的位置（重命名事件的来源在前）
pub(crate) fn classify(kind: &EventKind, index: usize) -> Option<ChangeType> {
    match kind {
        EventKind::Create(_) => Some(ChangeType::Add),
        EventKind::Remove(_) => Some(ChangeType::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeType::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeType::Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            Some(if index == 0 {
                ChangeType::Remove
            } else {
                ChangeType::Add
            })
        }
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => Some(ChangeType::Change),
        EventKind::Access(_) => None,
    }
}

struct Pending {
    deadline: Instant,
    change_type: ChangeType,
    event: Option<EventKind>,
}

/// 单个文件的防抖状态
#[derive(Default)]
struct FileState {
    pending: Option<Pending>,
    last_change: Option<ChangeType>,
}

/// 文件任务共享的上下文
pub(crate) struct FileTaskContext {
    pub session: Arc<Session>,
    pub hooks: Hooks,
    pub debounce: Duration,
    pub batch: mpsc::UnboundedSender<BatchMsg>,
}

impl FileTaskContext {
    fn trigger(
        &self,
        file: &WatchedFile,
        state: &mut FileState,
        change_type: ChangeType,
        event: Option<EventKind>,
    ) {
        state.pending = Some(Pending {
            deadline: Instant::now() + self.debounce,
            change_type,
            event,
        });
        let _ = self.batch.send(BatchMsg::Pending(file.local_path.clone()));
    }

    async fn fire(&self, file: &WatchedFile, pending: Pending) -> ChangeType {
        let meta = std::fs::metadata(&file.absolute_path).ok();
        let info = ChangeInfo {
            event: pending.event,
            size: meta.as_ref().map(|m| m.len()),
            modified: meta
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
        };

        let change_type = match pending.change_type {
            ChangeType::Change if info.size == Some(0) => ChangeType::Empty,
            other => other,
        };
        debug!(path = %file.local_path, change = %change_type, "File changed");

        let result = self
            .hooks
            .file_changed(FileChanged {
                session: self.session.clone(),
                local_path: file.local_path.clone(),
                absolute_path: file.absolute_path.clone(),
                change_type,
                info,
            })
            .await;

        let _ = self.batch.send(BatchMsg::Finished {
            path: file.local_path.clone(),
            result,
        });
        change_type
    }
}

/// 单个文件的监视循环
///
/// 启动时无条件触发一次，之后每个事件都重新触发；事件通道关闭时退出
pub(crate) async fn run_file_task(
    file: WatchedFile,
    mut events: mpsc::UnboundedReceiver<FileEvent>,
    ctx: Arc<FileTaskContext>,
) {
    let mut state = FileState::default();
    ctx.trigger(&file, &mut state, ChangeType::Change, None);

    loop {
        let deadline = state.pending.as_ref().map(|p| p.deadline);
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                ctx.trigger(&file, &mut state, event.change_type, Some(event.kind));
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(pending) = state.pending.take() {
                    let change_type = ctx.fire(&file, pending).await;
                    if state.last_change == Some(ChangeType::Remove) && change_type != ChangeType::Remove {
                        debug!(path = %file.local_path, "File reappeared");
                    }
                    state.last_change = Some(change_type);
                }
            }
        }
    }
}
