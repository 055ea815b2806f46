//! 文件监视与部署编排
//!
//! 启动顺序：先枚举文件，开发服务器与连接并行启动；
//! 第一次连上后启动端口转发和逐文件监视。之后的断开/重连只触发钩子。

mod batch;
mod debounce;

pub use batch::DeployBatch;
pub use debounce::WatchedFile;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use glob::{MatchOptions, Pattern};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::domain::WatchOptions;
use crate::services::dev_server::DevServer;
use crate::services::hooks::Hooks;
use crate::services::session::{Session, SessionEvent};
use crate::services::tunnel::TunnelHandle;

use batch::run_batch_task;
use debounce::{classify, run_file_task, FileEvent, FileTaskContext};

/// 枚举项目根目录下匹配 glob 且未被忽略的文件，按路径排序
pub fn enumerate(root: &Path, watch: &WatchOptions) -> anyhow::Result<Vec<WatchedFile>> {
    let ignore = watch
        .ignore
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("invalid ignore pattern `{}`", p)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let pattern = format!(
        "{}/{}",
        Pattern::escape(&root.to_string_lossy()),
        watch.glob
    );
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let mut files = Vec::new();
    let entries = glob::glob_with(&pattern, options)
        .with_context(|| format!("invalid watch glob `{}`", watch.glob))?;
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let local_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if ignore.iter().any(|p| p.matches(&local_path)) {
            continue;
        }
        files.push(WatchedFile {
            local_path,
            absolute_path: path,
        });
    }

    files.sort_by(|a, b| a.local_path.cmp(&b.local_path));
    Ok(files)
}

/// 运行中的监视：原生 watcher 与全部文件任务，drop 时一并停止
struct FileWatchers {
    _watcher: RecommendedWatcher,
    _tasks: JoinSet<()>,
}

/// 事件路由：原生事件路径 -> 对应文件任务
async fn route_events(
    mut raw: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    routes: HashMap<PathBuf, mpsc::UnboundedSender<FileEvent>>,
) {
    while let Some(result) = raw.recv().await {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "File watch error");
                continue;
            }
        };
        for (index, path) in event.paths.iter().enumerate() {
            let Some(tx) = routes.get(path) else {
                continue;
            };
            if let Some(change_type) = classify(&event.kind, index) {
                let _ = tx.send(FileEvent {
                    change_type,
                    kind: event.kind.clone(),
                });
            }
        }
    }
}

/// 编排器
pub struct WatchOrchestrator {
    session: Arc<Session>,
    hooks: Hooks,
    root: PathBuf,
}

impl WatchOrchestrator {
    pub fn new(session: Arc<Session>, hooks: Hooks, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self {
            session,
            hooks,
            root,
        }
    }

    /// 运行直到会话关闭令牌被取消
    pub async fn run(self) -> anyhow::Result<()> {
        let target = self.session.target().clone();
        let shutdown = self.session.shutdown_token().clone();

        let files = enumerate(&self.root, &target.watch)?;
        info!(target = %target.name, files = files.len(), root = %self.root.display(), "Watching files");

        let dev_server = target.dev_server.clone().map(|options| {
            let server = DevServer::new(options, self.root.clone());
            tokio::spawn(server.run(shutdown.child_token()))
        });

        let mut events = self.session.subscribe();
        let connect = tokio::spawn(self.session.clone().connect_loop());

        let mut unstarted = Some(files);
        let mut watchers: Option<FileWatchers> = None;
        let mut forwards: Vec<TunnelHandle> = Vec::new();
        let mut failure = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(SessionEvent::Connected) => {
                        self.hooks.connected(&self.session).await;
                        if let Some(files) = unstarted.take() {
                            forwards = self.start_forwards().await;
                            match self.start_watching(files) {
                                Ok(started) => watchers = Some(started),
                                Err(e) => {
                                    error!(error = %format!("{:#}", e), "Failed to start file watcher");
                                    failure = Some(e);
                                    shutdown.cancel();
                                }
                            }
                        }
                    }
                    Ok(SessionEvent::Disconnected) => {
                        self.hooks.disconnected(&self.session).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed session events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        drop(watchers);
        for forward in forwards {
            forward.stop().await;
        }
        let _ = connect.await;

        // 关闭过程中的最后一次断开
        while let Ok(event) = events.try_recv() {
            if event == SessionEvent::Disconnected {
                self.hooks.disconnected(&self.session).await;
            }
        }

        if let Some(task) = dev_server {
            let _ = task.await;
        }
        info!(target = %target.name, "Stopped");

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn start_forwards(&self) -> Vec<TunnelHandle> {
        let mut handles = Vec::new();
        for route in &self.session.target().forwards {
            match self.session.forward().route(route.clone()).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(port = route.local_port, error = %e, "Failed to start port forward");
                }
            }
        }
        handles
    }

    fn start_watching(&self, files: Vec<WatchedFile>) -> anyhow::Result<FileWatchers> {
        let mut tasks = JoinSet::new();
        let debounce = self.session.target().debounce;

        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        tasks.spawn(run_batch_task(
            self.session.clone(),
            self.hooks.clone(),
            debounce,
            batch_rx,
        ));

        let ctx = Arc::new(FileTaskContext {
            session: self.session.clone(),
            hooks: self.hooks.clone(),
            debounce,
            batch: batch_tx,
        });

        let mut routes = HashMap::new();
        let mut dirs = BTreeSet::new();
        for file in files {
            let (tx, rx) = mpsc::unbounded_channel();
            routes.insert(file.absolute_path.clone(), tx);
            if let Some(dir) = file.absolute_path.parent() {
                dirs.insert(dir.to_path_buf());
            }
            tasks.spawn(run_file_task(file, rx, ctx.clone()));
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let _ = raw_tx.send(event);
        })
        .context("creating file watcher")?;

        // 监视父目录以便捕获编辑器的替换式保存
        for dir in &dirs {
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                warn!(dir = %dir.display(), error = %e, "Cannot watch directory");
            }
        }
        debug!(dirs = dirs.len(), files = routes.len(), "File watchers started");

        tasks.spawn(route_events(raw_rx, routes));

        Ok(FileWatchers {
            _watcher: watcher,
            _tasks: tasks,
        })
    }
}
