//! 部署钩子
//!
//! 四个钩子都是可选的异步闭包，缺失时只记 debug 日志；
//! 钩子的错误和 panic 都在分发处截获并记录，不会影响监视循环

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error};

use crate::domain::{ChangeType, FileChangeResult};
use crate::services::session::Session;

/// 钩子返回的 future
pub type HookFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// 单个钩子
pub type Hook<A, T> = Arc<dyn Fn(A) -> HookFuture<T> + Send + Sync>;

/// 底层文件事件信息
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeInfo {
    /// 触发的原生事件，启动时的首次触发为 `None`
    pub event: Option<notify::EventKind>,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// `on_file_changed` 的参数
#[derive(Clone)]
pub struct FileChanged {
    pub session: Arc<Session>,
    /// 相对于项目根目录的路径（`/` 分隔）
    pub local_path: String,
    /// 本地绝对路径
    pub absolute_path: PathBuf,
    pub change_type: ChangeType,
    pub info: ChangeInfo,
}

impl FileChanged {
    /// 该文件在远程工作目录下的路径
    pub fn remote_path(&self) -> String {
        self.session.target().remote_path_for(&self.local_path)
    }
}

/// `on_deployed` 的参数
#[derive(Clone)]
pub struct Deployed {
    pub session: Arc<Session>,
    pub changed_files: Vec<String>,
}

/// 钩子集合
#[derive(Clone, Default)]
pub struct Hooks {
    on_connected: Option<Hook<Arc<Session>, ()>>,
    on_disconnected: Option<Hook<Arc<Session>, ()>>,
    on_file_changed: Option<Hook<FileChanged, FileChangeResult>>,
    on_deployed: Option<Hook<Deployed, ()>>,
}

fn boxed<A, T, F, Fut>(f: F) -> Hook<A, T>
where
    A: 'static,
    T: 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_connected = Some(boxed(f));
        self
    }

    pub fn on_disconnected<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_disconnected = Some(boxed(f));
        self
    }

    pub fn on_file_changed<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FileChanged) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<FileChangeResult>> + Send + 'static,
    {
        self.on_file_changed = Some(boxed(f));
        self
    }

    pub fn on_deployed<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Deployed) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_deployed = Some(boxed(f));
        self
    }

    pub async fn connected(&self, session: &Arc<Session>) {
        dispatch("on_connected", self.on_connected.as_ref(), session.clone()).await;
    }

    pub async fn disconnected(&self, session: &Arc<Session>) {
        dispatch("on_disconnected", self.on_disconnected.as_ref(), session.clone()).await;
    }

    /// 钩子缺失或失败时返回 `None`
    pub async fn file_changed(&self, args: FileChanged) -> Option<FileChangeResult> {
        dispatch("on_file_changed", self.on_file_changed.as_ref(), args).await
    }

    pub async fn deployed(&self, session: &Arc<Session>, changed_files: Vec<String>) {
        let args = Deployed {
            session: session.clone(),
            changed_files,
        };
        dispatch("on_deployed", self.on_deployed.as_ref(), args).await;
    }
}

/// 调用钩子，截获错误与 panic
async fn dispatch<A: 'static, T: 'static>(
    name: &'static str,
    hook: Option<&Hook<A, T>>,
    args: A,
) -> Option<T> {
    let Some(hook) = hook else {
        debug!(hook = name, "No hook registered");
        return None;
    };

    match AssertUnwindSafe(hook(args)).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(hook = name, error = %format!("{:#}", e), "Hook failed");
            None
        }
        Err(_) => {
            error!(hook = name, "Hook panicked");
            None
        }
    }
}
