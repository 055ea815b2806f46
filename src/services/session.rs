//! 远程会话
//!
//! 持有（至多一条）连接，负责连接重试循环，广播连接/断开事件，
//! 并把 fs / apt / systemd / node / platform / reduce_work / forward 组合成一个门面交给 hooks

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::Target;
use crate::error::{RemoteError, RemoteResult};
use crate::infra::command::{CommandOutput, CommandRunner, RunOptions};
use crate::infra::transport::{Connection, Connector};
use crate::services::apt::Apt;
use crate::services::node::Node;
use crate::services::platform::Platform;
use crate::services::reduce_work::ReduceWork;
use crate::services::remote_fs::RemoteFs;
use crate::services::systemd::Systemd;
use crate::services::tunnel::Forward;

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// 连接生命周期事件
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
}

/// 远程会话
pub struct Session {
    target: Target,
    connector: Arc<dyn Connector>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    retry_interval: Duration,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(
        target: Target,
        connector: Arc<dyn Connector>,
        retry_interval: Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            target,
            connector,
            connection: RwLock::new(None),
            state_tx,
            events,
            retry_interval,
            shutdown,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// 订阅连接/断开事件
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// 会话级关闭令牌
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// 当前连接
    pub async fn connection(&self) -> RemoteResult<Arc<dyn Connection>> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(RemoteError::NotConnected)
    }

    /// 执行远程命令
    pub async fn run(
        &self,
        command: &str,
        args: &[&str],
        opts: &RunOptions,
    ) -> RemoteResult<CommandOutput> {
        let conn = self.connection().await?;
        CommandRunner::run(conn.as_ref(), command, args, opts).await
    }

    pub fn fs(&self) -> RemoteFs<'_> {
        RemoteFs::new(self)
    }

    pub fn apt(&self) -> Apt<'_> {
        Apt::new(self)
    }

    pub fn node(&self) -> Node<'_> {
        Node::new(self)
    }

    pub fn systemd(&self) -> Systemd<'_> {
        Systemd::new(self)
    }

    pub fn platform(&self) -> Platform<'_> {
        Platform::new(self)
    }

    pub fn reduce_work(&self) -> ReduceWork<'_> {
        ReduceWork::new(self)
    }

    /// 端口转发（转发任务需要持有会话）
    pub fn forward(self: &Arc<Self>) -> Forward {
        Forward::new(self.clone())
    }

    /// 连接循环：失败后按固定间隔重试，断开后自动重连，直到关闭
    pub async fn connect_loop(self: Arc<Self>) {
        let remote = self.target.remote.describe();
        let mut failures = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.state_tx.send_replace(SessionState::Connecting);
            debug!(target = %self.target.name, remote = %remote, "Trying to connect...");

            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.connector.connect(&self.target.remote) => result,
            };

            match attempt {
                Ok(conn) => {
                    failures = 0;
                    *self.connection.write().await = Some(conn.clone());
                    self.state_tx.send_replace(SessionState::Connected);
                    info!(target = %self.target.name, remote = %remote, "Connected");
                    let _ = self.events.send(SessionEvent::Connected);

                    let stopping = tokio::select! {
                        _ = conn.closed() => false,
                        _ = self.shutdown.cancelled() => true,
                    };
                    if stopping {
                        conn.close().await;
                    }
                    self.handle_close(&conn).await;
                    if stopping {
                        break;
                    }
                }
                Err(e) => {
                    self.state_tx.send_replace(SessionState::Disconnected);
                    failures += 1;
                    if failures == 1 {
                        warn!(
                            target = %self.target.name,
                            error = %e,
                            retry_ms = self.retry_interval.as_millis() as u64,
                            "Connection failed. Retrying"
                        );
                    } else {
                        debug!(error = %e, attempt = failures, "Connection failed. Retrying");
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }

        self.state_tx.send_replace(SessionState::Disconnected);
        debug!(target = %self.target.name, "Connection loop stopped");
    }

    /// 处理连接关闭，同一连接只处理一次
    async fn handle_close(&self, conn: &Arc<dyn Connection>) -> bool {
        let mut current = self.connection.write().await;
        let is_current = current
            .as_ref()
            .map(|c| Arc::as_ptr(c) as *const () == Arc::as_ptr(conn) as *const ())
            .unwrap_or(false);
        if !is_current {
            return false;
        }
        *current = None;
        drop(current);

        self.state_tx.send_replace(SessionState::Disconnected);
        info!(target = %self.target.name, "Disconnected");
        let _ = self.events.send(SessionEvent::Disconnected);
        true
    }
}
