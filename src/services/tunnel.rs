//! 本地端口转发
//!
//! 本地监听，每个接入的连接通过会话打开一条 direct-tcpip 通道，双向拷贝直到任一侧关闭

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{ForwardSpec, TunnelRoute};
use crate::error::TunnelError;
use crate::services::session::Session;

/// 运行中的转发
pub struct TunnelHandle {
    route: TunnelRoute,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TunnelHandle {
    pub fn route(&self) -> &TunnelRoute {
        &self.route
    }

    /// 实际监听地址（端口为 0 时由系统分配）
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止监听，已建立的连接不受影响
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

pub struct TunnelServer;

impl TunnelServer {
    /// 绑定本地端口并开始接受连接
    pub async fn start(
        session: Arc<Session>,
        route: TunnelRoute,
        cancel: CancellationToken,
    ) -> Result<TunnelHandle, TunnelError> {
        let addr = route.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TunnelError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TunnelError::Bind { addr, source })?;

        info!(
            local = %local_addr,
            target = %route.target_addr(),
            "Port forward listening"
        );

        let task = tokio::spawn(run_accept_loop(
            session,
            route.clone(),
            listener,
            cancel.clone(),
        ));

        Ok(TunnelHandle {
            route,
            local_addr,
            cancel,
            task,
        })
    }
}

/// 接受连接循环
async fn run_accept_loop(
    session: Arc<Session>,
    route: TunnelRoute,
    listener: TcpListener,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(port = route.local_port, "Port forward shutdown");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, target = %route.target_addr(), "New forwarded connection");
                        tokio::spawn(handle_connection(session.clone(), route.clone(), stream, peer));
                    }
                    Err(e) => {
                        error!(port = route.local_port, error = %e, "Accept error");
                    }
                }
            }
        }
    }
}

/// 处理单个连接
async fn handle_connection(
    session: Arc<Session>,
    route: TunnelRoute,
    mut inbound: TcpStream,
    peer: SocketAddr,
) {
    let conn = match session.connection().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Cannot forward connection");
            return;
        }
    };

    let mut outbound = match conn.forward_out(&route).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(peer = %peer, target = %route.target_addr(), error = %e, "Failed to open forward channel");
            return;
        }
    };

    let _ = forward_streams(&mut inbound, &mut outbound, peer, &route).await;
}

/// 拷贝缓冲大小
const COPY_BUF_SIZE: usize = 16 * 1024;

/// 出错的一侧
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    /// 本地接入的连接
    Inbound,
    /// 远程通道
    Outbound,
}

#[derive(Debug)]
struct ForwardFailure {
    side: Side,
    source: io::Error,
}

impl ForwardFailure {
    /// 本地客户端重置连接属于正常关闭
    fn is_inbound_reset(&self) -> bool {
        self.side == Side::Inbound && self.source.kind() == ErrorKind::ConnectionReset
    }
}

/// 双向拷贝并记录结果；非正常关闭时关闭远程一侧
async fn forward_streams<A, B>(
    inbound: &mut A,
    outbound: &mut B,
    peer: SocketAddr,
    route: &TunnelRoute,
) -> Result<(u64, u64), ForwardFailure>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let result = pump(inbound, outbound).await;
    match &result {
        Ok((sent, received)) => {
            debug!(peer = %peer, sent, received, "Forwarded connection closed");
        }
        Err(failure) if failure.is_inbound_reset() => {
            debug!(peer = %peer, "Forwarded connection reset");
        }
        Err(failure) => {
            error!(
                peer = %peer,
                target = %route.target_addr(),
                side = ?failure.side,
                error = %failure.source,
                "Forwarding error"
            );
            if let Err(e) = outbound.shutdown().await {
                debug!(peer = %peer, error = %e, "Failed to shut down forward channel");
            }
        }
    }
    result
}

/// 两个方向同时拷贝，任一方向出错即停止
async fn pump<A, B>(inbound: &mut A, outbound: &mut B) -> Result<(u64, u64), ForwardFailure>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let (mut in_read, mut in_write) = tokio::io::split(inbound);
    let (mut out_read, mut out_write) = tokio::io::split(outbound);

    let upstream = copy_half(&mut in_read, Side::Inbound, &mut out_write, Side::Outbound);
    let downstream = copy_half(&mut out_read, Side::Outbound, &mut in_write, Side::Inbound);
    tokio::try_join!(upstream, downstream)
}

async fn copy_half<R, W>(
    reader: &mut R,
    from: Side,
    writer: &mut W,
    to: Side,
) -> Result<u64, ForwardFailure>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let failed = |side: Side| move |source: io::Error| ForwardFailure { side, source };

    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(failed(from))?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await.map_err(failed(to))?;
        total += n as u64;
    }
    writer.shutdown().await.map_err(failed(to))?;
    Ok(total)
}

/// 会话门面上的 `forward`
pub struct Forward {
    session: Arc<Session>,
}

impl Forward {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// 把本地端口转发到远程侧的 `target:port`
    ///
    /// 省略的参数：目标 `localhost`，本地端口同 `port`，绑定 `127.0.0.1`，
    /// 来源地址 `127.0.0.1`，来源端口同本地端口
    pub async fn to_remote_target(
        &self,
        port: u16,
        target: Option<&str>,
        local_port: Option<u16>,
        bind_ip: Option<&str>,
        source_ip: Option<&str>,
        source_port: Option<u16>,
    ) -> Result<TunnelHandle, TunnelError> {
        let route = ForwardSpec::Detailed {
            port,
            target: target.map(str::to_string),
            local_port,
            bind: bind_ip.map(str::to_string),
            source_host: source_ip.map(str::to_string),
            source_port,
        }
        .into_route();
        self.route(route).await
    }

    pub async fn route(&self, route: TunnelRoute) -> Result<TunnelHandle, TunnelError> {
        let cancel = self.session.shutdown_token().child_token();
        TunnelServer::start(self.session.clone(), route, cancel).await
    }
}
