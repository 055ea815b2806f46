//! 传输层抽象
//!
//! `Session` 只通过这些 trait 使用连接，SSH 实现在 `infra::ssh`，
//! 测试使用 `infra::testing` 中的内存实现

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::{RemoteOptions, TunnelRoute};
use crate::error::RemoteResult;

/// 命令输出接收端，按数据块回调
pub trait OutputSink {
    fn stdout(&mut self, chunk: &[u8]);
    fn stderr(&mut self, chunk: &[u8]);
}

/// 转发通道的双向字节流
pub trait ForwardStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ForwardStream for T {}

/// 远程路径类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// 文件传输子通道（SFTP）
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// 读取文件内容，不存在时返回 `NotFound`
    async fn read(&self, path: &str) -> RemoteResult<Vec<u8>>;

    /// 写入文件（创建或截断）
    async fn write(&self, path: &str, data: &[u8]) -> RemoteResult<()>;

    /// 删除文件
    async fn unlink(&self, path: &str) -> RemoteResult<()>;

    /// 查询路径类型，不存在时返回 `None`（跟随符号链接）
    async fn stat(&self, path: &str) -> RemoteResult<Option<FileKind>>;

    /// 创建单级目录
    async fn mkdir(&self, path: &str) -> RemoteResult<()>;

    /// 读取符号链接目标，不存在时返回 `NotFound`
    async fn read_link(&self, path: &str) -> RemoteResult<String>;

    /// 创建符号链接 `path -> target`
    async fn symlink(&self, path: &str, target: &str) -> RemoteResult<()>;
}

/// 一条已认证的远程连接
#[async_trait]
pub trait Connection: Send + Sync {
    /// 执行一条完整命令行，返回退出码
    async fn exec(&self, command_line: &str, sink: &mut (dyn OutputSink + Send)) -> RemoteResult<u32>;

    /// 文件传输子通道
    fn files(&self) -> Arc<dyn FileTransfer>;

    /// 打开 direct-tcpip 转发通道
    async fn forward_out(&self, route: &TunnelRoute) -> RemoteResult<Box<dyn ForwardStream>>;

    /// 连接关闭时返回
    async fn closed(&self);

    /// 主动断开
    async fn close(&self);
}

/// 连接工厂，每次调用完成一次握手和认证
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, remote: &RemoteOptions) -> RemoteResult<Arc<dyn Connection>>;
}
