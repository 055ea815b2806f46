//! SSH 客户端连接
//!
//! 基于 russh 的 `Connector` / `Connection` 实现：
//! - 握手后按 `AuthMethod` 认证（密码 / 私钥 / agent）
//! - 命令走 exec 通道，SFTP 在连接建立时打开
//! - 端口转发走 direct-tcpip 通道

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tracing::{debug, info};

use crate::domain::{AuthMethod, RemoteOptions, TunnelRoute};
use crate::error::{RemoteError, RemoteResult};
use crate::infra::sftp::SftpFiles;
use crate::infra::transport::{Connection, Connector, FileTransfer, ForwardStream, OutputSink};

/// keepalive 间隔
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// 连续多少次 keepalive 无响应视为断开
const KEEPALIVE_MAX: usize = 3;

/// 轮询连接状态的间隔
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// TCP 连接、握手、认证和打开 SFTP 的总时限
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(20);

/// russh 客户端回调
struct ClientHandler {
    host: String,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // 开发板经常重装系统，不做 known_hosts 校验
    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting server key"
        );
        Ok(true)
    }
}

/// 通过 SSH 建立连接
#[derive(Clone, Debug)]
pub struct SshConnector {
    ready_timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl SshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置建立连接的时限
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn client_config() -> Arc<client::Config> {
        Arc::new(client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        })
    }

    async fn authenticate(
        handle: &mut Handle<ClientHandler>,
        remote: &RemoteOptions,
    ) -> RemoteResult<bool> {
        let user = remote.username.as_str();
        match &remote.auth {
            AuthMethod::Password(password) => handle
                .authenticate_password(user, password.as_str())
                .await
                .map_err(|e| RemoteError::Connect(e.to_string())),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = russh_keys::load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| RemoteError::Connect(format!("{}: {}", path.display(), e)))?;
                handle
                    .authenticate_publickey(user, Arc::new(key))
                    .await
                    .map_err(|e| RemoteError::Connect(e.to_string()))
            }
            AuthMethod::Agent(socket) => Self::authenticate_with_agent(handle, user, socket).await,
            AuthMethod::None => Err(RemoteError::NoAuthMethod),
        }
    }

    #[cfg(unix)]
    async fn authenticate_with_agent(
        handle: &mut Handle<ClientHandler>,
        user: &str,
        socket: &str,
    ) -> RemoteResult<bool> {
        let agent = russh_keys::agent::client::AgentClient::connect_uds(socket)
            .await
            .map_err(|e| RemoteError::Connect(format!("ssh agent {}: {}", socket, e)))?;
        Self::try_agent_identities(handle, user, agent).await
    }

    #[cfg(windows)]
    async fn authenticate_with_agent(
        handle: &mut Handle<ClientHandler>,
        user: &str,
        socket: &str,
    ) -> RemoteResult<bool> {
        let pipe = tokio::net::windows::named_pipe::ClientOptions::new()
            .open(socket)
            .map_err(|e| RemoteError::Connect(format!("ssh agent {}: {}", socket, e)))?;
        let agent = russh_keys::agent::client::AgentClient::connect(pipe);
        Self::try_agent_identities(handle, user, agent).await
    }

    /// 依次尝试 agent 中的每个公钥
    async fn try_agent_identities<S>(
        handle: &mut Handle<ClientHandler>,
        user: &str,
        mut agent: russh_keys::agent::client::AgentClient<S>,
    ) -> RemoteResult<bool>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let identities = agent
            .request_identities()
            .await
            .map_err(|e| RemoteError::Connect(format!("ssh agent: {}", e)))?;
        debug!(count = identities.len(), "Agent identities loaded");

        for key in identities {
            let (returned, result) = handle.authenticate_future(user, key, agent).await;
            agent = returned;
            match result {
                Ok(true) => return Ok(true),
                Ok(false) => continue,
                Err(e) => return Err(RemoteError::Connect(format!("ssh agent: {}", e))),
            }
        }
        Ok(false)
    }
}

impl SshConnector {
    async fn establish(&self, remote: &RemoteOptions) -> RemoteResult<SshConnection> {
        let handler = ClientHandler {
            host: remote.host.clone(),
        };
        let mut handle = client::connect(
            Self::client_config(),
            (remote.host.as_str(), remote.port),
            handler,
        )
        .await
        .map_err(|e| RemoteError::Connect(e.to_string()))?;

        if !Self::authenticate(&mut handle, remote).await? {
            return Err(RemoteError::AuthRejected {
                user: remote.username.clone(),
                host: remote.host.clone(),
            });
        }

        let mut sftp_channel = handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;
        sftp_channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;
        let files = SftpFiles::open(sftp_channel.into_stream()).await?;

        Ok(SshConnection {
            handle,
            files: Arc::new(files),
        })
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, remote: &RemoteOptions) -> RemoteResult<Arc<dyn Connection>> {
        debug!(remote = %remote.describe(), auth = remote.auth.kind(), "Connecting");

        let conn = tokio::time::timeout(self.ready_timeout, self.establish(remote))
            .await
            .map_err(|_| RemoteError::ConnectTimeout {
                remote: remote.describe(),
                timeout: self.ready_timeout,
            })??;

        info!(remote = %remote.describe(), "SSH connection established");
        Ok(Arc::new(conn))
    }
}

/// 一条已认证的 SSH 连接
pub struct SshConnection {
    handle: Handle<ClientHandler>,
    files: Arc<SftpFiles>,
}

impl SshConnection {
    async fn open_session(&self) -> RemoteResult<Channel<Msg>> {
        if self.handle.is_closed() {
            return Err(RemoteError::NotConnected);
        }
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(&self, command_line: &str, sink: &mut (dyn OutputSink + Send)) -> RemoteResult<u32> {
        let mut channel = self.open_session().await?;
        channel
            .exec(true, command_line)
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;

        let mut exit_code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => sink.stdout(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => sink.stderr(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    debug!(command = %command_line, signal = ?signal_name, "Remote command killed by signal");
                }
                _ => {}
            }
        }

        exit_code.ok_or_else(|| {
            RemoteError::Channel(format!("channel closed without exit status: {}", command_line))
        })
    }

    fn files(&self) -> Arc<dyn FileTransfer> {
        self.files.clone()
    }

    async fn forward_out(&self, route: &TunnelRoute) -> RemoteResult<Box<dyn ForwardStream>> {
        if self.handle.is_closed() {
            return Err(RemoteError::NotConnected);
        }
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                route.target_host.as_str(),
                u32::from(route.target_port),
                route.source_host.as_str(),
                u32::from(route.source_port),
            )
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn closed(&self) {
        while !self.handle.is_closed() {
            tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
        }
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(error = %e, "Disconnect failed");
        }
    }
}
