//! SFTP 文件传输
//!
//! russh-sftp 会话上的 `FileTransfer` 实现，错误码映射到 `RemoteError`

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{RemoteError, RemoteResult};
use crate::infra::transport::{FileKind, FileTransfer};

pub struct SftpFiles {
    session: SftpSession,
}

impl SftpFiles {
    pub async fn open<S>(stream: S) -> RemoteResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = SftpSession::new(stream)
            .await
            .map_err(|e| RemoteError::Channel(format!("sftp: {}", e)))?;
        Ok(Self { session })
    }
}

/// SFTP 状态码转换为领域错误
fn map_err(path: &str, err: SftpError) -> RemoteError {
    match err {
        SftpError::Status(ref status) => match status.status_code {
            StatusCode::NoSuchFile => RemoteError::NotFound(path.to_string()),
            StatusCode::PermissionDenied => RemoteError::PermissionDenied(path.to_string()),
            _ => RemoteError::Sftp {
                path: path.to_string(),
                message: status.error_message.clone(),
            },
        },
        other => RemoteError::Sftp {
            path: path.to_string(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl FileTransfer for SftpFiles {
    async fn read(&self, path: &str) -> RemoteResult<Vec<u8>> {
        self.session.read(path).await.map_err(|e| map_err(path, e))
    }

    async fn write(&self, path: &str, data: &[u8]) -> RemoteResult<()> {
        let mut file = self.session.create(path).await.map_err(|e| map_err(path, e))?;
        file.write_all(data).await?;
        file.shutdown().await?;
        Ok(())
    }

    async fn unlink(&self, path: &str) -> RemoteResult<()> {
        self.session
            .remove_file(path)
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn stat(&self, path: &str) -> RemoteResult<Option<FileKind>> {
        match self.session.metadata(path).await {
            Ok(meta) => {
                let kind = if meta.is_dir() {
                    FileKind::Directory
                } else if meta.is_regular() {
                    FileKind::File
                } else if meta.is_symlink() {
                    FileKind::Symlink
                } else {
                    FileKind::Other
                };
                Ok(Some(kind))
            }
            Err(e) => match map_err(path, e) {
                RemoteError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn mkdir(&self, path: &str) -> RemoteResult<()> {
        self.session
            .create_dir(path)
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn read_link(&self, path: &str) -> RemoteResult<String> {
        self.session
            .read_link(path)
            .await
            .map_err(|e| map_err(path, e))
    }

    /// OpenSSH 的 sftp-server 按 (target, link) 顺序读取 SYMLINK 的两个字段，与协议草案相反
    async fn symlink(&self, path: &str, target: &str) -> RemoteResult<()> {
        self.session
            .symlink(target, path)
            .await
            .map_err(|e| map_err(path, e))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use russh_sftp::protocol::{Status, StatusCode};

    use super::*;

    /// 记录收到的 SYMLINK 字段
    #[derive(Clone, Default)]
    struct SymlinkRecorder {
        seen: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl russh_sftp::server::Handler for SymlinkRecorder {
        type Error = StatusCode;

        fn unimplemented(&self) -> Self::Error {
            StatusCode::OpUnsupported
        }

        async fn symlink(
            &mut self,
            id: u32,
            linkpath: String,
            targetpath: String,
        ) -> Result<Status, Self::Error> {
            self.seen.lock().unwrap().push((linkpath, targetpath));
            Ok(Status {
                id,
                status_code: StatusCode::Ok,
                error_message: "Ok".to_string(),
                language_tag: "en-US".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_symlink_uses_openssh_field_order() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let recorder = SymlinkRecorder::default();
        russh_sftp::server::run(server, recorder.clone()).await;

        let files = SftpFiles::open(client).await.unwrap();
        files.symlink("current", "releases/v2").await.unwrap();

        // OpenSSH 把第一个字段当作链接内容，第二个当作新建的链接
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![("releases/v2".to_string(), "current".to_string())]
        );
    }
}
