//! 远程文件系统
//!
//! 幂等写入：内容相同时不写；权限不足且允许 sudo 时，先写临时文件再 `sudo mv`

use tracing::{debug, warn};

use crate::error::{RemoteError, RemoteResult};
use crate::infra::command::RunOptions;
use crate::infra::transport::FileKind;
use crate::services::session::Session;

/// sudo 回退时临时文件所在目录
const TEMP_DIR: &str = "/tmp";

pub struct RemoteFs<'a> {
    session: &'a Session,
}

impl<'a> RemoteFs<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// 读取文件
    pub async fn read_file(&self, path: &str) -> RemoteResult<Vec<u8>> {
        let files = self.session.connection().await?.files();
        files.read(path).await
    }

    /// 直接写入文件（不比较、不建目录）
    pub async fn write_file(&self, path: &str, data: &[u8]) -> RemoteResult<()> {
        let files = self.session.connection().await?.files();
        files.write(path, data).await
    }

    /// 删除文件
    pub async fn unlink(&self, path: &str) -> RemoteResult<()> {
        let files = self.session.connection().await?.files();
        files.unlink(path).await
    }

    /// 确保 `path` 的父目录存在
    pub async fn mkdir_for(&self, path: &str, sudo: bool) -> RemoteResult<()> {
        match parent_dir(path) {
            Some(dir) => self.mkdir_p(&dir, sudo).await,
            None => Ok(()),
        }
    }

    /// 逐级 stat-then-mkdir
    async fn mkdir_p(&self, dir: &str, sudo: bool) -> RemoteResult<()> {
        let files = self.session.connection().await?.files();

        // 从目标往上找到第一个已存在的祖先
        let mut missing = Vec::new();
        let mut current = Some(dir.to_string());
        while let Some(path) = current {
            match files.stat(&path).await? {
                Some(FileKind::Directory) => break,
                Some(_) => return Err(RemoteError::NotADirectory(path)),
                None => {
                    current = parent_dir(&path);
                    missing.push(path);
                }
            }
        }

        for path in missing.iter().rev() {
            match files.mkdir(path).await {
                Ok(()) => debug!(path = %path, "Created directory"),
                Err(e) if e.is_permission_denied() && sudo => {
                    debug!(path = %dir, "Permission denied, creating directory with sudo");
                    self.session
                        .run("mkdir", &["-p", dir], &RunOptions::new().sudo(true))
                        .await?;
                    return Ok(());
                }
                Err(e) => {
                    // 并发创建时目录可能已经存在
                    if files.stat(path).await? == Some(FileKind::Directory) {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// 确保文件内容为 `content`；`None` 表示删除
    ///
    /// 返回是否有改动
    pub async fn ensure_file_is(
        &self,
        path: &str,
        content: Option<&[u8]>,
        sudo: bool,
    ) -> RemoteResult<bool> {
        let files = self.session.connection().await?.files();

        let content = match content {
            Some(content) => content,
            None => {
                match files.unlink(path).await {
                    Ok(()) => debug!(path = %path, "Removed file"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) if e.is_permission_denied() && sudo => {
                        self.session
                            .run("rm", &["-f", path], &RunOptions::new().sudo(true))
                            .await?;
                    }
                    Err(e) => return Err(e),
                }
                return Ok(true);
            }
        };

        match files.read(path).await {
            Ok(current) if current == content => {
                debug!(path = %path, "File unchanged");
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            // 无权读取时当作内容不同，交给写入逻辑处理
            Err(e) if e.is_permission_denied() && sudo => {}
            Err(e) => return Err(e),
        }

        self.mkdir_for(path, sudo).await?;

        match files.write(path, content).await {
            Ok(()) => {}
            Err(e) if e.is_permission_denied() && sudo => {
                debug!(path = %path, "Permission denied, writing with sudo");
                self.write_with_sudo(path, content).await?;
            }
            Err(e) => return Err(e),
        }

        debug!(path = %path, bytes = content.len(), "File written");
        Ok(true)
    }

    /// 写临时文件后 `sudo mv` 到目标位置
    async fn write_with_sudo(&self, path: &str, content: &[u8]) -> RemoteResult<()> {
        let files = self.session.connection().await?.files();
        let temp = format!("{}/rdt-{}", TEMP_DIR, uuid::Uuid::new_v4());

        files.write(&temp, content).await?;

        let moved = self
            .session
            .run("mv", &[&temp, path], &RunOptions::new().sudo(true))
            .await;

        if let Err(e) = moved {
            if let Err(cleanup) = files.unlink(&temp).await {
                warn!(path = %temp, error = %cleanup, "Failed to remove temp file");
            }
            return Err(e);
        }
        Ok(())
    }

    /// 确保 `path` 是指向 `target` 的符号链接
    ///
    /// 返回是否有改动
    pub async fn ensure_file_is_link(
        &self,
        path: &str,
        target: &str,
        sudo: bool,
    ) -> RemoteResult<bool> {
        let files = self.session.connection().await?.files();

        match files.read_link(path).await {
            Ok(current) if current == target => {
                debug!(path = %path, target = %target, "Link unchanged");
                return Ok(false);
            }
            Ok(_) => self.remove_existing(path, sudo).await?,
            Err(e) if e.is_not_found() => {}
            // 存在但不是链接
            Err(RemoteError::Sftp { .. }) => self.remove_existing(path, sudo).await?,
            Err(e) if e.is_permission_denied() && sudo => {}
            Err(e) => return Err(e),
        }

        self.mkdir_for(path, sudo).await?;

        match files.symlink(path, target).await {
            Ok(()) => {}
            Err(e) if e.is_permission_denied() && sudo => {
                self.session
                    .run("ln", &["-sfn", target, path], &RunOptions::new().sudo(true))
                    .await?;
            }
            Err(e) => return Err(e),
        }

        debug!(path = %path, target = %target, "Link created");
        Ok(true)
    }

    async fn remove_existing(&self, path: &str, sudo: bool) -> RemoteResult<()> {
        let files = self.session.connection().await?.files();
        match files.unlink(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            // sudo 回退时 `ln -sfn` 会覆盖
            Err(e) if e.is_permission_denied() && sudo => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// 父目录，没有父目录时返回 `None`
fn parent_dir(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        None | Some(("", _)) => None,
        Some((parent, _)) if parent == "." => None,
        Some((parent, _)) => Some(parent.to_string()),
    }
}
