//! apt 包管理
//!
//! 全部以 sudo + `DEBIAN_FRONTEND=noninteractive` + `-y` 执行，输出写日志

use tracing::{debug, info, warn};

use crate::error::RemoteResult;
use crate::infra::command::{CommandOutput, RunOptions};
use crate::services::session::Session;

pub struct Apt<'a> {
    session: &'a Session,
}

impl<'a> Apt<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    async fn apt_get(&self, subcommand: &str, packages: &[&str]) -> RemoteResult<CommandOutput> {
        debug!(subcommand = %subcommand, packages = ?packages, "apt-get");
        let mut args = vec![subcommand, "-y"];
        args.extend_from_slice(packages);
        self.session
            .run(
                "apt-get",
                &args,
                &RunOptions::new()
                    .sudo(true)
                    .env("DEBIAN_FRONTEND", "noninteractive")
                    .logging(),
            )
            .await
    }

    pub async fn update(&self) -> RemoteResult<CommandOutput> {
        self.apt_get("update", &[]).await
    }

    /// 距离上次成功的 update 超过 `hours` 小时才执行
    ///
    /// 返回是否执行了 update
    pub async fn update_if_stale(&self, hours: f64) -> RemoteResult<bool> {
        let lock = match self
            .session
            .reduce_work()
            .check_and_get_lock("apt-update", hours)
            .await?
        {
            Some(lock) => lock,
            None => {
                debug!("apt update ran recently, skipping");
                return Ok(false);
            }
        };

        match self.update().await {
            Ok(_) => {
                lock.release().await?;
                info!("apt package index updated");
                Ok(true)
            }
            Err(e) => {
                if let Err(abandon_err) = lock.abandon().await {
                    warn!(error = %abandon_err, "Failed to clear apt-update lock");
                }
                Err(e)
            }
        }
    }

    pub async fn install(&self, packages: &[&str]) -> RemoteResult<CommandOutput> {
        self.apt_get("install", packages).await
    }

    pub async fn upgrade(&self) -> RemoteResult<CommandOutput> {
        self.apt_get("upgrade", &[]).await
    }

    pub async fn full_upgrade(&self) -> RemoteResult<CommandOutput> {
        self.apt_get("full-upgrade", &[]).await
    }

    pub async fn dist_upgrade(&self) -> RemoteResult<CommandOutput> {
        self.apt_get("dist-upgrade", &[]).await
    }

    pub async fn autoremove(&self) -> RemoteResult<CommandOutput> {
        self.apt_get("autoremove", &[]).await
    }

    pub async fn autoclean(&self) -> RemoteResult<CommandOutput> {
        self.apt_get("autoclean", &[]).await
    }

    pub async fn purge(&self, packages: &[&str]) -> RemoteResult<CommandOutput> {
        self.apt_get("purge", packages).await
    }

    pub async fn remove(&self, packages: &[&str]) -> RemoteResult<CommandOutput> {
        self.apt_get("remove", packages).await
    }
}
