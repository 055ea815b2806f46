//! systemd 服务与日志
//!
//! `setup` 只在 unit 文件内容变化时才 `daemon-reload` + `enable`，
//! 避免无改动的部署触发服务重启

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::domain::UnitFile;
use crate::error::RemoteResult;
use crate::infra::command::{CommandOutput, OutputStream, RunOptions};
use crate::services::session::Session;

/// 系统级 unit 目录
pub const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

/// 用户级 unit 目录（相对于远程用户主目录）
pub const USER_UNIT_DIR: &str = ".config/systemd/user";

/// 系统服务还是用户服务
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServiceOptions {
    pub user_service: bool,
}

impl ServiceOptions {
    pub fn system() -> Self {
        Self { user_service: false }
    }

    pub fn user() -> Self {
        Self { user_service: true }
    }

    /// 系统服务需要 sudo
    fn sudo(&self) -> bool {
        !self.user_service
    }

    fn user_flag(&self) -> Option<&'static str> {
        self.user_service.then_some("--user")
    }

    fn unit_path(&self, name: &str) -> String {
        let dir = if self.user_service {
            USER_UNIT_DIR
        } else {
            SYSTEM_UNIT_DIR
        };
        format!("{}/{}.service", dir, name)
    }
}

pub struct Systemd<'a> {
    session: &'a Session,
}

impl<'a> Systemd<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub fn service(&self) -> SystemdService<'a> {
        SystemdService {
            session: self.session,
        }
    }

    pub fn journal(&self) -> Journal<'a> {
        Journal {
            session: self.session,
        }
    }
}

/// `systemctl` 操作
pub struct SystemdService<'a> {
    session: &'a Session,
}

impl SystemdService<'_> {
    async fn systemctl(
        &self,
        verb: &str,
        name: Option<&str>,
        opts: ServiceOptions,
        run_opts: RunOptions,
    ) -> RemoteResult<CommandOutput> {
        let mut args: Vec<&str> = opts.user_flag().into_iter().collect();
        args.push(verb);
        args.extend(name);
        self.session
            .run("systemctl", &args, &run_opts.sudo(opts.sudo()))
            .await
    }

    /// 写入 unit 文件，有改动时 reload 并 enable
    ///
    /// 返回 unit 文件是否有改动
    pub async fn setup(
        &self,
        name: &str,
        unit: impl Into<UnitFile>,
        opts: ServiceOptions,
    ) -> RemoteResult<bool> {
        let unit = unit.into();
        let path = opts.unit_path(name);
        debug!(service = %name, path = %path, "Setting up systemd service");

        let changed = self
            .session
            .fs()
            .ensure_file_is(&path, Some(unit.render().as_bytes()), opts.sudo())
            .await?;

        if !changed {
            debug!(service = %name, "Unit file unchanged");
            return Ok(false);
        }

        self.systemctl("daemon-reload", None, opts, RunOptions::new().logging())
            .await?;
        self.enable(name, opts).await?;
        info!(service = %name, "Systemd service installed");
        Ok(true)
    }

    pub async fn start(&self, name: &str, opts: ServiceOptions) -> RemoteResult<()> {
        self.systemctl("start", Some(name), opts, RunOptions::new().logging())
            .await?;
        Ok(())
    }

    pub async fn stop(&self, name: &str, opts: ServiceOptions) -> RemoteResult<()> {
        self.systemctl("stop", Some(name), opts, RunOptions::new().logging())
            .await?;
        Ok(())
    }

    pub async fn restart(&self, name: &str, opts: ServiceOptions) -> RemoteResult<()> {
        self.systemctl("restart", Some(name), opts, RunOptions::new().logging())
            .await?;
        Ok(())
    }

    pub async fn enable(&self, name: &str, opts: ServiceOptions) -> RemoteResult<()> {
        self.systemctl("enable", Some(name), opts, RunOptions::new().logging())
            .await?;
        Ok(())
    }

    pub async fn disable(&self, name: &str, opts: ServiceOptions) -> RemoteResult<()> {
        self.systemctl("disable", Some(name), opts, RunOptions::new().logging())
            .await?;
        Ok(())
    }

    /// `systemctl show`，解析为属性表
    pub async fn show(
        &self,
        name: &str,
        opts: ServiceOptions,
    ) -> RemoteResult<BTreeMap<String, String>> {
        let out = self
            .systemctl("show", Some(name), opts, RunOptions::new())
            .await?;
        Ok(parse_properties(&out.stdout))
    }
}

/// `journalctl` 操作（只读，不需要 sudo）
pub struct Journal<'a> {
    session: &'a Session,
}

impl Journal<'_> {
    fn args<'n>(opts: ServiceOptions, follow: bool, name: &'n str) -> Vec<&'n str> {
        let mut args: Vec<&str> = opts.user_flag().into_iter().collect();
        if follow {
            args.push("--follow");
        } else {
            args.push("--no-pager");
        }
        args.push("--unit");
        args.push(name);
        args
    }

    /// 输出服务日志到本地日志
    pub async fn service(&self, name: &str, opts: ServiceOptions) -> RemoteResult<CommandOutput> {
        self.session
            .run(
                "journalctl",
                &Self::args(opts, false, name),
                &RunOptions::new().logging(),
            )
            .await
    }

    /// 持续跟随服务日志，每行交给 `handler`，直到远程命令结束
    pub async fn follow<F>(&self, name: &str, opts: ServiceOptions, handler: F) -> RemoteResult<()>
    where
        F: Fn(OutputStream, &str) + Send + Sync + 'static,
    {
        self.session
            .run(
                "journalctl",
                &Self::args(opts, true, name),
                &RunOptions::new().on_line(handler),
            )
            .await?;
        Ok(())
    }
}

fn parse_properties(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RestartPolicy, ServiceUnit};
    use crate::infra::testing::{FakeRemote, Node};
    use crate::services::session::tests::connected_session;
    use std::sync::{Arc, Mutex};

    fn unit() -> ServiceUnit {
        let mut unit = ServiceUnit::new("Daemon deployed by rdt to pi", "/usr/bin/node main.js");
        unit.restart = Some(RestartPolicy::Always);
        unit
    }

    fn systemctl_calls(remote: &FakeRemote) -> Vec<String> {
        remote
            .commands()
            .into_iter()
            .filter(|c| c.contains("systemctl"))
            .collect()
    }

    #[tokio::test]
    async fn test_setup_reloads_only_on_change() {
        let remote = FakeRemote::new();
        remote.add_dir("/etc");
        remote.add_dir("/etc/systemd");
        remote.add_dir("/etc/systemd/system");
        let session = connected_session(remote.clone()).await;
        let service = session.systemd().service();

        assert!(service.setup("rdt-pi", &unit(), ServiceOptions::system()).await.unwrap());
        assert_eq!(
            systemctl_calls(&remote),
            vec!["sudo systemctl daemon-reload", "sudo systemctl enable rdt-pi"]
        );
        assert_eq!(
            remote.node("/etc/systemd/system/rdt-pi.service"),
            Some(Node::File(unit().render().into_bytes()))
        );

        assert!(!service.setup("rdt-pi", &unit(), ServiceOptions::system()).await.unwrap());
        assert_eq!(systemctl_calls(&remote).len(), 2);
    }

    #[tokio::test]
    async fn test_user_service_uses_user_flag_without_sudo() {
        let remote = FakeRemote::new();
        let session = connected_session(remote.clone()).await;
        let service = session.systemd().service();

        service.setup("app", unit(), ServiceOptions::user()).await.unwrap();
        service.restart("app", ServiceOptions::user()).await.unwrap();

        assert!(remote.node(".config/systemd/user/app.service").is_some());
        assert_eq!(
            systemctl_calls(&remote),
            vec![
                "systemctl --user daemon-reload",
                "systemctl --user enable app",
                "systemctl --user restart app",
            ]
        );
    }

    #[tokio::test]
    async fn test_show_parses_properties() {
        let remote = FakeRemote::new();
        remote.respond(
            "systemctl show app",
            0,
            "ActiveState=active\nSubState=running\nExecMainPID=4242\n",
            "",
        );
        let session = connected_session(remote).await;

        let props = session
            .systemd()
            .service()
            .show("app", ServiceOptions::system())
            .await
            .unwrap();
        assert_eq!(props.get("ActiveState").map(String::as_str), Some("active"));
        assert_eq!(props.get("ExecMainPID").map(String::as_str), Some("4242"));
    }

    #[tokio::test]
    async fn test_journal_follow_streams_lines() {
        let remote = FakeRemote::new();
        remote.respond_chunks("journalctl --follow --unit app", 0, &["booted\nlisten", "ing on 3000\n"]);
        let session = connected_session(remote).await;

        let lines = Arc::new(Mutex::new(Vec::new()));
        let seen = lines.clone();
        session
            .systemd()
            .journal()
            .follow("app", ServiceOptions::system(), move |_, line| {
                seen.lock().unwrap().push(line.to_string());
            })
            .await
            .unwrap();

        assert_eq!(*lines.lock().unwrap(), vec!["booted", "listening on 3000"]);
    }
}
